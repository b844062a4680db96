use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_daemon() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_cgpad");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn cgpad");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    token: Option<&str>,
    params: Value,
) -> Value {
    let mut payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    if let Some(t) = token {
        payload["token"] = json!(t);
    }
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn result(resp: &Value) -> &Value {
    assert_eq!(
        resp.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "expected ok response, got {}",
        resp
    );
    resp.get("result").expect("result")
}

/// Open a workspace and provision one faculty account; returns its token.
fn setup_faculty(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) -> String {
    let _ = request(
        stdin,
        reader,
        "s1",
        "workspace.select",
        None,
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request(
        stdin,
        reader,
        "s2",
        "admin.bootstrap",
        None,
        json!({ "adminId": "admin1", "name": "Principal", "password": "s3cret" }),
    );
    let login = request(
        stdin,
        reader,
        "s3",
        "admin.login",
        None,
        json!({ "adminId": "admin1", "password": "s3cret" }),
    );
    let admin_token = result(&login)
        .get("token")
        .and_then(|v| v.as_str())
        .expect("admin token")
        .to_string();
    let _ = request(
        stdin,
        reader,
        "s4",
        "admin.addFaculty",
        Some(&admin_token),
        json!({
            "facultyId": "F-101",
            "name": "R. Kumar",
            "email": "rk@example.edu",
            "department": "CSE",
            "class": "2nd Year",
            "section": "A",
            "classAdvisor": "no",
            "batch": "2021-2025",
            "password": "faculty-pass"
        }),
    );
    let flogin = request(
        stdin,
        reader,
        "s5",
        "faculty.login",
        None,
        json!({ "facultyId": "F-101", "password": "faculty-pass" }),
    );
    result(&flogin)
        .get("token")
        .and_then(|v| v.as_str())
        .expect("faculty token")
        .to_string()
}

fn upload_params(semester: &str, rows: Value) -> Value {
    json!({
        "semester": semester,
        "department": "CSE",
        "year": "2nd Year",
        "section": "A",
        "batch": "2021-2025",
        "rows": rows
    })
}

fn query_unfiltered(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    token: &str,
) -> Vec<Value> {
    let resp = request(
        stdin,
        reader,
        id,
        "faculty.cgpaCalculation",
        Some(token),
        json!({}),
    );
    result(&resp)
        .get("results")
        .and_then(|v| v.as_array())
        .expect("results")
        .clone()
}

#[test]
fn malformed_rows_are_skipped_not_fatal() {
    let workspace = temp_dir("cgpad-upload-skip");
    let (mut child, mut stdin, mut reader) = spawn_daemon();
    let token = setup_faculty(&mut stdin, &mut reader, &workspace);

    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "faculty.uploadCgpa",
        Some(&token),
        upload_params(
            "3rd Semester",
            json!([
                ["Roll No", "Register Number", "Student Name", "MATH", "PHY"],
                ["", "", "", "Mathematics", "Physics"],
                ["", "", "", "4", "3"],
                ["21CS001", "310621104001", "Anitha R", "O", "B"],
                ["", "310621104002", "Missing Roll", "A", "A"],
                ["21CS003", "310621104003", "Chitra V", "A+", "C"]
            ]),
        ),
    );
    let r = result(&resp);
    assert_eq!(r.get("students").and_then(|v| v.as_u64()), Some(2));
    let skipped = r.get("skipped").and_then(|v| v.as_array()).expect("skipped");
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].get("row").and_then(|v| v.as_u64()), Some(4));

    let rows = query_unfiltered(&mut stdin, &mut reader, "2", &token);
    assert_eq!(rows.len(), 2);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn reupload_overwrites_instead_of_double_counting() {
    let workspace = temp_dir("cgpad-upload-overwrite");
    let (mut child, mut stdin, mut reader) = spawn_daemon();
    let token = setup_faculty(&mut stdin, &mut reader, &workspace);

    let sheet = |math_grade: &str| {
        json!([
            ["Roll No", "Register Number", "Student Name", "MATH", "PHY"],
            ["", "", "", "Mathematics", "Physics"],
            ["", "", "", "4", "3"],
            ["21CS001", "310621104001", "Anitha R", math_grade, "B"]
        ])
    };

    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "faculty.uploadCgpa",
        Some(&token),
        upload_params("3rd Semester", sheet("O")),
    );
    let rows = query_unfiltered(&mut stdin, &mut reader, "2", &token);
    assert_eq!(rows.len(), 1);
    // 10*4 + 6*3 = 58 over 7 credits.
    assert_eq!(rows[0].get("cgpa").and_then(|v| v.as_f64()), Some(8.29));

    // Same (student, semester) again with a corrected grade: totals are
    // replaced, not added.
    let _ = request(
        &mut stdin,
        &mut reader,
        "3",
        "faculty.uploadCgpa",
        Some(&token),
        upload_params("3rd Semester", sheet("A")),
    );
    let rows = query_unfiltered(&mut stdin, &mut reader, "4", &token);
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].get("totalCredits").and_then(|v| v.as_f64()),
        Some(7.0)
    );
    // 8*4 + 6*3 = 50 over 7 credits = 7.142... => 7.14
    assert_eq!(rows[0].get("cgpa").and_then(|v| v.as_f64()), Some(7.14));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn cgpa_accumulates_across_semesters() {
    let workspace = temp_dir("cgpad-upload-cumulative");
    let (mut child, mut stdin, mut reader) = spawn_daemon();
    let token = setup_faculty(&mut stdin, &mut reader, &workspace);

    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "faculty.uploadCgpa",
        Some(&token),
        upload_params(
            "3rd Semester",
            json!([
                ["Roll No", "Register Number", "Student Name", "MATH", "PHY"],
                ["", "", "", "Mathematics", "Physics"],
                ["", "", "", "4", "3"],
                ["21CS001", "310621104001", "Anitha R", "O", "B"]
            ]),
        ),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "2",
        "faculty.uploadCgpa",
        Some(&token),
        upload_params(
            "4th Semester",
            json!([
                ["Roll No", "Register Number", "Student Name", "CHEM"],
                ["", "", "", "Chemistry"],
                ["", "", "", "3"],
                ["21CS001", "310621104001", "Anitha R", "A"]
            ]),
        ),
    );

    let rows = query_unfiltered(&mut stdin, &mut reader, "3", &token);
    assert_eq!(rows.len(), 1);
    // Semester sums: 58/7 and 24/3; cumulative 82/10 = 8.2.
    assert_eq!(
        rows[0].get("totalScore").and_then(|v| v.as_f64()),
        Some(82.0)
    );
    assert_eq!(
        rows[0].get("totalCredits").and_then(|v| v.as_f64()),
        Some(10.0)
    );
    assert_eq!(rows[0].get("cgpa").and_then(|v| v.as_f64()), Some(8.2));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn subject_and_grade_uploads_validate_payloads() {
    let workspace = temp_dir("cgpad-upload-validate");
    let (mut child, mut stdin, mut reader) = spawn_daemon();
    let token = setup_faculty(&mut stdin, &mut reader, &workspace);

    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "faculty.uploadSubjects",
        Some(&token),
        json!({ "subjects": [] }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));

    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "faculty.uploadSubjects",
        Some(&token),
        json!({ "subjects": [
            { "subjectCode": "MATH", "subjectName": "Mathematics", "credits": 4 },
            { "subjectCode": "PHY", "subjectName": "Physics" }
        ]}),
    );
    let r = result(&resp);
    assert_eq!(r.get("upserted").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(
        r.get("skipped").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );

    let resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "faculty.uploadGrades",
        Some(&token),
        json!({ "grades": [
            {
                "rollNo": "21CS001",
                "registerNumber": "310621104001",
                "studentName": "Anitha R",
                "subjectCode": "MATH",
                "grade": "O",
                "semester": "3rd Semester",
                "department": "CSE",
                "year": "2nd Year",
                "section": "A",
                "batch": "2021-2025"
            },
            { "rollNo": "21CS002" }
        ]}),
    );
    let r = result(&resp);
    assert_eq!(r.get("upserted").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(
        r.get("skipped").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
