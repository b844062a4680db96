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
    assert!(!line.trim().is_empty(), "empty response for {}", method);
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

#[test]
fn full_portal_flow_smoke() {
    let workspace = temp_dir("cgpad-smoke");
    let (mut child, mut stdin, mut reader) = spawn_daemon();

    let health = request(&mut stdin, &mut reader, "1", "health", None, json!({}));
    assert!(result(&health).get("version").is_some());

    let _ = request(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        None,
        json!({ "path": workspace.to_string_lossy() }),
    );

    let _ = request(
        &mut stdin,
        &mut reader,
        "3",
        "admin.bootstrap",
        None,
        json!({ "adminId": "admin1", "name": "Principal", "password": "s3cret" }),
    );

    let login = request(
        &mut stdin,
        &mut reader,
        "4",
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
        &mut stdin,
        &mut reader,
        "5",
        "admin.addFaculty",
        Some(&admin_token),
        json!({
            "facultyId": "F-101",
            "name": "R. Kumar",
            "email": "rk@example.edu",
            "department": "CSE",
            "class": "2nd Year",
            "section": "A",
            "classAdvisor": "yes",
            "batch": "2021-2025",
            "password": "faculty-pass"
        }),
    );

    let flogin = request(
        &mut stdin,
        &mut reader,
        "6",
        "faculty.login",
        None,
        json!({ "facultyId": "F-101", "password": "faculty-pass" }),
    );
    let faculty_token = result(&flogin)
        .get("token")
        .and_then(|v| v.as_str())
        .expect("faculty token")
        .to_string();

    let profile = request(
        &mut stdin,
        &mut reader,
        "7",
        "faculty.profile",
        Some(&faculty_token),
        json!({}),
    );
    let profile = result(&profile);
    assert_eq!(
        profile.get("facultyId").and_then(|v| v.as_str()),
        Some("F-101")
    );
    assert_eq!(
        profile.get("department").and_then(|v| v.as_str()),
        Some("CSE")
    );
    assert!(profile.get("passwordHash").is_none());

    let upload = request(
        &mut stdin,
        &mut reader,
        "8",
        "faculty.uploadCgpa",
        Some(&faculty_token),
        json!({
            "semester": "3rd Semester",
            "department": "CSE",
            "year": "2nd Year",
            "section": "A",
            "batch": "2021-2025",
            "rows": [
                ["Roll No", "Register Number", "Student Name", "MATH", "PHY"],
                ["", "", "", "Mathematics", "Physics"],
                ["", "", "", "4", "3"],
                ["21CS001", "310621104001", "Anitha R", "O", "B"]
            ]
        }),
    );
    let upload = result(&upload);
    assert_eq!(upload.get("subjects").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(upload.get("students").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(upload.get("chunks").and_then(|v| v.as_u64()), Some(1));
    let first = &upload.get("results").and_then(|v| v.as_array()).expect("results")[0];
    assert_eq!(first.get("totalScore").and_then(|v| v.as_f64()), Some(58.0));
    assert_eq!(first.get("gpa").and_then(|v| v.as_f64()), Some(8.29));

    let query = request(
        &mut stdin,
        &mut reader,
        "9",
        "faculty.cgpaCalculation",
        Some(&faculty_token),
        json!({}),
    );
    let rows = result(&query)
        .get("results")
        .and_then(|v| v.as_array())
        .expect("query results")
        .clone();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("cgpa").and_then(|v| v.as_f64()), Some(8.29));

    let unknown = request(&mut stdin, &mut reader, "10", "nope.nothing", None, json!({}));
    assert_eq!(unknown.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        unknown
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("not_implemented")
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
