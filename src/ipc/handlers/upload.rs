use crate::calc::{self, SheetStudentRow, SheetSubject, UPLOAD_CHUNK_SIZE};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{param_str, require_token};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;

fn obj_str(entry: &serde_json::Value, key: &str) -> Option<String> {
    entry
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn upsert_subject(
    conn: &Connection,
    code: &str,
    name: &str,
    credits: u32,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO subjects(subject_code, subject_name, credits)
         VALUES(?, ?, ?)
         ON CONFLICT(subject_code) DO UPDATE SET
           subject_name = excluded.subject_name,
           credits = excluded.credits",
        (code, name, credits),
    )?;
    Ok(())
}

struct GradeUpsert<'a> {
    roll_no: &'a str,
    register_number: &'a str,
    student_name: &'a str,
    subject_code: &'a str,
    grade: &'a str,
    semester: &'a str,
    department: &'a str,
    year: &'a str,
    section: &'a str,
    batch: &'a str,
}

fn upsert_grade(conn: &Connection, g: &GradeUpsert<'_>) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO grades(
            roll_no, register_number, student_name, subject_code, grade,
            semester, department, year, section, batch, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(roll_no, subject_code, semester) DO UPDATE SET
           register_number = excluded.register_number,
           student_name = excluded.student_name,
           grade = excluded.grade,
           department = excluded.department,
           year = excluded.year,
           section = excluded.section,
           batch = excluded.batch,
           updated_at = excluded.updated_at",
        (
            g.roll_no,
            g.register_number,
            g.student_name,
            g.subject_code,
            g.grade,
            g.semester,
            g.department,
            g.year,
            g.section,
            g.batch,
            Utc::now().to_rfc3339(),
        ),
    )?;
    Ok(())
}

struct AggregateUpsert<'a> {
    roll_no: &'a str,
    register_number: &'a str,
    student_name: &'a str,
    semester: &'a str,
    total_score: f64,
    total_credits: f64,
    department: &'a str,
    year: &'a str,
    section: &'a str,
    batch: &'a str,
}

// Whole-row overwrite: re-uploading a semester replaces its totals rather
// than adding to them.
fn upsert_aggregate(conn: &Connection, a: &AggregateUpsert<'_>) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO cgpa_calculation(
            roll_no, register_number, student_name, semester,
            total_score, total_credits, department, year, section, batch, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(roll_no, register_number, semester) DO UPDATE SET
           student_name = excluded.student_name,
           total_score = excluded.total_score,
           total_credits = excluded.total_credits,
           department = excluded.department,
           year = excluded.year,
           section = excluded.section,
           batch = excluded.batch,
           updated_at = excluded.updated_at",
        (
            a.roll_no,
            a.register_number,
            a.student_name,
            a.semester,
            a.total_score,
            a.total_credits,
            a.department,
            a.year,
            a.section,
            a.batch,
            Utc::now().to_rfc3339(),
        ),
    )?;
    Ok(())
}

fn handle_upload_subjects(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_token(state, req) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(subjects) = req.params.get("subjects").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing subjects[]", None);
    };
    if subjects.is_empty() {
        return err(&req.id, "bad_params", "no subjects to upload", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let mut upserted = 0usize;
    let mut skipped: Vec<serde_json::Value> = Vec::new();
    for (i, entry) in subjects.iter().enumerate() {
        let code = obj_str(entry, "subjectCode");
        let name = obj_str(entry, "subjectName");
        let credits = entry
            .get("credits")
            .and_then(|v| v.as_u64())
            .and_then(|v| u32::try_from(v).ok());
        let (Some(code), Some(name), Some(credits)) = (code, name, credits) else {
            skipped.push(json!({
                "index": i,
                "reason": "missing subjectCode/subjectName/credits"
            }));
            continue;
        };
        if let Err(e) = upsert_subject(&tx, &code, &name, credits) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "subjects" })),
            );
        }
        upserted += 1;
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    let mut result = json!({ "upserted": upserted });
    if !skipped.is_empty() {
        result["skipped"] = json!(skipped);
    }
    ok(&req.id, result)
}

fn handle_upload_grades(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_token(state, req) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(grades) = req.params.get("grades").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing grades[]", None);
    };
    if grades.is_empty() {
        return err(&req.id, "bad_params", "no grades provided", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let mut upserted = 0usize;
    let mut skipped: Vec<serde_json::Value> = Vec::new();
    for (i, entry) in grades.iter().enumerate() {
        let fields = [
            obj_str(entry, "rollNo"),
            obj_str(entry, "registerNumber"),
            obj_str(entry, "studentName"),
            obj_str(entry, "subjectCode"),
            obj_str(entry, "grade"),
            obj_str(entry, "semester"),
            obj_str(entry, "department"),
            obj_str(entry, "year"),
            obj_str(entry, "section"),
            obj_str(entry, "batch"),
        ];
        if fields.iter().any(|f| f.is_none()) {
            skipped.push(json!({ "index": i, "reason": "missing grade record field" }));
            continue;
        }
        let f: Vec<String> = fields.into_iter().flatten().collect();
        let g = GradeUpsert {
            roll_no: &f[0],
            register_number: &f[1],
            student_name: &f[2],
            subject_code: &f[3],
            grade: &f[4],
            semester: &f[5],
            department: &f[6],
            year: &f[7],
            section: &f[8],
            batch: &f[9],
        };
        if let Err(e) = upsert_grade(&tx, &g) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "grades" })),
            );
        }
        upserted += 1;
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    let mut result = json!({ "upserted": upserted });
    if !skipped.is_empty() {
        result["skipped"] = json!(skipped);
    }
    ok(&req.id, result)
}

fn rows_from_params(params: &serde_json::Value) -> Option<Vec<Vec<String>>> {
    let rows = params.get("rows")?.as_array()?;
    let mut out: Vec<Vec<String>> = Vec::with_capacity(rows.len());
    for row in rows {
        let cells = row.as_array()?;
        let mut converted: Vec<String> = Vec::with_capacity(cells.len());
        for cell in cells {
            // Sheet grids arrive with mixed cell types; numbers (the credits
            // row, numeric register numbers) are carried as JSON numbers.
            let s = match cell {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Null => String::new(),
                _ => return None,
            };
            converted.push(s);
        }
        out.push(converted);
    }
    Some(out)
}

/// Parse the grid, upsert subjects, then per student row upsert grades and
/// the recomputed semester aggregate, in chunks of 10 student rows with one
/// transaction per chunk.
fn handle_upload_cgpa(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_token(state, req) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(semester) = param_str(&req.params, "semester") else {
        return err(&req.id, "bad_params", "missing semester", None);
    };
    let Some(department) = param_str(&req.params, "department") else {
        return err(&req.id, "bad_params", "missing department", None);
    };
    let Some(year) = param_str(&req.params, "year") else {
        return err(&req.id, "bad_params", "missing year", None);
    };
    let Some(section) = param_str(&req.params, "section") else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(batch) = param_str(&req.params, "batch") else {
        return err(&req.id, "bad_params", "missing batch", None);
    };
    let Some(rows) = rows_from_params(&req.params) else {
        return err(&req.id, "bad_params", "missing rows[][] grid", None);
    };

    let model = match calc::parse_sheet(&rows) {
        Ok(m) => m,
        Err(e) => return err(&req.id, &e.code, e.message, e.details),
    };

    // Subjects first, one transaction; the chunked student writes depend on
    // the credit weights being in place.
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    for s in &model.subjects {
        if let Err(e) = upsert_subject(&tx, &s.subject_code, &s.subject_name, s.credits) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "subjects" })),
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    let credit_map = model.credit_map();
    let mut results: Vec<serde_json::Value> = Vec::with_capacity(model.students.len());

    let chunk_outcome = calc::process_chunks(
        &model.students,
        UPLOAD_CHUNK_SIZE,
        |_, chunk: &[SheetStudentRow]| -> Result<(), rusqlite::Error> {
            let tx = conn.unchecked_transaction()?;
            for student in chunk {
                for (subject, grade) in model.subjects.iter().zip(&student.grades) {
                    let g = GradeUpsert {
                        roll_no: &student.roll_no,
                        register_number: &student.register_number,
                        student_name: &student.student_name,
                        subject_code: &subject.subject_code,
                        grade,
                        semester: &semester,
                        department: &department,
                        year: &year,
                        section: &section,
                        batch: &batch,
                    };
                    upsert_grade(&tx, &g)?;
                }

                let pairs = model
                    .subjects
                    .iter()
                    .zip(&student.grades)
                    .map(|(s, g): (&SheetSubject, &String)| {
                        (s.subject_code.as_str(), g.as_str())
                    });
                let totals = calc::semester_totals(pairs, &credit_map);

                upsert_aggregate(
                    &tx,
                    &AggregateUpsert {
                        roll_no: &student.roll_no,
                        register_number: &student.register_number,
                        student_name: &student.student_name,
                        semester: &semester,
                        total_score: totals.total_score,
                        total_credits: totals.total_credits,
                        department: &department,
                        year: &year,
                        section: &section,
                        batch: &batch,
                    },
                )?;

                results.push(json!({
                    "rollNo": student.roll_no,
                    "registerNumber": student.register_number,
                    "studentName": student.student_name,
                    "totalScore": totals.total_score,
                    "totalCredits": totals.total_credits,
                    "gpa": calc::gpa_to_json(totals.gpa())
                }));
            }
            tx.commit()
        },
    );

    let chunks = match chunk_outcome {
        Ok(n) => n,
        Err(failure) => {
            return err(
                &req.id,
                "chunk_failed",
                format!("chunk {} failed: {}", failure.chunk_index, failure.error),
                Some(json!({
                    "failedChunk": failure.chunk_index,
                    "committedChunks": failure.committed_chunks,
                    "chunkSize": UPLOAD_CHUNK_SIZE
                })),
            );
        }
    };

    ok(
        &req.id,
        json!({
            "subjects": model.subjects.len(),
            "students": model.students.len(),
            "chunks": chunks,
            "skipped": model.skipped,
            "results": results
        }),
    )
}

/// Direct semester-aggregate upsert. Two method names route here: the
/// portals exposed both save-cgpa-results and store-cgpa-calculation over
/// the same model call.
fn handle_store_aggregates(
    state: &mut AppState,
    req: &Request,
    list_key: &str,
) -> serde_json::Value {
    if let Err(resp) = require_token(state, req) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(entries) = req.params.get(list_key).and_then(|v| v.as_array()) else {
        return err(
            &req.id,
            "bad_params",
            format!("missing {}[]", list_key),
            None,
        );
    };
    if entries.is_empty() {
        return err(&req.id, "bad_params", "no aggregate rows provided", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let mut upserted = 0usize;
    let mut skipped: Vec<serde_json::Value> = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        let roll_no = obj_str(entry, "rollNo");
        let register_number = obj_str(entry, "registerNumber");
        let student_name = obj_str(entry, "studentName");
        let semester = obj_str(entry, "semester");
        let total_score = entry.get("totalScore").and_then(|v| v.as_f64());
        let total_credits = entry.get("totalCredits").and_then(|v| v.as_f64());
        let (
            Some(roll_no),
            Some(register_number),
            Some(student_name),
            Some(semester),
            Some(total_score),
            Some(total_credits),
        ) = (
            roll_no,
            register_number,
            student_name,
            semester,
            total_score,
            total_credits,
        )
        else {
            skipped.push(json!({ "index": i, "reason": "missing aggregate field" }));
            continue;
        };

        let department = obj_str(entry, "department").unwrap_or_default();
        let year = obj_str(entry, "year").unwrap_or_default();
        let section = obj_str(entry, "section").unwrap_or_default();
        let batch = obj_str(entry, "batch").unwrap_or_default();

        let a = AggregateUpsert {
            roll_no: &roll_no,
            register_number: &register_number,
            student_name: &student_name,
            semester: &semester,
            total_score,
            total_credits,
            department: &department,
            year: &year,
            section: &section,
            batch: &batch,
        };
        if let Err(e) = upsert_aggregate(&tx, &a) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "cgpa_calculation" })),
            );
        }
        upserted += 1;
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    let mut result = json!({ "upserted": upserted });
    if !skipped.is_empty() {
        result["skipped"] = json!(skipped);
    }
    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "faculty.uploadSubjects" => Some(handle_upload_subjects(state, req)),
        "faculty.uploadGrades" => Some(handle_upload_grades(state, req)),
        "faculty.uploadCgpa" => Some(handle_upload_cgpa(state, req)),
        "faculty.saveCgpaResults" => Some(handle_store_aggregates(state, req, "results")),
        "faculty.storeCgpaCalculation" => Some(handle_store_aggregates(state, req, "gpaData")),
        _ => None,
    }
}
