use crate::calc::{self, SemesterTotals};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{param_str, require_token};
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::params_from_iter;
use serde_json::json;

/// Cumulative CGPA lookup: group the stored per-semester sums by student
/// identity and re-derive CGPA at read time. Raw grades are never consulted
/// here.
fn handle_cgpa_calculation(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_token(state, req) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let category = param_str(&req.params, "category");
    let mut where_clauses: Vec<&str> = Vec::new();
    let mut bind_values: Vec<Value> = Vec::new();

    match category.as_deref() {
        None => {}
        Some("rollNo") => {
            let Some(filter_value) = param_str(&req.params, "filterValue") else {
                return err(&req.id, "bad_params", "missing filterValue", None);
            };
            where_clauses.push("roll_no = ?");
            bind_values.push(Value::Text(filter_value));
        }
        Some("registerNo") => {
            let Some(filter_value) = param_str(&req.params, "filterValue") else {
                return err(&req.id, "bad_params", "missing filterValue", None);
            };
            where_clauses.push("register_number = ?");
            bind_values.push(Value::Text(filter_value));
        }
        Some("classwise") => {
            let Some(department) = param_str(&req.params, "department") else {
                return err(&req.id, "bad_params", "missing department", None);
            };
            let Some(section) = param_str(&req.params, "section") else {
                return err(&req.id, "bad_params", "missing section", None);
            };
            let Some(batch) = param_str(&req.params, "batch") else {
                return err(&req.id, "bad_params", "missing batch", None);
            };
            where_clauses.push("department = ?");
            bind_values.push(Value::Text(department));
            where_clauses.push("section = ?");
            bind_values.push(Value::Text(section));
            where_clauses.push("batch = ?");
            bind_values.push(Value::Text(batch));
            if let Some(year) = param_str(&req.params, "year") {
                where_clauses.push("year = ?");
                bind_values.push(Value::Text(year));
            }
        }
        Some(other) => {
            return err(
                &req.id,
                "bad_params",
                "category must be one of: rollNo, registerNo, classwise",
                Some(json!({ "category": other })),
            );
        }
    }

    let mut sql = String::from(
        "SELECT roll_no, register_number, student_name,
                SUM(total_score), SUM(total_credits)
         FROM cgpa_calculation",
    );
    if !where_clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&where_clauses.join(" AND "));
    }
    sql.push_str(
        " GROUP BY roll_no, register_number, student_name
          ORDER BY roll_no",
    );

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(bind_values), |r| {
            let roll_no: String = r.get(0)?;
            let register_number: String = r.get(1)?;
            let student_name: String = r.get(2)?;
            let total_score: f64 = r.get(3)?;
            let total_credits: f64 = r.get(4)?;
            Ok((
                roll_no,
                register_number,
                student_name,
                total_score,
                total_credits,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let results: Vec<serde_json::Value> = rows
        .into_iter()
        .map(
            |(roll_no, register_number, student_name, total_score, total_credits)| {
                let totals = SemesterTotals {
                    total_score,
                    total_credits,
                };
                json!({
                    "rollNo": roll_no,
                    "registerNumber": register_number,
                    "studentName": student_name,
                    "totalScore": total_score,
                    "totalCredits": total_credits,
                    "cgpa": calc::gpa_to_json(totals.gpa())
                })
            },
        )
        .collect();

    ok(&req.id, json!({ "results": results }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "faculty.cgpaCalculation" => Some(handle_cgpa_calculation(state, req)),
        _ => None,
    }
}
