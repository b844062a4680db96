use crate::auth;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{param_str, require_token};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;

fn handle_faculty_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(secret) = state.secret.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(faculty_id) = param_str(&req.params, "facultyId") else {
        return err(&req.id, "bad_params", "missing facultyId", None);
    };
    let Some(password) = param_str(&req.params, "password") else {
        return err(&req.id, "bad_params", "missing password", None);
    };

    let row: Option<(String, String)> = match conn
        .query_row(
            "SELECT name, password_hash FROM faculty WHERE faculty_id = ?",
            [&faculty_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((name, password_hash)) = row else {
        return err(&req.id, "not_found", "faculty not found", None);
    };

    match auth::verify_password(&password, &password_hash) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "invalid_credential", "invalid password", None),
        Err(e) => return err(&req.id, "hash_failed", e.to_string(), None),
    }

    match auth::issue_token(secret, &faculty_id, auth::ROLE_FACULTY, &name) {
        Ok(token) => ok(
            &req.id,
            json!({
                "token": token,
                "facultyId": faculty_id
            }),
        ),
        Err(e) => err(&req.id, "token_issue_failed", e.to_string(), None),
    }
}

fn handle_faculty_profile(state: &mut AppState, req: &Request) -> serde_json::Value {
    let claims = match require_token(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    // Callers may ask for another faculty's profile; default to the token's
    // own identity.
    let faculty_id = param_str(&req.params, "facultyId").unwrap_or(claims.sub);

    let row: Option<serde_json::Value> = match conn
        .query_row(
            "SELECT faculty_id, name, email, department, class, section, class_advisor, batch
             FROM faculty WHERE faculty_id = ?",
            [&faculty_id],
            |r| {
                Ok(json!({
                    "facultyId": r.get::<_, String>(0)?,
                    "name": r.get::<_, String>(1)?,
                    "email": r.get::<_, String>(2)?,
                    "department": r.get::<_, String>(3)?,
                    "class": r.get::<_, String>(4)?,
                    "section": r.get::<_, String>(5)?,
                    "classAdvisor": r.get::<_, String>(6)?,
                    "batch": r.get::<_, String>(7)?
                }))
            },
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    match row {
        Some(profile) => ok(&req.id, profile),
        None => err(&req.id, "not_found", "faculty not found", None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "faculty.login" => Some(handle_faculty_login(state, req)),
        "faculty.profile" => Some(handle_faculty_profile(state, req)),
        _ => None,
    }
}
