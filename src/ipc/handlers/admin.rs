use crate::auth;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{param_str, require_role};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::json;

/// Create the first admin account. Only valid while no admin exists; the
/// portals have no self-signup, so a fresh workspace is seeded through this
/// method once and never again.
fn handle_admin_bootstrap(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(admin_id) = param_str(&req.params, "adminId") else {
        return err(&req.id, "bad_params", "missing adminId", None);
    };
    let Some(name) = param_str(&req.params, "name") else {
        return err(&req.id, "bad_params", "missing name", None);
    };
    let Some(password) = param_str(&req.params, "password") else {
        return err(&req.id, "bad_params", "missing password", None);
    };

    let existing: i64 = match conn.query_row("SELECT COUNT(*) FROM admins", [], |r| r.get(0)) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if existing > 0 {
        return err(
            &req.id,
            "forbidden",
            "workspace already has an admin account",
            None,
        );
    }

    let password_hash = match auth::hash_password(&password) {
        Ok(h) => h,
        Err(e) => return err(&req.id, "hash_failed", e.to_string(), None),
    };
    if let Err(e) = conn.execute(
        "INSERT INTO admins(admin_id, name, password_hash, created_at) VALUES(?, ?, ?, ?)",
        (&admin_id, &name, &password_hash, Utc::now().to_rfc3339()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "admins" })),
        );
    }

    ok(&req.id, json!({ "adminId": admin_id }))
}

fn handle_admin_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(secret) = state.secret.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(admin_id) = param_str(&req.params, "adminId") else {
        return err(&req.id, "bad_params", "missing adminId", None);
    };
    let Some(password) = param_str(&req.params, "password") else {
        return err(&req.id, "bad_params", "missing password", None);
    };

    let row: Option<(String, String)> = match conn
        .query_row(
            "SELECT name, password_hash FROM admins WHERE admin_id = ?",
            [&admin_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((name, password_hash)) = row else {
        return err(&req.id, "not_found", "admin not found", None);
    };

    match auth::verify_password(&password, &password_hash) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "invalid_credential", "invalid password", None),
        Err(e) => return err(&req.id, "hash_failed", e.to_string(), None),
    }

    match auth::issue_token(secret, &admin_id, auth::ROLE_ADMIN, &name) {
        Ok(token) => ok(
            &req.id,
            json!({
                "token": token,
                "admin": { "adminId": admin_id, "name": name }
            }),
        ),
        Err(e) => err(&req.id, "token_issue_failed", e.to_string(), None),
    }
}

fn handle_admin_add_faculty(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(resp) = require_role(state, req, auth::ROLE_ADMIN) {
        return resp;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let required = [
        "facultyId",
        "name",
        "email",
        "department",
        "class",
        "section",
        "classAdvisor",
        "batch",
        "password",
    ];
    let mut fields: Vec<String> = Vec::with_capacity(required.len());
    for key in required {
        match param_str(&req.params, key) {
            Some(v) => fields.push(v),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("missing {}", key),
                    None,
                )
            }
        }
    }

    let faculty_id = &fields[0];
    let exists: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM faculty WHERE faculty_id = ?",
            [faculty_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_some() {
        return err(
            &req.id,
            "bad_params",
            "faculty id already exists",
            Some(json!({ "facultyId": faculty_id })),
        );
    }

    let password_hash = match auth::hash_password(&fields[8]) {
        Ok(h) => h,
        Err(e) => return err(&req.id, "hash_failed", e.to_string(), None),
    };

    if let Err(e) = conn.execute(
        "INSERT INTO faculty(
            faculty_id, name, email, department, class, section,
            class_advisor, batch, password_hash, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &fields[0],
            &fields[1],
            &fields[2],
            &fields[3],
            &fields[4],
            &fields[5],
            &fields[6],
            &fields[7],
            &password_hash,
            Utc::now().to_rfc3339(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "faculty" })),
        );
    }

    ok(&req.id, json!({ "facultyId": &fields[0] }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "admin.bootstrap" => Some(handle_admin_bootstrap(state, req)),
        "admin.login" => Some(handle_admin_login(state, req)),
        "admin.addFaculty" => Some(handle_admin_add_faculty(state, req)),
        _ => None,
    }
}
