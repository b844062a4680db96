use crate::auth::{self, Claims, TokenError};
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};

/// Auth gate for protected methods. Missing/blank token maps to
/// `unauthorized` (401 in the HTTP portals), a token that fails
/// verification (bad signature or expired) to `forbidden` (403).
pub fn require_token(state: &AppState, req: &Request) -> Result<Claims, serde_json::Value> {
    let Some(secret) = state.secret.as_ref() else {
        return Err(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    let token = req.token.as_deref().map(str::trim).unwrap_or("");
    if token.is_empty() {
        return Err(err(&req.id, "unauthorized", "missing access token", None));
    }
    match auth::verify_token(secret, token) {
        Ok(claims) => Ok(claims),
        Err(TokenError::Expired) => {
            Err(err(&req.id, "forbidden", "token expired", None))
        }
        Err(TokenError::Invalid) => {
            Err(err(&req.id, "forbidden", "invalid token", None))
        }
    }
}

pub fn require_role(
    state: &AppState,
    req: &Request,
    role: &str,
) -> Result<Claims, serde_json::Value> {
    let claims = require_token(state, req)?;
    if claims.role != role {
        return Err(err(
            &req.id,
            "forbidden",
            format!("requires {} role", role),
            None,
        ));
    }
    Ok(claims)
}

/// Required non-empty string param, trimmed.
pub fn param_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
