use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::db;

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_FACULTY: &str = "faculty";

/// Cost factor used by the portals this daemon replaces.
const BCRYPT_COST: u32 = 10;
const TOKEN_TTL_SECS: i64 = 3600;
const SECRET_SETTING_KEY: &str = "auth.secret";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub name: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TokenError {
    Expired,
    Invalid,
}

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    Ok(bcrypt::hash(password, BCRYPT_COST)?)
}

pub fn verify_password(password: &str, hash: &str) -> anyhow::Result<bool> {
    Ok(bcrypt::verify(password, hash)?)
}

pub fn issue_token(secret: &str, sub: &str, role: &str, name: &str) -> anyhow::Result<String> {
    issue_token_with_ttl(secret, sub, role, name, TOKEN_TTL_SECS)
}

fn issue_token_with_ttl(
    secret: &str,
    sub: &str,
    role: &str,
    name: &str,
    ttl_secs: i64,
) -> anyhow::Result<String> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: sub.to_string(),
        role: role.to_string(),
        name: name.to_string(),
        iat: now,
        exp: now + ttl_secs,
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

pub fn verify_token(secret: &str, token: &str) -> Result<Claims, TokenError> {
    let mut validation = Validation::new(Algorithm::HS256);
    // Tokens expire exactly at iat + ttl.
    validation.leeway = 0;
    match decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    ) {
        Ok(data) => Ok(data.claims),
        Err(e) => match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => Err(TokenError::Expired),
            _ => Err(TokenError::Invalid),
        },
    }
}

/// Load the workspace's signing secret, generating and persisting one on
/// first open.
pub fn ensure_secret(conn: &Connection) -> anyhow::Result<String> {
    if let Some(secret) = db::settings_get(conn, SECRET_SETTING_KEY)? {
        return Ok(secret);
    }
    let secret = generate_secret();
    db::settings_set(conn, SECRET_SETTING_KEY, &secret)?;
    Ok(secret)
}

fn generate_secret() -> String {
    let mut hasher = Sha256::new();
    hasher.update(Uuid::new_v4().as_bytes());
    hasher.update(Uuid::new_v4().as_bytes());
    hasher.update(Utc::now().timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    format!("{:x}", hasher.finalize())
}
