//! Accounts, password hashing and session tokens.
//!
//! Session tokens are opaque to clients. Only a SHA-256 digest of
//! `secret || token` is stored, so a leaked database does not leak live
//! sessions.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::ledger::{self, Role};

pub const MIN_PASSWORD_LEN: usize = 6;
pub const NAME_LEN: std::ops::RangeInclusive<usize> = 2..=100;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("email already registered")]
    EmailTaken,

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("current password is incorrect")]
    WrongPassword,

    #[error("{0}")]
    Validation(String),

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("password hashing failed: {0}")]
    Hashing(String),

    #[error(transparent)]
    Ledger(#[from] ledger::LedgerError),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, AuthError>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
    pub monthly_token_quota: i64,
    pub token_balance: i64,
    pub token_renewal_date: Option<String>,
    pub created_at: String,
}

impl UserRecord {
    pub fn is_admin(&self) -> bool {
        Role::parse(&self.role) == Some(Role::Admin)
    }
}

pub struct NewUser<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Default)]
pub struct ProfilePatch<'a> {
    pub name: Option<&'a str>,
    pub email: Option<&'a str>,
    pub new_password: Option<&'a str>,
}

pub fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if !NAME_LEN.contains(&name.chars().count()) {
        return Err(AuthError::Validation(format!(
            "name must be {}-{} characters",
            NAME_LEN.start(),
            NAME_LEN.end()
        )));
    }
    Ok(name.to_string())
}

pub fn validate_email(email: &str) -> Result<String> {
    let email = email.trim().to_ascii_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(AuthError::Validation("invalid email address".into()));
    }
    Ok(email)
}

pub fn validate_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::Validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AuthError::Hashing(e.to_string()))
}

pub fn verify_password(stored_hash: &str, password: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

fn user_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: r.get(0)?,
        name: r.get(1)?,
        email: r.get(2)?,
        role: r.get(3)?,
        monthly_token_quota: r.get(4)?,
        token_balance: r.get(5)?,
        token_renewal_date: r.get(6)?,
        created_at: r.get(7)?,
    })
}

const USER_COLUMNS: &str =
    "id, name, email, role, monthly_token_quota, token_balance, token_renewal_date, created_at";

pub fn find_user(conn: &Connection, user_id: &str) -> Result<Option<UserRecord>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
    Ok(conn.query_row(&sql, [user_id], user_from_row).optional()?)
}

pub fn find_user_by_email(conn: &Connection, email: &str) -> Result<Option<UserRecord>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?");
    Ok(conn
        .query_row(&sql, [email.trim()], user_from_row)
        .optional()?)
}

pub fn list_users(conn: &Connection) -> Result<Vec<UserRecord>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY name COLLATE NOCASE, id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], user_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Loads the user and applies a due monthly renewal first.
pub fn load_user(conn: &Connection, user_id: &str, now: DateTime<Utc>) -> Result<UserRecord> {
    ledger::ensure_monthly_renewal(conn, user_id, now).map_err(|e| match e {
        ledger::LedgerError::UserNotFound(id) => AuthError::UserNotFound(id),
        other => AuthError::Ledger(other),
    })?;
    find_user(conn, user_id)?.ok_or_else(|| AuthError::UserNotFound(user_id.to_string()))
}

/// Creates the account with the role's quota as its opening balance.
pub fn register(
    conn: &Connection,
    input: NewUser<'_>,
    admin_email: Option<&str>,
    now: DateTime<Utc>,
) -> Result<UserRecord> {
    let name = validate_name(input.name)?;
    let email = validate_email(input.email)?;
    validate_password(input.password)?;
    if find_user_by_email(conn, &email)?.is_some() {
        return Err(AuthError::EmailTaken);
    }

    let role = match admin_email {
        Some(a) if a.trim().eq_ignore_ascii_case(&email) => Role::Admin,
        _ => Role::Student,
    };
    let quota = ledger::quota_for_role(conn, role.as_str())?;
    let password_hash = hash_password(input.password)?;
    let user_id = Uuid::new_v4().to_string();
    let ts = ledger::timestamp(now);

    conn.execute(
        "INSERT INTO users(id, name, email, password_hash, role, monthly_token_quota,
                           token_balance, token_renewal_date, quota_override, created_at, updated_at)
         VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7, 0, ?7, ?7)",
        params![user_id, name, email, password_hash, role.as_str(), quota, ts],
    )?;
    info!(user_id = %user_id, role = %role, quota, "user registered");

    find_user(conn, &user_id)?.ok_or(AuthError::UserNotFound(user_id))
}

pub fn authenticate(conn: &Connection, email: &str, password: &str) -> Result<UserRecord> {
    let email = email.trim().to_ascii_lowercase();
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT id, password_hash FROM users WHERE email = ?",
            [&email],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((user_id, stored_hash)) = row else {
        warn!("login attempt for unknown email");
        return Err(AuthError::InvalidCredentials);
    };
    if !verify_password(&stored_hash, password) {
        warn!(user_id = %user_id, "login attempt with wrong password");
        return Err(AuthError::InvalidCredentials);
    }
    find_user(conn, &user_id)?.ok_or(AuthError::InvalidCredentials)
}

pub fn update_profile(
    conn: &Connection,
    user_id: &str,
    current_password: &str,
    patch: ProfilePatch<'_>,
    now: DateTime<Utc>,
) -> Result<UserRecord> {
    let stored_hash: Option<String> = conn
        .query_row(
            "SELECT password_hash FROM users WHERE id = ?",
            [user_id],
            |r| r.get(0),
        )
        .optional()?;
    let stored_hash = stored_hash.ok_or_else(|| AuthError::UserNotFound(user_id.to_string()))?;
    if !verify_password(&stored_hash, current_password) {
        return Err(AuthError::WrongPassword);
    }

    let name = patch.name.map(validate_name).transpose()?;
    let email = patch.email.map(validate_email).transpose()?;
    if let Some(e) = email.as_deref() {
        if let Some(existing) = find_user_by_email(conn, e)? {
            if existing.id != user_id {
                return Err(AuthError::EmailTaken);
            }
        }
    }
    let new_hash = match patch.new_password {
        Some(p) => {
            validate_password(p)?;
            Some(hash_password(p)?)
        }
        None => None,
    };

    let tx = conn.unchecked_transaction()?;
    if let Some(n) = name {
        tx.execute("UPDATE users SET name = ? WHERE id = ?", params![n, user_id])?;
    }
    if let Some(e) = email {
        tx.execute("UPDATE users SET email = ? WHERE id = ?", params![e, user_id])?;
    }
    if let Some(h) = new_hash {
        tx.execute(
            "UPDATE users SET password_hash = ? WHERE id = ?",
            params![h, user_id],
        )?;
    }
    tx.execute(
        "UPDATE users SET updated_at = ? WHERE id = ?",
        params![ledger::timestamp(now), user_id],
    )?;
    tx.commit()?;

    find_user(conn, user_id)?.ok_or_else(|| AuthError::UserNotFound(user_id.to_string()))
}

/// Removes the account with its lessons, presentation rows and sessions.
/// Ledger rows are kept. Returns the file paths of removed exports.
pub fn delete_account(conn: &Connection, user_id: &str) -> Result<Vec<String>> {
    let tx = conn.unchecked_transaction()?;
    let paths = {
        let mut stmt = tx.prepare(
            "SELECT p.file_path FROM presentations p
             JOIN lessons l ON l.id = p.lesson_id
             WHERE l.user_id = ?1
             UNION ALL
             SELECT d.file_path FROM document_exports d
             JOIN lessons l ON l.id = d.lesson_id
             WHERE l.user_id = ?1",
        )?;
        let rows = stmt
            .query_map([user_id], |r| r.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows
    };
    tx.execute(
        "DELETE FROM presentations
         WHERE lesson_id IN (SELECT id FROM lessons WHERE user_id = ?)",
        [user_id],
    )?;
    tx.execute(
        "DELETE FROM document_exports
         WHERE lesson_id IN (SELECT id FROM lessons WHERE user_id = ?)",
        [user_id],
    )?;
    tx.execute("DELETE FROM lessons WHERE user_id = ?", [user_id])?;
    tx.execute("DELETE FROM sessions WHERE user_id = ?", [user_id])?;
    let removed = tx.execute("DELETE FROM users WHERE id = ?", [user_id])?;
    if removed == 0 {
        return Err(AuthError::UserNotFound(user_id.to_string()));
    }
    tx.commit()?;
    info!(user_id, "account deleted");
    Ok(paths)
}

pub fn session_digest(secret: &str, token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b":");
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn create_session(
    conn: &Connection,
    secret: &str,
    user_id: &str,
    ttl_hours: i64,
    now: DateTime<Utc>,
) -> Result<String> {
    let token = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
    let expires = now + Duration::hours(ttl_hours.max(1));
    conn.execute(
        "INSERT INTO sessions(token_digest, user_id, created_at, expires_at) VALUES(?, ?, ?, ?)",
        params![
            session_digest(secret, &token),
            user_id,
            ledger::timestamp(now),
            ledger::timestamp(expires)
        ],
    )?;
    // Opportunistic cleanup keeps the table small without a background task.
    conn.execute(
        "DELETE FROM sessions WHERE expires_at <= ?",
        [ledger::timestamp(now)],
    )?;
    Ok(token)
}

/// Returns the owning user id of a live session.
pub fn resolve_session(
    conn: &Connection,
    secret: &str,
    token: &str,
    now: DateTime<Utc>,
) -> Result<Option<String>> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT user_id, expires_at FROM sessions WHERE token_digest = ?",
            [session_digest(secret, token)],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    Ok(match row {
        Some((user_id, expires_at)) if expires_at > ledger::timestamp(now) => Some(user_id),
        _ => None,
    })
}

pub fn revoke_session(conn: &Connection, secret: &str, token: &str) -> Result<bool> {
    let n = conn.execute(
        "DELETE FROM sessions WHERE token_digest = ?",
        [session_digest(secret, token)],
    )?;
    Ok(n > 0)
}
