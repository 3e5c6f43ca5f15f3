use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde_json::Value as JsonValue;

use crate::auth::{self, AuthError, UserRecord};
use crate::ipc::error::{err, insufficient_tokens, internal};
use crate::ipc::types::{AppState, Request};
use crate::ledger::LedgerError;
use crate::lessons::LessonError;

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, JsonValue> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, JsonValue> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

/// Like `required_str` but keeps surrounding whitespace (passwords).
pub fn required_raw_str(req: &Request, key: &str) -> Result<String, JsonValue> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn parse_bool(v: Option<&JsonValue>, default: bool) -> Result<bool, &'static str> {
    match v {
        None => Ok(default),
        Some(v) if v.is_null() => Ok(default),
        Some(v) => v.as_bool().ok_or("must be boolean"),
    }
}

fn parse_opt_string(v: Option<&JsonValue>) -> Result<Option<String>, &'static str> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let s = v.as_str().ok_or("must be string or null")?.trim().to_string();
            if s.is_empty() {
                Ok(None)
            } else {
                Ok(Some(s))
            }
        }
    }
}

fn parse_opt_i64(v: Option<&JsonValue>) -> Result<Option<i64>, &'static str> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v.as_i64().map(Some).ok_or("must be integer or null"),
    }
}

pub fn opt_bool(
    params: &JsonValue,
    req: &Request,
    key: &str,
    default: bool,
) -> Result<bool, JsonValue> {
    parse_bool(params.get(key), default)
        .map_err(|m| err(&req.id, "bad_params", format!("{} {}", key, m), None))
}

pub fn opt_string(
    params: &JsonValue,
    req: &Request,
    key: &str,
) -> Result<Option<String>, JsonValue> {
    parse_opt_string(params.get(key))
        .map_err(|m| err(&req.id, "bad_params", format!("{} {}", key, m), None))
}

pub fn opt_i64(params: &JsonValue, req: &Request, key: &str) -> Result<Option<i64>, JsonValue> {
    parse_opt_i64(params.get(key))
        .map_err(|m| err(&req.id, "bad_params", format!("{} {}", key, m), None))
}

pub fn limit_param(req: &Request, default: i64, max: i64) -> Result<i64, JsonValue> {
    let limit = opt_i64(&req.params, req, "limit")?.unwrap_or(default);
    if !(1..=max).contains(&limit) {
        return Err(err(
            &req.id,
            "bad_params",
            format!("limit must be in 1..={}", max),
            None,
        ));
    }
    Ok(limit)
}

/// Resolves the request's session to a loaded user. Loading applies any due
/// monthly renewal.
pub fn session_user<'a>(
    state: &'a AppState,
    req: &Request,
) -> Result<(&'a Connection, UserRecord), JsonValue> {
    let conn = db_conn(state, req)?;
    let Some(token) = req.session.as_deref().filter(|t| !t.is_empty()) else {
        return Err(err(&req.id, "unauthorized", "login required", None));
    };
    let user_id = match auth::resolve_session(conn, &state.config.session_secret, token, now()) {
        Ok(Some(id)) => id,
        Ok(None) => return Err(err(&req.id, "unauthorized", "session expired or invalid", None)),
        Err(e) => return Err(internal(&req.id, "db_query_failed", &req.method, &e)),
    };
    match auth::load_user(conn, &user_id, now()) {
        Ok(user) => Ok((conn, user)),
        Err(AuthError::UserNotFound(_)) => {
            Err(err(&req.id, "unauthorized", "session expired or invalid", None))
        }
        Err(e) => Err(internal(&req.id, "db_update_failed", &req.method, &e)),
    }
}

pub fn require_admin<'a>(
    state: &'a AppState,
    req: &Request,
) -> Result<(&'a Connection, UserRecord), JsonValue> {
    let (conn, user) = session_user(state, req)?;
    if !user.is_admin() {
        return Err(err(&req.id, "forbidden", "admin role required", None));
    }
    Ok((conn, user))
}

pub fn ledger_error(req: &Request, e: LedgerError) -> JsonValue {
    match e {
        LedgerError::InsufficientTokens { balance, requested } => {
            insufficient_tokens(&req.id, balance, requested)
        }
        LedgerError::InvalidAmount(_) | LedgerError::NegativeValue { .. } => {
            err(&req.id, "bad_params", e.to_string(), None)
        }
        LedgerError::UserNotFound(_) => err(&req.id, "not_found", "user not found", None),
        LedgerError::Db(_) => internal(&req.id, "db_update_failed", &req.method, &e),
    }
}

pub fn auth_error(req: &Request, e: AuthError) -> JsonValue {
    match e {
        AuthError::EmailTaken => err(&req.id, "conflict", e.to_string(), None),
        AuthError::InvalidCredentials | AuthError::WrongPassword => {
            err(&req.id, "invalid_credentials", e.to_string(), None)
        }
        AuthError::Validation(msg) => err(&req.id, "bad_params", msg, None),
        AuthError::UserNotFound(_) => err(&req.id, "not_found", "user not found", None),
        AuthError::Ledger(inner) => ledger_error(req, inner),
        AuthError::Hashing(_) | AuthError::Db(_) => {
            internal(&req.id, "db_update_failed", &req.method, &e)
        }
    }
}

pub fn lesson_error(req: &Request, e: LessonError) -> JsonValue {
    match e {
        LessonError::NotFound(_) => err(&req.id, "not_found", "lesson not found", None),
        LessonError::Generation(_) => internal(&req.id, "generation_failed", &req.method, &e),
        LessonError::Ledger(inner) => ledger_error(req, inner),
        LessonError::Db(_) => internal(&req.id, "db_update_failed", &req.method, &e),
    }
}
