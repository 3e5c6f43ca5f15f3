use crate::auth::{self, AuthError};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    auth_error, ledger_error, limit_param, now, opt_bool, opt_i64, require_admin, required_str,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{self, Role};
use rusqlite::Connection;
use serde_json::json;
use tracing::info;

const DEFAULT_TX_LIMIT: i64 = 100;
const MAX_TX_LIMIT: i64 = 1000;

fn parse_role(req: &Request) -> Result<Role, serde_json::Value> {
    let raw = required_str(req, "role")?;
    Role::parse(&raw).ok_or_else(|| {
        err(
            &req.id,
            "bad_params",
            "role must be one of: student, trainer, admin",
            None,
        )
    })
}

/// Loads the target account, applying a due renewal so the admin change is
/// not overwritten by it on the next load.
fn target_user(conn: &Connection, req: &Request) -> Result<String, serde_json::Value> {
    let user_id = required_str(req, "userId")?;
    match auth::load_user(conn, &user_id, now()) {
        Ok(u) => Ok(u.id),
        Err(AuthError::UserNotFound(_)) => Err(err(&req.id, "not_found", "user not found", None)),
        Err(e) => Err(auth_error(req, e)),
    }
}

fn handle_users_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, _admin) = match require_admin(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match auth::list_users(conn) {
        Ok(users) => ok(&req.id, json!({ "users": users })),
        Err(e) => auth_error(req, e),
    }
}

fn handle_update_role(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, admin) = match require_admin(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let role = match parse_role(req) {
        Ok(r) => r,
        Err(e) => return e,
    };
    let reset_balance = match opt_bool(&req.params, req, "resetBalance", false) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let user_id = match target_user(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match ledger::change_role(conn, &user_id, role, reset_balance, now()) {
        Ok((account, entry)) => {
            info!(admin_id = %admin.id, user_id = %user_id, role = %role, "admin changed role");
            ok(&req.id, json!({ "account": account, "transaction": entry }))
        }
        Err(e) => ledger_error(req, e),
    }
}

fn handle_update_tokens(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, admin) = match require_admin(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let adjust = match opt_i64(&req.params, req, "adjust") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let quota = match opt_i64(&req.params, req, "monthlyTokenQuota") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let balance = match opt_i64(&req.params, req, "tokenBalance") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if adjust.is_none() && quota.is_none() && balance.is_none() {
        return err(
            &req.id,
            "bad_params",
            "one of adjust, monthlyTokenQuota, tokenBalance is required",
            None,
        );
    }
    let user_id = match target_user(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let at = now();
    let mut transactions = Vec::new();
    if quota.is_some() || balance.is_some() {
        match ledger::admin_set_tokens(conn, &user_id, quota, balance, at) {
            Ok(entry) => transactions.extend(entry),
            Err(e) => return ledger_error(req, e),
        }
    }
    if let Some(a) = adjust {
        match ledger::admin_adjust(conn, &user_id, a, at) {
            Ok(entry) => transactions.extend(entry),
            Err(e) => return ledger_error(req, e),
        }
    }
    let account = match ledger::load_account(conn, &user_id) {
        Ok(a) => a,
        Err(e) => return ledger_error(req, e),
    };
    info!(
        admin_id = %admin.id,
        user_id = %user_id,
        ?adjust,
        ?quota,
        ?balance,
        "admin updated tokens"
    );
    ok(
        &req.id,
        json!({ "account": account, "transactions": transactions }),
    )
}

fn handle_reset_balance(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, _admin) = match require_admin(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let user_id = match target_user(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let entry = match ledger::admin_reset_balance(conn, &user_id, now()) {
        Ok(e) => e,
        Err(e) => return ledger_error(req, e),
    };
    match ledger::load_account(conn, &user_id) {
        Ok(account) => ok(&req.id, json!({ "account": account, "transaction": entry })),
        Err(e) => ledger_error(req, e),
    }
}

fn handle_role_configs_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, _admin) = match require_admin(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match ledger::list_role_configs(conn) {
        Ok(rows) => ok(&req.id, json!({ "roleConfigs": rows })),
        Err(e) => ledger_error(req, e),
    }
}

fn handle_role_configs_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, admin) = match require_admin(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let role = match parse_role(req) {
        Ok(r) => r,
        Err(e) => return e,
    };
    let quota = match opt_i64(&req.params, req, "monthlyQuota") {
        Ok(Some(q)) => q,
        Ok(None) => return err(&req.id, "bad_params", "missing monthlyQuota", None),
        Err(e) => return e,
    };
    if let Err(e) = ledger::upsert_role_config(conn, role, quota, now()) {
        return ledger_error(req, e);
    }
    info!(admin_id = %admin.id, role = %role, quota, "role quota configured");
    match ledger::list_role_configs(conn) {
        Ok(rows) => {
            let row = rows.into_iter().find(|r| r.role == role.as_str());
            ok(&req.id, json!({ "roleConfig": row }))
        }
        Err(e) => ledger_error(req, e),
    }
}

fn handle_transactions_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, _admin) = match require_admin(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    // Deleted accounts keep their ledger rows, so no existence check here.
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let limit = match limit_param(req, DEFAULT_TX_LIMIT, MAX_TX_LIMIT) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match ledger::history(conn, &user_id, limit) {
        Ok(rows) => ok(&req.id, json!({ "transactions": rows })),
        Err(e) => ledger_error(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "admin.users.list" => Some(handle_users_list(state, req)),
        "admin.users.updateRole" => Some(handle_update_role(state, req)),
        "admin.users.updateTokens" => Some(handle_update_tokens(state, req)),
        "admin.users.resetBalance" => Some(handle_reset_balance(state, req)),
        "admin.roleConfigs.list" => Some(handle_role_configs_list(state, req)),
        "admin.roleConfigs.upsert" => Some(handle_role_configs_upsert(state, req)),
        "admin.transactions.list" => Some(handle_transactions_list(state, req)),
        _ => None,
    }
}
