use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{ledger_error, limit_param, now, opt_i64, opt_string, session_user};
use crate::ipc::types::{AppState, Request};
use crate::ledger;
use serde_json::json;

const DEFAULT_HISTORY_LIMIT: i64 = 50;
const MAX_HISTORY_LIMIT: i64 = 500;

fn handle_consume(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, user) = match session_user(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let amount = match opt_i64(&req.params, req, "amount") {
        Ok(v) => v.unwrap_or(1),
        Err(e) => return e,
    };
    if amount <= 0 {
        return err(&req.id, "bad_params", "amount must be positive", None);
    }
    let reason = match opt_string(&req.params, req, "reason") {
        Ok(v) => v.unwrap_or_else(|| "manual".to_string()),
        Err(e) => return e,
    };
    match ledger::deduct(conn, &user.id, amount, &reason, "api", now()) {
        Ok(entry) => ok(
            &req.id,
            json!({ "transaction": entry, "balance": entry.balance_after }),
        ),
        Err(e) => ledger_error(req, e),
    }
}

fn handle_history(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, user) = match session_user(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let limit = match limit_param(req, DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match ledger::history(conn, &user.id, limit) {
        Ok(rows) => ok(
            &req.id,
            json!({
                "balance": user.token_balance,
                "monthlyTokenQuota": user.monthly_token_quota,
                "transactions": rows,
            }),
        ),
        Err(e) => ledger_error(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "tokens.consume" => Some(handle_consume(state, req)),
        "tokens.history" => Some(handle_history(state, req)),
        _ => None,
    }
}
