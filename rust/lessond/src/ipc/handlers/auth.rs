use crate::auth::{self, NewUser, ProfilePatch};
use crate::ipc::error::{err, internal, ok};
use crate::ipc::handlers::lessons::remove_files;
use crate::ipc::handlers::setup::session_ttl_hours;
use crate::ipc::helpers::{
    auth_error, db_conn, now, opt_string, required_raw_str, required_str, session_user,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use tracing::info;

fn handle_register(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let email = match required_str(req, "email") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let password = match required_raw_str(req, "password") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Some(confirm) = req.params.get("confirmPassword").and_then(|v| v.as_str()) {
        if confirm != password {
            return err(&req.id, "bad_params", "passwords do not match", None);
        }
    }

    match auth::register(
        conn,
        NewUser {
            name: &name,
            email: &email,
            password: &password,
        },
        state.config.admin_email.as_deref(),
        now(),
    ) {
        Ok(user) => ok(&req.id, json!({ "user": user })),
        Err(e) => auth_error(req, e),
    }
}

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let email = match required_str(req, "email") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let password = match required_raw_str(req, "password") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let user = match auth::authenticate(conn, &email, &password) {
        Ok(u) => u,
        Err(e) => return auth_error(req, e),
    };
    let ttl_hours = match session_ttl_hours(conn) {
        Ok(v) => v,
        Err(e) => return internal(&req.id, "db_query_failed", &req.method, &e),
    };
    let at = now();
    let secret = &state.config.session_secret;
    let token = match auth::create_session(conn, secret, &user.id, ttl_hours, at) {
        Ok(t) => t,
        Err(e) => return auth_error(req, e),
    };
    // Loading after login applies a renewal that came due while logged out.
    let user = match auth::load_user(conn, &user.id, at) {
        Ok(u) => u,
        Err(e) => return auth_error(req, e),
    };
    info!(user_id = %user.id, "login");
    ok(
        &req.id,
        json!({
            "sessionToken": token,
            "expiresInHours": ttl_hours,
            "user": user,
        }),
    )
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let Some(token) = req.session.as_deref().filter(|t| !t.is_empty()) else {
        return err(&req.id, "unauthorized", "login required", None);
    };
    match auth::revoke_session(conn, &state.config.session_secret, token) {
        Ok(revoked) => ok(&req.id, json!({ "loggedOut": revoked })),
        Err(e) => auth_error(req, e),
    }
}

fn handle_user_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    match session_user(state, req) {
        Ok((_, user)) => ok(&req.id, json!({ "user": user })),
        Err(e) => e,
    }
}

fn handle_user_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, user) = match session_user(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let current_password = match required_raw_str(req, "currentPassword") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match opt_string(&req.params, req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let email = match opt_string(&req.params, req, "email") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let new_password = match req.params.get("newPassword") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => match v.as_str() {
            Some(s) if !s.is_empty() => Some(s.to_string()),
            Some(_) => None,
            None => return err(&req.id, "bad_params", "newPassword must be string", None),
        },
    };

    let patch = ProfilePatch {
        name: name.as_deref(),
        email: email.as_deref(),
        new_password: new_password.as_deref(),
    };
    match auth::update_profile(conn, &user.id, &current_password, patch, now()) {
        Ok(updated) => ok(&req.id, json!({ "user": updated })),
        Err(e) => auth_error(req, e),
    }
}

fn handle_user_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, user) = match session_user(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let paths = match auth::delete_account(conn, &user.id) {
        Ok(p) => p,
        Err(e) => return auth_error(req, e),
    };
    remove_files(&paths);
    ok(&req.id, json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.register" => Some(handle_register(state, req)),
        "auth.login" => Some(handle_login(state, req)),
        "auth.logout" => Some(handle_logout(state, req)),
        "user.get" => Some(handle_user_get(state, req)),
        "user.update" => Some(handle_user_update(state, req)),
        "user.delete" => Some(handle_user_delete(state, req)),
        _ => None,
    }
}
