#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub const ADMIN_EMAIL: &str = "admin@school.test";
pub const PASSWORD: &str = "secret123";

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    spawn_sidecar_with_env(&[])
}

/// Spawns with a fixed session secret and admin email; `extra` adds or
/// overrides variables.
pub fn spawn_sidecar_with_env(
    extra: &[(&str, &str)],
) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_lessond");
    let mut cmd = Command::new(exe);
    cmd.env_remove("LESSOND_WORKSPACE")
        .env("LESSOND_SESSION_SECRET", "integration-secret")
        .env("LESSOND_ADMIN_EMAIL", ADMIN_EMAIL)
        .env("LESSOND_EXPORT_DIR", temp_dir("lessond-exports"));
    for (k, v) in extra {
        cmd.env(k, v);
    }
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn lessond");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn send_line(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    line: &str,
) -> serde_json::Value {
    writeln!(stdin, "{}", line).expect("write request");
    stdin.flush().expect("flush request");
    let mut out = String::new();
    reader.read_line(&mut out).expect("read response line");
    assert!(!out.trim().is_empty(), "empty response");
    serde_json::from_str(out.trim()).expect("parse response json")
}

pub fn request_as(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
    session: Option<&str>,
) -> serde_json::Value {
    let mut payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    if let Some(s) = session {
        payload["session"] = json!(s);
    }
    let value = send_line(stdin, reader, &payload.to_string());
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    request_as(stdin, reader, id, method, params, None)
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    session_ok(stdin, reader, id, method, params, None)
}

pub fn session_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
    session: Option<&str>,
) -> serde_json::Value {
    let value = request_as(stdin, reader, id, method, params, session);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(json!({}))
}

/// Returns the error code of a failed response, panicking on success.
pub fn error_code(value: &serde_json::Value) -> String {
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "expected failure: {}",
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
        .to_string()
}

pub fn open_workspace(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
}

/// Registers an account and logs in. Returns `(user_id, session_token)`.
pub fn register_and_login(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    name: &str,
    email: &str,
) -> (String, String) {
    let reg = request_ok(
        stdin,
        reader,
        &format!("reg-{}", email),
        "auth.register",
        json!({ "name": name, "email": email, "password": PASSWORD, "confirmPassword": PASSWORD }),
    );
    let user_id = reg["user"]["id"].as_str().expect("user id").to_string();
    let login = request_ok(
        stdin,
        reader,
        &format!("login-{}", email),
        "auth.login",
        json!({ "email": email, "password": PASSWORD }),
    );
    let token = login["sessionToken"]
        .as_str()
        .expect("session token")
        .to_string();
    (user_id, token)
}
