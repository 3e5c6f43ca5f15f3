mod auth;
mod config;
mod db;
mod export;
mod generator;
mod ipc;
mod ledger;
mod lessons;

use std::io::{self, BufRead, Write};

use serde_json::json;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    // stdout carries the protocol; logs go to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();
}

fn main() {
    init_tracing();

    let config = config::Config::from_env();
    if config.session_secret_generated {
        warn!(
            "{} is not set; using a per-process secret, sessions end when the process exits",
            config::ENV_SESSION_SECRET
        );
    }

    let mut state = ipc::AppState {
        workspace: None,
        db: None,
        config,
        generator: Box::new(generator::TemplatePlanGenerator),
    };

    if let Some(path) = state.config.workspace.clone() {
        match db::open_db(&path) {
            Ok(conn) => {
                info!(workspace = %path.display(), "workspace opened from environment");
                state.workspace = Some(path);
                state.db = Some(conn);
            }
            Err(e) => error!(workspace = %path.display(), error = %e, "failed to open workspace"),
        }
    }
    info!(version = env!("CARGO_PKG_VERSION"), "lessond ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to echo back.
                let resp = json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
