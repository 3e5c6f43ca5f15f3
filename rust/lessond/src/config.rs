use std::path::PathBuf;
use uuid::Uuid;

pub const ENV_WORKSPACE: &str = "LESSOND_WORKSPACE";
pub const ENV_SESSION_SECRET: &str = "LESSOND_SESSION_SECRET";
pub const ENV_ADMIN_EMAIL: &str = "LESSOND_ADMIN_EMAIL";
pub const ENV_EXPORT_DIR: &str = "LESSOND_EXPORT_DIR";

/// Process-level settings. Runtime-tunable values live in the workspace
/// `settings` table instead (see `setup.get`).
#[derive(Debug, Clone)]
pub struct Config {
    pub workspace: Option<PathBuf>,
    pub session_secret: String,
    /// True when no secret was configured; sessions then die with the process.
    pub session_secret_generated: bool,
    pub admin_email: Option<String>,
    pub export_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let (session_secret, session_secret_generated) = match non_empty(ENV_SESSION_SECRET) {
            Some(s) => (s, false),
            None => (
                format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple()),
                true,
            ),
        };

        Self {
            workspace: non_empty(ENV_WORKSPACE).map(PathBuf::from),
            session_secret,
            session_secret_generated,
            admin_email: non_empty(ENV_ADMIN_EMAIL).map(|e| e.to_ascii_lowercase()),
            export_dir: non_empty(ENV_EXPORT_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("lessond-exports")),
        }
    }
}
