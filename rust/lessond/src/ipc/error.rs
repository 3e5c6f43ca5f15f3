use serde_json::json;
use tracing::error;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Logs the underlying failure and answers with a generic message so
/// database and filesystem details stay out of client responses.
pub fn internal(
    id: &str,
    code: &str,
    method: &str,
    cause: &dyn std::fmt::Display,
) -> serde_json::Value {
    error!(request_id = id, method, code, error = %cause, "request failed");
    let message = match code {
        "db_open_failed" => "failed to open the workspace database",
        "db_query_failed" => "failed to read from the database",
        "db_update_failed" => "failed to write to the database",
        "export_failed" => "failed to export the lesson",
        "generation_failed" => "lesson generation failed, please try again",
        _ => "internal error",
    };
    err(id, code, message, None)
}

/// Arabic notice shown to users who run out of tokens.
pub const INSUFFICIENT_TOKENS_NOTICE: &str =
    "نفدت التوكنز المتاحة. الرجاء الترقية أو انتظار التجديد الشهري.";

pub fn insufficient_tokens(id: &str, balance: i64, required: i64) -> serde_json::Value {
    err(
        id,
        "insufficient_tokens",
        "Insufficient tokens",
        Some(json!({
            "notify": INSUFFICIENT_TOKENS_NOTICE,
            "balance": balance,
            "required": required,
        })),
    )
}
