use crate::db;
use crate::export::DeckOptions;
use crate::generator::Language;
use crate::ipc::error::{err, internal, ok};
use crate::ipc::helpers::{require_admin, session_user};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
pub enum SetupSection {
    Generation,
    Sessions,
    Export,
}

impl SetupSection {
    const ALL: [SetupSection; 3] = [Self::Generation, Self::Sessions, Self::Export];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "generation" => Some(Self::Generation),
            "sessions" => Some(Self::Sessions),
            "export" => Some(Self::Export),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Generation => "generation",
            Self::Sessions => "sessions",
            Self::Export => "export",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Generation => "setup.generation",
            Self::Sessions => "setup.sessions",
            Self::Export => "setup.export",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Generation => json!({
            "lessonCost": 1,
            "defaultLanguage": "English"
        }),
        SetupSection::Sessions => json!({
            "ttlHours": 168
        }),
        SetupSection::Export => json!({
            "includeSummarySlide": true,
            "maxBulletsPerSlide": 8
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Generation => match k.as_str() {
                "lessonCost" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 20)?));
                }
                "defaultLanguage" => {
                    let lang = v
                        .as_str()
                        .and_then(Language::parse)
                        .ok_or("defaultLanguage must be one of: English, Arabic")?;
                    obj.insert(k.clone(), Value::String(lang.as_str().to_string()));
                }
                _ => return Err(format!("unknown generation field: {}", k)),
            },
            SetupSection::Sessions => match k.as_str() {
                "ttlHours" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 720)?));
                }
                _ => return Err(format!("unknown sessions field: {}", k)),
            },
            SetupSection::Export => match k.as_str() {
                "includeSummarySlide" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "maxBulletsPerSlide" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 3, 12)?));
                }
                _ => return Err(format!("unknown export field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: a malformed stored value falls back to defaults.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

pub struct GenerationSettings {
    pub lesson_cost: i64,
    pub default_language: Language,
}

pub fn generation_settings(conn: &rusqlite::Connection) -> anyhow::Result<GenerationSettings> {
    let v = load_section(conn, SetupSection::Generation)?;
    Ok(GenerationSettings {
        lesson_cost: v.get("lessonCost").and_then(Value::as_i64).unwrap_or(1),
        default_language: v
            .get("defaultLanguage")
            .and_then(Value::as_str)
            .and_then(Language::parse)
            .unwrap_or(Language::English),
    })
}

pub fn session_ttl_hours(conn: &rusqlite::Connection) -> anyhow::Result<i64> {
    let v = load_section(conn, SetupSection::Sessions)?;
    Ok(v.get("ttlHours").and_then(Value::as_i64).unwrap_or(168))
}

pub fn deck_options(conn: &rusqlite::Connection) -> anyhow::Result<DeckOptions> {
    let v = load_section(conn, SetupSection::Export)?;
    let defaults = DeckOptions::default();
    Ok(DeckOptions {
        include_summary_slide: v
            .get("includeSummarySlide")
            .and_then(Value::as_bool)
            .unwrap_or(defaults.include_summary_slide),
        max_bullets_per_slide: v
            .get("maxBulletsPerSlide")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(defaults.max_bullets_per_slide),
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, _user) = match session_user(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut out = Map::new();
    for section in SetupSection::ALL {
        match load_section(conn, section) {
            Ok(v) => {
                out.insert(section.name().to_string(), v);
            }
            Err(e) => return internal(&req.id, "db_query_failed", &req.method, &e),
        }
    }
    ok(&req.id, Value::Object(out))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, _admin) = match require_admin(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return internal(&req.id, "db_query_failed", &req.method, &e),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return internal(&req.id, "db_update_failed", &req.method, &e);
    }
    ok(&req.id, json!({ "section": section.name(), "value": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
