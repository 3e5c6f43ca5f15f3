use crate::export::{self, LessonMeta};
use crate::generator::{Language, PlanRequest};
use crate::ipc::error::{err, internal, ok};
use crate::ipc::handlers::setup::generation_settings;
use crate::ipc::helpers::{lesson_error, now, required_str, session_user};
use crate::ipc::types::{AppState, Request};
use crate::lessons::{self, Lesson};
use serde_json::json;
use tracing::warn;

const RECENT_LESSONS: usize = 5;

pub fn lesson_meta(lesson: &Lesson) -> LessonMeta {
    LessonMeta {
        topic: lesson.topic.clone(),
        grade_level: lesson.grade_level.clone(),
        teaching_strategy: lesson.teaching_strategy.clone(),
        language: Language::parse(&lesson.language).unwrap_or(Language::English),
    }
}

pub fn remove_files(paths: &[String]) {
    for p in paths {
        if let Err(e) = std::fs::remove_file(p) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %p, error = %e, "failed to remove exported file");
            }
        }
    }
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, user) = match session_user(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match lessons::list_lessons(conn, &user.id) {
        Ok(rows) => ok(&req.id, json!({ "lessons": rows })),
        Err(e) => lesson_error(req, e),
    }
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, user) = match session_user(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let settings = match generation_settings(conn) {
        Ok(v) => v,
        Err(e) => return internal(&req.id, "db_query_failed", &req.method, &e),
    };
    let grade_level = match required_str(req, "gradeLevel") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let topic = match required_str(req, "topic") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let teaching_strategy = match required_str(req, "teachingStrategy") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let language = req
        .params
        .get("language")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(settings.default_language.as_str())
        .to_string();
    let plan_req = match PlanRequest::new(&grade_level, &topic, &teaching_strategy, &language) {
        Ok(v) => v,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };

    match lessons::create_lesson(
        conn,
        state.generator.as_ref(),
        &user.id,
        &plan_req,
        settings.lesson_cost,
        now(),
    ) {
        Ok((lesson, charge)) => ok(
            &req.id,
            json!({
                "lesson": lesson,
                "transaction": charge,
                "balance": charge.balance_after,
            }),
        ),
        Err(e) => lesson_error(req, e),
    }
}

fn handle_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, user) = match session_user(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let lesson_id = match required_str(req, "lessonId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match lessons::get_lesson(conn, &user.id, &lesson_id) {
        Ok(lesson) => ok(&req.id, json!({ "lesson": lesson })),
        Err(e) => lesson_error(req, e),
    }
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, user) = match session_user(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let lesson_id = match required_str(req, "lessonId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };
    let mut generated_plan: Option<&str> = None;
    let mut gpt_plan: Option<&str> = None;
    for (k, v) in patch {
        let Some(text) = v.as_str() else {
            return err(&req.id, "bad_params", format!("{} must be string", k), None);
        };
        match k.as_str() {
            "generatedPlan" => generated_plan = Some(text),
            "gptPlan" => gpt_plan = Some(text),
            _ => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("unknown lesson field: {}", k),
                    None,
                )
            }
        }
    }
    if generated_plan.is_none() && gpt_plan.is_none() {
        return err(&req.id, "bad_params", "patch is empty", None);
    }
    match lessons::update_lesson(conn, &user.id, &lesson_id, generated_plan, gpt_plan, now()) {
        Ok(lesson) => ok(&req.id, json!({ "lesson": lesson })),
        Err(e) => lesson_error(req, e),
    }
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, user) = match session_user(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let lesson_id = match required_str(req, "lessonId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match lessons::delete_lesson(conn, &user.id, &lesson_id) {
        Ok(paths) => {
            remove_files(&paths);
            ok(&req.id, json!({ "deleted": true }))
        }
        Err(e) => lesson_error(req, e),
    }
}

fn handle_export_document(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, user) = match session_user(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let lesson_id = match required_str(req, "lessonId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let lesson = match lessons::get_lesson(conn, &user.id, &lesson_id) {
        Ok(l) => l,
        Err(e) => return lesson_error(req, e),
    };
    let meta = lesson_meta(&lesson);
    let blocks = export::parse_plan(&lesson.generated_plan);
    let path = match export::write_document(&meta, &blocks, &state.config.export_dir) {
        Ok(p) => p.to_string_lossy().to_string(),
        Err(e) => return internal(&req.id, "export_failed", &req.method, &e),
    };
    if let Err(e) = lessons::record_document_export(conn, &lesson.id, &path, now()) {
        remove_files(std::slice::from_ref(&path));
        return lesson_error(req, e);
    }
    ok(
        &req.id,
        json!({
            "path": path,
            "downloadName": export::document_download_name(&lesson.topic),
            "contentType": export::DOCUMENT_CONTENT_TYPE,
        }),
    )
}

fn handle_dashboard(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, user) = match session_user(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match lessons::dashboard_counts(conn, &user.id, RECENT_LESSONS) {
        Ok(counts) => ok(
            &req.id,
            json!({
                "user": user,
                "lessonCount": counts.lesson_count,
                "presentationCount": counts.presentation_count,
                "recentLessons": counts.recent_lessons,
            }),
        ),
        Err(e) => lesson_error(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "lessons.list" => Some(handle_list(state, req)),
        "lessons.create" => Some(handle_create(state, req)),
        "lessons.open" => Some(handle_open(state, req)),
        "lessons.update" => Some(handle_update(state, req)),
        "lessons.delete" => Some(handle_delete(state, req)),
        "lessons.exportDocument" => Some(handle_export_document(state, req)),
        "dashboard.get" => Some(handle_dashboard(state, req)),
        _ => None,
    }
}
