use crate::export;
use crate::ipc::error::{err, internal, ok};
use crate::ipc::handlers::lessons::{lesson_meta, remove_files};
use crate::ipc::handlers::setup::deck_options;
use crate::ipc::helpers::{lesson_error, now, required_str, session_user};
use crate::ipc::types::{AppState, Request};
use crate::lessons;
use serde_json::json;
use std::path::Path;
use tracing::info;

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let options = match deck_options(conn) {
        Ok(v) => v,
        Err(e) => return internal(&req.id, "db_query_failed", &req.method, &e),
    };

    let blocks = export::parse_plan(&lesson.generated_plan);
    let deck = export::build_deck(&lesson_meta(&lesson), &blocks, options);
    let path = match export::write_deck_bundle(&deck, &state.config.export_dir) {
        Ok(p) => p,
        Err(e) => return internal(&req.id, "export_failed", &req.method, &e),
    };
    let path_str = path.to_string_lossy().to_string();
    let presentation = match lessons::insert_presentation(
        conn,
        &lesson.id,
        &path_str,
        deck.slides.len() as i64,
        now(),
    ) {
        Ok(p) => p,
        Err(e) => {
            remove_files(std::slice::from_ref(&path_str));
            return lesson_error(req, e);
        }
    };
    info!(lesson_id = %lesson.id, slides = deck.slides.len(), "presentation created");
    ok(
        &req.id,
        json!({
            "presentation": presentation,
            "downloadName": export::deck_download_name(&lesson.topic),
            "contentType": export::DECK_CONTENT_TYPE,
        }),
    )
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, user) = match session_user(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let lesson_id = match required_str(req, "lessonId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match lessons::list_presentations(conn, &user.id, &lesson_id) {
        Ok(rows) => ok(&req.id, json!({ "presentations": rows })),
        Err(e) => lesson_error(req, e),
    }
}

fn handle_download(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (conn, user) = match session_user(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let presentation_id = match required_str(req, "presentationId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let found = lessons::find_presentation(conn, &user.id, &presentation_id);
    let (presentation, topic) = match found {
        Ok(v) => v,
        Err(lessons::LessonError::NotFound(_)) => {
            return err(&req.id, "not_found", "presentation not found", None)
        }
        Err(e) => return lesson_error(req, e),
    };
    // Exports live in temporary storage and may have been cleaned up.
    if !Path::new(&presentation.file_path).is_file() {
        return err(
            &req.id,
            "file_missing",
            "presentation file is no longer available",
            Some(json!({ "presentationId": presentation.id })),
        );
    }
    ok(
        &req.id,
        json!({
            "path": presentation.file_path,
            "downloadName": export::deck_download_name(&topic),
            "contentType": export::DECK_CONTENT_TYPE,
            "slideCount": presentation.slide_count,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "presentations.create" => Some(handle_create(state, req)),
        "presentations.list" => Some(handle_list(state, req)),
        "presentations.download" => Some(handle_download(state, req)),
        _ => None,
    }
}
