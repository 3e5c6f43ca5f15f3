mod test_support;

use serde_json::json;
use std::io::Read;
use test_support::{
    error_code, open_workspace, register_and_login, request_as, session_ok, spawn_sidecar,
    temp_dir,
};

fn create_lesson(
    stdin: &mut std::process::ChildStdin,
    reader: &mut std::io::BufReader<std::process::ChildStdout>,
    token: &str,
    topic: &str,
    language: &str,
) -> String {
    let created = session_ok(
        stdin,
        reader,
        &format!("create-{}", topic),
        "lessons.create",
        json!({
            "gradeLevel": "7",
            "topic": topic,
            "teachingStrategy": "project_based",
            "language": language
        }),
        Some(token),
    );
    created["lesson"]["id"].as_str().expect("lesson id").to_string()
}

#[test]
fn presentation_bundle_is_written_listed_and_downloadable() {
    let workspace = temp_dir("lessond-presentations");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);
    let (_uid, token) = register_and_login(&mut stdin, &mut reader, "Pia", "pia@school.test");
    let (_oid, other) = register_and_login(&mut stdin, &mut reader, "Ole", "ole@school.test");
    let lesson_id = create_lesson(&mut stdin, &mut reader, &token, "Water cycle", "English");

    let created = session_ok(
        &mut stdin,
        &mut reader,
        "1",
        "presentations.create",
        json!({ "lessonId": lesson_id }),
        Some(token.as_str()),
    );
    assert_eq!(created["downloadName"], "Lesson_Water_cycle.zip");
    assert_eq!(created["contentType"], "application/zip");
    let presentation = &created["presentation"];
    let presentation_id = presentation["id"].as_str().expect("id").to_string();
    let path = presentation["filePath"].as_str().expect("path").to_string();
    // Title, five sections, overview and summary.
    assert_eq!(presentation["slideCount"], 8);

    let file = std::fs::File::open(&path).expect("bundle exists");
    let mut archive = zip::ZipArchive::new(file).expect("zip bundle");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    let manifest: serde_json::Value = serde_json::from_str(&manifest).expect("manifest json");
    assert_eq!(manifest["format"], "lessond-deck-v1");
    assert_eq!(manifest["slideCount"], 8);
    assert!(archive.by_name("slides/08.md").is_ok());

    let listed = session_ok(
        &mut stdin,
        &mut reader,
        "2",
        "presentations.list",
        json!({ "lessonId": lesson_id }),
        Some(token.as_str()),
    );
    assert_eq!(listed["presentations"].as_array().map(|a| a.len()), Some(1));
    let foreign_list = request_as(
        &mut stdin,
        &mut reader,
        "3",
        "presentations.list",
        json!({ "lessonId": lesson_id }),
        Some(other.as_str()),
    );
    assert_eq!(error_code(&foreign_list), "not_found");

    let download = session_ok(
        &mut stdin,
        &mut reader,
        "4",
        "presentations.download",
        json!({ "presentationId": presentation_id }),
        Some(token.as_str()),
    );
    assert_eq!(download["path"].as_str(), Some(path.as_str()));
    assert_eq!(download["downloadName"], "Lesson_Water_cycle.zip");
    let foreign = request_as(
        &mut stdin,
        &mut reader,
        "5",
        "presentations.download",
        json!({ "presentationId": presentation_id }),
        Some(other.as_str()),
    );
    assert_eq!(error_code(&foreign), "not_found");

    std::fs::remove_file(&path).expect("remove bundle");
    let missing = request_as(
        &mut stdin,
        &mut reader,
        "6",
        "presentations.download",
        json!({ "presentationId": presentation_id }),
        Some(token.as_str()),
    );
    assert_eq!(error_code(&missing), "file_missing");
}

#[test]
fn deck_options_come_from_export_settings() {
    let workspace = temp_dir("lessond-presentations-settings");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);
    let (_aid, admin) =
        register_and_login(&mut stdin, &mut reader, "Admin", test_support::ADMIN_EMAIL);
    let lesson_id = create_lesson(&mut stdin, &mut reader, &admin, "Volcanoes", "English");

    let _ = session_ok(
        &mut stdin,
        &mut reader,
        "1",
        "setup.update",
        json!({ "section": "export", "patch": { "includeSummarySlide": false } }),
        Some(admin.as_str()),
    );
    let created = session_ok(
        &mut stdin,
        &mut reader,
        "2",
        "presentations.create",
        json!({ "lessonId": lesson_id }),
        Some(admin.as_str()),
    );
    assert_eq!(created["presentation"]["slideCount"], 7);
}

#[test]
fn document_export_and_lesson_delete_cleanup() {
    let workspace = temp_dir("lessond-documents");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);
    let (_uid, token) = register_and_login(&mut stdin, &mut reader, "Dia", "dia@school.test");
    let en = create_lesson(&mut stdin, &mut reader, &token, "Simple machines", "English");
    let ar = create_lesson(&mut stdin, &mut reader, &token, "الطاقة", "Arabic");

    let doc = session_ok(
        &mut stdin,
        &mut reader,
        "1",
        "lessons.exportDocument",
        json!({ "lessonId": en }),
        Some(token.as_str()),
    );
    assert_eq!(doc["downloadName"], "Simple machines.html");
    assert_eq!(doc["contentType"], "text/html");
    let doc_path = doc["path"].as_str().expect("path").to_string();
    let html = std::fs::read_to_string(&doc_path).expect("html");
    assert!(html.contains("dir=\"ltr\""));
    assert!(html.contains("<h1>Lesson Plan: Simple machines</h1>"));
    assert!(html.contains("<h2>Objectives</h2>"));

    let doc_ar = session_ok(
        &mut stdin,
        &mut reader,
        "2",
        "lessons.exportDocument",
        json!({ "lessonId": ar }),
        Some(token.as_str()),
    );
    let doc_ar_path = doc_ar["path"].as_str().expect("path").to_string();
    let html_ar = std::fs::read_to_string(&doc_ar_path).expect("html");
    assert!(html_ar.contains("dir=\"rtl\""));

    let deck = session_ok(
        &mut stdin,
        &mut reader,
        "3",
        "presentations.create",
        json!({ "lessonId": en }),
        Some(token.as_str()),
    );
    let deck_path = deck["presentation"]["filePath"]
        .as_str()
        .expect("path")
        .to_string();
    assert!(std::path::Path::new(&deck_path).is_file());

    let _ = session_ok(
        &mut stdin,
        &mut reader,
        "4",
        "lessons.delete",
        json!({ "lessonId": en }),
        Some(token.as_str()),
    );
    assert!(!std::path::Path::new(&deck_path).exists());
    assert!(!std::path::Path::new(&doc_path).exists());
    assert!(std::path::Path::new(&doc_ar_path).is_file());

    let gone = request_as(
        &mut stdin,
        &mut reader,
        "5",
        "lessons.exportDocument",
        json!({ "lessonId": en }),
        Some(token.as_str()),
    );
    assert_eq!(error_code(&gone), "not_found");

    let _ = session_ok(
        &mut stdin,
        &mut reader,
        "6",
        "user.delete",
        json!({}),
        Some(token.as_str()),
    );
    assert!(!std::path::Path::new(&doc_ar_path).exists());
}
