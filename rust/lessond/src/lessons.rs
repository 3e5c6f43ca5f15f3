//! Lesson and presentation records, owner-scoped.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::generator::{prompt_text, PlanGenerator, PlanRequest};
use crate::ledger::{self, LedgerError, TokenTransaction};

pub const LESSON_CREATE_REASON: &str = "lesson_create";
pub const LESSON_REFUND_REASON: &str = "lesson_create_refund";
const LESSON_SOURCE: &str = "lesson_generation";

#[derive(Debug, Error)]
pub enum LessonError {
    #[error("lesson not found: {0}")]
    NotFound(String),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, LessonError>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: String,
    pub user_id: String,
    pub grade_level: String,
    pub topic: String,
    pub teaching_strategy: String,
    pub language: String,
    pub generated_plan: String,
    pub gpt_plan: String,
    pub date_created: String,
    pub date_modified: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonSummary {
    pub id: String,
    pub grade_level: String,
    pub topic: String,
    pub teaching_strategy: String,
    pub language: String,
    pub date_created: String,
    pub date_modified: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Presentation {
    pub id: String,
    pub lesson_id: String,
    pub file_path: String,
    pub slide_count: i64,
    pub date_created: String,
}

fn lesson_from_row(r: &Row<'_>) -> rusqlite::Result<Lesson> {
    Ok(Lesson {
        id: r.get(0)?,
        user_id: r.get(1)?,
        grade_level: r.get(2)?,
        topic: r.get(3)?,
        teaching_strategy: r.get(4)?,
        language: r.get(5)?,
        generated_plan: r.get(6)?,
        gpt_plan: r.get(7)?,
        date_created: r.get(8)?,
        date_modified: r.get(9)?,
    })
}

fn presentation_from_row(r: &Row<'_>) -> rusqlite::Result<Presentation> {
    Ok(Presentation {
        id: r.get(0)?,
        lesson_id: r.get(1)?,
        file_path: r.get(2)?,
        slide_count: r.get(3)?,
        date_created: r.get(4)?,
    })
}

const LESSON_COLUMNS: &str = "id, user_id, grade_level, topic, teaching_strategy, language, \
                              generated_plan, gpt_plan, date_created, date_modified";

/// Charges `cost` tokens, generates the plan and stores the lesson. The
/// charge is refunded when generation or the insert fails.
pub fn create_lesson(
    conn: &Connection,
    generator: &dyn PlanGenerator,
    user_id: &str,
    req: &PlanRequest,
    cost: i64,
    now: DateTime<Utc>,
) -> Result<(Lesson, TokenTransaction)> {
    let charge = ledger::deduct(conn, user_id, cost, LESSON_CREATE_REASON, LESSON_SOURCE, now)?;

    let plan = match generator.generate(req) {
        Ok(p) => p,
        Err(e) => {
            warn!(user_id, generator = generator.name(), error = %e, "plan generation failed");
            refund(conn, user_id, cost, now);
            return Err(LessonError::Generation(e.to_string()));
        }
    };

    let lesson = Lesson {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        grade_level: req.grade_level.clone(),
        topic: req.topic.clone(),
        teaching_strategy: req.teaching_strategy.clone(),
        language: req.language.as_str().to_string(),
        generated_plan: plan,
        gpt_plan: prompt_text(req),
        date_created: ledger::timestamp(now),
        date_modified: ledger::timestamp(now),
    };
    let inserted = conn.execute(
        "INSERT INTO lessons(id, user_id, grade_level, topic, teaching_strategy, language,
                             generated_plan, gpt_plan, date_created, date_modified)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            lesson.id,
            lesson.user_id,
            lesson.grade_level,
            lesson.topic,
            lesson.teaching_strategy,
            lesson.language,
            lesson.generated_plan,
            lesson.gpt_plan,
            lesson.date_created,
            lesson.date_modified
        ],
    );
    if let Err(e) = inserted {
        warn!(user_id, error = %e, "lesson insert failed");
        refund(conn, user_id, cost, now);
        return Err(LessonError::Db(e));
    }

    info!(user_id, lesson_id = %lesson.id, topic = %lesson.topic, "lesson created");
    Ok((lesson, charge))
}

fn refund(conn: &Connection, user_id: &str, cost: i64, now: DateTime<Utc>) {
    if let Err(e) = ledger::add(conn, user_id, cost, LESSON_REFUND_REASON, LESSON_SOURCE, now) {
        // The debit stays in the log; an admin can reconcile from it.
        warn!(user_id, cost, error = %e, "lesson cost refund failed");
    }
}

/// Newest first.
pub fn list_lessons(conn: &Connection, user_id: &str) -> Result<Vec<LessonSummary>> {
    let mut stmt = conn.prepare(
        "SELECT id, grade_level, topic, teaching_strategy, language, date_created, date_modified
         FROM lessons WHERE user_id = ?
         ORDER BY date_created DESC, rowid DESC",
    )?;
    let rows = stmt
        .query_map([user_id], |r| {
            Ok(LessonSummary {
                id: r.get(0)?,
                grade_level: r.get(1)?,
                topic: r.get(2)?,
                teaching_strategy: r.get(3)?,
                language: r.get(4)?,
                date_created: r.get(5)?,
                date_modified: r.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Lessons owned by someone else read as missing.
pub fn get_lesson(conn: &Connection, user_id: &str, lesson_id: &str) -> Result<Lesson> {
    let sql = format!("SELECT {LESSON_COLUMNS} FROM lessons WHERE id = ? AND user_id = ?");
    conn.query_row(&sql, params![lesson_id, user_id], lesson_from_row)
        .optional()?
        .ok_or_else(|| LessonError::NotFound(lesson_id.to_string()))
}

/// Only the two plan texts are editable.
pub fn update_lesson(
    conn: &Connection,
    user_id: &str,
    lesson_id: &str,
    generated_plan: Option<&str>,
    gpt_plan: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Lesson> {
    let changed = conn.execute(
        "UPDATE lessons
         SET generated_plan = COALESCE(?1, generated_plan),
             gpt_plan = COALESCE(?2, gpt_plan),
             date_modified = ?3
         WHERE id = ?4 AND user_id = ?5",
        params![generated_plan, gpt_plan, ledger::timestamp(now), lesson_id, user_id],
    )?;
    if changed == 0 {
        return Err(LessonError::NotFound(lesson_id.to_string()));
    }
    get_lesson(conn, user_id, lesson_id)
}

/// Returns the exported file paths (decks and documents) removed with the lesson.
pub fn delete_lesson(conn: &Connection, user_id: &str, lesson_id: &str) -> Result<Vec<String>> {
    let tx = conn.unchecked_transaction()?;
    let owned: Option<String> = tx
        .query_row(
            "SELECT id FROM lessons WHERE id = ? AND user_id = ?",
            params![lesson_id, user_id],
            |r| r.get(0),
        )
        .optional()?;
    if owned.is_none() {
        return Err(LessonError::NotFound(lesson_id.to_string()));
    }
    let paths = {
        let mut stmt = tx.prepare(
            "SELECT file_path FROM presentations WHERE lesson_id = ?1
             UNION ALL
             SELECT file_path FROM document_exports WHERE lesson_id = ?1",
        )?;
        let paths = stmt
            .query_map([lesson_id], |r| r.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        paths
    };
    tx.execute("DELETE FROM presentations WHERE lesson_id = ?", [lesson_id])?;
    tx.execute("DELETE FROM document_exports WHERE lesson_id = ?", [lesson_id])?;
    tx.execute("DELETE FROM lessons WHERE id = ?", [lesson_id])?;
    tx.commit()?;
    info!(user_id, lesson_id, "lesson deleted");
    Ok(paths)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardCounts {
    pub lesson_count: i64,
    pub presentation_count: i64,
    pub recent_lessons: Vec<LessonSummary>,
}

pub fn dashboard_counts(
    conn: &Connection,
    user_id: &str,
    recent: usize,
) -> Result<DashboardCounts> {
    let lesson_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM lessons WHERE user_id = ?",
        [user_id],
        |r| r.get(0),
    )?;
    let presentation_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM presentations p JOIN lessons l ON l.id = p.lesson_id
         WHERE l.user_id = ?",
        [user_id],
        |r| r.get(0),
    )?;
    let mut recent_lessons = list_lessons(conn, user_id)?;
    recent_lessons.truncate(recent);
    Ok(DashboardCounts {
        lesson_count,
        presentation_count,
        recent_lessons,
    })
}

pub fn insert_presentation(
    conn: &Connection,
    lesson_id: &str,
    file_path: &str,
    slide_count: i64,
    now: DateTime<Utc>,
) -> Result<Presentation> {
    let p = Presentation {
        id: Uuid::new_v4().to_string(),
        lesson_id: lesson_id.to_string(),
        file_path: file_path.to_string(),
        slide_count,
        date_created: ledger::timestamp(now),
    };
    conn.execute(
        "INSERT INTO presentations(id, lesson_id, file_path, slide_count, date_created)
         VALUES(?, ?, ?, ?, ?)",
        params![p.id, p.lesson_id, p.file_path, p.slide_count, p.date_created],
    )?;
    Ok(p)
}

/// Tracks an HTML export so it is removed along with its lesson.
pub fn record_document_export(
    conn: &Connection,
    lesson_id: &str,
    file_path: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO document_exports(id, lesson_id, file_path, date_created)
         VALUES(?, ?, ?, ?)",
        params![
            Uuid::new_v4().to_string(),
            lesson_id,
            file_path,
            ledger::timestamp(now)
        ],
    )?;
    Ok(())
}

pub fn list_presentations(
    conn: &Connection,
    user_id: &str,
    lesson_id: &str,
) -> Result<Vec<Presentation>> {
    // Ownership check first so foreign lessons read as missing, not empty.
    get_lesson(conn, user_id, lesson_id)?;
    let mut stmt = conn.prepare(
        "SELECT id, lesson_id, file_path, slide_count, date_created
         FROM presentations WHERE lesson_id = ?
         ORDER BY date_created DESC, rowid DESC",
    )?;
    let rows = stmt
        .query_map([lesson_id], presentation_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Looks up a presentation through its lesson's owner. Returns the
/// presentation and the lesson topic.
pub fn find_presentation(
    conn: &Connection,
    user_id: &str,
    presentation_id: &str,
) -> Result<(Presentation, String)> {
    conn.query_row(
        "SELECT p.id, p.lesson_id, p.file_path, p.slide_count, p.date_created, l.topic
         FROM presentations p JOIN lessons l ON l.id = p.lesson_id
         WHERE p.id = ? AND l.user_id = ?",
        params![presentation_id, user_id],
        |r| Ok((presentation_from_row(r)?, r.get::<_, String>(5)?)),
    )
    .optional()?
    .ok_or_else(|| LessonError::NotFound(presentation_id.to_string()))
}
