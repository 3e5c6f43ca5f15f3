//! Plan text to slide deck / document conversion.
//!
//! Plans are loose markdown: `#`..`######` headings, `-`, `*` or `•` bullets,
//! `**bold**` spans and `---` page breaks. Everything else is a paragraph.

use serde::Serialize;
use serde_json::json;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::generator::{self, humanize_code, Language};

pub const DECK_FORMAT_V1: &str = "lessond-deck-v1";
pub const DECK_CONTENT_TYPE: &str = "application/zip";
pub const DOCUMENT_CONTENT_TYPE: &str = "text/html";

const MANIFEST_ENTRY: &str = "manifest.json";
const DECK_ENTRY: &str = "deck.json";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ExportError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Run {
    pub text: String,
    pub bold: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Block {
    Heading { level: u8, text: String },
    Bullet { runs: Vec<Run> },
    Paragraph { runs: Vec<Run> },
    PageBreak,
}

/// Splits `**bold**` spans. An unmatched `**` is kept as literal text.
pub fn parse_runs(line: &str) -> Vec<Run> {
    let parts: Vec<&str> = line.split("**").collect();
    let balanced = parts.len() % 2 == 1;
    let mut out: Vec<Run> = Vec::new();
    for (i, part) in parts.iter().enumerate() {
        let is_last = i + 1 == parts.len();
        let (text, bold) = if i % 2 == 1 && !(is_last && !balanced) {
            (part.to_string(), true)
        } else if i % 2 == 1 {
            (format!("**{}", part), false)
        } else {
            (part.to_string(), false)
        };
        if text.is_empty() {
            continue;
        }
        match out.last_mut() {
            Some(prev) if prev.bold == bold => prev.text.push_str(&text),
            _ => out.push(Run { text, bold }),
        }
    }
    out
}

pub fn plain_text(runs: &[Run]) -> String {
    runs.iter().map(|r| r.text.as_str()).collect()
}

fn heading_level(line: &str) -> Option<(u8, &str)> {
    let hashes = line.bytes().take_while(|b| *b == b'#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.is_empty() && !rest.starts_with(' ') {
        return None;
    }
    Some((hashes as u8, rest.trim()))
}

fn bullet_body(line: &str) -> Option<&str> {
    if let Some(rest) = line.strip_prefix('•') {
        return Some(rest.trim());
    }
    ["- ", "* "]
        .iter()
        .find_map(|m| line.strip_prefix(m))
        .map(str::trim)
}

fn is_page_break(line: &str) -> bool {
    line.len() >= 3 && line.bytes().all(|b| b == b'-')
}

pub fn parse_plan(text: &str) -> Vec<Block> {
    let mut out = Vec::new();
    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if is_page_break(line) {
            out.push(Block::PageBreak);
        } else if let Some((level, body)) = heading_level(line) {
            out.push(Block::Heading {
                level,
                text: plain_text(&parse_runs(body)),
            });
        } else if let Some(body) = bullet_body(line) {
            if !body.is_empty() {
                out.push(Block::Bullet {
                    runs: parse_runs(body),
                });
            }
        } else {
            out.push(Block::Paragraph {
                runs: parse_runs(line),
            });
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct LessonMeta {
    pub topic: String,
    pub grade_level: String,
    pub teaching_strategy: String,
    pub language: Language,
}

#[derive(Debug, Clone, Copy)]
pub struct DeckOptions {
    pub include_summary_slide: bool,
    pub max_bullets_per_slide: usize,
}

impl Default for DeckOptions {
    fn default() -> Self {
        Self {
            include_summary_slide: true,
            max_bullets_per_slide: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SlideKind {
    Title,
    Content,
    Summary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Slide {
    pub kind: SlideKind,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    pub items: Vec<Vec<Run>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Deck {
    pub title: String,
    pub language: Language,
    pub slides: Vec<Slide>,
}

struct SectionLabels {
    overview: &'static str,
    summary: &'static str,
    continued: &'static str,
    fallback_title: &'static str,
    grade: &'static str,
    topic: &'static str,
    strategy: &'static str,
}

fn labels(language: Language) -> SectionLabels {
    match language {
        Language::English => SectionLabels {
            overview: "Overview",
            summary: "Summary",
            continued: "(cont.)",
            fallback_title: "Lesson Plan",
            grade: "Grade",
            topic: "Topic",
            strategy: "Strategy",
        },
        Language::Arabic => SectionLabels {
            overview: "نظرة عامة",
            summary: "الملخص",
            continued: "(تابع)",
            fallback_title: "خطة الدرس",
            grade: "الصف",
            topic: "الموضوع",
            strategy: "الاستراتيجية",
        },
    }
}

struct Section {
    title: String,
    items: Vec<Vec<Run>>,
    // A `---` inside a section forces a slide boundary at this item index.
    breaks: Vec<usize>,
}

fn push_section_slides(
    slides: &mut Vec<Slide>,
    section: Section,
    max_items: usize,
    continued: &str,
) {
    let max_items = max_items.max(1);
    let mut chunks: Vec<&[Vec<Run>]> = Vec::new();
    let mut start = 0;
    let mut bounds = section.breaks.clone();
    bounds.push(section.items.len());
    for end in bounds {
        let mut segment = &section.items[start..end];
        while segment.len() > max_items {
            let (head, tail) = segment.split_at(max_items);
            chunks.push(head);
            segment = tail;
        }
        if !segment.is_empty() {
            chunks.push(segment);
        }
        start = end;
    }
    if chunks.is_empty() {
        slides.push(Slide {
            kind: SlideKind::Content,
            title: section.title,
            subtitle: None,
            items: Vec::new(),
        });
        return;
    }
    for (i, chunk) in chunks.into_iter().enumerate() {
        let title = if i == 0 {
            section.title.clone()
        } else {
            format!("{} {}", section.title, continued)
        };
        slides.push(Slide {
            kind: SlideKind::Content,
            title,
            subtitle: None,
            items: chunk.to_vec(),
        });
    }
}

/// Title slide, one slide per `##` section (continued when long) and an
/// optional summary listing the section titles.
pub fn build_deck(meta: &LessonMeta, blocks: &[Block], options: DeckOptions) -> Deck {
    let l = labels(meta.language);
    let title = blocks
        .iter()
        .find_map(|b| match b {
            Block::Heading { level: 1, text } if !text.is_empty() => Some(text.clone()),
            _ => None,
        })
        .unwrap_or_else(|| format!("{}: {}", l.fallback_title, meta.topic));
    let strategy = match (meta.language, generator::strategy(&meta.teaching_strategy)) {
        (Language::Arabic, Some(info)) => info.label_ar.to_string(),
        _ => humanize_code(&meta.teaching_strategy),
    };
    let subtitle = format!(
        "{}: {} | {}: {} | {}: {}",
        l.grade, meta.grade_level, l.topic, meta.topic, l.strategy, strategy
    );

    let mut slides = vec![Slide {
        kind: SlideKind::Title,
        title: title.clone(),
        subtitle: Some(subtitle),
        items: Vec::new(),
    }];

    let mut sections: Vec<Section> = Vec::new();
    let mut current = Section {
        title: l.overview.to_string(),
        items: Vec::new(),
        breaks: Vec::new(),
    };
    for block in blocks {
        match block {
            Block::Heading { level: 1, .. } => {}
            Block::Heading { level: 2, text } => {
                let next = Section {
                    title: text.clone(),
                    items: Vec::new(),
                    breaks: Vec::new(),
                };
                sections.push(std::mem::replace(&mut current, next));
            }
            Block::Heading { text, .. } => current.items.push(vec![Run {
                text: text.clone(),
                bold: true,
            }]),
            Block::Bullet { runs } | Block::Paragraph { runs } => current.items.push(runs.clone()),
            Block::PageBreak => {
                let at = current.items.len();
                if at > 0 && current.breaks.last() != Some(&at) {
                    current.breaks.push(at);
                }
            }
        }
    }
    sections.push(current);

    let mut section_titles = Vec::new();
    for (i, section) in sections.into_iter().enumerate() {
        // Untitled lead-in content only gets a slide when there is some.
        if i == 0 && section.items.is_empty() {
            continue;
        }
        if i > 0 {
            section_titles.push(section.title.clone());
        }
        push_section_slides(
            &mut slides,
            section,
            options.max_bullets_per_slide,
            l.continued,
        );
    }

    if options.include_summary_slide && !section_titles.is_empty() {
        slides.push(Slide {
            kind: SlideKind::Summary,
            title: l.summary.to_string(),
            subtitle: None,
            items: section_titles
                .into_iter()
                .map(|t| vec![Run { text: t, bold: false }])
                .collect(),
        });
    }

    Deck {
        title,
        language: meta.language,
        slides,
    }
}

fn runs_markdown(runs: &[Run]) -> String {
    runs.iter()
        .map(|r| {
            if r.bold {
                format!("**{}**", r.text)
            } else {
                r.text.clone()
            }
        })
        .collect()
}

fn slide_markdown(slide: &Slide) -> String {
    let mut out = format!("# {}\n", slide.title);
    if let Some(sub) = &slide.subtitle {
        out.push_str(&format!("\n{}\n", sub));
    }
    if !slide.items.is_empty() {
        out.push('\n');
        for item in &slide.items {
            out.push_str(&format!("- {}\n", runs_markdown(item)));
        }
    }
    out
}

/// Writes the deck as a zip bundle in `dir` and returns the kept file path.
/// The caller owns cleanup.
pub fn write_deck_bundle(deck: &Deck, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let tmp = tempfile::Builder::new()
        .prefix("lesson_")
        .suffix(".zip")
        .tempfile_in(dir)?;

    {
        let mut zip = ZipWriter::new(tmp.as_file());
        let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

        let manifest = json!({
            "format": DECK_FORMAT_V1,
            "appVersion": env!("CARGO_PKG_VERSION"),
            "title": deck.title,
            "language": deck.language,
            "slideCount": deck.slides.len(),
        });
        zip.start_file(MANIFEST_ENTRY, opts)?;
        zip.write_all(serde_json::to_string_pretty(&manifest)?.as_bytes())?;

        zip.start_file(DECK_ENTRY, opts)?;
        zip.write_all(serde_json::to_string_pretty(deck)?.as_bytes())?;

        for (i, slide) in deck.slides.iter().enumerate() {
            zip.start_file(format!("slides/{:02}.md", i + 1), opts)?;
            zip.write_all(slide_markdown(slide).as_bytes())?;
        }
        zip.finish()?;
    }

    let (_, path) = tmp.keep().map_err(|e| ExportError::Io(e.error))?;
    Ok(path)
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn runs_html(runs: &[Run]) -> String {
    runs.iter()
        .map(|r| {
            if r.bold {
                format!("<strong>{}</strong>", escape_html(&r.text))
            } else {
                escape_html(&r.text)
            }
        })
        .collect()
}

pub fn render_document_html(meta: &LessonMeta, blocks: &[Block]) -> String {
    let (lang, dir) = if meta.language.is_rtl() {
        ("ar", "rtl")
    } else {
        ("en", "ltr")
    };
    let mut body = String::new();
    let mut in_list = false;
    for block in blocks {
        let is_bullet = matches!(block, Block::Bullet { .. });
        if in_list && !is_bullet {
            body.push_str("</ul>\n");
            in_list = false;
        }
        match block {
            Block::Heading { level, text } => {
                body.push_str(&format!("<h{0}>{1}</h{0}>\n", level, escape_html(text)));
            }
            Block::Bullet { runs } => {
                if !in_list {
                    body.push_str("<ul>\n");
                    in_list = true;
                }
                body.push_str(&format!("<li>{}</li>\n", runs_html(runs)));
            }
            Block::Paragraph { runs } => {
                body.push_str(&format!("<p>{}</p>\n", runs_html(runs)));
            }
            Block::PageBreak => body.push_str("<hr class=\"page-break\">\n"),
        }
    }
    if in_list {
        body.push_str("</ul>\n");
    }

    format!(
        "<!DOCTYPE html>\n<html lang=\"{lang}\" dir=\"{dir}\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>{title}</title>\n<style>\nbody {{ font-family: sans-serif; max-width: 50em; margin: 2em auto; }}\n\
         hr.page-break {{ page-break-after: always; border: 0; }}\n</style>\n</head>\n<body>\n{body}</body>\n</html>\n",
        title = escape_html(&meta.topic),
    )
}

pub fn write_document(meta: &LessonMeta, blocks: &[Block], dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::Builder::new()
        .prefix("lesson_")
        .suffix(".html")
        .tempfile_in(dir)?;
    tmp.write_all(render_document_html(meta, blocks).as_bytes())?;
    tmp.flush()?;
    let (_, path) = tmp.keep().map_err(|e| ExportError::Io(e.error))?;
    Ok(path)
}

fn sanitize_file_stem(topic: &str) -> String {
    let cleaned: String = topic
        .trim()
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .filter(|c| !c.is_control())
        .collect();
    if cleaned.trim().is_empty() {
        "lesson".to_string()
    } else {
        cleaned
    }
}

/// `Lesson_{topic}` with whitespace turned into underscores.
pub fn deck_download_name(topic: &str) -> String {
    let stem = sanitize_file_stem(topic)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_");
    format!("Lesson_{}.zip", stem)
}

pub fn document_download_name(topic: &str) -> String {
    format!("{}.html", sanitize_file_stem(topic))
}
