// Conversion of the analysis into a Markdown outline and a standalone HTML
// mindmap page (rendered client-side by markmap).

use std::path::{Path, PathBuf};

use minijinja::{context, Environment, Value};
use thiserror::Error;
use tracing::info;

use crate::llm::analysis::{Analysis, MergedIdea};

const TEMPLATE_NAME: &str = "mindmap.html";
const TEMPLATE: &str = include_str!("../templates/mindmap.html");

/// Opening tag of the block that carries the Markdown source.
const MARKDOWN_BLOCK_OPEN: &str = "<script type=\"text/template\">";
const MARKDOWN_BLOCK_CLOSE: &str = "</script>";

#[derive(Debug, Error)]
pub enum MindmapError {
    #[error("failed to render mindmap template: {0}")]
    Template(#[from] minijinja::Error),

    #[error("failed to write mindmap to {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Markdown
// ---------------------------------------------------------------------------

/// Hierarchical Markdown for markmap: topic as root, categories as branches,
/// ideas as leaves with author and note children.
pub fn analysis_to_markdown(topic: &str, analysis: &Analysis) -> String {
    let mut lines = vec![format!("# {topic}"), String::new()];

    for category in &analysis.categories {
        lines.push(format!("## {}", category.name));
        if let Some(description) = non_empty(&category.description) {
            lines.push(format!("  - *{description}*"));
        }
        for idea in &category.ideas {
            push_idea(&mut lines, idea, true);
        }
        lines.push(String::new());
    }

    if !analysis.uncategorised.is_empty() {
        lines.push("## Uncategorised".to_string());
        for idea in &analysis.uncategorised {
            push_idea(&mut lines, idea, false);
        }
        lines.push(String::new());
    }

    if !analysis.dependencies.is_empty() {
        lines.push("## Dependencies".to_string());
        for dep in &analysis.dependencies {
            lines.push(format!("  - {} \u{2192} {}", dep.from, dep.to));
            if let Some(relationship) = non_empty(&dep.relationship) {
                lines.push(format!("    - *{relationship}*"));
            }
        }
        lines.push(String::new());
    }

    lines.join("\n")
}

fn push_idea(lines: &mut Vec<String>, idea: &MergedIdea, with_note: bool) {
    lines.push(format!("  - {}", idea.text));
    if !idea.authors.is_empty() {
        lines.push(format!("    - by: {}", idea.authors.join(", ")));
    }
    if with_note {
        if let Some(note) = non_empty(&idea.note) {
            lines.push(format!("    - *{note}*"));
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// HTML
// ---------------------------------------------------------------------------

/// Render the standalone page. Text fields are HTML-escaped; the Markdown is
/// embedded raw inside its script block via `escape_script_text`.
pub fn render_html(topic: &str, analysis: &Analysis) -> Result<String, MindmapError> {
    let mut env = Environment::new();
    env.add_template(TEMPLATE_NAME, TEMPLATE)?;
    let template = env.get_template(TEMPLATE_NAME)?;

    let markdown = escape_script_text(&analysis_to_markdown(topic, analysis));

    let html = template.render(context! {
        title => format!("Mindmap: {topic}"),
        markdown => Value::from_safe_string(markdown),
        summary => analysis.summary(),
        idea_count => analysis.idea_count(),
        category_count => analysis.category_count(),
    })?;
    Ok(html)
}

/// Put a backslash after every `<` that precedes `/` or `\`, so `</` never
/// occurs inside the script block. Markdown reads `\/` as `/`, and
/// [`unescape_script_text`] reverses it exactly.
fn escape_script_text(markdown: &str) -> String {
    let mut out = String::with_capacity(markdown.len());
    let mut chars = markdown.chars().peekable();
    while let Some(c) = chars.next() {
        out.push(c);
        if c == '<' && matches!(chars.peek(), Some('/' | '\\')) {
            out.push('\\');
        }
    }
    out
}

fn unescape_script_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        out.push(c);
        if c == '<' && chars.peek() == Some(&'\\') {
            chars.next();
        }
    }
    out
}

/// Render and write `{output_dir}/{session_id}.html`. Returns the file path.
pub fn render_mindmap_html(
    session_id: &str,
    topic: &str,
    analysis: &Analysis,
    output_dir: &Path,
) -> Result<PathBuf, MindmapError> {
    let html = render_html(topic, analysis)?;

    std::fs::create_dir_all(output_dir).map_err(|source| MindmapError::Io {
        path: output_dir.to_path_buf(),
        source,
    })?;
    let path = output_dir.join(format!("{session_id}.html"));
    std::fs::write(&path, html).map_err(|source| MindmapError::Io {
        path: path.clone(),
        source,
    })?;

    info!(
        "Wrote mindmap for session {} ({} ideas, {} categories) to {}",
        session_id,
        analysis.idea_count(),
        analysis.category_count(),
        path.display()
    );
    Ok(path)
}

/// Recover the Markdown outline from a rendered page, for previews.
/// Returns an empty string when the page has no Markdown block.
pub fn extract_markdown_preview(html: &str) -> String {
    let Some(start) = html.find(MARKDOWN_BLOCK_OPEN) else {
        return String::new();
    };
    let body = &html[start + MARKDOWN_BLOCK_OPEN.len()..];
    let end = body.find(MARKDOWN_BLOCK_CLOSE).unwrap_or(body.len());
    unescape_script_text(body[..end].trim())
}

/// Read a written mindmap and extract its preview. Missing or unreadable
/// files yield an empty preview.
pub fn read_markdown_preview(path: &Path) -> String {
    std::fs::read_to_string(path)
        .map(|html| extract_markdown_preview(&html))
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
