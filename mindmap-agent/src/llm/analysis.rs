// Structured result of the idea analysis and parsing of the raw model reply.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("model returned an empty response")]
    EmptyResponse,

    #[error("model response was cut off at the token limit")]
    Truncated,

    #[error("model response is not valid analysis JSON: {source}")]
    InvalidJson {
        #[from]
        source: serde_json::Error,
    },
}

/// Deduplicated, categorised view of a session's ideas.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default, alias = "uncategorized")]
    pub uncategorised: Vec<MergedIdea>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub ideas: Vec<MergedIdea>,
}

/// One idea after merging duplicates; credits every contributing author.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedIdea {
    pub text: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_count: Option<u32>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub relationship: Option<String>,
}

impl Analysis {
    /// Ideas across all categories plus uncategorised ones.
    pub fn idea_count(&self) -> usize {
        self.categories.iter().map(|c| c.ideas.len()).sum::<usize>() + self.uncategorised.len()
    }

    pub fn category_count(&self) -> usize {
        self.categories.len()
    }

    pub fn summary(&self) -> &str {
        self.summary.as_deref().unwrap_or("")
    }
}

/// Parse the model's reply into an [`Analysis`], tolerating a surrounding
/// markdown code fence.
pub fn parse_analysis(text: &str) -> Result<Analysis, AnalysisError> {
    let body = strip_code_fence(text);
    if body.is_empty() {
        return Err(AnalysisError::EmptyResponse);
    }
    Ok(serde_json::from_str(body)?)
}

/// Remove a leading ```` ```lang ```` line and a trailing ```` ``` ````.
pub fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the rest of the opening fence line (language tag).
    let rest = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => "",
    };
    let rest = rest.trim_end();
    match rest.rfind("```") {
        Some(idx) if rest[idx..].trim() == "```" => rest[..idx].trim(),
        _ => rest.trim(),
    }
}
