// Prompt templates for brainstorming analysis.
//
// The model is asked to deduplicate, categorise, and relate the submitted
// ideas and to reply with a single JSON object in a fixed schema (see
// `llm::analysis`).

use crate::session::Idea;

/// Return the static system prompt for analysis calls.
pub fn system_prompt() -> String {
    "You are a facilitator who organises the raw output of brainstorming sessions. \
     You are precise, you never invent ideas that were not submitted, and you reply \
     with machine-readable JSON only."
        .to_string()
}

/// JSON skeleton the model must follow. Kept in sync with `Analysis`.
const SCHEMA: &str = r#"{
  "summary": "A brief 1-2 sentence summary of the brainstorming session",
  "categories": [
    {
      "name": "Category Name",
      "description": "Brief description of this category",
      "ideas": [
        {
          "text": "The deduplicated/merged idea text",
          "authors": ["author1", "author2"],
          "original_count": 2,
          "note": "Optional note about merging or context"
        }
      ]
    }
  ],
  "dependencies": [
    {
      "from": "Idea or category that depends on another",
      "to": "Idea or category it depends on",
      "relationship": "Brief description of the dependency"
    }
  ],
  "uncategorised": [
    {
      "text": "Ideas that don't fit any category",
      "authors": ["author"],
      "note": "Why it doesn't fit"
    }
  ]
}"#;

/// Build the user prompt listing every idea with its author.
pub fn build_analysis_prompt(topic: &str, ideas: &[Idea]) -> String {
    let ideas_text = format_ideas(ideas);

    format!(
        "You are analysing ideas from a brainstorming session.\n\
         \n\
         Topic: \"{topic}\"\n\
         \n\
         Ideas submitted by participants:\n\
         {ideas_text}\n\
         \n\
         Analyse these ideas and return a JSON object with this exact structure:\n\
         {SCHEMA}\n\
         \n\
         Rules:\n\
         - Merge duplicate or very similar ideas, crediting all authors\n\
         - Create meaningful categories that group related ideas\n\
         - Identify dependencies between ideas or categories\n\
         - Keep the original meaning of ideas intact\n\
         - If ideas conflict, note the conflict rather than dropping either idea\n\
         - Return ONLY valid JSON, no markdown fences or extra text"
    )
}

/// One `- "text" (by author)` line per idea, in submission order.
pub fn format_ideas(ideas: &[Idea]) -> String {
    ideas
        .iter()
        .map(|idea| format!("- \"{}\" (by {})", idea.text, idea.author))
        .collect::<Vec<_>>()
        .join("\n")
}
