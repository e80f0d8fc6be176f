//! Prompt text for each summarization stage.
//!
//! Every stage sends a single system message with the document text inlined.
//! The response shape is enforced separately through the JSON Schema of the
//! target type, so the prompts only describe the content.

use crate::Message;

const EXTRACT_PROMPT: &str = "\
Extract the following from the document below:

1. named_entities: important people, organizations, systems and projects (at most 10)
2. numbers: important figures, statistics, budgets and deadlines (at most 10)
3. todos: action items and decisions (at most 10)

Return an empty array for any category with nothing to report.

Document:
";

const MINI_SUMMARY_PROMPT: &str = "\
Analyse the document below in detail and summarize it as a list of sections.

For each meaningful part of the document, add an entry to `sections` with:
- title: a short section title (e.g. \"Agenda\", \"Decisions\", \"Issues\", \"Background\")
- content: the concrete content of that section

Rules:
- Reflect the structure and content of the document accurately.
- Always keep decisions, agenda items and issues in separate sections.
- Keep specific, detailed information.

Document:
";

const DEEP_ANALYSIS_PROMPT: &str = "\
Analyse the opening of this meeting document and extract its purpose, background \
and key decisions. Use exactly these section titles in `sections`:
- \"Purpose\": why the meeting was held
- \"Background\": what led up to the meeting
- \"Key decisions\": the important decisions made
- \"Next steps\": the direction and follow-up actions

Be specific and detailed in every section.

Opening of the document:
";

const SYNTHESIS_PROMPT: &str = "\
Combine the information below into a comprehensive summary of the meeting:

- summary: a concise 3-4 sentence overview of the whole meeting
- main_arguments: the 5-8 main points discussed, stated concretely
- discussion_flow: how the discussion progressed over time, as one paragraph \
  (\"First ... was discussed, then ... was considered, and finally ... was confirmed\")
- action_items: concrete action items (at most 5)
- open_issues: unresolved problems and open questions (at most 5)
- named_entities: important people, organizations and systems (at most 10)
- tags: 3-5 tags that characterize the meeting

Avoid repeating the same point across fields. Include only specific, useful information.
";

/// Fact extraction for one batch.
pub fn extract(text: &str) -> Vec<Message> {
    vec![Message::system(format!("{EXTRACT_PROMPT}{text}"))]
}

/// Sectioned mini-summary for one batch.
pub fn mini_summary(text: &str) -> Vec<Message> {
    vec![Message::system(format!("{MINI_SUMMARY_PROMPT}{text}"))]
}

/// Purpose / background / decisions / next steps from the document's opening.
pub fn deep_analysis(opening: &str) -> Vec<Message> {
    vec![Message::system(format!("{DEEP_ANALYSIS_PROMPT}{opening}"))]
}

/// Final synthesis from the reduced outline plus a raw sample of the text.
pub fn synthesis(outline: &str, sample: &str) -> Vec<Message> {
    vec![Message::system(format!(
        "{SYNTHESIS_PROMPT}\n=== OUTLINE ===\n{outline}\n\n=== SOURCE SAMPLE ===\n{sample}"
    ))]
}
