//! Reduction of per-batch results into one outline.

use std::collections::{HashMap, HashSet};

use super::schema::{ExtractionResult, MiniSummary};

/// Caps applied when merging extracted facts across batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FactLimits {
    pub entities: usize,
    pub numbers: usize,
    pub todos: usize,
}

impl Default for FactLimits {
    fn default() -> Self {
        Self {
            entities: 20,
            numbers: 15,
            todos: 15,
        }
    }
}

/// Remove exact duplicates, keeping first occurrences in order, and keep at
/// most `cap` items.
pub fn dedup_preserving_order<I>(items: I, cap: usize) -> Vec<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in items {
        if out.len() == cap {
            break;
        }
        let item = item.as_ref();
        if seen.insert(item.to_string()) {
            out.push(item.to_string());
        }
    }
    out
}

/// Mini-summary bodies grouped by section title, in first-seen title order.
///
/// Titles are trimmed and compared case-sensitively; bodies are trimmed.
#[derive(Debug, Default, Clone)]
pub struct SectionBucket {
    order: Vec<String>,
    bodies: HashMap<String, Vec<String>>,
}

impl SectionBucket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, title: &str, content: &str) {
        let title = title.trim();
        if !self.bodies.contains_key(title) {
            self.order.push(title.to_string());
        }
        self.bodies
            .entry(title.to_string())
            .or_default()
            .push(content.trim().to_string());
    }

    /// Add every section of every mini-summary, in order.
    pub fn extend<'a>(&mut self, summaries: impl IntoIterator<Item = &'a MiniSummary>) {
        for summary in summaries {
            for section in &summary.sections {
                self.add(&section.title, &section.content);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Sections in first-seen order.
    pub fn sections(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.order.iter().map(|title| {
            let bodies = self.bodies.get(title).map_or(&[][..], |b| b.as_slice());
            (title.as_str(), bodies)
        })
    }

    /// `### title` headings, each followed by its bodies one per line.
    pub fn render(&self) -> String {
        self.sections()
            .map(|(title, bodies)| format!("### {title}\n{}", bodies.join("\n")))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Extracted facts merged across all batches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedFacts {
    pub entities: Vec<String>,
    pub numbers: Vec<String>,
    pub todos: Vec<String>,
}

impl ExtractedFacts {
    pub fn merge(extractions: &[ExtractionResult], limits: FactLimits) -> Self {
        Self {
            entities: dedup_preserving_order(
                extractions.iter().flat_map(|e| &e.named_entities),
                limits.entities,
            ),
            numbers: dedup_preserving_order(
                extractions.iter().flat_map(|e| &e.numbers),
                limits.numbers,
            ),
            todos: dedup_preserving_order(
                extractions.iter().flat_map(|e| &e.todos),
                limits.todos,
            ),
        }
    }
}

/// The reduced view of a document handed to the synthesis call.
#[derive(Debug, Clone, Default)]
pub struct Outline {
    pub sections: SectionBucket,
    pub facts: ExtractedFacts,
}

impl Outline {
    pub fn build(
        summaries: &[MiniSummary],
        extractions: &[ExtractionResult],
        limits: FactLimits,
    ) -> Self {
        let mut sections = SectionBucket::new();
        sections.extend(summaries);
        Self {
            sections,
            facts: ExtractedFacts::merge(extractions, limits),
        }
    }

    pub fn render(&self) -> String {
        format!(
            "Key sections:\n{}\n\nExtracted information:\n\
             People & organizations: {}\n\
             Key figures: {}\n\
             Action items: {}\n",
            self.sections.render(),
            self.facts.entities.join(", "),
            self.facts.numbers.join(", "),
            self.facts.todos.join(", "),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summarize::schema::MiniSection;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn dedup_keeps_first_occurrence_order() {
        let out = dedup_preserving_order(["b", "a", "b", "c", "a"], 10);
        assert_eq!(out, strings(&["b", "a", "c"]));
    }

    #[test]
    fn dedup_is_idempotent() {
        let input = strings(&["x", "y", "x", "z", "y", "w"]);
        let once = dedup_preserving_order(&input, 4);
        let twice = dedup_preserving_order(&once, 4);
        assert_eq!(once, twice);
    }

    #[test]
    fn dedup_caps_unique_items() {
        let input: Vec<String> = (0..30).map(|i| format!("e{}", i % 25)).collect();
        let out = dedup_preserving_order(&input, 20);
        assert_eq!(out.len(), 20);
        assert_eq!(out[19], "e19");
    }

    #[test]
    fn sections_merge_by_trimmed_title() {
        let mut bucket = SectionBucket::new();
        bucket.add("Decisions", " Ship v2 ");
        bucket.add("Agenda", "Budget");
        bucket.add("  Decisions\n", "Hire two engineers");
        bucket.add("decisions", "case matters");

        let sections: Vec<_> = bucket.sections().collect();
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].0, "Decisions");
        assert_eq!(sections[0].1, &strings(&["Ship v2", "Hire two engineers"])[..]);
        assert_eq!(sections[1].0, "Agenda");
        assert_eq!(sections[2].0, "decisions");
    }

    #[test]
    fn render_matches_heading_format() {
        let mut bucket = SectionBucket::new();
        bucket.add("A", "one");
        bucket.add("B", "two");
        bucket.add("A", "three");
        assert_eq!(bucket.render(), "### A\none\nthree\n### B\ntwo");
    }

    #[test]
    fn facts_merge_applies_caps() {
        let extractions: Vec<ExtractionResult> = (0..5)
            .map(|i| ExtractionResult {
                named_entities: (0..8).map(|j| format!("entity-{}", i * 4 + j)).collect(),
                numbers: vec!["42".into(); 3],
                todos: (0..5).map(|j| format!("todo-{i}-{j}")).collect(),
            })
            .collect();
        let facts = ExtractedFacts::merge(&extractions, FactLimits::default());
        assert_eq!(facts.entities.len(), 20);
        assert_eq!(facts.entities[0], "entity-0");
        assert_eq!(facts.numbers, strings(&["42"]));
        assert_eq!(facts.todos.len(), 15);
        assert_eq!(facts.todos[14], "todo-2-4");
    }

    #[test]
    fn outline_renders_sections_and_facts() {
        let summaries = vec![MiniSummary {
            sections: vec![MiniSection {
                title: "Purpose".into(),
                content: "Plan the launch".into(),
            }],
        }];
        let extractions = vec![ExtractionResult {
            named_entities: strings(&["Alice", "Acme"]),
            numbers: strings(&["3M yen"]),
            todos: vec![],
        }];
        let rendered = Outline::build(&summaries, &extractions, FactLimits::default()).render();
        assert!(rendered.contains("### Purpose\nPlan the launch"));
        assert!(rendered.contains("People & organizations: Alice, Acme"));
        assert!(rendered.contains("Key figures: 3M yen"));
        assert!(rendered.contains("Action items: \n"));
    }
}
