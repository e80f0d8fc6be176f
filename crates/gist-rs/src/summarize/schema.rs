//! Structured response types requested from the model.
//!
//! Each type derives [`JsonSchema`]; the schema is sent with the request and
//! every response is validated against it before decoding.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Facts pulled from one batch of text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ExtractionResult {
    /// People, organizations, systems and projects mentioned.
    #[serde(default)]
    pub named_entities: Vec<String>,
    /// Figures, statistics, budgets and deadlines.
    #[serde(default)]
    pub numbers: Vec<String>,
    /// Action items and decisions.
    #[serde(default)]
    pub todos: Vec<String>,
}

/// One titled section of a mini-summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MiniSection {
    pub title: String,
    pub content: String,
}

/// Sectioned summary of one batch (or of the document's opening).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MiniSummary {
    #[serde(default)]
    pub sections: Vec<MiniSection>,
}

/// The final, whole-document summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StructuredSummary {
    /// Three or four sentence overview.
    pub summary: String,
    /// The main points argued.
    #[serde(default)]
    pub main_arguments: Vec<String>,
    /// How the discussion progressed, as prose.
    #[serde(default)]
    pub discussion_flow: String,
    #[serde(default)]
    pub action_items: Vec<String>,
    /// Unresolved questions and follow-ups.
    #[serde(default)]
    pub open_issues: Vec<String>,
    #[serde(default)]
    pub named_entities: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}
