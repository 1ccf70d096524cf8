//! Tool descriptors: capability tags, schemas, declared risk.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declared risk of invoking a tool.
///
/// Also used as a goal's safety tier: the highest risk the goal permits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Read-only or trivially reversible.
    Low,
    /// Side effects that can be undone.
    Elevated,
    /// Side effects that cannot be undone (payments, deletions, sends).
    Irreversible,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Elevated => write!(f, "elevated"),
            Self::Irreversible => write!(f, "irreversible"),
        }
    }
}

/// Minimal JSON schema: required top-level fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JsonFieldSchema {
    #[serde(default)]
    pub required_fields: Vec<String>,
}

impl JsonFieldSchema {
    pub fn required<const N: usize>(fields: [&str; N]) -> Self {
        Self {
            required_fields: fields.iter().map(|f| (*f).to_string()).collect(),
        }
    }

    /// First required field missing from `payload`, if any.
    pub fn missing_field(&self, payload: &Value) -> Option<&str> {
        self.required_fields
            .iter()
            .find(|field| payload.get(field.as_str()).is_none())
            .map(String::as_str)
    }
}

/// A registered tool. Read-only once the registry is built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolDescriptor {
    pub id: String,
    /// Hyphen-separated hierarchical tags, e.g. `fetch` or `fetch-web-content`.
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub input_schema: JsonFieldSchema,
    #[serde(default)]
    pub output_schema: JsonFieldSchema,
    pub risk: RiskLevel,
    /// Extra words that make the planner pick this tool's capabilities.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// How many invocations of this tool may run at once across a run.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
}

fn default_max_concurrency() -> u32 {
    1
}

impl ToolDescriptor {
    pub fn new(id: impl Into<String>, capability: impl Into<String>, risk: RiskLevel) -> Self {
        Self {
            id: id.into(),
            capabilities: BTreeSet::from([capability.into()]),
            input_schema: JsonFieldSchema::default(),
            output_schema: JsonFieldSchema::default(),
            risk,
            keywords: Vec::new(),
            max_concurrency: default_max_concurrency(),
        }
    }

    pub fn with_output_schema(mut self, schema: JsonFieldSchema) -> Self {
        self.output_schema = schema;
        self
    }

    pub fn with_input_schema(mut self, schema: JsonFieldSchema) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    pub fn with_keywords<const N: usize>(mut self, keywords: [&str; N]) -> Self {
        self.keywords = keywords.iter().map(|k| (*k).to_string()).collect();
        self
    }

    /// Specificity of the best tag serving `requirement`, or `None` if no
    /// tag matches.
    pub fn match_specificity(&self, requirement: &str) -> Option<usize> {
        self.capabilities
            .iter()
            .filter(|tag| tag_matches(tag, requirement))
            .map(|tag| specificity(tag))
            .max()
    }
}

/// A tag serves a requirement when equal to it or a hierarchical prefix of it:
/// `fetch` serves `fetch-web-content`, `fetch-web` does not serve `fetch-file`.
pub fn tag_matches(tag: &str, requirement: &str) -> bool {
    requirement == tag
        || (requirement.len() > tag.len()
            && requirement.starts_with(tag)
            && requirement.as_bytes()[tag.len()] == b'-')
}

/// Number of hyphen-separated segments; more segments means narrower.
pub fn specificity(tag: &str) -> usize {
    tag.split('-').filter(|s| !s.is_empty()).count()
}

/// The leading segment of a tag, used as its planner trigger word.
pub fn tag_verb(tag: &str) -> &str {
    tag.split('-').next().unwrap_or(tag)
}

/// Tags are lowercase ascii words joined by single hyphens.
pub fn is_valid_tag(tag: &str) -> bool {
    !tag.is_empty()
        && tag.split('-').all(|seg| {
            !seg.is_empty()
                && seg
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        })
}
