//! Tool registry and manifest loading.
//!
//! The registry is built once at startup and shared read-only (`Arc`) by the
//! planner, gateway and service. Lookups are by id or by capability
//! requirement.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::tool::{is_valid_tag, tag_verb};
use crate::domain::{JsonFieldSchema, RiskLevel, ToolDescriptor};
use crate::tools::{HandlerSpec, ToolHandler};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate tool registration: {tool_id}")]
    DuplicateTool { tool_id: String },

    #[error("tool {tool_id} declares no capabilities")]
    NoCapabilities { tool_id: String },

    #[error("tool {tool_id} has malformed capability tag '{tag}'")]
    InvalidTag { tool_id: String, tag: String },

    #[error("tool {tool_id} has max_concurrency 0")]
    ZeroConcurrency { tool_id: String },

    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid TOML manifest: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid JSON manifest: {0}")]
    Json(#[from] serde_json::Error),
}

/// A tool plus the handler that runs it.
#[derive(Debug, Clone)]
pub struct RegisteredTool {
    pub descriptor: ToolDescriptor,
    pub handler: ToolHandler,
}

#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        descriptor: ToolDescriptor,
        handler: ToolHandler,
    ) -> Result<(), RegistryError> {
        if self.tools.contains_key(&descriptor.id) {
            return Err(RegistryError::DuplicateTool {
                tool_id: descriptor.id,
            });
        }
        if descriptor.capabilities.is_empty() {
            return Err(RegistryError::NoCapabilities {
                tool_id: descriptor.id,
            });
        }
        if let Some(tag) = descriptor.capabilities.iter().find(|t| !is_valid_tag(t)) {
            return Err(RegistryError::InvalidTag {
                tool_id: descriptor.id.clone(),
                tag: tag.clone(),
            });
        }
        if descriptor.max_concurrency == 0 {
            return Err(RegistryError::ZeroConcurrency {
                tool_id: descriptor.id,
            });
        }
        self.tools.insert(
            descriptor.id.clone(),
            RegisteredTool {
                descriptor,
                handler,
            },
        );
        Ok(())
    }

    /// Builder-style registration for tests and embedders.
    pub fn with_tool(
        mut self,
        descriptor: ToolDescriptor,
        handler: ToolHandler,
    ) -> Result<Self, RegistryError> {
        self.register(descriptor, handler)?;
        Ok(self)
    }

    pub fn get(&self, tool_id: &str) -> Option<&RegisteredTool> {
        self.tools.get(tool_id)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// All descriptors, ordered by id.
    pub fn descriptors(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.values().map(|t| &t.descriptor)
    }

    /// Tools serving `requirement`, with the specificity of their best tag.
    pub fn candidates(&self, requirement: &str) -> Vec<(&ToolDescriptor, usize)> {
        self.descriptors()
            .filter_map(|d| d.match_specificity(requirement).map(|s| (d, s)))
            .collect()
    }

    pub fn capability_tags(&self) -> BTreeSet<String> {
        self.descriptors()
            .flat_map(|d| d.capabilities.iter().cloned())
            .collect()
    }

    /// Planner trigger words for each capability tag: the tag's leading
    /// segment plus the keywords of every tool declaring it.
    pub fn lexicon(&self) -> BTreeMap<String, BTreeSet<String>> {
        let mut lexicon: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for d in self.descriptors() {
            for tag in &d.capabilities {
                let words = lexicon.entry(tag.clone()).or_default();
                words.insert(tag_verb(tag).to_string());
                words.extend(d.keywords.iter().map(|k| k.to_lowercase()));
            }
        }
        lexicon
    }

    /// Sum of declared per-tool concurrency.
    pub fn total_concurrency(&self) -> usize {
        self.descriptors().map(|d| d.max_concurrency as usize).sum()
    }

    pub fn from_manifest(manifest: ToolManifest) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for tool in manifest.tools {
            let (descriptor, handler) = tool.into_parts();
            registry.register(descriptor, handler)?;
        }
        Ok(registry)
    }
}

/// One tool entry in a manifest file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestTool {
    pub id: String,
    pub capabilities: BTreeSet<String>,
    pub risk: RiskLevel,
    #[serde(default)]
    pub input_schema: JsonFieldSchema,
    #[serde(default)]
    pub output_schema: JsonFieldSchema,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
    pub handler: HandlerSpec,
}

fn default_max_concurrency() -> u32 {
    1
}

impl ManifestTool {
    fn into_parts(self) -> (ToolDescriptor, ToolHandler) {
        let descriptor = ToolDescriptor {
            id: self.id,
            capabilities: self.capabilities,
            input_schema: self.input_schema,
            output_schema: self.output_schema,
            risk: self.risk,
            keywords: self.keywords,
            max_concurrency: self.max_concurrency,
        };
        (descriptor, self.handler.into())
    }
}

/// Tool manifest: a list of `[[tools]]` entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolManifest {
    #[serde(default)]
    pub tools: Vec<ManifestTool>,
}

impl ToolManifest {
    pub fn from_toml_str(text: &str) -> Result<Self, RegistryError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_json_str(text: &str) -> Result<Self, RegistryError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load a manifest; `.json` files are parsed as JSON, everything else as TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text),
            _ => Self::from_toml_str(&text),
        }
    }
}
