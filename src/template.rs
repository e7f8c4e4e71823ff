//! Template Storage Model
//!
//! A template is a stored row of raw markup; the registry loads and caches
//! them from JSON files.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub type TemplateId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: TemplateId,
    pub name: String,
    /// Raw markup: `{{variable}}` tokens, `{{#if}}` blocks, and at most one
    /// exercised `{{#each damage_records}}` block.
    pub content: String,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Template registry - loads and caches templates
pub struct TemplateRegistry {
    templates: HashMap<TemplateId, Template>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self { templates: HashMap::new() }
    }

    pub fn load_from_dir(dir: &Path) -> Result<Self, std::io::Error> {
        let mut registry = Self::new();
        if dir.exists() {
            for entry in fs::read_dir(dir)? {
                let entry = entry?;
                let path = entry.path();
                if path.extension().map_or(false, |e| e == "json") {
                    if let Ok(content) = fs::read_to_string(&path) {
                        if let Ok(template) = serde_json::from_str::<Template>(&content) {
                            registry.templates.insert(template.id.clone(), template);
                        }
                    }
                }
            }
        }
        Ok(registry)
    }

    pub fn get(&self, id: &str) -> Option<&Template> {
        self.templates.get(id)
    }

    pub fn list(&self) -> Vec<&Template> {
        self.templates.values().collect()
    }

    /// Templates offered in pickers; hidden rows stay loadable by id.
    pub fn list_visible(&self) -> Vec<&Template> {
        self.templates.values().filter(|t| !t.hidden).collect()
    }

    pub fn register(&mut self, template: Template) {
        self.templates.insert(template.id.clone(), template);
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}
