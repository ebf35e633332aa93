use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::models::template::RenderTemplate;

#[derive(Debug, Deserialize)]
struct TemplateFile {
    #[serde(default)]
    templates: Vec<RenderTemplate>,
}

/// Render templates keyed by id, loaded once at startup.
#[derive(Debug, Default, Clone)]
pub struct TemplateRegistry {
    templates: Vec<RenderTemplate>,
    index: HashMap<String, usize>,
}

impl TemplateRegistry {
    /// Load `{"templates": [...]}` from disk.
    pub fn load(path: &Path) -> Result<Self, TemplateError> {
        let raw = std::fs::read_to_string(path).map_err(|source| TemplateError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, TemplateError> {
        let file: TemplateFile = serde_json::from_str(raw)?;
        Ok(Self::from_templates(file.templates))
    }

    /// Later duplicates of an id replace earlier ones.
    pub fn from_templates(templates: Vec<RenderTemplate>) -> Self {
        let mut registry = Self::default();
        for template in templates {
            match registry.index.get(&template.template_id) {
                Some(&slot) => registry.templates[slot] = template,
                None => {
                    registry
                        .index
                        .insert(template.template_id.clone(), registry.templates.len());
                    registry.templates.push(template);
                }
            }
        }
        registry
    }

    pub fn get(&self, template_id: &str) -> Option<&RenderTemplate> {
        self.index.get(template_id).map(|&slot| &self.templates[slot])
    }

    /// All templates in file order.
    pub fn templates(&self) -> &[RenderTemplate] {
        &self.templates
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("failed to read template file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid template file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_keeps_file_order() {
        let registry = TemplateRegistry::from_json(
            r#"{"templates": [
                {"template_id": "b", "template_name": "B"},
                {"template_id": "a", "template_name": "A", "map_path": "/Game/A"}
            ]}"#,
        )
        .unwrap();

        assert_eq!(registry.len(), 2);
        let ids: Vec<&str> = registry.templates().iter().map(|t| t.template_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(registry.get("a").unwrap().map_path.as_deref(), Some("/Game/A"));
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_duplicate_ids_replace_earlier_entry() {
        let registry = TemplateRegistry::from_json(
            r#"{"templates": [
                {"template_id": "a", "template_name": "Old"},
                {"template_id": "a", "template_name": "New"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("a").unwrap().template_name, "New");
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            TemplateRegistry::from_json("{"),
            Err(TemplateError::Parse(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            TemplateRegistry::load(Path::new("/nonexistent/templates.json")),
            Err(TemplateError::Read { .. })
        ));
    }
}
