use serde::{Deserialize, Serialize};

/// A render preset: which map and level sequence to render, plus the
/// metadata shown to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenderTemplate {
    pub template_id: String,
    pub template_name: String,
    #[serde(default)]
    pub template_desc: String,
    #[serde(default)]
    pub template_thumbnail: Option<String>,
    #[serde(default)]
    pub map_path: Option<String>,
    #[serde(default)]
    pub level_sequence: Option<String>,
}

/// Public listing entry, without the engine-facing fields.
#[derive(Debug, Serialize)]
pub struct TemplateSummary {
    pub template_id: String,
    pub template_name: String,
    pub template_desc: String,
    pub template_thumbnail: String,
}

impl From<&RenderTemplate> for TemplateSummary {
    fn from(t: &RenderTemplate) -> Self {
        Self {
            template_id: t.template_id.clone(),
            template_name: t.template_name.clone(),
            template_desc: t.template_desc.clone(),
            template_thumbnail: t.template_thumbnail.clone().unwrap_or_default(),
        }
    }
}
