use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;
use crate::models::template::TemplateSummary;

#[derive(Serialize)]
pub struct TemplateList {
    pub templates: Vec<TemplateSummary>,
}

/// GET /templates — Templates clients may submit jobs against.
pub async fn list_templates(State(state): State<AppState>) -> Json<TemplateList> {
    Json(TemplateList {
        templates: state
            .templates
            .templates()
            .iter()
            .map(TemplateSummary::from)
            .collect(),
    })
}
