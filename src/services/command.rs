use std::path::Path;
use uuid::Uuid;

use super::process::ProcessCommand;
use super::runner::EngineSettings;
use crate::error::ServiceError;
use crate::models::template::RenderTemplate;

const DEFAULT_QUALITY: u8 = 1;

/// Map a payload quality name to the engine's numeric preset.
pub fn quality_level(name: Option<&str>) -> u8 {
    match name.map(|n| n.to_ascii_uppercase()).as_deref() {
        Some("LOW") => 0,
        Some("MEDIUM") => 1,
        Some("HIGH") => 2,
        Some("EPIC") => 3,
        _ => DEFAULT_QUALITY,
    }
}

/// Build the engine invocation for one job.
///
/// Pure: nothing is touched on disk. Fails when the template lacks the map
/// or level sequence to render.
pub fn build_render_command(
    engine: &EngineSettings,
    template: &RenderTemplate,
    job_id: Uuid,
    payload: &str,
    log_path: &Path,
) -> Result<ProcessCommand, ServiceError> {
    let map_path = template
        .map_path
        .as_deref()
        .filter(|m| !m.is_empty())
        .ok_or_else(|| {
            ServiceError::Validation(format!("template {} has no map_path", template.template_id))
        })?;
    let level_sequence = template
        .level_sequence
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            ServiceError::Validation(format!(
                "template {} has no level_sequence",
                template.template_id
            ))
        })?;

    let payload: serde_json::Value = serde_json::from_str(payload).unwrap_or_default();
    let quality = quality_level(payload.get("quality").and_then(|q| q.as_str()));
    let format = payload.get("format").and_then(|f| f.as_str());

    let mut command = ProcessCommand::new(&engine.editor_binary)
        .arg(engine.uproject.display().to_string())
        .arg(map_path)
        .arg("-game")
        .arg(format!("-LevelSequence={level_sequence}"));

    if let Some(class) = &engine.executor_class {
        command = command.arg(format!("-MoviePipelineLocalExecutorClass={class}"));
    }

    command = command.arg(format!("-MovieQuality={quality}"));

    if let Some(format) = format {
        command = command.arg(format!("-MovieFormat={format}"));
    }

    let command = [
        "-RenderOffscreen",
        "-Unattended",
        "-NOSPLASH",
        "-NoLoadingScreen",
        "-notexturestreaming",
        "-stdout",
    ]
    .into_iter()
    .fold(command.arg(format!("-JobId={job_id}")), |cmd, flag| cmd.arg(flag));

    Ok(command
        .arg(format!("-ABSLOG={}", log_path.display()))
        .log_path(log_path))
}
