use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::services::gate::AdmissionLimits;
use crate::services::gpu::{parse_memory_csv, GpuProbe};
use crate::services::runner::{EngineSettings, RunnerSettings};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address. The engine plugin calls back on port 8080.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// SQLite connection string
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Unreal Engine install root
    pub ue_root: PathBuf,

    /// Absolute path of the .uproject to render from
    pub uproject: PathBuf,

    /// Explicit editor binary; derived from `ue_root` when unset
    #[serde(default)]
    pub ue_editor_cmd: Option<PathBuf>,

    /// Movie Pipeline executor class passed to the engine
    #[serde(default = "default_executor_class")]
    pub executor_class: String,

    /// Root for per-job working directories and engine logs
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,

    /// JSON file holding the render templates
    #[serde(default = "default_templates_path")]
    pub templates_path: PathBuf,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_min_free_vram_mb")]
    pub min_free_vram_mb: u64,

    #[serde(default = "default_scheduler_poll_ms")]
    pub scheduler_poll_ms: u64,

    #[serde(default = "default_runner_poll_ms")]
    pub runner_poll_ms: u64,

    #[serde(default = "default_runner_max_wait_secs")]
    pub runner_max_wait_secs: u64,

    /// Grace period between SIGTERM and SIGKILL when tearing down a job
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,

    /// How much of the engine log end is kept on failure
    #[serde(default = "default_log_tail_bytes")]
    pub log_tail_bytes: u64,

    /// "nvidia-smi", "none" or "static:<total>,<used>,<free>"
    #[serde(default = "default_gpu_query")]
    pub gpu_query: String,

    #[serde(default = "default_nvidia_smi")]
    pub nvidia_smi: PathBuf,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_database_url() -> String {
    "sqlite://data/mrq.db".to_string()
}

fn default_executor_class() -> String {
    "MoviePipelineNativeHostExecutor".to_string()
}

fn default_data_root() -> PathBuf {
    PathBuf::from("./data")
}

fn default_templates_path() -> PathBuf {
    PathBuf::from("configs/templates.json")
}

fn default_max_concurrency() -> usize {
    2
}

fn default_min_free_vram_mb() -> u64 {
    4096
}

fn default_scheduler_poll_ms() -> u64 {
    1500
}

fn default_runner_poll_ms() -> u64 {
    5000
}

fn default_runner_max_wait_secs() -> u64 {
    300
}

fn default_cancel_grace_ms() -> u64 {
    5000
}

fn default_log_tail_bytes() -> u64 {
    8192
}

fn default_gpu_query() -> String {
    "nvidia-smi".to_string()
}

fn default_nvidia_smi() -> PathBuf {
    PathBuf::from("nvidia-smi")
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Editor binary: the explicit override, else the platform's
    /// `UnrealEditor-Cmd` under `<ue_root>/Engine/Binaries`.
    pub fn editor_binary(&self) -> PathBuf {
        if let Some(cmd) = &self.ue_editor_cmd {
            return cmd.clone();
        }
        derive_editor_binary(&self.ue_root)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            editor_binary: self.editor_binary(),
            uproject: self.uproject.clone(),
            executor_class: Some(self.executor_class.clone()),
        }
    }

    pub fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            engine: self.engine_settings(),
            data_root: self.data_root.clone(),
            poll_interval: Duration::from_millis(self.runner_poll_ms),
            max_wait: Duration::from_secs(self.runner_max_wait_secs),
            kill_grace: Duration::from_millis(self.cancel_grace_ms),
            log_tail_bytes: self.log_tail_bytes,
        }
    }

    pub fn admission_limits(&self) -> AdmissionLimits {
        AdmissionLimits {
            max_concurrency: self.max_concurrency,
            min_free_vram_mb: self.min_free_vram_mb,
        }
    }

    /// `none` disables the memory check; `static:<total>,<used>,<free>`
    /// pins a snapshot in MiB; anything else queries `nvidia-smi`.
    pub fn gpu_probe(&self) -> GpuProbe {
        match self.gpu_query.as_str() {
            "none" | "off" | "disabled" => GpuProbe::Disabled,
            query => match query.strip_prefix("static:").and_then(parse_memory_csv) {
                Some(status) => GpuProbe::Static(status),
                None => GpuProbe::NvidiaSmi(self.nvidia_smi.clone()),
            },
        }
    }

    pub fn scheduler_poll_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler_poll_ms)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

fn derive_editor_binary(ue_root: &Path) -> PathBuf {
    let binaries = ue_root.join("Engine").join("Binaries");
    if cfg!(windows) {
        binaries.join("Win64").join("UnrealEditor-Cmd.exe")
    } else {
        binaries.join("Linux").join("UnrealEditor-Cmd")
    }
}
