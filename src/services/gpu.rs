use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Memory snapshot of GPU 0, in MiB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuStatus {
    pub total_mb: u64,
    pub used_mb: u64,
    pub free_mb: u64,
}

/// Where GPU memory figures come from.
#[derive(Debug, Clone)]
pub enum GpuProbe {
    /// Ask `nvidia-smi` at the given path.
    NvidiaSmi(PathBuf),
    /// Host has no usable GPU query; admission skips the memory check.
    Disabled,
    /// Always report the same snapshot.
    Static(GpuStatus),
}

impl GpuProbe {
    /// Current snapshot, or `None` when the host cannot tell.
    pub async fn query(&self) -> Option<GpuStatus> {
        match self {
            GpuProbe::NvidiaSmi(binary) => query_nvidia_smi(binary).await,
            GpuProbe::Disabled => None,
            GpuProbe::Static(status) => Some(*status),
        }
    }
}

async fn query_nvidia_smi(binary: &Path) -> Option<GpuStatus> {
    let output = Command::new(binary)
        .args([
            "--query-gpu=memory.total,memory.used,memory.free",
            "--format=csv,noheader,nounits",
            "--id=0",
        ])
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await;

    match output {
        Ok(out) if out.status.success() => {
            let stdout = String::from_utf8_lossy(&out.stdout);
            let parsed = parse_memory_csv(&stdout);
            if parsed.is_none() {
                tracing::debug!(output = %stdout.trim(), "Unrecognized nvidia-smi output");
            }
            parsed
        }
        Ok(out) => {
            tracing::debug!(status = ?out.status.code(), "nvidia-smi exited with failure");
            None
        }
        Err(e) => {
            tracing::trace!(error = %e, "nvidia-smi unavailable");
            None
        }
    }
}

/// Parse the first line of `total, used, free` CSV output.
pub fn parse_memory_csv(output: &str) -> Option<GpuStatus> {
    let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    let mut fields = line.split(',').map(|f| f.trim().parse::<u64>());

    let total_mb = fields.next()?.ok()?;
    let used_mb = fields.next()?.ok()?;
    let free_mb = fields.next()?.ok()?;

    Some(GpuStatus {
        total_mb,
        used_mb,
        free_mb,
    })
}
