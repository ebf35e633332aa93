use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, Signal, System};
use tokio::process::{Child, Command};

const TERMINATE_POLL: Duration = Duration::from_millis(100);

/// A fully built external invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// File the child writes its own log to. The supervisor only makes sure
    /// its directory exists; the child's stdio is never captured.
    pub log_path: Option<PathBuf>,
}

impl ProcessCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            log_path: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }
}

/// A started child process.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    pid: Option<u32>,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    /// Exit code, `None` when the process was killed by a signal.
    Exited(Option<i32>),
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to query process state: {0}")]
    Poll(#[from] std::io::Error),
}

/// Starts, watches and tears down engine processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessSupervisor;

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self
    }

    /// Launch `command` detached from our stdio.
    pub async fn start(&self, command: &ProcessCommand) -> Result<ProcessHandle, ProcessError> {
        if let Some(parent) = command.log_path.as_ref().and_then(|p| p.parent()) {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                tracing::warn!(path = %parent.display(), error = %e, "Could not create log directory");
            }
        }

        let mut std_cmd = std::process::Command::new(&command.program);
        std_cmd
            .args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        if let Some(dir) = &command.working_dir {
            std_cmd.current_dir(dir);
        }

        // Own process group so a terminal interrupt aimed at the server does
        // not reach the engine.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            std_cmd.process_group(0);
        }

        let mut cmd = Command::from(std_cmd);
        cmd.kill_on_drop(false);

        let child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: command.program.display().to_string(),
            source,
        })?;
        let pid = child.id();

        tracing::info!(pid = ?pid, program = %command.program.display(), "Started process");

        Ok(ProcessHandle { child, pid })
    }

    /// Non-blocking exit check.
    pub fn poll(&self, handle: &mut ProcessHandle) -> Result<ProcessState, ProcessError> {
        match handle.child.try_wait()? {
            Some(status) => Ok(ProcessState::Exited(status.code())),
            None => Ok(ProcessState::Running),
        }
    }

    /// Terminate `pid` and every descendant.
    ///
    /// Descendants are enumerated before anything is signaled, since a dying
    /// parent hands its children to another reaper. Survivors of the grace
    /// period are force-killed. A target that is already gone is fine.
    pub async fn terminate(&self, pid: u32, grace: Duration) {
        let result = tokio::task::spawn_blocking(move || terminate_tree(pid, grace)).await;
        if let Err(e) = result {
            tracing::error!(pid, error = %e, "Process tree termination task failed");
        }
    }

    /// Whether `pid` is a live (non-zombie) process.
    pub fn is_alive(&self, pid: u32) -> bool {
        let target = Pid::from_u32(pid);
        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
        alive(&sys, target)
    }
}

/// All transitive children of `root` in breadth-first order.
///
/// `table` holds `(pid, parent)` pairs from one process table snapshot.
pub fn descendants_of(root: u32, table: &[(u32, Option<u32>)]) -> Vec<u32> {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for &(pid, parent) in table {
        if let Some(parent) = parent {
            if parent != pid {
                children.entry(parent).or_default().push(pid);
            }
        }
    }

    let mut found = Vec::new();
    let mut frontier = VecDeque::from([root]);
    while let Some(current) = frontier.pop_front() {
        if let Some(kids) = children.get(&current) {
            for &kid in kids {
                if kid != root && !found.contains(&kid) {
                    found.push(kid);
                    frontier.push_back(kid);
                }
            }
        }
    }
    found
}

fn terminate_tree(pid: u32, grace: Duration) {
    let root = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All, true);

    if !alive(&sys, root) {
        tracing::debug!(pid, "Process already gone, nothing to terminate");
        return;
    }

    let table: Vec<(u32, Option<u32>)> = sys
        .processes()
        .values()
        .filter(|p| p.thread_kind().is_none())
        .map(|p| (p.pid().as_u32(), p.parent().map(|parent| parent.as_u32())))
        .collect();

    let mut targets: Vec<Pid> = descendants_of(pid, &table)
        .into_iter()
        .map(Pid::from_u32)
        .collect();
    targets.push(root);

    tracing::info!(pid, descendants = targets.len() - 1, "Terminating process tree");

    for target in &targets {
        if let Some(process) = sys.process(*target) {
            if process.kill_with(Signal::Term).is_none() {
                process.kill();
            }
        }
    }

    let deadline = Instant::now() + grace;
    loop {
        sys.refresh_processes(ProcessesToUpdate::Some(&targets), true);
        let remaining: Vec<Pid> = targets
            .iter()
            .copied()
            .filter(|p| alive(&sys, *p))
            .collect();

        if remaining.is_empty() {
            tracing::info!(pid, "Process tree exited");
            return;
        }

        if Instant::now() >= deadline {
            for target in &remaining {
                if let Some(process) = sys.process(*target) {
                    process.kill();
                }
            }
            tracing::warn!(pid, survivors = remaining.len(), "Force-killed processes after grace period");
            return;
        }

        std::thread::sleep(TERMINATE_POLL);
    }
}

fn alive(sys: &System, pid: Pid) -> bool {
    sys.process(pid)
        .is_some_and(|p| p.status() != ProcessStatus::Zombie)
}
