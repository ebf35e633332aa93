use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Lifecycle state of a render job.
///
/// The forward path is `queued → starting → rendering → encoding → uploading
/// → completed`. Every non-terminal state may also move to `failed` or to
/// `canceling`, and `canceling` only ever resolves to `canceled`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Starting,
    Rendering,
    Encoding,
    Uploading,
    Completed,
    Failed,
    Canceling,
    Canceled,
}

/// Statuses counted against the concurrency limit.
///
/// `Uploading` is left out: once the engine hands the file to upload the
/// local render slot is considered free again.
pub const RUNNING_STATUSES: [JobStatus; 3] =
    [JobStatus::Starting, JobStatus::Rendering, JobStatus::Encoding];

pub const TERMINAL_STATUSES: [JobStatus; 3] =
    [JobStatus::Completed, JobStatus::Failed, JobStatus::Canceled];

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        TERMINAL_STATUSES.contains(&self)
    }

    pub fn is_running(self) -> bool {
        RUNNING_STATUSES.contains(&self)
    }

    /// Position on the forward render path, `None` off that path.
    fn stage(self) -> Option<u8> {
        match self {
            JobStatus::Queued => Some(0),
            JobStatus::Starting => Some(1),
            JobStatus::Rendering => Some(2),
            JobStatus::Encoding => Some(3),
            JobStatus::Uploading => Some(4),
            JobStatus::Completed => Some(5),
            JobStatus::Failed | JobStatus::Canceling | JobStatus::Canceled => None,
        }
    }

    /// Whether `self → next` is a legal move.
    ///
    /// Self-transitions are not moves and return `false`; callers that
    /// re-report the current status only touch non-status fields.
    pub fn can_transition(self, next: JobStatus) -> bool {
        if self.is_terminal() || self == next {
            return false;
        }

        match (self, next) {
            (JobStatus::Canceling, JobStatus::Canceled) => true,
            (JobStatus::Canceling, _) => false,
            (_, JobStatus::Failed) | (_, JobStatus::Canceling) => true,
            // Only the scheduler's claim takes a job off the queue.
            (JobStatus::Queued, JobStatus::Starting) => true,
            (JobStatus::Queued, _) => false,
            (current, next) => match (current.stage(), next.stage()) {
                (Some(from), Some(to)) => to > from,
                _ => false,
            },
        }
    }
}

/// Free-function form of [`JobStatus::can_transition`].
pub fn can_transition(current: JobStatus, next: JobStatus) -> bool {
    current.can_transition(next)
}

/// Parse a status pushed by an external caller.
pub fn parse_status(raw: &str) -> Option<JobStatus> {
    raw.parse().ok()
}
