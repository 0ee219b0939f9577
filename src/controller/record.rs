use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::workflow::{Progress, TaskType};

const EVENT_CAPACITY: usize = 256;

/// The chapter-level operations the controller runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Translation,
    Polish,
    Proofreading,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [JobKind::Translation, JobKind::Polish, JobKind::Proofreading];

    pub fn task_type(&self) -> TaskType {
        match self {
            JobKind::Translation => TaskType::Translation,
            JobKind::Polish => TaskType::Polish,
            JobKind::Proofreading => TaskType::Proofreading,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.task_type().as_str()
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown job kind: {s}"))
    }
}

/// How a finished job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Completed,
    Cancelled,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Broadcast to [`JobTable::subscribe`] receivers while jobs run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    ParagraphApplied {
        kind: JobKind,
        chapter_id: String,
        paragraph_id: String,
    },
    Progress {
        kind: JobKind,
        chapter_id: String,
        progress: Progress,
    },
    Finished {
        kind: JobKind,
        chapter_id: String,
        status: JobStatus,
    },
}

/// Point-in-time view of one chapter job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSnapshot {
    pub kind: JobKind,
    pub chapter_id: String,
    pub is_running: bool,
    pub progress: Progress,
    /// Paragraphs of the chunk being processed.
    pub in_flight: Vec<String>,
    /// `None` until the first run of this job finishes.
    pub last_status: Option<JobStatus>,
}

#[derive(Debug, Default)]
struct ChapterJob {
    is_running: bool,
    progress: Progress,
    cancel: CancellationToken,
    in_flight: BTreeSet<String>,
    finished_at: Option<Instant>,
    last_status: Option<JobStatus>,
}

type JobKey = (JobKind, String);

/// Per-(kind, chapter) job state, created lazily and kept for the session.
pub struct JobTable {
    jobs: Mutex<HashMap<JobKey, ChapterJob>>,
    events: broadcast::Sender<ControllerEvent>,
    linger: Duration,
}

impl JobTable {
    pub fn new(linger: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            jobs: Mutex::new(HashMap::new()),
            events,
            linger,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ControllerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Marks the job running with a fresh token. Returns `None` if it already runs.
    pub fn begin(&self, kind: JobKind, chapter_id: &str, total: usize) -> Option<CancellationToken> {
        let token = {
            let mut jobs = self.jobs.lock();
            let job = jobs.entry((kind, chapter_id.to_string())).or_default();
            if job.is_running {
                return None;
            }
            *job = ChapterJob {
                is_running: true,
                progress: Progress::new(total),
                cancel: CancellationToken::new(),
                ..Default::default()
            };
            job.cancel.clone()
        };
        self.emit(ControllerEvent::Progress {
            kind,
            chapter_id: chapter_id.to_string(),
            progress: Progress::new(total),
        });
        Some(token)
    }

    pub fn set_in_flight(&self, kind: JobKind, chapter_id: &str, ids: &[String]) {
        if let Some(job) = self.jobs.lock().get_mut(&(kind, chapter_id.to_string())) {
            job.in_flight = ids.iter().cloned().collect();
        }
    }

    pub fn set_message(&self, kind: JobKind, chapter_id: &str, message: impl Into<String>) {
        if let Some(job) = self.jobs.lock().get_mut(&(kind, chapter_id.to_string())) {
            job.progress.message = Some(message.into());
        }
    }

    /// Records applied paragraphs. `completed` is the number of distinct
    /// paragraphs applied so far in the run.
    pub fn record_applied(
        &self,
        kind: JobKind,
        chapter_id: &str,
        paragraph_ids: &[String],
        completed: usize,
    ) {
        let progress = {
            let mut jobs = self.jobs.lock();
            let Some(job) = jobs.get_mut(&(kind, chapter_id.to_string())) else {
                return;
            };
            for id in paragraph_ids {
                job.in_flight.remove(id);
            }
            job.progress.current = completed.min(job.progress.total);
            job.progress.clone()
        };

        for id in paragraph_ids {
            self.emit(ControllerEvent::ParagraphApplied {
                kind,
                chapter_id: chapter_id.to_string(),
                paragraph_id: id.clone(),
            });
        }
        self.emit(ControllerEvent::Progress {
            kind,
            chapter_id: chapter_id.to_string(),
            progress,
        });
    }

    pub fn finish(&self, kind: JobKind, chapter_id: &str, status: JobStatus) {
        if let Some(job) = self.jobs.lock().get_mut(&(kind, chapter_id.to_string())) {
            job.is_running = false;
            job.in_flight.clear();
            job.finished_at = Some(Instant::now());
            job.last_status = Some(status);
        }
        self.emit(ControllerEvent::Finished {
            kind,
            chapter_id: chapter_id.to_string(),
            status,
        });
    }

    /// Cancels a running job's token. Returns false when nothing is running.
    pub fn cancel(&self, kind: JobKind, chapter_id: &str) -> bool {
        match self.jobs.lock().get(&(kind, chapter_id.to_string())) {
            Some(job) if job.is_running => {
                job.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Current state of a job. Progress of a finished job stays visible for
    /// the linger period and is reset on the first read after it.
    pub fn snapshot(&self, kind: JobKind, chapter_id: &str) -> Option<JobSnapshot> {
        let mut jobs = self.jobs.lock();
        let job = jobs.get_mut(&(kind, chapter_id.to_string()))?;
        let expired = job
            .finished_at
            .is_some_and(|at| at.elapsed() >= self.linger);
        if expired && !job.is_running {
            job.progress = Progress::default();
            job.finished_at = None;
        }
        Some(JobSnapshot {
            kind,
            chapter_id: chapter_id.to_string(),
            is_running: job.is_running,
            progress: job.progress.clone(),
            in_flight: job.in_flight.iter().cloned().collect(),
            last_status: job.last_status,
        })
    }
}
