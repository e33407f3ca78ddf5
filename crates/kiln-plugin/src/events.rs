//! Compile lifecycle events.
//!
//! Every dispatched job emits `Started`, then exactly one of `Done` or
//! `Failed`, then `Finished`. `Finished` is the only signal an observer
//! should use to move on to the next job.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Capacity of the broadcast channel; slow subscribers lag past this.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompileEventKind {
    Started,
    Done,
    Failed { message: String },
    Finished,
}

impl CompileEventKind {
    /// `Done` or `Failed`.
    pub fn is_outcome(&self) -> bool {
        matches!(self, CompileEventKind::Done | CompileEventKind::Failed { .. })
    }
}

/// A lifecycle event of one compile job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileEvent {
    pub job_id: Uuid,
    pub compiler: String,
    pub source: PathBuf,
    #[serde(flatten)]
    pub kind: CompileEventKind,
}

impl CompileEvent {
    pub fn new(
        job_id: Uuid,
        compiler: impl Into<String>,
        source: impl Into<PathBuf>,
        kind: CompileEventKind,
    ) -> Self {
        Self {
            job_id,
            compiler: compiler.into(),
            source: source.into(),
            kind,
        }
    }
}
