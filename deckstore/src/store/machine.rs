//! Generation task state machine
//!
//! States, events and the transition table that every task mutation is
//! checked against. The table is the single source of truth: a task can only
//! ever reach a status through `next_status`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What a generation task produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationKind {
    Outline,
    Content,
    Slide,
    Image,
    Design,
}

impl GenerationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            GenerationKind::Outline => "outline",
            GenerationKind::Content => "content",
            GenerationKind::Slide => "slide",
            GenerationKind::Image => "image",
            GenerationKind::Design => "design",
        }
    }
}

impl fmt::Display for GenerationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Idle,
    Queued,
    Preparing,
    InProgress,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 8] = [
        TaskStatus::Idle,
        TaskStatus::Queued,
        TaskStatus::Preparing,
        TaskStatus::InProgress,
        TaskStatus::Paused,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    /// Completed, failed and cancelled tasks are eligible for history eviction
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Idle => "idle",
            TaskStatus::Queued => "queued",
            TaskStatus::Preparing => "preparing",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events that drive a task between statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskEvent {
    Queue,
    Start,
    Progress,
    Pause,
    Resume,
    Complete,
    Fail,
    Cancel,
    Retry,
}

impl TaskEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskEvent::Queue => "QUEUE",
            TaskEvent::Start => "START",
            TaskEvent::Progress => "PROGRESS",
            TaskEvent::Pause => "PAUSE",
            TaskEvent::Resume => "RESUME",
            TaskEvent::Complete => "COMPLETE",
            TaskEvent::Fail => "FAIL",
            TaskEvent::Cancel => "CANCEL",
            TaskEvent::Retry => "RETRY",
        }
    }
}

impl fmt::Display for TaskEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events accepted in a given status
pub fn valid_transitions(status: TaskStatus) -> &'static [TaskEvent] {
    use TaskEvent::*;
    match status {
        TaskStatus::Idle => &[Queue, Start],
        TaskStatus::Queued => &[Start, Cancel],
        TaskStatus::Preparing => &[Start, Fail, Cancel],
        TaskStatus::InProgress => &[Progress, Complete, Fail, Pause, Cancel],
        TaskStatus::Paused => &[Resume, Cancel],
        // A finished task can be queued again
        TaskStatus::Completed => &[Queue],
        TaskStatus::Failed => &[Retry, Queue],
        TaskStatus::Cancelled => &[Retry, Queue],
    }
}

pub fn is_valid_transition(status: TaskStatus, event: TaskEvent) -> bool {
    valid_transitions(status).contains(&event)
}

/// Status a task lands in after `event`, or `None` if the table forbids it.
///
/// `Retry` resolves to `Queued` because a retried task is immediately put
/// back on the queue.
pub fn next_status(status: TaskStatus, event: TaskEvent) -> Option<TaskStatus> {
    if !is_valid_transition(status, event) {
        return None;
    }
    Some(match event {
        TaskEvent::Queue | TaskEvent::Retry => TaskStatus::Queued,
        TaskEvent::Start | TaskEvent::Resume | TaskEvent::Progress => TaskStatus::InProgress,
        TaskEvent::Pause => TaskStatus::Paused,
        TaskEvent::Complete => TaskStatus::Completed,
        TaskEvent::Fail => TaskStatus::Failed,
        TaskEvent::Cancel => TaskStatus::Cancelled,
    })
}
