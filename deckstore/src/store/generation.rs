//! Generation slice
//!
//! Task-oriented state for AI generation work. Every status change goes
//! through the transition table in `machine`; refused transitions are logged
//! and leave the state untouched. Applied transitions append to the task's
//! attempt log, which is never rewritten.

use crate::config::{
    DEFAULT_ABORT_TIMEOUT_MS, DEFAULT_CREDITS, DEFAULT_MAX_RETRIES, IMAGE_CREDIT_COST,
    TEXT_CREDIT_COST,
};
use crate::error::{AppError, Result};
use crate::store::machine::{self, GenerationKind, TaskEvent, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Checkpoint recorded while a task runs, used to resume a retried task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialResult {
    pub progress: u8,
    pub partial_data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationTask {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: GenerationKind,
    pub status: TaskStatus,
    pub prompt: String,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub partial_results: Vec<PartialResult>,
    #[serde(default)]
    pub retry_count: u32,
    /// Live only while the task runs; never persisted
    #[serde(skip)]
    pub cancel_token: Option<CancellationToken>,
}

/// One entry of a task's audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationAttempt {
    pub id: String,
    pub task_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageProvider {
    #[default]
    Dalle,
    Stability,
    Midjourney,
    Mock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSettings {
    pub temperature: f64,
    pub max_tokens: u32,
    pub model: String,
    pub image_provider: ImageProvider,
    pub style: String,
    pub auto_enhance: bool,
    pub language: String,
    pub max_retries: u32,
    pub abort_timeout_ms: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 2000,
            model: "gpt-4".to_string(),
            image_provider: ImageProvider::Dalle,
            style: "modern".to_string(),
            auto_enhance: true,
            language: "en".to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            abort_timeout_ms: DEFAULT_ABORT_TIMEOUT_MS,
        }
    }
}

impl GenerationSettings {
    /// Audience level sent to the AI service for this style
    pub fn instructional_level(&self) -> &'static str {
        match self.style.as_str() {
            "academic" => "advanced",
            "simple" => "beginner",
            _ => "intermediate",
        }
    }

    /// Copy of these settings with `update` applied on top
    pub fn merged(&self, update: &GenerationSettingsUpdate) -> Self {
        let mut merged = self.clone();
        merged.apply(update.clone());
        merged
    }

    fn apply(&mut self, update: GenerationSettingsUpdate) {
        if let Some(v) = update.temperature {
            self.temperature = v;
        }
        if let Some(v) = update.max_tokens {
            self.max_tokens = v;
        }
        if let Some(v) = update.model {
            self.model = v;
        }
        if let Some(v) = update.image_provider {
            self.image_provider = v;
        }
        if let Some(v) = update.style {
            self.style = v;
        }
        if let Some(v) = update.auto_enhance {
            self.auto_enhance = v;
        }
        if let Some(v) = update.language {
            self.language = v;
        }
        if let Some(v) = update.max_retries {
            self.max_retries = v;
        }
        if let Some(v) = update.abort_timeout_ms {
            self.abort_timeout_ms = v;
        }
    }
}

/// Partial update for `GenerationSettings`
#[derive(Debug, Clone, Default)]
pub struct GenerationSettingsUpdate {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub model: Option<String>,
    pub image_provider: Option<ImageProvider>,
    pub style: Option<String>,
    pub auto_enhance: Option<bool>,
    pub language: Option<String>,
    pub max_retries: Option<u32>,
    pub abort_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct GenerationState {
    pub tasks: HashMap<String, GenerationTask>,
    /// Task ids, newest first
    pub task_order: Vec<String>,
    pub current_task_id: Option<String>,
    pub is_generating: bool,
    /// FIFO of ids waiting to start
    pub queue: Vec<String>,
    /// Ids of tasks that reached a terminal status, newest first
    pub history: Vec<String>,
    pub attempts: HashMap<String, Vec<GenerationAttempt>>,
    pub error: Option<String>,
    pub preferred_model: String,
    pub global_settings: GenerationSettings,
    pub remaining_credits: u32,
    pub is_subscribed: bool,
}

impl Default for GenerationState {
    fn default() -> Self {
        Self {
            tasks: HashMap::new(),
            task_order: Vec::new(),
            current_task_id: None,
            is_generating: false,
            queue: Vec::new(),
            history: Vec::new(),
            attempts: HashMap::new(),
            error: None,
            preferred_model: "gpt-4".to_string(),
            global_settings: GenerationSettings::default(),
            remaining_credits: DEFAULT_CREDITS,
            is_subscribed: false,
        }
    }
}

impl GenerationState {
    // ===== State machine helpers =====

    pub fn get_valid_state_transitions(&self, status: TaskStatus) -> &'static [TaskEvent] {
        machine::valid_transitions(status)
    }

    pub fn is_valid_state_transition(&self, status: TaskStatus, event: TaskEvent) -> bool {
        machine::is_valid_transition(status, event)
    }

    pub fn task(&self, id: &str) -> Option<&GenerationTask> {
        self.tasks.get(id)
    }

    /// Cancellation handle of a running task
    pub fn cancel_token(&self, id: &str) -> Option<CancellationToken> {
        self.tasks.get(id).and_then(|t| t.cancel_token.clone())
    }

    // ===== Task management =====

    /// Create a task in `idle` and queue it right away
    pub fn create_task(
        &mut self,
        kind: GenerationKind,
        prompt: impl Into<String>,
        metadata: Map<String, Value>,
    ) -> String {
        let id = Uuid::new_v4().to_string();

        tracing::info!("Creating {} task {}", kind, id);

        self.tasks.insert(
            id.clone(),
            GenerationTask {
                id: id.clone(),
                kind,
                status: TaskStatus::Idle,
                prompt: prompt.into(),
                start_time: Utc::now(),
                end_time: None,
                progress: 0,
                result: None,
                error: None,
                metadata,
                partial_results: Vec::new(),
                retry_count: 0,
                cancel_token: None,
            },
        );
        self.task_order.insert(0, id.clone());
        self.attempts.insert(id.clone(), Vec::new());

        self.enqueue_task(&id);
        id
    }

    /// Move a task to `queued`; the queue never holds an id twice
    pub fn enqueue_task(&mut self, id: &str) -> bool {
        let Some(next) = self.guard(id, TaskEvent::Queue) else {
            return false;
        };
        if let Some(task) = self.tasks.get_mut(id) {
            task.status = next;
        }
        if !self.queue.iter().any(|q| q == id) {
            self.queue.push(id.to_string());
        }
        self.record_attempt(id, next, None, None);
        true
    }

    /// Start a task with a fresh cancellation handle and make it current
    pub fn start_task(&mut self, id: &str) -> bool {
        let Some(next) = self.guard(id, TaskEvent::Start) else {
            return false;
        };
        if let Some(task) = self.tasks.get_mut(id) {
            task.status = next;
            task.start_time = Utc::now();
            task.end_time = None;
            task.cancel_token = Some(CancellationToken::new());
        }
        self.queue.retain(|q| q != id);
        self.current_task_id = Some(id.to_string());
        self.is_generating = true;
        self.record_attempt(id, next, None, None);
        true
    }

    /// Record progress on a running task, clamped to 0..=100.
    ///
    /// When `partial_data` is given it is kept as a checkpoint for a later
    /// resumed retry.
    pub fn update_task_progress(
        &mut self,
        id: &str,
        progress: i64,
        partial_data: Option<Value>,
    ) -> bool {
        if self.guard(id, TaskEvent::Progress).is_none() {
            return false;
        }
        let Some(task) = self.tasks.get_mut(id) else {
            return false;
        };
        let clamped = progress.clamp(0, 100) as u8;
        task.progress = clamped;
        if let Some(data) = partial_data {
            task.partial_results.push(PartialResult {
                progress: clamped,
                partial_data: data,
            });
        }
        true
    }

    pub fn complete_task(&mut self, id: &str, result: Value) -> bool {
        let Some(next) = self.guard(id, TaskEvent::Complete) else {
            return false;
        };
        let mut cost = 0;
        if let Some(task) = self.tasks.get_mut(id) {
            task.status = next;
            task.end_time = Some(Utc::now());
            task.result = Some(result.clone());
            task.progress = 100;
            task.cancel_token = None;
            cost = credit_cost(task.kind);
        }
        if !self.is_subscribed {
            self.remaining_credits = self.remaining_credits.saturating_sub(cost);
        }
        self.finish(id);
        self.record_attempt(id, next, Some(result), None);

        tracing::info!("Task {} completed", id);
        true
    }

    pub fn fail_task(&mut self, id: &str, error: impl Into<String>) -> bool {
        let Some(next) = self.guard(id, TaskEvent::Fail) else {
            return false;
        };
        let error = error.into();
        if let Some(task) = self.tasks.get_mut(id) {
            task.status = next;
            task.end_time = Some(Utc::now());
            task.error = Some(error.clone());
            task.cancel_token = None;
        }
        if self.current_task_id.as_deref() == Some(id) {
            self.error = Some(error.clone());
        }
        self.finish(id);
        self.record_attempt(id, next, None, Some(error.clone()));

        tracing::warn!("Task {} failed: {}", id, error);
        true
    }

    /// Signal the task's cancellation handle, then mark it cancelled
    pub fn cancel_task(&mut self, id: &str) -> bool {
        let Some(next) = self.guard(id, TaskEvent::Cancel) else {
            return false;
        };
        if let Some(task) = self.tasks.get_mut(id) {
            if let Some(token) = task.cancel_token.take() {
                token.cancel();
            }
            task.status = next;
            task.end_time = Some(Utc::now());
        }
        self.queue.retain(|q| q != id);
        self.finish(id);
        self.record_attempt(id, next, None, None);

        tracing::info!("Task {} cancelled", id);
        true
    }

    pub fn pause_task(&mut self, id: &str) -> bool {
        self.toggle(id, TaskEvent::Pause)
    }

    pub fn resume_task(&mut self, id: &str) -> bool {
        self.toggle(id, TaskEvent::Resume)
    }

    /// Put a failed or cancelled task back on the queue.
    ///
    /// Unlike the other actions this one reports refusals as errors, since a
    /// retry is always an explicit user request.
    pub fn retry_task(&mut self, id: &str, use_partial: bool) -> Result<String> {
        let max_retries = self.global_settings.max_retries;
        let Some(task) = self.tasks.get_mut(id) else {
            tracing::error!("Cannot retry task {}: task not found", id);
            return Err(AppError::TaskNotFound(id.to_string()));
        };
        let Some(next) = machine::next_status(task.status, TaskEvent::Retry) else {
            tracing::error!(
                "Invalid state transition: cannot apply {} to task {} in status {}",
                TaskEvent::Retry,
                id,
                task.status
            );
            return Err(AppError::InvalidTransition {
                status: task.status,
                event: TaskEvent::Retry,
            });
        };
        if task.retry_count >= max_retries {
            return Err(AppError::RetryLimitExceeded {
                task_id: id.to_string(),
                max_retries,
            });
        }

        task.retry_count += 1;
        task.progress = 0;
        task.error = None;
        task.end_time = None;
        task.status = next;
        if !use_partial {
            task.partial_results.clear();
        }
        let attempt = task.retry_count;

        if !self.queue.iter().any(|q| q == id) {
            self.queue.push(id.to_string());
        }
        self.record_attempt(id, next, None, None);

        tracing::info!("Retrying task {} (attempt {} of {})", id, attempt, max_retries);
        Ok(id.to_string())
    }

    // ===== Queue management =====

    /// Start the task at the head of the queue
    pub fn dequeue_task(&mut self) -> Option<String> {
        let tasks = &self.tasks;
        self.queue.retain(|id| {
            tasks
                .get(id)
                .is_some_and(|t| t.status == TaskStatus::Queued)
        });

        let next = self.queue.first()?.clone();
        self.start_task(&next).then_some(next)
    }

    /// Cancel every queued task and empty the queue
    pub fn clear_queue(&mut self) {
        let queued = std::mem::take(&mut self.queue);
        for id in queued {
            let is_queued = self
                .tasks
                .get(&id)
                .is_some_and(|t| t.status == TaskStatus::Queued);
            if is_queued {
                self.cancel_task(&id);
            }
        }
    }

    /// Drop runtime-only state after loading tasks from storage.
    ///
    /// The queue is rebuilt from tasks still `queued`, oldest first.
    pub fn rebuild_after_rehydrate(&mut self) {
        let mut queued: Vec<&GenerationTask> = self
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Queued)
            .collect();
        queued.sort_by_key(|t| t.start_time);
        self.queue = queued.into_iter().map(|t| t.id.clone()).collect();

        let mut ordered: Vec<&GenerationTask> = self.tasks.values().collect();
        ordered.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        self.task_order = ordered.into_iter().map(|t| t.id.clone()).collect();

        let tasks = &self.tasks;
        self.history.retain(|id| tasks.contains_key(id));
        for id in self.tasks.keys() {
            self.attempts.entry(id.clone()).or_default();
        }

        self.current_task_id = None;
        self.is_generating = false;
    }

    // ===== Status management =====

    pub fn set_current_task(&mut self, id: Option<&str>) {
        self.current_task_id = id.map(str::to_string);
        self.is_generating = id.is_some();
    }

    pub fn set_is_generating(&mut self, is_generating: bool) {
        self.is_generating = is_generating;
    }

    pub fn set_error(&mut self, error: Option<String>) {
        self.error = error;
    }

    pub fn update_global_settings(&mut self, update: GenerationSettingsUpdate) {
        self.global_settings.apply(update);
    }

    pub fn set_preferred_model(&mut self, model: impl Into<String>) {
        self.preferred_model = model.into();
    }

    // ===== History =====

    /// Evict every terminal task along with its attempt log
    pub fn clear_history(&mut self) {
        let evicted: Vec<String> = self
            .tasks
            .values()
            .filter(|t| t.status.is_terminal())
            .map(|t| t.id.clone())
            .collect();

        for id in &evicted {
            self.tasks.remove(id);
            self.attempts.remove(id);
        }
        let tasks = &self.tasks;
        self.task_order.retain(|id| tasks.contains_key(id));
        self.history.clear();

        tracing::info!("Cleared {} finished tasks from history", evicted.len());
    }

    pub fn get_task_history(&self, id: &str) -> &[GenerationAttempt] {
        self.attempts.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    // ===== Credits =====

    pub fn can_generate(&self, kind: GenerationKind) -> bool {
        self.is_subscribed || self.remaining_credits >= credit_cost(kind)
    }

    pub fn set_remaining_credits(&mut self, credits: u32) {
        self.remaining_credits = credits;
    }

    pub fn set_subscription_status(&mut self, is_subscribed: bool) {
        self.is_subscribed = is_subscribed;
    }

    // ===== Internals =====

    /// Next status for `event`, or `None` (logged) when the task is missing
    /// or the table forbids the transition
    fn guard(&self, id: &str, event: TaskEvent) -> Option<TaskStatus> {
        let Some(task) = self.tasks.get(id) else {
            tracing::error!("Cannot apply {} to task {}: task not found", event, id);
            return None;
        };
        let next = machine::next_status(task.status, event);
        if next.is_none() {
            tracing::error!(
                "Invalid state transition: cannot apply {} to task {} in status {}",
                event,
                id,
                task.status
            );
        }
        next
    }

    fn toggle(&mut self, id: &str, event: TaskEvent) -> bool {
        let Some(next) = self.guard(id, event) else {
            return false;
        };
        if let Some(task) = self.tasks.get_mut(id) {
            task.status = next;
        }
        self.record_attempt(id, next, None, None);
        true
    }

    /// Bookkeeping shared by the terminal transitions
    fn finish(&mut self, id: &str) {
        if !self.history.iter().any(|h| h == id) {
            self.history.insert(0, id.to_string());
        }
        if self.current_task_id.as_deref() == Some(id) {
            self.current_task_id = None;
            self.is_generating = false;
        }
    }

    fn record_attempt(
        &mut self,
        id: &str,
        status: TaskStatus,
        result: Option<Value>,
        error: Option<String>,
    ) {
        self.attempts
            .entry(id.to_string())
            .or_default()
            .push(GenerationAttempt {
                id: Uuid::new_v4().to_string(),
                task_id: id.to_string(),
                timestamp: Utc::now(),
                status,
                result,
                error,
            });
    }
}

/// Credits consumed by one task of `kind`
pub fn credit_cost(kind: GenerationKind) -> u32 {
    match kind {
        GenerationKind::Image => IMAGE_CREDIT_COST,
        _ => TEXT_CREDIT_COST,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state_with_task() -> (GenerationState, String) {
        let mut state = GenerationState::default();
        let id = state.create_task(
            GenerationKind::Outline,
            "Generate a deck about dogs",
            Map::new(),
        );
        (state, id)
    }

    fn assert_queue_consistent(state: &GenerationState) {
        for id in &state.queue {
            assert_eq!(state.tasks[id].status, TaskStatus::Queued);
        }
    }

    #[test]
    fn test_create_auto_queues() {
        let (state, id) = state_with_task();

        assert_eq!(state.tasks[&id].status, TaskStatus::Queued);
        assert_eq!(state.queue, vec![id.clone()]);
        assert_eq!(state.task_order[0], id);
        let log = state.get_task_history(&id);
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].status, TaskStatus::Queued);
    }

    #[test]
    fn test_dequeue_starts_head() {
        let (mut state, id) = state_with_task();

        assert_eq!(state.dequeue_task(), Some(id.clone()));
        let task = &state.tasks[&id];
        assert_eq!(task.status, TaskStatus::InProgress);
        assert!(task.cancel_token.is_some());
        assert!(state.queue.is_empty());
        assert_eq!(state.current_task_id.as_deref(), Some(id.as_str()));
        assert!(state.is_generating);

        assert_eq!(state.dequeue_task(), None);
    }

    #[test]
    fn test_enqueue_is_idempotent() {
        let mut state = GenerationState::default();
        let id = state.create_task(GenerationKind::Content, "x", Map::new());

        // Already queued: the table refuses QUEUE, the queue is unchanged
        assert!(!state.enqueue_task(&id));
        assert_eq!(state.queue.iter().filter(|q| **q == id).count(), 1);

        state.start_task(&id);
        state.complete_task(&id, json!({}));
        assert!(state.enqueue_task(&id));
        assert!(!state.enqueue_task(&id));
        assert_eq!(state.queue.iter().filter(|q| **q == id).count(), 1);
        assert_queue_consistent(&state);
    }

    #[test]
    fn test_complete_task() {
        let (mut state, id) = state_with_task();
        state.dequeue_task();
        state.update_task_progress(&id, 40, None);

        assert!(state.complete_task(&id, json!({"slides": [{"title": "Intro"}]})));

        let task = &state.tasks[&id];
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress, 100);
        assert!(task.end_time.is_some());
        assert_eq!(state.history[0], id);
        assert!(state.current_task_id.is_none());
        assert!(!state.is_generating);
        assert_eq!(state.remaining_credits, DEFAULT_CREDITS - TEXT_CREDIT_COST);

        let last = state.get_task_history(&id).last().unwrap();
        assert_eq!(last.status, TaskStatus::Completed);
        assert!(last.result.is_some());
    }

    #[test]
    fn test_invalid_transition_is_refused() {
        let (mut state, id) = state_with_task();
        let before = state.get_task_history(&id).len();

        assert!(!state.complete_task(&id, json!({})));
        assert!(!state.pause_task(&id));
        assert!(!state.update_task_progress(&id, 50, None));

        assert_eq!(state.tasks[&id].status, TaskStatus::Queued);
        assert_eq!(state.get_task_history(&id).len(), before);
        assert!(state.history.is_empty());
    }

    #[test]
    fn test_unknown_task_is_refused() {
        let mut state = GenerationState::default();
        assert!(!state.start_task("ghost"));
        assert!(!state.cancel_task("ghost"));
        assert!(matches!(
            state.retry_task("ghost", true),
            Err(AppError::TaskNotFound(_))
        ));
    }

    #[test]
    fn test_progress_is_clamped() {
        let (mut state, id) = state_with_task();
        state.dequeue_task();

        state.update_task_progress(&id, -5, None);
        assert_eq!(state.tasks[&id].progress, 0);

        state.update_task_progress(&id, 150, Some(json!({"slideIndex": 2})));
        let task = &state.tasks[&id];
        assert_eq!(task.progress, 100);
        assert_eq!(task.partial_results.len(), 1);
        assert_eq!(task.partial_results[0].progress, 100);
    }

    #[test]
    fn test_pause_and_resume() {
        let (mut state, id) = state_with_task();
        state.dequeue_task();

        assert!(state.pause_task(&id));
        assert_eq!(state.tasks[&id].status, TaskStatus::Paused);
        assert!(!state.update_task_progress(&id, 10, None));

        assert!(state.resume_task(&id));
        assert_eq!(state.tasks[&id].status, TaskStatus::InProgress);
    }

    #[test]
    fn test_cancel_fires_token() {
        let (mut state, id) = state_with_task();
        state.dequeue_task();
        let token = state.cancel_token(&id).unwrap();

        assert!(state.cancel_task(&id));
        assert!(token.is_cancelled());
        assert_eq!(state.tasks[&id].status, TaskStatus::Cancelled);
        assert!(state.current_task_id.is_none());
        assert!(state.history.contains(&id));
    }

    #[test]
    fn test_fail_records_error() {
        let (mut state, id) = state_with_task();
        state.dequeue_task();

        assert!(state.fail_task(&id, "model overloaded"));
        let task = &state.tasks[&id];
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("model overloaded"));
        assert_eq!(state.error.as_deref(), Some("model overloaded"));
        assert_eq!(
            state.get_task_history(&id).last().unwrap().error.as_deref(),
            Some("model overloaded")
        );
    }

    #[test]
    fn test_retry_bound() {
        let (mut state, id) = state_with_task();
        let max = state.global_settings.max_retries;

        for _ in 0..max {
            state.dequeue_task();
            state.fail_task(&id, "boom");
            state.retry_task(&id, true).unwrap();
            assert_eq!(state.tasks[&id].status, TaskStatus::Queued);
            assert!(state.tasks[&id].error.is_none());
        }
        state.dequeue_task();
        state.fail_task(&id, "boom");

        let err = state.retry_task(&id, true).unwrap_err();
        assert!(matches!(err, AppError::RetryLimitExceeded { .. }));
        assert_eq!(state.tasks[&id].retry_count, max);
        assert_eq!(state.tasks[&id].status, TaskStatus::Failed);
    }

    #[test]
    fn test_retry_requires_failed_or_cancelled() {
        let (mut state, id) = state_with_task();
        let err = state.retry_task(&id, true).unwrap_err();
        assert!(matches!(
            err,
            AppError::InvalidTransition {
                status: TaskStatus::Queued,
                event: TaskEvent::Retry
            }
        ));
    }

    #[test]
    fn test_retry_partial_results() {
        let (mut state, id) = state_with_task();
        state.dequeue_task();
        state.update_task_progress(&id, 30, Some(json!({"slideIndex": 1})));
        state.fail_task(&id, "boom");

        state.retry_task(&id, true).unwrap();
        assert_eq!(state.tasks[&id].partial_results.len(), 1);
        assert_eq!(state.tasks[&id].progress, 0);

        state.dequeue_task();
        state.fail_task(&id, "boom");
        state.retry_task(&id, false).unwrap();
        assert!(state.tasks[&id].partial_results.is_empty());
    }

    #[test]
    fn test_clear_queue_cancels_queued() {
        let mut state = GenerationState::default();
        let a = state.create_task(GenerationKind::Outline, "a", Map::new());
        let b = state.create_task(GenerationKind::Content, "b", Map::new());
        let running = state.create_task(GenerationKind::Image, "c", Map::new());
        state.start_task(&running);

        state.clear_queue();

        assert!(state.queue.is_empty());
        assert_eq!(state.tasks[&a].status, TaskStatus::Cancelled);
        assert_eq!(state.tasks[&b].status, TaskStatus::Cancelled);
        assert_eq!(state.tasks[&running].status, TaskStatus::InProgress);
    }

    #[test]
    fn test_dequeue_prunes_missing_tasks() {
        let (mut state, id) = state_with_task();
        state.queue.insert(0, "ghost".to_string());

        assert_eq!(state.dequeue_task(), Some(id));
        assert!(state.queue.is_empty());
    }

    #[test]
    fn test_clear_history_keeps_live_tasks() {
        let mut state = GenerationState::default();
        let done = state.create_task(GenerationKind::Outline, "a", Map::new());
        state.start_task(&done);
        state.complete_task(&done, json!({}));
        let waiting = state.create_task(GenerationKind::Content, "b", Map::new());

        state.clear_history();

        assert!(!state.tasks.contains_key(&done));
        assert!(state.get_task_history(&done).is_empty());
        assert!(!state.task_order.contains(&done));
        assert!(state.tasks.contains_key(&waiting));
        assert_eq!(state.queue, vec![waiting]);
        assert!(state.history.is_empty());
    }

    #[test]
    fn test_credits() {
        let mut state = GenerationState::default();
        state.set_remaining_credits(4);
        assert!(!state.can_generate(GenerationKind::Image));
        assert!(state.can_generate(GenerationKind::Outline));

        state.set_subscription_status(true);
        assert!(state.can_generate(GenerationKind::Image));

        let id = state.create_task(GenerationKind::Image, "img", Map::new());
        state.start_task(&id);
        state.complete_task(&id, json!({"url": "https://example.com/a.png"}));
        assert_eq!(state.remaining_credits, 4);
    }

    #[test]
    fn test_settings_update_and_level() {
        let mut state = GenerationState::default();
        assert_eq!(state.global_settings.instructional_level(), "intermediate");

        state.update_global_settings(GenerationSettingsUpdate {
            style: Some("academic".to_string()),
            max_retries: Some(5),
            ..Default::default()
        });
        assert_eq!(state.global_settings.instructional_level(), "advanced");
        assert_eq!(state.global_settings.max_retries, 5);
        assert_eq!(state.global_settings.language, "en");

        let merged = state.global_settings.merged(&GenerationSettingsUpdate {
            style: Some("simple".to_string()),
            ..Default::default()
        });
        assert_eq!(merged.instructional_level(), "beginner");
        assert_eq!(state.global_settings.style, "academic");
    }

    #[test]
    fn test_rebuild_after_rehydrate() {
        let mut state = GenerationState::default();
        let first = state.create_task(GenerationKind::Outline, "a", Map::new());
        let second = state.create_task(GenerationKind::Content, "b", Map::new());
        state.current_task_id = Some(first.clone());
        state.is_generating = true;
        state.queue.clear();
        state.attempts.clear();

        state.rebuild_after_rehydrate();

        assert_eq!(state.queue.len(), 2);
        assert!(state.queue.contains(&first) && state.queue.contains(&second));
        assert!(state.current_task_id.is_none());
        assert!(!state.is_generating);
        assert!(state.attempts.contains_key(&first));
    }

    #[test]
    fn test_task_serialization_skips_token() {
        let (mut state, id) = state_with_task();
        state.dequeue_task();
        let json = serde_json::to_value(&state.tasks[&id]).unwrap();

        assert_eq!(json["type"], "outline");
        assert_eq!(json["status"], "in_progress");
        assert!(json.get("cancelToken").is_none());

        let back: GenerationTask = serde_json::from_value(json).unwrap();
        assert!(back.cancel_token.is_none());
    }
}
