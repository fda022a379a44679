//! In-memory task store.
//!
//! All access goes through methods holding one mutex for the duration of a
//! single operation, so registry-wide reads (listing, reaper sweeps, counts)
//! never observe a half-applied mutation. Callers only ever get clones.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::model::{Task, TaskPhase, TaskRequest, TaskStatus};
use crate::{Error, Result};

/// Number of tasks per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<Mutex<HashMap<String, Task>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new queued task.
    pub fn create(&self, request: TaskRequest) -> Task {
        let task = Task::new(request);
        self.tasks.lock().insert(task.id.clone(), task.clone());
        debug!(task_id = %task.id, service = %task.request.service, "Task queued");
        task
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.tasks.lock().get(id).cloned()
    }

    /// Snapshot of all tasks, oldest first.
    pub fn list(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.lock().values().cloned().collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Mark a task admitted: queued → processing.
    pub fn start(&self, id: &str) -> Result<Task> {
        self.update(id, |task| {
            task.status = task.status.transition_to(TaskStatus::Processing)?;
            task.started_at = Some(Utc::now());
            Ok(())
        })
    }

    /// Advance the progress marker of a processing task.
    pub fn set_phase(&self, id: &str, phase: TaskPhase) -> Result<()> {
        self.update(id, |task| {
            if task.status != TaskStatus::Processing {
                return Err(Error::InvalidStateTransition {
                    from: format!("{}/{}", task.status, task.phase),
                    to: phase.as_str().to_string(),
                });
            }
            task.phase = phase;
            Ok(())
        })
        .map(|_| ())
    }

    /// processing → completed, recording the produced file.
    pub fn complete(&self, id: &str, output_path: PathBuf, file_size: u64) -> Result<Task> {
        let task = self.update(id, |task| {
            task.status = task.status.transition_to(TaskStatus::Completed)?;
            task.phase = TaskPhase::Completed;
            task.output_path = Some(output_path);
            task.file_size = Some(file_size);
            task.finished_at = Some(Utc::now());
            Ok(())
        })?;
        info!(task_id = %id, file_size, "Task completed");
        Ok(task)
    }

    /// queued/processing → failed. The phase keeps its last value.
    pub fn fail(&self, id: &str, error: impl Into<String>) -> Result<Task> {
        let error = error.into();
        let task = self.update(id, |task| {
            task.status = task.status.transition_to(TaskStatus::Failed)?;
            task.error = Some(error.clone());
            task.output_path = None;
            task.finished_at = Some(Utc::now());
            Ok(())
        })?;
        warn!(task_id = %id, error = %error, "Task failed");
        Ok(task)
    }

    pub fn remove(&self, id: &str) -> Option<Task> {
        self.tasks.lock().remove(id)
    }

    /// Ids of processing tasks created before `cutoff`.
    pub fn stuck_since(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        self.tasks
            .lock()
            .values()
            .filter(|t| t.status == TaskStatus::Processing && t.created_at < cutoff)
            .map(|t| t.id.clone())
            .collect()
    }

    pub fn counts(&self) -> TaskCounts {
        let tasks = self.tasks.lock();
        let mut counts = TaskCounts::default();
        for task in tasks.values() {
            match task.status {
                TaskStatus::Queued => counts.queued += 1,
                TaskStatus::Processing => counts.processing += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Apply `f` to a copy and store it only if `f` succeeds.
    fn update<F>(&self, id: &str, f: F) -> Result<Task>
    where
        F: FnOnce(&mut Task) -> Result<()>,
    {
        let mut tasks = self.tasks.lock();
        let slot = tasks.get_mut(id).ok_or_else(|| Error::not_found("task", id))?;
        let mut next = slot.clone();
        f(&mut next)?;
        *slot = next.clone();
        Ok(next)
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, id: &str, created_at: DateTime<Utc>) {
        if let Some(task) = self.tasks.lock().get_mut(id) {
            task.created_at = created_at;
        }
    }
}
