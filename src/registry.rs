//! Bounded registry of conversion tasks.
//!
//! Each task is identified by an opaque [`TaskToken`] and carries a
//! [`TaskState`]: a progress checkpoint, the stage that produced it and at
//! most one terminal error. States are replaced whole through an [`ArcSwap`],
//! so pollers always observe a complete record and never block the worker
//! that owns the task.
//!
//! The registry holds at most `max_size` tasks; creating one more evicts the
//! oldest entry.
//!
//! # Example
//!
//! ```
//! use canlog::registry::{Stage, TaskRegistry, TaskToken};
//!
//! let registry = TaskRegistry::new(2);
//! let token = TaskToken::generate();
//! registry.create(token.clone());
//! registry.update(&token, Stage::Deserialized);
//!
//! assert_eq!(registry.get(&token).unwrap().progress, 20);
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

/// Default number of tasks kept by a registry.
pub const DEFAULT_CAPACITY: usize = 20;

/// Opaque task identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskToken(String);

impl TaskToken {
    /// Wrap an existing identifier.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Generate a random token of 16 hex digits.
    pub fn generate() -> Self {
        Self(format!("{:016x}", rand::random::<u64>()))
    }

    /// Get the token text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stages of a conversion run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Task created, input staged
    Staged,
    /// Raw log split into frames
    Deserialized,
    /// Frames decoded into the signal table
    Decoded,
    /// Timestamps normalized and duplicates removed
    Normalized,
    /// Line protocol written
    Encoded,
    /// Line protocol handed to the sink
    Delivered,
    /// A stage failed; progress stays at the last completed checkpoint
    Failed,
}

impl Stage {
    /// Progress percentage reached when this stage completes.
    ///
    /// `Failed` has no checkpoint of its own.
    pub fn checkpoint(self) -> Option<u8> {
        match self {
            Stage::Staged => Some(0),
            Stage::Deserialized => Some(20),
            Stage::Decoded => Some(40),
            Stage::Normalized => Some(60),
            Stage::Encoded => Some(80),
            Stage::Delivered => Some(100),
            Stage::Failed => None,
        }
    }

    /// Whether no further updates follow this stage.
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Delivered | Stage::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Staged => "staged",
            Stage::Deserialized => "deserialized",
            Stage::Decoded => "decoded",
            Stage::Normalized => "normalized",
            Stage::Encoded => "encoded",
            Stage::Delivered => "delivered",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Snapshot of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskState {
    /// Progress percentage, never decreasing
    pub progress: u8,
    /// Last stage recorded
    pub stage: Stage,
    /// Error text of a failed run
    pub error: Option<String>,
}

impl Default for TaskState {
    fn default() -> Self {
        Self {
            progress: 0,
            stage: Stage::Staged,
            error: None,
        }
    }
}

impl TaskState {
    /// Whether the task has failed.
    pub fn is_failed(&self) -> bool {
        self.stage == Stage::Failed
    }

    /// Whether the task has finished, successfully or not.
    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }
}

type TaskCell = Arc<ArcSwap<TaskState>>;

#[derive(Default)]
struct Inner {
    order: VecDeque<TaskToken>,
    tasks: HashMap<TaskToken, TaskCell>,
}

/// Bounded, thread-safe task registry.
pub struct TaskRegistry {
    max_size: usize,
    inner: Mutex<Inner>,
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("max_size", &self.max_size)
            .field("len", &self.len())
            .finish()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl TaskRegistry {
    /// Create a registry holding at most `max_size` tasks (at least one).
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size: max_size.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Maximum number of tasks kept.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave `Inner` half-updated.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cell(&self, token: &TaskToken) -> Option<TaskCell> {
        self.lock().tasks.get(token).cloned()
    }

    /// Register a task at 0 %, evicting the oldest task when full.
    ///
    /// Re-creating an existing token resets its state but keeps its position.
    pub fn create(&self, token: TaskToken) -> TaskState {
        let state = TaskState::default();
        let mut inner = self.lock();

        if let Some(cell) = inner.tasks.get(&token) {
            cell.store(Arc::new(state.clone()));
            return state;
        }

        inner.order.push_back(token.clone());
        inner
            .tasks
            .insert(token, Arc::new(ArcSwap::from_pointee(state.clone())));

        while inner.order.len() > self.max_size {
            if let Some(oldest) = inner.order.pop_front() {
                inner.tasks.remove(&oldest);
                tracing::debug!(token = %oldest, "evicted oldest task");
            }
        }
        state
    }

    /// Record that `stage` completed.
    ///
    /// Updates that would lower progress, and updates to a failed task, are
    /// ignored. Returns `false` if the token is unknown.
    pub fn update(&self, token: &TaskToken, stage: Stage) -> bool {
        let Some(cell) = self.cell(token) else {
            return false;
        };
        let Some(checkpoint) = stage.checkpoint() else {
            return true;
        };
        cell.rcu(|current| {
            if current.is_failed() || checkpoint < current.progress {
                Arc::clone(current)
            } else {
                Arc::new(TaskState {
                    progress: checkpoint,
                    stage,
                    error: None,
                })
            }
        });
        true
    }

    /// Mark a task failed with `error`, keeping its current progress.
    ///
    /// Only the first failure is kept. Returns `false` if the token is unknown.
    pub fn fail(&self, token: &TaskToken, error: impl fmt::Display) -> bool {
        let Some(cell) = self.cell(token) else {
            return false;
        };
        let text = error.to_string();
        cell.rcu(|current| {
            if current.is_failed() {
                Arc::clone(current)
            } else {
                Arc::new(TaskState {
                    progress: current.progress,
                    stage: Stage::Failed,
                    error: Some(text.clone()),
                })
            }
        });
        true
    }

    /// Snapshot of a task, or `None` if it is unknown or was evicted.
    pub fn get(&self, token: &TaskToken) -> Option<TaskState> {
        self.cell(token).map(|cell| TaskState::clone(&cell.load()))
    }

    /// Tokens currently held, oldest first.
    pub fn tokens(&self) -> Vec<TaskToken> {
        self.lock().order.iter().cloned().collect()
    }

    /// Number of tasks held.
    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    /// Check if the registry holds no tasks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_tokens_are_hex() {
        let token = TaskToken::generate();
        assert_eq!(token.as_str().len(), 16);
        assert!(token.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, TaskToken::generate());
    }

    #[test]
    fn test_create_starts_at_zero() {
        let registry = TaskRegistry::default();
        let token = TaskToken::new("a");
        let state = registry.create(token.clone());
        assert_eq!(state.progress, 0);
        assert_eq!(state.stage, Stage::Staged);
        assert!(state.error.is_none());
        assert_eq!(registry.get(&token), Some(state));
    }

    #[test]
    fn test_eviction_removes_exactly_the_oldest() {
        let registry = TaskRegistry::new(3);
        for name in ["a", "b", "c"] {
            registry.create(TaskToken::new(name));
        }
        registry.update(&TaskToken::new("b"), Stage::Decoded);

        registry.create(TaskToken::new("d"));

        assert_eq!(registry.len(), 3);
        assert!(registry.get(&TaskToken::new("a")).is_none());
        assert_eq!(registry.get(&TaskToken::new("b")).unwrap().progress, 40);
        assert_eq!(registry.get(&TaskToken::new("c")).unwrap().progress, 0);
        assert_eq!(
            registry.tokens(),
            vec![TaskToken::new("b"), TaskToken::new("c"), TaskToken::new("d")]
        );
    }

    #[test]
    fn test_progress_never_decreases() {
        let registry = TaskRegistry::new(4);
        let token = TaskToken::new("t");
        registry.create(token.clone());
        registry.update(&token, Stage::Encoded);
        registry.update(&token, Stage::Deserialized);
        let state = registry.get(&token).unwrap();
        assert_eq!(state.progress, 80);
        assert_eq!(state.stage, Stage::Encoded);
    }

    #[test]
    fn test_failure_is_terminal_and_keeps_progress() {
        let registry = TaskRegistry::new(4);
        let token = TaskToken::new("t");
        registry.create(token.clone());
        registry.update(&token, Stage::Deserialized);
        assert!(registry.fail(&token, "first"));
        registry.fail(&token, "second");
        registry.update(&token, Stage::Delivered);

        let state = registry.get(&token).unwrap();
        assert!(state.is_failed());
        assert!(state.is_terminal());
        assert_eq!(state.progress, 20);
        assert_eq!(state.error.as_deref(), Some("first"));
    }

    #[test]
    fn test_unknown_tokens() {
        let registry = TaskRegistry::new(1);
        let token = TaskToken::new("missing");
        assert!(!registry.update(&token, Stage::Decoded));
        assert!(!registry.fail(&token, "x"));
        assert!(registry.get(&token).is_none());
    }

    #[test]
    fn test_concurrent_workers_and_pollers() {
        let registry = Arc::new(TaskRegistry::new(64));
        let tokens: Vec<_> = (0..8).map(|i| TaskToken::new(format!("w{i}"))).collect();

        std::thread::scope(|scope| {
            for token in &tokens {
                let registry = Arc::clone(&registry);
                scope.spawn(move || {
                    registry.create(token.clone());
                    for stage in [
                        Stage::Deserialized,
                        Stage::Decoded,
                        Stage::Normalized,
                        Stage::Encoded,
                        Stage::Delivered,
                    ] {
                        registry.update(token, stage);
                    }
                });
            }
            for _ in 0..4 {
                let registry = Arc::clone(&registry);
                let tokens = tokens.clone();
                scope.spawn(move || {
                    let mut last = vec![0u8; tokens.len()];
                    for _ in 0..200 {
                        for (i, token) in tokens.iter().enumerate() {
                            if let Some(state) = registry.get(token) {
                                assert!(state.progress >= last[i]);
                                last[i] = state.progress;
                            }
                        }
                    }
                });
            }
        });

        for token in &tokens {
            assert_eq!(registry.get(token).unwrap().progress, 100);
        }
    }
}
