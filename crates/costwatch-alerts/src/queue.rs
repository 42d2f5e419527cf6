//! Task fan-out.
//!
//! Refreshes and digests are scheduled as independent tasks. Delivery is
//! at-least-once: a worker may re-enqueue a task that failed, and every task is
//! safe to run twice.

use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::context::RequestContext;
use crate::error::Result;

/// A schedulable unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Task {
    /// Evaluate one alert.
    RefreshAlert {
        /// The alert to refresh.
        alert_id: String,
    },
    /// Send one customer's digest.
    SendDigest {
        /// The customer to notify.
        customer_id: String,
    },
}

impl Task {
    /// Creates a refresh task.
    pub fn refresh(alert_id: impl Into<String>) -> Self {
        Self::RefreshAlert {
            alert_id: alert_id.into(),
        }
    }

    /// Creates a digest task.
    pub fn digest(customer_id: impl Into<String>) -> Self {
        Self::SendDigest {
            customer_id: customer_id.into(),
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RefreshAlert { alert_id } => write!(f, "refresh-alert/{alert_id}"),
            Self::SendDigest { customer_id } => write!(f, "send-digest/{customer_id}"),
        }
    }
}

/// Accepts tasks for later execution.
pub trait TaskQueue: Send + Sync + fmt::Debug {
    /// Enqueues a task.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Queue` if the task cannot be accepted.
    fn enqueue(&self, ctx: &RequestContext, task: Task) -> Result<()>;
}

/// An in-process FIFO [`TaskQueue`].
#[derive(Debug, Default)]
pub struct MemoryTaskQueue {
    tasks: Mutex<VecDeque<Task>>,
}

impl MemoryTaskQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the oldest task.
    pub fn pop(&self) -> Option<Task> {
        self.tasks.lock().pop_front()
    }

    /// Takes every queued task, oldest first.
    pub fn drain(&self) -> Vec<Task> {
        self.tasks.lock().drain(..).collect()
    }

    /// Number of queued tasks.
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}

impl TaskQueue for MemoryTaskQueue {
    fn enqueue(&self, ctx: &RequestContext, task: Task) -> Result<()> {
        ctx.check()?;
        self.tasks.lock().push_back(task);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AlertError;

    #[test]
    fn fifo_order() {
        let queue = MemoryTaskQueue::new();
        let ctx = RequestContext::new();
        queue.enqueue(&ctx, Task::refresh("a1")).unwrap();
        queue.enqueue(&ctx, Task::digest("c1")).unwrap();
        queue.enqueue(&ctx, Task::refresh("a2")).unwrap();

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop(), Some(Task::refresh("a1")));
        assert_eq!(queue.drain(), vec![Task::digest("c1"), Task::refresh("a2")]);
        assert!(queue.is_empty());
    }

    #[test]
    fn cancelled_enqueue_is_rejected() {
        let queue = MemoryTaskQueue::new();
        let ctx = RequestContext::new();
        ctx.cancel();
        assert!(matches!(
            queue.enqueue(&ctx, Task::refresh("a1")),
            Err(AlertError::Cancelled)
        ));
        assert!(queue.is_empty());
    }

    #[test]
    fn task_wire_format() {
        let json = serde_json::to_value(Task::refresh("a1")).unwrap();
        assert_eq!(json["kind"], "refresh_alert");
        assert_eq!(json["alert_id"], "a1");
        assert_eq!(Task::digest("c1").to_string(), "send-digest/c1");
    }
}
