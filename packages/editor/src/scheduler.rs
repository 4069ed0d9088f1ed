//! # Task Queue
//!
//! Deferred commits run on an explicit single-threaded queue instead of a
//! platform microtask. The host drains it with [`TaskQueue::run_until_idle`]
//! before handling the next external event, so every update issued in one
//! synchronous turn lands in a single commit.
//!
//! Editors built with a clone of the same queue share it.

use crate::errors::EditorError;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use tracing::debug;

type Task = Box<dyn FnOnce() -> Result<(), EditorError>>;

#[derive(Clone, Default)]
pub struct TaskQueue {
    tasks: Rc<RefCell<VecDeque<Task>>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&self, task: impl FnOnce() -> Result<(), EditorError> + 'static) {
        self.tasks.borrow_mut().push_back(Box::new(task));
    }

    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    /// Run tasks until the queue is empty, including tasks scheduled while
    /// draining. Stops at the first failing task and leaves the rest queued.
    pub fn run_until_idle(&self) -> Result<usize, EditorError> {
        let mut ran = 0;
        loop {
            // Pop before running so a task can schedule more work
            let next = self.tasks.borrow_mut().pop_front();
            let Some(task) = next else {
                break;
            };
            task()?;
            ran += 1;
        }
        if ran > 0 {
            debug!(tasks = ran, "Task queue drained");
        }
        Ok(ran)
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("pending", &self.len())
            .finish()
    }
}
