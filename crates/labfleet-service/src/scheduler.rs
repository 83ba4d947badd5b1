//! Task scheduler seam for DUT preparation after a deploy.
//!
//! Deploying a DUT adds it to the inventory and then schedules a
//! preparation task on the DUT's drone. Only the scheduling interface
//! lives here; [`StaticScheduler`] records tasks in process.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ServiceError, ServiceResult};

pub type SchedulerFuture<'a, T> = Pin<Box<dyn Future<Output = ServiceResult<T>> + Send + 'a>>;

/// Steps a preparation task runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentActions {
    pub stage_image_to_usb: bool,
    pub install_firmware: bool,
    pub install_test_image: bool,
}

impl DeploymentActions {
    /// Comma-separated action list passed to the task, e.g. `stage-usb,install-firmware`.
    pub fn task_args(&self) -> String {
        [
            (self.stage_image_to_usb, "stage-usb"),
            (self.install_firmware, "install-firmware"),
            (self.install_test_image, "install-test-image"),
        ]
        .iter()
        .filter(|(on, _)| *on)
        .map(|(_, arg)| *arg)
        .collect::<Vec<_>>()
        .join(",")
    }
}

/// State of a scheduled task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Completed { failed: bool },
    /// Anything the scheduler reports that is none of the above.
    Other(String),
}

pub trait TaskScheduler: Send + Sync {
    /// Schedule a preparation task for `dut_id`; returns the task id.
    fn schedule_preparation<'a>(&'a self, dut_id: &'a str, actions: &'a DeploymentActions) -> SchedulerFuture<'a, String>;

    fn task_state<'a>(&'a self, task_id: &'a str) -> SchedulerFuture<'a, TaskState>;
}

/// A task recorded by [`StaticScheduler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
    pub id: String,
    pub dut_id: String,
    pub args: String,
}

/// In-process scheduler. Tasks stay `Pending` until their state is set.
#[derive(Default)]
pub struct StaticScheduler {
    inner: Mutex<SchedulerInner>,
}

#[derive(Default)]
struct SchedulerInner {
    tasks: Vec<ScheduledTask>,
    states: HashMap<String, TaskState>,
    failures: usize,
}

impl StaticScheduler {
    fn lock(&self) -> MutexGuard<'_, SchedulerInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn tasks(&self) -> Vec<ScheduledTask> {
        self.lock().tasks.clone()
    }

    pub fn set_state(&self, task_id: &str, state: TaskState) {
        self.lock().states.insert(task_id.to_string(), state);
    }

    /// Fail the next `times` scheduling calls.
    pub fn fail_times(&self, times: usize) {
        self.lock().failures = times;
    }
}

impl TaskScheduler for StaticScheduler {
    fn schedule_preparation<'a>(&'a self, dut_id: &'a str, actions: &'a DeploymentActions) -> SchedulerFuture<'a, String> {
        Box::pin(async move {
            let mut inner = self.lock();
            if inner.failures > 0 {
                inner.failures -= 1;
                warn!(%dut_id, "injected scheduling failure");
                return Err(ServiceError::Scheduler("injected failure".to_string()));
            }
            let id = format!("task-{}", inner.tasks.len() + 1);
            let args = actions.task_args();
            debug!(task_id = %id, %dut_id, %args, "preparation task recorded");
            inner.tasks.push(ScheduledTask {
                id: id.clone(),
                dut_id: dut_id.to_string(),
                args,
            });
            Ok(id)
        })
    }

    fn task_state<'a>(&'a self, task_id: &'a str) -> SchedulerFuture<'a, TaskState> {
        Box::pin(async move {
            let inner = self.lock();
            if !inner.tasks.iter().any(|t| t.id == task_id) {
                return Err(ServiceError::Scheduler(format!("unknown task {task_id}")));
            }
            Ok(inner.states.get(task_id).cloned().unwrap_or(TaskState::Pending))
        })
    }
}
