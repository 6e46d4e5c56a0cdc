//! Launch handoff to the external program launcher.

use std::collections::{BTreeMap, HashSet, VecDeque};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::core::{Job, LaunchError, Notification, ProgramId, ScheduleId, SchedulerError};

/// System argument carrying the schedule name.
pub const SCHEDULE_NAME_ARG: &str = "schedule.name";
/// System argument carrying the notifications that satisfied the trigger.
pub const TRIGGERING_NOTIFICATIONS_ARG: &str = "triggering.notifications";

/// A request to launch one program run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchRequest {
    /// Idempotency key, `<job key>#<sequence>`.
    pub launch_id: String,
    /// Schedule that fired.
    pub schedule_id: ScheduleId,
    /// Program to launch.
    pub program: ProgramId,
    /// Schedule properties.
    pub user_args: BTreeMap<String, String>,
    /// Scheduler-provided arguments.
    pub system_args: BTreeMap<String, String>,
    /// Notifications that satisfied the trigger.
    pub notifications: Vec<Notification>,
}

impl LaunchRequest {
    /// Request for a job cleared for launch.
    pub fn for_job(job: &Job) -> Result<Self, SchedulerError> {
        let mut system_args = BTreeMap::new();
        system_args.insert(SCHEDULE_NAME_ARG.to_string(), job.schedule.name.clone());
        system_args.insert(
            TRIGGERING_NOTIFICATIONS_ARG.to_string(),
            serde_json::to_string(&job.satisfied_by)?,
        );
        Ok(Self {
            launch_id: job.launch_id(),
            schedule_id: job.schedule_id.clone(),
            program: job.schedule.program.clone(),
            user_args: job.schedule.properties.clone(),
            system_args,
            notifications: job.satisfied_by.clone(),
        })
    }
}

/// Accepts launch handoffs.
///
/// Called only for launches whose staging transaction has committed, so a request is
/// never a speculative one. Handing off the same `launch_id` twice must return
/// [`LaunchError::Duplicate`].
pub trait ProgramLauncher: Send + Sync {
    /// Hand off a launch.
    fn launch(&self, request: LaunchRequest) -> Result<(), LaunchError>;
}

struct SeenIds {
    order: VecDeque<String>,
    ids: HashSet<String>,
}

/// Launcher forwarding requests onto a tokio channel.
///
/// Remembers the most recent `capacity` launch ids to reject duplicates.
pub struct ChannelLauncher {
    sender: mpsc::UnboundedSender<LaunchRequest>,
    seen: Mutex<SeenIds>,
    capacity: usize,
}

impl ChannelLauncher {
    /// Launcher and the receiving end of its channel.
    pub fn new(capacity: usize) -> (Self, mpsc::UnboundedReceiver<LaunchRequest>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let launcher = Self {
            sender,
            seen: Mutex::new(SeenIds {
                order: VecDeque::new(),
                ids: HashSet::new(),
            }),
            capacity: capacity.max(1),
        };
        (launcher, receiver)
    }
}

impl ProgramLauncher for ChannelLauncher {
    fn launch(&self, request: LaunchRequest) -> Result<(), LaunchError> {
        let mut seen = self.seen.lock();
        if seen.ids.contains(&request.launch_id) {
            return Err(LaunchError::Duplicate(request.launch_id));
        }
        let launch_id = request.launch_id.clone();
        self.sender
            .send(request)
            .map_err(|_| LaunchError::Rejected("launch channel closed".into()))?;
        seen.ids.insert(launch_id.clone());
        seen.order.push_back(launch_id);
        while seen.order.len() > self.capacity {
            if let Some(evicted) = seen.order.pop_front() {
                seen.ids.remove(&evicted);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ApplicationId, ProgramType};

    fn request(id: &str) -> LaunchRequest {
        let app = ApplicationId::new("ns", "app");
        LaunchRequest {
            launch_id: id.into(),
            schedule_id: app.schedule("s"),
            program: app.program(ProgramType::Workflow, "wf"),
            user_args: BTreeMap::new(),
            system_args: BTreeMap::new(),
            notifications: Vec::new(),
        }
    }

    #[test]
    fn duplicate_launch_ids_are_rejected() {
        let (launcher, mut rx) = ChannelLauncher::new(2);
        launcher.launch(request("a#0")).unwrap();
        assert_eq!(
            launcher.launch(request("a#0")),
            Err(LaunchError::Duplicate("a#0".into()))
        );
        launcher.launch(request("a#1")).unwrap();
        launcher.launch(request("a#2")).unwrap();
        // a#0 has been evicted from the dedupe window.
        launcher.launch(request("a#0")).unwrap();
        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 4);
    }

    #[test]
    fn closed_channel_rejects() {
        let (launcher, rx) = ChannelLauncher::new(8);
        drop(rx);
        assert!(matches!(launcher.launch(request("a#0")), Err(LaunchError::Rejected(_))));
    }
}
