use crate::config::RemoteProvider;
use crate::coordinator::{Coordinator, LOCAL_JOB_NAME};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Local,
    Remote,
}

#[derive(Debug, Clone)]
pub(crate) enum JobTarget {
    Local,
    Remote(RemoteProvider),
}

/// Live view of one registered schedule entry.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub schedule: String,
    pub next: Option<DateTime<Utc>>,
    pub prev: Option<DateTime<Utc>>,
}

/// One `HH:MM` entry bound to its backup target.
///
/// Entries with the same name share `in_flight`, so a slow run is never overlapped by
/// the next fire of the same source.
#[derive(Debug)]
pub(crate) struct ScheduledJob {
    pub name: String,
    pub schedule: String,
    pub target: JobTarget,
    in_flight: Arc<AtomicBool>,
    prev: Mutex<Option<DateTime<Utc>>>,
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ScheduledJob {
    pub fn local(schedule: &str, in_flight: Arc<AtomicBool>) -> Self {
        Self::new(LOCAL_JOB_NAME, schedule, JobTarget::Local, in_flight)
    }

    pub fn remote(provider: &RemoteProvider, schedule: &str, in_flight: Arc<AtomicBool>) -> Self {
        Self::new(
            &provider.name,
            schedule,
            JobTarget::Remote(provider.clone()),
            in_flight,
        )
    }

    fn new(name: &str, schedule: &str, target: JobTarget, in_flight: Arc<AtomicBool>) -> Self {
        Self {
            name: name.to_string(),
            schedule: schedule.to_string(),
            target,
            in_flight,
            prev: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> JobKind {
        match self.target {
            JobTarget::Local => JobKind::Local,
            JobTarget::Remote(_) => JobKind::Remote,
        }
    }

    pub fn prev(&self) -> Option<DateTime<Utc>> {
        *self.prev.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self, next: Option<DateTime<Utc>>) -> JobStatus {
        JobStatus {
            name: self.name.clone(),
            kind: self.kind(),
            schedule: self.schedule.clone(),
            next,
            prev: self.prev(),
        }
    }

    /// Handle one cron tick. Failures end up in logs and notifications only.
    pub async fn fire(&self, coordinator: &Coordinator) {
        *self.prev.lock().unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());

        if self.in_flight.swap(true, Ordering::AcqRel) {
            warn!(job = %self.name, "Skipping scheduled run: job already running");
            return;
        }
        let _in_flight = InFlight(&self.in_flight);

        match &self.target {
            JobTarget::Local => coordinator.run_scheduled_local().await,
            JobTarget::Remote(provider) => coordinator.run_scheduled_remote(provider).await,
        }
    }
}
