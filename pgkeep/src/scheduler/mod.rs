//! Cron-driven backup triggers.
//!
//! Each configured `HH:MM` entry becomes a daily cron job in the configured timezone.
//! Fires run through the [`Coordinator`], which gates them on the restore lock.

mod job;

pub use job::{JobKind, JobStatus};

use crate::config::parse_schedule_time;
use crate::coordinator::Coordinator;
use crate::utils::errors::SchedulerError;
use job::ScheduledJob;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::task::TaskTracker;
use tracing::{debug, info};
use uuid::Uuid;

/// Six-field cron expression (seconds first) firing daily at `HH:MM`.
pub fn cron_expression(schedule: &str) -> Result<String, SchedulerError> {
    let (hour, minute) =
        parse_schedule_time(schedule).ok_or_else(|| SchedulerError::InvalidSchedule {
            schedule: schedule.to_string(),
        })?;
    Ok(format!("0 {} {} * * *", minute, hour))
}

pub struct Scheduler {
    cron: Mutex<JobScheduler>,
    coordinator: Arc<Coordinator>,
    jobs: std::sync::Mutex<Vec<(Uuid, Arc<ScheduledJob>)>>,
    fires: TaskTracker,
    started: AtomicBool,
}

impl Scheduler {
    pub async fn new(coordinator: Arc<Coordinator>) -> Result<Self, SchedulerError> {
        let cron = JobScheduler::new().await?;
        Ok(Self {
            cron: Mutex::new(cron),
            coordinator,
            jobs: std::sync::Mutex::new(Vec::new()),
            fires: TaskTracker::new(),
            started: AtomicBool::new(false),
        })
    }

    /// Register every local and enabled-provider schedule, then start ticking.
    ///
    /// All schedules are converted before anything is registered, so one malformed
    /// entry leaves the scheduler empty.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(SchedulerError::AlreadyStarted);
        }

        let planned = match self.plan() {
            Ok(planned) => planned,
            Err(e) => {
                self.started.store(false, Ordering::Release);
                return Err(e);
            }
        };
        self.register(planned).await
    }

    /// Add each `(cron expression, job)` pair and start the cron loop.
    async fn register(
        &self,
        planned: Vec<(String, Arc<ScheduledJob>)>,
    ) -> Result<(), SchedulerError> {
        let timezone = self.coordinator.timezone();
        let cron = self.cron.lock().await;
        let mut registered = Vec::with_capacity(planned.len());
        for (expression, job) in planned {
            let coordinator = self.coordinator.clone();
            let fires = self.fires.clone();
            let fired = job.clone();
            let cron_job =
                Job::new_async_tz(expression.as_str(), timezone, move |_uuid, _lock| {
                    let coordinator = coordinator.clone();
                    let job = fired.clone();
                    let fires = fires.clone();
                    Box::pin(async move {
                        fires.track_future(job.fire(&coordinator)).await;
                    })
                })?;
            let id = cron_job.guid();
            cron.add(cron_job).await?;
            info!(job = %job.name, schedule = %job.schedule, cron = %expression, "Job scheduled");
            registered.push((id, job));
        }
        cron.start().await?;

        let count = registered.len();
        *self.jobs.lock().unwrap_or_else(PoisonError::into_inner) = registered;
        info!(count, timezone = %timezone, "Cron schedules initialized");
        Ok(())
    }

    fn plan(&self) -> Result<Vec<(String, Arc<ScheduledJob>)>, SchedulerError> {
        let config = self.coordinator.config();
        let mut flags: HashMap<String, Arc<AtomicBool>> = HashMap::new();
        let mut flag_for = |name: &str| flags.entry(name.to_string()).or_default().clone();

        let mut planned = Vec::new();
        for schedule in &config.local.schedule {
            let job = ScheduledJob::local(schedule, flag_for(crate::coordinator::LOCAL_JOB_NAME));
            planned.push((cron_expression(schedule)?, Arc::new(job)));
        }
        for provider in config.enabled_providers() {
            for schedule in &provider.schedule {
                let job = ScheduledJob::remote(provider, schedule, flag_for(&provider.name));
                planned.push((cron_expression(schedule)?, Arc::new(job)));
            }
        }
        Ok(planned)
    }

    /// Registered jobs with their next and previous fire times.
    pub async fn jobs_status(&self) -> Vec<JobStatus> {
        let jobs = self
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut cron = self.cron.lock().await;
        let mut statuses = Vec::with_capacity(jobs.len());
        for (id, job) in jobs {
            match cron.next_tick_for_job(id).await {
                Ok(Some(next)) => statuses.push(job.status(Some(next))),
                Ok(None) => debug!(job = %job.name, "No upcoming tick, omitting from status"),
                Err(e) => debug!(job = %job.name, "Job not found in cron registry: {}", e),
            }
        }
        statuses
    }

    pub fn running_jobs(&self) -> usize {
        self.coordinator.running_jobs()
    }

    /// Stop ticking and wait for fires already in progress.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        self.cron.lock().await.shutdown().await?;
        self.fires.close();
        self.fires.wait().await;
        info!("Scheduler stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::testing::fixture;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use std::time::Duration;

    #[test]
    fn test_cron_expression() {
        assert_eq!(cron_expression("02:00").unwrap(), "0 0 2 * * *");
        assert_eq!(cron_expression("23:45").unwrap(), "0 45 23 * * *");
        for bad in ["2:00", "24:00", "12:60", "noon", ""] {
            assert!(matches!(
                cron_expression(bad),
                Err(SchedulerError::InvalidSchedule { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_start_registers_local_and_remote_jobs() {
        let fx = fixture("printf rows", |c| {
            c.local.schedule = vec!["02:00".to_string(), "14:00".to_string()];
        });
        let scheduler = Scheduler::new(Arc::new(fx.coordinator)).await.unwrap();
        scheduler.start().await.unwrap();

        let mut statuses = scheduler.jobs_status().await;
        statuses.sort_by(|a, b| (&a.name, &a.schedule).cmp(&(&b.name, &b.schedule)));
        let summary: Vec<(&str, JobKind, &str)> = statuses
            .iter()
            .map(|s| (s.name.as_str(), s.kind, s.schedule.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("local", JobKind::Local, "02:00"),
                ("local", JobKind::Local, "14:00"),
                ("offsite", JobKind::Remote, "03:00"),
            ]
        );
        assert!(statuses.iter().all(|s| s.next.is_some() && s.prev.is_none()));
        assert_eq!(scheduler.running_jobs(), 0);

        scheduler.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_schedule_aborts_start() {
        let fx = fixture("printf rows", |c| {
            c.local.schedule = vec!["02:00".to_string(), "25:00".to_string()];
        });
        let scheduler = Scheduler::new(Arc::new(fx.coordinator)).await.unwrap();

        let err = scheduler.start().await.unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::InvalidSchedule { ref schedule } if schedule == "25:00"
        ));
        assert!(scheduler.jobs_status().await.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_providers_not_scheduled() {
        let fx = fixture("printf rows", |c| {
            c.providers[0].enabled = false;
        });
        let scheduler = Scheduler::new(Arc::new(fx.coordinator)).await.unwrap();
        scheduler.start().await.unwrap();
        assert!(scheduler.jobs_status().await.is_empty());
        scheduler.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_waits_for_running_fire() {
        let fx = fixture("sleep 2; printf rows", |c| c.providers.clear());
        let backups = fx.backups();
        let scheduler = Scheduler::new(Arc::new(fx.coordinator)).await.unwrap();
        let every_second = ScheduledJob::local("every second", Arc::default());
        scheduler
            .register(vec![("* * * * * *".to_string(), Arc::new(every_second))])
            .await
            .unwrap();

        let mut waited = 0;
        while scheduler.running_jobs() == 0 && waited < 100 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            waited += 1;
        }
        assert_eq!(scheduler.running_jobs(), 1, "no fire started");

        scheduler.stop().await.unwrap();
        assert_eq!(scheduler.running_jobs(), 0);

        let files: Vec<_> = std::fs::read_dir(&backups)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(files.len(), 1);
        let mut plain = String::new();
        GzDecoder::new(std::fs::File::open(&files[0]).unwrap())
            .read_to_string(&mut plain)
            .unwrap();
        assert_eq!(plain, "rows");
    }

    #[tokio::test]
    async fn test_start_twice_rejected() {
        let fx = fixture("printf rows", |_| {});
        let scheduler = Scheduler::new(Arc::new(fx.coordinator)).await.unwrap();
        scheduler.start().await.unwrap();
        assert!(matches!(
            scheduler.start().await,
            Err(SchedulerError::AlreadyStarted)
        ));
        scheduler.stop().await.unwrap();
    }
}
