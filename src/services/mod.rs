use std::sync::Arc;

use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

pub mod actions;
pub mod low_stock;
pub mod scanner;

pub use actions::{ActionError, MedicineActions, Took};
pub use low_stock::LowStockAlerts;
pub use scanner::{ReminderScanner, ScanReport, ZeroStockPolicy};

/// Second 0 of every minute, so each cycle reads a fresh `HH:MM`.
pub const EVERY_MINUTE: &str = "0 * * * * *";

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Scheduler error: {0}")]
    Cron(#[from] JobSchedulerError),
    #[error("Scheduler is already running")]
    AlreadyRunning,
}

/// Owns the periodic reminder job and its lifecycle.
///
/// Built once at startup around a [`ReminderScanner`]; `start` registers a
/// cron job that calls [`ReminderScanner::tick`], `stop` shuts the job
/// scheduler down again.
pub struct ReminderScheduler {
    scanner: Arc<ReminderScanner>,
    schedule: String,
    sched: Option<JobScheduler>,
}

impl ReminderScheduler {
    pub fn new(scanner: Arc<ReminderScanner>, schedule: impl Into<String>) -> Self {
        Self {
            scanner,
            schedule: schedule.into(),
            sched: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.sched.is_some()
    }

    /// Creates the job scheduler, adds the reminder job and starts ticking.
    pub async fn start(&mut self) -> Result<(), SchedulerError> {
        if self.sched.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        let sched = JobScheduler::new().await?;

        let scanner = self.scanner.clone();
        let job = Job::new_async(self.schedule.as_str(), move |_uuid, _l| {
            let scanner = scanner.clone();
            Box::pin(async move {
                scanner.tick().await;
            })
        })
        .map_err(|e| {
            log::error!("Failed to create reminder job: {}", e);
            e
        })?;

        sched.add(job).await.map_err(|e| {
            log::error!("Failed to add reminder job to scheduler: {}", e);
            e
        })?;

        sched.start().await?;
        self.sched = Some(sched);

        log::info!("Reminder scheduler started ({})", self.schedule);
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<(), SchedulerError> {
        if let Some(mut sched) = self.sched.take() {
            sched.shutdown().await?;
            log::info!("Reminder scheduler stopped");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::MemoryStore;
    use crate::notify::RecordingNotifier;

    fn scheduler(schedule: &str) -> ReminderScheduler {
        let scanner = ReminderScanner::new(
            Arc::new(MemoryStore::new()),
            Arc::new(RecordingNotifier::new()),
            Arc::new(FixedClock::new("08:00")),
            ZeroStockPolicy::default(),
        );
        ReminderScheduler::new(Arc::new(scanner), schedule)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn start_and_stop_toggle_the_lifecycle() {
        let mut sched = scheduler(EVERY_MINUTE);
        assert!(!sched.is_running());

        sched.start().await.unwrap();
        assert!(sched.is_running());
        assert!(matches!(
            sched.start().await,
            Err(SchedulerError::AlreadyRunning)
        ));

        sched.stop().await.unwrap();
        assert!(!sched.is_running());
    }

    #[tokio::test]
    async fn invalid_cron_expression_is_rejected() {
        let mut sched = scheduler("every minute please");
        assert!(sched.start().await.is_err());
        assert!(!sched.is_running());
    }
}
