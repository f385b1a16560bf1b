//! Periodic refresh of the cached usage counts shown in listings

use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::usage::UsageTracker;

pub struct UsageRefresher {
    usage: UsageTracker,
}

impl UsageRefresher {
    pub fn new(usage: UsageTracker) -> Self {
        Self { usage }
    }

    pub async fn refresh_once(&self) {
        match self.usage.refresh_all().await {
            Ok(snapshots) => info!("Usage refresh job updated {} media type(s)", snapshots.len()),
            Err(e) => error!("Failed to refresh usage counts: {}", e),
        }
    }

    /// Start a scheduler running the refresh on `schedule` (six-field cron)
    ///
    /// The returned scheduler must be kept alive for the job to keep firing.
    pub async fn start(self, schedule: &str) -> Result<JobScheduler> {
        let usage = self.usage;
        let scheduler = JobScheduler::new().await?;

        let job = Job::new_async(schedule, move |_, _| {
            let refresher = UsageRefresher::new(usage.clone());
            Box::pin(async move {
                refresher.refresh_once().await;
            })
        })?;

        scheduler.add(job).await?;
        scheduler.start().await?;

        info!("Started usage refresh scheduler with schedule: {}", schedule);
        Ok(scheduler)
    }
}
