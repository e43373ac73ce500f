//! The Scheduler Loop (C11, §4.11): polls CrawlPolicy/RefreshPolicy/
//! ScheduleTask rows and fires crawl or refresh tasks through the
//! `PipelineManager` when they're due.

use chrono::{DateTime, Utc};
use sitesearch_broker::QueueBroker;
use sitesearch_common::model::{CrawlPolicy, RefreshPolicy, ScheduleTask, ScheduleVariant};
use sitesearch_common::Result;
use sitesearch_manager::{CrawlTaskRequest, PipelineManager};
use sitesearch_storage::Storage;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How many URLs a refresh task's crawl task is allowed to ingest. The
/// refresh worker feeds its frontier itself (§4.9), so this is just a
/// safety ceiling rather than a meaningful crawl-size target.
const REFRESH_TASK_MAX_URLS: u32 = u32::MAX;

pub struct Scheduler {
    storage: Storage,
    broker: QueueBroker,
    manager: Arc<PipelineManager>,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(storage: Storage, broker: QueueBroker, manager: Arc<PipelineManager>, poll_interval_secs: u64) -> Self {
        Self {
            storage,
            broker,
            manager,
            poll_interval: Duration::from_secs(poll_interval_secs.max(1)),
        }
    }

    /// Poll at `poll_interval_secs` until `cancel` fires (§4.11).
    pub async fn run_loop(&self, cancel: CancellationToken) {
        loop {
            if let Err(e) = self.tick(Utc::now()).await {
                error!(error = %e, "scheduler tick failed");
            }
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = cancel.cancelled() => {
                    info!("scheduler loop stopped");
                    return;
                }
            }
        }
    }

    /// One evaluation pass over every enabled policy, as of `now`.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<()> {
        self.fire_crawl_policies(now).await?;
        self.fire_refresh_policies(now).await?;
        Ok(())
    }

    async fn fire_crawl_policies(&self, now: DateTime<Utc>) -> Result<()> {
        let policies = self.storage.list_crawl_policies(None).await?;
        let schedule_tasks = self.storage.list_schedule_tasks().await?;

        for policy in &policies {
            let due_tasks: Vec<&ScheduleTask> = schedule_tasks
                .iter()
                .filter(|t| t.crawl_policy_id == policy.id)
                .filter(|t| schedule_task_fires(t, policy.last_executed, now))
                .collect();

            let should_fire = policy.last_executed.is_none() || !due_tasks.is_empty();
            if !should_fire {
                continue;
            }

            if let Err(e) = self.fire_crawl_policy(policy, now).await {
                error!(crawl_policy_id = policy.id, error = %e, "failed to fire crawl policy");
                continue;
            }

            for task in due_tasks {
                let next_run = compute_next_run(task, now);
                if let Err(e) = self.storage.record_schedule_run(task.id, now, next_run).await {
                    error!(schedule_task_id = task.id, error = %e, "failed to record schedule run");
                }
            }
        }
        Ok(())
    }

    async fn fire_crawl_policy(&self, policy: &CrawlPolicy, now: DateTime<Utc>) -> Result<()> {
        for start_url in &policy.start_urls {
            let req = CrawlTaskRequest {
                site_id: policy.site_id.clone(),
                start_url: start_url.clone(),
                max_depth: policy.max_depth,
                max_urls: policy.max_urls,
                include_patterns: policy.include_patterns.clone(),
                exclude_patterns: policy.exclude_patterns.clone(),
                crawler_type: policy.crawler_type,
                discover_sitemap: true,
            };
            let task_id = self.manager.create_crawl_task(req).await?;
            info!(crawl_policy_id = policy.id, site_id = %policy.site_id, %task_id, "fired crawl policy");
        }
        self.storage.touch_crawl_policy_executed(policy.id, now).await?;
        Ok(())
    }

    async fn fire_refresh_policies(&self, now: DateTime<Utc>) -> Result<()> {
        let policies = self.storage.list_refresh_policies().await?;
        for policy in &policies {
            let due = policy.last_refresh.is_none()
                || policy.next_refresh.map(|next| next <= now).unwrap_or(true);
            if !due {
                continue;
            }
            if let Err(e) = self.fire_refresh_policy(policy, now).await {
                error!(refresh_policy_id = policy.id, error = %e, "failed to fire refresh policy");
            }
        }
        Ok(())
    }

    /// Dispatch a refresh task (§4.9): create an update crawl task to own
    /// the frontier, push the RefreshTask envelope, and advance the
    /// policy's timestamps. The refresh worker re-advances `next_refresh`
    /// once it has actually enqueued URLs (§4.9 final step); this keeps
    /// the scheduler from re-firing every poll while a refresh task sits
    /// unprocessed in the queue.
    async fn fire_refresh_policy(&self, policy: &RefreshPolicy, now: DateTime<Utc>) -> Result<()> {
        let task_id = self
            .manager
            .create_crawl_update_task(policy.site_id.clone(), REFRESH_TASK_MAX_URLS)
            .await?;

        let refresh_task = sitesearch_common::model::RefreshTask {
            site_id: policy.site_id.clone(),
            crawl_task_id: task_id,
            strategy: policy.strategy,
            url_patterns: policy.include_patterns.clone(),
            exclude_patterns: policy.exclude_patterns.clone(),
            max_age_days: policy.max_age_days,
            priority_patterns: policy.priority_patterns.clone(),
        };
        self.broker.enqueue("refresh", refresh_task).await?;

        let next_refresh = now + chrono::Duration::days(policy.refresh_interval_days as i64);
        self.storage.update_refresh_schedule(&policy.site_id, now, next_refresh).await?;
        info!(refresh_policy_id = policy.id, site_id = %policy.site_id, %task_id, "fired refresh policy");
        Ok(())
    }
}

/// A bound `ScheduleTask`'s own firing predicate, independent of whether
/// its parent `CrawlPolicy` has ever run (§4.11).
fn schedule_task_fires(task: &ScheduleTask, policy_last_executed: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    if !task.enabled {
        return false;
    }
    if let Some(start) = task.start_date {
        if now < start {
            return false;
        }
    }
    if let Some(end) = task.end_date {
        if now > end {
            return false;
        }
    }
    if let Some(max_runs) = task.max_runs {
        if task.run_count >= max_runs {
            return false;
        }
    }

    match &task.variant {
        ScheduleVariant::Once { one_time_date } => task.last_run.is_none() && *one_time_date <= now,
        ScheduleVariant::Interval { interval_seconds } => {
            let base = match (task.last_run, policy_last_executed) {
                (None, None) => return true,
                (Some(a), Some(b)) => a.max(b),
                (Some(a), None) => a,
                (None, Some(b)) => b,
            };
            (now - base).num_seconds() >= *interval_seconds
        }
        ScheduleVariant::Cron { cron_expression } => match task.next_run {
            Some(next_run) => next_run <= now,
            None => next_run_for_cron(cron_expression, now).map(|n| n <= now).unwrap_or(false),
        },
    }
}

/// Recompute `next_run` for a fired `ScheduleTask`, resolving the cron
/// variant via the real `cron` crate (§9 Open Question 4).
fn compute_next_run(task: &ScheduleTask, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match &task.variant {
        ScheduleVariant::Once { .. } => None,
        ScheduleVariant::Interval { interval_seconds } => Some(now + chrono::Duration::seconds(*interval_seconds)),
        ScheduleVariant::Cron { cron_expression } => next_run_for_cron(cron_expression, now),
    }
}

fn next_run_for_cron(expression: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match cron::Schedule::from_str(expression) {
        Ok(schedule) => schedule.after(&after).next(),
        Err(e) => {
            warn!(expression, error = %e, "invalid cron expression");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitesearch_common::model::RefreshStrategy;

    fn base_task(variant: ScheduleVariant) -> ScheduleTask {
        ScheduleTask {
            id: 1,
            crawl_policy_id: 1,
            variant,
            start_date: None,
            end_date: None,
            last_run: None,
            next_run: None,
            run_count: 0,
            max_runs: None,
            enabled: true,
        }
    }

    #[test]
    fn once_fires_only_before_first_run() {
        let now = Utc::now();
        let mut task = base_task(ScheduleVariant::Once { one_time_date: now - chrono::Duration::seconds(1) });
        assert!(schedule_task_fires(&task, Some(now), now));
        task.last_run = Some(now);
        assert!(!schedule_task_fires(&task, Some(now), now));
    }

    #[test]
    fn once_does_not_fire_before_its_date() {
        let now = Utc::now();
        let task = base_task(ScheduleVariant::Once { one_time_date: now + chrono::Duration::hours(1) });
        assert!(!schedule_task_fires(&task, Some(now), now));
    }

    #[test]
    fn interval_fires_immediately_with_no_prior_timestamps() {
        let now = Utc::now();
        let task = base_task(ScheduleVariant::Interval { interval_seconds: 3600 });
        assert!(schedule_task_fires(&task, None, now));
    }

    #[test]
    fn interval_waits_for_the_full_window() {
        let now = Utc::now();
        let mut task = base_task(ScheduleVariant::Interval { interval_seconds: 3600 });
        task.last_run = Some(now - chrono::Duration::minutes(30));
        assert!(!schedule_task_fires(&task, Some(now - chrono::Duration::hours(2)), now));

        task.last_run = Some(now - chrono::Duration::hours(2));
        assert!(schedule_task_fires(&task, None, now));
    }

    #[test]
    fn interval_uses_the_later_of_last_run_and_policy_last_executed() {
        let now = Utc::now();
        let task = base_task(ScheduleVariant::Interval { interval_seconds: 60 });
        // No last_run yet, but the policy itself only just ran: too soon.
        assert!(!schedule_task_fires(&task, Some(now - chrono::Duration::seconds(10)), now));
    }

    #[test]
    fn disabled_or_expired_tasks_never_fire() {
        let now = Utc::now();
        let mut task = base_task(ScheduleVariant::Interval { interval_seconds: 1 });
        task.enabled = false;
        assert!(!schedule_task_fires(&task, None, now));

        let mut task = base_task(ScheduleVariant::Interval { interval_seconds: 1 });
        task.end_date = Some(now - chrono::Duration::days(1));
        assert!(!schedule_task_fires(&task, None, now));

        let mut task = base_task(ScheduleVariant::Interval { interval_seconds: 1 });
        task.max_runs = Some(5);
        task.run_count = 5;
        assert!(!schedule_task_fires(&task, None, now));
    }

    #[test]
    fn cron_next_run_resolves_a_valid_expression() {
        let now = Utc::now();
        // Seconds-included 6-field cron: every minute.
        let next = next_run_for_cron("0 * * * * *", now);
        assert!(next.is_some());
        assert!(next.unwrap() > now);
    }

    #[test]
    fn cron_next_run_rejects_garbage() {
        assert!(next_run_for_cron("not a cron expression", Utc::now()).is_none());
    }

    #[test]
    fn compute_next_run_clears_once_and_advances_interval() {
        let now = Utc::now();
        let once = base_task(ScheduleVariant::Once { one_time_date: now });
        assert_eq!(compute_next_run(&once, now), None);

        let interval = base_task(ScheduleVariant::Interval { interval_seconds: 120 });
        let next = compute_next_run(&interval, now).unwrap();
        assert_eq!((next - now).num_seconds(), 120);
    }

    #[test]
    fn refresh_strategy_roundtrips_through_task_payload() {
        // Sanity check the RefreshTask construction used by fire_refresh_policy.
        let task = sitesearch_common::model::RefreshTask {
            site_id: "site_a".to_string(),
            crawl_task_id: uuid::Uuid::new_v4(),
            strategy: RefreshStrategy::Incremental,
            url_patterns: vec![],
            exclude_patterns: vec![],
            max_age_days: Some(30),
            priority_patterns: vec![],
        };
        assert_eq!(task.strategy, RefreshStrategy::Incremental);
    }
}
