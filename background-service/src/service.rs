use crate::budget::NotificationBudget;
use crate::notifier::Notifier;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use database::{Database, LAST_POLL_SETTING};
use lead_filter::LeadFilter;
use leadwatch_core::{AppConfig, CoreError, ErrorExt, PostSource, SeenPost};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub subreddits: Vec<String>,
    pub posts_per_subreddit: u32,
    pub poll_interval: Duration,
    pub subreddit_delay: Duration,
}

impl ServiceSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            subreddits: config.subreddits.clone(),
            posts_per_subreddit: config.polling.posts_per_subreddit,
            poll_interval: config.polling.interval(),
            subreddit_delay: config.polling.subreddit_delay(),
        }
    }
}

/// What one poll cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub subreddits_polled: usize,
    pub subreddit_errors: usize,
    pub posts_fetched: usize,
    pub already_seen: usize,
    pub new_posts: usize,
    pub leads_found: usize,
    pub notified: usize,
    pub deferred: usize,
    pub notification_failures: usize,
}

/// Polls subreddits, filters posts into leads, and notifies the operator.
pub struct BackgroundService<S, N> {
    source: S,
    notifier: N,
    filter: LeadFilter,
    database: Database,
    budget: NotificationBudget,
    settings: ServiceSettings,
}

impl<S, N> BackgroundService<S, N>
where
    S: PostSource,
    N: Notifier,
{
    pub fn new(
        source: S,
        notifier: N,
        filter: LeadFilter,
        database: Database,
        budget: NotificationBudget,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            source,
            notifier,
            filter,
            database,
            budget,
            settings,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Loads the last 24 hours of notifications so a restart does not
    /// reset the daily cap.
    pub async fn restore_budget(&mut self, now: DateTime<Utc>) -> Result<(), CoreError> {
        let since = now - ChronoDuration::hours(24);
        let sent = self.database.notified_since(since).await?;
        debug!("{} notifications sent in the last 24 hours", sent.len());
        self.budget.restore(sent);
        Ok(())
    }

    /// Runs a single poll over every configured subreddit, then notifies
    /// every lead still queued in the database.
    ///
    /// A subreddit that fails to load is skipped until the next cycle. A post
    /// is evaluated only the first time its id is recorded as seen, so it can
    /// surface at most once across cycles and restarts. Leads are queued in
    /// the same transaction that marks their post seen, so a cycle aborted by
    /// a storage error leaves them for the next cycle to notify.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleReport, CoreError> {
        let mut report = CycleReport::default();
        self.budget.start_cycle();

        for (index, subreddit) in self.settings.subreddits.iter().enumerate() {
            if index > 0 && !self.settings.subreddit_delay.is_zero() {
                sleep(self.settings.subreddit_delay).await;
            }

            let posts = match self
                .source
                .fetch_new_posts(subreddit, self.settings.posts_per_subreddit)
                .await
            {
                Ok(posts) => posts,
                Err(e) => {
                    warn!(
                        subreddit = %subreddit,
                        code = %e.error_code(),
                        "Skipping subreddit this cycle: {}",
                        e.user_friendly_message()
                    );
                    report.subreddit_errors += 1;
                    continue;
                }
            };

            report.subreddits_polled += 1;
            report.posts_fetched += posts.len();

            for post in posts {
                let lead = self.filter.evaluate(&post, now);
                let seen = SeenPost::new(&post, now, lead.is_some());

                if !self.database.record_post(&seen, lead.as_ref()).await? {
                    report.already_seen += 1;
                    continue;
                }
                report.new_posts += 1;
                if lead.is_some() {
                    report.leads_found += 1;
                }
            }
        }

        self.dispatch(now, &mut report).await?;

        if report.deferred > 0 {
            info!(
                "{} leads over the notification budget; see `leadwatch leads`",
                report.deferred
            );
        }

        self.database
            .save_setting(LAST_POLL_SETTING, &now.to_rfc3339())
            .await?;

        info!(
            polled = report.subreddits_polled,
            errors = report.subreddit_errors,
            fetched = report.posts_fetched,
            new = report.new_posts,
            leads = report.leads_found,
            notified = report.notified,
            deferred = report.deferred,
            "Poll cycle complete"
        );
        Ok(report)
    }

    /// Works through the queued leads, highest priority first. Each one is
    /// taken off the queue once it is delivered, deferred by the budget, or
    /// its delivery fails.
    async fn dispatch(&mut self, now: DateTime<Utc>, report: &mut CycleReport) -> Result<(), CoreError> {
        for lead in self.database.pending_leads().await? {
            if !self.budget.has_capacity(now) {
                self.database.mark_dispatched(&lead.post.id).await?;
                report.deferred += 1;
                continue;
            }

            match self.notifier.notify(&lead).await {
                Ok(()) => {
                    self.budget.record(now);
                    self.database.mark_notified(&lead.post.id, now).await?;
                    report.notified += 1;
                }
                Err(e) => {
                    e.log_warn();
                    warn!(
                        post_id = %lead.post.id,
                        backend = self.notifier.name(),
                        "Lead stored but notification failed"
                    );
                    self.database.mark_dispatched(&lead.post.id).await?;
                    report.notification_failures += 1;
                }
            }
        }

        debug!(
            "{} notifications left in the rolling 24 hours",
            self.budget.remaining_today(now)
        );
        Ok(())
    }

    /// Polls every `poll_interval` until `shutdown` resolves. A cycle in
    /// progress is always finished before stopping.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<(), CoreError>
    where
        F: Future<Output = ()>,
    {
        self.restore_budget(Utc::now()).await?;
        tokio::pin!(shutdown);

        info!(
            "Polling {} subreddits every {:?}",
            self.settings.subreddits.len(),
            self.settings.poll_interval
        );

        loop {
            if let Err(e) = self.run_cycle(Utc::now()).await {
                e.log_error();
                warn!("Poll cycle aborted, retrying after the interval");
            }

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping poll loop");
                    break;
                }
                _ = sleep(self.settings.poll_interval) => {}
            }
        }

        Ok(())
    }
}
