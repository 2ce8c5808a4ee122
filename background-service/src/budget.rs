use chrono::{DateTime, Duration, Utc};
use leadwatch_core::NotificationConfig;
use std::collections::VecDeque;

/// Caps notifications per poll cycle and per rolling 24 hours.
#[derive(Debug, Clone)]
pub struct NotificationBudget {
    max_per_cycle: u32,
    max_per_day: u32,
    sent_this_cycle: u32,
    recent: VecDeque<DateTime<Utc>>,
}

impl NotificationBudget {
    pub fn new(max_per_cycle: u32, max_per_day: u32) -> Self {
        Self {
            max_per_cycle,
            max_per_day,
            sent_this_cycle: 0,
            recent: VecDeque::new(),
        }
    }

    pub fn from_config(config: &NotificationConfig) -> Self {
        Self::new(config.max_per_cycle, config.max_per_day)
    }

    fn window() -> Duration {
        Duration::hours(24)
    }

    /// Seeds the rolling window with earlier notification times, e.g. from a
    /// previous run.
    pub fn restore<I>(&mut self, times: I)
    where
        I: IntoIterator<Item = DateTime<Utc>>,
    {
        let mut times: Vec<_> = times.into_iter().collect();
        times.sort();
        self.recent = times.into();
    }

    pub fn start_cycle(&mut self) {
        self.sent_this_cycle = 0;
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Self::window();
        while self.recent.front().is_some_and(|sent| *sent <= cutoff) {
            self.recent.pop_front();
        }
    }

    pub fn has_capacity(&mut self, now: DateTime<Utc>) -> bool {
        self.prune(now);
        self.sent_this_cycle < self.max_per_cycle && (self.recent.len() as u32) < self.max_per_day
    }

    pub fn record(&mut self, now: DateTime<Utc>) {
        self.sent_this_cycle += 1;
        self.recent.push_back(now);
    }

    pub fn remaining_today(&mut self, now: DateTime<Utc>) -> u32 {
        self.prune(now);
        self.max_per_day.saturating_sub(self.recent.len() as u32)
    }
}
