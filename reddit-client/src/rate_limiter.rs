use leadwatch_core::RateLimitSettings;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub time_window: Duration,
    pub burst_allowance: u32,
}

impl RateLimitConfig {
    pub fn reddit_oauth() -> Self {
        Self {
            max_requests: 100, // Reddit allows 100 requests per minute for OAuth2
            time_window: Duration::from_secs(60), // 1 minute window
            burst_allowance: 10, // Allow small bursts up to 10 requests
        }
    }

    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        Self {
            max_requests: settings.max_requests_per_minute,
            time_window: Duration::from_secs(60),
            burst_allowance: settings.burst_allowance,
        }
    }

    /// Tokens added per second.
    pub fn refill_rate(&self) -> f64 {
        self.max_requests as f64 / self.time_window.as_secs_f64()
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<BucketState>,
    capacity: f64,
    refill_rate: f64, // tokens per second
}

impl TokenBucket {
    pub fn new(config: &RateLimitConfig) -> Self {
        let capacity = config.burst_allowance as f64;

        Self {
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_rate: config.refill_rate(),
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill);
        state.tokens = (state.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.capacity);
        state.last_refill = now;
    }

    /// Take `tokens_needed` tokens, or report how long until they exist.
    pub async fn acquire(&self, tokens_needed: f64) -> Result<(), Duration> {
        let mut state = self.state.lock().await;
        self.refill(&mut state);

        if state.tokens >= tokens_needed {
            state.tokens -= tokens_needed;
            Ok(())
        } else {
            let missing = tokens_needed - state.tokens;
            Err(Duration::from_secs_f64(missing / self.refill_rate))
        }
    }

    pub async fn get_available_tokens(&self) -> f64 {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        state.tokens
    }
}

/// Client-side request budget.
///
/// Every outgoing call takes one token from a bucket holding at most
/// `burst_allowance` tokens and refilling at `max_requests / time_window`,
/// so over any span `T` at most `burst_allowance + rate * T` calls go out.
/// When Reddit reports its own budget as spent, acquisition also waits for
/// the server's reset.
#[derive(Debug)]
pub struct RateLimiter {
    token_bucket: TokenBucket,
    config: RateLimitConfig,
    window_tracker: Mutex<WindowTracker>,
    server_blocked_until: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let token_bucket = TokenBucket::new(&config);
        let window_tracker = Mutex::new(WindowTracker::new(config.time_window));

        Self {
            token_bucket,
            config,
            window_tracker,
            server_blocked_until: Mutex::new(None),
        }
    }

    pub async fn acquire_permit(&self) -> RateLimitPermit {
        let start_time = Instant::now();

        let blocked_until = self.server_blocked_until.lock().await.take();
        if let Some(until) = blocked_until {
            if until > Instant::now() {
                tracing::warn!(
                    "Reddit reported no remaining request budget, waiting {:?}",
                    until - Instant::now()
                );
                tokio::time::sleep_until(until).await;
            }
        }

        // Try to acquire token, wait if necessary
        loop {
            match self.token_bucket.acquire(1.0).await {
                Ok(()) => break,
                Err(wait_time) => {
                    tracing::debug!("Rate limit reached, waiting {:?}", wait_time);
                    sleep(wait_time).await;
                }
            }
        }

        self.window_tracker.lock().await.record_request();

        RateLimitPermit {
            queue_wait_time: start_time.elapsed(),
        }
    }

    /// Feed back the `x-ratelimit-remaining` / `x-ratelimit-reset` values
    /// Reddit attaches to every response.
    pub async fn observe_server_budget(&self, remaining: f64, reset_after: Duration) {
        if remaining < 1.0 {
            *self.server_blocked_until.lock().await = Some(Instant::now() + reset_after);
        }
    }

    pub async fn record_outcome(&self, success: bool, rate_limited: bool) {
        let mut tracker = self.window_tracker.lock().await;
        if success {
            tracker.record_success();
        }
        if rate_limited {
            tracker.record_rate_limited();
        }
    }

    pub async fn get_rate_limit_status(&self) -> RateLimitStatus {
        let available_tokens = self.token_bucket.get_available_tokens().await;
        let window_stats = self.window_tracker.lock().await.get_current_window_stats();

        let estimated_wait_time = if available_tokens < 1.0 {
            Some(Duration::from_secs_f64(
                (1.0 - available_tokens) / self.config.refill_rate(),
            ))
        } else {
            None
        };

        RateLimitStatus {
            available_tokens: available_tokens as u32,
            max_tokens: self.config.burst_allowance,
            requests_per_window: self.config.max_requests,
            current_window_requests: window_stats.request_count,
            successful_requests: window_stats.successful_requests,
            rate_limited_requests: window_stats.rate_limited_requests,
            is_near_limit: available_tokens < (self.config.burst_allowance as f64 * 0.2),
            estimated_wait_time,
        }
    }
}

#[derive(Debug)]
pub struct RateLimitPermit {
    pub queue_wait_time: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub available_tokens: u32,
    pub max_tokens: u32,
    pub requests_per_window: u32,
    pub current_window_requests: u32,
    pub successful_requests: u32,
    pub rate_limited_requests: u32,
    pub is_near_limit: bool,
    pub estimated_wait_time: Option<Duration>,
}

impl RateLimitStatus {
    pub fn utilization_percentage(&self) -> f64 {
        if self.max_tokens == 0 {
            return 0.0;
        }
        let used_tokens = self.max_tokens.saturating_sub(self.available_tokens);
        (used_tokens as f64 / self.max_tokens as f64) * 100.0
    }

    pub fn requests_remaining_in_window(&self) -> u32 {
        self.requests_per_window
            .saturating_sub(self.current_window_requests)
    }
}

#[derive(Debug)]
pub struct WindowTracker {
    window_duration: Duration,
    window_start: Instant,
    current_window: WindowStats,
}

#[derive(Debug, Clone, Default)]
pub struct WindowStats {
    pub request_count: u32,
    pub successful_requests: u32,
    pub rate_limited_requests: u32,
}

impl WindowTracker {
    pub fn new(window_duration: Duration) -> Self {
        Self {
            window_duration,
            window_start: Instant::now(),
            current_window: WindowStats::default(),
        }
    }

    pub fn record_request(&mut self) {
        self.ensure_current_window();
        self.current_window.request_count += 1;
    }

    pub fn record_success(&mut self) {
        self.ensure_current_window();
        self.current_window.successful_requests += 1;
    }

    pub fn record_rate_limited(&mut self) {
        self.ensure_current_window();
        self.current_window.rate_limited_requests += 1;
    }

    pub fn get_current_window_stats(&self) -> WindowStats {
        self.current_window.clone()
    }

    fn ensure_current_window(&mut self) {
        if self.window_start.elapsed() >= self.window_duration {
            self.window_start = Instant::now();
            self.current_window = WindowStats::default();
        }
    }
}
