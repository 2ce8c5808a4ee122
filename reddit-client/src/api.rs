use crate::metrics::{ApiMetrics, MetricsCollector, RequestMetrics};
use crate::rate_limiter::{RateLimitConfig, RateLimitPermit, RateLimitStatus, RateLimiter};
use leadwatch_core::{ConfigError, CoreError, RedditApiError, RedditPost};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub const REDDIT_API_BASE: &str = "https://oauth.reddit.com";

/// Reddit accepts at most 100 items per listing page.
pub const MAX_LISTING_LIMIT: u32 = 100;

const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Reddit's budget window is ten minutes; a longer reset is not believable.
const MAX_SERVER_RESET_SECS: f64 = 600.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListing<T> {
    pub kind: String,
    pub data: RedditListingData<T>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListingData<T> {
    pub children: Vec<RedditListingChild<T>>,
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub before: Option<String>,
    #[serde(default)]
    pub dist: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditListingChild<T> {
    pub kind: String,
    pub data: T,
}

/// The parts of a `t3` (link) object we read. Reddit omits or nulls fields
/// freely, so everything but the id has a default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RedditPostData {
    pub id: String,
    pub title: String,
    pub selftext: String,
    pub author: String,
    pub subreddit: String,
    pub url: String,
    pub permalink: String,
    pub created_utc: f64,
    pub score: i32,
    pub num_comments: u32,
    pub over_18: bool,
    pub stickied: bool,
    pub is_self: bool,
}

impl From<RedditPostData> for RedditPost {
    fn from(post_data: RedditPostData) -> Self {
        Self {
            id: post_data.id,
            title: post_data.title,
            content: if post_data.is_self && !post_data.selftext.is_empty() {
                Some(post_data.selftext)
            } else {
                None
            },
            subreddit: post_data.subreddit,
            author: post_data.author,
            url: post_data.url,
            permalink: post_data.permalink,
            created_utc: post_data.created_utc as i64,
            score: post_data.score,
            num_comments: post_data.num_comments,
        }
    }
}

/// Budget Reddit reports in its `x-ratelimit-*` response headers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServerRateLimit {
    pub remaining: f64,
    pub reset_after: Duration,
}

impl ServerRateLimit {
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let header = |name: &str| headers.get(name)?.to_str().ok()?.trim().parse::<f64>().ok();

        let remaining = header("x-ratelimit-remaining")?;
        // max() maps NaN to zero, min() caps inf
        let reset_secs = header("x-ratelimit-reset")
            .unwrap_or(0.0)
            .max(0.0)
            .min(MAX_SERVER_RESET_SECS);

        Some(Self {
            remaining,
            reset_after: Duration::from_secs_f64(reset_secs),
        })
    }
}

fn retry_after_secs(headers: &HeaderMap) -> u64 {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

/// `/r/{name}/...` endpoints name the subreddit they address.
fn subreddit_in(endpoint: &str) -> Option<&str> {
    endpoint
        .strip_prefix("/r/")
        .and_then(|rest| rest.split('/').next())
        .filter(|name| !name.is_empty())
}

/// Maps a non-success status to the error callers branch on.
pub fn error_for_status(status: StatusCode, headers: &HeaderMap, endpoint: &str) -> RedditApiError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => RedditApiError::RateLimitExceeded {
            retry_after: retry_after_secs(headers),
        },
        StatusCode::UNAUTHORIZED => RedditApiError::InvalidToken,
        StatusCode::FORBIDDEN => RedditApiError::Forbidden {
            resource: endpoint.to_string(),
        },
        StatusCode::NOT_FOUND => match subreddit_in(endpoint) {
            Some(subreddit) => RedditApiError::SubredditNotFound {
                subreddit: subreddit.to_string(),
            },
            None => RedditApiError::InvalidResponse {
                details: format!("{} not found", endpoint),
            },
        },
        status if status.is_server_error() => RedditApiError::ServerError {
            status_code: status.as_u16(),
        },
        status => RedditApiError::InvalidResponse {
            details: format!("unexpected status {} for {}", status, endpoint),
        },
    }
}

/// Authenticated HTTP access to the Reddit data API.
///
/// Every request passes through the rate limiter and is recorded in the
/// metrics collector, whatever its outcome.
#[derive(Debug)]
pub struct RedditApiClient {
    http_client: Client,
    base_url: String,
    rate_limiter: RateLimiter,
    metrics: MetricsCollector,
}

impl RedditApiClient {
    pub fn new(
        user_agent: &str,
        base_url: &str,
        timeout: Duration,
        rate_config: RateLimitConfig,
    ) -> Result<Self, CoreError> {
        let parsed = url::Url::parse(base_url).map_err(|_| ConfigError::InvalidValue {
            field: "reddit.api_base_url".to_string(),
            value: base_url.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidValue {
                field: "reddit.api_base_url".to_string(),
                value: base_url.to_string(),
            }
            .into());
        }

        let http_client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            rate_limiter: RateLimiter::new(rate_config),
            metrics: MetricsCollector::new(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Permit for a request sent outside `make_request`, such as the token
    /// exchange.
    pub async fn acquire_permit(&self) -> RateLimitPermit {
        self.rate_limiter.acquire_permit().await
    }

    pub async fn record_outcome(&self, success: bool, rate_limited: bool) {
        self.rate_limiter.record_outcome(success, rate_limited).await;
    }

    pub async fn make_request(
        &self,
        method: Method,
        endpoint: &str,
        access_token: &str,
        query_params: &[(&str, &str)],
    ) -> Result<Response, CoreError> {
        let url = format!("{}{}", self.base_url, endpoint);

        let permit = self.rate_limiter.acquire_permit().await;
        debug!(
            "Acquired rate limit permit for {} {} after {:?}",
            method, endpoint, permit.queue_wait_time
        );

        let start_time = Instant::now();
        let sent = self
            .http_client
            .request(method.clone(), &url)
            .bearer_auth(access_token)
            .query(query_params)
            .send()
            .await;
        let response_time = start_time.elapsed();

        let (outcome, status_code) = match sent {
            Ok(response) => {
                let status = response.status();

                if let Some(budget) = ServerRateLimit::from_headers(response.headers()) {
                    debug!(
                        "Reddit budget: {} requests left, resets in {:?}",
                        budget.remaining, budget.reset_after
                    );
                    self.rate_limiter
                        .observe_server_budget(budget.remaining, budget.reset_after)
                        .await;
                }

                let outcome = if status.is_success() {
                    Ok(response)
                } else {
                    let api_error = error_for_status(status, response.headers(), endpoint);
                    error!("Request failed with status {} for {}", status, endpoint);
                    Err(CoreError::RedditApi(api_error))
                };
                (outcome, Some(status.as_u16()))
            }
            Err(e) if e.is_timeout() => {
                warn!("Request to {} timed out after {:?}", endpoint, response_time);
                (Err(CoreError::RedditApi(RedditApiError::RequestTimeout)), None)
            }
            Err(e) => {
                error!("Network error for {} {}: {}", method, endpoint, e);
                (Err(CoreError::Network(e)), None)
            }
        };

        let rate_limited = matches!(
            outcome,
            Err(CoreError::RedditApi(RedditApiError::RateLimitExceeded { .. }))
        );
        let error_type = outcome.as_ref().err().map(|e| match e {
            CoreError::RedditApi(RedditApiError::RequestTimeout) => "timeout".to_string(),
            CoreError::Network(_) => "network_error".to_string(),
            _ => format!("http_{}", status_code.unwrap_or_default()),
        });

        self.rate_limiter
            .record_outcome(outcome.is_ok(), rate_limited)
            .await;
        self.metrics
            .record_request(RequestMetrics {
                endpoint: endpoint.to_string(),
                method: method.to_string(),
                status_code,
                response_time,
                success: outcome.is_ok(),
                rate_limited,
                error_type,
            })
            .await;

        outcome
    }

    /// Newest submissions of `subreddit`, newest first.
    pub async fn get_new_posts(
        &self,
        access_token: &str,
        subreddit: &str,
        limit: u32,
        after: Option<&str>,
    ) -> Result<RedditListing<RedditPostData>, CoreError> {
        let endpoint = format!("/r/{}/new", subreddit);
        let limit = limit.clamp(1, MAX_LISTING_LIMIT).to_string();
        let mut params = vec![("limit", limit.as_str()), ("raw_json", "1")];
        if let Some(after) = after {
            params.push(("after", after));
        }

        let response = self
            .make_request(Method::GET, &endpoint, access_token, &params)
            .await?;

        let listing: RedditListing<RedditPostData> = response.json().await.map_err(|e| {
            error!("Failed to parse posts for r/{}: {}", subreddit, e);
            RedditApiError::InvalidResponse {
                details: format!("Failed to parse posts for r/{}", subreddit),
            }
        })?;

        info!(
            "Retrieved {} posts from r/{}",
            listing.data.children.len(),
            subreddit
        );
        Ok(listing)
    }

    pub async fn get_metrics(&self) -> ApiMetrics {
        self.metrics.get_metrics().await
    }

    pub async fn export_metrics(&self) -> Result<String, CoreError> {
        Ok(self.metrics.export_metrics().await?)
    }

    pub async fn get_rate_limit_status(&self) -> RateLimitStatus {
        self.rate_limiter.get_rate_limit_status().await
    }
}
