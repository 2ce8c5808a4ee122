pub mod api;
pub mod metrics;
pub mod rate_limiter;
pub mod retry;

#[cfg(test)]
mod tests;

use api::{RedditApiClient, REDDIT_API_BASE};
use leadwatch_core::{
    ConfigError, CoreError, PostSource, RateLimitSettings, RedditApiError, RedditConfig,
    RedditPost,
};
use metrics::ApiMetrics;
use oauth2::basic::{BasicClient, BasicErrorResponse};
use oauth2::{
    AuthUrl, ClientId, ClientSecret, HttpRequest, HttpResponse, RequestTokenError, Scope,
    TokenResponse, TokenUrl,
};
use rate_limiter::{RateLimitConfig, RateLimitStatus};
use retry::{RetryConfig, RetryExecutor, RetryMetrics};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

pub const REDDIT_AUTH_BASE: &str = "https://www.reddit.com";

/// Tokens this close to expiry are replaced before use.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct RedditOAuth2Config {
    pub client_id: String,
    pub client_secret: String,
    pub user_agent: String,
    pub api_base_url: String,
    pub auth_base_url: String,
    pub request_timeout: Duration,
}

impl RedditOAuth2Config {
    pub fn new(client_id: String, client_secret: String, user_agent: String) -> Self {
        Self {
            client_id,
            client_secret,
            user_agent,
            api_base_url: REDDIT_API_BASE.to_string(),
            auth_base_url: REDDIT_AUTH_BASE.to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(config: &RedditConfig) -> Result<Self, CoreError> {
        let (client_id, client_secret) = config.credentials()?;

        Ok(Self {
            client_id,
            client_secret,
            user_agent: config.user_agent.clone(),
            api_base_url: config.api_base_url.clone(),
            auth_base_url: config.auth_base_url.clone(),
            request_timeout: config.request_timeout(),
        })
    }

    pub fn with_base_urls(mut self, api_base_url: &str, auth_base_url: &str) -> Self {
        self.api_base_url = api_base_url.to_string();
        self.auth_base_url = auth_base_url.to_string();
        self
    }
}

#[derive(Debug, Clone)]
pub struct RedditToken {
    pub access_token: String,
    pub expires_at: SystemTime,
    pub scope: Vec<String>,
}

impl RedditToken {
    pub fn is_expired(&self) -> bool {
        SystemTime::now() >= self.expires_at
    }

    pub fn expires_within(&self, margin: Duration) -> bool {
        SystemTime::now() + margin >= self.expires_at
    }
}

#[derive(Debug, Clone)]
pub enum AuthState {
    NotAuthenticated,
    Authenticated { token: RedditToken },
    TokenExpired { token: RedditToken },
}

async fn send_oauth_request(
    client: &reqwest::Client,
    request: HttpRequest,
) -> Result<HttpResponse, reqwest::Error> {
    let response = client
        .request(request.method, request.url.as_str())
        .headers(request.headers)
        .body(request.body)
        .send()
        .await?;

    // Error pages from an overloaded token endpoint are not credential
    // rejections
    let response = if response.status().is_server_error() {
        response.error_for_status()?
    } else {
        response
    };

    let status_code = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await?.to_vec();

    Ok(HttpResponse {
        status_code,
        headers,
        body,
    })
}

fn token_request_error(error: RequestTokenError<reqwest::Error, BasicErrorResponse>) -> CoreError {
    let reason = match error {
        RequestTokenError::Request(e) if e.is_timeout() => {
            return CoreError::RedditApi(RedditApiError::RequestTimeout)
        }
        RequestTokenError::Request(e) => {
            return match e.status() {
                Some(status) => CoreError::RedditApi(RedditApiError::ServerError {
                    status_code: status.as_u16(),
                }),
                None => CoreError::Network(e),
            }
        }
        RequestTokenError::ServerResponse(response) => response.to_string(),
        RequestTokenError::Parse(e, _) => format!("unreadable token response: {}", e),
        RequestTokenError::Other(message) => message,
    };
    CoreError::RedditApi(RedditApiError::AuthenticationFailed { reason })
}

fn invalid_url(field: &str, value: &str) -> CoreError {
    CoreError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    })
}

/// Application-only Reddit client.
///
/// Authenticates with the client-credentials grant, keeps the bearer token
/// fresh, and fetches subreddit listings through the rate limiter and the
/// retry executor.
#[derive(Debug)]
pub struct RedditClient {
    config: RedditOAuth2Config,
    oauth_client: BasicClient,
    http_client: reqwest::Client,
    api_client: RedditApiClient,
    retry: RetryExecutor,
    token: RwLock<Option<RedditToken>>,
}

impl RedditClient {
    pub fn new(config: RedditOAuth2Config) -> Result<Self, CoreError> {
        Self::with_limits(config, RateLimitConfig::reddit_oauth(), RetryConfig::reddit())
    }

    pub fn from_settings(
        config: RedditOAuth2Config,
        settings: &RateLimitSettings,
    ) -> Result<Self, CoreError> {
        Self::with_limits(
            config,
            RateLimitConfig::from_settings(settings),
            RetryConfig::from_settings(settings),
        )
    }

    pub fn with_limits(
        config: RedditOAuth2Config,
        rate_config: RateLimitConfig,
        retry_config: RetryConfig,
    ) -> Result<Self, CoreError> {
        let auth_base = config.auth_base_url.trim_end_matches('/');
        let auth_url = format!("{}/api/v1/authorize", auth_base);
        let token_url = format!("{}/api/v1/access_token", auth_base);

        let oauth_client = BasicClient::new(
            ClientId::new(config.client_id.clone()),
            Some(ClientSecret::new(config.client_secret.clone())),
            AuthUrl::new(auth_url.clone()).map_err(|_| invalid_url("reddit.auth_base_url", &auth_url))?,
            Some(
                TokenUrl::new(token_url.clone())
                    .map_err(|_| invalid_url("reddit.auth_base_url", &token_url))?,
            ),
        );

        // Token endpoints must not be followed across redirects
        let http_client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        let api_client = RedditApiClient::new(
            &config.user_agent,
            &config.api_base_url,
            config.request_timeout,
            rate_config,
        )?;

        Ok(Self {
            config,
            oauth_client,
            http_client,
            api_client,
            retry: RetryExecutor::new(retry_config),
            token: RwLock::new(None),
        })
    }

    pub fn get_required_scopes() -> Vec<&'static str> {
        vec!["read"]
    }

    fn read_token(&self) -> RwLockReadGuard<'_, Option<RedditToken>> {
        self.token.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_token(&self) -> RwLockWriteGuard<'_, Option<RedditToken>> {
        self.token.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get_auth_state(&self) -> AuthState {
        match self.read_token().as_ref() {
            None => AuthState::NotAuthenticated,
            Some(token) if token.is_expired() => AuthState::TokenExpired {
                token: token.clone(),
            },
            Some(token) => AuthState::Authenticated {
                token: token.clone(),
            },
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.get_auth_state(), AuthState::Authenticated { .. })
    }

    /// True when a token is held but expires within the refresh margin.
    pub fn needs_refresh(&self) -> bool {
        self.read_token()
            .as_ref()
            .is_some_and(|token| token.expires_within(TOKEN_REFRESH_MARGIN))
    }

    pub fn set_token(&self, token: RedditToken) {
        *self.write_token() = Some(token);
    }

    pub fn clear_token(&self) {
        *self.write_token() = None;
    }

    /// Requests a new application-only token.
    pub async fn authenticate(&self) -> Result<(), CoreError> {
        info!("Requesting Reddit access token for client {}", self.config.client_id);

        let scopes = Self::get_required_scopes()
            .into_iter()
            .map(|scope| Scope::new(scope.to_string()));
        let http_client = &self.http_client;

        let permit = self.api_client.acquire_permit().await;
        debug!(
            "Acquired rate limit permit for token request after {:?}",
            permit.queue_wait_time
        );

        let result = self
            .oauth_client
            .exchange_client_credentials()
            .add_scopes(scopes)
            .request_async(|request| send_oauth_request(http_client, request))
            .await;
        self.api_client.record_outcome(result.is_ok(), false).await;
        let response = result.map_err(token_request_error)?;

        let lifetime = response.expires_in().unwrap_or(DEFAULT_TOKEN_LIFETIME);
        let scope = response
            .scopes()
            .map(|scopes| scopes.iter().map(|s| s.to_string()).collect())
            .unwrap_or_else(|| {
                Self::get_required_scopes()
                    .into_iter()
                    .map(str::to_string)
                    .collect()
            });

        self.set_token(RedditToken {
            access_token: response.access_token().secret().clone(),
            expires_at: SystemTime::now() + lifetime,
            scope,
        });

        info!("Reddit access token acquired, valid for {:?}", lifetime);
        Ok(())
    }

    /// Access token that stays valid for at least the refresh margin.
    pub async fn ensure_authenticated(&self) -> Result<String, CoreError> {
        if let Some(token) = self.read_token().as_ref() {
            if !token.expires_within(TOKEN_REFRESH_MARGIN) {
                return Ok(token.access_token.clone());
            }
            debug!("Reddit access token is about to expire, refreshing");
        }

        self.authenticate().await?;

        self.read_token()
            .as_ref()
            .map(|token| token.access_token.clone())
            .ok_or_else(|| {
                CoreError::RedditApi(RedditApiError::AuthenticationFailed {
                    reason: "no token after authentication".to_string(),
                })
            })
    }

    /// Newest posts of `subreddit`, pinned posts excluded.
    pub async fn fetch_posts(&self, subreddit: &str, limit: u32) -> Result<Vec<RedditPost>, CoreError> {
        let subreddit = subreddit.trim().trim_start_matches("r/");
        let access_token = self.ensure_authenticated().await?;
        let operation = format!("fetch r/{}", subreddit);

        let listing = match self
            .retry
            .execute(&operation, || {
                self.api_client
                    .get_new_posts(&access_token, subreddit, limit, None)
            })
            .await
        {
            Ok(listing) => listing,
            Err(e @ CoreError::RedditApi(RedditApiError::InvalidToken)) => {
                warn!("Reddit rejected the access token, it will be renewed on next use");
                self.clear_token();
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let posts: Vec<RedditPost> = listing
            .data
            .children
            .into_iter()
            .map(|child| child.data)
            .filter(|post| !post.id.is_empty() && !post.stickied)
            .map(RedditPost::from)
            .collect();

        debug!("r/{} yielded {} posts", subreddit, posts.len());
        Ok(posts)
    }

    pub async fn get_api_metrics(&self) -> ApiMetrics {
        self.api_client.get_metrics().await
    }

    pub async fn export_api_metrics(&self) -> Result<String, CoreError> {
        self.api_client.export_metrics().await
    }

    pub async fn get_rate_limit_status(&self) -> RateLimitStatus {
        self.api_client.get_rate_limit_status().await
    }

    pub fn get_retry_metrics(&self) -> RetryMetrics {
        self.retry.get_metrics()
    }
}

impl PostSource for RedditClient {
    async fn fetch_new_posts(&self, subreddit: &str, limit: u32) -> Result<Vec<RedditPost>, CoreError> {
        self.fetch_posts(subreddit, limit).await
    }
}
