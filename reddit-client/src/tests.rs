#[cfg(test)]
mod tests {
    use crate::rate_limiter::RateLimitConfig;
    use crate::retry::RetryConfig;
    use crate::{AuthState, RedditClient, RedditOAuth2Config, RedditToken};
    use leadwatch_core::{CoreError, PostSource, RedditApiError, RedditConfig};
    use mockito::{Matcher, Server, ServerGuard};
    use std::time::{Duration, SystemTime};

    const USER_AGENT: &str = "leadwatch-test/0.1";

    const TOKEN_BODY: &str =
        r#"{"access_token": "test-token", "token_type": "bearer", "expires_in": 86400, "scope": "*"}"#;

    const LISTING_BODY: &str = r#"{
        "kind": "Listing",
        "data": {
            "after": "t3_b2",
            "before": null,
            "dist": 3,
            "children": [
                {"kind": "t3", "data": {
                    "id": "pin1", "title": "Weekly tutoring thread", "selftext": "Rules",
                    "author": "AutoModerator", "subreddit": "learnmath", "stickied": true,
                    "is_self": true, "created_utc": 1700000000.0,
                    "permalink": "/r/learnmath/comments/pin1/weekly/", "url": "https://www.reddit.com/r/learnmath/comments/pin1/weekly/"
                }},
                {"kind": "t3", "data": {
                    "id": "a1", "title": "Need math help with fractions", "selftext": "My son is in year 4",
                    "author": "parent42", "subreddit": "learnmath", "is_self": true,
                    "created_utc": 1700000100.0, "score": 3, "num_comments": 2,
                    "permalink": "/r/learnmath/comments/a1/need_math_help/", "url": "https://www.reddit.com/r/learnmath/comments/a1/need_math_help/"
                }},
                {"kind": "t3", "data": {
                    "id": "b2", "title": "Cool calculus video", "selftext": "",
                    "author": "viewer", "subreddit": "learnmath", "is_self": false,
                    "created_utc": 1700000200.0, "score": 10, "num_comments": 0,
                    "permalink": "/r/learnmath/comments/b2/cool/", "url": "https://youtube.com/watch?v=x"
                }}
            ]
        }
    }"#;

    fn create_test_config() -> RedditOAuth2Config {
        RedditOAuth2Config::new(
            "test_client_id".to_string(),
            "test_client_secret".to_string(),
            USER_AGENT.to_string(),
        )
    }

    fn client_for(server: &ServerGuard) -> RedditClient {
        let config = create_test_config().with_base_urls(&server.url(), &server.url());
        RedditClient::with_limits(
            config,
            RateLimitConfig::reddit_oauth(),
            RetryConfig {
                max_attempts: 1,
                ..RetryConfig::default()
            },
        )
        .unwrap()
    }

    fn token_expiring_in(lifetime: Duration) -> RedditToken {
        RedditToken {
            access_token: "cached-token".to_string(),
            expires_at: SystemTime::now() + lifetime,
            scope: vec!["read".to_string()],
        }
    }

    async fn mock_token(server: &mut ServerGuard) -> mockito::Mock {
        server
            .mock("POST", "/api/v1/access_token")
            .match_header("authorization", Matcher::Regex("^Basic ".to_string()))
            .match_header("user-agent", USER_AGENT)
            .match_body(Matcher::Regex("grant_type=client_credentials".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(TOKEN_BODY)
            .create_async()
            .await
    }

    #[test]
    fn test_config_creation() {
        let config = create_test_config();
        assert_eq!(config.client_id, "test_client_id");
        assert_eq!(config.client_secret, "test_client_secret");
        assert_eq!(config.api_base_url, "https://oauth.reddit.com");
        assert_eq!(config.auth_base_url, "https://www.reddit.com");
    }

    #[test]
    fn test_config_from_app_config_requires_credentials() {
        let reddit = RedditConfig::default();
        assert!(matches!(
            RedditOAuth2Config::from_config(&reddit),
            Err(CoreError::Config(_))
        ));

        let reddit = RedditConfig {
            client_id: Some("id".to_string()),
            client_secret: Some("secret".to_string()),
            ..RedditConfig::default()
        };
        let config = RedditOAuth2Config::from_config(&reddit).unwrap();
        assert_eq!(config.client_id, "id");
        assert_eq!(config.user_agent, reddit.user_agent);
    }

    #[test]
    fn test_client_creation() {
        let client = RedditClient::new(create_test_config()).unwrap();

        assert!(!client.is_authenticated());
        assert!(!client.needs_refresh());
        assert!(matches!(
            client.get_auth_state(),
            AuthState::NotAuthenticated
        ));
    }

    #[test]
    fn test_invalid_auth_base_is_a_config_error() {
        let config = create_test_config().with_base_urls("https://oauth.reddit.com", "not a url");
        assert!(matches!(
            RedditClient::new(config),
            Err(CoreError::Config(_))
        ));
    }

    #[test]
    fn test_required_scopes() {
        assert_eq!(RedditClient::get_required_scopes(), vec!["read"]);
    }

    #[test]
    fn test_token_expiry_states() {
        let client = RedditClient::new(create_test_config()).unwrap();

        client.set_token(token_expiring_in(Duration::from_secs(3600)));
        assert!(client.is_authenticated());
        assert!(!client.needs_refresh());

        client.set_token(token_expiring_in(Duration::from_secs(30)));
        assert!(client.is_authenticated());
        assert!(client.needs_refresh());

        client.set_token(RedditToken {
            expires_at: SystemTime::now() - Duration::from_secs(1),
            ..token_expiring_in(Duration::ZERO)
        });
        assert!(!client.is_authenticated());
        assert!(matches!(
            client.get_auth_state(),
            AuthState::TokenExpired { .. }
        ));

        client.clear_token();
        assert!(matches!(
            client.get_auth_state(),
            AuthState::NotAuthenticated
        ));
    }

    #[tokio::test]
    async fn test_authenticate_with_client_credentials() {
        let mut server = Server::new_async().await;
        let token_mock = mock_token(&mut server).await;
        let client = client_for(&server);

        tokio_test::assert_ok!(client.authenticate().await);

        token_mock.assert_async().await;
        assert!(client.is_authenticated());
        match client.get_auth_state() {
            AuthState::Authenticated { token } => {
                assert_eq!(token.access_token, "test-token");
                assert_eq!(token.scope, vec!["*".to_string()]);
            }
            other => panic!("Expected authenticated state, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rejected_credentials() {
        let mut server = Server::new_async().await;
        let _token_mock = server
            .mock("POST", "/api/v1/access_token")
            .with_status(401)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error": "invalid_client"}"#)
            .create_async()
            .await;
        let client = client_for(&server);

        let result = client.authenticate().await;
        assert!(matches!(
            result,
            Err(CoreError::RedditApi(RedditApiError::AuthenticationFailed { .. }))
        ));
        assert!(!client.is_authenticated());
    }

    #[tokio::test]
    async fn test_token_endpoint_outage_is_a_server_error() {
        let mut server = Server::new_async().await;
        let _token_mock = server
            .mock("POST", "/api/v1/access_token")
            .with_status(503)
            .with_header("content-type", "text/html")
            .with_body("<html>Our servers are busy</html>")
            .create_async()
            .await;
        let client = client_for(&server);

        let result = client.authenticate().await;
        assert!(matches!(
            result,
            Err(CoreError::RedditApi(RedditApiError::ServerError { status_code: 503 }))
        ));
        assert!(!client.is_authenticated());
    }

    #[tokio::test]
    async fn test_token_request_takes_a_rate_limit_permit() {
        let mut server = Server::new_async().await;
        let _token_mock = mock_token(&mut server).await;
        let client = client_for(&server);

        let before = client.get_rate_limit_status().await;
        tokio_test::assert_ok!(client.authenticate().await);
        let after = client.get_rate_limit_status().await;

        assert_eq!(before.current_window_requests, 0);
        assert_eq!(after.current_window_requests, 1);
        assert_eq!(after.successful_requests, 1);
    }

    #[tokio::test]
    async fn test_ensure_authenticated_reuses_fresh_token() {
        let mut server = Server::new_async().await;
        let token_mock = server
            .mock("POST", "/api/v1/access_token")
            .expect(0)
            .create_async()
            .await;
        let client = client_for(&server);
        client.set_token(token_expiring_in(Duration::from_secs(3600)));

        assert_eq!(client.ensure_authenticated().await.unwrap(), "cached-token");
        token_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_ensure_authenticated_refreshes_expiring_token() {
        let mut server = Server::new_async().await;
        let token_mock = mock_token(&mut server).await;
        let client = client_for(&server);
        client.set_token(token_expiring_in(Duration::from_secs(30)));

        assert_eq!(client.ensure_authenticated().await.unwrap(), "test-token");
        token_mock.assert_async().await;
        assert!(!client.needs_refresh());
    }

    #[tokio::test]
    async fn test_fetch_new_posts() {
        let mut server = Server::new_async().await;
        let _token_mock = mock_token(&mut server).await;
        let listing_mock = server
            .mock("GET", "/r/learnmath/new")
            .match_header("authorization", "Bearer test-token")
            .match_header("user-agent", USER_AGENT)
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("limit".to_string(), "25".to_string()),
                Matcher::UrlEncoded("raw_json".to_string(), "1".to_string()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("x-ratelimit-remaining", "598.0")
            .with_header("x-ratelimit-reset", "120")
            .with_body(LISTING_BODY)
            .create_async()
            .await;
        let client = client_for(&server);

        let posts = client.fetch_new_posts("learnmath", 25).await.unwrap();

        listing_mock.assert_async().await;
        let ids: Vec<&str> = posts.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "b2"]);

        let first = &posts[0];
        assert_eq!(first.author, "parent42");
        assert_eq!(first.content.as_deref(), Some("My son is in year 4"));
        assert_eq!(first.num_comments, 2);
        assert_eq!(first.link(), "https://reddit.com/r/learnmath/comments/a1/need_math_help/");
        assert!(posts[1].content.is_none());

        let metrics = client.get_api_metrics().await;
        assert_eq!(metrics.total_requests, 1);
        assert_eq!(metrics.successful_requests, 1);
        assert!(client
            .export_api_metrics()
            .await
            .unwrap()
            .contains("/r/learnmath/new"));
    }

    #[tokio::test]
    async fn test_subreddit_prefix_is_stripped() {
        let mut server = Server::new_async().await;
        let _token_mock = mock_token(&mut server).await;
        let listing_mock = server
            .mock("GET", "/r/homeworkhelp/new")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"kind": "Listing", "data": {"children": []}}"#)
            .create_async()
            .await;
        let client = client_for(&server);

        let posts = tokio_test::assert_ok!(client.fetch_posts(" r/homeworkhelp ", 10).await);

        assert!(posts.is_empty());
        listing_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rate_limited_response() {
        let mut server = Server::new_async().await;
        let _token_mock = mock_token(&mut server).await;
        let _listing_mock = server
            .mock("GET", "/r/learnmath/new")
            .match_query(Matcher::Any)
            .with_status(429)
            .with_header("retry-after", "7")
            .create_async()
            .await;
        let client = client_for(&server);

        let result = client.fetch_posts("learnmath", 25).await;
        assert!(matches!(
            result,
            Err(CoreError::RedditApi(RedditApiError::RateLimitExceeded { retry_after: 7 }))
        ));

        let metrics = client.get_api_metrics().await;
        assert_eq!(metrics.rate_limited_requests, 1);
        assert_eq!(client.get_rate_limit_status().await.rate_limited_requests, 1);
    }

    #[tokio::test]
    async fn test_missing_subreddit() {
        let mut server = Server::new_async().await;
        let _token_mock = mock_token(&mut server).await;
        let _listing_mock = server
            .mock("GET", "/r/doesnotexist/new")
            .match_query(Matcher::Any)
            .with_status(404)
            .create_async()
            .await;
        let client = client_for(&server);

        let result = client.fetch_posts("doesnotexist", 25).await;
        match result {
            Err(CoreError::RedditApi(RedditApiError::SubredditNotFound { subreddit })) => {
                assert_eq!(subreddit, "doesnotexist");
            }
            other => panic!("Expected SubredditNotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_subreddits_do_not_block_healthy_ones() {
        let mut server = Server::new_async().await;
        let _token_mock = mock_token(&mut server).await;
        let mut gone_mocks = Vec::new();
        for subreddit in ["gone1", "gone2", "gone3"] {
            gone_mocks.push(
                server
                    .mock("GET", format!("/r/{}/new", subreddit).as_str())
                    .match_query(Matcher::Any)
                    .with_status(404)
                    .create_async()
                    .await,
            );
        }
        let _private_mock = server
            .mock("GET", "/r/secret/new")
            .match_query(Matcher::Any)
            .with_status(403)
            .create_async()
            .await;
        let listing_mock = server
            .mock("GET", "/r/learnmath/new")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(LISTING_BODY)
            .create_async()
            .await;

        let config = create_test_config().with_base_urls(&server.url(), &server.url());
        let client = RedditClient::with_limits(
            config,
            RateLimitConfig::reddit_oauth(),
            RetryConfig {
                max_attempts: 1,
                ..RetryConfig::reddit()
            },
        )
        .unwrap();

        for subreddit in ["gone1", "gone2", "gone3"] {
            assert!(matches!(
                client.fetch_posts(subreddit, 25).await,
                Err(CoreError::RedditApi(RedditApiError::SubredditNotFound { .. }))
            ));
        }
        assert!(matches!(
            client.fetch_posts("secret", 25).await,
            Err(CoreError::RedditApi(RedditApiError::Forbidden { .. }))
        ));

        let posts = tokio_test::assert_ok!(client.fetch_posts("learnmath", 25).await);
        assert_eq!(posts.len(), 2);
        listing_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_private_subreddit_is_forbidden() {
        let mut server = Server::new_async().await;
        let _token_mock = mock_token(&mut server).await;
        let _listing_mock = server
            .mock("GET", "/r/secret/new")
            .match_query(Matcher::Any)
            .with_status(403)
            .create_async()
            .await;
        let client = client_for(&server);

        let result = client.fetch_posts("secret", 25).await;
        assert!(matches!(
            result,
            Err(CoreError::RedditApi(RedditApiError::Forbidden { .. }))
        ));
    }

    #[tokio::test]
    async fn test_rejected_token_is_dropped_and_renewed() {
        let mut server = Server::new_async().await;
        let token_mock = server
            .mock("POST", "/api/v1/access_token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(TOKEN_BODY)
            .expect(2)
            .create_async()
            .await;
        let _listing_mock = server
            .mock("GET", "/r/learnmath/new")
            .match_query(Matcher::Any)
            .with_status(401)
            .expect(2)
            .create_async()
            .await;
        let client = client_for(&server);

        let result = client.fetch_posts("learnmath", 25).await;
        assert!(matches!(
            result,
            Err(CoreError::RedditApi(RedditApiError::InvalidToken))
        ));
        assert!(!client.is_authenticated());

        // The next call authenticates again instead of reusing the dead token
        let _ = client.fetch_posts("learnmath", 25).await;
        token_mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_malformed_listing_is_invalid_response() {
        let mut server = Server::new_async().await;
        let _token_mock = mock_token(&mut server).await;
        let _listing_mock = server
            .mock("GET", "/r/learnmath/new")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<html>search results</html>")
            .create_async()
            .await;
        let client = client_for(&server);

        let result = client.fetch_posts("learnmath", 25).await;
        assert!(matches!(
            result,
            Err(CoreError::RedditApi(RedditApiError::InvalidResponse { .. }))
        ));
    }
}
