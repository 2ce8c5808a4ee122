use crate::{CoreError, RedditPost};

/// Anything that can list a subreddit's newest posts.
///
/// The poll loop is generic over this so it can run against the live
/// Reddit client or a fixed set of posts.
pub trait PostSource {
    async fn fetch_new_posts(
        &self,
        subreddit: &str,
        limit: u32,
    ) -> Result<Vec<RedditPost>, CoreError>;
}
