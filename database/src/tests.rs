#[cfg(test)]
mod tests {
    use crate::{Database, LeadQuery, LAST_POLL_SETTING};
    use chrono::{DateTime, Duration, Utc};
    use leadwatch_core::{
        CoreError, DatabaseError, GradeLevel, Lead, LeadStatus, RedditPost, SeenPost, Topic,
    };
    use std::env;

    async fn setup_test_db() -> Database {
        let db_path = env::temp_dir().join(format!("test_leadwatch_{}.db", uuid::Uuid::new_v4()));
        let db_url = format!("sqlite://{}", db_path.display());

        let mut db = Database::new(db_url);
        db.connect()
            .await
            .expect("Failed to connect to test database");
        db.run_migrations().await.expect("Failed to run migrations");

        db
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn post(id: &str, created_utc: i64) -> RedditPost {
        RedditPost {
            id: id.to_string(),
            title: format!("Looking for a math tutor ({})", id),
            content: Some("Algebra and geometry, year 9".to_string()),
            subreddit: "learnmath".to_string(),
            author: "poster".to_string(),
            url: format!("https://www.reddit.com/r/learnmath/comments/{}/", id),
            permalink: format!("/r/learnmath/comments/{}/", id),
            created_utc,
            score: 4,
            num_comments: 2,
        }
    }

    fn lead(id: &str, priority_score: u8, created_utc: i64) -> Lead {
        Lead {
            post: post(id, created_utc),
            grade_level: GradeLevel::Middle,
            topics: vec![Topic::Algebra, Topic::Geometry],
            is_urgent: priority_score >= 8,
            is_parent: false,
            mentions_payment: true,
            matched_keywords: vec!["math tutor".to_string()],
            priority_score,
            status: LeadStatus::New,
            notes: None,
            surfaced_at: at(created_utc + 60),
        }
    }

    #[tokio::test]
    async fn test_operations_before_connect_fail() {
        let db = Database::new("sqlite::memory:");
        let result = db.seen_count().await;
        assert!(matches!(
            result,
            Err(CoreError::Database(DatabaseError::NotConnected))
        ));
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let db = setup_test_db().await;
        db.run_migrations().await.expect("second run is a no-op");
        assert_eq!(db.seen_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_record_seen_is_a_dedup_gate() {
        let db = setup_test_db().await;
        let p = post("abc123", 1_700_000_000);

        assert!(!db.is_seen("abc123").await.unwrap());

        let first = SeenPost::new(&p, at(1_700_000_100), true);
        assert!(db.record_seen(&first).await.unwrap());
        assert!(db.is_seen("abc123").await.unwrap());

        // A second sighting is ignored and does not overwrite the first
        let second = SeenPost::new(&p, at(1_700_009_999), false);
        assert!(!db.record_seen(&second).await.unwrap());

        let stored = db.get_seen_post("abc123").await.unwrap().unwrap();
        assert_eq!(stored, first);
        assert_eq!(db.seen_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_record_post_stores_seen_and_lead_together() {
        let db = setup_test_db().await;
        let l = lead("rp1", 6, 1_700_000_000);
        let seen = SeenPost::new(&l.post, at(1_700_000_100), true);

        assert!(db.record_post(&seen, Some(&l)).await.unwrap());
        assert!(db.is_seen("rp1").await.unwrap());
        assert_eq!(db.get_lead("rp1").await.unwrap(), Some(l.clone()));

        // A repeat sighting writes nothing
        assert!(!db.record_post(&seen, Some(&l)).await.unwrap());
        assert_eq!(db.pending_leads().await.unwrap().len(), 1);

        let plain = SeenPost::new(&post("rp2", 1_700_000_000), at(1_700_000_100), false);
        assert!(db.record_post(&plain, None).await.unwrap());
        assert!(db.get_lead("rp2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pending_leads_until_dispatched() {
        let db = setup_test_db().await;
        db.save_lead(&lead("low", 4, 1_700_000_000)).await.unwrap();
        db.save_lead(&lead("high", 9, 1_700_000_000)).await.unwrap();
        db.save_lead(&lead("mid", 6, 1_700_000_000)).await.unwrap();

        let pending: Vec<String> = db
            .pending_leads()
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.post.id)
            .collect();
        assert_eq!(pending, vec!["high", "mid", "low"]);

        db.mark_notified("high", at(1_700_000_500)).await.unwrap();
        db.mark_dispatched("low").await.unwrap();

        let pending = db.pending_leads().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].post.id, "mid");
        // Dispatched leads stay available for review
        assert_eq!(db.get_leads(&LeadQuery::default()).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_save_and_load_lead() {
        let db = setup_test_db().await;
        let original = lead("lead1", 7, 1_700_000_000);

        assert!(db.save_lead(&original).await.unwrap());

        let loaded = db.get_lead("lead1").await.unwrap().expect("lead stored");
        assert_eq!(loaded, original);
        assert!(db.get_lead("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lead_without_topics_or_body() {
        let db = setup_test_db().await;
        let mut bare = lead("bare", 5, 1_700_000_000);
        bare.topics.clear();
        bare.post.content = None;

        db.save_lead(&bare).await.unwrap();

        let loaded = db.get_lead("bare").await.unwrap().unwrap();
        assert!(loaded.topics.is_empty());
        assert!(loaded.post.content.is_none());
        assert_eq!(loaded.topics_label(), "general mathematics");
    }

    #[tokio::test]
    async fn test_saving_lead_twice_keeps_review_state() {
        let db = setup_test_db().await;
        let original = lead("lead2", 6, 1_700_000_000);
        db.save_lead(&original).await.unwrap();
        db.update_lead_status("lead2", LeadStatus::Contacted, Some("sent a DM"))
            .await
            .unwrap();

        assert!(!db.save_lead(&original).await.unwrap());

        let loaded = db.get_lead("lead2").await.unwrap().unwrap();
        assert_eq!(loaded.status, LeadStatus::Contacted);
        assert_eq!(loaded.notes.as_deref(), Some("sent a DM"));
    }

    #[tokio::test]
    async fn test_get_leads_ordering_and_filters() {
        let db = setup_test_db().await;
        db.save_lead(&lead("low", 4, 1_700_000_300)).await.unwrap();
        db.save_lead(&lead("high_old", 9, 1_700_000_000)).await.unwrap();
        db.save_lead(&lead("high_new", 9, 1_700_000_200)).await.unwrap();
        db.save_lead(&lead("mid", 6, 1_700_000_100)).await.unwrap();

        let all = db.get_leads(&LeadQuery::default()).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|l| l.post.id.as_str()).collect();
        assert_eq!(ids, vec!["high_new", "high_old", "mid", "low"]);

        let important = db
            .get_leads(&LeadQuery {
                min_score: Some(6),
                ..LeadQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(important.len(), 3);

        let top = db
            .get_leads(&LeadQuery {
                limit: Some(1),
                ..LeadQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(top[0].post.id, "high_new");

        db.update_lead_status("mid", LeadStatus::Ignored, None)
            .await
            .unwrap();
        let ignored = db
            .get_leads(&LeadQuery {
                status: Some(LeadStatus::Ignored),
                ..LeadQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(ignored.len(), 1);
        assert_eq!(ignored[0].post.id, "mid");
    }

    #[tokio::test]
    async fn test_update_status_of_unknown_lead() {
        let db = setup_test_db().await;
        let result = db
            .update_lead_status("nope", LeadStatus::Replied, None)
            .await;
        assert!(matches!(result, Err(CoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_status_update_keeps_notes_when_none_given() {
        let db = setup_test_db().await;
        db.save_lead(&lead("n1", 5, 1_700_000_000)).await.unwrap();

        db.update_lead_status("n1", LeadStatus::Contacted, Some("first note"))
            .await
            .unwrap();
        db.update_lead_status("n1", LeadStatus::Replied, None)
            .await
            .unwrap();

        let loaded = db.get_lead("n1").await.unwrap().unwrap();
        assert_eq!(loaded.status, LeadStatus::Replied);
        assert_eq!(loaded.notes.as_deref(), Some("first note"));
    }

    #[tokio::test]
    async fn test_notification_times() {
        let db = setup_test_db().await;
        db.save_lead(&lead("a", 5, 1_700_000_000)).await.unwrap();
        db.save_lead(&lead("b", 5, 1_700_000_000)).await.unwrap();
        db.save_lead(&lead("c", 5, 1_700_000_000)).await.unwrap();

        let now = at(1_700_100_000);
        db.mark_notified("a", now - Duration::hours(30)).await.unwrap();
        db.mark_notified("b", now - Duration::hours(2)).await.unwrap();

        let recent = db.notified_since(now - Duration::hours(24)).await.unwrap();
        assert_eq!(recent, vec![now - Duration::hours(2)]);
    }

    #[tokio::test]
    async fn test_lead_summary() {
        let db = setup_test_db().await;

        let empty = db.lead_summary().await.unwrap();
        assert_eq!(empty.total_leads, 0);
        assert_eq!(empty.average_priority, 0.0);

        let mut parent_lead = lead("p", 6, 1_700_000_000);
        parent_lead.is_parent = true;
        db.save_lead(&parent_lead).await.unwrap();
        db.save_lead(&lead("u", 10, 1_700_000_000)).await.unwrap();
        db.record_seen(&SeenPost::new(&post("p", 0), at(0), true))
            .await
            .unwrap();
        db.record_seen(&SeenPost::new(&post("x", 0), at(0), false))
            .await
            .unwrap();

        let summary = db.lead_summary().await.unwrap();
        assert_eq!(summary.total_leads, 2);
        assert_eq!(summary.average_priority, 8.0);
        assert_eq!(summary.high_priority, 1);
        assert_eq!(summary.urgent, 1);
        assert_eq!(summary.parent, 1);
        assert_eq!(summary.seen_posts, 2);
    }

    #[tokio::test]
    async fn test_settings_round_trip() {
        let db = setup_test_db().await;

        assert_eq!(db.get_setting(LAST_POLL_SETTING).await.unwrap(), None);

        db.save_setting(LAST_POLL_SETTING, "2024-06-01T10:00:00+00:00")
            .await
            .unwrap();
        db.save_setting(LAST_POLL_SETTING, "2024-06-01T10:30:00+00:00")
            .await
            .unwrap();

        assert_eq!(
            db.get_setting(LAST_POLL_SETTING).await.unwrap(),
            Some("2024-06-01T10:30:00+00:00".to_string())
        );
    }

    #[tokio::test]
    async fn test_state_survives_reconnect() {
        let db_path = env::temp_dir().join(format!("test_leadwatch_{}.db", uuid::Uuid::new_v4()));
        let db_url = format!("sqlite://{}", db_path.display());

        let mut db = Database::new(db_url.clone());
        db.connect().await.unwrap();
        db.run_migrations().await.unwrap();
        db.record_seen(&SeenPost::new(&post("keep", 0), at(0), false))
            .await
            .unwrap();
        db.close().await;

        let mut reopened = Database::new(db_url);
        reopened.connect().await.unwrap();
        reopened.run_migrations().await.unwrap();
        assert!(reopened.is_seen("keep").await.unwrap());
    }
}
