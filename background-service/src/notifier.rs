use leadwatch_core::{CoreError, Lead, NotificationError, NotifierKind};
use notify_rust::{Notification, Timeout};
use tracing::info;

const APP_NAME: &str = "leadwatch";

/// Delivers a surfaced lead to the operator.
pub trait Notifier {
    fn name(&self) -> &'static str;

    async fn notify(&self, lead: &Lead) -> Result<(), CoreError>;
}

pub fn summary_line(lead: &Lead) -> String {
    let label = if lead.is_high_priority() {
        "High-priority lead"
    } else {
        "Lead"
    };
    format!(
        "{} {}/10 in r/{}",
        label, lead.priority_score, lead.post.subreddit
    )
}

pub fn body_text(lead: &Lead) -> String {
    let mut flags = Vec::new();
    if lead.is_urgent {
        flags.push("urgent");
    }
    if lead.is_parent {
        flags.push("parent");
    }
    if lead.mentions_payment {
        flags.push("mentions payment");
    }

    let mut body = format!(
        "{}\nGrade: {} | Topics: {}",
        lead.post.title,
        lead.grade_level,
        lead.topics_label()
    );
    if !flags.is_empty() {
        body.push_str(&format!("\n{}", flags.join(", ")));
    }
    body.push('\n');
    body.push_str(&lead.post.link());
    body
}

/// Native desktop notification through the platform notification service.
#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    timeout_ms: u32,
}

impl DesktopNotifier {
    pub fn new() -> Self {
        Self { timeout_ms: 10_000 }
    }
}

impl Default for DesktopNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for DesktopNotifier {
    fn name(&self) -> &'static str {
        "desktop"
    }

    async fn notify(&self, lead: &Lead) -> Result<(), CoreError> {
        Notification::new()
            .appname(APP_NAME)
            .summary(&summary_line(lead))
            .body(&body_text(lead))
            .timeout(Timeout::Milliseconds(self.timeout_ms))
            .show()
            .map_err(|e| NotificationError::DeliveryFailed {
                backend: self.name().to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}

/// Writes each lead as a structured `tracing` event.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn notify(&self, lead: &Lead) -> Result<(), CoreError> {
        info!(
            target: "leadwatch::lead",
            post_id = %lead.post.id,
            subreddit = %lead.post.subreddit,
            priority = lead.priority_score,
            grade = %lead.grade_level,
            topics = %lead.topics_label(),
            urgent = lead.is_urgent,
            parent = lead.is_parent,
            payment = lead.mentions_payment,
            url = %lead.post.link(),
            "{}",
            lead.post.title
        );
        Ok(())
    }
}

/// The backend chosen in configuration.
#[derive(Debug, Clone)]
pub enum ConfiguredNotifier {
    Desktop(DesktopNotifier),
    Log(LogNotifier),
}

impl ConfiguredNotifier {
    pub fn from_kind(kind: NotifierKind) -> Self {
        match kind {
            NotifierKind::Desktop => ConfiguredNotifier::Desktop(DesktopNotifier::new()),
            NotifierKind::Log => ConfiguredNotifier::Log(LogNotifier),
        }
    }
}

impl Notifier for ConfiguredNotifier {
    fn name(&self) -> &'static str {
        match self {
            ConfiguredNotifier::Desktop(n) => n.name(),
            ConfiguredNotifier::Log(n) => n.name(),
        }
    }

    async fn notify(&self, lead: &Lead) -> Result<(), CoreError> {
        match self {
            ConfiguredNotifier::Desktop(n) => n.notify(lead).await,
            ConfiguredNotifier::Log(n) => n.notify(lead).await,
        }
    }
}
