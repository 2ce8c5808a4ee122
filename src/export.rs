use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use leadwatch_core::Lead;
use std::io::Write;
use std::path::{Path, PathBuf};

const HEADER: [&str; 16] = [
    "post_id",
    "subreddit",
    "title",
    "author",
    "url",
    "created_utc",
    "grade_level",
    "topics",
    "is_urgent",
    "is_parent",
    "mentions_payment",
    "matched_keywords",
    "priority_score",
    "status",
    "notes",
    "surfaced_at",
];

pub fn default_export_path(now: DateTime<Local>) -> PathBuf {
    PathBuf::from(format!("reddit_leads_{}.csv", now.format("%Y%m%d_%H%M")))
}

fn lead_record(lead: &Lead) -> Vec<String> {
    let created = lead
        .post
        .created_at()
        .map(|at| at.to_rfc3339())
        .unwrap_or_default();

    vec![
        lead.post.id.clone(),
        lead.post.subreddit.clone(),
        lead.post.title.clone(),
        lead.post.author.clone(),
        lead.post.link(),
        created,
        lead.grade_level.to_string(),
        lead.topics_label(),
        lead.is_urgent.to_string(),
        lead.is_parent.to_string(),
        lead.mentions_payment.to_string(),
        lead.matched_keywords.join("; "),
        lead.priority_score.to_string(),
        lead.status.to_string(),
        lead.notes.clone().unwrap_or_default(),
        lead.surfaced_at.to_rfc3339(),
    ]
}

pub fn write_leads<W: Write>(writer: W, leads: &[Lead]) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(HEADER)?;
    for lead in leads {
        csv.write_record(lead_record(lead))?;
    }
    csv.flush()?;
    Ok(())
}

pub fn export_to_file(path: &Path, leads: &[Lead]) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    write_leads(file, leads).with_context(|| format!("Failed to write {}", path.display()))
}
