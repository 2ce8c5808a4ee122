use leadwatch_core::Lead;

const BASE_SCORE: i32 = 5;
const MIN_SCORE: i32 = 1;
const MAX_SCORE: i32 = 10;

/// Priority from 1 to 10; higher means review first.
///
/// A handful of comments means the post is visible but still open. A busy
/// thread has probably found help already.
pub fn score_lead(lead: &Lead) -> u8 {
    let mut score = BASE_SCORE;

    if lead.is_urgent {
        score += 2;
    }
    if lead.topics.len() > 1 {
        score += 1;
    }
    if lead.is_parent {
        score += 1;
    }
    if lead.mentions_payment {
        score += 1;
    }

    match lead.post.num_comments {
        1..=5 => score += 1,
        n if n > 10 => score -= 1,
        _ => {}
    }

    score.clamp(MIN_SCORE, MAX_SCORE) as u8
}
