//! Comment-log scraping, deduplication and toxicity annotation.
use anyhow::{Context as _, Result};
use metrics::counter;
use tracing::{info, warn};

use super::{Domain, Scraper};
use crate::{
    AppState,
    db::{self, Db},
    metrics::{COMMENTS_SKIPPED, COMMENTS_STORED, TOXICITY_FALLBACKS},
    models::Comment,
    toxicity::ToxicityScorer,
};

/// Counts from one reconciled batch of comments.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpdateStats {
    pub stored: usize,
    pub invalid: usize,
    pub duplicates: usize,
    pub empty: usize,
}

fn skipped(reason: &'static str) {
    counter!(COMMENTS_SKIPPED, "reason" => reason).increment(1);
}

/// Persist newly scraped comments, scored for toxicity.
///
/// Comments missing an identifier, already stored, or without any content are
/// skipped. Scoring never aborts the batch: a failed score is stored as 0.
pub async fn update_comments(
    db: &Db,
    scorer: &dyn ToxicityScorer,
    comments: Vec<Comment>,
) -> Result<UpdateStats> {
    let mut stats = UpdateStats::default();

    for comment in comments {
        let Some(key) = comment.key() else {
            info!(
                comment_vk_id = ?comment.comment_vk_id,
                "comment is missing identifiers, skipping"
            );
            stats.invalid += 1;
            skipped("invalid");
            continue;
        };

        if db::comments::already_exists(db, &key).await? {
            info!(
                "comment -{}_{} is already stored",
                key.group_id, key.comment_vk_id
            );
            stats.duplicates += 1;
            skipped("duplicate");
            continue;
        }

        if comment.is_empty() {
            info!(comment_vk_id = key.comment_vk_id, "comment is empty");
            stats.empty += 1;
            skipped("empty");
            continue;
        }

        let toxicity = match comment.text() {
            Some(text) => {
                info!(comment_vk_id = key.comment_vk_id, "scoring comment");
                match scorer.score(text).await {
                    Ok(score) => score,
                    Err(e) => {
                        warn!(comment_vk_id = key.comment_vk_id, "failed to score comment: {e:#}");
                        counter!(TOXICITY_FALLBACKS).increment(1);
                        0.0
                    }
                }
            }
            None => 0.0,
        };

        db::comments::upload_comment(db, &key, &comment, toxicity).await?;
        stats.stored += 1;
        counter!(COMMENTS_STORED).increment(1);
    }

    Ok(stats)
}

#[tracing::instrument(name = "comments", skip_all)]
pub async fn run(state: &AppState) -> Result<()> {
    let groups: Vec<i64> = db::groups::all_groups(&state.db)
        .await?
        .into_iter()
        .map(|g| g.group_id)
        .collect();
    info!(groups = groups.len(), "collecting comments");

    let scraper = Scraper::new(state, Domain::Comments).await?;
    scraper
        .run_chunks(&groups, |scraper, session| async move {
            let comments: Vec<Comment> = scraper.results().read(&session).await?;
            let stats = update_comments(
                &scraper.state.db,
                scraper.state.scorer.as_ref(),
                comments,
            )
            .await
            .context("failed to update comments")?;
            info!(?stats, "comments updated");
            anyhow::Ok(())
        })
        .await
        .into_result()
}
