//! Switching off replies to group stories.
use std::collections::BTreeMap;

use anyhow::Result;
use tracing::info;

use super::{Domain, Scraper, log_outcomes};
use crate::{AppState, db};

#[tracing::instrument(name = "stories_replies", skip_all)]
pub async fn run(state: &AppState) -> Result<()> {
    let groups: Vec<i64> = db::groups::all_groups(&state.db)
        .await?
        .into_iter()
        .map(|g| g.group_id)
        .collect();

    let scraper = Scraper::new(state, Domain::StoriesReplies).await?;
    scraper
        .run_chunks(&groups, |scraper, session| async move {
            let outcomes = scraper
                .results()
                .read_optional::<BTreeMap<i64, bool>>(&session)
                .await?;
            if let Some(outcomes) = outcomes {
                log_outcomes(&outcomes, "story replies switched off", "story replies left on");
            } else {
                info!("session left no story reply results");
            }
            anyhow::Ok(())
        })
        .await
        .into_result()
}
