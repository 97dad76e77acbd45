//! Group cover checks.
use std::collections::BTreeMap;

use anyhow::Result;
use tracing::info;

use super::{Domain, Scraper, log_outcomes};
use crate::{AppState, db};

#[tracing::instrument(name = "covers", skip_all)]
pub async fn run(state: &AppState) -> Result<()> {
    let groups: Vec<i64> = db::groups::all_groups(&state.db)
        .await?
        .into_iter()
        .map(|g| g.group_id)
        .collect();

    let scraper = Scraper::new(state, Domain::Covers).await?;
    scraper
        .run_chunks(&groups, |scraper, session| async move {
            match scraper.results().read_optional::<BTreeMap<i64, bool>>(&session).await? {
                Some(outcomes) => log_outcomes(&outcomes, "cover updated", "cover not updated"),
                None => info!("session left no cover results"),
            }
            anyhow::Ok(())
        })
        .await
        .into_result()
}
