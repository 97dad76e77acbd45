//! Switching off vk.link sites for groups that have one.
use std::collections::BTreeMap;

use anyhow::Result;
use tracing::{info, warn};

use super::{Domain, Scraper, log_outcomes};
use crate::{AppState, db, vk::VkDirectory};

/// Managed groups whose vk.link site answers. Probe failures count as no site.
pub async fn groups_with_sites(vk: &dyn VkDirectory, groups: &[i64]) -> Vec<i64> {
    let mut with_sites = Vec::new();
    for &group_id in groups {
        match vk.site_exists(group_id).await {
            Ok(true) => with_sites.push(group_id),
            Ok(false) => {}
            Err(e) => warn!(group_id, "failed to probe site: {e:#}"),
        }
    }
    with_sites
}

#[tracing::instrument(name = "vk_link", skip_all)]
pub async fn run(state: &AppState) -> Result<()> {
    let groups: Vec<i64> = db::groups::all_groups(&state.db)
        .await?
        .into_iter()
        .map(|g| g.group_id)
        .collect();

    let with_sites = groups_with_sites(state.vk.as_ref(), &groups).await;
    if with_sites.is_empty() {
        info!("no groups have a vk.link site");
        return Ok(());
    }
    info!(groups = with_sites.len(), "switching off vk.link sites");

    let scraper = Scraper::new(state, Domain::VkLink).await?;
    scraper
        .run_chunks(&with_sites, |scraper, session| async move {
            let outcomes: BTreeMap<i64, bool> = scraper.results().read(&session).await?;
            log_outcomes(&outcomes, "site switched off", "site still on");
            anyhow::Ok(())
        })
        .await
        .into_result()
}
