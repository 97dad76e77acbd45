//! Story moderation: authors of rule-breaking stories are escalated in the group.
use std::collections::{BTreeMap, BTreeSet, HashMap};

use anyhow::Result;
use tracing::info;

use super::{Domain, Scraper, today};
use crate::{
    AppState,
    config::ModerationConfig,
    db::{self, Db},
    escalation,
    vk::{self, VkDirectory},
};

/// Turn each group's profile links into user ids.
///
/// Links are reduced to screen names and resolved in one lookup. Links that do
/// not resolve are logged and dropped.
pub async fn resolve_users(
    vk: &dyn VkDirectory,
    links: &BTreeMap<i64, Vec<String>>,
) -> Result<BTreeMap<i64, Vec<i64>>> {
    let names: BTreeSet<&str> = links
        .values()
        .flatten()
        .map(|link| vk::screen_name(link))
        .filter(|name| !name.is_empty())
        .collect();
    if names.is_empty() {
        return Ok(BTreeMap::new());
    }

    let names: Vec<String> = names.into_iter().map(str::to_owned).collect();
    let ids: HashMap<String, i64> = vk
        .resolve_screen_names(&names)
        .await?
        .into_iter()
        .map(|user| (user.screen_name, user.id))
        .collect();

    let mut resolved = BTreeMap::new();
    for (&group_id, group_links) in links {
        let mut users = Vec::new();
        for link in group_links {
            match ids.get(vk::screen_name(link)) {
                Some(&id) if !users.contains(&id) => users.push(id),
                Some(_) => {}
                None => info!(group_id, %link, "could not resolve story author"),
            }
        }
        _ = resolved.insert(group_id, users);
    }
    Ok(resolved)
}

/// Escalate every resolved author in their group.
pub async fn escalate_authors(
    db: &Db,
    authors: &BTreeMap<i64, Vec<i64>>,
    policy: &ModerationConfig,
) -> Result<()> {
    let today = today();
    for (&group_id, users) in authors {
        for &user_id in users {
            _ = escalation::escalate(db, user_id, group_id, today, policy).await?;
        }
    }
    Ok(())
}

#[tracing::instrument(name = "stories", skip_all)]
pub async fn run(state: &AppState) -> Result<()> {
    let groups: Vec<i64> = db::groups::all_groups(&state.db)
        .await?
        .into_iter()
        .map(|g| g.group_id)
        .collect();

    let scraper = Scraper::new(state, Domain::Stories).await?;
    scraper
        .run_chunks(&groups, |scraper, session| async move {
            let links: BTreeMap<i64, Vec<String>> = scraper.results().read(&session).await?;
            let state = &scraper.state;
            let authors = resolve_users(state.vk.as_ref(), &links).await?;
            escalate_authors(&state.db, &authors, &state.config.moderation).await?;
            info!(groups = authors.len(), "stories moderated");
            anyhow::Ok(())
        })
        .await
        .into_result()
}
