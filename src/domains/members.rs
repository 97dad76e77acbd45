//! Member sweeps: users a session kicked from a group are banned there.
use std::collections::BTreeMap;

use anyhow::Result;
use tracing::info;

use super::{Domain, Scraper, today};
use crate::{
    AppState,
    db::{self, Db},
    escalation,
};

/// Ban every kicked user in the group they were kicked from. Returns the number of bans issued.
pub async fn ban_kicked(db: &Db, kicked: &BTreeMap<i64, Vec<i64>>) -> Result<usize> {
    let today = today();
    let mut banned = 0;
    for (&group_id, users) in kicked {
        for &user_id in users {
            if escalation::ban(db, user_id, group_id, today).await? {
                banned += 1;
            }
        }
    }
    Ok(banned)
}

#[tracing::instrument(name = "members", skip_all)]
pub async fn run(state: &AppState) -> Result<()> {
    let groups: Vec<i64> = db::groups::all_groups(&state.db)
        .await?
        .into_iter()
        .map(|g| g.group_id)
        .collect();

    let scraper = Scraper::new(state, Domain::Members).await?;
    scraper
        .run_chunks(&groups, |scraper, session| async move {
            let kicked: BTreeMap<i64, Vec<i64>> = scraper.results().read(&session).await?;
            let banned = ban_kicked(&scraper.state.db, &kicked).await?;
            info!(banned, "members swept");
            anyhow::Ok(())
        })
        .await
        .into_result()
}
