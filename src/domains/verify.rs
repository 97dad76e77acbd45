//! Verification badge checks for users whose badge has not been confirmed.
use std::collections::BTreeMap;

use anyhow::{Context as _, Result};
use tracing::{info, warn};

use super::{Domain, Scraper};
use crate::{
    AppState,
    db::{Db, begin_immediate, users},
};

/// Store a session's verification results in one transaction.
pub async fn update_trusts(db: &Db, results: &BTreeMap<i64, bool>) -> Result<()> {
    let mut tx = begin_immediate(db).await?;
    for (&user_id, &verified) in results {
        users::set_verified(&mut tx, user_id, verified).await?;
    }
    tx.commit().await.context("failed to commit verification results")?;

    info!(
        users = results.len(),
        verified = results.values().filter(|v| **v).count(),
        "trust records updated"
    );
    Ok(())
}

#[tracing::instrument(name = "verify", skip_all)]
pub async fn run(state: &AppState) -> Result<()> {
    let mut conn = state.db.acquire().await.context("failed to acquire connection")?;
    let unverified = users::unverified_users(&mut conn).await?;
    drop(conn);

    if unverified.is_empty() {
        info!("no unverified users");
        return Ok(());
    }
    info!(users = unverified.len(), "verifying users");

    let scraper = Scraper::new(state, Domain::Verify).await?;
    let report = scraper
        .run_chunks(&unverified, |scraper, session| async move {
            let results: BTreeMap<i64, bool> = scraper.results().read(&session).await?;
            update_trusts(&scraper.state.db, &results).await
        })
        .await;

    for session in &report.sessions {
        if let Err(e) = scraper.results().cleanup(session).await {
            warn!(%session, "{e:#}");
        }
    }
    report.into_result()
}
