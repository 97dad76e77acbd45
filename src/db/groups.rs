//! Managed communities.
use anyhow::{Context as _, Result};

use super::Db;
use crate::models::Group;

/// Every managed group, in id order.
pub async fn all_groups(db: &Db) -> Result<Vec<Group>> {
    sqlx::query_as::<_, Group>("SELECT group_id FROM managed_groups ORDER BY group_id")
        .fetch_all(db)
        .await
        .context("failed to query managed groups")
}

/// Start managing `group_id`. Adding a group twice is a no-op.
pub async fn add_group(db: &Db, group_id: i64) -> Result<()> {
    _ = sqlx::query("INSERT INTO managed_groups (group_id) VALUES (?) ON CONFLICT DO NOTHING")
        .bind(group_id)
        .execute(db)
        .await
        .context("failed to add managed group")?;
    Ok(())
}
