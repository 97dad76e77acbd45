//! User trust records and the append-only violation ledger.
//!
//! Functions take a connection so callers can group a read and the write that
//! depends on it into one transaction.
use anyhow::{Context as _, Result};
use chrono::NaiveDate;
use sqlx::SqliteConnection;

use crate::models::{TrustRecord, Violation};

#[derive(sqlx::FromRow)]
struct UserRow {
    admin: bool,
    verified: bool,
}

#[derive(sqlx::FromRow)]
struct ViolationRow {
    kind: String,
    group_id: i64,
    priority: String,
    active: bool,
    issued_on: NaiveDate,
    expires_on: Option<NaiveDate>,
}

impl TryFrom<ViolationRow> for Violation {
    type Error = anyhow::Error;

    fn try_from(row: ViolationRow) -> Result<Self> {
        Ok(Self {
            kind: row.kind.parse()?,
            group_id: row.group_id,
            priority: row.priority.parse()?,
            active: row.active,
            date: row.issued_on,
            until: row.expires_on,
        })
    }
}

/// Load a user's trust record, or `None` if the user has never been seen.
pub async fn get_user(conn: &mut SqliteConnection, user_id: i64) -> Result<Option<TrustRecord>> {
    let user = sqlx::query_as::<_, UserRow>("SELECT admin, verified FROM users WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await
        .context("failed to query user")?;
    let Some(user) = user else {
        return Ok(None);
    };

    let violations = sqlx::query_as::<_, ViolationRow>(
        r#"
        SELECT kind, group_id, priority, active, issued_on, expires_on
        FROM violations
        WHERE user_id = ?
        ORDER BY id
        "#,
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await
    .context("failed to query violations")?
    .into_iter()
    .map(Violation::try_from)
    .collect::<Result<Vec<_>>>()
    .with_context(|| format!("corrupt violation ledger for user {user_id}"))?;

    Ok(Some(TrustRecord {
        user_id,
        admin: user.admin,
        verified: user.verified,
        violations,
    }))
}

/// Load a user's trust record, treating unknown users as fresh, non-admin users.
pub async fn get_or_new(conn: &mut SqliteConnection, user_id: i64) -> Result<TrustRecord> {
    Ok(get_user(conn, user_id)
        .await?
        .unwrap_or_else(|| TrustRecord::new(user_id)))
}

async fn ensure_user(conn: &mut SqliteConnection, user_id: i64) -> Result<()> {
    _ = sqlx::query("INSERT INTO users (user_id) VALUES (?) ON CONFLICT DO NOTHING")
        .bind(user_id)
        .execute(&mut *conn)
        .await
        .context("failed to create user")?;
    Ok(())
}

/// Append a violation to a user's ledger. No deduplication happens here.
pub async fn add_violation(
    conn: &mut SqliteConnection,
    user_id: i64,
    violation: &Violation,
) -> Result<()> {
    ensure_user(conn, user_id).await?;

    _ = sqlx::query(
        r#"
        INSERT INTO violations (user_id, kind, group_id, priority, active, issued_on, expires_on)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(violation.kind.as_str())
    .bind(violation.group_id)
    .bind(violation.priority.as_str())
    .bind(violation.active)
    .bind(violation.date)
    .bind(violation.until)
    .execute(&mut *conn)
    .await
    .context("failed to insert violation")?;
    Ok(())
}

/// Record the outcome of a verification badge check.
pub async fn set_verified(conn: &mut SqliteConnection, user_id: i64, verified: bool) -> Result<()> {
    _ = sqlx::query(
        r#"
        INSERT INTO users (user_id, verified) VALUES (?, ?)
        ON CONFLICT (user_id) DO UPDATE SET verified = excluded.verified
        "#,
    )
    .bind(user_id)
    .bind(verified)
    .execute(&mut *conn)
    .await
    .context("failed to update verification")?;
    Ok(())
}

/// Grant or revoke admin rights. Admins never receive violations.
pub async fn set_admin(conn: &mut SqliteConnection, user_id: i64, admin: bool) -> Result<()> {
    _ = sqlx::query(
        r#"
        INSERT INTO users (user_id, admin) VALUES (?, ?)
        ON CONFLICT (user_id) DO UPDATE SET admin = excluded.admin
        "#,
    )
    .bind(user_id)
    .bind(admin)
    .execute(&mut *conn)
    .await
    .context("failed to update admin flag")?;
    Ok(())
}

/// Ids of every user whose badge has not been confirmed yet.
pub async fn unverified_users(conn: &mut SqliteConnection) -> Result<Vec<i64>> {
    sqlx::query_scalar::<_, i64>(
        "SELECT user_id FROM users WHERE verified = FALSE ORDER BY user_id",
    )
    .fetch_all(&mut *conn)
    .await
    .context("failed to query unverified users")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{BanPriority, ViolationType},
        tests::TestDb,
    };

    #[tokio::test]
    async fn ledger_appends_in_order() -> Result<()> {
        let db = TestDb::new().await?;
        let mut conn = db.pool.acquire().await?;
        let today = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();

        assert!(get_user(&mut conn, 42).await?.is_none());
        assert_eq!(get_or_new(&mut conn, 42).await?, TrustRecord::new(42));

        let warn = Violation {
            kind: ViolationType::Warned,
            group_id: 7,
            priority: BanPriority::Green,
            active: false,
            date: today,
            until: Some(today + chrono::Days::new(30)),
        };
        let ban = Violation {
            kind: ViolationType::Banned,
            group_id: 8,
            priority: BanPriority::Red,
            active: true,
            date: today,
            until: None,
        };
        add_violation(&mut conn, 42, &warn).await?;
        add_violation(&mut conn, 42, &ban).await?;
        // Same business key again: the ledger itself does not deduplicate.
        add_violation(&mut conn, 42, &ban).await?;

        let user = get_user(&mut conn, 42).await?.unwrap();
        assert_eq!(user.violations, vec![warn, ban.clone(), ban]);
        assert!(!user.admin);
        Ok(())
    }

    #[tokio::test]
    async fn verification_flags() -> Result<()> {
        let db = TestDb::new().await?;
        let mut conn = db.pool.acquire().await?;

        set_verified(&mut conn, 1, false).await?;
        set_verified(&mut conn, 2, false).await?;
        set_verified(&mut conn, 3, true).await?;
        set_admin(&mut conn, 2, true).await?;
        assert_eq!(unverified_users(&mut conn).await?, vec![1, 2]);

        set_verified(&mut conn, 1, true).await?;
        assert_eq!(unverified_users(&mut conn).await?, vec![2]);
        assert!(get_user(&mut conn, 2).await?.unwrap().admin);
        Ok(())
    }
}
