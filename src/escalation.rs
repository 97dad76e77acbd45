//! Warning-to-ban escalation.
//!
//! A rule breach turns into a warning only for users who already have history and
//! hold fewer than `warning_limit` unexpired warnings. Everyone else is banned,
//! including first offenders with an empty ledger. Admins are never touched.
use anyhow::{Context as _, Result};
use chrono::{Days, NaiveDate};
use metrics::counter;
use tracing::info;

use crate::{
    config::ModerationConfig,
    db::{Db, begin_immediate, users},
    metrics::{VIOLATIONS_BANNED, VIOLATIONS_WARNED},
    models::{BanPriority, TrustRecord, Violation, ViolationType},
};

/// The next moderation step for a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Warn,
    Ban,
}

/// Decide how to respond to a breach. `None` means the user is exempt.
pub fn decide(user: &TrustRecord, today: NaiveDate, warning_limit: usize) -> Option<Action> {
    if user.admin {
        return None;
    }

    if !user.violations.is_empty() && user.active_warnings(today) < warning_limit {
        Some(Action::Warn)
    } else {
        Some(Action::Ban)
    }
}

impl Action {
    /// The ledger entry recording this action in `group_id`.
    pub fn violation(
        self,
        group_id: i64,
        today: NaiveDate,
        policy: &ModerationConfig,
    ) -> Violation {
        match self {
            Self::Warn => Violation {
                kind: ViolationType::Warned,
                group_id,
                priority: BanPriority::Green,
                active: false,
                date: today,
                until: policy
                    .warning_ttl_days
                    .and_then(|days| today.checked_add_days(Days::new(u64::from(days)))),
            },
            Self::Ban => Violation {
                kind: ViolationType::Banned,
                group_id,
                priority: BanPriority::Red,
                active: true,
                date: today,
                until: None,
            },
        }
    }
}

/// Decide and record the response to a breach by `user_id` in `group_id`.
///
/// The user's ledger is read and appended to inside one transaction. Ledger
/// failures propagate.
pub async fn escalate(
    db: &Db,
    user_id: i64,
    group_id: i64,
    today: NaiveDate,
    policy: &ModerationConfig,
) -> Result<Option<Action>> {
    let mut tx = begin_immediate(db).await?;

    let user = users::get_or_new(&mut tx, user_id).await?;
    let Some(action) = decide(&user, today, policy.warning_limit) else {
        info!(user_id, group_id, "user is an admin, not issuing a violation");
        return Ok(None);
    };

    users::add_violation(&mut tx, user_id, &action.violation(group_id, today, policy)).await?;
    tx.commit().await.context("failed to commit violation")?;

    match action {
        Action::Warn => {
            info!(user_id, group_id, "issued a warning");
            counter!(VIOLATIONS_WARNED).increment(1);
        }
        Action::Ban => {
            info!(
                user_id,
                group_id,
                active_warnings = user.active_warnings(today),
                "issued a ban"
            );
            counter!(VIOLATIONS_BANNED).increment(1);
        }
    }

    Ok(Some(action))
}

/// Ban `user_id` in `group_id` outright, unless the user is an admin.
pub async fn ban(db: &Db, user_id: i64, group_id: i64, today: NaiveDate) -> Result<bool> {
    let mut tx = begin_immediate(db).await?;

    let user = users::get_or_new(&mut tx, user_id).await?;
    if user.admin {
        info!(user_id, group_id, "user is an admin, not banning");
        return Ok(false);
    }

    let violation = Action::Ban.violation(group_id, today, &ModerationConfig::default());
    users::add_violation(&mut tx, user_id, &violation).await?;
    tx.commit().await.context("failed to commit ban")?;

    info!(user_id, group_id, "issued a ban");
    counter!(VIOLATIONS_BANNED).increment(1);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::TestDb;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    fn warning(until: Option<NaiveDate>) -> Violation {
        Violation {
            kind: ViolationType::Warned,
            group_id: 1,
            priority: BanPriority::Green,
            active: false,
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            until,
        }
    }

    fn user_with(violations: Vec<Violation>) -> TrustRecord {
        TrustRecord {
            violations,
            ..TrustRecord::new(5)
        }
    }

    #[test]
    fn first_offense_is_a_ban() {
        let action = decide(&TrustRecord::new(5), today(), 3);
        assert_eq!(action, Some(Action::Ban));

        let v = Action::Ban.violation(9, today(), &ModerationConfig::default());
        assert_eq!(v.kind, ViolationType::Banned);
        assert_eq!(v.priority, BanPriority::Red);
        assert!(v.active);
        assert_eq!(v.date, today());
    }

    #[test]
    fn prior_history_without_warnings_is_warned() {
        let banned = Action::Ban.violation(1, today(), &ModerationConfig::default());
        let action = decide(&user_with(vec![banned]), today(), 3);
        assert_eq!(action, Some(Action::Warn));

        let v = Action::Warn.violation(9, today(), &ModerationConfig::default());
        assert_eq!(v.kind, ViolationType::Warned);
        assert_eq!(v.priority, BanPriority::Green);
        assert!(!v.active);
        assert_eq!(v.date, today());
        assert_eq!(v.until, None);
    }

    #[test]
    fn third_active_warning_escalates() {
        let two = user_with(vec![warning(None), warning(None)]);
        assert_eq!(decide(&two, today(), 3), Some(Action::Warn));

        let three = user_with(vec![warning(None), warning(None), warning(None)]);
        assert_eq!(decide(&three, today(), 3), Some(Action::Ban));
    }

    #[test]
    fn expired_warnings_do_not_count() {
        let expired = NaiveDate::from_ymd_opt(2024, 2, 1);
        let user = user_with(vec![warning(expired), warning(expired), warning(expired)]);
        assert_eq!(user.active_warnings(today()), 0);
        assert_eq!(decide(&user, today(), 3), Some(Action::Warn));
    }

    #[test]
    fn admins_are_exempt() {
        let admin = TrustRecord {
            admin: true,
            ..TrustRecord::new(5)
        };
        assert_eq!(decide(&admin, today(), 3), None);
    }

    #[test]
    fn warning_ttl_sets_expiry() {
        let policy = ModerationConfig {
            warning_ttl_days: Some(30),
            ..ModerationConfig::default()
        };
        let v = Action::Warn.violation(1, today(), &policy);
        assert_eq!(v.until, NaiveDate::from_ymd_opt(2024, 7, 15));
    }

    #[tokio::test]
    async fn repeated_breaches_walk_the_ladder() -> Result<()> {
        let db = TestDb::new().await?;
        let policy = ModerationConfig::default();

        let mut actions = Vec::new();
        for _ in 0..5 {
            actions.push(escalate(&db.pool, 77, 3, today(), &policy).await?);
        }
        assert_eq!(
            actions,
            vec![
                Some(Action::Ban),
                Some(Action::Warn),
                Some(Action::Warn),
                Some(Action::Warn),
                Some(Action::Ban),
            ]
        );

        let mut conn = db.pool.acquire().await?;
        let user = users::get_user(&mut conn, 77).await?.unwrap();
        assert_eq!(user.violations.len(), 5);
        assert_eq!(user.active_warnings(today()), 3);
        Ok(())
    }

    #[tokio::test]
    async fn admins_get_nothing_recorded() -> Result<()> {
        let db = TestDb::new().await?;
        let mut conn = db.pool.acquire().await?;
        users::set_admin(&mut conn, 12, true).await?;
        drop(conn);

        let policy = ModerationConfig::default();
        assert_eq!(escalate(&db.pool, 12, 3, today(), &policy).await?, None);
        assert!(!ban(&db.pool, 12, 3, today()).await?);

        let mut conn = db.pool.acquire().await?;
        assert!(users::get_user(&mut conn, 12).await?.unwrap().violations.is_empty());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_escalations_all_land() -> Result<()> {
        let db = TestDb::new().await?;
        let policy = ModerationConfig::default();

        // Distinct users, all written at once.
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let pool = db.pool.clone();
                let policy = policy.clone();
                tokio::spawn(
                    async move { escalate(&pool, 1000 + i, 3, today(), &policy).await },
                )
            })
            .collect();
        for outcome in futures::future::join_all(handles).await {
            assert_eq!(outcome??, Some(Action::Ban));
        }

        // The same user, racing itself: every breach still reads the ledger it extends.
        let handles: Vec<_> = (0..5)
            .map(|_| {
                let pool = db.pool.clone();
                let policy = policy.clone();
                tokio::spawn(async move { escalate(&pool, 77, 3, today(), &policy).await })
            })
            .collect();
        let mut bans = 0;
        let mut warnings = 0;
        for outcome in futures::future::join_all(handles).await {
            match outcome?? {
                Some(Action::Ban) => bans += 1,
                Some(Action::Warn) => warnings += 1,
                None => panic!("user 77 is not an admin"),
            }
        }
        assert_eq!((bans, warnings), (2, 3));

        let mut conn = db.pool.acquire().await?;
        for i in 0..8 {
            let user = users::get_user(&mut conn, 1000 + i).await?.unwrap();
            assert_eq!(user.violations.len(), 1);
        }
        assert_eq!(users::get_user(&mut conn, 77).await?.unwrap().violations.len(), 5);
        Ok(())
    }
}
