//! Persisted comments and the dedup gate in front of them.
use anyhow::{Context as _, Result};

use super::Db;
use crate::models::{Comment, CommentKey};

/// Whether a comment with this natural key has already been recorded.
///
/// `target_group_id` is compared null-safely. Two different comments sharing a key
/// are treated as the same comment.
pub async fn already_exists(db: &Db, key: &CommentKey) -> Result<bool> {
    sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM comments
            WHERE comment_vk_id = ?
              AND group_id = ?
              AND target_group_id IS ?
              AND author_id = ?
        )
        "#,
    )
    .bind(key.comment_vk_id)
    .bind(key.group_id)
    .bind(key.target_group_id)
    .bind(key.author_id)
    .fetch_one(db)
    .await
    .context("failed to query comment")
}

/// Store a scored comment.
pub async fn upload_comment(
    db: &Db,
    key: &CommentKey,
    comment: &Comment,
    toxicity: f64,
) -> Result<()> {
    let attachments =
        serde_json::to_string(&comment.attachments).context("failed to encode attachments")?;

    _ = sqlx::query(
        r#"
        INSERT INTO comments
            (comment_vk_id, group_id, target_group_id, post_id, author_id,
             posted_on, text, attachments, toxicity)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(key.comment_vk_id)
    .bind(key.group_id)
    .bind(key.target_group_id)
    .bind(comment.post_id)
    .bind(key.author_id)
    .bind(comment.posted_on)
    .bind(comment.text())
    .bind(attachments)
    .bind(toxicity)
    .execute(db)
    .await
    .context("failed to insert comment")?;
    Ok(())
}

/// A stored comment, as read back for inspection.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct StoredComment {
    pub comment_vk_id: i64,
    pub group_id: i64,
    pub target_group_id: Option<i64>,
    pub author_id: i64,
    pub text: Option<String>,
    pub toxicity: f64,
}

/// Every stored comment of a group, in insertion order.
pub async fn comments_in_group(db: &Db, group_id: i64) -> Result<Vec<StoredComment>> {
    sqlx::query_as::<_, StoredComment>(
        r#"
        SELECT comment_vk_id, group_id, target_group_id, author_id, text, toxicity
        FROM comments
        WHERE group_id = ?
        ORDER BY id
        "#,
    )
    .bind(group_id)
    .fetch_all(db)
    .await
    .context("failed to query comments")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::TestDb;

    fn key(target_group_id: Option<i64>) -> CommentKey {
        CommentKey {
            comment_vk_id: 501,
            group_id: 10,
            target_group_id,
            author_id: 99,
        }
    }

    #[tokio::test]
    async fn gate_matches_the_full_key() -> Result<()> {
        let db = TestDb::new().await?;
        let comment = Comment {
            text: Some("hi".to_owned()),
            ..Comment::default()
        };

        assert!(!already_exists(&db.pool, &key(None)).await?);
        upload_comment(&db.pool, &key(None), &comment, 0.5).await?;
        assert!(already_exists(&db.pool, &key(None)).await?);

        // A null target only matches a null target.
        assert!(!already_exists(&db.pool, &key(Some(11))).await?);
        upload_comment(&db.pool, &key(Some(11)), &comment, 0.5).await?;
        assert!(already_exists(&db.pool, &key(Some(11))).await?);

        let other_author = CommentKey {
            author_id: 100,
            ..key(None)
        };
        assert!(!already_exists(&db.pool, &other_author).await?);

        assert_eq!(comments_in_group(&db.pool, 10).await?.len(), 2);
        Ok(())
    }
}
