// Community forum rows - posts, threaded comments, votes, bookmarks

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::db::now_timestamp;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: i64,
    pub author_email: String,
    pub author_name: Option<String>,
    pub title: String,
    pub content: String,
    pub category: String,
    /// Sum of all votes
    pub score: i64,
    pub is_pinned: bool,
    pub is_trending: bool,
    pub comment_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub parent_id: Option<i64>,
    pub author_email: String,
    pub author_name: Option<String>,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
}

pub struct NewPost<'a> {
    pub author_email: &'a str,
    pub author_name: Option<&'a str>,
    pub title: &'a str,
    pub content: &'a str,
    pub category: &'a str,
}

#[derive(Debug, Default)]
pub struct PostChanges {
    pub title: Option<String>,
    pub content: Option<String>,
    pub category: Option<String>,
}

const POST_SELECT: &str = "SELECT id, author_email, author_name, title, content, category, score,
        is_pinned, is_trending, comment_count, created_at, updated_at FROM community_posts";

const COMMENT_SELECT: &str = "SELECT id, post_id, parent_id, author_email, author_name, content,
        created_at, updated_at FROM community_comments";

fn row_to_post(row: &rusqlite::Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        author_email: row.get(1)?,
        author_name: row.get(2)?,
        title: row.get(3)?,
        content: row.get(4)?,
        category: row.get(5)?,
        score: row.get(6)?,
        is_pinned: row.get(7)?,
        is_trending: row.get(8)?,
        comment_count: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn row_to_comment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        post_id: row.get(1)?,
        parent_id: row.get(2)?,
        author_email: row.get(3)?,
        author_name: row.get(4)?,
        content: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

// ============================================================================
// POSTS
// ============================================================================

pub fn create_post(conn: &Connection, new: &NewPost<'_>) -> Result<Post> {
    let now = now_timestamp();
    conn.execute(
        "INSERT INTO community_posts (author_email, author_name, title, content, category, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![new.author_email, new.author_name, new.title, new.content, new.category, now],
    )?;
    let id = conn.last_insert_rowid();
    find_post(conn, id)?.ok_or_else(|| anyhow::anyhow!("post {id} vanished after insert"))
}

pub fn find_post(conn: &Connection, id: i64) -> Result<Option<Post>> {
    let post = conn
        .query_row(&format!("{POST_SELECT} WHERE id = ?1"), [id], row_to_post)
        .optional()?;
    Ok(post)
}

pub fn list_posts(conn: &Connection, category: Option<&str>, limit: usize) -> Result<Vec<Post>> {
    let mut stmt = conn.prepare(&format!(
        "{POST_SELECT} WHERE (?1 IS NULL OR category = ?1 COLLATE NOCASE)
         ORDER BY created_at DESC, id DESC LIMIT ?2"
    ))?;
    let posts = stmt
        .query_map(params![category, limit as i64], row_to_post)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(posts)
}

pub fn update_post(conn: &Connection, id: i64, changes: &PostChanges) -> Result<Option<Post>> {
    let changed = conn.execute(
        "UPDATE community_posts SET
            title = COALESCE(?1, title),
            content = COALESCE(?2, content),
            category = COALESCE(?3, category),
            updated_at = ?4
         WHERE id = ?5",
        params![changes.title, changes.content, changes.category, now_timestamp(), id],
    )?;
    if changed == 0 {
        return Ok(None);
    }
    find_post(conn, id)
}

pub fn delete_post(conn: &Connection, id: i64) -> Result<bool> {
    let changed = conn.execute("DELETE FROM community_posts WHERE id = ?1", [id])?;
    Ok(changed > 0)
}

pub fn set_post_flags(
    conn: &Connection,
    id: i64,
    pinned: Option<bool>,
    trending: Option<bool>,
) -> Result<Option<Post>> {
    let changed = conn.execute(
        "UPDATE community_posts SET
            is_pinned = COALESCE(?1, is_pinned),
            is_trending = COALESCE(?2, is_trending)
         WHERE id = ?3",
        params![pinned, trending, id],
    )?;
    if changed == 0 {
        return Ok(None);
    }
    find_post(conn, id)
}

// ============================================================================
// VOTES
// ============================================================================

/// Record a vote (-1, 0 or 1; 0 withdraws it) and recompute the post score.
pub fn cast_vote(conn: &Connection, post_id: i64, user_email: &str, value: i64) -> Result<Option<Post>> {
    if find_post(conn, post_id)?.is_none() {
        return Ok(None);
    }

    if value == 0 {
        conn.execute(
            "DELETE FROM community_votes WHERE post_id = ?1 AND user_email = ?2",
            params![post_id, user_email],
        )?;
    } else {
        conn.execute(
            "INSERT INTO community_votes (post_id, user_email, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(post_id, user_email) DO UPDATE SET value = excluded.value",
            params![post_id, user_email, value.signum()],
        )?;
    }

    conn.execute(
        "UPDATE community_posts SET score =
            (SELECT COALESCE(SUM(value), 0) FROM community_votes WHERE post_id = ?1)
         WHERE id = ?1",
        [post_id],
    )?;
    find_post(conn, post_id)
}

/// post id → vote value for everything this user voted on
pub fn votes_by_user(conn: &Connection, user_email: &str) -> Result<HashMap<i64, i64>> {
    let mut stmt = conn.prepare("SELECT post_id, value FROM community_votes WHERE user_email = ?1")?;
    let votes = stmt
        .query_map([user_email], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<HashMap<_, _>, _>>()?;
    Ok(votes)
}

// ============================================================================
// BOOKMARKS
// ============================================================================

/// Returns false if the post does not exist.
pub fn add_bookmark(conn: &Connection, post_id: i64, user_email: &str) -> Result<bool> {
    if find_post(conn, post_id)?.is_none() {
        return Ok(false);
    }
    conn.execute(
        "INSERT OR IGNORE INTO community_bookmarks (post_id, user_email, created_at) VALUES (?1, ?2, ?3)",
        params![post_id, user_email, now_timestamp()],
    )?;
    Ok(true)
}

pub fn remove_bookmark(conn: &Connection, post_id: i64, user_email: &str) -> Result<bool> {
    let changed = conn.execute(
        "DELETE FROM community_bookmarks WHERE post_id = ?1 AND user_email = ?2",
        params![post_id, user_email],
    )?;
    Ok(changed > 0)
}

pub fn bookmarked_post_ids(conn: &Connection, user_email: &str) -> Result<HashSet<i64>> {
    let mut stmt = conn.prepare("SELECT post_id FROM community_bookmarks WHERE user_email = ?1")?;
    let ids = stmt
        .query_map([user_email], |row| row.get(0))?
        .collect::<Result<HashSet<i64>, _>>()?;
    Ok(ids)
}

/// Bookmarked posts, most recently bookmarked first
pub fn bookmarked_posts(conn: &Connection, user_email: &str) -> Result<Vec<Post>> {
    let mut stmt = conn.prepare(
        "SELECT p.id, p.author_email, p.author_name, p.title, p.content, p.category, p.score,
                p.is_pinned, p.is_trending, p.comment_count, p.created_at, p.updated_at
         FROM community_bookmarks b JOIN community_posts p ON p.id = b.post_id
         WHERE b.user_email = ?1
         ORDER BY b.created_at DESC",
    )?;
    let posts = stmt
        .query_map([user_email], row_to_post)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(posts)
}

// ============================================================================
// COMMENTS
// ============================================================================

fn refresh_comment_count(conn: &Connection, post_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE community_posts SET comment_count =
            (SELECT COUNT(*) FROM community_comments WHERE post_id = ?1)
         WHERE id = ?1",
        [post_id],
    )?;
    Ok(())
}

pub fn find_comment(conn: &Connection, id: i64) -> Result<Option<Comment>> {
    let comment = conn
        .query_row(&format!("{COMMENT_SELECT} WHERE id = ?1"), [id], row_to_comment)
        .optional()?;
    Ok(comment)
}

/// Flat comment list for one post, oldest first
pub fn list_comments(conn: &Connection, post_id: i64) -> Result<Vec<Comment>> {
    let mut stmt = conn.prepare(&format!(
        "{COMMENT_SELECT} WHERE post_id = ?1 ORDER BY created_at, id"
    ))?;
    let comments = stmt
        .query_map([post_id], row_to_comment)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(comments)
}

/// Number of ancestors above a comment, counting at most `limit`.
pub fn comment_depth(conn: &Connection, id: i64, limit: usize) -> Result<usize> {
    let depth: Option<i64> = conn.query_row(
        "WITH RECURSIVE chain(id, parent_id, depth) AS (
             SELECT id, parent_id, 0 FROM community_comments WHERE id = ?1
             UNION ALL
             SELECT c.id, c.parent_id, chain.depth + 1
             FROM community_comments c JOIN chain ON c.id = chain.parent_id
             WHERE chain.depth < ?2
         )
         SELECT MAX(depth) FROM chain",
        params![id, limit as i64],
        |row| row.get(0),
    )?;
    Ok(depth.unwrap_or(0) as usize)
}

/// Callers check that the post exists and the parent belongs to it.
pub fn create_comment(
    conn: &Connection,
    post_id: i64,
    parent_id: Option<i64>,
    author_email: &str,
    author_name: Option<&str>,
    content: &str,
) -> Result<Comment> {
    let now = now_timestamp();
    conn.execute(
        "INSERT INTO community_comments (post_id, parent_id, author_email, author_name, content, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![post_id, parent_id, author_email, author_name, content, now],
    )?;
    let id = conn.last_insert_rowid();
    refresh_comment_count(conn, post_id)?;
    find_comment(conn, id)?.ok_or_else(|| anyhow::anyhow!("comment {id} vanished after insert"))
}

pub fn update_comment(conn: &Connection, id: i64, content: &str) -> Result<Option<Comment>> {
    let changed = conn.execute(
        "UPDATE community_comments SET content = ?1, updated_at = ?2 WHERE id = ?3",
        params![content, now_timestamp(), id],
    )?;
    if changed == 0 {
        return Ok(None);
    }
    find_comment(conn, id)
}

/// Deleting a comment removes its replies too.
pub fn delete_comment(conn: &Connection, id: i64) -> Result<bool> {
    let Some(comment) = find_comment(conn, id)? else {
        return Ok(false);
    };
    conn.execute("DELETE FROM community_comments WHERE id = ?1", [id])?;
    refresh_comment_count(conn, comment.post_id)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn new_post(conn: &Connection, title: &str) -> Post {
        create_post(
            conn,
            &NewPost {
                author_email: "author@example.com",
                author_name: Some("Author"),
                title,
                content: "body",
                category: "rates",
            },
        )
        .unwrap()
    }

    #[test]
    fn test_score_tracks_votes() {
        let conn = test_db();
        let post = new_post(&conn, "Texas cuts");

        cast_vote(&conn, post.id, "a@example.com", 1).unwrap();
        cast_vote(&conn, post.id, "b@example.com", 1).unwrap();
        let post_after = cast_vote(&conn, post.id, "c@example.com", -5).unwrap().unwrap();
        assert_eq!(post_after.score, 1);

        // changing and withdrawing votes
        cast_vote(&conn, post.id, "c@example.com", 1).unwrap();
        let post_after = cast_vote(&conn, post.id, "a@example.com", 0).unwrap().unwrap();
        assert_eq!(post_after.score, 2);

        let votes = votes_by_user(&conn, "c@example.com").unwrap();
        assert_eq!(votes.get(&post.id), Some(&1));
        assert!(cast_vote(&conn, 999, "a@example.com", 1).unwrap().is_none());
    }

    #[test]
    fn test_comment_count_and_cascade() {
        let conn = test_db();
        let post = new_post(&conn, "Thread");

        let root = create_comment(&conn, post.id, None, "a@example.com", None, "root").unwrap();
        create_comment(&conn, post.id, Some(root.id), "b@example.com", None, "reply").unwrap();
        assert_eq!(find_post(&conn, post.id).unwrap().unwrap().comment_count, 2);

        assert!(delete_comment(&conn, root.id).unwrap());
        assert!(list_comments(&conn, post.id).unwrap().is_empty());
        assert_eq!(find_post(&conn, post.id).unwrap().unwrap().comment_count, 0);
    }

    #[test]
    fn test_comment_depth_is_bounded() {
        let conn = test_db();
        let post = new_post(&conn, "Deep");

        let mut parent = None;
        let mut last = 0;
        for _ in 0..6 {
            let c = create_comment(&conn, post.id, parent, "a@example.com", None, "x").unwrap();
            parent = Some(c.id);
            last = c.id;
        }

        assert_eq!(comment_depth(&conn, last, 100).unwrap(), 5);
        assert_eq!(comment_depth(&conn, last, 3).unwrap(), 3);
        assert_eq!(comment_depth(&conn, 9999, 3).unwrap(), 0);
    }

    #[test]
    fn test_bookmarks() {
        let conn = test_db();
        let post = new_post(&conn, "Save me");

        assert!(add_bookmark(&conn, post.id, "a@example.com").unwrap());
        assert!(add_bookmark(&conn, post.id, "a@example.com").unwrap());
        assert!(!add_bookmark(&conn, 42, "a@example.com").unwrap());

        assert_eq!(bookmarked_posts(&conn, "a@example.com").unwrap().len(), 1);
        assert!(bookmarked_post_ids(&conn, "a@example.com").unwrap().contains(&post.id));

        assert!(remove_bookmark(&conn, post.id, "a@example.com").unwrap());
        assert!(!remove_bookmark(&conn, post.id, "a@example.com").unwrap());
    }

    #[test]
    fn test_update_and_flags() {
        let conn = test_db();
        let post = new_post(&conn, "Draft");

        let updated = update_post(
            &conn,
            post.id,
            &PostChanges { title: Some("Final".into()), ..Default::default() },
        )
        .unwrap()
        .unwrap();
        assert_eq!(updated.title, "Final");
        assert_eq!(updated.content, "body");

        let flagged = set_post_flags(&conn, post.id, Some(true), None).unwrap().unwrap();
        assert!(flagged.is_pinned);
        assert!(!flagged.is_trending);

        assert!(delete_post(&conn, post.id).unwrap());
        assert!(find_post(&conn, post.id).unwrap().is_none());
    }
}
