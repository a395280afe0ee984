// Community forum endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use super::{
    auth::{can_moderate, SessionUser},
    ApiResponse, AppState,
};
use crate::community::{build_comment_tree, rank_posts, CommentNode, FeedSort, MAX_THREAD_DEPTH};
use crate::db::record_event;
use crate::entities::community::{self as store, Comment, NewPost, Post, PostChanges};
use crate::error::{AppError, AppResult};

const DEFAULT_FEED_LIMIT: usize = 50;
const MAX_FEED_LIMIT: usize = 200;
/// Candidate rows ranked per feed request
const FEED_WINDOW: usize = 1000;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    #[serde(flatten)]
    pub post: Post,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_vote: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_bookmarked: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
pub struct FeedQuery {
    pub sort: Option<String>,
    pub category: Option<String>,
    pub limit: Option<usize>,
}

/// GET /api/community/posts - public; vote and bookmark state for signed-in users
pub async fn list_posts(
    State(state): State<AppState>,
    session: Result<SessionUser, AppError>,
    Query(query): Query<FeedQuery>,
) -> AppResult<Json<ApiResponse<Vec<PostView>>>> {
    let session = match session {
        Ok(user) => Some(user),
        Err(AppError::Unauthenticated) => None,
        Err(e) => {
            warn!(error = %e, "session lookup failed, serving anonymous feed");
            None
        }
    };
    let category = query.category.as_deref().map(str::trim).filter(|c| !c.is_empty());
    let limit = query.limit.unwrap_or(DEFAULT_FEED_LIMIT).clamp(1, MAX_FEED_LIMIT);

    let conn = state.db()?;
    let mut posts = store::list_posts(&conn, category, FEED_WINDOW)?;
    rank_posts(&mut posts, FeedSort::parse(query.sort.as_deref()));
    posts.truncate(limit);

    let views = match &session {
        Some(user) => {
            let votes = store::votes_by_user(&conn, &user.email)?;
            let bookmarks = store::bookmarked_post_ids(&conn, &user.email)?;
            posts
                .into_iter()
                .map(|post| PostView {
                    user_vote: Some(votes.get(&post.id).copied().unwrap_or(0)),
                    is_bookmarked: Some(bookmarks.contains(&post.id)),
                    post,
                })
                .collect()
        }
        None => posts
            .into_iter()
            .map(|post| PostView {
                post,
                user_vote: None,
                is_bookmarked: None,
            })
            .collect(),
    };
    Ok(ApiResponse::ok(views))
}

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    pub title: String,
    pub content: String,
    pub category: Option<String>,
}

fn required<'a>(value: &'a str, field: &str) -> AppResult<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::bad_request(format!("{field} is required")));
    }
    Ok(value)
}

/// POST /api/community/posts
pub async fn create_post(
    State(state): State<AppState>,
    session: SessionUser,
    Json(request): Json<CreatePostRequest>,
) -> AppResult<Json<ApiResponse<Post>>> {
    let title = required(&request.title, "title")?;
    let content = required(&request.content, "content")?;
    let category = request
        .category
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or("general");
    let author_name = session.display_name();

    let conn = state.db()?;
    let post = store::create_post(
        &conn,
        &NewPost {
            author_email: &session.email,
            author_name: author_name.as_deref(),
            title,
            content,
            category,
        },
    )?;
    Ok(ApiResponse::ok(post))
}

#[derive(Debug, Deserialize)]
pub struct UpdatePostRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub category: Option<String>,
}

fn load_post(conn: &rusqlite::Connection, id: i64) -> AppResult<Post> {
    store::find_post(conn, id)?.ok_or_else(|| AppError::not_found(format!("Post {id} not found")))
}

fn load_comment(conn: &rusqlite::Connection, id: i64) -> AppResult<Comment> {
    store::find_comment(conn, id)?.ok_or_else(|| AppError::not_found(format!("Comment {id} not found")))
}

/// PUT /api/community/posts/:id - author or admin
pub async fn update_post(
    State(state): State<AppState>,
    session: SessionUser,
    Path(id): Path<i64>,
    Json(request): Json<UpdatePostRequest>,
) -> AppResult<Json<ApiResponse<Post>>> {
    let non_blank = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    let changes = PostChanges {
        title: non_blank(request.title),
        content: non_blank(request.content),
        category: non_blank(request.category),
    };

    let conn = state.db()?;
    let post = load_post(&conn, id)?;
    if !can_moderate(&conn, &session, &post.author_email)? {
        return Err(AppError::forbidden("Only the author can edit this post"));
    }

    let post = store::update_post(&conn, id, &changes)?
        .ok_or_else(|| AppError::not_found(format!("Post {id} not found")))?;
    Ok(ApiResponse::ok(post))
}

/// DELETE /api/community/posts/:id - author or admin; comments go with it
pub async fn delete_post(
    State(state): State<AppState>,
    session: SessionUser,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<bool>>> {
    let conn = state.db()?;
    let post = load_post(&conn, id)?;
    if !can_moderate(&conn, &session, &post.author_email)? {
        return Err(AppError::forbidden("Only the author can delete this post"));
    }

    store::delete_post(&conn, id)?;
    if !session.is(&post.author_email) {
        record_event(
            &conn,
            "post_removed",
            "community_post",
            &id.to_string(),
            json!({ "author": post.author_email, "title": post.title }),
            &session.email,
        );
    }
    Ok(ApiResponse::ok(true))
}

#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    pub value: i64,
}

/// POST /api/community/posts/:id/vote {value: -1 | 0 | 1}
pub async fn vote(
    State(state): State<AppState>,
    session: SessionUser,
    Path(id): Path<i64>,
    Json(request): Json<VoteRequest>,
) -> AppResult<Json<ApiResponse<Post>>> {
    if !(-1..=1).contains(&request.value) {
        return Err(AppError::bad_request("value must be -1, 0 or 1"));
    }

    let conn = state.db()?;
    let post = store::cast_vote(&conn, id, &session.email, request.value)?
        .ok_or_else(|| AppError::not_found(format!("Post {id} not found")))?;
    Ok(ApiResponse::ok(post))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentsQuery {
    pub post_id: i64,
}

/// GET /api/community/comments?postId= - threaded, oldest first at every level
pub async fn list_comments(
    State(state): State<AppState>,
    Query(query): Query<CommentsQuery>,
) -> AppResult<Json<ApiResponse<Vec<CommentNode>>>> {
    let conn = state.db()?;
    load_post(&conn, query.post_id)?;
    let comments = store::list_comments(&conn, query.post_id)?;
    Ok(ApiResponse::ok(build_comment_tree(comments)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommentRequest {
    pub post_id: i64,
    pub parent_id: Option<i64>,
    pub content: String,
}

/// POST /api/community/comments
pub async fn create_comment(
    State(state): State<AppState>,
    session: SessionUser,
    Json(request): Json<CreateCommentRequest>,
) -> AppResult<Json<ApiResponse<Comment>>> {
    let content = required(&request.content, "content")?;
    let author_name = session.display_name();

    let conn = state.db()?;
    load_post(&conn, request.post_id)?;
    let mut parent_id = request.parent_id;
    if let Some(id) = parent_id {
        let parent = match store::find_comment(&conn, id)? {
            Some(parent) if parent.post_id == request.post_id => parent,
            Some(_) => return Err(AppError::bad_request("Parent comment belongs to another post")),
            None => return Err(AppError::bad_request(format!("Parent comment {id} not found"))),
        };
        // past the deepest level a reply sits next to the comment it answers
        if store::comment_depth(&conn, parent.id, MAX_THREAD_DEPTH)? >= MAX_THREAD_DEPTH {
            parent_id = parent.parent_id;
        }
    }

    let comment = store::create_comment(
        &conn,
        request.post_id,
        parent_id,
        &session.email,
        author_name.as_deref(),
        content,
    )?;
    Ok(ApiResponse::ok(comment))
}

#[derive(Debug, Deserialize)]
pub struct UpdateCommentRequest {
    pub content: String,
}

/// PUT /api/community/comments/:id - author or admin
pub async fn update_comment(
    State(state): State<AppState>,
    session: SessionUser,
    Path(id): Path<i64>,
    Json(request): Json<UpdateCommentRequest>,
) -> AppResult<Json<ApiResponse<Comment>>> {
    let content = required(&request.content, "content")?;

    let conn = state.db()?;
    let comment = load_comment(&conn, id)?;
    if !can_moderate(&conn, &session, &comment.author_email)? {
        return Err(AppError::forbidden("Only the author can edit this comment"));
    }

    let comment = store::update_comment(&conn, id, content)?
        .ok_or_else(|| AppError::not_found(format!("Comment {id} not found")))?;
    Ok(ApiResponse::ok(comment))
}

/// DELETE /api/community/comments/:id - author or admin; replies go with it
pub async fn delete_comment(
    State(state): State<AppState>,
    session: SessionUser,
    Path(id): Path<i64>,
) -> AppResult<Json<ApiResponse<bool>>> {
    let conn = state.db()?;
    let comment = load_comment(&conn, id)?;
    if !can_moderate(&conn, &session, &comment.author_email)? {
        return Err(AppError::forbidden("Only the author can delete this comment"));
    }
    store::delete_comment(&conn, id)?;
    Ok(ApiResponse::ok(true))
}

/// GET /api/community/bookmarks
pub async fn list_bookmarks(
    State(state): State<AppState>,
    session: SessionUser,
) -> AppResult<Json<ApiResponse<Vec<Post>>>> {
    let conn = state.db()?;
    Ok(ApiResponse::ok(store::bookmarked_posts(&conn, &session.email)?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkRequest {
    pub post_id: i64,
}

/// POST /api/community/bookmarks {postId}
pub async fn add_bookmark(
    State(state): State<AppState>,
    session: SessionUser,
    Json(request): Json<BookmarkRequest>,
) -> AppResult<Json<ApiResponse<bool>>> {
    let conn = state.db()?;
    if !store::add_bookmark(&conn, request.post_id, &session.email)? {
        return Err(AppError::not_found(format!("Post {} not found", request.post_id)));
    }
    Ok(ApiResponse::ok(true))
}

/// DELETE /api/community/bookmarks/:post_id
pub async fn remove_bookmark(
    State(state): State<AppState>,
    session: SessionUser,
    Path(post_id): Path<i64>,
) -> AppResult<Json<ApiResponse<bool>>> {
    let conn = state.db()?;
    if !store::remove_bookmark(&conn, post_id, &session.email)? {
        return Err(AppError::not_found("Bookmark not found"));
    }
    Ok(ApiResponse::ok(true))
}
