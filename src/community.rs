// Community feed - comment threading and post ranking
//
// Pure functions over rows already loaded from the database.

use serde::Serialize;
use std::collections::HashMap;

use crate::entities::community::{Comment, Post};

// ============================================================================
// COMMENT TREE
// ============================================================================

/// Deepest reply level shown in a thread; top-level comments are level 0.
pub const MAX_THREAD_DEPTH: usize = 8;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommentNode {
    #[serde(flatten)]
    pub comment: Comment,
    pub replies: Vec<CommentNode>,
}

impl CommentNode {
    /// Number of comments in this subtree, including this one.
    pub fn size(&self) -> usize {
        1 + self.replies.iter().map(CommentNode::size).sum::<usize>()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

/// Build a forest from a flat comment list, oldest first at every level.
///
/// Comments whose parent is not in the list, and comments caught in a parent
/// cycle, become roots. Replies nested past `MAX_THREAD_DEPTH` are kept at
/// that depth, next to their parent. Every input comment appears exactly once.
pub fn build_comment_tree(mut comments: Vec<Comment>) -> Vec<CommentNode> {
    comments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    let n = comments.len();

    let index_of: HashMap<i64, usize> = comments.iter().enumerate().map(|(i, c)| (c.id, i)).collect();
    let parent: Vec<Option<usize>> = comments
        .iter()
        .enumerate()
        .map(|(i, c)| c.parent_id.and_then(|p| index_of.get(&p).copied()).filter(|&p| p != i))
        .collect();

    // Pass 1: effective parent and depth, one colour walk per comment
    let mut mark = vec![Mark::Unvisited; n];
    let mut anchor: Vec<Option<usize>> = vec![None; n];
    let mut depth = vec![0usize; n];
    let mut path = Vec::new();

    for start in 0..n {
        let mut current = Some(start);
        while let Some(i) = current {
            match mark[i] {
                Mark::Done => break,
                Mark::Visiting => {
                    // i closes a loop; everything on it from i onward is a root
                    let from = path.iter().position(|&p| p == i).unwrap_or(0);
                    for &member in &path[from..] {
                        mark[member] = Mark::Done;
                    }
                    path.truncate(from);
                    break;
                }
                Mark::Unvisited => {
                    mark[i] = Mark::Visiting;
                    path.push(i);
                    current = parent[i];
                }
            }
        }

        // ancestors are settled before their descendants
        while let Some(i) = path.pop() {
            match parent[i] {
                Some(p) if depth[p] < MAX_THREAD_DEPTH => {
                    anchor[i] = Some(p);
                    depth[i] = depth[p] + 1;
                }
                Some(p) => {
                    anchor[i] = anchor[p];
                    depth[i] = depth[p];
                }
                None => {}
            }
            mark[i] = Mark::Done;
        }
    }

    // Pass 2: attach deepest first so every node's replies are complete
    let mut by_depth: Vec<Vec<usize>> = vec![Vec::new(); MAX_THREAD_DEPTH + 1];
    for (i, d) in depth.iter().enumerate() {
        by_depth[*d].push(i);
    }

    let mut replies: Vec<Vec<CommentNode>> = (0..n).map(|_| Vec::new()).collect();
    let mut slots: Vec<Option<Comment>> = comments.into_iter().map(Some).collect();
    let mut roots = Vec::new();
    for level in by_depth.iter().rev() {
        for &i in level {
            let Some(comment) = slots[i].take() else { continue };
            let node = CommentNode {
                comment,
                replies: std::mem::take(&mut replies[i]),
            };
            match anchor[i] {
                Some(p) => replies[p].push(node),
                None => roots.push(node),
            }
        }
    }
    roots
}

// ============================================================================
// FEED RANKING
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedSort {
    /// pinned, trending, score, newest
    #[default]
    Hot,
    New,
    Top,
}

impl FeedSort {
    pub fn parse(s: Option<&str>) -> Self {
        match s.map(|s| s.trim().to_lowercase()).as_deref() {
            Some("new") | Some("newest") => FeedSort::New,
            Some("top") => FeedSort::Top,
            _ => FeedSort::Hot,
        }
    }
}

pub fn rank_posts(posts: &mut [Post], sort: FeedSort) {
    match sort {
        FeedSort::Hot => posts.sort_by(|a, b| {
            b.is_pinned
                .cmp(&a.is_pinned)
                .then(b.is_trending.cmp(&a.is_trending))
                .then(b.score.cmp(&a.score))
                .then(b.created_at.cmp(&a.created_at))
        }),
        FeedSort::New => posts.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        FeedSort::Top => posts.sort_by(|a, b| b.score.cmp(&a.score)),
    }
}

// ============================================================================
// TESTS
// ============================================================================
