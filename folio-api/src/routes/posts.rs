//! Post Endpoints
//!
//! - `GET /api/posts` - published posts, paginated, cached per page
//! - `GET /api/posts/:id` - one post; drafts only for their author or editors
//! - `PATCH /api/posts/:id` - `posts:update`, or the post's author

use axum::{
    extract::{Path, Query, State},
    middleware::from_fn_with_state,
    routing::{get, patch},
    Json, Router,
};
use folio_core::{ActionKind, Permission, ResourceKind};
use folio_storage::{BatchQuery, QueryConfig, QueryData, Row, Statement};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::access::{AccessPolicy, ResolvedIdentity};
use crate::error::{ApiError, ApiResult};
use crate::middleware::{
    auth_middleware, optional_auth_middleware, require_access, AccessGuard, AuthExtractor,
    MaybeAuth,
};
use crate::state::AppState;

const LIST_PUBLISHED: &str = "SELECT id, title, slug, excerpt, author_id, published_at \
     FROM posts WHERE status = 'published' ORDER BY published_at DESC LIMIT ? OFFSET ?";
const COUNT_PUBLISHED: &str = "SELECT COUNT(*) AS total FROM posts WHERE status = 'published'";
const POST_BY_ID: &str = "SELECT id, title, slug, excerpt, content, status, author_id, \
     published_at, updated_at FROM posts WHERE id = ?";
const UPDATE_POST: &str = "UPDATE posts SET title = COALESCE(?, title), \
     content = COALESCE(?, content), excerpt = COALESCE(?, excerpt), \
     status = COALESCE(?, status), updated_at = CURRENT_TIMESTAMP WHERE id = ?";

/// Every post cache key starts with this, so one invalidation covers lists and items.
const POSTS_CACHE_PATTERN: &str = "posts:";

const DEFAULT_PAGE_SIZE: u32 = 10;
const MAX_PAGE_SIZE: u32 = 50;
const POST_STATUSES: &[&str] = &["draft", "published", "archived"];

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostListResponse {
    pub posts: Vec<Row>,
    pub page: u32,
    pub limit: u32,
    pub total: Option<i64>,
    pub from_cache: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePostRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub excerpt: Option<String>,
    pub status: Option<String>,
}

impl UpdatePostRequest {
    fn validate(&self) -> ApiResult<()> {
        if self.title.is_none()
            && self.content.is_none()
            && self.excerpt.is_none()
            && self.status.is_none()
        {
            return Err(ApiError::invalid_input("No fields to update"));
        }
        if matches!(self.title.as_deref(), Some(t) if t.trim().is_empty()) {
            return Err(ApiError::invalid_input("title must not be empty"));
        }
        if let Some(status) = self.status.as_deref() {
            if !POST_STATUSES.contains(&status) {
                return Err(ApiError::invalid_input(format!(
                    "status must be one of: {}",
                    POST_STATUSES.join(", ")
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePostResponse {
    pub id: i64,
    pub changes: u64,
}

fn post_cache_key(id: i64) -> String {
    format!("posts:id:{}", id)
}

fn list_cache_key(page: u32, limit: u32) -> String {
    format!("posts:list:page:{}:limit:{}", page, limit)
}

/// Drafts and archived posts are visible to their author and to anyone
/// who may edit posts in general.
fn can_view(post: &Row, viewer: Option<&ResolvedIdentity>) -> bool {
    if post.get("status").and_then(Value::as_str) == Some("published") {
        return true;
    }
    let Some(viewer) = viewer else {
        return false;
    };
    let is_author = post.get("author_id").and_then(Value::as_i64) == Some(viewer.user_id.get());
    is_author
        || viewer
            .permissions
            .allows(&Permission::new(ResourceKind::Posts, ActionKind::Update))
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /api/posts
pub async fn list_posts(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<PostListResponse>> {
    let page = params.page.unwrap_or(1).max(1);
    let limit = params
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let offset = (page - 1) as u64 * limit as u64;

    let mut results = state
        .executor
        .execute_batch(vec![
            BatchQuery::new(
                Statement::all(LIST_PUBLISHED, vec![json!(limit), json!(offset)]),
                QueryConfig::new().with_cache_key(list_cache_key(page, limit)),
            ),
            BatchQuery::new(
                Statement::first(COUNT_PUBLISHED, Vec::new()),
                QueryConfig::new().with_cache_key("posts:count:published"),
            ),
        ])
        .await
        .into_iter();

    let expose = state.expose_error_details();
    let listed = results
        .next()
        .ok_or_else(|| ApiError::internal_error("Batch returned no list result"))?
        .map_err(|e| ApiError::from_query_error(e, expose))?;
    let posts = match listed.data {
        QueryData::Rows(rows) => rows,
        _ => return Err(ApiError::internal_error("Post list returned unexpected shape")),
    };

    // The count is decoration; a failure there does not fail the page.
    let total = match results.next() {
        Some(Ok(outcome)) => match outcome.data {
            QueryData::Row(Some(row)) => row.get("total").and_then(Value::as_i64),
            _ => None,
        },
        Some(Err(e)) => {
            tracing::warn!(error = %e, "Post count failed");
            None
        }
        None => None,
    };

    Ok(Json(PostListResponse {
        posts,
        page,
        limit,
        total,
        from_cache: listed.from_cache,
    }))
}

/// GET /api/posts/:id
pub async fn get_post(
    State(state): State<AppState>,
    MaybeAuth(viewer): MaybeAuth,
    Path(id): Path<i64>,
) -> ApiResult<Json<Row>> {
    let post = state
        .executor
        .first(
            POST_BY_ID,
            vec![json!(id)],
            &QueryConfig::new().with_cache_key(post_cache_key(id)),
        )
        .await
        .map_err(|e| ApiError::from_query_error(e, state.expose_error_details()))?
        .ok_or_else(|| ApiError::entity_not_found("Post", id))?;

    if !can_view(&post, viewer.as_ref()) {
        return Err(ApiError::entity_not_found("Post", id));
    }
    Ok(Json(post))
}

/// PATCH /api/posts/:id
pub async fn update_post(
    State(state): State<AppState>,
    AuthExtractor(editor): AuthExtractor,
    Path(id): Path<i64>,
    Json(req): Json<UpdatePostRequest>,
) -> ApiResult<Json<UpdatePostResponse>> {
    req.validate()?;

    let ack = state
        .executor
        .run(
            UPDATE_POST,
            vec![
                json!(req.title),
                json!(req.content),
                json!(req.excerpt),
                json!(req.status),
                json!(id),
            ],
            &QueryConfig::new().invalidates(POSTS_CACHE_PATTERN),
        )
        .await
        .map_err(|e| ApiError::from_query_error(e, state.expose_error_details()))?;

    if ack.changes == 0 {
        return Err(ApiError::entity_not_found("Post", id));
    }

    tracing::info!(user_id = %editor.user_id, post_id = id, "Post updated");
    Ok(Json(UpdatePostResponse {
        id,
        changes: ack.changes,
    }))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router(state: AppState) -> Router {
    let update_guard = AccessGuard::new(
        AccessPolicy::permission(Permission::new(ResourceKind::Posts, ActionKind::Update))
            .allow_self_access(ResourceKind::Posts),
        state.ownership.clone(),
    );

    let read = get(get_post).route_layer(from_fn_with_state(
        state.auth.clone(),
        optional_auth_middleware,
    ));
    let write = patch(update_post)
        .route_layer(from_fn_with_state(update_guard, require_access))
        .route_layer(from_fn_with_state(state.auth.clone(), auth_middleware));

    Router::new()
        .route("/", get(list_posts))
        .route("/:id", read.merge(write))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::{PermissionSet, Role, UserId};

    fn post(status: &str, author_id: i64) -> Row {
        let mut row = Row::new();
        row.insert("status".to_string(), json!(status));
        row.insert("author_id".to_string(), json!(author_id));
        row
    }

    fn viewer(id: i64, role: Role, permissions: Vec<Permission>) -> ResolvedIdentity {
        ResolvedIdentity {
            user_id: UserId::new(id),
            email: None,
            role,
            permissions: PermissionSet::new(permissions),
        }
    }

    #[test]
    fn test_published_posts_visible_to_everyone() {
        assert!(can_view(&post("published", 1), None));
    }

    #[test]
    fn test_drafts_hidden_from_anonymous_and_strangers() {
        let draft = post("draft", 1);
        assert!(!can_view(&draft, None));
        assert!(!can_view(&draft, Some(&viewer(2, Role::User, Vec::new()))));
    }

    #[test]
    fn test_drafts_visible_to_author_and_editors() {
        let draft = post("draft", 1);
        assert!(can_view(&draft, Some(&viewer(1, Role::User, Vec::new()))));
        assert!(can_view(
            &draft,
            Some(&viewer(
                9,
                Role::Editor,
                vec![Permission::new(ResourceKind::Posts, ActionKind::Any)]
            ))
        ));
    }

    #[test]
    fn test_update_validation() {
        assert!(UpdatePostRequest::default().validate().is_err());

        let blank_title = UpdatePostRequest {
            title: Some("  ".to_string()),
            ..UpdatePostRequest::default()
        };
        assert!(blank_title.validate().is_err());

        let bad_status = UpdatePostRequest {
            status: Some("deleted".to_string()),
            ..UpdatePostRequest::default()
        };
        assert!(bad_status.validate().is_err());

        let ok = UpdatePostRequest {
            status: Some("archived".to_string()),
            ..UpdatePostRequest::default()
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_cache_keys_share_invalidation_prefix() {
        assert!(post_cache_key(5).starts_with(POSTS_CACHE_PATTERN));
        assert!(list_cache_key(2, 10).starts_with(POSTS_CACHE_PATTERN));
    }
}
