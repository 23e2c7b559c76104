//! Router-level tests: authentication, access policies, cache
//! administration and the posts handlers, driven through the full
//! `create_api_router` stack with `oneshot`.

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use folio_api::ApiConfig;
use folio_test_utils::fixtures::{auth_config_at, test_auth_config, token_for, TEST_NOW};
use folio_test_utils::{row, MockBackingStore, Role, TestApp};
use serde_json::{json, Value};
use tower::ServiceExt; // for `oneshot`

// ============================================================================
// HELPERS
// ============================================================================

const OWNERSHIP_SQL: &str = "SELECT author_id FROM posts";
const POST_SQL: &str = "FROM posts WHERE id = ?";

async fn send(app: Router, request: Request<Body>) -> Result<(StatusCode, Value), String> {
    let response = app.oneshot(request).await.map_err(|e| e.to_string())?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .map_err(|e| e.to_string())?;
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    Ok((status, body))
}

fn get(uri: &str, auth: Option<&str>) -> Result<Request<Body>, String> {
    let mut builder = Request::builder().uri(uri);
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    builder.body(Body::empty()).map_err(|e| e.to_string())
}

fn with_json(method: Method, uri: &str, auth: &str, body: Value) -> Result<Request<Body>, String> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, auth)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .map_err(|e| e.to_string())
}

fn posts_store(status: &str, author_id: i64) -> MockBackingStore {
    MockBackingStore::new()
        .with_rows(OWNERSHIP_SQL, vec![row([("author_id", json!(author_id))])])
        .with_rows(
            POST_SQL,
            vec![row([
                ("id", json!(5)),
                ("title", json!("Hello")),
                ("status", json!(status)),
                ("author_id", json!(author_id)),
            ])],
        )
        .with_ack("UPDATE posts", 1, None)
}

// ============================================================================
// AUTHENTICATION
// ============================================================================

#[tokio::test]
async fn test_me_requires_authentication() -> Result<(), String> {
    let app = TestApp::new(MockBackingStore::new());

    let (status, body) = send(app.router(), get("/api/auth/me", None)?).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "AUTH_REQUIRED");
    Ok(())
}

#[tokio::test]
async fn test_me_rejects_non_bearer_scheme() -> Result<(), String> {
    let app = TestApp::new(MockBackingStore::new());

    let (status, body) = send(app.router(), get("/api/auth/me", Some("Basic dXNlcjpwYXNz"))?).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "AUTH_REQUIRED");
    Ok(())
}

#[tokio::test]
async fn test_me_rejects_bad_and_expired_tokens() -> Result<(), String> {
    let app = TestApp::new(MockBackingStore::new());

    let (status, body) = send(app.router(), get("/api/auth/me", Some("Bearer not.a.jwt"))?).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "INVALID_TOKEN");

    // Issued two hours before the app's clock, valid for one.
    let stale = token_for(&auth_config_at(TEST_NOW - 7200), 7, Role::Author, None);
    let (status, body) = send(
        app.router(),
        get("/api/auth/me", Some(&format!("Bearer {}", stale)))?,
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "INVALID_TOKEN");
    Ok(())
}

#[tokio::test]
async fn test_me_returns_role_defaults_and_caches_them() -> Result<(), String> {
    let app = TestApp::new(MockBackingStore::new());
    let auth = app.bearer(7, Role::Author);

    let (status, body) = send(app.router(), get("/api/auth/me", Some(&auth))?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["userId"], 7);
    assert_eq!(body["role"], "author");
    assert_eq!(body["email"], "user7@example.com");
    let permissions = body["permissions"]
        .as_array()
        .ok_or("permissions should be an array")?;
    assert!(permissions.contains(&json!("posts:update")));
    assert!(app.kv.contains_key("user_permissions:7"));
    Ok(())
}

#[tokio::test]
async fn test_token_permissions_take_precedence() -> Result<(), String> {
    let app = TestApp::new(MockBackingStore::new());
    let auth = app.bearer_with_permissions(8, Role::User, vec!["analytics:read"]);

    let (status, body) = send(app.router(), get("/api/auth/me", Some(&auth))?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["permissions"], json!(["analytics:read"]));
    assert!(!app.kv.contains_key("user_permissions:8"));
    Ok(())
}

// ============================================================================
// ADMIN ENDPOINTS
// ============================================================================

#[tokio::test]
async fn test_admin_routes_require_admin_role() -> Result<(), String> {
    let app = TestApp::new(MockBackingStore::new());
    let editor = app.bearer(3, Role::Editor);

    let (status, body) = send(app.router(), get("/api/admin/cache/stats", Some(&editor))?).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "INSUFFICIENT_ROLE");
    assert_eq!(body["details"]["requiredRole"], "admin");
    Ok(())
}

#[tokio::test]
async fn test_admin_cache_stats_and_invalidation() -> Result<(), String> {
    let app = TestApp::new(posts_store("published", 1));
    let admin = app.bearer(1, Role::Admin);

    // Prime the cache, then hit it.
    for _ in 0..2 {
        let (status, _) = send(app.router(), get("/api/posts/5", None)?).await?;
        assert_eq!(status, StatusCode::OK);
    }
    assert_eq!(app.store.calls_matching(POST_SQL), 1);

    let (status, body) = send(app.router(), get("/api/admin/cache/stats", Some(&admin))?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cache"]["l1Entries"], 1);
    assert_eq!(body["cache"]["l1Hits"], 1);
    assert_eq!(body["queries"]["invocations"], 2);
    assert_eq!(body["queries"]["cacheHits"], 1);

    let (status, body) = send(
        app.router(),
        with_json(
            Method::POST,
            "/api/admin/cache/invalidate",
            &admin,
            json!({ "pattern": "posts:id:" }),
        )?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["invalidated"], 1);
    // Let the queued L2 deletion land before reading again.
    app.state.executor.cache().flush().await;

    let (status, _) = send(app.router(), get("/api/posts/5", None)?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.store.calls_matching(POST_SQL), 2);
    Ok(())
}

#[tokio::test]
async fn test_admin_invalidate_rejects_blank_pattern() -> Result<(), String> {
    let app = TestApp::new(MockBackingStore::new());
    let admin = app.bearer(1, Role::Admin);

    let (status, body) = send(
        app.router(),
        with_json(
            Method::POST,
            "/api/admin/cache/invalidate",
            &admin,
            json!({ "pattern": "  " }),
        )?,
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_INPUT");
    Ok(())
}

#[tokio::test]
async fn test_admin_evicts_user_permissions() -> Result<(), String> {
    let app = TestApp::new(MockBackingStore::new());
    let admin = app.bearer(1, Role::Admin);
    let user = app.bearer(42, Role::User);

    send(app.router(), get("/api/auth/me", Some(&user))?).await?;
    assert!(app.kv.contains_key("user_permissions:42"));

    let request = Request::builder()
        .method(Method::DELETE)
        .uri("/api/admin/users/42/permissions")
        .header(header::AUTHORIZATION, &admin)
        .body(Body::empty())
        .map_err(|e| e.to_string())?;
    let (status, body) = send(app.router(), request).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["userId"], 42);
    assert_eq!(body["evicted"], true);
    assert!(!app.kv.contains_key("user_permissions:42"));
    Ok(())
}

// ============================================================================
// POSTS
// ============================================================================

#[tokio::test]
async fn test_list_posts_paginates_and_caches() -> Result<(), String> {
    let store = MockBackingStore::new()
        .with_rows("COUNT(*)", vec![row([("total", json!(12))])])
        .with_rows(
            "status = 'published'",
            vec![row([("id", json!(1))]), row([("id", json!(2))])],
        );
    let app = TestApp::new(store);

    let (status, body) = send(app.router(), get("/api/posts?page=2&limit=500", None)?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["page"], 2);
    assert_eq!(body["limit"], 50);
    assert_eq!(body["total"], 12);
    assert_eq!(body["fromCache"], false);
    assert_eq!(body["posts"].as_array().map(Vec::len), Some(2));

    let (_, body) = send(app.router(), get("/api/posts?page=2&limit=500", None)?).await?;
    assert_eq!(body["fromCache"], true);
    Ok(())
}

#[tokio::test]
async fn test_draft_visible_only_to_author() -> Result<(), String> {
    let app = TestApp::new(posts_store("draft", 7));

    let (status, body) = send(app.router(), get("/api/posts/5", None)?).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    let stranger = app.bearer(8, Role::User);
    let (status, _) = send(app.router(), get("/api/posts/5", Some(&stranger))?).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let author = app.bearer(7, Role::User);
    let (status, body) = send(app.router(), get("/api/posts/5", Some(&author))?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "Hello");
    Ok(())
}

#[tokio::test]
async fn test_optional_auth_ignores_bad_token() -> Result<(), String> {
    let app = TestApp::new(posts_store("published", 7));

    let (status, body) = send(app.router(), get("/api/posts/5", Some("Bearer garbage"))?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], 5);
    Ok(())
}

#[tokio::test]
async fn test_update_post_self_access() -> Result<(), String> {
    let app = TestApp::new(posts_store("published", 7));
    let owner = app.bearer(7, Role::User);

    let (status, body) = send(
        app.router(),
        with_json(Method::PATCH, "/api/posts/5", &owner, json!({ "title": "Updated" }))?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], 5);
    assert_eq!(body["changes"], 1);
    assert_eq!(app.store.calls_matching(OWNERSHIP_SQL), 1);
    Ok(())
}

#[tokio::test]
async fn test_update_post_denied_for_non_owner() -> Result<(), String> {
    let app = TestApp::new(posts_store("published", 7));
    let other = app.bearer(9, Role::User);

    let (status, body) = send(
        app.router(),
        with_json(Method::PATCH, "/api/posts/5", &other, json!({ "title": "Hijack" }))?,
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "ACCESS_DENIED");
    assert_eq!(app.store.calls_matching("UPDATE posts"), 0);
    Ok(())
}

#[tokio::test]
async fn test_update_post_by_permission_invalidates_cache() -> Result<(), String> {
    let app = TestApp::new(posts_store("published", 7));
    let editor = app.bearer(3, Role::Editor);

    send(app.router(), get("/api/posts/5", None)?).await?;
    assert_eq!(app.state.executor.cache().l1_len(), 1);

    let (status, _) = send(
        app.router(),
        with_json(Method::PATCH, "/api/posts/5", &editor, json!({ "status": "archived" }))?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    // Editors hold posts:*, so no ownership lookup is needed.
    assert_eq!(app.store.calls_matching(OWNERSHIP_SQL), 0);
    assert_eq!(app.state.executor.cache().l1_len(), 0);
    Ok(())
}

#[tokio::test]
async fn test_update_post_requires_authentication() -> Result<(), String> {
    let app = TestApp::new(posts_store("published", 7));
    let request = Request::builder()
        .method(Method::PATCH)
        .uri("/api/posts/5")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "title": "x" }).to_string()))
        .map_err(|e| e.to_string())?;

    let (status, body) = send(app.router(), request).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "AUTH_REQUIRED");
    Ok(())
}

// ============================================================================
// ERRORS, HEALTH, METRICS
// ============================================================================

#[tokio::test]
async fn test_database_errors_hidden_outside_development() -> Result<(), String> {
    let production = ApiConfig {
        environment: "production".to_string(),
        ..ApiConfig::default()
    };
    let store = MockBackingStore::new().failing_on(POST_SQL, "relation \"posts\" does not exist");
    let app = TestApp::with_config(store, test_auth_config(), production);

    let (status, body) = send(app.router(), get("/api/posts/5", None)?).await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "INTERNAL_ERROR");
    assert!(!body["error"].as_str().unwrap_or_default().contains("relation"));

    let store = MockBackingStore::new().failing_on(POST_SQL, "relation \"posts\" does not exist");
    let app = TestApp::new(store);
    let (status, body) = send(app.router(), get("/api/posts/5", None)?).await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "DATABASE_ERROR");
    assert!(body["error"].as_str().unwrap_or_default().contains("relation"));
    Ok(())
}

#[tokio::test]
async fn test_health_ready_reflects_store() -> Result<(), String> {
    let app = TestApp::new(MockBackingStore::new());

    let (status, body) = send(app.router(), get("/health/ready", None)?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    app.store.set_healthy(false);
    let (status, body) = send(app.router(), get("/health/ready", None)?).await?;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
    Ok(())
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_prometheus_text() -> Result<(), String> {
    let app = TestApp::new(MockBackingStore::new());
    send(app.router(), get("/health/live", None)?).await?;

    let response = app
        .router()
        .oneshot(get("/metrics", None)?)
        .await
        .map_err(|e| e.to_string())?;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .map_err(|e| e.to_string())?;
    let text = String::from_utf8(bytes.to_vec()).map_err(|e| e.to_string())?;
    assert!(text.contains("folio_http_requests_total"));
    assert!(text.contains("folio_cache_l1_entries"));
    Ok(())
}
