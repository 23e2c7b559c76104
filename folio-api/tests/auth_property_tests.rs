//! Property-Based Tests for Authentication Enforcement
//!
//! For any request to an authenticated route: a missing or non-Bearer
//! `Authorization` header yields 401 `AUTH_REQUIRED`, an unverifiable token
//! yields 401 `INVALID_TOKEN`, and a token signed with the right secret is
//! accepted with the identity it carries.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use folio_test_utils::generators::{arb_garbage_token, arb_non_admin_role, arb_role};
use folio_test_utils::{MockBackingStore, Role, TestApp};
use proptest::prelude::*;
use serde_json::Value;
use tower::ServiceExt;

// ============================================================================
// PROPERTY TEST STRATEGIES
// ============================================================================

#[derive(Debug, Clone)]
enum AuthHeader {
    /// Token signed by the application's own secret
    Valid { user_id: i64, role: Role },
    /// Bearer scheme, but not a token we issued
    Garbage(String),
    /// Some other scheme
    WrongScheme(String),
    /// No header at all
    None,
}

fn auth_header_strategy() -> impl Strategy<Value = AuthHeader> {
    prop_oneof![
        (1i64..10_000, arb_role()).prop_map(|(user_id, role)| AuthHeader::Valid { user_id, role }),
        arb_garbage_token().prop_map(AuthHeader::Garbage),
        "(Basic|Token|Digest) [A-Za-z0-9]{8,32}".prop_map(AuthHeader::WrongScheme),
        Just(AuthHeader::None),
    ]
}

async fn call(app: &TestApp, uri: &str, auth: Option<String>) -> (StatusCode, Value) {
    let mut builder = Request::builder().uri(uri);
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    let request = builder.body(Body::empty()).expect("request should build");
    let response = app
        .router()
        .oneshot(request)
        .await
        .expect("router is infallible");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable");
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_authentication_enforcement(auth_header in auth_header_strategy()) {
        let rt = tokio::runtime::Runtime::new().expect("runtime should start");
        rt.block_on(async {
            let app = TestApp::new(MockBackingStore::new());

            let header_value = match &auth_header {
                AuthHeader::Valid { user_id, role } => Some(app.bearer(*user_id, *role)),
                AuthHeader::Garbage(token) => Some(format!("Bearer {}", token)),
                AuthHeader::WrongScheme(value) => Some(value.clone()),
                AuthHeader::None => None,
            };

            let (status, body) = call(&app, "/api/auth/me", header_value).await;

            match &auth_header {
                AuthHeader::Valid { user_id, role } => {
                    prop_assert_eq!(status, StatusCode::OK);
                    prop_assert_eq!(&body["userId"], &Value::from(*user_id));
                    prop_assert_eq!(&body["role"], &Value::from(role.as_str()));
                }
                AuthHeader::Garbage(_) => {
                    prop_assert_eq!(status, StatusCode::UNAUTHORIZED);
                    prop_assert_eq!(&body["code"], "INVALID_TOKEN");
                }
                AuthHeader::WrongScheme(_) | AuthHeader::None => {
                    prop_assert_eq!(status, StatusCode::UNAUTHORIZED);
                    prop_assert_eq!(&body["code"], "AUTH_REQUIRED");
                }
            }
            Ok(())
        })?;
    }

    /// Admin routes admit exactly the admin role, whatever the user id.
    #[test]
    fn prop_admin_routes_admit_only_admins(user_id in 1i64..10_000, role in arb_non_admin_role()) {
        let rt = tokio::runtime::Runtime::new().expect("runtime should start");
        rt.block_on(async {
            let app = TestApp::new(MockBackingStore::new());

            let (status, body) =
                call(&app, "/api/admin/cache/stats", Some(app.bearer(user_id, role))).await;
            prop_assert_eq!(status, StatusCode::FORBIDDEN);
            prop_assert_eq!(&body["code"], "INSUFFICIENT_ROLE");

            let (status, _) =
                call(&app, "/api/admin/cache/stats", Some(app.bearer(user_id, Role::Admin))).await;
            prop_assert_eq!(status, StatusCode::OK);
            Ok(())
        })?;
    }
}
