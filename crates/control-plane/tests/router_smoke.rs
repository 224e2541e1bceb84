use axum::body::Body;
use axum::http::{Request, StatusCode};
use control_plane::{build_router, AppState};
use tower::util::ServiceExt;

#[tokio::test]
async fn health_is_public() {
    let app = build_router(AppState::for_tests());
    let res = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn owner_surface_requires_a_session() {
    let id = uuid::Uuid::new_v4();
    let routes = [
        ("GET", format!("/api/projects/{id}")),
        ("PATCH", format!("/api/projects/{id}")),
        ("DELETE", format!("/api/projects/{id}")),
        ("GET", format!("/api/projects/{id}/env")),
        ("POST", format!("/api/projects/{id}/env")),
        ("DELETE", format!("/api/projects/{id}/env/API_KEY")),
        ("GET", format!("/api/projects/{id}/deployments")),
        ("GET", format!("/api/deployments/{id}")),
        ("POST", format!("/api/deployments/{id}/cancel")),
        ("POST", format!("/api/deployments/{id}/redeploy")),
        ("GET", format!("/api/deployments/{id}/logs")),
    ];
    for (method, uri) in routes {
        let app = build_router(AppState::for_tests());
        let res = app
            .oneshot(Request::builder().method(method).uri(&uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED, "{method} {uri}");
    }
}

#[tokio::test]
async fn forged_session_cookie_is_rejected() {
    let app = build_router(AppState::for_tests());
    let res = app
        .oneshot(
            Request::builder()
                .uri("/api/auth/me")
                .header("cookie", "rcnbuild_session=forged.token.value")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn webhook_ignores_non_push_without_touching_state() {
    // db is absent in the test state: reaching the store would 503, so a 200
    // here proves the event check answers first.
    let app = build_router(AppState::for_tests());
    let res = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/webhooks/github")
                .header("x-github-event", "pull_request")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn webhook_rejects_unparseable_push() {
    let app = build_router(AppState::for_tests());
    let res = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/webhooks/github")
                .header("x-github-event", "push")
                .body(Body::from("not a payload"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}
