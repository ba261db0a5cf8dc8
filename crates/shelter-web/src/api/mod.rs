mod account;
mod auth_handlers;

use std::sync::Arc;

use axum::http::{header, Method};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use axum::{Json, Router};
use shelter_core::RateLimiter;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::auth::middleware::require_auth;
use crate::middleware::rate_limit::{self, RequestLimiter};
use crate::middleware::security_headers;
use crate::state::AppState;

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Builds the full application router. Every limiter comes from
/// `state.limiters`, so all routers built from one state share buckets.
pub fn app(state: AppState) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .merge(auth_router(&state))
        .merge(password_reset_router(&state))
        .merge(protected_router(&state));

    // CORS: same-origin only by default (no cross-origin requests allowed)
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let router = Router::new().nest("/api", api);
    let router = if state.config.tls.is_enabled() {
        router.layer(from_fn(security_headers::security_headers_with_hsts))
    } else {
        router.layer(from_fn(security_headers::security_headers))
    };

    router
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn request_limiter(state: &AppState, limiter: &Arc<RateLimiter>) -> RequestLimiter {
    RequestLimiter::new(Arc::clone(limiter), state.config.rate_limit.forwarded_hops())
}

/// Login and logout, limited per client IP.
fn auth_router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(auth_handlers::login))
        .route("/auth/logout", post(auth_handlers::logout))
        .route_layer(from_fn_with_state(
            request_limiter(state, &state.limiters.login),
            rate_limit::per_ip,
        ))
}

/// Password reset request and confirmation, limited per client IP.
fn password_reset_router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/auth/password-reset",
            post(auth_handlers::request_password_reset),
        )
        .route(
            "/auth/password-reset/confirm",
            post(auth_handlers::confirm_password_reset),
        )
        .route_layer(from_fn_with_state(
            request_limiter(state, &state.limiters.password_reset),
            rate_limit::per_ip,
        ))
}

/// Authenticated API, limited per user. `require_auth` is the outer layer
/// so the limiter sees the caller's identity.
fn protected_router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/me", get(account::me))
        .route_layer(from_fn_with_state(
            request_limiter(state, &state.limiters.api),
            rate_limit::per_user,
        ))
        .route_layer(from_fn_with_state(state.clone(), require_auth))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    use axum::body::Body;
    use axum::extract::ConnectInfo;
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use serde_json::{json, Value};
    use shelter_core::LimitRule;
    use tower::ServiceExt;

    use crate::auth::jwt;
    use crate::state::testing::{test_config, test_state, JWT_SECRET, PASSWORD};

    const PEER: [u8; 4] = [192, 0, 2, 1];
    const OTHER_PEER: [u8; 4] = [192, 0, 2, 2];

    fn from_peer(mut req: Request<Body>, peer: [u8; 4]) -> Request<Body> {
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((peer, 50000))));
        req
    }

    fn post_json(uri: &str, peer: [u8; 4], body: Value) -> Request<Body> {
        let req = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        from_peer(req, peer)
    }

    fn get_with_token(uri: &str, token: &str) -> Request<Body> {
        let req = Request::builder()
            .uri(uri)
            .header("authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        from_peer(req, PEER)
    }

    fn token_for(username: &str) -> String {
        jwt::create_token(JWT_SECRET, 1, username).unwrap().0
    }

    async fn send(app: &Router, req: Request<Body>) -> Response {
        app.clone().oneshot(req).await.unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_never_limited() {
        let (state, _) = test_state(test_config());
        let app = app(state);

        for _ in 0..50 {
            let req = from_peer(
                Request::builder().uri("/api/health").body(Body::empty()).unwrap(),
                PEER,
            );
            let response = send(&app, req).await;
            assert_eq!(response.status(), StatusCode::OK);
            assert!(response.headers().get(rate_limit::LIMIT_HEADER).is_none());
        }
    }

    #[tokio::test]
    async fn login_issues_token_for_valid_credentials() {
        let (state, _) = test_state(test_config());
        let app = app(state);

        let response = send(
            &app,
            post_json("/api/auth/login", PEER, json!({ "username": "ada", "password": PASSWORD })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        let token = body["token"].as_str().unwrap();
        assert_eq!(jwt::verify_token(JWT_SECRET, token).unwrap().sub, "ada");
    }

    #[tokio::test]
    async fn sixth_login_from_one_address_is_rejected() {
        let (state, _) = test_state(test_config());
        let app = app(state);
        let attempt = json!({ "username": "nobody", "password": "guess" });

        for _ in 0..5 {
            let response = send(&app, post_json("/api/auth/login", PEER, attempt.clone())).await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }

        let response = send(&app, post_json("/api/auth/login", PEER, attempt.clone())).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "60");
        assert_eq!(body_json(response).await["error"], "Too many requests");

        let response = send(&app, post_json("/api/auth/login", OTHER_PEER, attempt)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn forwarded_address_is_used_when_trusted() {
        let mut config = test_config();
        config.rate_limit.trust_forwarded_headers = true;
        config.rate_limit.login = LimitRule::per_minute(1);
        let (state, _) = test_state(config);
        let app = app(state);
        let attempt = json!({ "username": "nobody", "password": "guess" });

        let forwarded = |client: &'static str| {
            let mut req = post_json("/api/auth/login", PEER, attempt.clone());
            req.headers_mut()
                .insert("x-forwarded-for", header::HeaderValue::from_static(client));
            req
        };

        assert_eq!(send(&app, forwarded("203.0.113.1")).await.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(send(&app, forwarded("203.0.113.1")).await.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(send(&app, forwarded("203.0.113.2")).await.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn me_requires_a_valid_token() {
        let (state, _) = test_state(test_config());
        let app = app(state);

        let anonymous = from_peer(
            Request::builder().uri("/api/me").body(Body::empty()).unwrap(),
            PEER,
        );
        assert_eq!(send(&app, anonymous).await.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            send(&app, get_with_token("/api/me", "garbage")).await.status(),
            StatusCode::UNAUTHORIZED
        );

        let response = send(&app, get_with_token("/api/me", &token_for("ada"))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["username"], "ada");
        assert_eq!(body["email"], "ada@example.org");
    }

    #[tokio::test]
    async fn api_limit_is_per_user_not_per_address() {
        let mut config = test_config();
        config.rate_limit.api = LimitRule::per_minute(2);
        let (state, _) = test_state(config);
        let app = app(state);
        let ada = token_for("ada");
        let grace = token_for("grace");

        assert_eq!(send(&app, get_with_token("/api/me", &ada)).await.status(), StatusCode::OK);
        assert_eq!(send(&app, get_with_token("/api/me", &ada)).await.status(), StatusCode::OK);
        assert_eq!(
            send(&app, get_with_token("/api/me", &ada)).await.status(),
            StatusCode::TOO_MANY_REQUESTS
        );

        // Same client address, different account.
        let response = send(&app, get_with_token("/api/me", &grace)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[rate_limit::REMAINING_HEADER], "1");
    }

    #[tokio::test]
    async fn login_and_api_limits_do_not_share_buckets() {
        let mut config = test_config();
        config.rate_limit.login = LimitRule::per_minute(1);
        let (state, _) = test_state(config);
        let app = app(state);
        let attempt = json!({ "username": "nobody", "password": "guess" });

        send(&app, post_json("/api/auth/login", PEER, attempt.clone())).await;
        assert_eq!(
            send(&app, post_json("/api/auth/login", PEER, attempt)).await.status(),
            StatusCode::TOO_MANY_REQUESTS
        );

        let response = send(&app, get_with_token("/api/me", &token_for("ada"))).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn logout_revokes_token() {
        let (state, _) = test_state(test_config());
        let app = app(state);
        let token = token_for("ada");

        assert_eq!(send(&app, get_with_token("/api/me", &token)).await.status(), StatusCode::OK);

        let mut logout = post_json("/api/auth/logout", PEER, json!({}));
        logout.headers_mut().insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        assert_eq!(send(&app, logout).await.status(), StatusCode::OK);

        assert_eq!(
            send(&app, get_with_token("/api/me", &token)).await.status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn password_reset_round_trip() {
        let mut config = test_config();
        config.rate_limit.password_reset = LimitRule::new(10, 900);
        let (state, notifier) = test_state(config);
        let app = app(state);

        let response = send(
            &app,
            post_json("/api/auth/password-reset", PEER, json!({ "username": "ada" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let message = notifier.sent.lock().unwrap().pop().unwrap();
        assert_eq!(message.to, "ada@example.org");
        assert_eq!(message.subject, "Password reset");
        let token = message
            .body
            .split("Reset code: ")
            .nth(1)
            .and_then(|rest| rest.split_whitespace().next())
            .unwrap()
            .to_string();

        let too_short = json!({ "token": token, "new_password": "short" });
        let response = send(&app, post_json("/api/auth/password-reset/confirm", PEER, too_short)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let confirm = json!({ "token": token, "new_password": "fresh-kibble-42" });
        let response = send(
            &app,
            post_json("/api/auth/password-reset/confirm", PEER, confirm.clone()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(
            &app,
            post_json(
                "/api/auth/login",
                PEER,
                json!({ "username": "ada", "password": "fresh-kibble-42" }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(&app, post_json("/api/auth/password-reset/confirm", PEER, confirm)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn password_reset_for_unknown_user_looks_the_same() {
        let (state, notifier) = test_state(test_config());
        let app = app(state);

        let response = send(
            &app,
            post_json("/api/auth/password-reset", PEER, json!({ "username": "mallory" })),
        )
        .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn password_reset_is_limited_per_address() {
        let (state, _) = test_state(test_config());
        let app = app(state);
        let request = json!({ "username": "mallory" });

        for _ in 0..3 {
            let response = send(&app, post_json("/api/auth/password-reset", PEER, request.clone())).await;
            assert_eq!(response.status(), StatusCode::ACCEPTED);
        }

        let response = send(&app, post_json("/api/auth/password-reset", PEER, request)).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "900");

        let confirm = json!({ "token": "whatever", "new_password": "long-enough-password" });
        let response = send(&app, post_json("/api/auth/password-reset/confirm", PEER, confirm)).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
