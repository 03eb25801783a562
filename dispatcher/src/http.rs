use axum::{routing, Router};
use tower_http::trace::TraceLayer;

/// The router served by every instance: the liveness probe, with `routes` handling every other path.
///
/// `/ping` is reserved, application routes on that path are never reached.
/// When `debug` is set each request is traced at DEBUG level.
pub fn app(routes: Router, debug: bool) -> Router {
    let app = Router::new()
        .route("/ping", routing::get(ping))
        .fallback_service(routes);

    if debug {
        app.layer(TraceLayer::new_for_http())
    } else {
        app
    }
}

pub async fn ping() -> &'static str {
    "pong\n"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
    };
    use http_body_util::BodyExt; // for `collect`
    use tower::ServiceExt; // for `oneshot`

    async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn ping_responds_pong() {
        for debug in [false, true] {
            let (status, body) = get(app(Router::new(), debug), "/ping").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(&body[..], b"pong\n");
        }
    }

    #[tokio::test]
    async fn ping_rejects_other_methods() {
        let response = app(Router::new(), false)
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/ping")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn unknown_route() {
        let (status, _) = get(app(Router::new(), false), "/jobs").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn merges_application_routes() {
        let routes = Router::new().route("/jobs", routing::get(|| async { "no jobs" }));
        let app = app(routes, false);

        let (status, body) = get(app.clone(), "/jobs").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"no jobs");

        let (status, body) = get(app, "/ping").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"pong\n");
    }

    #[tokio::test]
    async fn application_ping_is_shadowed() {
        let routes = Router::new()
            .route("/ping", routing::get(|| async { "app" }))
            .route("/jobs", routing::get(|| async { "no jobs" }));
        let app = app(routes, true);

        let (status, body) = get(app.clone(), "/ping").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"pong\n");

        let (status, body) = get(app, "/jobs").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"no jobs");
    }
}
