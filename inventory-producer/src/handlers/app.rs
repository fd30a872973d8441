use std::convert::Infallible;
use std::sync::Arc;

use axum::{extract::DefaultBodyLimit, routing, Router};
use inventory_common::source::ObjectSource;
use tower::limit::ConcurrencyLimitLayer;

use crate::producer::Producer;

use super::notification;

#[derive(Clone)]
pub struct AppState {
    pub producer: Arc<Producer>,
    pub source: Arc<dyn ObjectSource>,
}

pub fn add_routes(
    router: Router,
    state: AppState,
    max_body_size: usize,
    concurrency_limit: usize,
) -> Router {
    router
        .route("/", routing::get(index))
        .route("/_readiness", routing::get(index))
        .route("/_liveness", routing::get(index)) // No async loop, just check axum health
        .route(
            "/object-created",
            routing::post(notification::post_object_created)
                .with_state(state)
                .layer::<_, Infallible>(ConcurrencyLimitLayer::new(concurrency_limit))
                .layer(DefaultBodyLimit::max(max_body_size)),
        )
}

pub async fn index() -> &'static str {
    "inventory producer"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt; // for `collect`
    use inventory_common::queue::memory::MemoryQueue;
    use inventory_common::redrive::RedrivePolicy;
    use inventory_common::source::MemorySource;
    use tower::ServiceExt; // for `call`, `oneshot`, and `ready`

    #[tokio::test]
    async fn index() {
        let queue = Arc::new(MemoryQueue::new("test_index", RedrivePolicy::default()));
        let state = AppState {
            producer: Arc::new(Producer::new(queue)),
            source: Arc::new(MemorySource::new()),
        };

        let app = add_routes(Router::new(), state, 1_000_000, 10);

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"inventory producer");
    }
}
