use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Redirect},
    routing::get,
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{response::render_table, scheduler::Sampler, store::Sample};

/// Read-only view of the store plus the manual "sample now" hook.
pub struct Facade {
    sampler: Arc<Sampler>,
}

impl Facade {
    pub fn new(sampler: Arc<Sampler>) -> Self {
        Facade { sampler }
    }

    pub fn snapshot(&self) -> Vec<Sample> {
        self.sampler.store().snapshot_all()
    }

    /// Runs one sampling tick right away. A failed read only means the
    /// returned snapshot lacks the newest point.
    pub async fn refresh(&self) -> Vec<Sample> {
        if let Err(e) = self.sampler.sample_once().await {
            warn!("manual refresh failed: {}", e);
        }
        self.snapshot()
    }
}

// =============================================================================
// Router
// =============================================================================

pub fn create_router(facade: Arc<Facade>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/refresh", get(refresh))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(facade)
}

pub async fn serve(listener: TcpListener, facade: Arc<Facade>) -> anyhow::Result<()> {
    info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, create_router(facade)).await?;
    Ok(())
}

// =============================================================================
// Handlers
// =============================================================================

async fn index(State(facade): State<Arc<Facade>>) -> Html<String> {
    Html(render_table(&facade.snapshot()))
}

async fn refresh(State(facade): State<Arc<Facade>>) -> Redirect {
    facade.refresh().await;
    Redirect::to("/")
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "not found\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::SampleError, sensor::SampleSource, store::Store};
    use axum::{
        body::Body,
        http::{header, Method, Request},
    };
    use std::time::Duration;
    use tower::util::ServiceExt;

    struct Fixed(f64);

    impl SampleSource for Fixed {
        fn read(&self) -> Result<f64, SampleError> {
            Ok(self.0)
        }
    }

    struct Broken;

    impl SampleSource for Broken {
        fn read(&self) -> Result<f64, SampleError> {
            Err(SampleError::Parse {
                output: String::new(),
            })
        }
    }

    fn facade(source: Arc<dyn SampleSource>) -> (Arc<Store>, Arc<Facade>) {
        let store = Arc::new(Store::new(Duration::from_secs(3600)));
        let sampler = Arc::new(Sampler::new(store.clone(), source, "%Y-%m-%d %H:%M:%S", None));
        (store, Arc::new(Facade::new(sampler)))
    }

    fn request(method: Method, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn refresh_records_and_returns_snapshot() {
        let (store, facade) = facade(Arc::new(Fixed(48.0)));
        let samples = facade.refresh().await;
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value, 48.0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn refresh_with_broken_sensor_returns_existing() {
        let (store, facade) = facade(Arc::new(Broken));
        store.set("2024-01-01 00:00:00", 20.0);
        let samples = facade.refresh().await;
        assert_eq!(samples.len(), 1);
    }

    #[tokio::test]
    async fn index_lists_entries_in_order() {
        let (store, facade) = facade(Arc::new(Fixed(1.0)));
        store.set("2024-01-01 00:05:00", 21.3);
        store.set("2024-01-01 00:00:00", 20.1);

        let response = create_router(facade)
            .oneshot(request(Method::GET, "/"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/html"));

        let html = body_text(response).await;
        let first = html.find("2024-01-01 00:00:00").unwrap();
        let second = html.find("2024-01-01 00:05:00").unwrap();
        assert!(first < second);
    }

    #[tokio::test]
    async fn refresh_redirects_to_index() {
        let (store, facade) = facade(Arc::new(Fixed(50.5)));
        let response = create_router(facade)
            .oneshot(request(Method::GET, "/refresh"))
            .await
            .unwrap();
        assert!(response.status().is_redirection());
        assert_eq!(response.headers()[header::LOCATION], "/");
        assert_eq!(store.snapshot_all()[0].value, 50.5);
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let (_, facade) = facade(Arc::new(Fixed(1.0)));
        let response = create_router(facade)
            .oneshot(request(Method::GET, "/missing"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn post_is_not_allowed() {
        let (store, facade) = facade(Arc::new(Fixed(1.0)));
        let response = create_router(facade)
            .oneshot(request(Method::POST, "/refresh"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn serves_over_tcp() {
        let (store, facade) = facade(Arc::new(Fixed(1.0)));
        store.set("2024-01-01 00:00:00", 20.1);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve(listener, facade));

        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        server.abort();

        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("2024-01-01 00:00:00"));
    }
}
