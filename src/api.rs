use std::future::Future;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::body::Bytes;
use axum::error_handling::HandleErrorLayer;
use axum::extract::{Path as UrlPath, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use tower::ServiceBuilder;

use crate::config::ApiListen;
use crate::container::ContainerID;
use crate::registry::{self, Added, Registry};
use crate::systemd::{self, ActivatedListener};

pub mod models;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to bind API listener on `{addr}`: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to use systemd socket: {0}")]
    Systemd(#[from] systemd::Error),
    #[error("API server failed: {0}")]
    Serve(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

type AppState = State<Arc<Registry>>;

async fn index() -> Response {
    (StatusCode::NOT_FOUND, "Not Found").into_response()
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn list_containers(State(registry): AppState) -> Json<Vec<models::ContainerResponse>> {
    let mut containers: Vec<models::ContainerResponse> = registry
        .list()
        .await
        .iter()
        .map(|c| models::ContainerResponse::from(c.as_ref()))
        .collect();
    containers.sort_by(|a, b| a.container_id.cmp(&b.container_id));
    Json(containers)
}

fn not_found(raw_id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        format!("Container {:?} not found", raw_id),
    )
        .into_response()
}

async fn get_container(State(registry): AppState, UrlPath(raw_id): UrlPath<String>) -> Response {
    let Ok(container_id) = ContainerID::new(&raw_id) else {
        return not_found(&raw_id);
    };
    match registry.get(&container_id).await {
        Some(container) => Json(models::ContainerResponse::from(container.as_ref())).into_response(),
        None => not_found(&raw_id),
    }
}

async fn add_container(State(registry): AppState, body: Bytes) -> Response {
    let request: models::AddContainerRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            log::warn!("could not decode add container request: {}", err);
            return (StatusCode::BAD_REQUEST, "Could not decode request").into_response();
        }
    };
    let container_id = match ContainerID::new(&request.container_id) {
        Ok(container_id) => container_id,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };

    let location = format!("/container/{}", container_id);
    match registry
        .add(container_id.clone(), request.statsd_host, request.statsd_port)
        .await
    {
        Ok(Added::Existing(_)) => {
            (StatusCode::SEE_OTHER, [(header::LOCATION, location)]).into_response()
        }
        Ok(Added::Created(container)) => (
            StatusCode::CREATED,
            [(header::LOCATION, location)],
            Json(models::ContainerResponse::from(container.as_ref())),
        )
            .into_response(),
        Err(err) => {
            log::error!("could not add container `{}`: {}", container_id, err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Could not add container {}", container_id),
            )
                .into_response()
        }
    }
}

async fn remove_container(State(registry): AppState, UrlPath(raw_id): UrlPath<String>) -> Response {
    let Ok(container_id) = ContainerID::new(&raw_id) else {
        return not_found(&raw_id);
    };
    if registry.get(&container_id).await.is_none() {
        return not_found(&raw_id);
    }

    tokio::spawn(async move {
        match registry.remove(&container_id).await {
            Ok(()) | Err(registry::Error::NotFound(_)) => {}
            Err(err) => log::error!("could not remove container `{}`: {}", container_id, err),
        }
    });
    StatusCode::ACCEPTED.into_response()
}

async fn handle_timeout(err: tower::BoxError) -> StatusCode {
    if err.is::<tower::timeout::error::Elapsed>() {
        StatusCode::REQUEST_TIMEOUT
    } else {
        log::error!("unhandled API error: {}", err);
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

pub struct APIServer {
    router: axum::Router,
}

impl APIServer {
    /// Builds the control API router. Every request is bounded by `timeout`.
    pub fn new(registry: Arc<Registry>, timeout: Duration) -> Self {
        let router = axum::Router::new()
            .route("/", get(index))
            .route("/health", get(health))
            .route("/containers", get(list_containers))
            .route("/container", post(add_container))
            .route(
                "/container/{id}",
                get(get_container).delete(remove_container),
            )
            .layer(
                ServiceBuilder::new()
                    .layer(HandleErrorLayer::new(handle_timeout))
                    .timeout(timeout),
            )
            .with_state(registry);
        Self { router }
    }

    /// Serves the API on `listen` until `shutdown` resolves.
    ///
    /// In-flight requests are allowed to finish after `shutdown` resolves; the
    /// caller bounds how long it waits for that.
    pub async fn listen<F>(self, listen: &ApiListen, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match listen {
            ApiListen::Tcp(addr) => {
                let listener = tokio::net::TcpListener::bind(addr.as_str())
                    .await
                    .map_err(bind_err(addr))?;
                log::info!("API server listening on {}", addr);
                self.serve_tcp(listener, shutdown).await
            }
            ApiListen::Unix(path) => {
                remove_stale_socket(path);
                let listener =
                    tokio::net::UnixListener::bind(path).map_err(bind_err(path.display()))?;
                log::info!("API server listening on {}", path.display());
                self.serve_unix(listener, shutdown).await
            }
            ApiListen::Systemd(name) => match systemd::take_listener(name)? {
                ActivatedListener::Tcp(listener) => {
                    let listener =
                        tokio::net::TcpListener::from_std(listener).map_err(bind_err(name))?;
                    self.serve_tcp(listener, shutdown).await
                }
                ActivatedListener::Unix(listener) => {
                    let listener =
                        tokio::net::UnixListener::from_std(listener).map_err(bind_err(name))?;
                    self.serve_unix(listener, shutdown).await
                }
            },
        }
    }

    async fn serve_tcp<F>(self, listener: tokio::net::TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(Error::Serve)
    }

    async fn serve_unix<F>(self, listener: tokio::net::UnixListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(Error::Serve)
    }
}

fn bind_err(addr: impl std::fmt::Display) -> impl FnOnce(io::Error) -> Error {
    let addr = addr.to_string();
    move |source| Error::Bind { addr, source }
}

/// Removes a socket file left behind by a previous run. Regular files are
/// left alone so that binding fails loudly.
fn remove_stale_socket(path: &Path) {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            if let Err(err) = std::fs::remove_file(path) {
                log::warn!("could not remove stale socket {}: {}", path.display(), err);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::listener::Provisioner;
    use crate::store::MemoryStore;
    use crate::testutil::{Announce, FakeFactory, FaultyStore, StaticProbe};

    fn registry_with(store: impl crate::store::ContainerStore + 'static) -> Arc<Registry> {
        Arc::new(Registry::new(
            StaticProbe(true),
            Provisioner::new(FakeFactory::new(Announce::Port(0)), Duration::from_millis(100)),
            store,
            "198.51.100.1",
        ))
    }

    fn router(registry: &Arc<Registry>) -> axum::Router {
        APIServer::new(Arc::clone(registry), Duration::from_secs(5)).router
    }

    async fn send(router: axum::Router, request: Request<Body>) -> (StatusCode, Response) {
        let response = router.oneshot(request).await.unwrap();
        (response.status(), response)
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn post_container(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/container")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_owned()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_health_and_index() {
        let registry = registry_with(MemoryStore);

        let (status, response) = send(router(&registry), get_request("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body_string(response).await.is_empty());

        let (status, response) = send(router(&registry), get_request("/")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body_string(response).await, "Not Found");
    }

    #[tokio::test]
    async fn test_add_then_get_and_list() {
        let registry = registry_with(MemoryStore);

        let (status, response) = send(
            router(&registry),
            post_container(r#"{"container_id":"abc","statsd_port":8125}"#),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let created: models::ContainerResponse =
            serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(
            created,
            models::ContainerResponse {
                container_id: "abc".to_owned(),
                statsd_host: "198.51.100.1".to_owned(),
                statsd_port: 8125,
            }
        );

        let (status, response) = send(router(&registry), get_request("/container/abc")).await;
        assert_eq!(status, StatusCode::OK);
        let fetched: models::ContainerResponse =
            serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(fetched, created);

        let (status, response) = send(router(&registry), get_request("/containers")).await;
        assert_eq!(status, StatusCode::OK);
        let listed: Vec<models::ContainerResponse> =
            serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(listed, vec![created]);
    }

    #[tokio::test]
    async fn test_add_existing_redirects() {
        let registry = registry_with(MemoryStore);
        send(router(&registry), post_container(r#"{"container_id":"abc"}"#)).await;

        let (status, response) =
            send(router(&registry), post_container(r#"{"container_id":"abc"}"#)).await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/container/abc");
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_adds_one_created_one_redirected() {
        let factory = FakeFactory::new(Announce::Port(0)).with_delay(Duration::from_millis(50));
        let registry = Arc::new(Registry::new(
            StaticProbe(true),
            Provisioner::new(factory.clone(), Duration::from_secs(1)),
            MemoryStore,
            "198.51.100.1",
        ));

        let ((first, first_response), (second, second_response)) = tokio::join!(
            send(router(&registry), post_container(r#"{"container_id":"abc"}"#)),
            send(router(&registry), post_container(r#"{"container_id":"abc"}"#))
        );

        let mut statuses = [first, second];
        statuses.sort();
        assert_eq!(statuses, [StatusCode::CREATED, StatusCode::SEE_OTHER]);
        for response in [first_response, second_response] {
            assert_eq!(response.headers()[header::LOCATION], "/container/abc");
        }
        assert_eq!(factory.created.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_add_bad_requests() {
        let registry = registry_with(MemoryStore);

        let (status, response) = send(router(&registry), post_container("not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body_string(response).await, "Could not decode request");

        let (status, _) = send(router(&registry), post_container(r#"{"statsd_port":1}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) =
            send(router(&registry), post_container(r#"{"container_id":".."}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_add_failure_is_internal_error() {
        let registry = registry_with(FaultyStore {
            fail_save: true,
            ..Default::default()
        });

        let (status, response) =
            send(router(&registry), post_container(r#"{"container_id":"abc"}"#)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_string(response).await, "Could not add container abc");
    }

    #[tokio::test]
    async fn test_get_unknown() {
        let registry = registry_with(MemoryStore);

        let (status, response) = send(router(&registry), get_request("/container/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body_string(response).await, r#"Container "nope" not found"#);
    }

    #[tokio::test]
    async fn test_delete() {
        let registry = registry_with(MemoryStore);
        registry
            .add(ContainerID::new("abc").unwrap(), "", 0)
            .await
            .unwrap();

        let delete = |uri: &str| {
            Request::builder()
                .method("DELETE")
                .uri(uri)
                .body(Body::empty())
                .unwrap()
        };

        let (status, _) = send(router(&registry), delete("/container/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(router(&registry), delete("/container/abc")).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        for _ in 0..100 {
            if registry.is_empty().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_listen_unix_socket_and_shutdown() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("api.sock");
        let registry = registry_with(MemoryStore);
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let server = APIServer::new(registry, Duration::from_secs(5));
        let listen = ApiListen::Unix(path.clone());
        let handle = tokio::spawn(async move {
            server
                .listen(&listen, async move {
                    let _ = rx.await;
                })
                .await
        });

        for _ in 0..100 {
            if path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(path.exists());

        tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
