use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};
use warp::http::StatusCode;
use warp::Filter;

use crate::backend::Backend;
use crate::remote::types::{GetDataRequest, GetDataResponse, SetDataRequest, SetDataResponse};

/// Routes:
/// - `GET /health` availability probe, JSON bool
/// - `POST /get-data` `{key}` -> `{value, error}`
/// - `POST /set-data` `{key, value}` -> `{success, error}`
pub fn backend_routes(
    backend: Arc<dyn Backend>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    // 1. GET /health
    let health = warp::get()
        .and(warp::path("health"))
        .and(warp::path::end())
        .and(with_backend(backend.clone()))
        .and_then(|backend: Arc<dyn Backend>| async move {
            let available = backend.is_available().await;
            Ok::<_, warp::Rejection>(warp::reply::json(&available))
        });

    // 2. POST /get-data
    let get_data = warp::post()
        .and(warp::path("get-data"))
        .and(warp::path::end())
        .and(warp::body::json())
        .and(with_backend(backend.clone()))
        .and_then(|req: GetDataRequest, backend: Arc<dyn Backend>| async move {
            let reply = match backend.get_data(&req.key).await {
                Ok(value) => warp::reply::with_status(
                    warp::reply::json(&GetDataResponse { value, error: None }),
                    StatusCode::OK,
                ),
                Err(e) => {
                    warn!("get-data '{}' failed: {}", req.key, e);
                    warp::reply::with_status(
                        warp::reply::json(&GetDataResponse { value: Vec::new(), error: Some(e) }),
                        StatusCode::SERVICE_UNAVAILABLE,
                    )
                }
            };
            Ok::<_, warp::Rejection>(reply)
        });

    // 3. POST /set-data
    let set_data = warp::post()
        .and(warp::path("set-data"))
        .and(warp::path::end())
        .and(warp::body::json())
        .and(with_backend(backend))
        .and_then(|req: SetDataRequest, backend: Arc<dyn Backend>| async move {
            let res = match backend.set_data(&req.key, req.value).await {
                Ok(()) => SetDataResponse { success: true, error: None },
                Err(e) => {
                    warn!("set-data '{}' failed: {}", req.key, e);
                    SetDataResponse { success: false, error: Some(e) }
                }
            };
            Ok::<_, warp::Rejection>(warp::reply::json(&res))
        });

    health.or(get_data).or(set_data)
}

pub async fn serve_backend(backend: Arc<dyn Backend>, port: u16) {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!("backend HTTP API listening on {}", addr);
    warp::serve(backend_routes(backend)).run(addr).await;
}

fn with_backend(
    backend: Arc<dyn Backend>,
) -> impl Filter<Extract = (Arc<dyn Backend>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || backend.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, WriteFault};

    #[tokio::test]
    async fn routes_serve_get_set_and_health() {
        let backend = Arc::new(MemoryBackend::new());
        let routes = backend_routes(backend.clone());

        let res = warp::test::request().method("GET").path("/health").reply(&routes).await;
        assert_eq!(res.status(), 200);
        assert_eq!(res.body().as_ref(), b"true");

        let res = warp::test::request()
            .method("POST")
            .path("/set-data")
            .json(&SetDataRequest { key: "k".into(), value: b"v".to_vec() })
            .reply(&routes)
            .await;
        let body: SetDataResponse = serde_json::from_slice(res.body()).unwrap();
        assert!(body.success);
        assert_eq!(backend.raw("k"), Some(b"v".to_vec()));

        let res = warp::test::request()
            .method("POST")
            .path("/get-data")
            .json(&GetDataRequest { key: "k".into() })
            .reply(&routes)
            .await;
        let body: GetDataResponse = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body.value, b"v".to_vec());
    }

    #[tokio::test]
    async fn failures_are_carried_in_the_body() {
        let backend = Arc::new(MemoryBackend::new());
        backend.fail_writes("k", WriteFault::Decline);
        let routes = backend_routes(backend.clone());

        let res = warp::test::request()
            .method("POST")
            .path("/set-data")
            .json(&SetDataRequest { key: "k".into(), value: vec![1] })
            .reply(&routes)
            .await;
        let body: SetDataResponse = serde_json::from_slice(res.body()).unwrap();
        assert!(!body.success);
        assert!(matches!(body.error, Some(crate::error::BackendError::Declined(_))));

        backend.set_available(false);
        let res = warp::test::request()
            .method("POST")
            .path("/get-data")
            .json(&GetDataRequest { key: "k".into() })
            .reply(&routes)
            .await;
        assert_eq!(res.status(), 503);
    }
}
