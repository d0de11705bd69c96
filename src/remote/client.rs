use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::backend::Backend;
use crate::error::BackendError;
use crate::remote::types::{GetDataRequest, GetDataResponse, SetDataRequest, SetDataResponse};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// [`Backend`] served by another node's HTTP API.
#[derive(Clone, Debug)]
pub struct HttpBackend {
    base: String,
    client: reqwest::Client,
}

impl HttpBackend {
    /// `base` is `http://host:port`, with or without a trailing slash.
    pub fn new(base: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            base: base.trim_end_matches('/').to_string(),
            client,
        }
    }

    async fn send_post<Req, Resp>(&self, route: &str, req: &Req) -> Result<(reqwest::StatusCode, Resp), BackendError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base, route);
        let resp = self
            .client
            .post(&url)
            .json(req)
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .json::<Resp>()
            .await
            .map_err(|e| BackendError::Unavailable(format!("HTTP {}: {}", status, e)))?;
        Ok((status, body))
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn is_available(&self) -> bool {
        let url = format!("{}/health", self.base);
        match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => resp.json::<bool>().await.unwrap_or(false),
            Ok(resp) => {
                debug!("health probe to {} returned {}", url, resp.status());
                false
            }
            Err(e) => {
                debug!("health probe to {} failed: {}", url, e);
                false
            }
        }
    }

    async fn get_data(&self, key: &str) -> Result<Vec<u8>, BackendError> {
        let req = GetDataRequest { key: key.to_string() };
        let (status, res): (_, GetDataResponse) = self.send_post("get-data", &req).await?;
        match res.error {
            Some(e) => Err(e),
            None if !status.is_success() => Err(BackendError::Unavailable(format!("HTTP error: {}", status))),
            None => Ok(res.value),
        }
    }

    async fn set_data(&self, key: &str, value: Vec<u8>) -> Result<(), BackendError> {
        let req = SetDataRequest { key: key.to_string(), value };
        let (status, res): (_, SetDataResponse) = self.send_post("set-data", &req).await?;
        if res.success {
            return Ok(());
        }
        Err(res
            .error
            .unwrap_or_else(|| BackendError::Rejected(format!("HTTP {}: write not applied", status))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, WriteFault};
    use crate::kv::KvStore;
    use crate::remote::backend_routes;
    use crate::repository::RecordRepository;
    use crate::model::NewRecord;
    use crate::error::StoreError;
    use std::sync::Arc;

    fn spawn_api(backend: Arc<MemoryBackend>) -> String {
        let (addr, server) = warp::serve(backend_routes(backend)).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn repository_runs_over_http() {
        let backend = Arc::new(MemoryBackend::new());
        let remote = Arc::new(HttpBackend::new(&spawn_api(backend.clone())));

        let kv = KvStore::connect(remote).await.unwrap();
        let repo = RecordRepository::new(kv);
        let record = repo
            .create(NewRecord {
                food: "FHE-ZWdncw==".into(),
                symptoms: "FHE-aGl2ZXM=".into(),
                owner: "0xabc".into(),
                meal_time_hint: None,
            })
            .await
            .unwrap();

        assert_eq!(repo.list().await.unwrap().records, vec![record]);
        assert!(backend.raw("record_keys").is_some());
    }

    #[tokio::test]
    async fn remote_faults_map_to_store_errors() {
        let backend = Arc::new(MemoryBackend::new());
        let remote = Arc::new(HttpBackend::new(&spawn_api(backend.clone())));
        let kv = KvStore::connect(remote.clone()).await.unwrap();

        backend.fail_writes("k", WriteFault::Decline);
        let err = kv.set_bytes("k", b"v".to_vec()).await.unwrap_err();
        assert!(matches!(err, StoreError::WriteRejected { declined: true, .. }));

        backend.set_available(false);
        assert!(!remote.is_available().await);
        assert!(matches!(kv.get_bytes("k").await.unwrap_err(), StoreError::ReadFailed { .. }));
    }

    #[tokio::test]
    async fn unreachable_host_fails_the_probe() {
        let remote = Arc::new(HttpBackend::new("http://127.0.0.1:9"));
        let err = KvStore::connect(remote).await.unwrap_err();
        assert!(matches!(err, StoreError::BackendUnavailable(_)));
    }
}
