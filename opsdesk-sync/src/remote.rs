//! Remote service boundary.
//!
//! [`RemoteService`] is the only interface the engine has to the outside
//! world. [`HttpRemote`] talks to the real backend; [`mock::MockRemote`]
//! replays scripted responses for tests.

use std::time::Duration;

use async_trait::async_trait;
use opsdesk_types::{ConflictId, DeviceId};
use reqwest::Client;

use crate::error::{SyncError, SyncResult};
use crate::protocol::{
    HealthStatus, ResolveConflictRequest, SyncPayload, SyncRequest, SyncResponse,
};

/// Boundary to the remote sync service.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Pushes local changes and pulls remote ones in a single exchange.
    async fn exchange(
        &self,
        device_id: DeviceId,
        request: &SyncRequest,
    ) -> SyncResult<SyncPayload>;

    /// Informs the remote that an open conflict was resolved.
    async fn resolve_conflict(
        &self,
        conflict_id: ConflictId,
        request: &ResolveConflictRequest,
    ) -> SyncResult<()>;

    /// Probes the remote's health endpoint.
    async fn health(&self) -> SyncResult<HealthStatus>;
}

/// HTTP client for the sync backend.
pub struct HttpRemote {
    base_url: String,
    client: Client,
}

impl HttpRemote {
    /// Creates a client for the service at `base_url`.
    ///
    /// The client-level timeout is a backstop; per-exchange deadlines are
    /// enforced by the coordinator.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to create HTTP client");
        Self { base_url, client }
    }
}

#[async_trait]
impl RemoteService for HttpRemote {
    async fn exchange(
        &self,
        device_id: DeviceId,
        request: &SyncRequest,
    ) -> SyncResult<SyncPayload> {
        let url = format!("{}/sync/{}", self.base_url, device_id);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("sync exchange failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            return Err(SyncError::Network(format!(
                "sync exchange returned {status}: {error}"
            )));
        }

        let envelope: SyncResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Network(format!("invalid sync response: {e}")))?;

        if !envelope.success {
            return Err(SyncError::Rejected("remote declined the exchange".into()));
        }
        envelope
            .data
            .ok_or_else(|| SyncError::Rejected("successful response carried no data".into()))
    }

    async fn resolve_conflict(
        &self,
        conflict_id: ConflictId,
        request: &ResolveConflictRequest,
    ) -> SyncResult<()> {
        let url = format!("{}/sync/resolve-conflict/{}", self.base_url, conflict_id);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("resolve request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            return Err(SyncError::Network(format!(
                "resolve request returned {status}: {error}"
            )));
        }
        Ok(())
    }

    async fn health(&self) -> SyncResult<HealthStatus> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("health probe failed: {e}")))?;

        if !response.status().is_success() {
            return Err(SyncError::Network(format!(
                "health probe returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| SyncError::Network(format!("invalid health response: {e}")))
    }
}

/// Mock remote service for testing.
pub mod mock {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;

    /// Scripted in-memory [`RemoteService`].
    ///
    /// Exchanges pop pre-scripted results in order; once the script runs
    /// out, further exchanges succeed with an empty payload. Clones share
    /// the same state, so a test can keep one clone and hand another to
    /// the engine.
    #[derive(Clone)]
    pub struct MockRemote {
        scripted: Arc<Mutex<VecDeque<SyncResult<SyncPayload>>>>,
        requests: Arc<Mutex<Vec<SyncRequest>>>,
        resolutions: Arc<Mutex<Vec<(ConflictId, ResolveConflictRequest)>>>,
        reachable: Arc<AtomicBool>,
        database_ok: Arc<AtomicBool>,
        exchange_delay: Arc<Mutex<Option<Duration>>>,
    }

    impl MockRemote {
        /// Creates a healthy mock with an empty script.
        pub fn new() -> Self {
            Self {
                scripted: Arc::new(Mutex::new(VecDeque::new())),
                requests: Arc::new(Mutex::new(Vec::new())),
                resolutions: Arc::new(Mutex::new(Vec::new())),
                reachable: Arc::new(AtomicBool::new(true)),
                database_ok: Arc::new(AtomicBool::new(true)),
                exchange_delay: Arc::new(Mutex::new(None)),
            }
        }

        /// Queues a successful exchange result.
        pub fn script_payload(&self, payload: SyncPayload) {
            self.scripted.lock().unwrap().push_back(Ok(payload));
        }

        /// Queues a failed exchange result.
        pub fn script_failure(&self, error: SyncError) {
            self.scripted.lock().unwrap().push_back(Err(error));
        }

        /// Makes every exchange stall for `delay` before answering.
        pub fn set_exchange_delay(&self, delay: Duration) {
            *self.exchange_delay.lock().unwrap() = Some(delay);
        }

        /// Controls whether health probes reach the service at all.
        pub fn set_reachable(&self, reachable: bool) {
            self.reachable.store(reachable, Ordering::SeqCst);
        }

        /// Controls the `databaseOk` flag reported by health probes.
        pub fn set_database_ok(&self, ok: bool) {
            self.database_ok.store(ok, Ordering::SeqCst);
        }

        /// Number of exchanges attempted so far.
        pub fn exchange_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        /// All exchange requests received, in order.
        pub fn requests(&self) -> Vec<SyncRequest> {
            self.requests.lock().unwrap().clone()
        }

        /// All resolution notifications received, in order.
        pub fn resolutions(&self) -> Vec<(ConflictId, ResolveConflictRequest)> {
            self.resolutions.lock().unwrap().clone()
        }
    }

    impl Default for MockRemote {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl RemoteService for MockRemote {
        async fn exchange(
            &self,
            _device_id: DeviceId,
            request: &SyncRequest,
        ) -> SyncResult<SyncPayload> {
            self.requests.lock().unwrap().push(request.clone());

            let delay = *self.exchange_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            match self.scripted.lock().unwrap().pop_front() {
                Some(result) => result,
                None => Ok(SyncPayload::default()),
            }
        }

        async fn resolve_conflict(
            &self,
            conflict_id: ConflictId,
            request: &ResolveConflictRequest,
        ) -> SyncResult<()> {
            if !self.reachable.load(Ordering::SeqCst) {
                return Err(SyncError::Network("remote unreachable".into()));
            }
            self.resolutions
                .lock()
                .unwrap()
                .push((conflict_id, request.clone()));
            Ok(())
        }

        async fn health(&self) -> SyncResult<HealthStatus> {
            if !self.reachable.load(Ordering::SeqCst) {
                return Err(SyncError::Network("health probe refused".into()));
            }
            Ok(HealthStatus {
                reachable: true,
                database_ok: self.database_ok.load(Ordering::SeqCst),
            })
        }
    }
}
