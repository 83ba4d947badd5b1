//! Health tracker clients.
//!
//! The tracker reports a [`Health`] per known DUT id. Ids it does not
//! know are left out of the answer; callers treat them as `UNKNOWN`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use labfleet_balance::Health;
use labfleet_inventory::DutId;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ServiceError, ServiceResult};

pub type TrackerFuture<'a, T> = Pin<Box<dyn Future<Output = ServiceResult<T>> + Send + 'a>>;

pub trait HealthTracker: Send + Sync {
    fn summarize<'a>(&'a self, dut_ids: &'a [DutId]) -> TrackerFuture<'a, HashMap<DutId, Health>>;
}

#[derive(Serialize)]
struct SummarizeRequest<'a> {
    dut_ids: &'a [DutId],
}

#[derive(Deserialize)]
struct SummarizeResponse {
    #[serde(default)]
    duts: Vec<DutHealth>,
}

#[derive(Deserialize)]
struct DutHealth {
    dut_id: DutId,
    health: Health,
}

/// Tracker reached over HTTP at `{host}/api/v1/summarize`.
pub struct HttpTracker {
    client: Client,
    endpoint: String,
}

impl HttpTracker {
    pub fn new(host: &str, timeout: Duration) -> ServiceResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::Internal(format!("failed to build tracker client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/v1/summarize", host.trim_end_matches('/')),
        })
    }
}

impl HealthTracker for HttpTracker {
    fn summarize<'a>(&'a self, dut_ids: &'a [DutId]) -> TrackerFuture<'a, HashMap<DutId, Health>> {
        Box::pin(async move {
            if dut_ids.is_empty() {
                return Ok(HashMap::new());
            }
            debug!(endpoint = %self.endpoint, duts = dut_ids.len(), "summarizing dut health");
            let response = self
                .client
                .post(&self.endpoint)
                .json(&SummarizeRequest { dut_ids })
                .send()
                .await
                .map_err(|e| ServiceError::Tracker(format!("summarize: {e}")))?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ServiceError::Tracker(format!("summarize: {status}: {body}")));
            }
            let body: SummarizeResponse = response
                .json()
                .await
                .map_err(|e| ServiceError::Tracker(format!("bad summarize response: {e}")))?;
            Ok(body.duts.into_iter().map(|d| (d.dut_id, d.health)).collect())
        })
    }
}

/// In-process tracker with fixed answers.
///
/// Used when no tracker host is configured, and by tests. Only the
/// requested ids that have an entry are reported.
#[derive(Default)]
pub struct StaticTracker {
    inner: Mutex<StaticInner>,
}

#[derive(Default)]
struct StaticInner {
    health: HashMap<DutId, Health>,
    calls: usize,
    failures: usize,
}

impl StaticTracker {
    pub fn new(health: impl IntoIterator<Item = (DutId, Health)>) -> Self {
        Self {
            inner: Mutex::new(StaticInner {
                health: health.into_iter().collect(),
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StaticInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set(&self, dut_id: impl Into<DutId>, health: Health) {
        self.lock().health.insert(dut_id.into(), health);
    }

    /// Fail the next `times` calls.
    pub fn fail_times(&self, times: usize) {
        self.lock().failures = times;
    }

    pub fn calls(&self) -> usize {
        self.lock().calls
    }
}

impl HealthTracker for StaticTracker {
    fn summarize<'a>(&'a self, dut_ids: &'a [DutId]) -> TrackerFuture<'a, HashMap<DutId, Health>> {
        Box::pin(async move {
            let mut inner = self.lock();
            inner.calls += 1;
            if inner.failures > 0 {
                inner.failures -= 1;
                return Err(ServiceError::Tracker("injected failure".to_string()));
            }
            Ok(dut_ids
                .iter()
                .filter_map(|id| inner.health.get(id).map(|h| (id.clone(), *h)))
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ids(v: &[&str]) -> Vec<DutId> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn http_tracker_posts_ids_and_omits_unknown_duts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/summarize"))
            .and(body_json(json!({"dut_ids": ["a", "b", "c"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "duts": [
                    {"dut_id": "a", "health": "HEALTHY"},
                    {"dut_id": "b", "health": "UNHEALTHY"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tracker = HttpTracker::new(&format!("{}/", server.uri()), Duration::from_secs(5)).unwrap();
        let health = tracker.summarize(&ids(&["a", "b", "c"])).await.unwrap();
        assert_eq!(health.get("a"), Some(&Health::Healthy));
        assert_eq!(health.get("b"), Some(&Health::Unhealthy));
        assert!(!health.contains_key("c"));
    }

    #[tokio::test]
    async fn unrecognised_health_decodes_as_unknown() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/summarize"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "duts": [
                    {"dut_id": "a", "health": "HEALTHY"},
                    {"dut_id": "b", "health": "NEEDS_REPAIR"}
                ]
            })))
            .mount(&server)
            .await;

        let tracker = HttpTracker::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let health = tracker.summarize(&ids(&["a", "b"])).await.unwrap();
        assert_eq!(health.get("a"), Some(&Health::Healthy));
        assert_eq!(health.get("b"), Some(&Health::Unknown));
        assert!(!health["b"].is_healthy());
    }

    #[tokio::test]
    async fn http_tracker_errors_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let tracker = HttpTracker::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let err = tracker.summarize(&ids(&["a"])).await.unwrap_err();
        assert!(matches!(err, ServiceError::Tracker(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn empty_request_skips_the_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).respond_with(ResponseTemplate::new(500)).expect(0).mount(&server).await;
        let tracker = HttpTracker::new(&server.uri(), Duration::from_secs(5)).unwrap();
        assert!(tracker.summarize(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn static_tracker_reports_known_ids_only() {
        let tracker = StaticTracker::new([("a".to_string(), Health::Healthy)]);
        tracker.fail_times(1);
        assert!(tracker.summarize(&ids(&["a"])).await.is_err());
        let health = tracker.summarize(&ids(&["a", "z"])).await.unwrap();
        assert_eq!(health.len(), 1);
        assert_eq!(tracker.calls(), 2);
    }
}
