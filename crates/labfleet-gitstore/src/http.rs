//! reqwest-backed clients for the repository host and the review host.
//!
//! Both hosts prefix JSON answers with `)]}'` to defeat XSSI; it is
//! stripped before decoding.

use std::time::Duration;

use reqwest::{Client, Response, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use crate::BoxFuture;
use crate::archive::GitilesClient;
use crate::error::{GitStoreError, GitStoreResult};
use crate::gerrit::{ChangeInfo, GerritClient, ReviewStep};

const XSSI_PREFIX: &str = ")]}'";

pub(crate) fn strip_xssi(body: &str) -> &str {
    body.strip_prefix(XSSI_PREFIX).unwrap_or(body).trim_start()
}

fn decode<T: DeserializeOwned>(body: &str, what: &'static str) -> Result<T, String> {
    serde_json::from_str(strip_xssi(body)).map_err(|e| format!("bad {what} response: {e}"))
}

fn build_client(timeout: Duration) -> GitStoreResult<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| GitStoreError::Config(format!("failed to build http client: {e}")))
}

fn base_url(host: &str) -> GitStoreResult<Url> {
    Url::parse(host).map_err(|e| GitStoreError::Config(format!("bad host {host:?}: {e}")))
}

// ── Repository host ───────────────────────────────────────────────

/// Gitiles-style read API: `+log` for the tip, `+archive` for the tree.
pub struct HttpGitiles {
    client: Client,
    host: Url,
}

#[derive(Deserialize)]
struct LogResponse {
    log: Vec<LogEntry>,
}

#[derive(Deserialize)]
struct LogEntry {
    commit: String,
}

impl HttpGitiles {
    pub fn new(host: &str, timeout: Duration) -> GitStoreResult<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            host: base_url(host)?,
        })
    }

    fn url(&self, path: &str) -> GitStoreResult<Url> {
        self.host
            .join(path)
            .map_err(|e| GitStoreError::Config(format!("bad repository path {path:?}: {e}")))
    }

    async fn get(&self, op: &'static str, url: Url) -> GitStoreResult<Response> {
        debug!(%url, op, "gitiles request");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| GitStoreError::transport(op, e))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GitStoreError::Transport {
                op,
                message: format!("{status}: {body}"),
            });
        }
        Ok(response)
    }
}

impl GitilesClient for HttpGitiles {
    fn latest_revision<'a>(&'a self, project: &'a str, branch: &'a str) -> BoxFuture<'a, String> {
        Box::pin(async move {
            let op = "resolve branch tip";
            let mut url = self.url(&format!("{project}/+log/{branch}"))?;
            url.query_pairs_mut().append_pair("n", "1").append_pair("format", "JSON");
            let body = self
                .get(op, url)
                .await?
                .text()
                .await
                .map_err(|e| GitStoreError::transport(op, e))?;
            let log: LogResponse = decode(&body, "log").map_err(|message| GitStoreError::Transport { op, message })?;
            log.log
                .into_iter()
                .next()
                .map(|entry| entry.commit)
                .ok_or_else(|| GitStoreError::Transport {
                    op,
                    message: format!("branch {branch} has no commits"),
                })
        })
    }

    fn archive<'a>(&'a self, project: &'a str, revision: &'a str) -> BoxFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let op = "fetch archive";
            let url = self.url(&format!("{project}/+archive/{revision}.tar.gz"))?;
            let bytes = self
                .get(op, url)
                .await?
                .bytes()
                .await
                .map_err(|e| GitStoreError::transport(op, e))?;
            Ok(bytes.to_vec())
        })
    }
}

// ── Review host ───────────────────────────────────────────────────

/// Gerrit REST client over the authenticated `/a/` prefix.
pub struct HttpGerrit {
    client: Client,
    host: Url,
}

#[derive(Deserialize)]
struct ChangeDetail {
    current_revision: String,
}

impl HttpGerrit {
    pub fn new(host: &str, timeout: Duration) -> GitStoreResult<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            host: base_url(host)?,
        })
    }

    /// `/a/changes/{number}/{tail...}` with every tail segment percent-encoded.
    fn change_url(&self, step: ReviewStep, change: &ChangeInfo, tail: &[&str]) -> GitStoreResult<Url> {
        let mut url = self.host.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|()| GitStoreError::Review {
                step: step.as_str(),
                message: format!("review host {} cannot be a base", self.host),
            })?;
            segments.pop_if_empty().extend(["a", "changes"]);
            segments.push(&change.number.to_string());
            segments.extend(tail);
        }
        Ok(url)
    }

    async fn check(step: ReviewStep, response: Result<Response, reqwest::Error>) -> GitStoreResult<String> {
        let response = response.map_err(|e| GitStoreError::Review {
            step: step.as_str(),
            message: e.to_string(),
        })?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(GitStoreError::Review {
                step: step.as_str(),
                message: format!("{status}: {body}"),
            });
        }
        Ok(body)
    }

    async fn post(&self, step: ReviewStep, url: Url, body: serde_json::Value) -> GitStoreResult<String> {
        debug!(%url, step = step.as_str(), "gerrit request");
        Self::check(step, self.client.post(url).json(&body).send().await).await
    }
}

impl GerritClient for HttpGerrit {
    fn create_change<'a>(&'a self, project: &'a str, branch: &'a str, subject: &'a str) -> BoxFuture<'a, ChangeInfo> {
        Box::pin(async move {
            let step = ReviewStep::Create;
            let mut url = self.host.clone();
            url.path_segments_mut()
                .map_err(|()| GitStoreError::Config(format!("review host {} cannot be a base", self.host)))?
                .pop_if_empty()
                .extend(["a", "changes", ""]);
            let body = self
                .post(step, url, json!({ "project": project, "branch": branch, "subject": subject }))
                .await?;
            decode(&body, "change").map_err(|message| GitStoreError::Review {
                step: step.as_str(),
                message,
            })
        })
    }

    fn edit_file<'a>(&'a self, change: &'a ChangeInfo, path: &'a str, contents: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let step = ReviewStep::EditFile;
            // The file path is a single segment, so `/` is encoded as %2F.
            let url = self.change_url(step, change, &["edit", path])?;
            debug!(%url, step = step.as_str(), "gerrit request");
            let response = self.client.put(url).body(contents.to_string()).send().await;
            Self::check(step, response).await.map(|_| ())
        })
    }

    fn publish_edit<'a>(&'a self, change: &'a ChangeInfo) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let step = ReviewStep::Publish;
            let url = self.change_url(step, change, &["edit:publish"])?;
            self.post(step, url, json!({})).await.map(|_| ())
        })
    }

    fn current_revision<'a>(&'a self, change: &'a ChangeInfo) -> BoxFuture<'a, String> {
        Box::pin(async move {
            let step = ReviewStep::CurrentRevision;
            let mut url = self.change_url(step, change, &[])?;
            url.query_pairs_mut().append_pair("o", "CURRENT_REVISION");
            debug!(%url, step = step.as_str(), "gerrit request");
            let body = Self::check(step, self.client.get(url).send().await).await?;
            let detail: ChangeDetail = decode(&body, "change detail").map_err(|message| GitStoreError::Review {
                step: step.as_str(),
                message,
            })?;
            Ok(detail.current_revision)
        })
    }

    fn set_review<'a>(
        &'a self,
        change: &'a ChangeInfo,
        revision: &'a str,
        labels: &'a [(&'a str, i32)],
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let step = ReviewStep::SetReview;
            let url = self.change_url(step, change, &["revisions", revision, "review"])?;
            let labels: serde_json::Map<String, serde_json::Value> =
                labels.iter().map(|(k, v)| (k.to_string(), json!(v))).collect();
            self.post(step, url, json!({ "labels": labels })).await.map(|_| ())
        })
    }

    fn submit<'a>(&'a self, change: &'a ChangeInfo) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let step = ReviewStep::Submit;
            let url = self.change_url(step, change, &["submit"])?;
            self.post(step, url, json!({})).await.map(|_| ())
        })
    }

    fn abandon<'a>(&'a self, change: &'a ChangeInfo) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let step = ReviewStep::Abandon;
            let url = self.change_url(step, change, &["abandon"])?;
            self.post(step, url, json!({})).await.map(|_| ())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::tarball;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn xssi_prefix_is_stripped() {
        assert_eq!(strip_xssi(")]}'\n{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_xssi("{\"a\":1}"), "{\"a\":1}");
    }

    #[tokio::test]
    async fn gitiles_resolves_tip_then_fetches_archive() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/infra/config/+log/main"))
            .and(query_param("format", "JSON"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                ")]}'\n{\"log\":[{\"commit\":\"abc123\"},{\"commit\":\"older\"}]}",
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/infra/config/+archive/abc123.tar.gz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(tarball(&[("lab.json", "{}")])))
            .mount(&server)
            .await;

        let gitiles = HttpGitiles::new(&server.uri(), TIMEOUT).unwrap();
        let rev = gitiles.latest_revision("infra/config", "main").await.unwrap();
        assert_eq!(rev, "abc123");
        let bytes = gitiles.archive("infra/config", &rev).await.unwrap();
        assert_eq!(
            crate::archive::extract_files(&bytes, &["lab.json"]).unwrap(),
            vec!["{}".to_string()]
        );
    }

    #[tokio::test]
    async fn gitiles_http_error_is_transport() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let gitiles = HttpGitiles::new(&server.uri(), TIMEOUT).unwrap();
        let err = gitiles.latest_revision("p", "main").await.unwrap_err();
        assert!(matches!(err, GitStoreError::Transport { op: "resolve branch tip", .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn gerrit_protocol_requests() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/a/changes/"))
            .and(body_json(json!({"project": "p", "branch": "main", "subject": "s"})))
            .respond_with(
                ResponseTemplate::new(201).set_body_string(")]}'\n{\"id\":\"p~main~I1\",\"_number\":42}"),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/a/changes/42/edit/data%2Flab.json"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/a/changes/42/edit:publish"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/a/changes/42"))
            .and(query_param("o", "CURRENT_REVISION"))
            .respond_with(ResponseTemplate::new(200).set_body_string(")]}'\n{\"current_revision\":\"deadbeef\"}"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/a/changes/42/revisions/deadbeef/review"))
            .and(body_json(json!({"labels": {"Code-Review": 2, "Verified": 1}})))
            .respond_with(ResponseTemplate::new(200).set_body_string(")]}'\n{}"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/a/changes/42/submit"))
            .respond_with(ResponseTemplate::new(200).set_body_string(")]}'\n{}"))
            .expect(1)
            .mount(&server)
            .await;

        let gerrit = HttpGerrit::new(&server.uri(), TIMEOUT).unwrap();
        let change = gerrit.create_change("p", "main", "s").await.unwrap();
        assert_eq!(change.number, 42);
        gerrit.edit_file(&change, "data/lab.json", "{}\n").await.unwrap();
        gerrit.publish_edit(&change).await.unwrap();
        let rev = gerrit.current_revision(&change).await.unwrap();
        assert_eq!(rev, "deadbeef");
        gerrit
            .set_review(&change, &rev, &crate::gerrit::AUTO_APPROVAL)
            .await
            .unwrap();
        gerrit.submit(&change).await.unwrap();
    }

    #[tokio::test]
    async fn gerrit_rejection_names_the_step() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/a/changes/7/submit"))
            .respond_with(ResponseTemplate::new(409).set_body_string("merge conflict"))
            .mount(&server)
            .await;
        let gerrit = HttpGerrit::new(&server.uri(), TIMEOUT).unwrap();
        let change = ChangeInfo {
            id: "x".to_string(),
            number: 7,
        };
        let err = gerrit.submit(&change).await.unwrap_err();
        match err {
            GitStoreError::Review { step, message } => {
                assert_eq!(step, "submit");
                assert!(message.contains("merge conflict"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
