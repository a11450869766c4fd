use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use courier_core::{
    DocumentLocation, DocumentStore, DocumentWrite, StoreError, StoredDocument, VersionToken,
    config::GithubConfig,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

const ACCEPT_JSON: &str = "application/vnd.github.v3+json";
const ACCEPT_RAW: &str = "application/vnd.github.raw";

/// [`DocumentStore`] backed by the GitHub repository contents API.
///
/// Version tokens are blob SHAs. GitHub answers a write with a stale SHA
/// with `409 Conflict`, and a create over an existing file (no SHA) with a
/// `422` that names the missing `sha`; both map to
/// [`StoreError::StaleVersion`].
pub struct GithubContentsStore {
    client: Client,
    config: GithubConfig,
    timeout: Duration,
}

impl GithubContentsStore {
    pub fn new(config: GithubConfig, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(format!("courier/{}", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("build github http client")?;

        Ok(Self {
            client,
            config,
            timeout,
        })
    }

    fn contents_url(&self, path: &str) -> Result<Url, StoreError> {
        let mut url = self.config.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::Transport("GitHub API URL cannot be a base".to_owned()))?
            .pop_if_empty()
            .extend([
                "repos",
                self.config.owner.as_str(),
                self.config.repo.as_str(),
                "contents",
            ])
            .extend(path.split('/').filter(|segment| !segment.is_empty()));
        Ok(url)
    }

    fn authorized(&self, builder: RequestBuilder, accept: &'static str) -> RequestBuilder {
        builder
            .bearer_auth(&self.config.token)
            .header("accept", accept)
    }

    fn transport_error(&self, error: reqwest::Error) -> StoreError {
        if error.is_timeout() {
            StoreError::Timeout(self.timeout)
        } else {
            StoreError::Transport(error.to_string())
        }
    }

    fn read_url(&self, path: &str) -> Result<Url, StoreError> {
        let mut url = self.contents_url(path)?;
        url.query_pairs_mut().append_pair("ref", &self.config.branch);
        Ok(url)
    }

    /// Files above the contents API inline limit come back without content;
    /// fetch those through the raw media type instead.
    async fn fetch_raw(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        let url = self.read_url(path)?;
        let response = self
            .authorized(self.client.get(url), ACCEPT_RAW)
            .send()
            .await
            .map_err(|err| self.transport_error(err))?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| self.transport_error(err))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl DocumentStore for GithubContentsStore {
    async fn get_document(&self, path: &str) -> Result<Option<StoredDocument>, StoreError> {
        let url = self.read_url(path)?;
        let response = self
            .authorized(self.client.get(url), ACCEPT_JSON)
            .send()
            .await
            .map_err(|err| self.transport_error(err))?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(path, "document not found in repository");
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let payload = response
            .json::<ContentsResponse>()
            .await
            .map_err(|err| StoreError::Decode(format!("contents response: {err}")))?;

        let content = match payload.encoding.as_deref() {
            Some("base64") if !payload.content.is_empty() => decode_base64(&payload.content)?,
            _ if payload.size > 0 => self.fetch_raw(path).await?,
            _ => Vec::new(),
        };

        Ok(Some(StoredDocument {
            content,
            version: VersionToken::new(payload.sha),
        }))
    }

    async fn put_document(
        &self,
        path: &str,
        write: DocumentWrite,
    ) -> Result<DocumentLocation, StoreError> {
        let url = self.contents_url(path)?;
        let body = PutContentsRequest {
            message: &write.message,
            content: BASE64.encode(&write.content),
            branch: &self.config.branch,
            sha: write.expected_version.as_ref().map(VersionToken::as_str),
        };

        let response = self
            .authorized(self.client.put(url), ACCEPT_JSON)
            .json(&body)
            .send()
            .await
            .map_err(|err| self.transport_error(err))?;

        let status = response.status();
        if status == StatusCode::CONFLICT {
            return Err(StoreError::StaleVersion {
                path: path.to_owned(),
            });
        }
        if status == StatusCode::UNPROCESSABLE_ENTITY {
            let body = response.text().await.unwrap_or_default();
            if body.contains("sha") {
                return Err(StoreError::StaleVersion {
                    path: path.to_owned(),
                });
            }
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }
        if !status.is_success() {
            return Err(status_error(response).await);
        }

        let payload = response
            .json::<PutContentsResponse>()
            .await
            .map_err(|err| StoreError::Decode(format!("put contents response: {err}")))?;

        let mut location = DocumentLocation::new(payload.content.path)
            .with_version(VersionToken::new(payload.content.sha));
        if let Some(html_url) = payload.content.html_url {
            location = location.with_html_url(html_url);
        }
        Ok(location)
    }
}

async fn status_error(response: Response) -> StoreError {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unavailable>".to_string());
    StoreError::Status { status, body }
}

/// GitHub wraps base64 content at 60 columns.
fn decode_base64(encoded: &str) -> Result<Vec<u8>, StoreError> {
    let compact: String = encoded
        .chars()
        .filter(|ch| !ch.is_ascii_whitespace())
        .collect();
    BASE64
        .decode(compact)
        .map_err(|err| StoreError::Decode(format!("base64 content: {err}")))
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    sha: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    encoding: Option<String>,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Serialize)]
struct PutContentsRequest<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PutContentsResponse {
    content: PutContentsEntry,
}

#[derive(Debug, Deserialize)]
struct PutContentsEntry {
    path: String,
    sha: String,
    #[serde(default)]
    html_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::{Arc, Mutex},
    };

    use axum::{
        Json, Router,
        extract::{Path, State},
        http::{HeaderMap, StatusCode as AxumStatus},
        response::{IntoResponse, Response as AxumResponse},
        routing::get,
    };
    use serde_json::{Value, json};

    use super::*;
    use crate::test_support::spawn_http;

    const TOKEN: &str = "test-token";
    const INLINE_LIMIT: usize = 64;

    #[derive(Default)]
    struct FakeGithub {
        files: Mutex<HashMap<String, (Vec<u8>, u64)>>,
        next_sha: Mutex<u64>,
    }

    type Shared = Arc<FakeGithub>;

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            == Some("Bearer test-token")
    }

    async fn fake_get(
        State(fake): State<Shared>,
        Path((_owner, _repo, path)): Path<(String, String, String)>,
        headers: HeaderMap,
    ) -> AxumResponse {
        if !authorized(&headers) {
            return (AxumStatus::UNAUTHORIZED, Json(json!({ "message": "Bad credentials" })))
                .into_response();
        }
        let path = path.trim_start_matches('/').to_owned();
        let files = fake.files.lock().unwrap();
        let Some((content, sha)) = files.get(&path) else {
            return (AxumStatus::NOT_FOUND, Json(json!({ "message": "Not Found" })))
                .into_response();
        };

        let wants_raw = headers
            .get("accept")
            .and_then(|value| value.to_str().ok())
            == Some(ACCEPT_RAW);
        if wants_raw {
            return content.clone().into_response();
        }

        let (encoding, encoded) = if content.len() > INLINE_LIMIT {
            ("none", String::new())
        } else {
            let encoded = BASE64.encode(content);
            let wrapped = encoded
                .as_bytes()
                .chunks(60)
                .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
                .collect::<Vec<_>>()
                .join("\n");
            ("base64", wrapped)
        };

        Json(json!({
            "type": "file",
            "path": path,
            "sha": format!("sha-{sha}"),
            "size": content.len(),
            "encoding": encoding,
            "content": encoded,
        }))
        .into_response()
    }

    async fn fake_put(
        State(fake): State<Shared>,
        Path((owner, repo, path)): Path<(String, String, String)>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> AxumResponse {
        if !authorized(&headers) {
            return AxumStatus::UNAUTHORIZED.into_response();
        }
        let path = path.trim_start_matches('/').to_owned();
        let given_sha = body["sha"].as_str().map(str::to_owned);
        let content = BASE64
            .decode(body["content"].as_str().unwrap_or_default())
            .expect("client sends valid base64");
        let branch = body["branch"].as_str().unwrap_or_default().to_owned();

        let mut files = fake.files.lock().unwrap();
        let current = files.get(&path).map(|(_, sha)| format!("sha-{sha}"));
        match (&current, &given_sha) {
            (Some(_), None) => {
                return (
                    AxumStatus::UNPROCESSABLE_ENTITY,
                    Json(json!({ "message": "Invalid request.\n\n\"sha\" wasn't supplied." })),
                )
                    .into_response();
            }
            (current, Some(given)) if current.as_ref() != Some(given) => {
                return (
                    AxumStatus::CONFLICT,
                    Json(json!({ "message": format!("{path} does not match {given}") })),
                )
                    .into_response();
            }
            _ => {}
        }

        let mut next = fake.next_sha.lock().unwrap();
        *next += 1;
        let created = current.is_none();
        files.insert(path.clone(), (content, *next));

        let status = if created {
            AxumStatus::CREATED
        } else {
            AxumStatus::OK
        };
        (
            status,
            Json(json!({
                "content": {
                    "path": path,
                    "sha": format!("sha-{}", *next),
                    "html_url": format!("https://github.com/{owner}/{repo}/blob/{branch}/{path}"),
                }
            })),
        )
            .into_response()
    }

    async fn start_fake() -> (Shared, GithubContentsStore) {
        let fake: Shared = Arc::new(FakeGithub::default());
        let router = Router::new()
            .route(
                "/repos/{owner}/{repo}/contents/{*path}",
                get(fake_get).put(fake_put),
            )
            .with_state(fake.clone());
        let addr = spawn_http(router).await;

        let store = GithubContentsStore::new(
            github_config(&format!("http://{addr}"), TOKEN),
            Duration::from_secs(5),
        )
        .expect("client builds");
        (fake, store)
    }

    fn github_config(api_url: &str, token: &str) -> GithubConfig {
        GithubConfig {
            token: token.to_owned(),
            owner: "octo".to_owned(),
            repo: "resumes".to_owned(),
            branch: "main".to_owned(),
            api_url: Url::parse(api_url).expect("valid url"),
        }
    }

    #[test]
    fn contents_url_encodes_segments() {
        let store = GithubContentsStore::new(
            github_config("https://api.github.com", TOKEN),
            Duration::from_secs(1),
        )
        .unwrap();

        let url = store.contents_url("uploads/1_my cv.pdf").unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.github.com/repos/octo/resumes/contents/uploads/1_my%20cv.pdf"
        );
    }

    #[tokio::test]
    async fn missing_document_reads_as_none() {
        let (_fake, store) = start_fake().await;
        assert!(store.get_document("evaluations/evaluators.json").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn create_read_and_conditional_replace() {
        let (_fake, store) = start_fake().await;
        let path = "evaluations/evaluators.json";

        let created = store
            .put_document(path, DocumentWrite::create(b"[]\n".to_vec(), "create"))
            .await
            .expect("create succeeds");
        assert_eq!(
            created.url(),
            "https://github.com/octo/resumes/blob/main/evaluations/evaluators.json"
        );

        let current = store.get_document(path).await.unwrap().expect("exists");
        assert_eq!(current.content, b"[]\n".to_vec());
        assert_eq!(current.version.as_str(), "sha-1");

        store
            .put_document(
                path,
                DocumentWrite::replace(b"[1]".to_vec(), "update", current.version.clone()),
            )
            .await
            .expect("replace succeeds");

        let err = store
            .put_document(
                path,
                DocumentWrite::replace(b"[2]".to_vec(), "late", current.version),
            )
            .await
            .expect_err("stale sha rejected");
        assert!(err.is_stale());

        let err = store
            .put_document(path, DocumentWrite::create(b"[3]".to_vec(), "blind"))
            .await
            .expect_err("create over existing file rejected");
        assert!(err.is_stale());
    }

    #[tokio::test]
    async fn large_files_are_fetched_raw() {
        let (fake, store) = start_fake().await;
        let big = vec![b'x'; INLINE_LIMIT * 2];
        fake.files
            .lock()
            .unwrap()
            .insert("uploads/big.bin".to_owned(), (big.clone(), 7));

        let document = store.get_document("uploads/big.bin").await.unwrap().unwrap();
        assert_eq!(document.content, big);
        assert_eq!(document.version.as_str(), "sha-7");
    }

    #[tokio::test]
    async fn error_statuses_surface_as_status_errors() {
        let router = Router::new()
            .route(
                "/repos/{owner}/{repo}/contents/{*path}",
                get(fake_get).put(fake_put),
            )
            .with_state(Arc::new(FakeGithub::default()));
        let addr = spawn_http(router).await;
        let store = GithubContentsStore::new(
            github_config(&format!("http://{addr}"), "wrong-token"),
            Duration::from_secs(5),
        )
        .unwrap();

        let err = store.get_document("a.json").await.expect_err("unauthorized");
        assert!(matches!(err, StoreError::Status { status: 401, .. }));
    }

    #[tokio::test]
    async fn slow_store_times_out() {
        async fn slow() -> &'static str {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "late"
        }

        let router = Router::new().route("/repos/{owner}/{repo}/contents/{*path}", get(slow));
        let addr = spawn_http(router).await;
        let store = GithubContentsStore::new(
            github_config(&format!("http://{addr}"), TOKEN),
            Duration::from_millis(200),
        )
        .unwrap();

        let err = store.get_document("a.json").await.expect_err("times out");
        assert!(matches!(err, StoreError::Timeout(d) if d == Duration::from_millis(200)));
    }
}
