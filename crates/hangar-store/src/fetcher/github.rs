//! GitHub contents API source.
//!
//! `GET {api_base}/repos/{owner}/{repo}/contents/{path}?ref={git_ref}`
//! returns a JSON array of `{name, type, path, download_url}` for a
//! directory. Files are then fetched from their `download_url`.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::debug;

use super::{ContentsSource, RemoteEntry};
use crate::error::{FetchError, FetchResult};

/// Contents source backed by the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GitHubContents {
    http: reqwest::Client,
    api_base: String,
    timeout: Duration,
    max_file_bytes: u64,
}

impl GitHubContents {
    /// Create a source talking to `api_base` (normally `https://api.github.com`).
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        api_base: impl Into<String>,
        timeout: Duration,
        max_file_bytes: u64,
    ) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_owned(),
            timeout,
            max_file_bytes,
        }
    }

    fn listing_url(&self, owner: &str, repo: &str, path: &str) -> FetchResult<url::Url> {
        let mut url =
            url::Url::parse(&self.api_base).map_err(|e| FetchError::UnsupportedRepository {
                url: self.api_base.clone(),
                reason: format!("invalid API base: {e}"),
            })?;
        url.path_segments_mut()
            .map_err(|()| FetchError::UnsupportedRepository {
                url: self.api_base.clone(),
                reason: "API base cannot carry a path".to_owned(),
            })?
            .pop_if_empty()
            .extend(["repos", owner, repo, "contents"])
            .extend(path.split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }
}

/// Split a GitHub repository URL into owner and repository name.
///
/// Accepts `https://github.com/<owner>/<repo>` with an optional `.git`
/// suffix or trailing path (`/tree/main/...`).
pub(crate) fn parse_github_repo(repo_url: &str) -> FetchResult<(String, String)> {
    let unsupported = |reason: &str| FetchError::UnsupportedRepository {
        url: repo_url.to_owned(),
        reason: reason.to_owned(),
    };
    let url = url::Url::parse(repo_url).map_err(|e| unsupported(&e.to_string()))?;
    if !matches!(url.scheme(), "https" | "http") {
        return Err(unsupported("scheme must be http or https"));
    }
    if !matches!(url.host_str(), Some("github.com" | "www.github.com")) {
        return Err(unsupported("only github.com repositories are supported"));
    }
    let mut segments = url
        .path_segments()
        .ok_or_else(|| unsupported("missing owner and repository"))?
        .filter(|s| !s.is_empty());
    let (Some(owner), Some(repo)) = (segments.next(), segments.next()) else {
        return Err(unsupported("missing owner and repository"));
    };
    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    Ok((owner.to_owned(), repo.to_owned()))
}

#[async_trait]
impl ContentsSource for GitHubContents {
    async fn list_dir(
        &self,
        repo_url: &str,
        git_ref: &str,
        path: &str,
    ) -> FetchResult<Vec<RemoteEntry>> {
        let (owner, repo) = parse_github_repo(repo_url)?;
        let url = self.listing_url(&owner, &repo, path)?;
        let listing_err = |message: String| FetchError::Listing {
            path: path.to_owned(),
            message,
        };

        debug!(%url, git_ref, "Listing contents");
        let response = self
            .http
            .get(url)
            .query(&[("ref", git_ref)])
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| listing_err(format!("request failed: {e}")))?;

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| listing_err(format!("{status}: invalid JSON: {e}")))?;

        match body {
            serde_json::Value::Array(_) if status.is_success() => serde_json::from_value(body)
                .map_err(|e| listing_err(format!("unexpected listing shape: {e}"))),
            serde_json::Value::Object(ref obj) if obj.contains_key("message") => {
                let message = obj
                    .get("message")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("unknown error");
                Err(listing_err(format!("{status}: {message}")))
            },
            _ if status.is_success() => Err(listing_err("not a directory".to_owned())),
            _ => Err(listing_err(format!("contents API returned {status}"))),
        }
    }

    async fn download(&self, entry: &RemoteEntry) -> FetchResult<Vec<u8>> {
        let download_err = |message: String| FetchError::Download {
            path: entry.path.clone(),
            message,
        };
        let url = entry
            .download_url
            .as_deref()
            .ok_or_else(|| download_err("no download url".to_owned()))?;

        if let Some(size) = entry.size
            && size > self.max_file_bytes
        {
            return Err(FetchError::TooLarge {
                path: entry.path.clone(),
                size,
                limit: self.max_file_bytes,
            });
        }

        let response = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| download_err(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(download_err(format!("server returned {}", response.status())));
        }

        if let Some(len) = response.content_length()
            && len > self.max_file_bytes
        {
            return Err(FetchError::TooLarge {
                path: entry.path.clone(),
                size: len,
                limit: self.max_file_bytes,
            });
        }

        download_with_limit(response, &entry.path, self.max_file_bytes).await
    }
}

/// Stream a response body, failing once it exceeds `max_size`.
async fn download_with_limit(
    response: reqwest::Response,
    path: &str,
    max_size: u64,
) -> FetchResult<Vec<u8>> {
    let capacity =
        usize::try_from(response.content_length().unwrap_or(0).min(max_size)).unwrap_or(0);
    let mut bytes = Vec::with_capacity(capacity);
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| FetchError::Download {
            path: path.to_owned(),
            message: format!("stream error: {e}"),
        })?;
        bytes.extend_from_slice(&chunk);
        let current = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
        if current > max_size {
            return Err(FetchError::TooLarge {
                path: path.to_owned(),
                size: current,
                limit: max_size,
            });
        }
    }

    Ok(bytes)
}
