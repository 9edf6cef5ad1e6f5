//! Optional context enrichment gathered before each turn.
//!
//! A [`ContextSource`] turns the user's question into a block of evidence
//! (archived snapshots, repositories, ...) that is appended to the system
//! prompt under a `Context:` heading. Sources are best effort: a failing
//! source is logged and skipped, it never fails the turn.

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    secrecy::{ExposeSecret, Secret},
    serde_json::Value,
    tracing::debug,
    veritas_orchestrator::Depth,
};

use crate::citations::extract_citations;

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{source_name} returned HTTP {status}")]
    Status { source_name: String, status: u16 },

    #[error("unknown context source \"{0}\"")]
    UnknownSource(String),
}

/// Something that can add evidence to a turn.
#[async_trait]
pub trait ContextSource: Send + Sync {
    /// Short name used in the prompt block and in logs.
    fn name(&self) -> &str;

    /// Evidence for `query`, or an empty string when there is nothing to add.
    async fn gather(&self, query: &str, depth: Depth) -> Result<String, ContextError>;
}

fn http_client() -> &'static reqwest::Client {
    static CLIENT: std::sync::LazyLock<reqwest::Client> = std::sync::LazyLock::new(|| {
        reqwest::Client::builder()
            .user_agent(concat!("veritas/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default()
    });
    &CLIENT
}

/// Build the named built-in sources.
pub fn sources_from_names(
    names: &[String],
    timeout: Duration,
) -> Result<Vec<Arc<dyn ContextSource>>, ContextError> {
    names
        .iter()
        .map(|name| -> Result<Arc<dyn ContextSource>, ContextError> {
            match name.trim().to_ascii_lowercase().as_str() {
                "wayback" => Ok(Arc::new(WaybackSource::new(timeout))),
                "github" => Ok(Arc::new(
                    GithubSource::new(timeout)
                        .with_token(std::env::var("GITHUB_TOKEN").ok().map(Secret::new)),
                )),
                _ => Err(ContextError::UnknownSource(name.clone())),
            }
        })
        .collect()
}

// ── Wayback Machine ─────────────────────────────────────────────────────────

/// Looks up the closest Wayback Machine snapshot of every URL in the question.
pub struct WaybackSource {
    base_url: String,
    timeout: Duration,
}

impl WaybackSource {
    pub const DEFAULT_BASE_URL: &'static str = "https://archive.org";

    pub fn new(timeout: Duration) -> Self {
        Self {
            base_url: Self::DEFAULT_BASE_URL.into(),
            timeout,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn closest(&self, url: &str) -> Result<Option<String>, ContextError> {
        let resp = http_client()
            .get(format!("{}/wayback/available", self.base_url))
            .query(&[("url", url)])
            .timeout(self.timeout)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ContextError::Status {
                source_name: "wayback".into(),
                status: resp.status().as_u16(),
            });
        }
        let body: Value = resp.json().await?;
        let closest = &body["archived_snapshots"]["closest"];
        if closest["available"].as_bool() != Some(true) {
            return Ok(None);
        }
        let Some(snapshot) = closest["url"].as_str() else {
            return Ok(None);
        };
        let timestamp = closest["timestamp"].as_str().unwrap_or("unknown date");
        Ok(Some(format!("- {url} archived {timestamp}: {snapshot}")))
    }
}

#[async_trait]
impl ContextSource for WaybackSource {
    fn name(&self) -> &str {
        "wayback"
    }

    async fn gather(&self, query: &str, _depth: Depth) -> Result<String, ContextError> {
        let urls = extract_citations(query);
        if urls.is_empty() {
            return Ok(String::new());
        }
        let mut lines = Vec::new();
        for url in &urls {
            match self.closest(url).await? {
                Some(line) => lines.push(line),
                None => debug!(url = %url, "no wayback snapshot"),
            }
        }
        Ok(lines.join("\n"))
    }
}

// ── GitHub repository search ────────────────────────────────────────────────

/// Top repositories matching the question on GitHub.
pub struct GithubSource {
    base_url: String,
    token: Option<Secret<String>>,
    timeout: Duration,
    per_page: u8,
}

impl GithubSource {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.github.com";

    pub fn new(timeout: Duration) -> Self {
        Self {
            base_url: Self::DEFAULT_BASE_URL.into(),
            token: None,
            timeout,
            per_page: 3,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Authenticated requests get a higher rate limit.
    #[must_use]
    pub fn with_token(mut self, token: Option<Secret<String>>) -> Self {
        self.token = token.filter(|t| !t.expose_secret().is_empty());
        self
    }
}

#[async_trait]
impl ContextSource for GithubSource {
    fn name(&self) -> &str {
        "github"
    }

    async fn gather(&self, query: &str, _depth: Depth) -> Result<String, ContextError> {
        let per_page = self.per_page.to_string();
        let mut req = http_client()
            .get(format!("{}/search/repositories", self.base_url))
            .query(&[("q", query), ("per_page", per_page.as_str())])
            .header("Accept", "application/vnd.github+json")
            .timeout(self.timeout);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token.expose_secret());
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(ContextError::Status {
                source_name: "github".into(),
                status: resp.status().as_u16(),
            });
        }
        let body: Value = resp.json().await?;

        let lines: Vec<String> = body["items"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|item| {
                let name = item["full_name"].as_str()?;
                let url = item["html_url"].as_str()?;
                Some(match item["description"].as_str() {
                    Some(desc) if !desc.trim().is_empty() => {
                        format!("- [{name}]({url}): {}", desc.trim())
                    },
                    _ => format!("- [{name}]({url})"),
                })
            })
            .collect();
        Ok(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Mutex};

    use {
        axum::{Json, Router, extract::Query, http::StatusCode, routing::get},
        serde_json::json,
    };

    use super::*;

    type Seen = Arc<Mutex<Vec<HashMap<String, String>>>>;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn wayback_reports_closest_snapshot_per_url() {
        let seen: Seen = Arc::default();
        let captured = Arc::clone(&seen);
        let router = Router::new().route(
            "/wayback/available",
            get(move |Query(q): Query<HashMap<String, String>>| {
                let captured = Arc::clone(&captured);
                async move {
                    let url = q.get("url").cloned().unwrap_or_default();
                    captured.lock().unwrap().push(q);
                    if url.contains("gone.example") {
                        Json(json!({ "archived_snapshots": {} }))
                    } else {
                        Json(json!({
                            "archived_snapshots": { "closest": {
                                "available": true,
                                "url": format!("http://web.archive.org/web/20200101000000/{url}"),
                                "timestamp": "20200101000000",
                                "status": "200"
                            }}
                        }))
                    }
                }
            }),
        );
        let base = serve(router).await;
        let source = WaybackSource::new(Duration::from_secs(5)).with_base_url(base);

        let text = source
            .gather(
                "What did https://report.example/a say, and https://gone.example?",
                Depth::Vault,
            )
            .await
            .unwrap();

        assert_eq!(
            text,
            "- https://report.example/a archived 20200101000000: \
             http://web.archive.org/web/20200101000000/https://report.example/a"
        );
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0]["url"], "https://report.example/a");
    }

    #[tokio::test]
    async fn wayback_without_urls_makes_no_request() {
        let source =
            WaybackSource::new(Duration::from_secs(1)).with_base_url("http://127.0.0.1:1");
        let text = source.gather("no links here", Depth::Surface).await.unwrap();
        assert!(text.is_empty());
    }

    #[tokio::test]
    async fn github_lists_repositories_with_token() {
        let auth: Arc<Mutex<Option<String>>> = Arc::default();
        let captured = Arc::clone(&auth);
        let router = Router::new().route(
            "/search/repositories",
            get(
                move |headers: axum::http::HeaderMap, Query(q): Query<HashMap<String, String>>| {
                    let captured = Arc::clone(&captured);
                    async move {
                        *captured.lock().unwrap() = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        assert_eq!(q["q"], "leaked memo");
                        assert_eq!(q["per_page"], "3");
                        Json(json!({ "items": [
                            { "full_name": "acme/memo", "html_url": "https://github.com/acme/memo",
                              "description": " Mirror of the memo " },
                            { "full_name": "acme/bare", "html_url": "https://github.com/acme/bare",
                              "description": null },
                            { "full_name": "broken" }
                        ]}))
                    }
                },
            ),
        );
        let base = serve(router).await;
        let source = GithubSource::new(Duration::from_secs(5))
            .with_base_url(base)
            .with_token(Some(Secret::new("ghp_test".into())));

        let text = source.gather("leaked memo", Depth::Dark).await.unwrap();
        assert_eq!(
            text,
            "- [acme/memo](https://github.com/acme/memo): Mirror of the memo\n\
             - [acme/bare](https://github.com/acme/bare)"
        );
        assert_eq!(auth.lock().unwrap().as_deref(), Some("Bearer ghp_test"));
    }

    #[tokio::test]
    async fn github_error_status_is_reported() {
        let router = Router::new().route(
            "/search/repositories",
            get(|| async { (StatusCode::FORBIDDEN, "rate limited") }),
        );
        let base = serve(router).await;
        let source = GithubSource::new(Duration::from_secs(5)).with_base_url(base);
        let err = source.gather("x", Depth::Surface).await.unwrap_err();
        assert!(matches!(err, ContextError::Status { status: 403, .. }));
    }

    #[test]
    fn builds_sources_by_name() {
        let names = vec!["Wayback".to_string(), "github".to_string()];
        let sources = sources_from_names(&names, Duration::from_secs(1)).unwrap();
        let built: Vec<&str> = sources.iter().map(|s| s.name()).collect();
        assert_eq!(built, vec!["wayback", "github"]);

        let err = sources_from_names(&["bing".to_string()], Duration::from_secs(1));
        assert!(matches!(err, Err(ContextError::UnknownSource(n)) if n == "bing"));
    }
}
