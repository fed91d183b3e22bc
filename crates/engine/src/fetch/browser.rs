use std::future::Future;
use std::pin::Pin;

use deepresearch_common::Result;

/// Collaborator seam for rendering JavaScript-heavy pages. The upstream
/// system shells out to a headless browser process; here it is an
/// injectable trait so the Fetcher's dispatch logic can be tested without
/// one. `render` returns the fully rendered HTML for `url`.
pub trait BrowserRenderer: Send + Sync {
    fn render<'a>(&'a self, url: &'a str, max_eval_time_ms: u64) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;
}

/// Renders by issuing a plain HTTP GET — adequate for static pages and
/// as the default until a real headless-browser backend is wired in.
/// `max_eval_time_ms` is accepted for interface parity but unused since
/// there is no script evaluation to bound.
pub struct HttpGetRenderer {
    http: reqwest::Client,
}

impl HttpGetRenderer {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for HttpGetRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl BrowserRenderer for HttpGetRenderer {
    fn render<'a>(&'a self, url: &'a str, _max_eval_time_ms: u64) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move {
            let response = self.http.get(url).send().await.map_err(|e| {
                deepresearch_common::DeepResearchError::FetchError {
                    url: url.to_string(),
                    detail: e.to_string(),
                }
            })?;
            response.text().await.map_err(|e| {
                deepresearch_common::DeepResearchError::FetchError {
                    url: url.to_string(),
                    detail: e.to_string(),
                }
            })
        })
    }
}
