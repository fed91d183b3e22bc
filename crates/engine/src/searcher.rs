/// Wraps a meta-search endpoint, returning an ordered list of result URLs
/// for a query (§4.2). On any non-2xx or transport error, logs and
/// returns an empty list — searches are attempted once, never retried.
pub struct Searcher {
    base_url: String,
    max_results: usize,
    http: reqwest::Client,
}

impl Searcher {
    /// `max_results` bounds how many URLs a single query can contribute,
    /// independent of the Orchestrator's own `max_search_items` cap applied
    /// across all queries of an iteration (§6.3 `search.max_results`).
    pub fn new(base_url: &str, max_results: u32) -> Self {
        Self {
            base_url: base_url.to_string(),
            max_results: max_results as usize,
            http: reqwest::Client::new(),
        }
    }

    pub async fn search(&self, query: &str) -> Vec<String> {
        let response = match self
            .http
            .get(&self.base_url)
            .query(&[("q", query), ("format", "json")])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, query = %query, "search request failed");
                metrics::counter!("searcher.errors").increment(1);
                return Vec::new();
            }
        };

        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), query = %query, "search returned non-2xx");
            metrics::counter!("searcher.errors").increment(1);
            return Vec::new();
        }

        let body: serde_json::Value = match response.json().await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, query = %query, "search response was not valid JSON");
                metrics::counter!("searcher.errors").increment(1);
                return Vec::new();
            }
        };

        let urls: Vec<String> = body
            .get("results")
            .and_then(|r| r.as_array())
            .map(|results| {
                results
                    .iter()
                    .filter_map(|r| r.get("url").and_then(|u| u.as_str()))
                    .map(|u| u.to_string())
                    .collect()
            })
            .unwrap_or_default();

        metrics::counter!("searcher.queries").increment(1);
        urls.into_iter().take(self.max_results).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_backend_yields_empty_results() {
        let searcher = Searcher::new("http://127.0.0.1:1/search", 10);
        let results = searcher.search("test query").await;
        assert!(results.is_empty());
    }
}
