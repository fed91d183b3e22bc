use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::browser::BrowserRenderer;
use super::cache::FetchCache;
use super::domain::{extract_domain, looks_like_pdf_url};
use super::html::{extract_html_content, extract_inner_text, extract_title, truncate_chars};
use super::pdf::PdfExtractor;
use super::scheduler::Scheduler;
use crate::provider::Provider;
use deepresearch_common::types::{Message, MessageList};

pub const PDF_TIMEOUT_MESSAGE: &str = "Failed to fetch: PDF extraction timed out";

/// Controls which HTML extraction branch (§4.3 steps 4-5) the Fetcher
/// takes; mirrors `fetch.browse_lite` in configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HtmlMode {
    Lite,
    Full,
}

pub struct FetcherConfig {
    pub use_reader: bool,
    pub reader_base_url: String,
    pub reader_api_key: String,
    pub html_mode: HtmlMode,
    pub max_html_length: usize,
    pub max_eval_time_ms: u64,
    pub pdf_max_pages: u32,
    pub pdf_max_filesize: usize,
    pub pdf_timeout_ms: u64,
}

/// Strategy dispatch of §4.3: remote-reader if enabled, else a
/// headless-browser-backed PDF or HTML branch, all gated by the
/// [`Scheduler`]'s concurrency disciplines and short-circuited by a
/// TTL cache on the URL.
pub struct Fetcher {
    config: FetcherConfig,
    scheduler: Arc<Scheduler>,
    cache: Mutex<FetchCache>,
    http: reqwest::Client,
    renderer: Arc<dyn BrowserRenderer>,
    pdf_extractor: Arc<dyn PdfExtractor>,
    markdown_provider: Arc<dyn Provider>,
    markdown_model: String,
}

impl Fetcher {
    pub fn new(
        config: FetcherConfig,
        scheduler: Arc<Scheduler>,
        cache: FetchCache,
        renderer: Arc<dyn BrowserRenderer>,
        pdf_extractor: Arc<dyn PdfExtractor>,
        markdown_provider: Arc<dyn Provider>,
        markdown_model: String,
    ) -> Self {
        Self {
            config,
            scheduler,
            cache: Mutex::new(cache),
            http: reqwest::Client::new(),
            renderer,
            pdf_extractor,
            markdown_provider,
            markdown_model,
        }
    }

    pub async fn fetch(&self, url: &str, cancel: &CancellationToken) -> String {
        if let Some(cached) = self.cache.lock().await.get(url) {
            return cached;
        }

        let result = self.fetch_uncached(url, cancel).await;

        if !result.starts_with("Error:") && !result.starts_with("Failed to fetch") {
            self.cache.lock().await.insert(url.to_string(), result.clone());
        }
        result
    }

    async fn fetch_uncached(&self, url: &str, cancel: &CancellationToken) -> String {
        if self.config.use_reader {
            return self.fetch_via_reader(url).await;
        }

        let domain = match extract_domain(url) {
            Some(d) => d,
            None => return format!("Error: could not parse URL {}", url),
        };

        let permit = match self.scheduler.acquire(&domain, cancel).await {
            Ok(p) => p,
            Err(e) => return format!("Error: {}", e),
        };

        let is_pdf = looks_like_pdf_url(url) || self.probed_content_type_is_pdf(url).await;
        let result = if is_pdf {
            let _pdf_guard = self.scheduler.acquire_pdf_lock().await;
            self.fetch_pdf(url).await
        } else {
            self.fetch_html(url).await
        };

        self.scheduler.record_fetch(&domain).await;
        drop(permit);
        result
    }

    /// HEAD-probes `url` for a `Content-Type: application/pdf` response,
    /// covering the half of §4.3's PDF OR-condition that a `.pdf` path
    /// check can't see (e.g. `/download?id=42`). Any probe failure (host
    /// doesn't support HEAD, network error, missing header) falls through
    /// to `false` rather than blocking the fetch — the HTML branch still
    /// gets a real chance to render the page.
    async fn probed_content_type_is_pdf(&self, url: &str) -> bool {
        let response = match self.http.head(url).send().await {
            Ok(r) => r,
            Err(_) => return false,
        };
        response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.to_lowercase().starts_with("application/pdf"))
            .unwrap_or(false)
    }

    async fn fetch_via_reader(&self, url: &str) -> String {
        let reader_url = format!("{}{}", self.config.reader_base_url, url);
        let response = match self
            .http
            .get(&reader_url)
            .bearer_auth(&self.config.reader_api_key)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return format!("Error: remote-reader request failed - {}", e),
        };

        if !response.status().is_success() {
            return format!("Error: remote-reader returned {}", response.status());
        }

        match response.text().await {
            Ok(body) => body,
            Err(e) => format!("Error: remote-reader body read failed - {}", e),
        }
    }

    async fn fetch_pdf(&self, url: &str) -> String {
        let deadline = tokio::time::Duration::from_millis(self.config.pdf_timeout_ms);
        let bytes = match tokio::time::timeout(deadline, self.http.get(url).send()).await {
            Ok(Ok(response)) => match response.bytes().await {
                Ok(b) => b,
                Err(e) => return format!("Error: failed to read PDF body - {}", e),
            },
            Ok(Err(e)) => return format!("Error: PDF fetch failed - {}", e),
            Err(_) => return PDF_TIMEOUT_MESSAGE.to_string(),
        };

        if bytes.len() > self.config.pdf_max_filesize {
            return format!(
                "Error: PDF exceeds max filesize ({} > {})",
                bytes.len(),
                self.config.pdf_max_filesize
            );
        }

        match self.pdf_extractor.extract(&bytes, self.config.pdf_max_pages) {
            Ok(text) => format!("# PDF Content\n{}", text),
            Err(e) => format!("Error: PDF extraction failed - {}", e),
        }
    }

    async fn fetch_html(&self, url: &str) -> String {
        let deadline = tokio::time::Duration::from_millis(self.config.max_eval_time_ms);
        let html = match tokio::time::timeout(deadline, self.renderer.render(url, self.config.max_eval_time_ms)).await {
            Ok(Ok(h)) => h,
            Ok(Err(e)) => return format!("Error: render failed - {}", e),
            Err(_) => return "Failed to fetch: page render timed out".to_string(),
        };

        let title = extract_title(&html);

        match self.config.html_mode {
            HtmlMode::Lite => {
                let text = extract_inner_text(&html);
                format!("# {}\n{}", title, text)
            }
            HtmlMode::Full => {
                let cleaned = truncate_chars(&extract_html_content(&html), self.config.max_html_length);
                let messages = MessageList(vec![Message::user(&cleaned)]);
                let markdown = self
                    .markdown_provider
                    .generate(&messages, &self.markdown_model, 2048, 4096)
                    .await
                    .unwrap_or(cleaned);
                format!("# {}\n{}", title, markdown)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::cache::FetchCache;
    use crate::fetch::pdf::NaivePdfExtractor;
    use std::future::Future;
    use std::pin::Pin;
    use std::time::Duration;

    struct StubRenderer(String);
    impl BrowserRenderer for StubRenderer {
        fn render<'a>(
            &'a self,
            _url: &'a str,
            _max_eval_time_ms: u64,
        ) -> Pin<Box<dyn Future<Output = deepresearch_common::Result<String>> + Send + 'a>> {
            let html = self.0.clone();
            Box::pin(async move { Ok(html) })
        }
    }

    struct StubProvider;
    impl Provider for StubProvider {
        fn generate<'a>(
            &'a self,
            _messages: &'a MessageList,
            _model: &'a str,
            _max_tokens: u32,
            _ctx: u32,
        ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>> {
            Box::pin(async move { Some("markdown body".to_string()) })
        }

        fn generate_stream(
            &self,
            _messages: MessageList,
            _model: String,
            _max_tokens: u32,
            _ctx: u32,
        ) -> tokio::sync::mpsc::Receiver<String> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            rx
        }
    }

    fn test_fetcher(mode: HtmlMode, html: &str) -> Fetcher {
        Fetcher::new(
            FetcherConfig {
                use_reader: false,
                reader_base_url: String::new(),
                reader_api_key: String::new(),
                html_mode: mode,
                max_html_length: 10_000,
                max_eval_time_ms: 5_000,
                pdf_max_pages: 10,
                pdf_max_filesize: 10_000_000,
                pdf_timeout_ms: 5_000,
            },
            Arc::new(Scheduler::new(4, 0.0)),
            FetchCache::new(Duration::from_secs(3600)),
            Arc::new(StubRenderer(html.to_string())),
            Arc::new(NaivePdfExtractor),
            Arc::new(StubProvider),
            "markdown-model".to_string(),
        )
    }

    #[tokio::test]
    async fn html_lite_mode_returns_title_and_inner_text() {
        let fetcher = test_fetcher(
            HtmlMode::Lite,
            "<html><head><title>Hi</title></head><body><p>content here</p></body></html>",
        );
        let cancel = CancellationToken::new();
        let result = fetcher.fetch("https://example.com/a", &cancel).await;
        assert!(result.starts_with("# Hi\n"));
        assert!(result.contains("content here"));
    }

    #[tokio::test]
    async fn html_full_mode_uses_markdown_provider() {
        let fetcher = test_fetcher(
            HtmlMode::Full,
            "<html><head><title>Hi</title></head><body><p>content here</p></body></html>",
        );
        let cancel = CancellationToken::new();
        let result = fetcher.fetch("https://example.com/b", &cancel).await;
        assert_eq!(result, "# Hi\nmarkdown body");
    }

    #[tokio::test]
    async fn second_fetch_of_same_url_is_served_from_cache() {
        let fetcher = test_fetcher(
            HtmlMode::Lite,
            "<html><head><title>Hi</title></head><body><p>x</p></body></html>",
        );
        let cancel = CancellationToken::new();
        let first = fetcher.fetch("https://example.com/c", &cancel).await;
        let second = fetcher.fetch("https://example.com/c", &cancel).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn unparsable_url_yields_error_string() {
        let fetcher = test_fetcher(HtmlMode::Lite, "<html></html>");
        let cancel = CancellationToken::new();
        let result = fetcher.fetch("not a url", &cancel).await;
        assert!(result.starts_with("Error:"));
    }

    /// An extensionless URL serving `Content-Type: application/pdf` must
    /// still take the PDF branch, per §4.3's OR condition. The renderer is
    /// never consulted; if it were, the HTML branch would have wrapped the
    /// page title with "# ", which this response never produces.
    #[tokio::test]
    async fn extensionless_url_with_pdf_content_type_is_routed_to_pdf_extraction() {
        use axum::response::IntoResponse;
        use axum::routing::get;

        let app = axum::Router::new().route(
            "/download",
            get(|| async {
                ([(axum::http::header::CONTENT_TYPE, "application/pdf")], "not actually a pdf").into_response()
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let fetcher = test_fetcher(HtmlMode::Lite, "<html><head><title>Unused</title></head></html>");
        let cancel = CancellationToken::new();
        let url = format!("http://{addr}/download");
        let result = fetcher.fetch(&url, &cancel).await;

        assert!(
            result.starts_with("Error: PDF extraction failed"),
            "expected PDF branch to run and fail on non-PDF bytes, got: {result}"
        );
    }
}
