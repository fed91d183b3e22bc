use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use deepresearch_common::types::MessageList;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

use super::parse::looks_like_retryable_error;
use super::rate_limit::RateWindow;
use super::Provider;

/// OpenAI-compatible HTTP+SSE provider (OpenRouter, vLLM's OpenAI shim,
/// etc). Rate-limits only the configured `default_model`, and retries
/// exactly once against `fallback_model` on an empty response or a
/// rate/context-length error phrase (§4.1).
///
/// Unlike `LocalProvider`, the configured base URL is used verbatim: it
/// is expected to already be the full chat-completions endpoint (e.g.
/// `https://openrouter.ai/api/v1/chat/completions`), so no `/v1`
/// stripping is applied here.
pub struct OpenAiCompatibleProvider {
    base_url: String,
    api_key: String,
    default_model: String,
    fallback_model: String,
    rate_window: Arc<RateWindow>,
    http: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(
        base_url: &str,
        api_key: &str,
        default_model: &str,
        fallback_model: &str,
        requests_per_minute: i64,
    ) -> Self {
        Self {
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            default_model: default_model.to_string(),
            fallback_model: fallback_model.to_string(),
            rate_window: Arc::new(RateWindow::new(requests_per_minute)),
            http: reqwest::Client::new(),
        }
    }

    fn build_payload(&self, messages: &MessageList, model: &str, max_tokens: u32, _ctx: u32) -> serde_json::Value {
        serde_json::json!({
            "model": model,
            "messages": messages.to_openai_format(),
            "max_tokens": max_tokens,
            "stream": true,
        })
    }

    async fn generate_once(
        &self,
        messages: &MessageList,
        model: &str,
        max_tokens: u32,
        ctx: u32,
    ) -> Option<String> {
        if model == self.default_model {
            self.rate_window.acquire().await;
        }

        let mut rx = self.stream_raw(messages.clone(), model.to_string(), max_tokens, ctx, None);
        let mut out = String::new();
        while let Some(chunk) = rx.recv().await {
            out.push_str(&chunk);
        }
        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }

    /// Issue the HTTP request and forward SSE `delta.content` chunks,
    /// with no fallback logic of its own — the public
    /// `generate`/`generate_stream` wrap this. `rate_window`, when given,
    /// is acquired inside the spawned task before the request goes out,
    /// so the wait (if any) doesn't block the caller of `generate_stream`.
    fn stream_raw(
        &self,
        messages: MessageList,
        model: String,
        max_tokens: u32,
        ctx: u32,
        rate_window: Option<Arc<RateWindow>>,
    ) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(32);
        let payload = self.build_payload(&messages, &model, max_tokens, ctx);
        let url = self.base_url.clone();
        let api_key = self.api_key.clone();
        let http = self.http.clone();

        tokio::spawn(async move {
            if let Some(rate_window) = rate_window {
                rate_window.acquire().await;
            }

            let response = match http
                .post(&url)
                .bearer_auth(&api_key)
                .json(&payload)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!(error = %e, model = %model, "openai-compatible request failed");
                    let _ = tx
                        .send(format!("Error: OpenAI-compatible request failed - {}", e))
                        .await;
                    return;
                }
            };

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                tracing::error!(status = %status, body = %body, "openai-compatible API error");
                let _ = tx
                    .send(format!("Error: API returned {} - {}", status, body))
                    .await;
                return;
            }

            let mut stream = response.bytes_stream();
            let mut buf = String::new();
            while let Some(next) = stream.next().await {
                let bytes = match next {
                    Ok(b) => b,
                    Err(e) => {
                        tracing::error!(error = %e, "openai-compatible stream read failed");
                        break;
                    }
                };
                buf.push_str(&String::from_utf8_lossy(&bytes));
                while let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].trim().to_string();
                    buf.drain(..=pos);
                    if !line.starts_with("data: ") {
                        continue;
                    }
                    let payload = &line[6..];
                    if payload == "[DONE]" {
                        continue;
                    }
                    if let Ok(data) = serde_json::from_str::<serde_json::Value>(payload) {
                        if let Some(content) = data
                            .get("choices")
                            .and_then(|c| c.get(0))
                            .and_then(|c| c.get("delta"))
                            .and_then(|d| d.get("content"))
                            .and_then(|c| c.as_str())
                        {
                            if !content.is_empty() && tx.send(content.to_string()).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        });

        rx
    }
}

impl Provider for OpenAiCompatibleProvider {
    fn generate<'a>(
        &'a self,
        messages: &'a MessageList,
        model: &'a str,
        max_tokens: u32,
        ctx: u32,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>> {
        Box::pin(async move { self.generate_with_fallback(messages, model, max_tokens, ctx, false).await })
    }

    fn generate_stream(
        &self,
        messages: MessageList,
        model: String,
        max_tokens: u32,
        ctx: u32,
    ) -> mpsc::Receiver<String> {
        // Rate limiting applies even to the streaming path; the window is
        // shared via `Arc` and acquired inside `stream_raw`'s own spawned
        // task, ahead of the HTTP request, so callers still get the
        // receiver back immediately.
        let rate_applies = model == self.default_model;
        let rate_window = rate_applies.then(|| Arc::clone(&self.rate_window));
        self.stream_raw(messages, model, max_tokens, ctx, rate_window)
    }
}

impl OpenAiCompatibleProvider {
    fn generate_with_fallback<'a>(
        &'a self,
        messages: &'a MessageList,
        model: &'a str,
        max_tokens: u32,
        ctx: u32,
        is_fallback_attempt: bool,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>> {
        Box::pin(async move {
            let result = self.generate_once(messages, model, max_tokens, ctx).await;

            let needs_fallback = match &result {
                None => true,
                Some(text) => looks_like_retryable_error(text),
            };

            if needs_fallback && !is_fallback_attempt && model != self.fallback_model {
                tracing::warn!(
                    model = %model,
                    fallback_model = %self.fallback_model,
                    "falling back to secondary model"
                );
                return self
                    .generate_with_fallback(messages, &self.fallback_model, max_tokens, ctx, true)
                    .await;
            }

            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_used_verbatim() {
        let provider = OpenAiCompatibleProvider::new(
            "https://openrouter.ai/api/v1/chat/completions",
            "key",
            "m",
            "fb",
            0,
        );
        assert_eq!(provider.base_url, "https://openrouter.ai/api/v1/chat/completions");
    }
}
