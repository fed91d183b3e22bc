use std::future::Future;
use std::pin::Pin;

use deepresearch_common::types::MessageList;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

use super::{canonicalize_base_url, Provider};

/// Provider speaking a native local streaming chat protocol (e.g. an
/// Ollama-compatible `/api/chat` endpoint) rather than OpenAI's SSE wire
/// format. Streams newline-delimited JSON objects, each carrying one
/// incremental `message.content` chunk.
pub struct LocalProvider {
    base_url: String,
    http: reqwest::Client,
}

impl LocalProvider {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: canonicalize_base_url(base_url),
            http: reqwest::Client::new(),
        }
    }

    fn build_payload(&self, messages: &MessageList, model: &str, max_tokens: u32, ctx: u32) -> serde_json::Value {
        let mut options = serde_json::json!({ "num_predict": max_tokens });
        if ctx > 2000 {
            options["num_ctx"] = serde_json::json!(ctx);
        }
        serde_json::json!({
            "model": model,
            "messages": messages.to_openai_format(),
            "stream": true,
            "options": options,
        })
    }
}

impl Provider for LocalProvider {
    fn generate<'a>(
        &'a self,
        messages: &'a MessageList,
        model: &'a str,
        max_tokens: u32,
        ctx: u32,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>> {
        Box::pin(async move {
            let mut rx =
                self.generate_stream(messages.clone(), model.to_string(), max_tokens, ctx);
            let mut out = String::new();
            while let Some(chunk) = rx.recv().await {
                out.push_str(&chunk);
            }
            if out.is_empty() {
                None
            } else {
                Some(out)
            }
        })
    }

    fn generate_stream(
        &self,
        messages: MessageList,
        model: String,
        max_tokens: u32,
        ctx: u32,
    ) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(32);
        let payload = self.build_payload(&messages, &model, max_tokens, ctx);
        let url = format!("{}/api/chat", self.base_url);
        let http = self.http.clone();

        tokio::spawn(async move {
            let response = match http.post(&url).json(&payload).send().await {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!(error = %e, model = %model, "local provider request failed");
                    let _ = tx.send(format!("Error: local provider request failed - {}", e)).await;
                    return;
                }
            };

            let mut stream = response.bytes_stream();
            let mut buf = String::new();
            while let Some(next) = stream.next().await {
                let bytes = match next {
                    Ok(b) => b,
                    Err(e) => {
                        tracing::error!(error = %e, "local provider stream read failed");
                        break;
                    }
                };
                buf.push_str(&String::from_utf8_lossy(&bytes));
                while let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].trim().to_string();
                    buf.drain(..=pos);
                    if line.is_empty() {
                        continue;
                    }
                    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&line) {
                        if let Some(content) = value
                            .get("message")
                            .and_then(|m| m.get("content"))
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
