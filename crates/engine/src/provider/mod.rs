mod local;
mod openai_compatible;
mod parse;
mod rate_limit;

pub use local::LocalProvider;
pub use openai_compatible::OpenAiCompatibleProvider;
pub use parse::{parse_list_response, ParsedList};

use std::future::Future;
use std::pin::Pin;

use deepresearch_common::types::MessageList;
use tokio::sync::mpsc;

/// Uniform interface over LLM backends. Modeled as a capability set rather
/// than a class hierarchy: `generate`/`generate_stream` are the primitive
/// operations, and `generate_and_parse_list` is a default method built on
/// top of `generate` plus the shared list-parsing free function in
/// `parse.rs` — not reimplemented per variant.
pub trait Provider: Send + Sync {
    /// Generate a complete response, or `None` if the call failed or the
    /// provider returned nothing usable.
    fn generate<'a>(
        &'a self,
        messages: &'a MessageList,
        model: &'a str,
        max_tokens: u32,
        ctx: u32,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>>;

    /// Stream a response as a finite sequence of text chunks. Non-
    /// restartable: the returned receiver is consumed once. The sender
    /// half is driven by an internally spawned task, so the caller never
    /// blocks the stream's producer on the stream's consumer.
    fn generate_stream(
        &self,
        messages: MessageList,
        model: String,
        max_tokens: u32,
        ctx: u32,
    ) -> mpsc::Receiver<String>;

    /// Generate then parse the response as a list-of-strings literal (or
    /// the `<done>` sentinel). Never returns an error: any failure to
    /// generate or parse degrades to an empty list, by design (§4.1).
    fn generate_and_parse_list<'a>(
        &'a self,
        messages: &'a MessageList,
        model: &'a str,
        max_tokens: u32,
        ctx: u32,
    ) -> Pin<Box<dyn Future<Output = ParsedList> + Send + 'a>> {
        Box::pin(async move {
            match self.generate(messages, model, max_tokens, ctx).await {
                Some(response) => parse_list_response(&response),
                None => {
                    tracing::warn!("provider returned empty response for list generation");
                    ParsedList::Items(Vec::new())
                }
            }
        })
    }
}

/// Strip a trailing `/v1` path segment from a configured base URL, the
/// canonicalization every provider variant applies before dispatching —
/// native chat protocols expect the bare host, while the caller's config
/// may have been copied from an OpenAI-style `.../v1` endpoint.
pub fn canonicalize_base_url(base_url: &str) -> String {
    base_url.strip_suffix("/v1").unwrap_or(base_url).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_strips_trailing_v1() {
        assert_eq!(
            canonicalize_base_url("http://localhost:11434/v1"),
            "http://localhost:11434"
        );
        assert_eq!(
            canonicalize_base_url("http://localhost:11434"),
            "http://localhost:11434"
        );
    }
}
