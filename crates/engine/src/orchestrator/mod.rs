mod events;
mod think;

pub use events::OrchestratorEvent;
pub use think::{strip_think_tags, wrap_think};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use deepresearch_common::types::{ContextRecord, ResearchRequest, Session, SessionStatus};
use deepresearch_common::SessionId;

use crate::fetch::Fetcher;
use crate::provider::{ParsedList, Provider};
use crate::searcher::Searcher;
use crate::store::Store;

const RETRY_ENVELOPE_MIN_LEN: usize = 200;

/// Tunables resolved once at startup from `EngineConfig` (§4.4, §6.3),
/// plus the prompt templates keyed the way `config::loader::load_prompts`
/// loads them.
pub struct OrchestratorConfig {
    pub default_model: String,
    pub reason_model: String,
    pub default_ctx: u32,
    pub reason_ctx: u32,
    pub prompts: HashMap<String, String>,
}

impl OrchestratorConfig {
    fn prompt(&self, key: &str) -> &str {
        self.prompts.get(key).map(String::as_str).unwrap_or("")
    }
}

/// Drives the `S_PLAN -> S_ITERATE -> S_REPORT -> S_DONE` state machine of
/// §4.4, composing Provider/Searcher/Fetcher/Store. Logically single-
/// threaded: the Scheduler embedded in `Fetcher` supplies all real
/// parallelism, and session state is only ever mutated from this loop.
pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    searcher: Arc<Searcher>,
    fetcher: Arc<Fetcher>,
    store: Arc<dyn Store>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        searcher: Arc<Searcher>,
        fetcher: Arc<Fetcher>,
        store: Arc<dyn Store>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            provider,
            searcher,
            fetcher,
            store,
            config,
        }
    }

    /// Runs one research session to completion (or interruption), emitting
    /// `OrchestratorEvent`s on `tx` in program order. Request-level
    /// `default_model`/`reason_model` override the service-level config for
    /// the duration of this run only (§4.4 supplemental note) — no global
    /// config is mutated.
    pub async fn run(
        &self,
        mut request: ResearchRequest,
        user_id: Option<String>,
        tx: mpsc::Sender<OrchestratorEvent>,
        cancel: CancellationToken,
    ) {
        request.clamp_bounds();

        let user_query = match request.messages.first_nonempty_content() {
            Some(q) => q.to_string(),
            None => {
                let _ = tx
                    .send(OrchestratorEvent::Content(
                        "Error: User query is missing or empty.".to_string(),
                    ))
                    .await;
                let _ = tx.send(OrchestratorEvent::Done).await;
                return;
            }
        };

        let default_model = request.default_model.clone().unwrap_or_else(|| self.config.default_model.clone());
        let reason_model = request.reason_model.clone().unwrap_or_else(|| self.config.reason_model.clone());
        let max_iterations = request.max_iterations as i32;
        let max_search_items = request.max_search_items as usize;

        let mut session = Session::new(SessionId::new(), user_query.clone(), request);
        session.user_id = user_id;
        session.status = SessionStatus::Running;

        if let Err(e) = self.store.save(&session, -1).await {
            tracing::error!(error = %e, "failed to persist initial session snapshot");
        }

        let _ = tx.send(OrchestratorEvent::SessionStarted(session.session_id)).await;

        let mut current_plan_for_logic = match self.plan(&mut session, &reason_model, &tx).await {
            Some(plan) => plan,
            None => {
                self.fail(&mut session, "initial plan generation failed".to_string(), &tx).await;
                return;
            }
        };

        'iterate: for k in 0..max_iterations {
            if cancel.is_cancelled() {
                self.interrupt(&mut session, &tx).await;
                return;
            }

            let _ = tx
                .send(OrchestratorEvent::Content(wrap_think(&format!(
                    "Iteration {k}: current plan\n{current_plan_for_logic}"
                ))))
                .await;

            let parsed = self
                .provider
                .generate_and_parse_list(
                    &queries_prompt(&self.config, &current_plan_for_logic),
                    &reason_model,
                    2048,
                    self.config.reason_ctx,
                )
                .await;

            let queries = match parsed {
                ParsedList::Done => {
                    self.snapshot(&mut session, k).await;
                    break 'iterate;
                }
                ParsedList::Items(items) if items.is_empty() => {
                    self.snapshot(&mut session, k).await;
                    break 'iterate;
                }
                ParsedList::Items(items) => items,
            };

            session.aggregated_data.all_search_queries.extend(queries.iter().cloned());

            let mut dedup: Vec<(String, String)> = Vec::new();
            let mut seen_urls: HashSet<String> = HashSet::new();
            for query in &queries {
                let urls = self.searcher.search(query).await;
                for url in urls.into_iter().take(max_search_items) {
                    if seen_urls.insert(url.clone()) {
                        dedup.push((url, query.clone()));
                    }
                }
            }

            let mut fetch_set = tokio::task::JoinSet::new();
            for (url, query) in dedup {
                let fetcher = self.fetcher.clone();
                let cancel = cancel.clone();
                fetch_set.spawn(async move {
                    let text = fetcher.fetch(&url, &cancel).await;
                    (url, query, text)
                });
            }

            while let Some(joined) = fetch_set.join_next().await {
                let (url, _query, page_text) = match joined {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(error = %e, "fetch task panicked");
                        continue;
                    }
                };

                if page_text.starts_with("Error:") || page_text.starts_with("Failed to fetch") {
                    continue;
                }

                let useful = self
                    .provider
                    .generate(
                        &is_page_useful_prompt(&self.config, &user_query, &page_text),
                        &default_model,
                        8,
                        self.config.default_ctx,
                    )
                    .await
                    .unwrap_or_default();

                if !useful.trim().to_lowercase().starts_with("yes") {
                    continue;
                }

                let extracted = self
                    .provider
                    .generate(
                        &extract_context_prompt(&self.config, &user_query, &page_text),
                        &default_model,
                        2048,
                        self.config.default_ctx,
                    )
                    .await
                    .unwrap_or_default();

                session.aggregated_data.aggregated_contexts.push(ContextRecord {
                    source_url: url,
                    extracted_text: extracted,
                });
            }

            if k + 1 < max_iterations {
                let joined_contexts = joined_context_text(&session.aggregated_data.aggregated_contexts);
                let refined_raw = self
                    .provider
                    .generate(
                        &judge_and_refine_prompt(&self.config, &current_plan_for_logic, &joined_contexts),
                        &reason_model,
                        2048,
                        self.config.reason_ctx,
                    )
                    .await
                    .unwrap_or_default();

                let _ = tx.send(OrchestratorEvent::Content(refined_raw.clone())).await;

                let refined_stripped = strip_think_tags(&refined_raw);
                if refined_stripped.trim() == "<done>" {
                    self.snapshot(&mut session, k).await;
                    break 'iterate;
                }

                session.aggregated_data.last_plan = Some(refined_raw);
                current_plan_for_logic = refined_stripped;
            }

            self.snapshot(&mut session, k).await;
        }

        let _ = tx
            .send(OrchestratorEvent::Content(wrap_think("Research phase concluded")))
            .await;

        self.report(&mut session, &current_plan_for_logic, &reason_model, max_iterations, &tx).await;
    }

    async fn plan(&self, session: &mut Session, reason_model: &str, tx: &mpsc::Sender<OrchestratorEvent>) -> Option<String> {
        if let Some(existing) = session.aggregated_data.last_plan.clone() {
            return Some(strip_think_tags(&existing));
        }

        let raw = self
            .provider
            .generate(
                &initial_plan_prompt(&self.config, &session.user_query),
                reason_model,
                2048,
                self.config.reason_ctx,
            )
            .await?;

        let _ = tx.send(OrchestratorEvent::Content(raw.clone())).await;
        session.aggregated_data.last_plan = Some(raw.clone());
        Some(strip_think_tags(&raw))
    }

    async fn report(
        &self,
        session: &mut Session,
        plan_for_report: &str,
        reason_model: &str,
        max_iterations: i32,
        tx: &mpsc::Sender<OrchestratorEvent>,
    ) {
        let joined_contexts = joined_context_text(&session.aggregated_data.aggregated_contexts);
        let raw_report = self
            .provider
            .generate(
                &final_report_prompt(&self.config, plan_for_report, &session.user_query, &joined_contexts),
                reason_model,
                4096,
                self.config.reason_ctx,
            )
            .await;

        let report = match raw_report {
            Some(text) if text.len() >= RETRY_ENVELOPE_MIN_LEN => text,
            other => retry_envelope(&self.config, plan_for_report, &session.user_query, &joined_contexts, other),
        };

        session.aggregated_data.final_report_content = Some(report.clone());
        session.status = SessionStatus::Completed;
        session.end_time = Some(Utc::now());

        if let Err(e) = self.store.save(session, max_iterations).await {
            tracing::error!(error = %e, "failed to persist final session snapshot");
            session.status = SessionStatus::Error;
        }

        let _ = tx.send(OrchestratorEvent::Content(report)).await;
        let _ = tx.send(OrchestratorEvent::Done).await;
    }

    async fn snapshot(&self, session: &mut Session, iteration: i32) {
        session.current_iteration = iteration;
        if let Err(e) = self.store.save(session, iteration).await {
            tracing::warn!(error = %e, "snapshot failed, continuing run in memory");
        }
    }

    async fn interrupt(&self, session: &mut Session, tx: &mpsc::Sender<OrchestratorEvent>) {
        session.status = SessionStatus::Interrupted;
        session.end_time = Some(Utc::now());
        let iteration = session.current_iteration;
        if let Err(e) = self.store.save(session, iteration).await {
            tracing::error!(error = %e, "failed to persist interrupted session snapshot");
        }
        let _ = tx.send(OrchestratorEvent::Done).await;
    }

    async fn fail(&self, session: &mut Session, reason: String, tx: &mpsc::Sender<OrchestratorEvent>) {
        session.status = SessionStatus::Error;
        session.last_error = Some(reason.clone());
        if let Err(e) = self.store.save(session, -1).await {
            tracing::error!(error = %e, "failed to persist error session snapshot");
        }
        let _ = tx
            .send(OrchestratorEvent::Content(wrap_think(&format!("Error: {reason}"))))
            .await;
        let _ = tx.send(OrchestratorEvent::Done).await;
    }
}

fn joined_context_text(contexts: &[ContextRecord]) -> String {
    contexts
        .iter()
        .map(ContextRecord::to_prompt_string)
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn messages_for(system: &str, user_content: String) -> deepresearch_common::types::MessageList {
    use deepresearch_common::types::{Message, Role};
    deepresearch_common::types::MessageList(vec![
        deepresearch_common::types::Message {
            role: Role::System,
            content: system.to_string(),
            timestamp: None,
            metadata: None,
        },
        Message::user(user_content),
    ])
}

fn initial_plan_prompt(config: &OrchestratorConfig, user_query: &str) -> deepresearch_common::types::MessageList {
    messages_for(config.prompt("initial_plan"), format!("User query: {user_query}"))
}

fn queries_prompt(config: &OrchestratorConfig, current_plan: &str) -> deepresearch_common::types::MessageList {
    messages_for(config.prompt("generate_search_queries"), format!("Current plan:\n{current_plan}"))
}

fn is_page_useful_prompt(config: &OrchestratorConfig, user_query: &str, page_text: &str) -> deepresearch_common::types::MessageList {
    messages_for(
        config.prompt("is_page_useful"),
        format!("User query: {user_query}\n\nWebpage content:\n{page_text}"),
    )
}

fn extract_context_prompt(config: &OrchestratorConfig, user_query: &str, page_text: &str) -> deepresearch_common::types::MessageList {
    messages_for(
        config.prompt("extract_relevant_context"),
        format!("User query: {user_query}\n\nWebpage content:\n{page_text}"),
    )
}

fn judge_and_refine_prompt(config: &OrchestratorConfig, current_plan: &str, joined_contexts: &str) -> deepresearch_common::types::MessageList {
    messages_for(
        config.prompt("judge_and_refine"),
        format!("Current plan:\n{current_plan}\n\nGathered contexts:\n{joined_contexts}"),
    )
}

fn final_report_prompt(
    config: &OrchestratorConfig,
    plan_for_report: &str,
    user_query: &str,
    joined_contexts: &str,
) -> deepresearch_common::types::MessageList {
    let sources = if joined_contexts.trim().is_empty() {
        "No available sources".to_string()
    } else {
        joined_contexts.to_string()
    };
    messages_for(
        config.prompt("final_report"),
        format!("User query: {user_query}\n\nWriting plan:\n{plan_for_report}\n\nGathered relevant contexts:\n{sources}"),
    )
}

fn retry_envelope(
    config: &OrchestratorConfig,
    plan_for_report: &str,
    user_query: &str,
    joined_contexts: &str,
    failure: Option<String>,
) -> String {
    let sources = if joined_contexts.trim().is_empty() {
        "No available sources"
    } else {
        joined_contexts
    };
    format!(
        "Error: failed to generate a final report ({}).\n\nWriting prompt:\n{}\n\nWriting plan:\n{}\n\nQuery: {}\n\nGathered contexts:\n{}",
        failure.unwrap_or_else(|| "empty or too short response".to_string()),
        config.prompt("final_report"),
        plan_for_report,
        user_query,
        sources,
    )
}
