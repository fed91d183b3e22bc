use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use deepresearch_common::types::{Message, MessageList, ResearchRequest, Role, SessionStatus};
use deepresearch_common::SessionId;

use deepresearch_engine::fetch::{
    BrowserRenderer, FetchCache, Fetcher, FetcherConfig, HtmlMode, NaivePdfExtractor, Scheduler,
};
use deepresearch_engine::orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorEvent};
use deepresearch_engine::provider::Provider;
use deepresearch_engine::searcher::Searcher;
use deepresearch_engine::store::{InMemoryStore, Store};

/// Responds by matching the system-message content against the exact
/// prompt template configured for each stage (the system message content
/// *is* `OrchestratorConfig::prompt(key)`'s text), popping the next
/// scripted response for that stage. Stages with no scripted response
/// left return `None`, mirroring a real provider's "nothing usable" case.
struct MockProvider {
    responses: Mutex<HashMap<String, VecDeque<String>>>,
}

impl MockProvider {
    fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
        }
    }

    fn script(&self, template_marker: &str, response: impl Into<String>) {
        self.responses
            .lock()
            .unwrap()
            .entry(template_marker.to_string())
            .or_default()
            .push_back(response.into());
    }
}

impl Provider for MockProvider {
    fn generate<'a>(
        &'a self,
        messages: &'a MessageList,
        _model: &'a str,
        _max_tokens: u32,
        _ctx: u32,
    ) -> Pin<Box<dyn Future<Output = Option<String>> + Send + 'a>> {
        Box::pin(async move {
            let system_text = messages.0.first().map(|m| m.content.as_str()).unwrap_or("");
            let mut responses = self.responses.lock().unwrap();
            responses.get_mut(system_text).and_then(VecDeque::pop_front)
        })
    }

    fn generate_stream(
        &self,
        _messages: MessageList,
        _model: String,
        _max_tokens: u32,
        _ctx: u32,
    ) -> mpsc::Receiver<String> {
        let (_tx, rx) = mpsc::channel(1);
        rx
    }
}

/// Returns canned HTML per URL without touching the network, counting how
/// many times each URL was actually rendered (for the dedup assertion in
/// scenario 3).
struct StubRenderer {
    calls: Mutex<HashMap<String, usize>>,
}

impl StubRenderer {
    fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }

    fn call_count(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

impl BrowserRenderer for StubRenderer {
    fn render<'a>(
        &'a self,
        url: &'a str,
        _max_eval_time_ms: u64,
    ) -> Pin<Box<dyn Future<Output = deepresearch_common::Result<String>> + Send + 'a>> {
        Box::pin(async move {
            *self.calls.lock().unwrap().entry(url.to_string()).or_insert(0) += 1;
            Ok(format!("<html><head><title>Mock Page</title></head><body>Body for {url}</body></html>"))
        })
    }
}

fn prompts() -> HashMap<String, String> {
    let mut p = HashMap::new();
    p.insert("initial_plan".to_string(), "TEMPLATE:initial_plan".to_string());
    p.insert(
        "generate_search_queries".to_string(),
        "TEMPLATE:generate_search_queries".to_string(),
    );
    p.insert("is_page_useful".to_string(), "TEMPLATE:is_page_useful".to_string());
    p.insert(
        "extract_relevant_context".to_string(),
        "TEMPLATE:extract_relevant_context".to_string(),
    );
    p.insert("judge_and_refine".to_string(), "TEMPLATE:judge_and_refine".to_string());
    p.insert("final_report".to_string(), "TEMPLATE:final_report".to_string());
    p
}

fn orchestrator_config() -> OrchestratorConfig {
    OrchestratorConfig {
        default_model: "mock-default".to_string(),
        reason_model: "mock-reason".to_string(),
        default_ctx: 4096,
        reason_ctx: 8192,
        prompts: prompts(),
    }
}

/// Spins up a tiny axum server that always answers a search query with the
/// same fixed page URL, regardless of the query string — sufficient to
/// drive the Orchestrator's search -> fetch fan-out without real network
/// access.
async fn spawn_search_server(urls: Vec<&'static str>) -> String {
    use axum::routing::get;

    let body = serde_json::json!({
        "results": urls.iter().map(|u| serde_json::json!({ "url": u })).collect::<Vec<_>>()
    });

    let app = axum::Router::new().route(
        "/",
        get(move || {
            let body = body.clone();
            async move { axum::Json(body) }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/")
}

fn build_fetcher(renderer: Arc<StubRenderer>, provider: Arc<MockProvider>) -> Arc<Fetcher> {
    let scheduler = Arc::new(Scheduler::new(4, 0.0));
    Arc::new(Fetcher::new(
        FetcherConfig {
            use_reader: false,
            reader_base_url: String::new(),
            reader_api_key: String::new(),
            html_mode: HtmlMode::Lite,
            max_html_length: 20_000,
            max_eval_time_ms: 5_000,
            pdf_max_pages: 20,
            pdf_max_filesize: 20_000_000,
            pdf_timeout_ms: 5_000,
        },
        scheduler,
        FetchCache::new(Duration::from_secs(3600)),
        renderer,
        Arc::new(NaivePdfExtractor),
        provider,
        "mock-default".to_string(),
    ))
}

fn user_request(query: &str, max_iterations: u32, max_search_items: u32) -> ResearchRequest {
    ResearchRequest {
        messages: MessageList(vec![Message::user(query)]),
        system_instruction: None,
        max_iterations,
        max_search_items,
        default_model: None,
        reason_model: None,
    }
}

async fn drain(mut rx: mpsc::Receiver<OrchestratorEvent>) -> Vec<OrchestratorEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn empty_query_yields_error_event_and_no_session_row() {
    let provider = Arc::new(MockProvider::new());
    let renderer = Arc::new(StubRenderer::new());
    let fetcher = build_fetcher(renderer, Arc::clone(&provider));
    let search_url = spawn_search_server(vec!["http://mock.example/unused"]).await;
    let searcher = Arc::new(Searcher::new(&search_url, 50));
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());

    let orchestrator = Orchestrator::new(
        provider.clone() as Arc<dyn Provider>,
        searcher,
        fetcher,
        Arc::clone(&store),
        orchestrator_config(),
    );

    let request = ResearchRequest {
        messages: MessageList(vec![Message {
            role: Role::User,
            content: "   ".to_string(),
            timestamp: None,
            metadata: None,
        }]),
        system_instruction: None,
        max_iterations: 1,
        max_search_items: 4,
        default_model: None,
        reason_model: None,
    };

    let (tx, rx) = mpsc::channel(32);
    orchestrator.run(request, None, tx, CancellationToken::new()).await;
    let events = drain(rx).await;

    assert_eq!(events.len(), 2);
    match &events[0] {
        OrchestratorEvent::Content(text) => assert_eq!(text, "Error: User query is missing or empty."),
        other => panic!("expected Content event, got {other:?}"),
    }
    assert!(matches!(events[1], OrchestratorEvent::Done));

    let sessions = store.list(None).await.unwrap();
    assert!(sessions.is_empty(), "no session row should be created for an empty query");
}

#[tokio::test]
async fn immediate_done_still_snapshots_twice() {
    let provider = Arc::new(MockProvider::new());
    provider.script("TEMPLATE:initial_plan", "Plan: investigate the topic.");
    provider.script("TEMPLATE:generate_search_queries", "<done>");
    provider.script(
        "TEMPLATE:final_report",
        "A".repeat(256), // clears RETRY_ENVELOPE_MIN_LEN so the real text is kept
    );

    let renderer = Arc::new(StubRenderer::new());
    let fetcher = build_fetcher(renderer, Arc::clone(&provider));
    let search_url = spawn_search_server(vec!["http://mock.example/unused"]).await;
    let searcher = Arc::new(Searcher::new(&search_url, 50));
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());

    let orchestrator = Orchestrator::new(
        provider.clone() as Arc<dyn Provider>,
        searcher,
        fetcher,
        Arc::clone(&store),
        orchestrator_config(),
    );

    let (tx, rx) = mpsc::channel(32);
    orchestrator
        .run(user_request("what is rust", 1, 4), None, tx, CancellationToken::new())
        .await;
    let events = drain(rx).await;

    let session_id = match events.first() {
        Some(OrchestratorEvent::SessionStarted(id)) => *id,
        other => panic!("expected SessionStarted first, got {other:?}"),
    };
    assert!(matches!(events.last(), Some(OrchestratorEvent::Done)));

    let history = store.history(session_id).await.unwrap();
    assert_eq!(history.len(), 2, "early <done> break and the final report save each snapshot once");
    assert_eq!(history[0].iteration, 0);
    assert_eq!(history[1].iteration, 1);

    let session = store.load(session_id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
}

#[tokio::test]
async fn two_queries_resolving_to_the_same_url_fetch_it_once() {
    let provider = Arc::new(MockProvider::new());
    provider.script("TEMPLATE:initial_plan", "Plan: look into it.");
    provider.script(
        "TEMPLATE:generate_search_queries",
        r#"["query one", "query two"]"#,
    );
    provider.script("TEMPLATE:generate_search_queries", "<done>");
    provider.script("TEMPLATE:is_page_useful", "yes");
    provider.script("TEMPLATE:is_page_useful", "yes");
    provider.script("TEMPLATE:extract_relevant_context", "relevant excerpt");
    provider.script("TEMPLATE:final_report", "A".repeat(256));

    let renderer = Arc::new(StubRenderer::new());
    let fetcher = build_fetcher(Arc::clone(&renderer), Arc::clone(&provider));
    let search_url = spawn_search_server(vec!["http://mock.example/same-page"]).await;
    let searcher = Arc::new(Searcher::new(&search_url, 50));
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());

    let orchestrator = Orchestrator::new(
        provider.clone() as Arc<dyn Provider>,
        searcher,
        fetcher,
        Arc::clone(&store),
        orchestrator_config(),
    );

    let (tx, rx) = mpsc::channel(32);
    orchestrator
        .run(user_request("dedup check", 2, 4), None, tx, CancellationToken::new())
        .await;
    let _ = drain(rx).await;

    assert_eq!(
        renderer.call_count("http://mock.example/same-page"),
        1,
        "both queries resolved to the same URL; it must only be fetched once"
    );
}

#[tokio::test]
async fn rollback_restores_an_earlier_iteration() {
    let provider = Arc::new(MockProvider::new());
    provider.script("TEMPLATE:initial_plan", "Plan: step by step.");
    provider.script(
        "TEMPLATE:generate_search_queries",
        r#"["first query"]"#,
    );
    provider.script("TEMPLATE:is_page_useful", "yes");
    provider.script("TEMPLATE:extract_relevant_context", "excerpt one");
    provider.script("TEMPLATE:judge_and_refine", "Refined plan, continue.");
    provider.script("TEMPLATE:generate_search_queries", "<done>");
    provider.script("TEMPLATE:final_report", "A".repeat(256));

    let renderer = Arc::new(StubRenderer::new());
    let fetcher = build_fetcher(renderer, Arc::clone(&provider));
    let search_url = spawn_search_server(vec!["http://mock.example/page-one"]).await;
    let searcher = Arc::new(Searcher::new(&search_url, 50));
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());

    let orchestrator = Orchestrator::new(
        provider.clone() as Arc<dyn Provider>,
        searcher,
        fetcher,
        Arc::clone(&store),
        orchestrator_config(),
    );

    let (tx, rx) = mpsc::channel(32);
    orchestrator
        .run(user_request("multi-iteration", 2, 4), None, tx, CancellationToken::new())
        .await;
    let events = drain(rx).await;
    let session_id = match events.first() {
        Some(OrchestratorEvent::SessionStarted(id)) => *id,
        other => panic!("expected SessionStarted first, got {other:?}"),
    };

    let history = store.history(session_id).await.unwrap();
    assert_eq!(history.len(), 2);

    let rolled_back = store.rollback(session_id, 0).await.unwrap();
    assert_eq!(rolled_back.current_iteration, 0);
}

#[tokio::test]
async fn delete_then_load_is_not_found() {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let settings = user_request("to be deleted", 1, 4);
    let session = deepresearch_common::types::Session::new(SessionId::new(), "to be deleted".to_string(), settings);
    store.save(&session, -1).await.unwrap();

    store.delete(session.session_id).await.unwrap();

    let result = store.load(session.session_id).await;
    assert!(matches!(result, Err(deepresearch_common::DeepResearchError::NotFound(_))));
}

#[tokio::test]
async fn caps_fetched_urls_at_request_level_max_search_items() {
    let provider = Arc::new(MockProvider::new());
    provider.script("TEMPLATE:initial_plan", "Plan: survey the topic.");
    provider.script("TEMPLATE:generate_search_queries", r#"["only query"]"#);
    provider.script("TEMPLATE:generate_search_queries", "<done>");
    provider.script("TEMPLATE:is_page_useful", "no");
    provider.script("TEMPLATE:is_page_useful", "no");
    provider.script("TEMPLATE:final_report", "A".repeat(256));

    let renderer = Arc::new(StubRenderer::new());
    let fetcher = build_fetcher(Arc::clone(&renderer), Arc::clone(&provider));
    // The search backend offers more results than max_search_items allows,
    // and Searcher's own per-query cap (50) is set well above both so this
    // exercises the Orchestrator's request-level cap specifically.
    let search_url = spawn_search_server(vec![
        "http://mock.example/page-1",
        "http://mock.example/page-2",
        "http://mock.example/page-3",
    ])
    .await;
    let searcher = Arc::new(Searcher::new(&search_url, 50));
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());

    let orchestrator = Orchestrator::new(
        provider.clone() as Arc<dyn Provider>,
        searcher,
        fetcher,
        Arc::clone(&store),
        orchestrator_config(),
    );

    let (tx, rx) = mpsc::channel(32);
    orchestrator
        .run(user_request("cap check", 1, 2), None, tx, CancellationToken::new())
        .await;
    let _ = drain(rx).await;

    let fetched = ["page-1", "page-2", "page-3"]
        .iter()
        .filter(|p| renderer.call_count(&format!("http://mock.example/{p}")) > 0)
        .count();
    assert_eq!(
        fetched, 2,
        "only the first max_search_items=2 URLs from the query should have been fetched"
    );
}

#[tokio::test]
async fn fetches_for_distinct_hosts_run_concurrently() {
    let scheduler = Arc::new(Scheduler::new(4, 0.0));
    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_observed = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for host in ["a.example", "b.example", "c.example"] {
        let scheduler = Arc::clone(&scheduler);
        let in_flight = Arc::clone(&in_flight);
        let max_observed = Arc::clone(&max_observed);
        let host = host.to_string();
        handles.push(tokio::spawn(async move {
            let cancel = CancellationToken::new();
            let _permit = scheduler.acquire(&host, &cancel).await.unwrap();
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            max_observed.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    assert!(
        max_observed.load(Ordering::SeqCst) >= 2,
        "distinct-domain fetches should overlap rather than serialize behind one lock"
    );
}
