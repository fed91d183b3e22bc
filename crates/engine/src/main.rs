use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics_exporter_prometheus::PrometheusBuilder;

use deepresearch_engine::api::{self, AppState};
use deepresearch_engine::config;
use deepresearch_engine::fetch::{
    Fetcher, FetcherConfig, HtmlMode, HttpGetRenderer, NaivePdfExtractor, Scheduler,
};
use deepresearch_engine::orchestrator::{Orchestrator, OrchestratorConfig};
use deepresearch_engine::provider::{LocalProvider, OpenAiCompatibleProvider, Provider};
use deepresearch_engine::searcher::Searcher;
use deepresearch_engine::store::{PostgresStore, Store};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Deep research engine starting");

    let config_dir = std::env::var("DEEPRESEARCH_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config"));

    let engine_config = match config::load_config(&config_dir) {
        Ok(config) => {
            tracing::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration — refusing to start");
            std::process::exit(1);
        }
    };

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");

    let store = match PostgresStore::connect(&engine_config.system.persistence.database_url).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            std::process::exit(1);
        }
    };

    if let Err(e) = store.migrate().await {
        tracing::error!(error = %e, "Failed to run PostgreSQL migrations");
        std::process::exit(1);
    }

    let store: Arc<dyn Store> = Arc::new(store);

    tracing::info!("Database connected and migrated");

    let llm = &engine_config.system.llm;
    let provider: Arc<dyn Provider> = if llm.provider == "openai_compatible" {
        Arc::new(OpenAiCompatibleProvider::new(
            &llm.openai_base_url,
            &llm.api_key,
            &llm.default_model,
            &llm.fallback_model,
            engine_config.system.ratelimit.requests_per_minute,
        ))
    } else {
        Arc::new(LocalProvider::new(&llm.local_base_url))
    };

    let scheduler = Arc::new(Scheduler::new(
        engine_config.system.fetch.concurrent_limit,
        engine_config.system.fetch.cool_down,
    ));

    let fetcher_config = FetcherConfig {
        use_reader: engine_config.system.fetch.use_reader,
        reader_base_url: engine_config.system.fetch.reader_base_url.clone(),
        reader_api_key: engine_config.system.fetch.reader_api_key.clone(),
        html_mode: if engine_config.system.fetch.browse_lite {
            HtmlMode::Lite
        } else {
            HtmlMode::Full
        },
        max_html_length: engine_config.system.fetch.max_html_length,
        max_eval_time_ms: engine_config.system.fetch.max_eval_time,
        pdf_max_pages: engine_config.system.pdf.max_pages,
        pdf_max_filesize: engine_config.system.pdf.max_filesize as usize,
        pdf_timeout_ms: engine_config.system.pdf.timeout,
    };

    let fetcher = Arc::new(Fetcher::new(
        fetcher_config,
        Arc::clone(&scheduler),
        deepresearch_engine::fetch::FetchCache::new(Duration::from_secs(
            engine_config.system.fetch.cache_ttl_seconds,
        )),
        Arc::new(HttpGetRenderer::default()),
        Arc::new(NaivePdfExtractor),
        Arc::clone(&provider),
        llm.default_model.clone(),
    ));

    let searcher = Arc::new(Searcher::new(
        &engine_config.system.search.base_url,
        engine_config.system.search.max_results,
    ));

    let orchestrator_config = OrchestratorConfig {
        default_model: llm.default_model.clone(),
        reason_model: llm.reason_model.clone(),
        default_ctx: llm.default_ctx,
        reason_ctx: llm.reason_ctx,
        prompts: engine_config.prompts.clone(),
    };

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&provider),
        Arc::clone(&searcher),
        Arc::clone(&fetcher),
        Arc::clone(&store),
        orchestrator_config,
    ));

    // Advisory-only: log integrity mismatches, never block startup on
    // them and never auto-resume interrupted sessions (§6.4, §9).
    if let Err(e) = store.verify_integrity().await {
        tracing::warn!(error = %e, "Integrity verification failed at startup");
    }

    let state = Arc::new(AppState {
        orchestrator,
        store,
        metrics_handle,
        start_time: Utc::now(),
    });

    let app = api::router(state);

    let bind_address = format!(
        "{}:{}",
        engine_config.system.server.bind_address, engine_config.system.server.port
    );

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .expect("Failed to bind TCP listener");

    tracing::info!(address = %bind_address, "Deep research engine listening");

    axum::serve(listener, app).await.expect("HTTP server error");
}
