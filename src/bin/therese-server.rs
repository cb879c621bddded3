//! Process entry point: wires every leaf collaborator (encryption, preferences, provider
//! configs, HTTP pool) up through the facades (LLM, MCP, board) and serves the HTTP/SSE surface.

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use therese::board::BoardEngine;
use therese::board::web_search::DuckDuckGoSearch;
use therese::config::Config;
use therese::context::{AssistantContext, FilePreferencesStore, PreferencesIdentityProvider};
use therese::http::{self, AppState};
use therese::llm::facade::LLMFacade;
use therese::mcp::McpSupervisor;
use therese::memory::NullMemoryStore;
use therese::security::{EncryptionService, SessionToken};
use therese::store::RelationalStore;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env();
    std::fs::create_dir_all(config.therese_dir()).expect("could not create ~/.therese");
    std::fs::create_dir_all(&config.data_dir).expect("could not create data dir");

    let encryption = EncryptionService::instance(&config.encryption_key_path()).expect("encryption key unavailable");
    let session_token = SessionToken::generate_and_persist(&config.session_token_path()).expect("could not persist session token");

    let preferences = Arc::new(FilePreferencesStore::new(config.therese_dir().join("preferences.json"), encryption.clone()));
    let identity = Arc::new(PreferencesIdentityProvider::new(preferences.clone()));
    let assistant_context = Arc::new(AssistantContext::new(config.therese_dir(), config.home_dir.clone()));

    let facade = Arc::new(LLMFacade::new(preferences, identity, assistant_context));
    let store = Arc::new(RelationalStore::open(&config.relational_store_path()).expect("could not open relational store"));
    let supervisor = McpSupervisor::load(config.mcp_servers_path(), encryption.clone())
        .await
        .expect("could not load mcp server configuration");
    let board = Arc::new(BoardEngine::new(Arc::clone(&facade), Arc::clone(&store), Arc::new(DuckDuckGoSearch)));

    let state = Arc::new(AppState {
        facade,
        store,
        supervisor,
        board,
        memory: Arc::new(NullMemoryStore),
        session_token,
        cancellations: DashMap::new(),
    });

    let router = http::build_router(Arc::clone(&state));

    let addr: SocketAddr = std::env::var("THERESE_BIND_ADDR")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8741)));

    log::info!("therese listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await.expect("could not bind listener");

    let shutdown_state = Arc::clone(&state);
    let shutdown_token_path = config.session_token_path();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        log::info!("shutting down");
        shutdown_state.supervisor.shutdown().await;
        SessionToken::clear(&shutdown_token_path);
        std::process::exit(0);
    });

    axum::serve(listener, router).await.expect("server error");
}
