//! The board: fans a strategic question out to five fixed advisors in parallel, each on its own
//! preferred provider, then synthesizes their opinions into a single structured decision.
//!
//! A best-effort web search enriches shared context before advisors are consulted, advisor events
//! interleave arbitrarily across a shared queue but each advisor's own `start -> chunk* -> done`
//! sequence is strict, opinions are assembled back into requested (not completion) order for the
//! synthesis prompt, and the decision is persisted *before* the synthesis chunk is emitted so a
//! client that disconnects right after synthesis never loses the decision.

pub mod advisors;
pub mod web_search;

use std::sync::Arc;

use async_stream::stream;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use parking_lot::Mutex as SyncMutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::board::advisors::{Advisor, AdvisorRole, ADVISORS};
use crate::board::web_search::{format_results, WebSearchClient};
use crate::error::{with_graceful_degradation, TheresError};
use crate::llm::facade::LLMFacade;
use crate::llm::message::Message;
use crate::llm::provider_config::{LLMConfig, Provider};
use crate::store::{BoardDecisionRecord, RelationalStore};

const WEB_SEARCH_MAX_RESULTS: usize = 5;
const QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisorOpinion {
    pub role: AdvisorRole,
    pub name: String,
    pub emoji: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardSynthesis {
    pub consensus_points: Vec<String>,
    pub divergence_points: Vec<String>,
    pub recommendation: String,
    pub confidence: String,
    pub next_steps: Vec<String>,
}

impl BoardSynthesis {
    /// A deliberately pessimistic placeholder used when the synthesizing model's response isn't
    /// valid JSON. `confidence: "low"` is the honest signal here — the board still has five real
    /// opinions, it just couldn't summarize them automatically.
    fn fallback(raw: &str) -> Self {
        BoardSynthesis {
            consensus_points: Vec::new(),
            divergence_points: Vec::new(),
            recommendation: format!("La synthèse automatique a échoué ; voir les avis individuels. Réponse brute: {raw}"),
            confidence: "low".to_string(),
            next_steps: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BoardEvent {
    WebSearchStart,
    WebSearchDone { result_count: usize },
    AdvisorStart { role: AdvisorRole, name: String, emoji: String },
    AdvisorChunk { role: AdvisorRole, text: String },
    AdvisorDone { role: AdvisorRole, content: String },
    SynthesisStart,
    SynthesisChunk { synthesis: BoardSynthesis },
    Done { decision_id: String },
    Error { message: String },
}

enum QueueMessage {
    Event(BoardEvent),
}

pub struct BoardEngine {
    facade: Arc<LLMFacade>,
    store: Arc<RelationalStore>,
    web_search: Arc<dyn WebSearchClient>,
}

impl BoardEngine {
    pub fn new(facade: Arc<LLMFacade>, store: Arc<RelationalStore>, web_search: Arc<dyn WebSearchClient>) -> Self {
        advisors::validate_advisor_providers();
        BoardEngine { facade, store, web_search }
    }

    /// Run a full deliberation, yielding [`BoardEvent`]s as they happen. The returned stream is
    /// exhausted exactly once; callers frame each event as an SSE `data:` line.
    pub fn deliberate(self: Arc<Self>, question: String, context: Option<String>) -> BoxStream<'static, BoardEvent> {
        stream! {
            yield BoardEvent::WebSearchStart;
            let web_results = with_graceful_degradation(
                "web_search",
                self.web_search.search(&question, WEB_SEARCH_MAX_RESULTS),
                Vec::new(),
            )
            .await;
            yield BoardEvent::WebSearchDone { result_count: web_results.len() };

            let mut shared_context = String::new();
            if let Some(context) = &context {
                shared_context.push_str(context);
                shared_context.push_str("\n\n");
            }
            if !web_results.is_empty() {
                shared_context.push_str("## Recherche Web (informations actualisées)\n\n");
                shared_context.push_str(&format_results(&web_results));
            }

            let (tx, mut rx) = mpsc::channel::<QueueMessage>(QUEUE_CAPACITY);
            let opinions: Arc<SyncMutex<Vec<Option<AdvisorOpinion>>>> = Arc::new(SyncMutex::new(vec![None; ADVISORS.len()]));

            let mut handles = Vec::with_capacity(ADVISORS.len());
            for (index, advisor) in ADVISORS.iter().enumerate() {
                let tx = tx.clone();
                let opinions = Arc::clone(&opinions);
                let facade = Arc::clone(&self.facade);
                let question = question.clone();
                let shared_context = shared_context.clone();
                let advisor_snapshot = AdvisorSnapshot::from(advisor);
                handles.push(tokio::spawn(async move {
                    run_advisor(facade, advisor_snapshot, index, question, shared_context, tx, opinions).await;
                }));
            }
            drop(tx);

            while let Some(message) = rx.recv().await {
                match message {
                    QueueMessage::Event(event) => yield event,
                }
            }
            for handle in handles {
                let _ = handle.await;
            }

            let ordered_opinions: Vec<AdvisorOpinion> = opinions.lock().drain(..).flatten().collect();

            yield BoardEvent::SynthesisStart;
            let synthesis = match self.generate_synthesis(&question, &ordered_opinions).await {
                Ok(synthesis) => synthesis,
                Err(e) => {
                    yield BoardEvent::Error { message: format!("synthesis failed: {e}") };
                    BoardSynthesis::fallback(&e.to_string())
                }
            };

            let decision_id = uuid::Uuid::new_v4().to_string();
            let record = BoardDecisionRecord {
                id: decision_id.clone(),
                question: question.clone(),
                context,
                opinions_json: serde_json::to_string(&ordered_opinions).unwrap_or_default(),
                synthesis_json: serde_json::to_string(&synthesis).unwrap_or_default(),
                confidence: synthesis.confidence.clone(),
                recommendation: synthesis.recommendation.clone(),
                created_at: chrono::Utc::now(),
            };
            if let Err(e) = self.store.persist_board_decision(&record).await {
                yield BoardEvent::Error { message: format!("failed to persist decision: {e}") };
            }

            yield BoardEvent::SynthesisChunk { synthesis };
            yield BoardEvent::Done { decision_id };
        }
        .boxed()
    }

    async fn generate_synthesis(&self, question: &str, opinions: &[AdvisorOpinion]) -> Result<BoardSynthesis, TheresError> {
        let opinions_text = opinions
            .iter()
            .map(|o| format!("**{} {}:**\n{}", o.emoji, o.name, o.content))
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = format!(
            "Analyse les avis des conseillers et génère une synthèse structurée.\n\n\
             QUESTION STRATÉGIQUE :\n{question}\n\n\
             AVIS DES CONSEILLERS :\n{opinions_text}\n\n\
             GÉNÈRE UNE SYNTHÈSE AU FORMAT JSON :\n\
             {{ \"consensus_points\": [...], \"divergence_points\": [...], \"recommendation\": \"...\", \"confidence\": \"high|medium|low\", \"next_steps\": [...] }}\n\n\
             RÈGLES :\n\
             - consensus_points : 2-4 points maximum\n\
             - divergence_points : 1-3 points si pertinent\n\
             - recommendation : 1-2 phrases claires\n\
             - confidence : \"high\" si consensus fort, \"medium\" si quelques divergences, \"low\" si beaucoup de désaccords\n\
             - next_steps : 3-5 étapes concrètes\n\n\
             Réponds UNIQUEMENT avec le JSON, sans texte avant ou après."
        );

        let config = self.facade.resolve_config().await?;
        let system_prompt = self.facade.compose_system_prompt(None).await?;
        let raw = self.facade.generate_content(&config, &prompt, &[], &system_prompt, None).await?;
        let cleaned = raw.trim().trim_start_matches("```json").trim_start_matches("```").trim_end_matches("```").trim();
        match serde_json::from_str::<BoardSynthesis>(cleaned) {
            Ok(synthesis) => Ok(synthesis),
            Err(_) => Ok(BoardSynthesis::fallback(cleaned)),
        }
    }

    pub async fn get_decision(&self, id: &str) -> Result<Option<BoardDecisionRecord>, TheresError> {
        self.store.get_decision(id).await
    }

    pub async fn list_decisions(&self, limit: usize) -> Result<Vec<BoardDecisionRecord>, TheresError> {
        self.store.list_decisions(limit).await
    }

    pub async fn delete_decision(&self, id: &str) -> Result<bool, TheresError> {
        self.store.delete_decision(id).await
    }
}

/// Owned snapshot of an [`Advisor`] so the per-advisor task doesn't have to borrow the `'static`
/// array across an `.await` boundary inside `tokio::spawn`.
struct AdvisorSnapshot {
    role: AdvisorRole,
    name: String,
    emoji: String,
    preferred_provider: Provider,
    system_prompt: String,
}

impl From<&Advisor> for AdvisorSnapshot {
    fn from(advisor: &Advisor) -> Self {
        AdvisorSnapshot {
            role: advisor.role,
            name: advisor.name.to_string(),
            emoji: advisor.emoji.to_string(),
            preferred_provider: advisor.preferred_provider,
            system_prompt: advisor.system_prompt.to_string(),
        }
    }
}

async fn run_advisor(
    facade: Arc<LLMFacade>,
    advisor: AdvisorSnapshot,
    index: usize,
    question: String,
    shared_context: String,
    tx: mpsc::Sender<QueueMessage>,
    opinions: Arc<SyncMutex<Vec<Option<AdvisorOpinion>>>>,
) {
    let _ = tx
        .send(QueueMessage::Event(BoardEvent::AdvisorStart {
            role: advisor.role,
            name: advisor.name.clone(),
            emoji: advisor.emoji.clone(),
        }))
        .await;

    let content = match deliberate_one(&facade, &advisor, &question, &shared_context, &tx).await {
        Ok(text) => text,
        Err(e) => format!("Désolé, une erreur s'est produite: {e}"),
    };

    opinions.lock()[index] = Some(AdvisorOpinion {
        role: advisor.role,
        name: advisor.name.clone(),
        emoji: advisor.emoji.clone(),
        content: content.clone(),
    });

    let _ = tx
        .send(QueueMessage::Event(BoardEvent::AdvisorDone { role: advisor.role, content }))
        .await;
}

async fn deliberate_one(
    facade: &LLMFacade,
    advisor: &AdvisorSnapshot,
    question: &str,
    shared_context: &str,
    tx: &mpsc::Sender<QueueMessage>,
) -> Result<String, TheresError> {
    let config = advisor_config(facade, advisor).await?;
    let system_prompt = facade.compose_system_prompt(Some(&advisor.system_prompt)).await?;
    let user_message = if shared_context.is_empty() {
        question.to_string()
    } else {
        format!("{shared_context}\n\nQUESTION : {question}")
    };
    let messages = vec![Message::user(user_message)];

    let mut stream = facade.stream_chat(&config, &messages, &system_prompt, &[]).await?;
    let mut text = String::new();
    while let Some(event) = stream.next().await {
        match event {
            crate::llm::message::StreamEvent::Text(chunk) => {
                text.push_str(&chunk);
                let _ = tx
                    .send(QueueMessage::Event(BoardEvent::AdvisorChunk { role: advisor.role, text: chunk }))
                    .await;
            }
            crate::llm::message::StreamEvent::ToolCall(_) => {}
            crate::llm::message::StreamEvent::Done { .. } => break,
            crate::llm::message::StreamEvent::Error { message, .. } => {
                return Err(TheresError::GenerationFailed { provider: config.provider.as_str().to_string(), detail: message });
            }
        }
    }
    Ok(text)
}

/// Resolve the config for an advisor's preferred provider, falling back to the facade's normal
/// resolution order if that provider has no key configured — a missing credential for one
/// advisor's preference shouldn't sink the whole deliberation.
async fn advisor_config(facade: &LLMFacade, advisor: &AdvisorSnapshot) -> Result<LLMConfig, TheresError> {
    match facade.config_for_provider(advisor.preferred_provider).await {
        Ok(config) => Ok(config),
        Err(_) => facade.resolve_config().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::web_search::NullWebSearch;
    use crate::context::{AssistantContext, PreferencesStore, UserIdentityProvider};
    use crate::llm::message::StreamEvent;
    use crate::llm::providers::LLMProvider;
    use std::collections::HashMap;

    struct StaticProvider {
        reply: String,
    }

    #[async_trait::async_trait]
    impl LLMProvider for StaticProvider {
        fn provider(&self) -> Provider {
            Provider::Anthropic
        }

        async fn stream_chat(
            &self,
            _config: &LLMConfig,
            _messages: &[Message],
            _system_prompt: &str,
            _tools: &[crate::llm::message::ToolDefinition],
        ) -> Result<BoxStream<'static, StreamEvent>, TheresError> {
            let events = vec![
                StreamEvent::Text(self.reply.clone()),
                StreamEvent::Done { stop_reason: "stop".to_string() },
            ];
            Ok(futures_util::stream::iter(events).boxed())
        }
    }

    struct EmptyPreferences;

    #[async_trait::async_trait]
    impl PreferencesStore for EmptyPreferences {
        async fn get(&self, _key: &str) -> Result<Option<String>, TheresError> {
            Ok(None)
        }
        async fn set(&self, _key: &str, _value: &str) -> Result<(), TheresError> {
            Ok(())
        }
        async fn delete(&self, _key: &str) -> Result<(), TheresError> {
            Ok(())
        }
    }

    struct StaticIdentity;

    #[async_trait::async_trait]
    impl UserIdentityProvider for StaticIdentity {
        async fn current(&self) -> Result<crate::context::UserIdentity, TheresError> {
            Ok(crate::context::UserIdentity { name: None, facts: vec![] })
        }
    }

    fn facade_all_providers_reply(reply: &str) -> Arc<LLMFacade> {
        let mut providers: HashMap<Provider, Arc<dyn LLMProvider>> = HashMap::new();
        for provider in [Provider::Anthropic, Provider::OpenAI, Provider::Gemini, Provider::Mistral, Provider::Grok, Provider::Ollama] {
            providers.insert(provider, Arc::new(StaticProvider { reply: reply.to_string() }) as Arc<dyn LLMProvider>);
        }
        let dir = tempfile::tempdir().unwrap();
        let assistant_context = Arc::new(AssistantContext::new(dir.path().join(".therese"), dir.path().to_path_buf()));
        Arc::new(LLMFacade::with_providers(
            providers,
            Arc::new(EmptyPreferences),
            Arc::new(StaticIdentity),
            assistant_context,
        ))
    }

    #[tokio::test]
    async fn deliberation_emits_five_advisors_then_synthesis_then_done() {
        let facade = facade_all_providers_reply(r#"{"consensus_points":["grow steadily"],"divergence_points":[],"recommendation":"expand next quarter","confidence":"high","next_steps":["hire one person"]}"#);
        let store = Arc::new(RelationalStore::open_in_memory().unwrap());
        let engine = Arc::new(BoardEngine::new(facade, store.clone(), Arc::new(NullWebSearch)));

        let events: Vec<BoardEvent> = engine.deliberate("should we open a second location?".to_string(), None).collect().await;

        let starts = events.iter().filter(|e| matches!(e, BoardEvent::AdvisorStart { .. })).count();
        let dones = events.iter().filter(|e| matches!(e, BoardEvent::AdvisorDone { .. })).count();
        assert_eq!(starts, 5);
        assert_eq!(dones, 5);
        assert!(matches!(events.first(), Some(BoardEvent::WebSearchStart)));
        assert!(matches!(events.last(), Some(BoardEvent::Done { .. })));

        let synthesis_index = events.iter().position(|e| matches!(e, BoardEvent::SynthesisChunk { .. })).unwrap();
        if let BoardEvent::SynthesisChunk { synthesis } = &events[synthesis_index] {
            assert_eq!(synthesis.confidence, "high");
            assert_eq!(synthesis.recommendation, "expand next quarter");
        } else {
            unreachable!();
        }

        let decisions = store.list_decisions(10).await.unwrap();
        assert_eq!(decisions.len(), 1);
    }

    #[tokio::test]
    async fn invalid_synthesis_json_falls_back_to_low_confidence() {
        let facade = facade_all_providers_reply("not json at all");
        let store = Arc::new(RelationalStore::open_in_memory().unwrap());
        let engine = Arc::new(BoardEngine::new(facade, store, Arc::new(NullWebSearch)));

        let events: Vec<BoardEvent> = engine.deliberate("quick question".to_string(), None).collect().await;
        let synthesis = events.iter().find_map(|e| match e {
            BoardEvent::SynthesisChunk { synthesis } => Some(synthesis.clone()),
            _ => None,
        }).unwrap();
        assert_eq!(synthesis.confidence, "low");
    }

    #[tokio::test]
    async fn per_advisor_event_order_is_start_then_chunks_then_done() {
        let facade = facade_all_providers_reply(r#"{"consensus_points":[],"divergence_points":[],"recommendation":"ok","confidence":"medium","next_steps":[]}"#);
        let store = Arc::new(RelationalStore::open_in_memory().unwrap());
        let engine = Arc::new(BoardEngine::new(facade, store, Arc::new(NullWebSearch)));

        let events: Vec<BoardEvent> = engine.deliberate("question".to_string(), None).collect().await;
        let mut started: std::collections::HashSet<AdvisorRole> = std::collections::HashSet::new();
        let mut done: std::collections::HashSet<AdvisorRole> = std::collections::HashSet::new();
        for event in &events {
            match event {
                BoardEvent::AdvisorStart { role, .. } => {
                    assert!(!done.contains(role));
                    started.insert(*role);
                }
                BoardEvent::AdvisorChunk { role, .. } => {
                    assert!(started.contains(role));
                    assert!(!done.contains(role));
                }
                BoardEvent::AdvisorDone { role, .. } => {
                    assert!(started.contains(role));
                    done.insert(*role);
                }
                _ => {}
            }
        }
        assert_eq!(done.len(), 5);
    }
}
