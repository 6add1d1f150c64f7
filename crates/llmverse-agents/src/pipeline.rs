use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::StreamExt;
use llmverse_common::{ContentBlock, ConversationKey, Error, Result, Turn};
use llmverse_config::AppConfig;
use llmverse_db::ConversationStore;
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, info, instrument, warn};

use crate::attachments::{HttpImageFetcher, ImageFetcher};
use crate::orchestrator::ToolCallOrchestrator;
use crate::providers::{GenerationEvent, LlmRequest, ProviderEntry, ProviderRegistry};
use crate::tools::{ToolContext, ToolRegistry};

/// Producer half of a turn's fragment channel.
#[derive(Clone)]
pub struct FragmentSink {
    tx: mpsc::Sender<String>,
}

impl FragmentSink {
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }

    /// Push one fragment, waiting until the consumer has room. Empty
    /// fragments are dropped.
    pub async fn send(&self, fragment: impl Into<String>) -> Result<()> {
        let fragment = fragment.into();
        if fragment.is_empty() {
            return Ok(());
        }
        self.tx
            .send(fragment)
            .await
            .map_err(|_| Error::Channel("fragment consumer went away".to_string()))
    }
}

/// One user message addressed to one provider.
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub user: String,
    pub provider: String,
    pub text: String,
    pub image_urls: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub system_prompt: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub turn_timeout: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            system_prompt: config.system_prompt.clone(),
            temperature: config.temperature,
            max_tokens: config.output_max_size,
            turn_timeout: Duration::from_secs(config.turn_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    BuildingContent,
    ToolPhase,
    Generating,
    Persisting,
    Done,
    Failed,
}

#[derive(Debug)]
pub enum TurnOutcome {
    Done { answer: String, persisted: bool },
    /// `at` is the state the turn was in when it failed.
    Failed { at: TurnState, error: Error },
}

/// Runs complete turns: context assembly, optional tool phase, streamed
/// generation and persistence of the finished exchange.
pub struct ConversationPipeline {
    providers: Arc<ProviderRegistry>,
    orchestrator: ToolCallOrchestrator,
    tools: Arc<ToolRegistry>,
    store: Arc<dyn ConversationStore>,
    images: Arc<dyn ImageFetcher>,
    settings: PipelineSettings,
    turn_locks: DashMap<ConversationKey, Arc<Mutex<()>>>,
}

impl ConversationPipeline {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        tools: Arc<ToolRegistry>,
        store: Arc<dyn ConversationStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            providers,
            orchestrator: ToolCallOrchestrator::new(tools.clone()),
            tools,
            store,
            images: Arc::new(HttpImageFetcher::new()),
            settings,
            turn_locks: DashMap::new(),
        }
    }

    pub fn with_image_fetcher(mut self, images: Arc<dyn ImageFetcher>) -> Self {
        self.images = images;
        self
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Forget every conversation of `user`.
    pub async fn clear_history(&self, user: &str) -> Result<usize> {
        let cleared = self.store.clear_user(user).await?;
        info!(user, cleared, "history cleared");
        Ok(cleared)
    }

    /// Start a turn in the background and return its fragment stream.
    ///
    /// Unknown providers and images sent to a provider without vision are
    /// rejected here, before anything is spawned. The receiver closes when
    /// the turn ends.
    pub fn query(self: &Arc<Self>, input: TurnInput) -> Result<mpsc::Receiver<String>> {
        self.check_input(&input)?;

        let (tx, rx) = mpsc::channel(1);
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            pipeline.run_turn(input, FragmentSink::new(tx)).await;
        });
        Ok(rx)
    }

    /// Run one turn to completion, pushing fragments into `sink`. The sink
    /// is dropped on return, which closes the channel.
    #[instrument(skip_all, fields(user = %input.user, provider = %input.provider))]
    pub async fn run_turn(&self, input: TurnInput, sink: FragmentSink) -> TurnOutcome {
        let key = ConversationKey::new(input.user.clone(), input.provider.clone());
        let lock = self.turn_lock(&key);
        let outcome = {
            let _turn = lock.lock().await;
            self.locked_turn(&key, input, sink).await
        };
        drop(lock);
        self.release_turn_lock(&key);
        outcome
    }

    async fn locked_turn(
        &self,
        key: &ConversationKey,
        input: TurnInput,
        sink: FragmentSink,
    ) -> TurnOutcome {
        let mut state = TurnState::BuildingContent;
        let deadline = Instant::now() + self.settings.turn_timeout;
        let produced = timeout_at(deadline, self.produce(&input, &sink, &mut state)).await;
        let result = produced.unwrap_or_else(|_| {
            Err(Error::Timeout(format!(
                "no answer within {}s",
                self.settings.turn_timeout.as_secs()
            )))
        });

        let answer = match result {
            Ok(answer) => answer,
            Err(error) => {
                warn!(state = ?state, "turn failed: {error}");
                if let Err(e) = sink.send(error.to_string()).await {
                    debug!("could not deliver error fragment: {e}");
                }
                return TurnOutcome::Failed { at: state, error };
            }
        };

        transition(&mut state, TurnState::Persisting);
        let persisted = self.persist(key, &input, &answer).await;
        transition(&mut state, TurnState::Done);
        TurnOutcome::Done { answer, persisted }
    }

    async fn produce(
        &self,
        input: &TurnInput,
        sink: &FragmentSink,
        state: &mut TurnState,
    ) -> Result<String> {
        let entry = self.check_input(input)?;
        let key = ConversationKey::new(input.user.clone(), input.provider.clone());

        let mut turns = Vec::new();
        if entry.capabilities.system_role && !self.settings.system_prompt.trim().is_empty() {
            turns.push(Turn::system(self.settings.system_prompt.clone()));
        }
        match self.store.load(&key).await {
            Ok(history) => turns.extend(history),
            Err(e) => warn!("failed to load history for {key}, continuing without it: {e}"),
        }
        turns.push(self.human_turn(entry, input).await?);

        let mut request = LlmRequest {
            model: entry.model.clone(),
            turns,
            max_tokens: Some(self.settings.max_tokens),
            temperature: Some(self.settings.temperature),
            tools: Vec::new(),
        };

        if entry.capabilities.tools {
            request.tools = self.tools.definitions_for(&input.provider);
        }
        if !request.tools.is_empty() {
            transition(state, TurnState::ToolPhase);
            let context = ToolContext {
                user: input.user.clone(),
                provider: input.provider.clone(),
            };
            let outcome = self
                .orchestrator
                .execute(entry.provider.as_ref(), &request, &context, sink)
                .await?;

            if outcome.return_direct {
                let answer = outcome
                    .content
                    .last()
                    .map(Turn::joined_text)
                    .unwrap_or_default();
                if !outcome.streamed {
                    sink.send(answer.clone()).await?;
                }
                return Ok(answer);
            }
            request.turns = outcome.content;
        }

        transition(state, TurnState::Generating);
        self.generate(entry, &request, sink).await
    }

    /// Stream the final answer. Chunks are forwarded untouched; a provider
    /// that streamed nothing has its whole response sent as one fragment.
    async fn generate(
        &self,
        entry: &ProviderEntry,
        request: &LlmRequest,
        sink: &FragmentSink,
    ) -> Result<String> {
        let mut stream = entry.provider.generate(request).await?;
        let mut streamed: Option<String> = None;

        while let Some(event) = stream.next().await {
            match event? {
                GenerationEvent::Chunk(bytes) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    streamed.get_or_insert_with(String::new).push_str(&text);
                    sink.send(text).await?;
                }
                GenerationEvent::Completed(response) => {
                    return match streamed {
                        Some(text) => Ok(text),
                        None => {
                            debug!("provider did not stream, sending whole response");
                            sink.send(response.text.clone()).await?;
                            Ok(response.text)
                        }
                    };
                }
            }
        }

        Err(Error::Agent(
            "provider stream ended without a response".to_string(),
        ))
    }

    fn check_input(&self, input: &TurnInput) -> Result<&ProviderEntry> {
        let entry = self
            .providers
            .get(&input.provider)
            .ok_or_else(|| Error::Input(format!("unknown model: {}", input.provider)))?;
        if !input.image_urls.is_empty() && !entry.capabilities.vision {
            return Err(Error::Input(
                "vision of current model not enabled".to_string(),
            ));
        }
        Ok(entry)
    }

    async fn human_turn(&self, entry: &ProviderEntry, input: &TurnInput) -> Result<Turn> {
        let mut turn = Turn::human(input.text.clone());
        for url in &input.image_urls {
            let part = if entry.capabilities.image_urls {
                ContentBlock::ImageUrl { url: url.clone() }
            } else {
                self.images.fetch(url).await?
            };
            turn.parts.push(part);
        }
        Ok(turn)
    }

    async fn persist(&self, key: &ConversationKey, input: &TurnInput, answer: &str) -> bool {
        if answer.is_empty() {
            debug!("empty answer, nothing to persist");
            return false;
        }
        let exchange = [Turn::human(input.text.clone()), Turn::ai(answer)];
        match self.store.append(key, &exchange).await {
            Ok(()) => true,
            Err(e) => {
                error!("failed to save history for {key}: {e}");
                false
            }
        }
    }

    fn turn_lock(&self, key: &ConversationKey) -> Arc<Mutex<()>> {
        self.turn_locks.entry(key.clone()).or_default().clone()
    }

    /// Forget the lock once no other turn for `key` holds or awaits it.
    fn release_turn_lock(&self, key: &ConversationKey) {
        self.turn_locks.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

fn transition(state: &mut TurnState, next: TurnState) {
    debug!(from = ?*state, to = ?next, "turn state");
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{LlmProvider, ProviderCapabilities};
    use crate::testing::{
        RecordingTool, ScriptedProvider, call, chunk, done, done_with_calls, tool_chunk,
    };
    use crate::transcoder::TOOL_CLOSE;
    use async_trait::async_trait;
    use llmverse_common::Role;
    use llmverse_db::InMemoryConversationStore;

    struct Harness {
        pipeline: Arc<ConversationPipeline>,
        provider: Arc<ScriptedProvider>,
        store: Arc<InMemoryConversationStore>,
    }

    fn harness(
        provider: ScriptedProvider,
        capabilities: ProviderCapabilities,
        tools: Vec<Arc<RecordingTool>>,
    ) -> Harness {
        let provider = Arc::new(provider);
        let mut providers = ProviderRegistry::new();
        providers.register(
            "openai",
            ProviderEntry {
                provider: provider.clone(),
                model: "gpt-4".into(),
                capabilities,
            },
        );
        let mut registry = ToolRegistry::new();
        for tool in tools {
            registry.register(tool);
        }
        let store = Arc::new(InMemoryConversationStore::new(2048));
        let pipeline = ConversationPipeline::new(
            Arc::new(providers),
            Arc::new(registry),
            store.clone(),
            PipelineSettings {
                system_prompt: "You are a helpful AI assistant.".into(),
                temperature: 0.7,
                max_tokens: 4096,
                turn_timeout: Duration::from_secs(60),
            },
        );
        Harness {
            pipeline: Arc::new(pipeline),
            provider,
            store,
        }
    }

    fn input(text: &str) -> TurnInput {
        TurnInput {
            user: "alice".into(),
            provider: "openai".into(),
            text: text.into(),
            image_urls: vec![],
        }
    }

    fn with_tools() -> ProviderCapabilities {
        ProviderCapabilities {
            tools: true,
            ..Default::default()
        }
    }

    async fn drive(pipeline: &ConversationPipeline, input: TurnInput) -> (TurnOutcome, Vec<String>) {
        let (tx, mut rx) = mpsc::channel(1);
        let collector = tokio::spawn(async move {
            let mut fragments = Vec::new();
            while let Some(fragment) = rx.recv().await {
                fragments.push(fragment);
            }
            fragments
        });
        let outcome = pipeline.run_turn(input, FragmentSink::new(tx)).await;
        (outcome, collector.await.unwrap())
    }

    async fn history(store: &InMemoryConversationStore) -> Vec<(Role, String)> {
        store
            .load(&ConversationKey::new("alice", "openai"))
            .await
            .unwrap()
            .iter()
            .map(|t| (t.role, t.joined_text()))
            .collect()
    }

    #[tokio::test]
    async fn streamed_fragments_concatenate_to_persisted_answer() {
        let h = harness(
            ScriptedProvider::new(vec![Ok(vec![
                chunk("Rust "),
                chunk("is "),
                chunk("fun."),
                done("Rust is fun."),
            ])]),
            ProviderCapabilities::default(),
            vec![],
        );

        let (outcome, fragments) = drive(&h.pipeline, input("tell me")).await;

        assert!(matches!(outcome, TurnOutcome::Done { persisted: true, .. }));
        assert_eq!(fragments, ["Rust ", "is ", "fun."]);
        assert_eq!(
            history(&h.store).await,
            [
                (Role::Human, "tell me".to_string()),
                (Role::Ai, fragments.concat())
            ]
        );

        let request = &h.provider.requests()[0];
        assert_eq!(request.turns[0].role, Role::System);
        assert!(request.tools.is_empty());
    }

    #[tokio::test]
    async fn non_streaming_response_is_one_fragment() {
        let h = harness(
            ScriptedProvider::new(vec![Ok(vec![done("whole answer")])]),
            ProviderCapabilities::default(),
            vec![],
        );

        let (outcome, fragments) = drive(&h.pipeline, input("hi")).await;

        assert!(matches!(outcome, TurnOutcome::Done { persisted: true, .. }));
        assert_eq!(fragments, ["whole answer"]);
    }

    #[tokio::test]
    async fn empty_non_streaming_response_emits_and_persists_nothing() {
        let h = harness(
            ScriptedProvider::new(vec![Ok(vec![done("")])]),
            ProviderCapabilities::default(),
            vec![],
        );

        let (outcome, fragments) = drive(&h.pipeline, input("hi")).await;

        assert!(matches!(
            outcome,
            TurnOutcome::Done {
                persisted: false,
                ..
            }
        ));
        assert!(fragments.is_empty());
        assert!(history(&h.store).await.is_empty());
    }

    #[tokio::test]
    async fn provider_error_follows_partial_output() {
        let h = harness(
            ScriptedProvider::new(vec![Ok(vec![
                chunk("partial "),
                Err(Error::Agent("connection reset".into())),
            ])]),
            ProviderCapabilities::default(),
            vec![],
        );

        let (outcome, fragments) = drive(&h.pipeline, input("hi")).await;

        assert!(matches!(
            outcome,
            TurnOutcome::Failed {
                at: TurnState::Generating,
                ..
            }
        ));
        assert_eq!(fragments, ["partial ", "agent error: connection reset"]);
        assert!(history(&h.store).await.is_empty());
    }

    #[tokio::test]
    async fn tool_round_trip_then_final_answer() {
        let rates = Arc::new(RecordingTool::ok("getExchangeRate", "{\"EUR\":0.92}"));
        let h = harness(
            ScriptedProvider::new(vec![
                Ok(vec![
                    tool_chunk("call_1", "getExchangeRate", "{\"currency_date\":\"latest\"}"),
                    done_with_calls(
                        "",
                        vec![
                            call("call_1", "getExchangeRate", "{\"currency_date\":\"latest\"}"),
                            call("call_2", "doSomethingUndefined", "{}"),
                        ],
                    ),
                ]),
                Ok(vec![chunk("1 USD is 0.92 EUR."), done("1 USD is 0.92 EUR.")]),
            ]),
            with_tools(),
            vec![rates.clone()],
        );

        let (outcome, fragments) = drive(&h.pipeline, input("usd to eur?")).await;

        assert!(matches!(outcome, TurnOutcome::Done { persisted: true, .. }));
        assert_eq!(
            fragments,
            [
                "||*** Running tool: [getExchangeRate] with arguments: *** `{\"currency_date\":\"latest\"}",
                TOOL_CLOSE,
                "1 USD is 0.92 EUR.",
            ]
        );

        let requests = h.provider.requests();
        assert_eq!(requests.len(), 2);
        let second = &requests[1].turns;
        let last = second.last().unwrap();
        assert_eq!(last.role, Role::Tool);
        assert_eq!(last.tool_result_part().unwrap().content, "{\"EUR\":0.92}");
        assert_eq!(second[second.len() - 2].tool_calls().count(), 1);

        assert_eq!(
            history(&h.store).await[1],
            (Role::Ai, "1 USD is 0.92 EUR.".to_string())
        );
    }

    #[tokio::test]
    async fn direct_answer_in_tool_phase_skips_second_call() {
        let h = harness(
            ScriptedProvider::new(vec![Ok(vec![chunk("Hi!"), done("Hi!")])]),
            with_tools(),
            vec![Arc::new(RecordingTool::ok("getWeather", "sunny"))],
        );

        let (outcome, fragments) = drive(&h.pipeline, input("hello")).await;

        assert!(matches!(outcome, TurnOutcome::Done { persisted: true, .. }));
        assert_eq!(fragments, ["Hi!"]);
        assert_eq!(h.provider.requests().len(), 1);
        assert_eq!(h.provider.requests()[0].tools.len(), 1);
    }

    #[tokio::test]
    async fn direct_non_streamed_answer_is_still_delivered() {
        let h = harness(
            ScriptedProvider::new(vec![Ok(vec![done("Hi!")])]),
            with_tools(),
            vec![Arc::new(RecordingTool::ok("getWeather", "sunny"))],
        );

        let (_, fragments) = drive(&h.pipeline, input("hello")).await;
        assert_eq!(fragments, ["Hi!"]);
    }

    #[tokio::test]
    async fn tool_failure_fails_the_turn() {
        let h = harness(
            ScriptedProvider::new(vec![Ok(vec![done_with_calls(
                "",
                vec![call("call_1", "getWeather", "{\"location\":\"Oslo,NO\"}")],
            )])]),
            with_tools(),
            vec![Arc::new(RecordingTool::failing("getWeather", "503"))],
        );

        let (outcome, fragments) = drive(&h.pipeline, input("weather?")).await;

        assert!(matches!(
            outcome,
            TurnOutcome::Failed {
                at: TurnState::ToolPhase,
                error: Error::Tool(_)
            }
        ));
        assert_eq!(fragments, ["tool error: 503"]);
        assert!(history(&h.store).await.is_empty());
    }

    #[tokio::test]
    async fn history_is_replayed_and_cleared() {
        let h = harness(
            ScriptedProvider::new(vec![
                Ok(vec![done("first answer")]),
                Ok(vec![done("second answer")]),
                Ok(vec![done("fresh answer")]),
            ]),
            ProviderCapabilities::default(),
            vec![],
        );

        drive(&h.pipeline, input("first")).await;
        drive(&h.pipeline, input("second")).await;
        let second = &h.provider.requests()[1];
        assert_eq!(second.turns.len(), 4);
        assert_eq!(second.turns[1].joined_text(), "first");
        assert_eq!(second.turns[2].joined_text(), "first answer");

        assert_eq!(h.pipeline.clear_history("alice").await.unwrap(), 1);
        drive(&h.pipeline, input("again")).await;
        let third = &h.provider.requests()[2];
        assert_eq!(third.turns.len(), 2);
        assert_eq!(third.turns[0].role, Role::System);
        assert_eq!(third.turns[1].joined_text(), "again");
    }

    #[tokio::test]
    async fn turn_lock_is_released_after_the_turn() {
        let h = harness(
            ScriptedProvider::new(vec![Ok(vec![done("one")]), Ok(vec![done("two")])]),
            ProviderCapabilities::default(),
            vec![],
        );

        drive(&h.pipeline, input("first")).await;
        assert!(h.pipeline.turn_locks.is_empty());

        // a turn still waiting on the key keeps the lock alive
        let key = ConversationKey::new("alice", "openai");
        let waiting = h.pipeline.turn_lock(&key);
        drive(&h.pipeline, input("second")).await;
        assert!(h.pipeline.turn_locks.contains_key(&key));

        drop(waiting);
        h.pipeline.release_turn_lock(&key);
        assert!(h.pipeline.turn_locks.is_empty());
    }

    #[tokio::test]
    async fn system_turn_omitted_when_unsupported() {
        let h = harness(
            ScriptedProvider::new(vec![Ok(vec![done("ok")])]),
            ProviderCapabilities {
                system_role: false,
                ..Default::default()
            },
            vec![],
        );

        drive(&h.pipeline, input("hi")).await;
        let request = &h.provider.requests()[0];
        assert_eq!(request.turns.len(), 1);
        assert_eq!(request.turns[0].role, Role::Human);
    }

    #[tokio::test]
    async fn images_rejected_without_vision() {
        let h = harness(
            ScriptedProvider::new(vec![]),
            ProviderCapabilities::default(),
            vec![],
        );
        let mut turn = input("what is this?");
        turn.image_urls = vec!["https://cdn.example.com/cat.png".into()];

        let err = h.pipeline.query(turn).unwrap_err();
        assert_eq!(err.to_string(), "invalid input: vision of current model not enabled");
        assert!(h.provider.requests().is_empty());
    }

    #[tokio::test]
    async fn unknown_provider_is_rejected() {
        let h = harness(
            ScriptedProvider::new(vec![]),
            ProviderCapabilities::default(),
            vec![],
        );
        let mut turn = input("hi");
        turn.provider = "mystery".into();
        assert!(matches!(h.pipeline.query(turn), Err(Error::Input(_))));
    }

    struct FailingFetcher;

    #[async_trait]
    impl ImageFetcher for FailingFetcher {
        async fn fetch(&self, _url: &str) -> Result<ContentBlock> {
            Err(Error::Input("failed to download image: 404 Not Found".into()))
        }
    }

    #[tokio::test]
    async fn image_fetch_failure_fails_before_generation() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(vec![done("never")])]));
        let mut providers = ProviderRegistry::new();
        providers.register(
            "openai",
            ProviderEntry {
                provider: provider.clone(),
                model: "gpt-4".into(),
                capabilities: ProviderCapabilities {
                    vision: true,
                    ..Default::default()
                },
            },
        );
        let pipeline = ConversationPipeline::new(
            Arc::new(providers),
            Arc::new(ToolRegistry::new()),
            Arc::new(InMemoryConversationStore::new(2048)),
            PipelineSettings {
                system_prompt: String::new(),
                temperature: 0.7,
                max_tokens: 4096,
                turn_timeout: Duration::from_secs(60),
            },
        )
        .with_image_fetcher(Arc::new(FailingFetcher));

        let mut turn = input("what is this?");
        turn.image_urls = vec!["https://cdn.example.com/cat.png".into()];
        let (outcome, fragments) = drive(&pipeline, turn).await;

        assert!(matches!(
            outcome,
            TurnOutcome::Failed {
                at: TurnState::BuildingContent,
                ..
            }
        ));
        assert_eq!(fragments, ["invalid input: failed to download image: 404 Not Found"]);
        assert!(provider.requests().is_empty());
    }

    #[tokio::test]
    async fn image_urls_pass_through_when_supported() {
        let h = harness(
            ScriptedProvider::new(vec![Ok(vec![done("a cat")])]),
            ProviderCapabilities {
                vision: true,
                image_urls: true,
                ..Default::default()
            },
            vec![],
        );
        let mut turn = input("what is this?");
        turn.image_urls = vec!["https://cdn.example.com/cat.png".into()];

        drive(&h.pipeline, turn).await;
        let human = h.provider.requests()[0].turns.last().cloned().unwrap();
        assert_eq!(
            human.parts[1],
            ContentBlock::ImageUrl {
                url: "https://cdn.example.com/cat.png".into()
            }
        );
        // only the text is remembered
        assert_eq!(history(&h.store).await[0].1, "what is this?");
    }

    struct StalledProvider;

    #[async_trait]
    impl LlmProvider for StalledProvider {
        fn provider_id(&self) -> &str {
            "stalled"
        }

        async fn generate(&self, _request: &LlmRequest) -> Result<crate::GenerationStream> {
            Ok(futures::stream::pending().boxed())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expiry_fails_the_turn() {
        let mut providers = ProviderRegistry::new();
        providers.register(
            "openai",
            ProviderEntry {
                provider: Arc::new(StalledProvider),
                model: "gpt-4".into(),
                capabilities: ProviderCapabilities::default(),
            },
        );
        let pipeline = ConversationPipeline::new(
            Arc::new(providers),
            Arc::new(ToolRegistry::new()),
            Arc::new(InMemoryConversationStore::new(2048)),
            PipelineSettings {
                system_prompt: String::new(),
                temperature: 0.7,
                max_tokens: 4096,
                turn_timeout: Duration::from_secs(60),
            },
        );

        let (outcome, fragments) = drive(&pipeline, input("hi")).await;

        assert!(matches!(
            outcome,
            TurnOutcome::Failed {
                at: TurnState::Generating,
                error: Error::Timeout(_)
            }
        ));
        assert_eq!(fragments, ["timed out: no answer within 60s"]);
    }

    #[tokio::test]
    async fn query_streams_until_the_turn_ends() {
        let h = harness(
            ScriptedProvider::new(vec![Ok(vec![chunk("a"), chunk("b"), done("ab")])]),
            ProviderCapabilities::default(),
            vec![],
        );

        let mut rx = h.pipeline.query(input("hi")).unwrap();
        let mut fragments = Vec::new();
        while let Some(fragment) = rx.recv().await {
            fragments.push(fragment);
        }
        assert_eq!(fragments, ["a", "b"]);
    }
}
