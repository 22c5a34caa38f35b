//! [`CompletionClient`] backed by `edgequake-llm` providers.
//!
//! ## Retry Strategy
//!
//! Each model gets `max_retries + 1` attempts with exponential backoff
//! (`retry_backoff_ms * 2^attempt`). An attempt fails on a transport error,
//! on a reply without JSON, or on JSON that does not match the request's
//! schema. When the primary model is exhausted and the binding names a
//! distinct fallback model, the fallback gets the same budget.
//!
//! Tokens of failed attempts are still billed, so they are folded into the
//! single [`UsageRecord`] the call produces.

use super::json::{extract_json, schema_instructions};
use super::{CompletionClient, CompletionContent, CompletionRequest, RawCompletion};
use crate::config::ModelSpec;
use crate::error::{ChapterError, CompletionError};
use crate::usage::{ModelRole, UsageRecord};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Provider-backed completion client with a per-model provider cache.
pub struct LlmCompletionClient {
    providers: Mutex<HashMap<ModelSpec, Arc<dyn LLMProvider>>>,
    retry_backoff_ms: u64,
}

struct AttemptOutcome {
    output: Value,
    input_tokens: u64,
    output_tokens: u64,
}

struct AttemptFailure {
    attempts: u32,
    last_error: String,
    input_tokens: u64,
    output_tokens: u64,
}

impl LlmCompletionClient {
    /// Delay before `attempt` (1-based), doubling each time and saturating.
    fn backoff_ms(&self, attempt: u32) -> u64 {
        self.retry_backoff_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
    }

    pub fn new(retry_backoff_ms: u64) -> Self {
        Self {
            providers: Mutex::new(HashMap::new()),
            retry_backoff_ms,
        }
    }

    /// Register a pre-built provider for `spec`. Useful when the caller needs
    /// custom middleware (caching, rate limiting) around the provider.
    pub fn with_provider(self, spec: ModelSpec, provider: Arc<dyn LLMProvider>) -> Self {
        self.providers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(spec, provider);
        self
    }

    /// Eagerly create providers for `specs` so a missing API key fails the
    /// run before any stage starts.
    pub fn preflight<'a>(
        &self,
        specs: impl IntoIterator<Item = &'a ModelSpec>,
    ) -> Result<(), ChapterError> {
        for spec in specs {
            self.provider_for(spec)
                .map_err(|e| ChapterError::ProviderNotConfigured {
                    provider: spec.provider.clone(),
                    hint: e.to_string(),
                })?;
        }
        Ok(())
    }

    fn provider_for(&self, spec: &ModelSpec) -> Result<Arc<dyn LLMProvider>, CompletionError> {
        let mut cache = self.providers.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(p) = cache.get(spec) {
            return Ok(Arc::clone(p));
        }
        let provider = ProviderFactory::create_llm_provider(&spec.provider, &spec.model)
            .map_err(|e| CompletionError::Provider {
                model: spec.to_string(),
                detail: format!("{e}"),
            })?;
        cache.insert(spec.clone(), Arc::clone(&provider));
        Ok(provider)
    }

    fn build_messages(request: &CompletionRequest) -> Vec<ChatMessage> {
        let system = format!(
            "{}\n\n{}",
            request.system_prompt,
            schema_instructions(request.schema.name, &request.schema.json_schema)
        );
        let user = match &request.content {
            CompletionContent::Text(text) => ChatMessage::user(text.as_str()),
            CompletionContent::Vision { text, images } => {
                ChatMessage::user_with_images(text.as_str(), images.clone())
            }
        };
        vec![ChatMessage::system(system), user]
    }

    async fn run_model(
        &self,
        spec: &ModelSpec,
        request: &CompletionRequest,
        messages: &[ChatMessage],
    ) -> Result<AttemptOutcome, AttemptFailure> {
        let mut failure = AttemptFailure {
            attempts: 0,
            last_error: String::new(),
            input_tokens: 0,
            output_tokens: 0,
        };
        let provider = match self.provider_for(spec) {
            Ok(p) => p,
            Err(e) => {
                failure.last_error = e.to_string();
                return Err(failure);
            }
        };
        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };

        for attempt in 0..=request.max_retries {
            if attempt > 0 {
                let backoff = self.backoff_ms(attempt);
                warn!(
                    "{}/{}: retry {}/{} on {} after {}ms",
                    request.component, request.phase, attempt, request.max_retries, spec, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }
            failure.attempts += 1;

            let response = match provider.chat(messages, Some(&options)).await {
                Ok(r) => r,
                Err(e) => {
                    failure.last_error = format!("{e}");
                    warn!(
                        "{}/{}: attempt {} on {} failed - {}",
                        request.component,
                        request.phase,
                        attempt + 1,
                        spec,
                        failure.last_error
                    );
                    continue;
                }
            };
            failure.input_tokens += response.prompt_tokens as u64;
            failure.output_tokens += response.completion_tokens as u64;

            let parsed = extract_json(&response.content)
                .and_then(|v| request.schema.validate(&v).map(|_| v));
            match parsed {
                Ok(output) => {
                    debug!(
                        "{}/{}: {} in / {} out tokens on {}",
                        request.component,
                        request.phase,
                        failure.input_tokens,
                        failure.output_tokens,
                        spec
                    );
                    return Ok(AttemptOutcome {
                        output,
                        input_tokens: failure.input_tokens,
                        output_tokens: failure.output_tokens,
                    });
                }
                Err(detail) => {
                    failure.last_error = format!(
                        "output does not match schema '{}': {detail}",
                        request.schema.name
                    );
                    warn!(
                        "{}/{}: attempt {} on {} - {}",
                        request.component,
                        request.phase,
                        attempt + 1,
                        spec,
                        failure.last_error
                    );
                }
            }
        }
        Err(failure)
    }
}

#[async_trait]
impl CompletionClient for LlmCompletionClient {
    async fn complete(&self, request: CompletionRequest) -> Result<RawCompletion, CompletionError> {
        let messages = Self::build_messages(&request);

        let primary = &request.binding.primary;
        let primary_failure = match self.run_model(primary, &request, &messages).await {
            Ok(out) => {
                return Ok(RawCompletion {
                    output: out.output,
                    usage: UsageRecord::new(
                        &request.component,
                        &request.phase,
                        ModelRole::Primary,
                        &primary.model,
                        out.input_tokens,
                        out.output_tokens,
                    ),
                    used_fallback: false,
                });
            }
            Err(f) => f,
        };

        if !request.binding.has_distinct_fallback() {
            return Err(CompletionError::Exhausted {
                component: request.component.clone(),
                phase: request.phase.clone(),
                attempts: primary_failure.attempts,
                last_error: primary_failure.last_error,
            });
        }

        let fallback = &request.binding.fallback;
        warn!(
            "{}/{}: primary {} exhausted, escalating to {}",
            request.component, request.phase, primary, fallback
        );
        match self.run_model(fallback, &request, &messages).await {
            Ok(out) => Ok(RawCompletion {
                output: out.output,
                usage: UsageRecord::new(
                    &request.component,
                    &request.phase,
                    ModelRole::Fallback,
                    &fallback.model,
                    primary_failure.input_tokens + out.input_tokens,
                    primary_failure.output_tokens + out.output_tokens,
                ),
                used_fallback: true,
            }),
            Err(f) => Err(CompletionError::Exhausted {
                component: request.component.clone(),
                phase: request.phase.clone(),
                attempts: primary_failure.attempts + f.attempts,
                last_error: f.last_error,
            }),
        }
    }
}
