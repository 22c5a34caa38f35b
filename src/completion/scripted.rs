//! Deterministic [`CompletionClient`] for tests and offline replays.
//!
//! Replies are looked up by the request's `component` tag: queued replies
//! are consumed first, then a per-component responder (if any) computes a
//! reply from the request. Every call is recorded so tests can assert on the
//! exact sequence of phases, prompts and image counts.

use super::{CompletionClient, CompletionRequest, RawCompletion};
use crate::error::CompletionError;
use crate::usage::{ModelRole, UsageRecord};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

type Responder = Box<dyn Fn(&CompletionRequest) -> Result<Value, CompletionError> + Send + Sync>;

/// A call observed by [`ScriptedCompletionClient`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub component: String,
    pub phase: String,
    pub model: String,
    pub user_text: String,
    pub image_count: usize,
}

/// Replays scripted replies keyed by component.
#[derive(Default)]
pub struct ScriptedCompletionClient {
    queued: Mutex<HashMap<String, VecDeque<Result<Value, CompletionError>>>>,
    responders: Mutex<HashMap<String, Responder>>,
    calls: Mutex<Vec<RecordedCall>>,
    tokens_per_call: (u64, u64),
}

impl ScriptedCompletionClient {
    pub fn new() -> Self {
        Self {
            tokens_per_call: (100, 20),
            ..Default::default()
        }
    }

    /// Queue a successful reply for `component`.
    pub fn push(&self, component: &str, output: Value) {
        self.push_result(component, Ok(output));
    }

    /// Queue a failing call for `component`.
    pub fn push_error(&self, component: &str, detail: &str) {
        self.push_result(
            component,
            Err(CompletionError::Provider {
                model: "scripted".to_string(),
                detail: detail.to_string(),
            }),
        );
    }

    fn push_result(&self, component: &str, result: Result<Value, CompletionError>) {
        self.queued
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(component.to_string())
            .or_default()
            .push_back(result);
    }

    /// Compute replies for `component` once its queue is empty.
    pub fn respond_with<F>(&self, component: &str, f: F)
    where
        F: Fn(&CompletionRequest) -> Result<Value, CompletionError> + Send + Sync + 'static,
    {
        self.responders
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(component.to_string(), Box::new(f));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn calls_for(&self, component: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.component == component)
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletionClient {
    async fn complete(&self, request: CompletionRequest) -> Result<RawCompletion, CompletionError> {
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(RecordedCall {
                component: request.component.clone(),
                phase: request.phase.clone(),
                model: request.binding.primary.model.clone(),
                user_text: request.content.text().to_string(),
                image_count: request.content.image_count(),
            });

        let queued = self
            .queued
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get_mut(&request.component)
            .and_then(|q| q.pop_front());

        let result = match queued {
            Some(r) => r,
            None => {
                let responders = self.responders.lock().unwrap_or_else(|p| p.into_inner());
                match responders.get(&request.component) {
                    Some(f) => f(&request),
                    None => Err(CompletionError::Exhausted {
                        component: request.component.clone(),
                        phase: request.phase.clone(),
                        attempts: 1,
                        last_error: "no scripted reply left".to_string(),
                    }),
                }
            }
        };

        let output = result?;
        request
            .schema
            .validate(&output)
            .map_err(|detail| CompletionError::InvalidOutput {
                model: request.binding.primary.model.clone(),
                schema: request.schema.name.to_string(),
                detail,
            })?;

        let (input_tokens, output_tokens) = self.tokens_per_call;
        Ok(RawCompletion {
            output,
            usage: UsageRecord::new(
                &request.component,
                &request.phase,
                ModelRole::Primary,
                &request.binding.primary.model,
                input_tokens,
                output_tokens,
            ),
            used_fallback: false,
        })
    }
}
