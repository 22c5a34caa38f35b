//! Schema-constrained completion service.
//!
//! Every stage that needs a model talks to it through the single
//! [`CompletionClient`] capability. Stages compose a client (usually an
//! `Arc<dyn CompletionClient>`) instead of inheriting shared LLM plumbing, so
//! the text extractors, the vision locator and the caption pipeline can all be
//! exercised against the scripted client (`test-util` feature) in tests.
//!
//! ## Request lifecycle
//!
//! ```text
//! stage ──▶ CompletionRequest ──▶ client.complete()
//!                                   │  primary model, ≤ max_retries+1 attempts
//!                                   │  JSON extraction + schema validation
//!                                   └─ fallback model (if distinct), same budget
//!       ◀── RawCompletion { output, usage, used_fallback }
//! ```
//!
//! [`complete_structured`] then decodes the validated JSON into the stage's
//! own serde type.

pub mod json;
pub mod provider;
#[cfg(any(test, feature = "test-util"))]
pub mod scripted;

use crate::config::{CompletionConfig, ModelBinding};
use crate::error::CompletionError;
use crate::usage::UsageRecord;
use async_trait::async_trait;
use edgequake_llm::ImageData;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

type SchemaValidator = dyn Fn(&Value) -> Result<(), String> + Send + Sync;

/// The JSON shape a completion must produce.
///
/// `json_schema` is shown to the model; the validator (derived from the serde
/// target type) decides whether a reply is acceptable.
#[derive(Clone)]
pub struct OutputSchema {
    pub name: &'static str,
    pub json_schema: Value,
    validator: Arc<SchemaValidator>,
}

impl OutputSchema {
    /// Schema whose validator accepts any JSON that deserializes into `T`.
    pub fn of<T: DeserializeOwned + 'static>(name: &'static str, json_schema: Value) -> Self {
        Self {
            name,
            json_schema,
            validator: Arc::new(|value: &Value| {
                serde_json::from_value::<T>(value.clone())
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }),
        }
    }

    pub fn validate(&self, value: &Value) -> Result<(), String> {
        (self.validator)(value)
    }
}

impl fmt::Debug for OutputSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSchema")
            .field("name", &self.name)
            .field("json_schema", &self.json_schema)
            .finish()
    }
}

/// What the model is shown as the user turn.
#[derive(Clone)]
pub enum CompletionContent {
    Text(String),
    Vision { text: String, images: Vec<ImageData> },
}

impl CompletionContent {
    pub fn text(&self) -> &str {
        match self {
            CompletionContent::Text(t) => t,
            CompletionContent::Vision { text, .. } => text,
        }
    }

    pub fn image_count(&self) -> usize {
        match self {
            CompletionContent::Text(_) => 0,
            CompletionContent::Vision { images, .. } => images.len(),
        }
    }
}

/// One schema-constrained completion call.
#[derive(Clone)]
pub struct CompletionRequest {
    pub schema: OutputSchema,
    pub system_prompt: String,
    pub content: CompletionContent,
    pub binding: ModelBinding,
    pub max_retries: u32,
    pub temperature: f32,
    pub max_tokens: usize,
    /// Usage-accounting tag, e.g. `toc-extractor`.
    pub component: String,
    /// Usage-accounting tag, e.g. `extraction` or `correction-2`.
    pub phase: String,
}

impl CompletionRequest {
    /// Text request with call parameters taken from `params`.
    pub fn text(
        schema: OutputSchema,
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
        binding: &ModelBinding,
        params: &CompletionConfig,
    ) -> Self {
        Self {
            schema,
            system_prompt: system_prompt.into(),
            content: CompletionContent::Text(user_prompt.into()),
            binding: binding.clone(),
            max_retries: params.max_retries,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            component: String::new(),
            phase: String::new(),
        }
    }

    /// Vision request: `text` plus page images in one user turn.
    pub fn vision(
        schema: OutputSchema,
        system_prompt: impl Into<String>,
        text: impl Into<String>,
        images: Vec<ImageData>,
        binding: &ModelBinding,
        params: &CompletionConfig,
    ) -> Self {
        let mut req = Self::text(schema, system_prompt, String::new(), binding, params);
        req.content = CompletionContent::Vision {
            text: text.into(),
            images,
        };
        req
    }

    pub fn tagged(mut self, component: impl Into<String>, phase: impl Into<String>) -> Self {
        self.component = component.into();
        self.phase = phase.into();
        self
    }
}

impl fmt::Debug for CompletionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionRequest")
            .field("schema", &self.schema.name)
            .field("component", &self.component)
            .field("phase", &self.phase)
            .field("primary", &self.binding.primary)
            .field("fallback", &self.binding.fallback)
            .field("images", &self.content.image_count())
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

/// A schema-validated completion, still as JSON.
#[derive(Debug, Clone)]
pub struct RawCompletion {
    pub output: Value,
    pub usage: UsageRecord,
    pub used_fallback: bool,
}

/// A completion decoded into the caller's type.
#[derive(Debug, Clone)]
pub struct Completion<T> {
    pub output: T,
    pub usage: UsageRecord,
    pub used_fallback: bool,
}

/// Text/vision completion capability injected into every stage.
///
/// Implementations own transport concerns (auth, retries, fallback
/// escalation). Errors returned here have already exhausted `max_retries`.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<RawCompletion, CompletionError>;
}

/// Run `request` and decode the validated output into `T`.
pub async fn complete_structured<T: DeserializeOwned>(
    client: &dyn CompletionClient,
    request: CompletionRequest,
) -> Result<Completion<T>, CompletionError> {
    let schema = request.schema.name;
    let raw = client.complete(request).await?;
    let output = serde_json::from_value(raw.output).map_err(|e| CompletionError::InvalidOutput {
        model: raw.usage.model_name.clone(),
        schema: schema.to_string(),
        detail: e.to_string(),
    })?;
    Ok(Completion {
        output,
        usage: raw.usage,
        used_fallback: raw.used_fallback,
    })
}
