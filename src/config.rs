//! Configuration types for document processing.
//!
//! All processing behaviour is controlled through [`ProcessorConfig`], built
//! via its [`ProcessorConfigBuilder`]. Model selection is resolved once into a
//! [`ResolvedModels`] struct so every stage receives a fully defaulted
//! [`ModelBinding`] and never has to branch on a missing override.
//!
//! # Design choice: builder over constructor
//! Most callers only change a model name or a batch size. The builder lets
//! them set only that and rely on documented defaults for the rest.

use crate::error::ChapterError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default provider when nothing else is configured.
pub const DEFAULT_PROVIDER: &str = "openai";

/// Default model when nothing else is configured.
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";

/// A provider + model pair, e.g. `openai` / `gpt-4.1-mini`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelSpec {
    pub provider: String,
    pub model: String,
}

impl ModelSpec {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }

    /// Parse `provider/model` or a bare `model` (provider defaults to `default_provider`).
    pub fn parse(s: &str, default_provider: &str) -> Self {
        match s.split_once('/') {
            Some((p, m)) if !p.is_empty() && !m.is_empty() => Self::new(p, m),
            _ => Self::new(default_provider, s),
        }
    }
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self::new(DEFAULT_PROVIDER, DEFAULT_MODEL)
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// The models one stage talks to. `fallback == primary` means no escalation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelBinding {
    pub primary: ModelSpec,
    pub fallback: ModelSpec,
}

impl ModelBinding {
    pub fn new(primary: ModelSpec, fallback: ModelSpec) -> Self {
        Self { primary, fallback }
    }

    /// A binding that never escalates.
    pub fn single(model: ModelSpec) -> Self {
        Self {
            fallback: model.clone(),
            primary: model,
        }
    }

    pub fn has_distinct_fallback(&self) -> bool {
        self.primary != self.fallback
    }

    /// A binding whose primary is this binding's fallback. Used by the
    /// caption pipeline to reparse failing items with the stronger model.
    pub fn escalated(&self) -> Self {
        Self::single(self.fallback.clone())
    }
}

/// Pipeline stages that issue completion calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    TocExtractor,
    ContentValidator,
    VisionToc,
    CaptionParser,
    CaptionValidator,
}

/// User-facing model configuration; resolved into [`ResolvedModels`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Model used by every stage without an override.
    pub default: ModelSpec,
    /// Shared escalation model. `None` disables escalation.
    pub fallback: Option<ModelSpec>,
    pub toc_extractor: Option<ModelSpec>,
    pub content_validator: Option<ModelSpec>,
    pub vision_toc: Option<ModelSpec>,
    pub caption_parser: Option<ModelSpec>,
    pub caption_validator: Option<ModelSpec>,
}

impl ModelsConfig {
    fn override_for(&self, stage: Stage) -> Option<&ModelSpec> {
        match stage {
            Stage::TocExtractor => self.toc_extractor.as_ref(),
            Stage::ContentValidator => self.content_validator.as_ref(),
            Stage::VisionToc => self.vision_toc.as_ref(),
            Stage::CaptionParser => self.caption_parser.as_ref(),
            Stage::CaptionValidator => self.caption_validator.as_ref(),
        }
    }

    fn binding_for(&self, stage: Stage) -> ModelBinding {
        let primary = self
            .override_for(stage)
            .cloned()
            .unwrap_or_else(|| self.default.clone());
        let fallback = self.fallback.clone().unwrap_or_else(|| primary.clone());
        ModelBinding::new(primary, fallback)
    }

    /// Build the per-stage bindings once.
    pub fn resolve(&self) -> ResolvedModels {
        ResolvedModels {
            toc_extractor: self.binding_for(Stage::TocExtractor),
            content_validator: self.binding_for(Stage::ContentValidator),
            vision_toc: self.binding_for(Stage::VisionToc),
            caption_parser: self.binding_for(Stage::CaptionParser),
            caption_validator: self.binding_for(Stage::CaptionValidator),
        }
    }
}

/// One fully defaulted binding per stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedModels {
    pub toc_extractor: ModelBinding,
    pub content_validator: ModelBinding,
    pub vision_toc: ModelBinding,
    pub caption_parser: ModelBinding,
    pub caption_validator: ModelBinding,
}

impl ResolvedModels {
    pub fn for_stage(&self, stage: Stage) -> &ModelBinding {
        match stage {
            Stage::TocExtractor => &self.toc_extractor,
            Stage::ContentValidator => &self.content_validator,
            Stage::VisionToc => &self.vision_toc,
            Stage::CaptionParser => &self.caption_parser,
            Stage::CaptionValidator => &self.caption_validator,
        }
    }
}

/// TOC discovery, plausibility and structural validation knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TocConfig {
    /// Only the first N pages are searched by the rule-based locator. Default: 10.
    pub max_search_pages: u32,
    /// Minimum plausibility confidence to accept rule-based TOC text. Default: 0.7.
    pub validation_threshold: f32,
    /// Correction attempts after the first extraction. Default: 3.
    pub max_validation_retries: u32,
    /// Run structural validation + correction loop. Default: true.
    pub validate_structure: bool,
    /// Titles longer than this (in chars) raise V004. Default: 200.
    pub max_title_length: usize,
    /// First entry must start within this share of the document (V007). Default: 0.3.
    pub first_entry_max_ratio: f32,
}

impl Default for TocConfig {
    fn default() -> Self {
        Self {
            max_search_pages: 10,
            validation_threshold: 0.7,
            max_validation_retries: 3,
            validate_structure: true,
            max_title_length: 200,
            first_entry_max_ratio: 0.3,
        }
    }
}

/// Vision TOC locator page batches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionConfig {
    /// Pages submitted in the first batch. Default: 10.
    pub first_batch_size: u32,
    /// Pages submitted in the continuation / second search batch. Default: 10.
    pub second_batch_size: u32,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            first_batch_size: 10,
            second_batch_size: 10,
        }
    }
}

/// Caption pipeline knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionConfig {
    /// Captions per parse/validation call. `0` means one caption per call. Default: 10.
    pub batch_size: usize,
    /// Parse batches in flight at once. Default: 4.
    pub concurrency: usize,
    /// Reparse captions that fail validation with the fallback model. Default: true.
    pub enable_fallback_retry: bool,
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            concurrency: 4,
            enable_fallback_retry: true,
        }
    }
}

/// Parameters forwarded to every completion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Attempts per model after the first one. Default: 3.
    pub max_retries: u32,
    /// Sampling temperature. Default: 0.0.
    pub temperature: f32,
    /// Output token cap per call. Default: 4096.
    pub max_tokens: usize,
    /// Initial backoff between attempts, doubling each time. Default: 500.
    pub retry_backoff_ms: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            temperature: 0.0,
            max_tokens: 4096,
            retry_backoff_ms: 500,
        }
    }
}

/// Configuration for a document processing run.
///
/// # Example
/// ```rust
/// use edgequake_chapters::{ModelSpec, ProcessorConfig};
///
/// let config = ProcessorConfig::builder()
///     .default_model(ModelSpec::new("openai", "gpt-4.1-mini"))
///     .fallback_model(ModelSpec::new("openai", "gpt-4.1"))
///     .max_search_pages(12)
///     .build()
///     .unwrap();
/// assert!(config.resolve_models().caption_parser.has_distinct_fallback());
/// ```
#[derive(Clone, Default)]
pub struct ProcessorConfig {
    pub models: ModelsConfig,
    pub toc: TocConfig,
    pub vision: VisionConfig,
    pub caption: CaptionConfig,
    pub completion: CompletionConfig,
    /// Stage progress / usage events.
    pub progress_callback: Option<ProgressCallback>,
}

impl fmt::Debug for ProcessorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorConfig")
            .field("models", &self.models)
            .field("toc", &self.toc)
            .field("vision", &self.vision)
            .field("caption", &self.caption)
            .field("completion", &self.completion)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ProcessingProgressCallback>"),
            )
            .finish()
    }
}

impl ProcessorConfig {
    /// Create a new builder for `ProcessorConfig`.
    pub fn builder() -> ProcessorConfigBuilder {
        ProcessorConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn resolve_models(&self) -> ResolvedModels {
        self.models.resolve()
    }
}

/// Builder for [`ProcessorConfig`].
pub struct ProcessorConfigBuilder {
    config: ProcessorConfig,
}

impl ProcessorConfigBuilder {
    pub fn default_model(mut self, spec: ModelSpec) -> Self {
        self.config.models.default = spec;
        self
    }

    pub fn fallback_model(mut self, spec: ModelSpec) -> Self {
        self.config.models.fallback = Some(spec);
        self
    }

    pub fn stage_model(mut self, stage: Stage, spec: ModelSpec) -> Self {
        let slot = match stage {
            Stage::TocExtractor => &mut self.config.models.toc_extractor,
            Stage::ContentValidator => &mut self.config.models.content_validator,
            Stage::VisionToc => &mut self.config.models.vision_toc,
            Stage::CaptionParser => &mut self.config.models.caption_parser,
            Stage::CaptionValidator => &mut self.config.models.caption_validator,
        };
        *slot = Some(spec);
        self
    }

    pub fn max_search_pages(mut self, n: u32) -> Self {
        self.config.toc.max_search_pages = n.max(1);
        self
    }

    pub fn validation_threshold(mut self, t: f32) -> Self {
        self.config.toc.validation_threshold = t.clamp(0.0, 1.0);
        self
    }

    pub fn max_validation_retries(mut self, n: u32) -> Self {
        self.config.toc.max_validation_retries = n;
        self
    }

    pub fn validate_structure(mut self, v: bool) -> Self {
        self.config.toc.validate_structure = v;
        self
    }

    pub fn max_title_length(mut self, n: usize) -> Self {
        self.config.toc.max_title_length = n;
        self
    }

    pub fn vision_batches(mut self, first: u32, second: u32) -> Self {
        self.config.vision.first_batch_size = first;
        self.config.vision.second_batch_size = second;
        self
    }

    pub fn caption_batch_size(mut self, n: usize) -> Self {
        self.config.caption.batch_size = n;
        self
    }

    pub fn caption_concurrency(mut self, n: usize) -> Self {
        self.config.caption.concurrency = n.max(1);
        self
    }

    pub fn caption_fallback_retry(mut self, v: bool) -> Self {
        self.config.caption.enable_fallback_retry = v;
        self
    }

    /// Clamped to 10.
    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.completion.max_retries = n.min(10);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.completion.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.completion.max_tokens = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.completion.retry_backoff_ms = ms;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ProcessorConfig, ChapterError> {
        let c = &self.config;
        if c.vision.first_batch_size == 0 {
            return Err(ChapterError::InvalidConfig(
                "Vision first batch size must be ≥ 1".into(),
            ));
        }
        if c.completion.max_tokens == 0 {
            return Err(ChapterError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        if c.models.default.model.is_empty() {
            return Err(ChapterError::InvalidConfig("Default model is empty".into()));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_spec_parse() {
        assert_eq!(
            ModelSpec::parse("anthropic/claude-sonnet-4", "openai"),
            ModelSpec::new("anthropic", "claude-sonnet-4")
        );
        assert_eq!(
            ModelSpec::parse("gpt-4.1", "openai"),
            ModelSpec::new("openai", "gpt-4.1")
        );
    }

    #[test]
    fn resolve_without_fallback_never_escalates() {
        let resolved = ProcessorConfig::default().resolve_models();
        assert!(!resolved.toc_extractor.has_distinct_fallback());
        assert_eq!(resolved.caption_parser.primary, ModelSpec::default());
    }

    #[test]
    fn resolve_applies_stage_override_and_shared_fallback() {
        let config = ProcessorConfig::builder()
            .default_model(ModelSpec::new("openai", "gpt-4.1-nano"))
            .fallback_model(ModelSpec::new("openai", "gpt-4.1"))
            .stage_model(Stage::VisionToc, ModelSpec::new("gemini", "gemini-2.0-flash"))
            .build()
            .unwrap();
        let resolved = config.resolve_models();
        assert_eq!(resolved.vision_toc.primary.provider, "gemini");
        assert_eq!(resolved.vision_toc.fallback.model, "gpt-4.1");
        assert_eq!(resolved.toc_extractor.primary.model, "gpt-4.1-nano");
        let escalated = resolved.caption_parser.escalated();
        assert_eq!(escalated.primary.model, "gpt-4.1");
        assert!(!escalated.has_distinct_fallback());
    }

    #[test]
    fn builder_rejects_zero_first_batch() {
        let err = ProcessorConfig::builder().vision_batches(0, 10).build();
        assert!(err.is_err());
    }

    #[test]
    fn builder_clamps_threshold() {
        let config = ProcessorConfig::builder()
            .validation_threshold(1.7)
            .build()
            .unwrap();
        assert_eq!(config.toc.validation_threshold, 1.0);
    }

    #[test]
    fn builder_clamps_retries() {
        let config = ProcessorConfig::builder().max_retries(500).build().unwrap();
        assert_eq!(config.completion.max_retries, 10);
    }
}
