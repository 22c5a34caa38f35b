//! Caption recovery for images and tables.
//!
//! ```text
//! [Option<text>; n] ──skip None──▶ parse (batched) ──align──▶ validate (batched)
//!                                                                  │
//!                         failing subset ◀── verdict == false ─────┘
//!                               │
//!                               └─▶ fallback model, one caption per call ──▶ overwrite
//! ```
//!
//! The result is keyed by the resource's index in document order, so a
//! resource without caption text never shows up in it.

pub mod parser;
pub mod validator;

use crate::completion::CompletionClient;
use crate::config::{CaptionConfig, CompletionConfig, ResolvedModels};
use crate::error::ChapterError;
use crate::usage::UsageTracker;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

pub use parser::CaptionParser;
pub use validator::CaptionValidator;

/// A parsed caption. `num` is the printed label, e.g. `"Figure 1"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Caption {
    pub full_text: String,
    #[serde(default)]
    pub num: Option<String>,
}

impl Caption {
    pub fn new(full_text: impl Into<String>, num: Option<String>) -> Self {
        Self {
            full_text: full_text.into(),
            num,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Image,
    Table,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Image => "image",
            ResourceKind::Table => "table",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parse paired with the input it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignedCaption {
    pub index: usize,
    pub original: String,
    pub caption: Caption,
}

fn match_key(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Pair a batch's inputs with the captions parsed for it.
///
/// Equal counts pair by position. Otherwise each input is matched by its
/// text against the parsed `fullText`s, in input order, and every parse
/// serves at most one input. Unmatched inputs are dropped.
pub(crate) fn align_parsed(
    batch: &[(usize, String)],
    parsed: Vec<Caption>,
) -> Result<Vec<AlignedCaption>, ChapterError> {
    if parsed.len() == batch.len() {
        return Ok(batch
            .iter()
            .cloned()
            .zip(parsed)
            .map(|((index, original), caption)| AlignedCaption {
                index,
                original,
                caption,
            })
            .collect());
    }

    warn!(
        "Caption count mismatch: {} input(s), {} parsed; matching by text",
        batch.len(),
        parsed.len()
    );
    let mut by_text: HashMap<String, VecDeque<Caption>> = HashMap::new();
    for caption in parsed {
        by_text
            .entry(match_key(&caption.full_text))
            .or_default()
            .push_back(caption);
    }

    let mut kept_inputs = Vec::new();
    let mut kept_captions = Vec::new();
    for (index, original) in batch {
        match by_text
            .get_mut(&match_key(original))
            .and_then(VecDeque::pop_front)
        {
            Some(caption) => {
                kept_inputs.push((*index, original.clone()));
                kept_captions.push(caption);
            }
            None => warn!("Dropping caption #{} with no matching parse: {:?}", index, original),
        }
    }
    if kept_inputs.len() != kept_captions.len() {
        return Err(ChapterError::Internal(format!(
            "caption recovery misaligned: {} inputs vs {} captions",
            kept_inputs.len(),
            kept_captions.len()
        )));
    }
    Ok(kept_inputs
        .into_iter()
        .zip(kept_captions)
        .map(|((index, original), caption)| AlignedCaption {
            index,
            original,
            caption,
        })
        .collect())
}

pub struct CaptionPipeline {
    parser: CaptionParser,
    validator: CaptionValidator,
    /// `None` when fallback retry is disabled.
    fallback: Option<CaptionParser>,
}

impl CaptionPipeline {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        models: &ResolvedModels,
        config: &CaptionConfig,
        params: &CompletionConfig,
        tracker: UsageTracker,
    ) -> Self {
        let parser = CaptionParser::new(
            client.clone(),
            models.caption_parser.clone(),
            params.clone(),
            config.batch_size,
            config.concurrency,
            tracker.clone(),
        );
        let validator = CaptionValidator::new(
            client.clone(),
            models.caption_validator.clone(),
            params.clone(),
            config.batch_size,
            tracker.clone(),
        );
        let fallback = config.enable_fallback_retry.then(|| {
            CaptionParser::new(
                client,
                models.caption_parser.escalated(),
                params.clone(),
                0,
                1,
                tracker,
            )
            .with_component(format!("{}-fallback", parser::COMPONENT))
        });
        Self {
            parser,
            validator,
            fallback,
        }
    }

    /// Captions keyed by resource index. `None` or blank texts are skipped.
    pub async fn process(
        &self,
        texts: &[Option<String>],
        kind: ResourceKind,
    ) -> Result<BTreeMap<usize, Caption>, ChapterError> {
        let items: Vec<(usize, String)> = texts
            .iter()
            .enumerate()
            .filter_map(|(i, t)| {
                t.as_deref()
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(|t| (i, t.to_string()))
            })
            .collect();
        if items.is_empty() {
            return Ok(BTreeMap::new());
        }

        let parsed = self.parser.parse(&items, kind).await?;
        let verdicts = self.validator.validate(&parsed).await?;

        let mut result: BTreeMap<usize, Caption> = parsed
            .iter()
            .map(|a| (a.index, a.caption.clone()))
            .collect();
        let failing: Vec<(usize, String)> = parsed
            .iter()
            .zip(&verdicts)
            .filter(|(_, ok)| !**ok)
            .map(|(a, _)| (a.index, a.original.clone()))
            .collect();
        if failing.is_empty() {
            info!("{} {} caption(s) parsed and validated", result.len(), kind);
            return Ok(result);
        }

        match &self.fallback {
            None => {
                for (index, original) in &failing {
                    warn!(
                        "{} caption #{} failed validation, keeping parse: {:?}",
                        kind, index, original
                    );
                }
            }
            Some(fallback) => {
                info!(
                    "Reparsing {} {} caption(s) with {}",
                    failing.len(),
                    kind,
                    fallback.component()
                );
                match fallback.parse(&failing, kind).await {
                    Ok(reparsed) => {
                        for a in reparsed {
                            result.insert(a.index, a.caption);
                        }
                    }
                    Err(e) => warn!("Fallback caption reparse failed, keeping parses: {}", e),
                }
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::scripted::ScriptedCompletionClient;
    use crate::config::{ModelSpec, ModelsConfig};
    use proptest::prelude::*;
    use serde_json::json;
    use std::io;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct LogCapture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogCapture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LogCapture {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    fn models() -> ResolvedModels {
        ModelsConfig {
            default: ModelSpec::new("openai", "small"),
            fallback: Some(ModelSpec::new("openai", "large")),
            ..Default::default()
        }
        .resolve()
    }

    fn pipeline(client: Arc<ScriptedCompletionClient>, fallback: bool) -> CaptionPipeline {
        let config = CaptionConfig {
            enable_fallback_retry: fallback,
            ..Default::default()
        };
        CaptionPipeline::new(
            client,
            &models(),
            &config,
            &CompletionConfig::default(),
            UsageTracker::new(),
        )
    }

    fn cap(text: &str, num: Option<&str>) -> serde_json::Value {
        json!({"fullText": text, "num": num})
    }

    #[tokio::test]
    async fn three_inputs_two_parses_keeps_matched_pair() {
        let logs = LogCapture::default();
        let sink = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || sink.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let client = Arc::new(ScriptedCompletionClient::new());
        client.push(
            parser::COMPONENT,
            json!({"captions": [cap("Figure 1. Site plan", Some("Figure 1")), cap("Figure 3. Section", Some("Figure 3"))]}),
        );
        client.push(validator::COMPONENT, json!({"results": [true, true]}));

        let texts = vec![
            Some("Figure 1. Site plan".to_string()),
            Some("Figure 2. Elevation".to_string()),
            Some("Figure 3.  Section".to_string()),
        ];
        let out = pipeline(client, true).process(&texts, ResourceKind::Image).await.unwrap();

        assert_eq!(out.len(), 2);
        assert!(!out.contains_key(&1));
        assert_eq!(out[&2].num.as_deref(), Some("Figure 3"));
        let logged = logs.text();
        assert!(logged.contains("Caption count mismatch"));
        assert!(logged.contains("Dropping caption #1"));
    }

    #[tokio::test]
    async fn missing_and_blank_texts_are_skipped() {
        let client = Arc::new(ScriptedCompletionClient::new());
        client.push(parser::COMPONENT, json!({"captions": [cap("Table 1", Some("Table 1"))]}));
        client.push(validator::COMPONENT, json!({"results": [true]}));

        let texts = vec![None, Some("Table 1".to_string()), None, Some("   ".to_string())];
        let out = pipeline(client.clone(), true).process(&texts, ResourceKind::Table).await.unwrap();
        assert_eq!(out.keys().copied().collect::<Vec<_>>(), [1]);
        assert!(client.calls()[0].user_text.contains("Resource type: table"));
    }

    #[tokio::test]
    async fn no_texts_means_no_calls() {
        let client = Arc::new(ScriptedCompletionClient::new());
        let out = pipeline(client.clone(), true)
            .process(&[None, None], ResourceKind::Image)
            .await
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn equal_counts_pair_by_position() {
        let client = Arc::new(ScriptedCompletionClient::new());
        client.push(
            parser::COMPONENT,
            json!({"captions": [cap("A (parsed)", Some("Fig. 1")), cap("B (parsed)", None)]}),
        );
        client.push(validator::COMPONENT, json!({"results": [true, true]}));
        let texts = vec![Some("A".to_string()), Some("B".to_string())];
        let out = pipeline(client, true).process(&texts, ResourceKind::Image).await.unwrap();
        assert_eq!(out[&0].full_text, "A (parsed)");
        assert_eq!(out[&1].full_text, "B (parsed)");
    }

    #[tokio::test]
    async fn failing_subset_is_reparsed_with_fallback() {
        let client = Arc::new(ScriptedCompletionClient::new());
        client.push(
            parser::COMPONENT,
            json!({"captions": [cap("Figure 1. A", Some("Figure 1")), cap("Figure 2. B", Some("Figure 9"))]}),
        );
        client.push(validator::COMPONENT, json!({"results": [true, false]}));
        client.push(
            "caption-parser-fallback",
            json!({"captions": [cap("Figure 2. B", Some("Figure 2"))]}),
        );

        let texts = vec![Some("Figure 1. A".to_string()), Some("Figure 2. B".to_string())];
        let out = pipeline(client.clone(), true).process(&texts, ResourceKind::Image).await.unwrap();
        assert_eq!(out[&0].num.as_deref(), Some("Figure 1"));
        assert_eq!(out[&1].num.as_deref(), Some("Figure 2"));

        let fb = client.calls_for("caption-parser-fallback");
        assert_eq!(fb.len(), 1);
        assert_eq!(fb[0].model, "large");
        assert!(fb[0].user_text.contains("Figure 2. B"));
        assert!(!fb[0].user_text.contains("Figure 1. A"));
    }

    #[tokio::test]
    async fn disabled_fallback_keeps_failing_parse() {
        let client = Arc::new(ScriptedCompletionClient::new());
        client.push(parser::COMPONENT, json!({"captions": [cap("Figure 2. B", Some("Figure 9"))]}));
        client.push(validator::COMPONENT, json!({"results": [false]}));
        let texts = vec![Some("Figure 2. B".to_string())];
        let out = pipeline(client.clone(), false).process(&texts, ResourceKind::Image).await.unwrap();
        assert_eq!(out[&0].num.as_deref(), Some("Figure 9"));
        assert!(client.calls_for("caption-parser-fallback").is_empty());
    }

    #[tokio::test]
    async fn fallback_failure_keeps_parse() {
        let client = Arc::new(ScriptedCompletionClient::new());
        client.push(parser::COMPONENT, json!({"captions": [cap("Figure 2. B", Some("Figure 9"))]}));
        client.push(validator::COMPONENT, json!({"results": [false]}));
        client.push_error("caption-parser-fallback", "overloaded");
        let texts = vec![Some("Figure 2. B".to_string())];
        let out = pipeline(client, true).process(&texts, ResourceKind::Image).await.unwrap();
        assert_eq!(out[&0].num.as_deref(), Some("Figure 9"));
    }

    #[tokio::test]
    async fn validation_failure_is_fatal() {
        let client = Arc::new(ScriptedCompletionClient::new());
        client.push(parser::COMPONENT, json!({"captions": [cap("x", None)]}));
        client.push_error(validator::COMPONENT, "down");
        let err = pipeline(client, true)
            .process(&[Some("x".to_string())], ResourceKind::Image)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "CaptionValidationError");
    }

    #[test]
    fn one_parse_serves_one_duplicate_input() {
        let batch = vec![
            (0, "Photo".to_string()),
            (1, "Photo".to_string()),
            (2, "Map".to_string()),
        ];
        let out = align_parsed(&batch, vec![Caption::new("Photo", Some("Photo 1".into()))]).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].index, 0);
        assert_eq!(out[0].caption.num.as_deref(), Some("Photo 1"));
    }

    #[test]
    fn duplicate_parses_are_used_in_input_order() {
        let batch = vec![
            (0, "Photo".to_string()),
            (1, "Map".to_string()),
            (2, "Photo".to_string()),
        ];
        let parsed = vec![
            Caption::new("Photo", Some("Photo 1".into())),
            Caption::new("Photo", Some("Photo 2".into())),
        ];
        let out = align_parsed(&batch, parsed).unwrap();
        let pairs: Vec<(usize, Option<&str>)> =
            out.iter().map(|a| (a.index, a.caption.num.as_deref())).collect();
        assert_eq!(pairs, [(0, Some("Photo 1")), (2, Some("Photo 2"))]);
    }

    proptest! {
        /// With duplicate texts and duplicate or dropped parses, every kept
        /// input is paired with a parse of its own text, no index is invented
        /// and no parse is handed out twice.
        #[test]
        fn recovery_never_misassigns(
            texts in proptest::collection::vec(prop::sample::select(vec!["a", "b", "c", "d"]), 1..12),
            copies in proptest::collection::vec(0usize..3, 4),
        ) {
            let batch: Vec<(usize, String)> =
                texts.iter().enumerate().map(|(i, t)| (i, t.to_string())).collect();
            let parsed: Vec<Caption> = ["a", "b", "c", "d"]
                .iter()
                .zip(&copies)
                .flat_map(|(t, n)| (0..*n).map(move |k| Caption::new(*t, Some(format!("{t}-{k}")))))
                .collect();
            prop_assume!(parsed.len() != batch.len());

            let out = align_parsed(&batch, parsed).unwrap();
            let mut seen_index = std::collections::HashSet::new();
            let mut seen_num = std::collections::HashSet::new();
            for a in &out {
                prop_assert!(a.index < batch.len());
                prop_assert!(seen_index.insert(a.index));
                prop_assert_eq!(&a.caption.full_text, &batch[a.index].1);
                let num = a.caption.num.clone().unwrap_or_default();
                let prefix = format!("{}-", a.original);
                prop_assert!(num.starts_with(&prefix));
                prop_assert!(seen_num.insert(num));
            }
            for (i, t) in ["a", "b", "c", "d"].iter().enumerate() {
                let inputs = texts.iter().filter(|x| *x == t).count();
                let kept = out.iter().filter(|a| a.original == *t).count();
                prop_assert_eq!(kept, inputs.min(copies[i]));
            }
        }
    }
}
