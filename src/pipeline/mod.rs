//! Recommendation pipeline: request builder, prompt assembler, model cascade,
//! response normalizer, result cache and translator.

pub mod cache;
pub mod cascade;
pub mod normalize;
pub mod prompt;
pub mod request;
pub mod result;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};

use crate::calendar::{CalendarMoment, TemporalContext, TemporalEngine};
use crate::config::ShilingConfig;
use crate::credentials::CredentialResolver;
use crate::generation_client::HttpGenerationBackend;
use crate::Language;

pub use cache::{CachedRecommendation, RecommendationCache, TranslationCache};
pub use cascade::{
    CascadeError, CascadeObserver, CascadeOutcome, GenerationBackend, GenerationCall,
    GenerationError, GenerationParams, ModelAttempt, ModelCascade, NoopObserver,
};
pub use normalize::normalize;
pub use prompt::{FileTemplateStore, PromptAssembler, TemplateError, TemplateStore};
pub use request::{
    DietType, MealPeriod, RecommendationRequest, RecommendationSelections, RequestBuilder,
    TemplateFamily,
};
pub use result::{ExtractionStrategy, Item, ItemKind, Nutrition, RecommendationResult};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("generation credential unavailable: {0}")]
    Credential(String),
    #[error(transparent)]
    Cascade(#[from] CascadeError),
    #[error("no recommendation has been generated yet")]
    NothingToTranslate,
    #[error("translation failed: {0}")]
    Translation(String),
    #[error("failed to encode recommendation: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationOutcome {
    pub sequence: u64,
    pub context: TemporalContext,
    pub request: RecommendationRequest,
    pub model: String,
    pub attempts: Vec<ModelAttempt>,
    pub elapsed_ms: u128,
    pub result: RecommendationResult,
    /// False when a later request already replaced the cached result.
    pub cached: bool,
}

/// Wires the temporal engine to the generation cascade and keeps the latest result.
pub struct RecommendationService {
    engine: TemporalEngine,
    builder: RequestBuilder,
    assembler: PromptAssembler,
    cascade: ModelCascade,
    cache: RecommendationCache,
    translations: TranslationCache,
    sequence: AtomicU64,
}

impl RecommendationService {
    pub fn new(
        engine: TemporalEngine,
        builder: RequestBuilder,
        assembler: PromptAssembler,
        cascade: ModelCascade,
    ) -> Self {
        Self {
            engine,
            builder,
            assembler,
            cascade,
            cache: RecommendationCache::new(),
            translations: TranslationCache::new(),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &ShilingConfig) -> Result<Self, String> {
        let engine = TemporalEngine::from_config(&config.calendar)?;
        let backend = HttpGenerationBackend::from_config(
            &config.generation,
            CredentialResolver::from_config(&config.credentials),
        )?;
        let cascade = ModelCascade::new(
            Arc::new(backend),
            config.generation.models.clone(),
            Duration::from_millis(config.generation.timeout_ms),
            GenerationParams {
                temperature: config.generation.temperature,
                max_tokens: config.generation.max_tokens,
            },
        );
        Ok(Self::new(
            engine,
            RequestBuilder::new(config.defaults.clone()),
            PromptAssembler::new(Arc::new(FileTemplateStore::new(&config.templates.dir))),
            cascade,
        ))
    }

    pub fn engine(&self) -> &TemporalEngine {
        &self.engine
    }

    pub fn models(&self) -> &[String] {
        self.cascade.models()
    }

    pub fn context(&self, moment: &CalendarMoment) -> TemporalContext {
        self.engine.context(moment)
    }

    pub async fn latest(&self) -> Option<CachedRecommendation> {
        self.cache.latest().await
    }

    pub async fn recommend(
        &self,
        moment: &CalendarMoment,
        selections: &RecommendationSelections,
        cancel: &CancellationToken,
        observer: &dyn CascadeObserver,
    ) -> Result<RecommendationOutcome, PipelineError> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let span = info_span!("recommendation", sequence);
        async move {
            let context = self.engine.context(moment);
            let request = self.builder.build(selections, &context);
            info!(
                date = %request.date,
                time = %request.time,
                solar_term = %request.solar_term_descriptor,
                family = ?request.template_family(),
                "building recommendation"
            );
            let prompt = self.assembler.assemble(&request).await;

            self.cascade
                .prepare()
                .await
                .map_err(|err| PipelineError::Credential(err.to_string()))?;
            let outcome = self.cascade.run(&prompt, cancel, observer).await?;

            let result = normalize(
                &outcome.text,
                request.template_family().item_kind(),
                request.language,
            );
            info!(
                model = %outcome.model,
                items = result.items.len(),
                extraction = ?result.extraction,
                degraded = result.degraded,
                "recommendation ready"
            );

            let cached = self
                .cache
                .store_if_newer(CachedRecommendation {
                    sequence,
                    request: request.clone(),
                    model: outcome.model.clone(),
                    result: result.clone(),
                })
                .await;
            if !cached {
                info!("a newer recommendation is already cached, keeping it");
            }

            Ok(RecommendationOutcome {
                sequence,
                context,
                request,
                model: outcome.model,
                attempts: outcome.attempts,
                elapsed_ms: outcome.elapsed_ms,
                result,
                cached,
            })
        }
        .instrument(span)
        .await
    }

    /// Re-renders the cached result in `language` through the same cascade.
    pub async fn translate(
        &self,
        language: Language,
        cancel: &CancellationToken,
        observer: &dyn CascadeObserver,
    ) -> Result<RecommendationResult, PipelineError> {
        let source = self
            .cache
            .latest()
            .await
            .ok_or(PipelineError::NothingToTranslate)?;
        let span = info_span!("translation", sequence = source.sequence, language = language.code());
        async move {
            if let Some(translated) = self.translations.get(&source, language).await {
                info!("translation cache hit");
                return Ok(translated);
            }

            let payload = source
                .result
                .to_source_value()
                .and_then(|value| serde_json::to_string_pretty(&value))
                .map_err(|err| PipelineError::Encode(err.to_string()))?;
            let prompt = translation_prompt(&payload, language);

            self.cascade
                .prepare()
                .await
                .map_err(|err| PipelineError::Credential(err.to_string()))?;
            let outcome = self.cascade.run(&prompt, cancel, observer).await?;
            let translated = normalize(&outcome.text, source.result.kind, language);
            if translated.degraded {
                return Err(PipelineError::Translation(format!(
                    "{} returned content that could not be parsed",
                    outcome.model
                )));
            }

            self.translations
                .insert(&source, language, translated.clone())
                .await;
            info!(model = %outcome.model, "translation ready");
            Ok(translated)
        }
        .instrument(span)
        .await
    }
}

pub fn translation_prompt(payload: &str, language: Language) -> String {
    match language {
        Language::Zh => format!(
            "请将以下JSON中的所有文本内容翻译为中文。保持JSON结构、字段名和数值不变，只输出JSON，不要添加任何说明。\n\n```json\n{}\n```",
            payload
        ),
        Language::En => format!(
            "Translate every text value in the following JSON into English. Keep the structure, keys and numbers unchanged. Output JSON only, with no commentary.\n\n```json\n{}\n```",
            payload
        ),
    }
}
