use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use shiling::calendar::{CalendarMoment, TemporalEngine};
use shiling::pipeline::prompt::FALLBACK_TEMPLATE;
use shiling::pipeline::{
    CachedRecommendation, CascadeError, CascadeObserver, DietType, FileTemplateStore,
    GenerationBackend, GenerationCall, GenerationError, GenerationParams, ItemKind, MealPeriod,
    ModelCascade, NoopObserver, PipelineError, PromptAssembler, RecommendationCache,
    RecommendationResult, RecommendationSelections, RecommendationService, RequestBuilder,
    TemplateError, TemplateFamily, TemplateStore, TranslationCache,
};
use shiling::Language;
use tokio_util::sync::CancellationToken;

type Responder = dyn Fn(&GenerationCall) -> Result<String, GenerationError> + Send + Sync;

struct FakeBackend {
    respond: Box<Responder>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    models: Mutex<Vec<String>>,
    credential_missing: bool,
}

impl FakeBackend {
    fn new(
        respond: impl Fn(&GenerationCall) -> Result<String, GenerationError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            models: Mutex::new(Vec::new()),
            credential_missing: false,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationBackend for FakeBackend {
    async fn prepare(&self) -> Result<(), GenerationError> {
        if self.credential_missing {
            return Err(GenerationError::Credential("no key configured".to_string()));
        }
        Ok(())
    }

    async fn generate(
        &self,
        call: &GenerationCall,
        _cancel: CancellationToken,
    ) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(call.prompt.clone());
        self.models.lock().unwrap().push(call.model.clone());
        (self.respond)(call)
    }
}

/// Never answers; records the token it was handed.
#[derive(Default)]
struct HangingBackend {
    tokens: Mutex<Vec<CancellationToken>>,
}

#[async_trait]
impl GenerationBackend for HangingBackend {
    async fn generate(
        &self,
        _call: &GenerationCall,
        cancel: CancellationToken,
    ) -> Result<String, GenerationError> {
        self.tokens.lock().unwrap().push(cancel.clone());
        cancel.cancelled().await;
        Err(GenerationError::Cancelled)
    }
}

/// Answers after a long delay unless cancelled first.
struct SlowBackend;

#[async_trait]
impl GenerationBackend for SlowBackend {
    async fn generate(
        &self,
        _call: &GenerationCall,
        cancel: CancellationToken,
    ) -> Result<String, GenerationError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(GenerationError::Cancelled),
            _ = tokio::time::sleep(Duration::from_secs(30)) => Ok("late".to_string()),
        }
    }
}

#[derive(Default)]
struct RecordingObserver {
    started: AtomicUsize,
    failed: AtomicUsize,
    succeeded: AtomicUsize,
}

impl CascadeObserver for RecordingObserver {
    fn attempt_started(&self, _model: &str, _index: usize, _total: usize) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }

    fn attempt_failed(&self, _model: &str, _error: &GenerationError) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn attempt_succeeded(&self, _model: &str, _elapsed: Duration) {
        self.succeeded.fetch_add(1, Ordering::SeqCst);
    }
}

struct CountingStore {
    fetches: AtomicUsize,
    template: Option<String>,
}

impl CountingStore {
    fn serving(template: &str) -> Self {
        Self {
            fetches: AtomicUsize::new(0),
            template: Some(template.to_string()),
        }
    }

    fn broken() -> Self {
        Self {
            fetches: AtomicUsize::new(0),
            template: None,
        }
    }
}

#[async_trait]
impl TemplateStore for CountingStore {
    async fn fetch_template(&self, family: TemplateFamily) -> Result<String, TemplateError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        match &self.template {
            Some(template) => Ok(format!("[{:?}] {}", family, template)),
            None => Err(TemplateError::Unavailable("store offline".to_string())),
        }
    }
}

fn models(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

fn cascade(backend: Arc<dyn GenerationBackend>, names: &[&str], timeout_ms: u64) -> ModelCascade {
    ModelCascade::new(
        backend,
        models(names),
        Duration::from_millis(timeout_ms),
        GenerationParams::default(),
    )
}

fn moment() -> CalendarMoment {
    CalendarMoment::from_ymd_hm(2025, 1, 5, 12, 0).unwrap()
}

fn service_with(backend: Arc<FakeBackend>, store: Arc<CountingStore>) -> RecommendationService {
    RecommendationService::new(
        TemporalEngine::fallback_only(),
        RequestBuilder::default(),
        PromptAssembler::new(store),
        cascade(backend, &["m1", "m2"], 1_000),
    )
}

const DISHES: &str = r#"```json
{"dishes": [{"name": "山药排骨汤", "recipe": ["慢炖"]}], "totalNutrition": {"calories": 480}}
```"#;

const TRANSLATED: &str = r#"{"dishes": [{"name": "Yam and Pork Rib Soup", "recipe": ["Simmer slowly"]}]}"#;

fn answer_or_translate(call: &GenerationCall) -> Result<String, GenerationError> {
    if call.prompt.starts_with("Translate") {
        Ok(TRANSLATED.to_string())
    } else {
        Ok(DISHES.to_string())
    }
}

fn sample_result(name: &str) -> RecommendationResult {
    shiling::pipeline::normalize(
        &json!({"dishes": [{"name": name}]}).to_string(),
        ItemKind::Dish,
        Language::Zh,
    )
}

fn cached(sequence: u64, name: &str) -> CachedRecommendation {
    let context = TemporalEngine::fallback_only().context(&moment());
    CachedRecommendation {
        sequence,
        request: RequestBuilder::default().build(&RecommendationSelections::default(), &context),
        model: "m1".to_string(),
        result: sample_result(name),
    }
}

#[tokio::test]
async fn cascade_tries_every_model_in_order() {
    let backend = Arc::new(FakeBackend::new(|call| {
        Err(GenerationError::Status {
            status: 500,
            message: format!("boom from {}", call.model),
        })
    }));
    let cascade = cascade(backend.clone(), &["m1", "m2", "m3"], 1_000);

    let err = cascade
        .run("prompt", &CancellationToken::new(), &NoopObserver)
        .await
        .unwrap_err();

    assert_eq!(backend.calls(), 3);
    assert_eq!(*backend.models.lock().unwrap(), models(&["m1", "m2", "m3"]));
    assert_eq!(err.attempts().len(), 3);
    assert!(err.attempts().iter().all(|attempt| attempt.error.is_some()));
    let message = err.to_string();
    assert!(message.starts_with("all 3 models failed"), "{}", message);
    assert!(message.contains("boom from m3"), "{}", message);
    match err {
        CascadeError::Exhausted { model, .. } => assert_eq!(model, "m3"),
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn cascade_stops_at_first_answer() {
    let backend = Arc::new(FakeBackend::new(|call| match call.model.as_str() {
        "m1" => Err(GenerationError::Transport("connection reset".to_string())),
        "m2" => Ok("answer".to_string()),
        _ => Ok("should not be reached".to_string()),
    }));
    let cascade = cascade(backend.clone(), &["m1", "m2", "m3"], 1_000);
    let observer = RecordingObserver::default();

    let outcome = cascade
        .run("prompt", &CancellationToken::new(), &observer)
        .await
        .unwrap();

    assert_eq!(outcome.model, "m2");
    assert_eq!(outcome.text, "answer");
    assert_eq!(backend.calls(), 2);
    assert_eq!(outcome.attempts.len(), 2);
    assert!(outcome.attempts[0].error.is_some());
    assert!(outcome.attempts[1].error.is_none());
    assert_eq!(observer.started.load(Ordering::SeqCst), 2);
    assert_eq!(observer.failed.load(Ordering::SeqCst), 1);
    assert_eq!(observer.succeeded.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn blank_answer_counts_as_failure() {
    let backend = Arc::new(FakeBackend::new(|call| match call.model.as_str() {
        "m1" => Ok("  \n ".to_string()),
        _ => Ok("{}".to_string()),
    }));
    let outcome = cascade(backend, &["m1", "m2"], 1_000)
        .run("prompt", &CancellationToken::new(), &NoopObserver)
        .await
        .unwrap();

    assert_eq!(outcome.model, "m2");
    assert_eq!(
        outcome.attempts[0].error.as_deref(),
        Some("response contained no text")
    );
}

#[tokio::test]
async fn empty_model_list_is_rejected() {
    let backend = Arc::new(FakeBackend::new(|_| Ok("x".to_string())));
    let err = cascade(backend.clone(), &[], 1_000)
        .run("prompt", &CancellationToken::new(), &NoopObserver)
        .await
        .unwrap_err();
    assert!(matches!(err, CascadeError::NoModels));
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn timeout_cancels_the_attempt_token() {
    shiling::logging::init_test();
    let backend = Arc::new(HangingBackend::default());
    let cascade = cascade(backend.clone(), &["slow-a", "slow-b"], 30);

    let err = cascade
        .run("prompt", &CancellationToken::new(), &NoopObserver)
        .await
        .unwrap_err();

    let tokens = backend.tokens.lock().unwrap();
    assert_eq!(tokens.len(), 2);
    assert!(tokens.iter().all(CancellationToken::is_cancelled));
    assert_eq!(err.attempts().len(), 2);
    assert!(err.to_string().contains("timed out after 30 ms"), "{}", err);
}

#[tokio::test]
async fn parent_cancellation_stops_the_cascade() {
    let cascade = cascade(Arc::new(SlowBackend), &["m1", "m2"], 10_000);
    let parent = CancellationToken::new();
    let trigger = parent.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = cascade.run("prompt", &parent, &NoopObserver).await.unwrap_err();

    match err {
        CascadeError::Cancelled { attempts } => {
            assert_eq!(attempts.len(), 1);
            assert_eq!(attempts[0].model_id, "m1");
        }
        other => panic!("unexpected error: {}", other),
    }

    let backend = Arc::new(FakeBackend::new(|_| Ok("x".to_string())));
    let already = CancellationToken::new();
    already.cancel();
    let err = cascade_with(backend.clone())
        .run("prompt", &already, &NoopObserver)
        .await
        .unwrap_err();
    assert!(matches!(err, CascadeError::Cancelled { ref attempts } if attempts.is_empty()));
    assert_eq!(backend.calls(), 0);
}

fn cascade_with(backend: Arc<FakeBackend>) -> ModelCascade {
    cascade(backend, &["m1"], 1_000)
}

#[tokio::test]
async fn prompt_falls_back_when_store_fails() {
    let store = Arc::new(CountingStore::broken());
    let assembler = PromptAssembler::new(store.clone());
    let context = TemporalEngine::fallback_only().context(&moment());
    let request = RequestBuilder::default().build(&RecommendationSelections::default(), &context);

    let first = assembler.assemble(&request).await;
    let second = assembler.assemble(&request).await;

    assert_eq!(first, second);
    assert!(first.contains("2025-01-05"));
    assert!(first.contains("今日小寒"));
    assert!(first.contains("冬季"));
    assert!(!first.contains('{'), "unfilled placeholder in {}", first);
    // Failures are not cached, so the store is asked again.
    assert_eq!(store.fetches.load(Ordering::SeqCst), 2);
    assert!(FALLBACK_TEMPLATE.contains("{healthGoal}"));
}

#[tokio::test]
async fn fetched_templates_are_cached_per_family() {
    let store = Arc::new(CountingStore::serving("{solarTerm} {mealPeriod} {language}"));
    let assembler = PromptAssembler::new(store.clone());
    let context = TemporalEngine::fallback_only().context(&moment());
    let builder = RequestBuilder::default();

    let food = builder.build(&RecommendationSelections::default(), &context);
    let tea = builder.build(
        &RecommendationSelections {
            diet_type: DietType::Tea,
            meal_period: Some(MealPeriod::AfternoonTea),
            language: Some(Language::En),
            ..RecommendationSelections::default()
        },
        &context,
    );

    assert_eq!(assembler.assemble(&food).await, "[Food] 今日小寒 午餐 中文");
    assembler.assemble(&food).await;
    assert_eq!(
        assembler.assemble(&tea).await,
        "[Tea] today's Minor Cold afternoon tea English"
    );
    assert_eq!(store.fetches.load(Ordering::SeqCst), 2);

    assembler.clear_cache().await;
    assembler.assemble(&food).await;
    assert_eq!(store.fetches.load(Ordering::SeqCst), 3);
}

/// The food template waits on `release`; tea answers at once.
#[derive(Default)]
struct GatedStore {
    food_started: tokio::sync::Notify,
    release: tokio::sync::Notify,
}

#[async_trait]
impl TemplateStore for GatedStore {
    async fn fetch_template(&self, family: TemplateFamily) -> Result<String, TemplateError> {
        match family {
            TemplateFamily::Food => {
                self.food_started.notify_one();
                self.release.notified().await;
                Ok("food {solarTerm}".to_string())
            }
            TemplateFamily::Tea => Ok("tea {solarTerm}".to_string()),
        }
    }
}

#[tokio::test]
async fn slow_template_fetch_does_not_hold_up_other_families() {
    let store = Arc::new(GatedStore::default());
    let assembler = Arc::new(PromptAssembler::new(store.clone()));
    let context = TemporalEngine::fallback_only().context(&moment());
    let food = RequestBuilder::default().build(&RecommendationSelections::default(), &context);
    let tea = RequestBuilder::default().build(
        &RecommendationSelections {
            diet_type: DietType::Tea,
            ..RecommendationSelections::default()
        },
        &context,
    );

    let pending = tokio::spawn({
        let assembler = assembler.clone();
        async move { assembler.assemble(&food).await }
    });
    store.food_started.notified().await;

    let tea_prompt = tokio::time::timeout(Duration::from_secs(1), assembler.assemble(&tea))
        .await
        .expect("tea prompt waited on the food fetch");
    assert_eq!(tea_prompt, "tea 今日小寒");

    store.release.notify_one();
    assert_eq!(pending.await.unwrap(), "food 今日小寒");
}

#[tokio::test]
async fn file_store_reads_family_templates() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("tea_recommendation_prompt.txt"), "茶：{solarTerm}").unwrap();
    std::fs::write(dir.path().join("food_recommendation_prompt.txt"), "  \n").unwrap();
    let store = FileTemplateStore::new(dir.path());

    assert_eq!(store.fetch_template(TemplateFamily::Tea).await.unwrap(), "茶：{solarTerm}");
    assert!(matches!(
        store.fetch_template(TemplateFamily::Food).await,
        Err(TemplateError::Empty(_))
    ));

    let missing = FileTemplateStore::new(dir.path().join("absent"));
    assert!(matches!(
        missing.fetch_template(TemplateFamily::Tea).await,
        Err(TemplateError::Io { .. })
    ));
}

#[test]
fn request_builder_applies_defaults() {
    let context = TemporalEngine::fallback_only().context(&moment());
    let request = RequestBuilder::default().build(
        &RecommendationSelections {
            location: Some("  ".to_string()),
            weather: Some("小雪".to_string()),
            ..RecommendationSelections::default()
        },
        &context,
    );

    assert_eq!(request.date, "2025-01-05");
    assert_eq!(request.time, "12:00");
    assert_eq!(request.meal_period, MealPeriod::Lunch);
    assert_eq!(request.health_goal, "日常养生");
    assert_eq!(request.location, "未知地点");
    assert_eq!(request.weather, "小雪");
    assert_eq!(request.solar_term_descriptor, "今日小寒");
    assert_eq!(request.season, "冬季");
    assert_eq!(request.language, Language::Zh);
    assert_eq!(request.template_family(), TemplateFamily::Food);

    assert_eq!(MealPeriod::for_hour(7), MealPeriod::Breakfast);
    assert_eq!(MealPeriod::for_hour(18), MealPeriod::Dinner);
    assert_eq!(MealPeriod::for_hour(2), MealPeriod::Lunch);
    assert_eq!(DietType::from_str("茶饮"), Some(DietType::Tea));
    assert_eq!(DietType::Tea.template_family(), TemplateFamily::Tea);
}

#[tokio::test]
async fn newer_results_are_not_overwritten() {
    let cache = RecommendationCache::new();
    assert!(cache.store_if_newer(cached(2, "新")).await);
    assert!(!cache.store_if_newer(cached(1, "旧")).await);
    assert_eq!(cache.latest().await.unwrap().sequence, 2);

    cache.store(cached(1, "旧")).await;
    assert_eq!(cache.latest().await.unwrap().sequence, 1);

    cache.clear().await;
    assert!(cache.latest().await.is_none());
}

#[tokio::test]
async fn translation_cache_drops_older_sources() {
    let cache = TranslationCache::new();
    let first = cached(1, "甲");
    let second = cached(2, "乙");

    cache.insert(&first, Language::En, sample_result("A")).await;
    assert!(cache.get(&first, Language::En).await.is_some());
    assert!(cache.get(&first, Language::Zh).await.is_none());

    cache.insert(&second, Language::En, sample_result("B")).await;
    assert_eq!(cache.len().await, 1);
    assert!(cache.get(&first, Language::En).await.is_none());
    assert_eq!(
        cache.get(&second, Language::En).await.unwrap().item_names(),
        vec!["B"]
    );
}

#[tokio::test]
async fn service_recommends_and_caches() {
    shiling::logging::init_test();
    let backend = Arc::new(FakeBackend::new(answer_or_translate));
    let store = Arc::new(CountingStore::serving("{date} {solarTerm} {dietType}"));
    let service = service_with(backend.clone(), store);

    let outcome = service
        .recommend(
            &moment(),
            &RecommendationSelections::default(),
            &CancellationToken::new(),
            &NoopObserver,
        )
        .await
        .unwrap();

    assert_eq!(outcome.sequence, 1);
    assert!(outcome.cached);
    assert_eq!(outcome.model, "m1");
    assert_eq!(outcome.result.item_names(), vec!["山药排骨汤"]);
    assert_eq!(outcome.result.total_nutrition.calories, 480.0);
    assert_eq!(outcome.context.lunar.display, "2024年腊月初七");
    assert_eq!(
        backend.prompts.lock().unwrap()[0],
        "[Food] 2025-01-05 今日小寒 均衡饮食"
    );

    let latest = service.latest().await.unwrap();
    assert_eq!(latest.sequence, 1);
    assert_eq!(latest.model, "m1");
    assert_eq!(service.models(), models(&["m1", "m2"]).as_slice());
}

#[tokio::test]
async fn translation_is_memoized_per_result() {
    let backend = Arc::new(FakeBackend::new(answer_or_translate));
    let service = service_with(backend.clone(), Arc::new(CountingStore::broken()));
    let cancel = CancellationToken::new();
    let selections = RecommendationSelections::default();

    service
        .recommend(&moment(), &selections, &cancel, &NoopObserver)
        .await
        .unwrap();
    let translated = service
        .translate(Language::En, &cancel, &NoopObserver)
        .await
        .unwrap();
    assert_eq!(translated.item_names(), vec!["Yam and Pork Rib Soup"]);
    assert_eq!(backend.calls(), 2);

    let prompts = backend.prompts.lock().unwrap().clone();
    assert!(prompts[1].contains("山药排骨汤"));
    assert!(prompts[1].contains("\"dishes\""));

    service
        .translate(Language::En, &cancel, &NoopObserver)
        .await
        .unwrap();
    assert_eq!(backend.calls(), 2);

    let second = service
        .recommend(&moment(), &selections, &cancel, &NoopObserver)
        .await
        .unwrap();
    assert_eq!(second.sequence, 2);
    service
        .translate(Language::En, &cancel, &NoopObserver)
        .await
        .unwrap();
    assert_eq!(backend.calls(), 4);
}

#[tokio::test]
async fn translation_needs_a_cached_result() {
    let backend = Arc::new(FakeBackend::new(answer_or_translate));
    let service = service_with(backend.clone(), Arc::new(CountingStore::broken()));

    let err = service
        .translate(Language::En, &CancellationToken::new(), &NoopObserver)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::NothingToTranslate));
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn unparseable_translation_is_an_error() {
    let backend = Arc::new(FakeBackend::new(|call| {
        if call.prompt.starts_with("Translate") {
            Ok("Sorry, I cannot help with that.".to_string())
        } else {
            Ok(DISHES.to_string())
        }
    }));
    let service = service_with(backend, Arc::new(CountingStore::broken()));
    let cancel = CancellationToken::new();

    service
        .recommend(&moment(), &RecommendationSelections::default(), &cancel, &NoopObserver)
        .await
        .unwrap();
    let err = service
        .translate(Language::En, &cancel, &NoopObserver)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Translation(_)));
}

#[tokio::test]
async fn missing_credential_fails_before_any_call() {
    let mut backend = FakeBackend::new(answer_or_translate);
    backend.credential_missing = true;
    let backend = Arc::new(backend);
    let service = service_with(backend.clone(), Arc::new(CountingStore::broken()));

    let err = service
        .recommend(
            &moment(),
            &RecommendationSelections::default(),
            &CancellationToken::new(),
            &NoopObserver,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Credential(_)));
    assert_eq!(backend.calls(), 0);
    assert!(service.latest().await.is_none());
}

#[tokio::test]
async fn exhausted_cascade_surfaces_as_pipeline_error() {
    let backend = Arc::new(FakeBackend::new(|_| {
        Err(GenerationError::Status {
            status: 429,
            message: "rate limited".to_string(),
        })
    }));
    let service = service_with(backend.clone(), Arc::new(CountingStore::broken()));

    let err = service
        .recommend(
            &moment(),
            &RecommendationSelections::default(),
            &CancellationToken::new(),
            &NoopObserver,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Cascade(CascadeError::Exhausted { .. })));
    assert!(err.to_string().contains("HTTP 429: rate limited"));
    assert_eq!(backend.calls(), 2);
}
