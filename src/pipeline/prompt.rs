use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::request::{RecommendationRequest, TemplateFamily};

/// Used when the template store cannot provide a template. Carries every placeholder.
pub const FALLBACK_TEMPLATE: &str = "请根据以下信息推荐{mealPeriod}的饮食方案：\n\
日期:{date}, 时间:{time}, 饮食类型:{dietType}, 健康目标:{healthGoal}, 地点:{location}, \
天气:{weather}, 节气:{solarTerm}, 季节:{season}\n\
请使用{language}回答，并严格按照JSON格式输出，包含菜品(dishes)或茶饮(teas)、营养分析(totalNutrition)和建议(tips)。";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to read template {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("template {0} is empty")]
    Empty(PathBuf),
    #[error("template store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn fetch_template(&self, family: TemplateFamily) -> Result<String, TemplateError>;
}

/// Reads `<dir>/food_recommendation_prompt.txt` and `<dir>/tea_recommendation_prompt.txt`.
#[derive(Debug, Clone)]
pub struct FileTemplateStore {
    dir: PathBuf,
}

impl FileTemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl TemplateStore for FileTemplateStore {
    async fn fetch_template(&self, family: TemplateFamily) -> Result<String, TemplateError> {
        let path = self.dir.join(family.file_name());
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| TemplateError::Io {
                path: path.clone(),
                source,
            })?;
        if text.trim().is_empty() {
            return Err(TemplateError::Empty(path));
        }
        Ok(text)
    }
}

/// Fills templates with request fields. Successfully fetched templates are kept per family.
pub struct PromptAssembler {
    store: Arc<dyn TemplateStore>,
    cache: Mutex<HashMap<TemplateFamily, String>>,
}

impl PromptAssembler {
    pub fn new(store: Arc<dyn TemplateStore>) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Never fails: a store error degrades to [`FALLBACK_TEMPLATE`].
    pub async fn assemble(&self, request: &RecommendationRequest) -> String {
        let template = self.template_for(request.template_family()).await;
        fill_template(&template, request)
    }

    async fn template_for(&self, family: TemplateFamily) -> String {
        if let Some(template) = self.cache.lock().await.get(&family) {
            debug!(?family, "template cache hit");
            return template.clone();
        }
        // The lock is not held across the fetch; a concurrent fetch of the same family may win.
        match self.store.fetch_template(family).await {
            Ok(template) => self
                .cache
                .lock()
                .await
                .entry(family)
                .or_insert(template)
                .clone(),
            Err(err) => {
                warn!(?family, error = %err, "template fetch failed, using built-in template");
                FALLBACK_TEMPLATE.to_string()
            }
        }
    }

    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }
}

pub fn fill_template(template: &str, request: &RecommendationRequest) -> String {
    request
        .placeholders()
        .iter()
        .fold(template.to_string(), |text, (name, value)| {
            text.replace(&format!("{{{}}}", name), value)
        })
}
