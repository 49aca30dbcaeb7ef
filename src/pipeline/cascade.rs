use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GenerationParams {
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 4096,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationCall {
    pub model: String,
    pub prompt: String,
    pub params: GenerationParams,
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("response contained no text")]
    EmptyContent,
    #[error("timed out after {0} ms")]
    Timeout(u64),
    #[error("request cancelled")]
    Cancelled,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("could not decode response: {0}")]
    Decode(String),
    #[error("no credential available: {0}")]
    Credential(String),
}

/// One network call per invocation. Implementations must stop work once `cancel` fires.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Runs once before a cascade, e.g. to resolve credentials.
    async fn prepare(&self) -> Result<(), GenerationError> {
        Ok(())
    }

    async fn generate(
        &self,
        call: &GenerationCall,
        cancel: CancellationToken,
    ) -> Result<String, GenerationError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelAttempt {
    pub model_id: String,
    pub error: Option<String>,
}

#[derive(Debug, Error)]
pub enum CascadeError {
    #[error("no models configured")]
    NoModels,
    #[error("all {} models failed; last error from {model}: {last}", .attempts.len())]
    Exhausted {
        attempts: Vec<ModelAttempt>,
        model: String,
        last: String,
    },
    #[error("generation cancelled after {} attempt(s)", .attempts.len())]
    Cancelled { attempts: Vec<ModelAttempt> },
}

impl CascadeError {
    pub fn attempts(&self) -> &[ModelAttempt] {
        match self {
            CascadeError::NoModels => &[],
            CascadeError::Exhausted { attempts, .. } | CascadeError::Cancelled { attempts } => {
                attempts
            }
        }
    }
}

/// Progress hooks. All methods default to no-ops.
pub trait CascadeObserver: Send + Sync {
    fn attempt_started(&self, _model: &str, _index: usize, _total: usize) {}

    fn attempt_failed(&self, _model: &str, _error: &GenerationError) {}

    fn attempt_succeeded(&self, _model: &str, _elapsed: Duration) {}
}

pub struct NoopObserver;

impl CascadeObserver for NoopObserver {}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeOutcome {
    pub model: String,
    pub text: String,
    pub attempts: Vec<ModelAttempt>,
    pub elapsed_ms: u128,
}

/// Tries each model in order, one call at a time, until one returns text.
pub struct ModelCascade {
    backend: Arc<dyn GenerationBackend>,
    models: Vec<String>,
    timeout: Duration,
    params: GenerationParams,
}

impl ModelCascade {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        models: Vec<String>,
        timeout: Duration,
        params: GenerationParams,
    ) -> Self {
        Self {
            backend,
            models,
            timeout,
            params,
        }
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn prepare(&self) -> Result<(), GenerationError> {
        self.backend.prepare().await
    }

    pub async fn run(
        &self,
        prompt: &str,
        parent: &CancellationToken,
        observer: &dyn CascadeObserver,
    ) -> Result<CascadeOutcome, CascadeError> {
        if self.models.is_empty() {
            return Err(CascadeError::NoModels);
        }

        let started = Instant::now();
        let total = self.models.len();
        let mut attempts = Vec::with_capacity(total);
        let mut last_error: Option<(String, String)> = None;

        for (index, model) in self.models.iter().enumerate() {
            if parent.is_cancelled() {
                return Err(CascadeError::Cancelled { attempts });
            }
            observer.attempt_started(model, index, total);
            debug!(model = %model, attempt = index + 1, total, "calling model");

            let call = GenerationCall {
                model: model.clone(),
                prompt: prompt.to_string(),
                params: self.params,
            };
            let attempt_started = Instant::now();
            let result = self.attempt(&call, parent).await;

            match result {
                Ok(text) => {
                    let elapsed = attempt_started.elapsed();
                    observer.attempt_succeeded(model, elapsed);
                    info!(model = %model, elapsed_ms = elapsed.as_millis() as u64, "model succeeded");
                    attempts.push(ModelAttempt {
                        model_id: model.clone(),
                        error: None,
                    });
                    return Ok(CascadeOutcome {
                        model: model.clone(),
                        text,
                        attempts,
                        elapsed_ms: started.elapsed().as_millis(),
                    });
                }
                Err(err) => {
                    observer.attempt_failed(model, &err);
                    let message = err.to_string();
                    attempts.push(ModelAttempt {
                        model_id: model.clone(),
                        error: Some(message.clone()),
                    });
                    if matches!(err, GenerationError::Cancelled) && parent.is_cancelled() {
                        return Err(CascadeError::Cancelled { attempts });
                    }
                    warn!(model = %model, error = %message, "model failed, trying next");
                    last_error = Some((model.clone(), message));
                }
            }
        }

        let (model, last) = last_error.unwrap_or_default();
        Err(CascadeError::Exhausted {
            attempts,
            model,
            last,
        })
    }

    /// One bounded call. The timer cancels a child token so the backend can abort the request.
    async fn attempt(
        &self,
        call: &GenerationCall,
        parent: &CancellationToken,
    ) -> Result<String, GenerationError> {
        let token = parent.child_token();
        let result = tokio::time::timeout(self.timeout, self.backend.generate(call, token.clone())).await;
        match result {
            Ok(Ok(text)) if text.trim().is_empty() => Err(GenerationError::EmptyContent),
            Ok(Ok(text)) => Ok(text),
            Ok(Err(err)) => Err(err),
            Err(_) => {
                token.cancel();
                Err(GenerationError::Timeout(self.timeout.as_millis() as u64))
            }
        }
    }
}
