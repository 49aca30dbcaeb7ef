//! API credential lookup for the generation endpoint.
//!
//! Sources are tried in order: the same-origin key endpoint, the environment, the
//! persisted key file, and finally an interactive prompt when enabled. A miss at any
//! step is logged and the next source is tried.

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::CredentialsConfig;

const ENDPOINT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    Endpoint,
    Environment,
    Stored,
    Interactive,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub key: String,
    pub source: CredentialSource,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("key", &mask(&self.key))
            .field("source", &self.source)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no API key found (endpoint, ${env_var}, {store}, interactive prompt)")]
    NotFound { env_var: String, store: String },
    #[error("failed to persist API key to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Deserialize)]
struct EndpointKey {
    #[serde(rename = "apiKey")]
    api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CredentialResolver {
    endpoint: Option<String>,
    env_var: String,
    store_path: PathBuf,
    interactive: bool,
    client: reqwest::Client,
}

impl CredentialResolver {
    pub fn from_config(config: &CredentialsConfig) -> Self {
        Self {
            endpoint: config
                .endpoint
                .clone()
                .filter(|endpoint| !endpoint.trim().is_empty()),
            env_var: config.env_var.clone(),
            store_path: config.store_path.clone(),
            interactive: config.interactive,
            client: reqwest::Client::new(),
        }
    }

    pub async fn resolve(&self) -> Result<Credential, CredentialError> {
        if let Some(key) = self.from_endpoint().await {
            return Ok(found(key, CredentialSource::Endpoint));
        }
        if let Some(key) = self.from_env() {
            return Ok(found(key, CredentialSource::Environment));
        }
        if let Some(key) = self.from_store().await {
            return Ok(found(key, CredentialSource::Stored));
        }
        if self.interactive {
            if let Some(key) = self.from_prompt().await {
                self.persist(&key).await?;
                return Ok(found(key, CredentialSource::Interactive));
            }
        }
        Err(CredentialError::NotFound {
            env_var: self.env_var.clone(),
            store: self.store_path.display().to_string(),
        })
    }

    /// Writes `key` to the store file, creating parent directories.
    pub async fn persist(&self, key: &str) -> Result<(), CredentialError> {
        let persist_err = |source| CredentialError::Persist {
            path: self.store_path.clone(),
            source,
        };
        if let Some(parent) = self.store_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(persist_err)?;
            }
        }
        tokio::fs::write(&self.store_path, format!("{}\n", key.trim()))
            .await
            .map_err(persist_err)?;
        info!(path = %self.store_path.display(), "stored API key");
        Ok(())
    }

    async fn from_endpoint(&self) -> Option<String> {
        let endpoint = self.endpoint.as_ref()?;
        let response = match self
            .client
            .get(endpoint)
            .timeout(ENDPOINT_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!(endpoint = %endpoint, error = %err, "key endpoint unreachable");
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(endpoint = %endpoint, status = %response.status(), "key endpoint refused");
            return None;
        }
        match response.json::<EndpointKey>().await {
            Ok(body) => non_blank(body.api_key),
            Err(err) => {
                warn!(endpoint = %endpoint, error = %err, "key endpoint returned malformed body");
                None
            }
        }
    }

    fn from_env(&self) -> Option<String> {
        let key = non_blank(env::var(&self.env_var).ok());
        if key.is_none() {
            debug!(env_var = %self.env_var, "API key not set in environment");
        }
        key
    }

    async fn from_store(&self) -> Option<String> {
        match tokio::fs::read_to_string(&self.store_path).await {
            Ok(contents) => non_blank(Some(contents)),
            Err(err) => {
                debug!(path = %self.store_path.display(), error = %err, "no stored API key");
                None
            }
        }
    }

    async fn from_prompt(&self) -> Option<String> {
        let env_var = self.env_var.clone();
        let entered = tokio::task::spawn_blocking(move || -> io::Result<String> {
            let mut stderr = io::stderr();
            write!(stderr, "Enter API key (or set {}): ", env_var)?;
            stderr.flush()?;
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
            Ok(line)
        })
        .await;
        match entered {
            Ok(Ok(line)) => non_blank(Some(line)),
            Ok(Err(err)) => {
                warn!(error = %err, "failed to read API key from prompt");
                None
            }
            Err(err) => {
                warn!(error = %err, "API key prompt task failed");
                None
            }
        }
    }
}

fn found(key: String, source: CredentialSource) -> Credential {
    info!(?source, key = %mask(&key), "resolved API key");
    Credential { key, source }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// `sk-a…9f` style rendering for logs.
pub fn mask(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{}…{}", head, tail)
}
