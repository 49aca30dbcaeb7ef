use serde_json::json;
use shiling::config::CredentialsConfig;
use shiling::credentials::{mask, CredentialError, CredentialResolver, CredentialSource};
use shiling::generation_client::{error_message, extract_text, ApiStyle};
use shiling::{Language, ShilingConfig};

const UNSET_KEY_VAR: &str = "SHILING_TEST_KEY_THAT_IS_NEVER_SET";

fn credentials_at(path: std::path::PathBuf) -> CredentialsConfig {
    CredentialsConfig {
        endpoint: None,
        env_var: UNSET_KEY_VAR.to_string(),
        store_path: path,
        interactive: false,
    }
}

#[test]
fn partial_config_keeps_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shiling.toml");
    std::fs::write(
        &path,
        r#"
[generation]
models = ["glm-4-flash"]
timeout_ms = 5000

[defaults]
language = "en"
"#,
    )
    .unwrap();

    let (config, loaded_from) = ShilingConfig::load(Some(path.clone())).unwrap();

    assert_eq!(loaded_from, Some(path));
    assert_eq!(config.generation.models, vec!["glm-4-flash".to_string()]);
    assert_eq!(config.generation.timeout_ms, 5000);
    assert_eq!(config.generation.api_style, ApiStyle::Anthropic);
    assert_eq!(config.generation.max_tokens, 4096);
    assert_eq!(config.defaults.language, Language::En);
    assert_eq!(config.defaults.location, "未知地点");
    assert_eq!(config.credentials.env_var, "ZHIPU_API_KEY");
    assert!(config.calendar.term_table.is_none());
}

#[test]
fn invalid_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shiling.toml");

    std::fs::write(&path, "[generation]\nmodels = []\n").unwrap();
    let err = ShilingConfig::load(Some(path.clone())).unwrap_err();
    assert!(err.contains("generation.models"), "{}", err);

    std::fs::write(&path, "[generation\nmodels = ").unwrap();
    let err = ShilingConfig::load(Some(path)).unwrap_err();
    assert!(err.starts_with("failed to parse config"), "{}", err);
}

#[test]
fn written_config_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("shiling.toml");

    let mut config = ShilingConfig::default();
    config.generation.models = vec!["a".to_string(), "b".to_string()];
    config.generation.api_style = ApiStyle::Openai;
    config.calendar.term_table = Some("config/solar_terms.json".into());
    config.write(&path).unwrap();

    let (loaded, _) = ShilingConfig::load(Some(path)).unwrap();
    assert_eq!(loaded.generation.models, config.generation.models);
    assert_eq!(loaded.generation.api_style, ApiStyle::Openai);
    assert_eq!(loaded.calendar.term_table, config.calendar.term_table);
}

#[test]
fn missing_config_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let (config, _) = ShilingConfig::load(Some(dir.path().join("absent.toml"))).unwrap();
    assert_eq!(config.generation.models.len(), 3);
    assert_eq!(config.generation.models[0], "glm-4.7");
}

#[tokio::test]
async fn stored_key_is_found() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("api_key");
    std::fs::write(&path, "  sk-test-1234567890\n").unwrap();

    let credential = CredentialResolver::from_config(&credentials_at(path))
        .resolve()
        .await
        .unwrap();

    assert_eq!(credential.key, "sk-test-1234567890");
    assert_eq!(credential.source, CredentialSource::Stored);
    assert!(!format!("{:?}", credential).contains("1234567890"));
}

#[tokio::test]
async fn missing_key_reports_every_source() {
    let dir = tempfile::tempdir().unwrap();
    let resolver = CredentialResolver::from_config(&credentials_at(dir.path().join("none")));

    let err = resolver.resolve().await.unwrap_err();

    assert!(matches!(err, CredentialError::NotFound { .. }));
    assert!(err.to_string().contains(UNSET_KEY_VAR));
}

#[tokio::test]
async fn persisted_key_is_resolved_next_time() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(".shiling").join("api_key");
    let resolver = CredentialResolver::from_config(&credentials_at(path.clone()));

    resolver.persist(" sk-fresh-key-42 ").await.unwrap();

    assert_eq!(std::fs::read_to_string(&path).unwrap(), "sk-fresh-key-42\n");
    let credential = resolver.resolve().await.unwrap();
    assert_eq!(credential.key, "sk-fresh-key-42");
}

#[test]
fn keys_are_masked() {
    assert_eq!(mask("sk-abcdef123456"), "sk-a…56");
    assert_eq!(mask("short"), "*****");
    assert_eq!(mask(""), "");
}

#[test]
fn text_is_read_from_both_response_shapes() {
    let messages = json!({
        "content": [{"type": "text", "text": "{\"dishes\": "}, {"type": "text", "text": "[]}"}]
    });
    assert_eq!(extract_text(&messages).as_deref(), Some("{\"dishes\": []}"));

    let chat = json!({"choices": [{"message": {"role": "assistant", "content": "hello"}}]});
    assert_eq!(extract_text(&chat).as_deref(), Some("hello"));

    assert_eq!(extract_text(&json!({"content": []})), None);
    assert_eq!(extract_text(&json!({"id": "x"})), None);
}

#[test]
fn error_messages_are_extracted() {
    assert_eq!(
        error_message(r#"{"error": {"message": "model not found", "code": "1211"}}"#).as_deref(),
        Some("model not found")
    );
    assert_eq!(
        error_message(r#"{"error": "quota exceeded"}"#).as_deref(),
        Some("quota exceeded")
    );
    assert_eq!(error_message("<html>bad gateway</html>"), None);
}

#[test]
fn api_style_and_language_parse() {
    assert_eq!(ApiStyle::from_str("OpenAI"), Some(ApiStyle::Openai));
    assert_eq!(ApiStyle::from_str("anthropic"), Some(ApiStyle::Anthropic));
    assert_eq!(ApiStyle::from_str("grpc"), None);
    assert_eq!(Language::from_str("English"), Some(Language::En));
    assert_eq!(Language::from_str("中文"), Some(Language::Zh));
    assert_eq!(Language::from_str("fr"), None);
}
