use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use insight_core::config::{AppConfig, LoadOptions};
use toml::Value;

/// One rendered config field: `(key path, env var, value)`.
type Field = (&'static str, &'static str, String);

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key_path, env_key, value) in fields(&config) {
        let source =
            field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key_path, &value, source));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let llm_api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };
    let template = match &config.llm.template_path {
        Some(path) => format!("<from {}>", path.display()),
        None => format!("<inline, {} chars>", config.llm.instruction_template.chars().count()),
    };

    vec![
        ("database.url", "INSIGHT_DATABASE_URL", config.database.url.clone()),
        (
            "database.max_connections",
            "INSIGHT_DATABASE_MAX_CONNECTIONS",
            config.database.max_connections.to_string(),
        ),
        (
            "database.timeout_secs",
            "INSIGHT_DATABASE_TIMEOUT_SECS",
            config.database.timeout_secs.to_string(),
        ),
        ("llm.provider", "INSIGHT_LLM_PROVIDER", format!("{:?}", config.llm.provider)),
        ("llm.model", "INSIGHT_LLM_MODEL", config.llm.model.clone()),
        ("llm.base_url", "INSIGHT_LLM_BASE_URL", config.llm.effective_base_url()),
        ("llm.api_key", "INSIGHT_LLM_API_KEY", llm_api_key.to_string()),
        ("llm.temperature", "INSIGHT_LLM_TEMPERATURE", config.llm.temperature.to_string()),
        ("llm.timeout_secs", "INSIGHT_LLM_TIMEOUT_SECS", config.llm.timeout_secs.to_string()),
        ("llm.template_path", "INSIGHT_LLM_TEMPLATE_PATH", template),
        (
            "analysis.staleness_minutes",
            "INSIGHT_ANALYSIS_STALENESS_MINUTES",
            config.analysis.staleness_minutes.to_string(),
        ),
        (
            "server.bind_address",
            "INSIGHT_SERVER_BIND_ADDRESS",
            config.server.bind_address.clone(),
        ),
        ("server.port", "INSIGHT_SERVER_PORT", config.server.port.to_string()),
        ("logging.level", "INSIGHT_LOGGING_LEVEL", config.logging.level.clone()),
        ("logging.format", "INSIGHT_LOGGING_FORMAT", format!("{:?}", config.logging.format)),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    ["insight.toml", "config/insight.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

#[cfg(test)]
mod tests {
    use super::{contains_path, field_source};

    #[test]
    fn contains_path_walks_nested_tables() {
        let doc: toml::Value = "[llm]\nmodel = \"gpt-4o-mini\"\n".parse().expect("toml");

        assert!(contains_path(&doc, "llm.model"));
        assert!(!contains_path(&doc, "llm.api_key"));
        assert!(!contains_path(&doc, "analysis.staleness_minutes"));
    }

    #[test]
    fn file_source_wins_over_default_when_key_present() {
        let doc: toml::Value = "[analysis]\nstaleness_minutes = 10\n".parse().expect("toml");

        let source = field_source(
            "analysis.staleness_minutes",
            "INSIGHT_TEST_UNSET_STALENESS_KEY",
            Some(&doc),
            Some(std::path::Path::new("insight.toml")),
        );
        assert_eq!(source, "file (insight.toml)");

        let default = field_source("server.port", "INSIGHT_TEST_UNSET_PORT_KEY", Some(&doc), None);
        assert_eq!(default, "default");
    }
}
