use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use rankguard_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

/// Effective configuration, one line per key, with where each value came
/// from. Secrets are redacted.
pub fn run(options: LoadOptions) -> String {
    let config_file_path = detect_config_path(options.config_path.as_deref());
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let gateway_token = match &config.server.gateway_token {
        Some(token) => redact_token(token.expose_secret()),
        None => "<unset>".to_string(),
    };

    let entries: [(&str, String, &[&str]); 12] = [
        ("database.url", config.database.url.clone(), &["RANKGUARD_DATABASE_URL"]),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["RANKGUARD_DATABASE_MAX_CONNECTIONS"],
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["RANKGUARD_DATABASE_TIMEOUT_SECS"],
        ),
        (
            "server.bind_address",
            config.server.bind_address.clone(),
            &["RANKGUARD_SERVER_BIND_ADDRESS"],
        ),
        ("server.port", config.server.port.to_string(), &["RANKGUARD_SERVER_PORT"]),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["RANKGUARD_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        ("server.gateway_token", gateway_token, &["RANKGUARD_SERVER_GATEWAY_TOKEN"]),
        (
            "engine.surcharge_rate",
            config.engine.surcharge_rate.to_string(),
            &["RANKGUARD_ENGINE_SURCHARGE_RATE"],
        ),
        (
            "engine.currency_scale",
            config.engine.currency_scale.to_string(),
            &["RANKGUARD_ENGINE_CURRENCY_SCALE"],
        ),
        (
            "engine.expiry_stale_days",
            config.engine.expiry_stale_days.to_string(),
            &["RANKGUARD_ENGINE_EXPIRY_STALE_DAYS"],
        ),
        (
            "logging.level",
            config.logging.level.clone(),
            &["RANKGUARD_LOGGING_LEVEL", "RANKGUARD_LOG_LEVEL"],
        ),
        (
            "logging.format",
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
            &["RANKGUARD_LOGGING_FORMAT", "RANKGUARD_LOG_FORMAT"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_keys) in entries {
        let source =
            field_source(key, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }

    lines.join("\n")
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    [PathBuf::from("rankguard.toml"), PathBuf::from("config/rankguard.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
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

/// Keeps a short prefix so operators can tell tokens apart.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}

#[cfg(test)]
mod tests {
    use toml::Value;

    use super::{contains_path, redact_token};

    #[test]
    fn tokens_are_redacted_to_their_prefix() {
        assert_eq!(redact_token("gw-abcdef"), "gw-***");
        assert_eq!(redact_token("plainsecret"), "<redacted>");
        assert_eq!(redact_token("  "), "<empty>");
    }

    #[test]
    fn nested_keys_are_found_in_the_file_document() {
        let doc: Value = "[engine]\nexpiry_stale_days = 7\n".parse().expect("toml");
        assert!(contains_path(&doc, "engine.expiry_stale_days"));
        assert!(!contains_path(&doc, "engine.surcharge_rate"));
        assert!(!contains_path(&doc, "server.port"));
    }
}
