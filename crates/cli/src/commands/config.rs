use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use agentdesk_core::config::{AppConfig, LoadOptions, RemoteConfig};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

impl Field {
    fn new(key: &'static str, value: impl ToString, env_keys: &'static [&'static str]) -> Self {
        Self { key, value: value.to_string(), env_keys }
    }
}

pub fn run() -> String {
    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => render(&config, detect_config_path().as_deref()),
        Err(error) => format!("config validation failed: {error}"),
    }
}

pub fn render(config: &AppConfig, config_file_path: Option<&Path>) -> String {
    let config_file_doc = load_config_file_doc(config_file_path);

    let fields = [
        Field::new(
            "server.bind_address",
            &config.server.bind_address,
            &["AGENTDESK_SERVER_BIND_ADDRESS"],
        ),
        Field::new("server.port", config.server.port, &["AGENTDESK_SERVER_PORT"]),
        Field::new(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs,
            &["AGENTDESK_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        Field::new("llm.base_url", &config.llm.base_url, &["AGENTDESK_LLM_BASE_URL"]),
        Field::new("llm.model", &config.llm.model, &["AGENTDESK_LLM_MODEL"]),
        Field::new(
            "llm.api_key",
            redact_optional(config.llm.api_key.as_ref()),
            &["AGENTDESK_LLM_API_KEY"],
        ),
        Field::new("llm.timeout_secs", config.llm.timeout_secs, &["AGENTDESK_LLM_TIMEOUT_SECS"]),
        Field::new("llm.temperature", config.llm.temperature, &[]),
        Field::new("llm.max_tokens", config.llm.max_tokens, &[]),
        Field::new("agent.max_steps", config.agent.max_steps, &["AGENTDESK_AGENT_MAX_STEPS"]),
        Field::new("agent.top_k_default", config.agent.top_k_default, &[]),
        Field::new("agent.open_ids_cap", config.agent.open_ids_cap, &[]),
        Field::new("agent.open_max_chars_default", config.agent.open_max_chars_default, &[]),
        Field::new("agent.source_cap", config.agent.source_cap, &[]),
        Field::new(
            "agent.tool_timeout_secs",
            config.agent.tool_timeout_secs,
            &["AGENTDESK_AGENT_TOOL_TIMEOUT_SECS"],
        ),
        Field::new("workspace.large_file_bytes", config.workspace.large_file_bytes, &[]),
        Field::new("workspace.preview_chars", config.workspace.preview_chars, &[]),
        Field::new("workspace.default_max_chars", config.workspace.default_max_chars, &[]),
        Field::new(
            "workspace.remote_timeout_secs",
            config.workspace.remote_timeout_secs,
            &["AGENTDESK_WORKSPACE_REMOTE_TIMEOUT_SECS"],
        ),
        Field::new(
            "workspace.remote_http_retries",
            config.workspace.remote_http_retries,
            &["AGENTDESK_WORKSPACE_REMOTE_HTTP_RETRIES"],
        ),
        Field::new(
            "logging.level",
            &config.logging.level,
            &["AGENTDESK_LOGGING_LEVEL", "AGENTDESK_LOG_LEVEL"],
        ),
        Field::new(
            "logging.format",
            format!("{:?}", config.logging.format).to_lowercase(),
            &["AGENTDESK_LOGGING_FORMAT", "AGENTDESK_LOG_FORMAT"],
        ),
    ];

    let mut lines =
        vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in &fields {
        let source =
            field_source(field.key, field.env_keys, config_file_doc.as_ref(), config_file_path);
        lines.push(format!("- {} = {} (source: {source})", field.key, field.value));
    }

    lines.push(format!("projects ({}):", config.projects.len()));
    for project in &config.projects {
        let location = match (&project.repo_path, &project.remote) {
            (Some(path), _) => format!("local {}", path.display()),
            (None, Some(remote)) => describe_remote(remote),
            (None, None) => "no repository source".to_string(),
        };
        lines.push(format!(
            "- {} (branch {}): {location}; dry_run={} require_approval={}",
            project.id,
            project.default_branch,
            project.tool_policy.dry_run,
            project.tool_policy.require_approval_for_write_tools,
        ));
    }

    lines.join("\n")
}

fn describe_remote(remote: &RemoteConfig) -> String {
    match remote {
        RemoteConfig::GitHub { owner, repo, token, .. } => {
            format!("github {owner}/{repo} token={}", redact_token(token))
        }
        RemoteConfig::Bitbucket { workspace, repo_slug, token, username, app_password, .. } => {
            let auth = match (token, username, app_password) {
                (Some(token), _, _) => format!("token={}", redact_token(token)),
                (None, Some(username), Some(password)) => {
                    format!("user={username} app_password={}", redact_token(password))
                }
                _ => "auth=<unset>".to_string(),
            };
            format!("bitbucket {workspace}/{repo_slug} {auth}")
        }
        RemoteConfig::AzureDevOps { organization, project, repository, pat, .. } => {
            format!("azure_devops {organization}/{project}/{repository} pat={}", redact_token(pat))
        }
    }
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("agentdesk.toml"), PathBuf::from("config/agentdesk.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(**key).is_some()) {
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

fn redact_optional(secret: Option<&SecretString>) -> String {
    secret.map(redact_token).unwrap_or_else(|| "<unset>".to_string())
}

/// Keeps a recognizable provider prefix (`ghp_`, `sk-`) and hides the rest.
fn redact_token(secret: &SecretString) -> String {
    let trimmed = secret.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    match trimmed.find(|ch: char| ch == '-' || ch == '_') {
        Some(index) if index <= 4 => format!("{}***", &trimmed[..=index]),
        _ => "<redacted>".to_string(),
    }
}
