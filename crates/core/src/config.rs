use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::workspace::RemoteProvider;
use crate::policy::{ProjectToolPolicy, ToolPolicy};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub workspace: WorkspaceConfig,
    pub logging: LoggingConfig,
    pub projects: Vec<ProjectConfig>,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub model: String,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub max_steps: u32,
    pub top_k_default: u32,
    pub open_ids_cap: usize,
    pub open_max_chars_default: usize,
    pub source_cap: usize,
    pub tool_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct WorkspaceConfig {
    pub large_file_bytes: u64,
    pub preview_chars: usize,
    pub default_max_chars: usize,
    pub remote_timeout_secs: u64,
    pub remote_http_retries: u32,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug)]
pub struct ProjectConfig {
    pub id: String,
    pub default_branch: String,
    pub repo_path: Option<PathBuf>,
    pub remote: Option<RemoteConfig>,
    pub tool_policy: ToolPolicy,
    pub capabilities: ProjectToolPolicy,
}

#[derive(Clone, Debug)]
pub enum RemoteConfig {
    GitHub {
        owner: String,
        repo: String,
        token: SecretString,
        branch: Option<String>,
        api_base_url: Option<String>,
    },
    Bitbucket {
        workspace: String,
        repo_slug: String,
        token: Option<SecretString>,
        username: Option<String>,
        app_password: Option<SecretString>,
        branch: Option<String>,
        api_base_url: Option<String>,
    },
    AzureDevOps {
        organization: String,
        project: String,
        repository: String,
        pat: SecretString,
        branch: Option<String>,
        api_base_url: Option<String>,
    },
}

impl RemoteConfig {
    pub fn provider(&self) -> RemoteProvider {
        match self {
            Self::GitHub { .. } => RemoteProvider::GitHub,
            Self::Bitbucket { .. } => RemoteProvider::Bitbucket,
            Self::AzureDevOps { .. } => RemoteProvider::AzureDevOps,
        }
    }

    pub fn branch(&self) -> Option<&str> {
        match self {
            Self::GitHub { branch, .. }
            | Self::Bitbucket { branch, .. }
            | Self::AzureDevOps { branch, .. } => branch.as_deref(),
        }
    }

    pub fn api_base_url(&self) -> Option<&str> {
        match self {
            Self::GitHub { api_base_url, .. }
            | Self::Bitbucket { api_base_url, .. }
            | Self::AzureDevOps { api_base_url, .. } => api_base_url.as_deref(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub server_port: Option<u16>,
    pub llm_base_url: Option<String>,
    pub llm_model: Option<String>,
    pub agent_max_steps: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            llm: LlmConfig {
                base_url: "http://localhost:11434/v1".to_string(),
                api_key: None,
                model: "llama3.1".to_string(),
                timeout_secs: 30,
                temperature: 0.1,
                max_tokens: 350,
            },
            agent: AgentConfig {
                max_steps: 3,
                top_k_default: 4,
                open_ids_cap: 2,
                open_max_chars_default: 800,
                source_cap: 8,
                tool_timeout_secs: 60,
            },
            workspace: WorkspaceConfig {
                large_file_bytes: 380_000,
                preview_chars: 120_000,
                default_max_chars: 260_000,
                remote_timeout_secs: 45,
                remote_http_retries: 2,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
            projects: Vec::new(),
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("agentdesk.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    pub fn project(&self, project_id: &str) -> Option<&ProjectConfig> {
        self.projects.iter().find(|project| project.id == project_id)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(max_tokens) = llm.max_tokens {
                self.llm.max_tokens = max_tokens;
            }
        }

        if let Some(agent) = patch.agent {
            if let Some(max_steps) = agent.max_steps {
                self.agent.max_steps = max_steps;
            }
            if let Some(top_k_default) = agent.top_k_default {
                self.agent.top_k_default = top_k_default;
            }
            if let Some(open_ids_cap) = agent.open_ids_cap {
                self.agent.open_ids_cap = open_ids_cap;
            }
            if let Some(open_max_chars_default) = agent.open_max_chars_default {
                self.agent.open_max_chars_default = open_max_chars_default;
            }
            if let Some(source_cap) = agent.source_cap {
                self.agent.source_cap = source_cap;
            }
            if let Some(tool_timeout_secs) = agent.tool_timeout_secs {
                self.agent.tool_timeout_secs = tool_timeout_secs;
            }
        }

        if let Some(workspace) = patch.workspace {
            if let Some(large_file_bytes) = workspace.large_file_bytes {
                self.workspace.large_file_bytes = large_file_bytes;
            }
            if let Some(preview_chars) = workspace.preview_chars {
                self.workspace.preview_chars = preview_chars;
            }
            if let Some(default_max_chars) = workspace.default_max_chars {
                self.workspace.default_max_chars = default_max_chars;
            }
            if let Some(remote_timeout_secs) = workspace.remote_timeout_secs {
                self.workspace.remote_timeout_secs = remote_timeout_secs;
            }
            if let Some(remote_http_retries) = workspace.remote_http_retries {
                self.workspace.remote_http_retries = remote_http_retries;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        if let Some(projects) = patch.projects {
            self.projects = projects.into_iter().map(ProjectPatch::into_config).collect();
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("AGENTDESK_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("AGENTDESK_SERVER_PORT") {
            self.server.port = parse_u16("AGENTDESK_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("AGENTDESK_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("AGENTDESK_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("AGENTDESK_LLM_BASE_URL") {
            self.llm.base_url = value;
        }
        if let Some(value) = read_env("AGENTDESK_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("AGENTDESK_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("AGENTDESK_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("AGENTDESK_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("AGENTDESK_AGENT_MAX_STEPS") {
            self.agent.max_steps = parse_u32("AGENTDESK_AGENT_MAX_STEPS", &value)?;
        }
        if let Some(value) = read_env("AGENTDESK_AGENT_TOOL_TIMEOUT_SECS") {
            self.agent.tool_timeout_secs = parse_u64("AGENTDESK_AGENT_TOOL_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("AGENTDESK_WORKSPACE_REMOTE_TIMEOUT_SECS") {
            self.workspace.remote_timeout_secs =
                parse_u64("AGENTDESK_WORKSPACE_REMOTE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("AGENTDESK_WORKSPACE_REMOTE_HTTP_RETRIES") {
            self.workspace.remote_http_retries =
                parse_u32("AGENTDESK_WORKSPACE_REMOTE_HTTP_RETRIES", &value)?;
        }

        let log_level =
            read_env("AGENTDESK_LOGGING_LEVEL").or_else(|| read_env("AGENTDESK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("AGENTDESK_LOGGING_FORMAT").or_else(|| read_env("AGENTDESK_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(base_url) = overrides.llm_base_url {
            self.llm.base_url = base_url;
        }
        if let Some(model) = overrides.llm_model {
            self.llm.model = model;
        }
        if let Some(max_steps) = overrides.agent_max_steps {
            self.agent.max_steps = max_steps;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_server(&self.server)?;
        validate_llm(&self.llm)?;
        validate_agent(&self.agent)?;
        validate_workspace(&self.workspace)?;
        validate_logging(&self.logging)?;
        validate_projects(&self.projects)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("agentdesk.toml"), PathBuf::from("config/agentdesk.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if !is_http_url(&llm.base_url) {
        return Err(ConfigError::Validation(
            "llm.base_url must start with http:// or https://".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    if llm.max_tokens == 0 {
        return Err(ConfigError::Validation(
            "llm.max_tokens must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_agent(agent: &AgentConfig) -> Result<(), ConfigError> {
    if agent.max_steps == 0 || agent.max_steps > 20 {
        return Err(ConfigError::Validation("agent.max_steps must be in range 1..=20".to_string()));
    }

    if agent.top_k_default == 0 || agent.open_ids_cap == 0 || agent.source_cap == 0 {
        return Err(ConfigError::Validation(
            "agent.top_k_default, agent.open_ids_cap and agent.source_cap must be greater than zero"
                .to_string(),
        ));
    }

    if agent.tool_timeout_secs == 0 || agent.tool_timeout_secs > 600 {
        return Err(ConfigError::Validation(
            "agent.tool_timeout_secs must be in range 1..=600".to_string(),
        ));
    }

    Ok(())
}

fn validate_workspace(workspace: &WorkspaceConfig) -> Result<(), ConfigError> {
    if !(500..=600_000).contains(&workspace.default_max_chars) {
        return Err(ConfigError::Validation(
            "workspace.default_max_chars must be in range 500..=600000".to_string(),
        ));
    }

    if workspace.preview_chars == 0 || workspace.large_file_bytes == 0 {
        return Err(ConfigError::Validation(
            "workspace.preview_chars and workspace.large_file_bytes must be greater than zero"
                .to_string(),
        ));
    }

    if workspace.remote_timeout_secs == 0 || workspace.remote_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "workspace.remote_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_projects(projects: &[ProjectConfig]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for project in projects {
        let id = project.id.trim();
        if id.is_empty() {
            return Err(ConfigError::Validation("projects[].id must not be empty".to_string()));
        }
        if !seen.insert(id) {
            return Err(ConfigError::Validation(format!("duplicate project id `{id}`")));
        }
        if project.default_branch.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "projects[{id}].default_branch must not be empty"
            )));
        }
        if let Some(remote) = &project.remote {
            validate_remote(id, remote)?;
        }
    }
    Ok(())
}

fn validate_remote(project_id: &str, remote: &RemoteConfig) -> Result<(), ConfigError> {
    let invalid = |field: &str| {
        ConfigError::Validation(format!("projects[{project_id}].remote.{field} must not be empty"))
    };

    match remote {
        RemoteConfig::GitHub { owner, repo, token, .. } => {
            if owner.trim().is_empty() {
                return Err(invalid("owner"));
            }
            if repo.trim().is_empty() {
                return Err(invalid("repo"));
            }
            if token.expose_secret().trim().is_empty() {
                return Err(invalid("token"));
            }
        }
        RemoteConfig::Bitbucket { workspace, repo_slug, token, username, app_password, .. } => {
            if workspace.trim().is_empty() {
                return Err(invalid("workspace"));
            }
            if repo_slug.trim().is_empty() {
                return Err(invalid("repo_slug"));
            }
            let has_token =
                token.as_ref().is_some_and(|value| !value.expose_secret().trim().is_empty());
            let has_basic = username.as_ref().is_some_and(|value| !value.trim().is_empty())
                && app_password.as_ref().is_some_and(|value| !value.expose_secret().is_empty());
            if !has_token && !has_basic {
                return Err(ConfigError::Validation(format!(
                    "projects[{project_id}].remote requires `token` or `username` + `app_password`"
                )));
            }
        }
        RemoteConfig::AzureDevOps { organization, project, repository, pat, .. } => {
            if organization.trim().is_empty() {
                return Err(invalid("organization"));
            }
            if project.trim().is_empty() {
                return Err(invalid("project"));
            }
            if repository.trim().is_empty() {
                return Err(invalid("repository"));
            }
            if pat.expose_secret().trim().is_empty() {
                return Err(invalid("pat"));
            }
        }
    }

    if let Some(base_url) = remote.api_base_url() {
        if !is_http_url(base_url) {
            return Err(ConfigError::Validation(format!(
                "projects[{project_id}].remote.api_base_url must start with http:// or https://"
            )));
        }
    }

    Ok(())
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    server: Option<ServerPatch>,
    llm: Option<LlmPatch>,
    agent: Option<AgentPatch>,
    workspace: Option<WorkspacePatch>,
    logging: Option<LoggingPatch>,
    projects: Option<Vec<ProjectPatch>>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    base_url: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentPatch {
    max_steps: Option<u32>,
    top_k_default: Option<u32>,
    open_ids_cap: Option<usize>,
    open_max_chars_default: Option<usize>,
    source_cap: Option<usize>,
    tool_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkspacePatch {
    large_file_bytes: Option<u64>,
    preview_chars: Option<usize>,
    default_max_chars: Option<usize>,
    remote_timeout_secs: Option<u64>,
    remote_http_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[derive(Debug, Deserialize)]
struct ProjectPatch {
    id: String,
    default_branch: Option<String>,
    repo_path: Option<PathBuf>,
    remote: Option<RemotePatch>,
    #[serde(default)]
    tool_policy: ToolPolicy,
    #[serde(default)]
    capabilities: ProjectToolPolicy,
}

impl ProjectPatch {
    fn into_config(self) -> ProjectConfig {
        let remote_branch = self.remote.as_ref().and_then(RemotePatch::branch);
        let default_branch = self
            .default_branch
            .or_else(|| remote_branch.map(str::to_string))
            .unwrap_or_else(|| "main".to_string());
        ProjectConfig {
            id: self.id,
            default_branch,
            repo_path: self.repo_path,
            remote: self.remote.map(RemotePatch::into_config),
            tool_policy: self.tool_policy,
            capabilities: self.capabilities,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RemotePatch {
    #[serde(rename = "github")]
    GitHub {
        owner: String,
        repo: String,
        token: String,
        branch: Option<String>,
        api_base_url: Option<String>,
    },
    Bitbucket {
        workspace: String,
        repo_slug: String,
        token: Option<String>,
        username: Option<String>,
        app_password: Option<String>,
        branch: Option<String>,
        api_base_url: Option<String>,
    },
    AzureDevOps {
        organization: String,
        project: String,
        repository: String,
        pat: String,
        branch: Option<String>,
        api_base_url: Option<String>,
    },
}

impl RemotePatch {
    fn branch(&self) -> Option<&str> {
        match self {
            Self::GitHub { branch, .. }
            | Self::Bitbucket { branch, .. }
            | Self::AzureDevOps { branch, .. } => branch.as_deref(),
        }
    }

    fn into_config(self) -> RemoteConfig {
        match self {
            Self::GitHub { owner, repo, token, branch, api_base_url } => RemoteConfig::GitHub {
                owner,
                repo,
                token: secret_value(token),
                branch,
                api_base_url,
            },
            Self::Bitbucket {
                workspace,
                repo_slug,
                token,
                username,
                app_password,
                branch,
                api_base_url,
            } => RemoteConfig::Bitbucket {
                workspace,
                repo_slug,
                token: token.map(secret_value),
                username,
                app_password: app_password.map(secret_value),
                branch,
                api_base_url,
            },
            Self::AzureDevOps { organization, project, repository, pat, branch, api_base_url } => {
                RemoteConfig::AzureDevOps {
                    organization,
                    project,
                    repository,
                    pat: secret_value(pat),
                    branch,
                    api_base_url,
                }
            }
        }
    }
}
