use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::automation::AutomationRule;

// --- Per-agent behavior configuration -------------------------------------
//
// These structs arrive already validated from the config layer; the pipeline
// never re-validates them.

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub role: String,
    pub persona: String,
    #[serde(default = "default_fallback_phrase")]
    pub fallback_phrase: String,
}

fn default_fallback_phrase() -> String {
    "Чем могу помочь?".to_string()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentStyle {
    pub tone: String,
    pub politeness: String,
    pub emoji_policy: String,
    pub greeting: String,
    pub clean_text: bool,
    pub max_sentences: usize,
    pub max_questions: usize,
}

impl Default for AgentStyle {
    fn default() -> Self {
        Self {
            tone: "warm_professional".to_string(),
            politeness: "вы".to_string(),
            emoji_policy: "rare".to_string(),
            greeting: String::new(),
            clean_text: true,
            max_sentences: 3,
            max_questions: 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentRule {
    pub id: String,
    #[serde(default = "default_rule_priority")]
    pub priority: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub positive_example: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_example: Option<String>,
}

fn default_rule_priority() -> String {
    "normal".to_string()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub provider: String,
    pub model: String,
    pub temperature: f32,
    pub max_history: usize,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            temperature: 0.3,
            max_history: 20,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    pub name: String,
    pub identity: AgentIdentity,
    #[serde(default)]
    pub style: AgentStyle,
    #[serde(default)]
    pub rules: Vec<AgentRule>,
    #[serde(default)]
    pub llm: LlmSettings,
}

// --- Dialogue policy -------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IntentContract {
    #[serde(default)]
    pub must_include_any: Vec<String>,
    #[serde(default)]
    pub forbidden: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntentDef {
    pub id: String,
    pub markers: Vec<String>,
    #[serde(default = "default_intent_priority")]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<IntentContract>,
}

fn default_intent_priority() -> i32 {
    50
}

/// Vocabulary and markers the booking flow matches against.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookingSettings {
    pub rooms: Vec<String>,
    pub restart_markers: Vec<String>,
    pub default_duration_hours: i64,
}

impl Default for BookingSettings {
    fn default() -> Self {
        Self {
            rooms: vec!["Карелия".to_string(), "Грань".to_string(), "Сфера".to_string()],
            restart_markers: vec![
                "хочу ещё".to_string(),
                "хочу еще".to_string(),
                "снова забронировать".to_string(),
                "новая бронь".to_string(),
                "ещё одну".to_string(),
                "еще одну".to_string(),
                "привет".to_string(),
                "здравствуйте".to_string(),
                "добрый день".to_string(),
                "добрый вечер".to_string(),
            ],
            default_duration_hours: 2,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DialoguePolicy {
    pub intents: Vec<IntentDef>,
    pub fallback_intent: Option<String>,
    pub lock_turns: Option<u32>,
    pub booking: BookingSettings,
    /// Declarative automations. When the list is empty the legacy default
    /// automation applies (auto-escalate once a booking reaches finalize).
    pub automations: Vec<AutomationRule>,
}

impl DialoguePolicy {
    pub fn rule_engine_enabled(&self) -> bool {
        !self.automations.is_empty()
    }
}

/// Everything the pipeline needs to know about one agent.
#[derive(Clone, Debug, PartialEq)]
pub struct AgentBundle {
    pub agent: AgentConfig,
    pub policy: DialoguePolicy,
    pub knowledge: BTreeMap<String, String>,
}

/// Short sha256 fingerprint over the serialized agent config + dialogue
/// policy, attached to outgoing metadata for traceability.
pub fn config_version(agent: &AgentConfig, policy: &DialoguePolicy) -> String {
    let payload = serde_json::json!({ "agent": agent, "dialogue_policy": policy });
    let digest = Sha256::digest(payload.to_string().as_bytes());
    hex::encode(digest)[..12].to_string()
}

// --- Process configuration -------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
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

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Debug)]
pub struct LlmEndpoint {
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct PollSettings {
    pub interval_secs: u64,
    pub dedup_capacity: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Telegram,
    Umnico,
}

#[derive(Clone, Debug)]
pub struct ChannelSettings {
    pub kind: ChannelKind,
    pub token: Option<SecretString>,
    pub base_url: Option<String>,
}

/// Where manager escalations go. Without a chat id they are only logged.
#[derive(Clone, Debug, Default)]
pub struct EscalationSettings {
    pub telegram_chat_id: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ServerSettings {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

/// Process-level configuration for the server binary.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub agent_dir: PathBuf,
    pub llm: LlmEndpoint,
    pub logging: LoggingConfig,
    pub poll: PollSettings,
    pub server: ServerSettings,
    pub escalation: EscalationSettings,
    pub channels: Vec<ChannelSettings>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            agent_dir: PathBuf::from("agents/default"),
            llm: LlmEndpoint {
                base_url: "https://api.openai.com/v1".to_string(),
                api_key: None,
                model: "gpt-4o".to_string(),
                temperature: 0.3,
                timeout_secs: 30,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
            poll: PollSettings { interval_secs: 5, dedup_capacity: 1024 },
            server: ServerSettings {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            escalation: EscalationSettings::default(),
            channels: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("agent config not found: `{0}`")]
    MissingAgentFile(PathBuf),
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

// Serde patch shapes for the TOML file; every field optional so a partial
// file layers over the defaults.
#[derive(Debug, Default, Deserialize)]
struct AppConfigPatch {
    agent_dir: Option<PathBuf>,
    llm: Option<LlmPatch>,
    logging: Option<LoggingPatch>,
    poll: Option<PollPatch>,
    server: Option<ServerPatch>,
    escalation: Option<EscalationPatch>,
    #[serde(default)]
    channels: Vec<ChannelPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct EscalationPatch {
    telegram_chat_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    base_url: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PollPatch {
    interval_secs: Option<u64>,
    dedup_capacity: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ChannelPatch {
    kind: ChannelKind,
    token: Option<String>,
    base_url: Option<String>,
}

impl AppConfig {
    /// Load configuration: defaults, then the TOML file (if present), then
    /// `RESERVO_*` environment overrides.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let path = config_path
            .map(PathBuf::from)
            .or_else(|| env::var("RESERVO_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("reservo.toml"));

        if path.exists() {
            let raw = fs::read_to_string(&path)
                .map_err(|source| ConfigError::ReadFile { path: path.clone(), source })?;
            let patch: AppConfigPatch = toml::from_str(&raw)
                .map_err(|source| ConfigError::ParseFile { path: path.clone(), source })?;
            config.apply_patch(patch)?;
        }

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_patch(&mut self, patch: AppConfigPatch) -> Result<(), ConfigError> {
        if let Some(dir) = patch.agent_dir {
            self.agent_dir = dir;
        }
        if let Some(llm) = patch.llm {
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(api_key.into());
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(timeout) = llm.timeout_secs {
                self.llm.timeout_secs = timeout;
            }
        }
        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format.parse()?;
            }
        }
        if let Some(poll) = patch.poll {
            if let Some(interval) = poll.interval_secs {
                self.poll.interval_secs = interval;
            }
            if let Some(capacity) = poll.dedup_capacity {
                self.poll.dedup_capacity = capacity;
            }
        }
        if let Some(server) = patch.server {
            if let Some(address) = server.bind_address {
                self.server.bind_address = address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = secs;
            }
        }
        if let Some(escalation) = patch.escalation {
            if let Some(chat_id) = escalation.telegram_chat_id {
                self.escalation.telegram_chat_id = Some(chat_id);
            }
        }
        for channel in patch.channels {
            self.channels.push(ChannelSettings {
                kind: channel.kind,
                token: channel.token.map(Into::into),
                base_url: channel.base_url,
            });
        }
        Ok(())
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(level) = env::var("RESERVO_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = env::var("RESERVO_LOG_FORMAT") {
            self.logging.format = format.parse()?;
        }
        if let Ok(dir) = env::var("RESERVO_AGENT_DIR") {
            self.agent_dir = PathBuf::from(dir);
        }
        if let Ok(key) = env::var("RESERVO_LLM_API_KEY") {
            self.llm.api_key = Some(key.into());
        }
        if let Ok(base_url) = env::var("RESERVO_LLM_BASE_URL") {
            self.llm.base_url = base_url;
        }
        if let Ok(model) = env::var("RESERVO_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Ok(chat_id) = env::var("RESERVO_MANAGER_CHAT_ID") {
            self.escalation.telegram_chat_id = Some(chat_id);
        }
        if let Ok(value) = env::var("RESERVO_POLL_INTERVAL_SECS") {
            self.poll.interval_secs = value.parse().map_err(|_| {
                ConfigError::InvalidEnvOverride { key: "RESERVO_POLL_INTERVAL_SECS".into(), value }
            })?;
        }
        for (kind, var) in
            [(ChannelKind::Telegram, "RESERVO_TELEGRAM_TOKEN"), (ChannelKind::Umnico, "RESERVO_UMNICO_TOKEN")]
        {
            if let Ok(token) = env::var(var) {
                match self.channels.iter_mut().find(|c| c.kind == kind) {
                    Some(channel) => channel.token = Some(token.into()),
                    None => self.channels.push(ChannelSettings {
                        kind,
                        token: Some(token.into()),
                        base_url: None,
                    }),
                }
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::Validation("llm.model must not be empty".into()));
        }
        if self.poll.interval_secs == 0 {
            return Err(ConfigError::Validation("poll.interval_secs must be >= 1".into()));
        }
        if self.poll.dedup_capacity == 0 {
            return Err(ConfigError::Validation("poll.dedup_capacity must be >= 1".into()));
        }
        Ok(())
    }
}

// --- Agent bundle loading --------------------------------------------------

/// Load one agent's behavior bundle from a directory:
///
/// ```text
/// agent_dir/
///   agent.toml
///   dialogue_policy.toml   (optional)
///   knowledge/*.md         (optional)
/// ```
pub fn load_agent_bundle(agent_dir: &Path) -> Result<AgentBundle, ConfigError> {
    let agent_path = agent_dir.join("agent.toml");
    if !agent_path.exists() {
        return Err(ConfigError::MissingAgentFile(agent_path));
    }
    let agent: AgentConfig = read_toml(&agent_path)?;

    let policy_path = agent_dir.join("dialogue_policy.toml");
    let policy: DialoguePolicy =
        if policy_path.exists() { read_toml(&policy_path)? } else { DialoguePolicy::default() };

    let mut knowledge = BTreeMap::new();
    let knowledge_dir = agent_dir.join("knowledge");
    if knowledge_dir.is_dir() {
        let mut entries: Vec<PathBuf> = fs::read_dir(&knowledge_dir)
            .map_err(|source| ConfigError::ReadFile { path: knowledge_dir.clone(), source })?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "md"))
            .collect();
        entries.sort();
        for path in entries {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            let content = fs::read_to_string(&path)
                .map_err(|source| ConfigError::ReadFile { path: path.clone(), source })?;
            knowledge.insert(stem, content);
        }
    }

    Ok(AgentBundle { agent, policy, knowledge })
}

fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
    toml::from_str(&raw).map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn style_defaults_match_contract() {
        let style = AgentStyle::default();
        assert_eq!(style.max_sentences, 3);
        assert_eq!(style.max_questions, 1);
        assert!(style.clean_text);
    }

    #[test]
    fn dialogue_policy_parses_from_toml() {
        let policy: DialoguePolicy = toml::from_str(
            r#"
            lock_turns = 3

            [[intents]]
            id = "PRICING"
            markers = ["сколько стоит", "цена"]
            priority = 20

            [intents.contract]
            must_include_any = ["руб"]
            forbidden = ["скидка 90%"]

            [booking]
            rooms = ["Карелия", "Грань"]

            [[automations]]
            id = "escalate_on_finalize"
            when = { stage = "finalize" }
            do = ["notify_manager", "set_state:handoff=done"]
            "#,
        )
        .expect("policy should parse");

        assert_eq!(policy.lock_turns, Some(3));
        assert_eq!(policy.intents.len(), 1);
        assert_eq!(policy.booking.rooms, vec!["Карелия", "Грань"]);
        assert!(policy.rule_engine_enabled());
        assert_eq!(policy.automations[0].actions.len(), 2);
    }

    #[test]
    fn empty_automation_list_means_legacy_behavior() {
        let policy = DialoguePolicy::default();
        assert!(!policy.rule_engine_enabled());
    }

    #[test]
    fn config_version_is_stable_and_short() {
        let agent = AgentConfig {
            id: "a1".into(),
            name: "Agent".into(),
            identity: AgentIdentity {
                role: "Администратор".into(),
                persona: "Вежливый".into(),
                fallback_phrase: default_fallback_phrase(),
            },
            style: AgentStyle::default(),
            rules: vec![],
            llm: LlmSettings::default(),
        };
        let policy = DialoguePolicy::default();

        let first = config_version(&agent, &policy);
        let second = config_version(&agent, &policy);
        assert_eq!(first, second);
        assert_eq!(first.len(), 12);
    }

    #[test]
    fn agent_bundle_loads_from_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("agent.toml"),
            r#"
            id = "a1"
            name = "Hall bot"

            [identity]
            role = "Администратор студии"
            persona = "Вежливый и краткий"
            "#,
        )
        .expect("write agent.toml");
        fs::create_dir(dir.path().join("knowledge")).expect("mkdir");
        fs::write(dir.path().join("knowledge/pricing.md"), "Час аренды — 2000 руб.")
            .expect("write knowledge");

        let bundle = load_agent_bundle(dir.path()).expect("bundle should load");
        assert_eq!(bundle.agent.id, "a1");
        assert_eq!(bundle.agent.llm.max_history, 20);
        assert_eq!(bundle.knowledge["pricing"], "Час аренды — 2000 руб.");
    }

    #[test]
    fn missing_agent_file_is_a_clear_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let error = load_agent_bundle(dir.path()).expect_err("must fail");
        assert!(matches!(error, ConfigError::MissingAgentFile(_)));
    }
}
