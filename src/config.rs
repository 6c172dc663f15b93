//! Sentinel configuration loading.
//!
//! TOML is the sole config source; there is no environment-variable
//! override layer. Sink URLs support `${VAR}` expansion against the
//! process environment at load time, since credentials belong in the
//! environment even when the rest of config lives in a file.
//!
//! Default config path: `/etc/sentinel/sentinel.toml`.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::{event, notify, policy};

// ---------------------------------------------------------------------------
// Config types (the typed, defaulted view the rest of the crate consumes)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub poll_interval: Duration,
    pub poll_jitter: Duration,
    pub poll_backoff_min: Duration,
    pub poll_backoff_max: Duration,
    pub source: SourceConfig,
    pub detectors: HashMap<String, DetectorConfig>,
    pub detector_order: Vec<String>,
    pub policy: policy::Config,
    pub notifier: NotifierConfig,
    pub state: StateConfig,
    pub output: OutputConfig,
    pub single_cycle_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// `"realtime"` or `"poll"`.
    pub mode: String,
    pub base_url: String,
    pub reconnect_min: Duration,
    pub reconnect_max: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct DetectorConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub idempotency_key_ttl: chrono::Duration,
    pub routes: Vec<notify::Route>,
    pub sinks: Vec<SinkConfig>,
}

#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub name: String,
    pub sink_type: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StateConfig {
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub log_format: String,
    pub log_level: String,
    pub no_color: bool,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (all-Option, so absence means "use default")
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    poll_interval_secs: Option<u64>,
    poll_jitter_secs: Option<u64>,
    poll_backoff_min_ms: Option<u64>,
    poll_backoff_max_secs: Option<u64>,
    single_cycle_timeout_secs: Option<u64>,
    source: Option<RawSourceConfig>,
    detectors: Option<HashMap<String, RawDetectorConfig>>,
    detector_order: Option<Vec<String>>,
    policy: Option<RawPolicyConfig>,
    notifier: Option<RawNotifierConfig>,
    state: Option<RawStateConfig>,
    output: Option<RawOutputConfig>,
}

#[derive(Debug, Deserialize)]
struct RawSourceConfig {
    mode: Option<String>,
    base_url: Option<String>,
    reconnect_min_ms: Option<u64>,
    reconnect_max_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawDetectorConfig {
    enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawPolicyConfig {
    debounce_window_secs: Option<i64>,
    suppression_window_secs: Option<i64>,
    rate_limit_per_min: Option<i64>,
    batch_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawNotifierConfig {
    idempotency_key_ttl_secs: Option<i64>,
    routes: Option<Vec<RawRouteConfig>>,
    sinks: Option<Vec<RawSinkConfig>>,
}

#[derive(Debug, Deserialize)]
struct RawRouteConfig {
    event_types: Option<Vec<String>>,
    severities: Option<Vec<String>>,
    sinks: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawSinkConfig {
    name: Option<String>,
    #[serde(rename = "type")]
    sink_type: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawStateConfig {
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawOutputConfig {
    log_format: Option<String>,
    log_level: Option<String>,
    no_color: Option<bool>,
}

pub const DEFAULT_CONFIG_PATH: &str = "/etc/sentinel/sentinel.toml";
pub const DEFAULT_DETECTOR_ORDER: [&str; 3] = ["presence", "peer_changes", "runtime"];

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Loads config from a custom path.
pub fn load_config_from_path(path: &Path) -> Result<Config, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {e}", path.display())))?;
    load_config_from_str(&toml_str)
}

/// Loads config from the default path, `/etc/sentinel/sentinel.toml`.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from_path(Path::new(DEFAULT_CONFIG_PATH))
}

/// Loads config from a TOML string, applying defaults for every absent field.
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let poll_interval = Duration::from_secs(raw.poll_interval_secs.unwrap_or(10));
    let poll_jitter = Duration::from_secs(raw.poll_jitter_secs.unwrap_or(1));
    let poll_backoff_min = Duration::from_millis(raw.poll_backoff_min_ms.unwrap_or(500));
    let poll_backoff_max = Duration::from_secs(raw.poll_backoff_max_secs.unwrap_or(30));
    let single_cycle_timeout = Duration::from_secs(raw.single_cycle_timeout_secs.unwrap_or(30));

    let source = match raw.source {
        Some(s) => SourceConfig {
            mode: s.mode.unwrap_or_else(|| "realtime".to_owned()),
            base_url: s.base_url.unwrap_or_else(|| "http://localhost:41112".to_owned()),
            reconnect_min: Duration::from_millis(s.reconnect_min_ms.unwrap_or(500)),
            reconnect_max: Duration::from_secs(s.reconnect_max_secs.unwrap_or(30)),
        },
        None => SourceConfig {
            mode: "realtime".to_owned(),
            base_url: "http://localhost:41112".to_owned(),
            reconnect_min: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(30),
        },
    };

    let detector_order = raw
        .detector_order
        .unwrap_or_else(|| DEFAULT_DETECTOR_ORDER.iter().map(|s| s.to_string()).collect());

    let mut detectors = HashMap::new();
    for name in &detector_order {
        detectors.insert(name.clone(), DetectorConfig { enabled: true });
    }
    if let Some(raw_detectors) = raw.detectors {
        for (name, d) in raw_detectors {
            detectors.insert(name, DetectorConfig { enabled: d.enabled.unwrap_or(true) });
        }
    }

    let policy = match raw.policy {
        Some(p) => policy::Config {
            debounce_window: chrono::Duration::seconds(p.debounce_window_secs.unwrap_or(3)),
            suppression_window: chrono::Duration::seconds(p.suppression_window_secs.unwrap_or(0)),
            rate_limit_per_min: p.rate_limit_per_min.unwrap_or(120),
            batch_size: p.batch_size.unwrap_or(20),
        },
        None => policy::Config {
            debounce_window: chrono::Duration::seconds(3),
            suppression_window: chrono::Duration::zero(),
            rate_limit_per_min: 120,
            batch_size: 20,
        },
    };

    let notifier = match raw.notifier {
        Some(n) => {
            let idempotency_key_ttl = chrono::Duration::seconds(n.idempotency_key_ttl_secs.unwrap_or(86400));
            let routes = n
                .routes
                .unwrap_or_default()
                .into_iter()
                .map(|r| notify::Route {
                    event_types: r.event_types.unwrap_or_default(),
                    severities: r.severities.unwrap_or_default(),
                    sinks: r.sinks.unwrap_or_default(),
                })
                .collect();
            let sinks = n
                .sinks
                .unwrap_or_default()
                .into_iter()
                .enumerate()
                .map(|(i, s)| {
                    Ok(SinkConfig {
                        name: s.name.ok_or_else(|| ConfigError::MissingField(format!("notifier.sinks[{i}].name")))?,
                        sink_type: s.sink_type.unwrap_or_else(|| "stdout".to_owned()),
                        url: s.url.map(|u| expand_env(&u)),
                    })
                })
                .collect::<Result<Vec<_>, ConfigError>>()?;
            NotifierConfig { idempotency_key_ttl, routes, sinks }
        }
        None => NotifierConfig {
            idempotency_key_ttl: chrono::Duration::hours(24),
            routes: vec![notify::Route { event_types: vec!["*".to_string()], severities: vec![], sinks: vec!["stdout".to_string()] }],
            sinks: vec![SinkConfig { name: "stdout".to_string(), sink_type: "stdout".to_string(), url: None }],
        },
    };

    let state = match raw.state {
        Some(s) => StateConfig { path: s.path.unwrap_or_else(|| ".sentinel/state.json".to_owned()) },
        None => StateConfig { path: ".sentinel/state.json".to_owned() },
    };

    let output = match raw.output {
        Some(o) => OutputConfig {
            log_format: o.log_format.unwrap_or_else(|| "pretty".to_owned()),
            log_level: o.log_level.unwrap_or_else(|| "info".to_owned()),
            no_color: o.no_color.unwrap_or(false),
        },
        None => OutputConfig { log_format: "pretty".to_owned(), log_level: "info".to_owned(), no_color: false },
    };

    let cfg = Config {
        poll_interval,
        poll_jitter,
        poll_backoff_min,
        poll_backoff_max,
        source,
        detectors,
        detector_order,
        policy,
        notifier,
        state,
        output,
        single_cycle_timeout,
    };

    validate(&cfg)?;
    Ok(cfg)
}

/// Checks cross-field invariants that can't be expressed by defaulting
/// alone: non-empty paths, known enum-ish strings, detector-order
/// referential integrity, and route event types.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.poll_interval.is_zero() {
        return Err(ConfigError::InvalidValue("poll_interval_secs must be > 0".to_owned()));
    }
    if cfg.policy.batch_size == 0 {
        return Err(ConfigError::InvalidValue("policy.batch_size must be > 0".to_owned()));
    }
    if cfg.detector_order.is_empty() {
        return Err(ConfigError::InvalidValue("detector_order must not be empty".to_owned()));
    }
    for name in &cfg.detector_order {
        if !cfg.detectors.contains_key(name) {
            return Err(ConfigError::InvalidValue(format!("detector_order references unknown detector {name:?}")));
        }
    }
    if cfg.state.path.is_empty() {
        return Err(ConfigError::InvalidValue("state.path must not be empty".to_owned()));
    }
    if cfg.output.log_format != "pretty" && cfg.output.log_format != "json" {
        return Err(ConfigError::InvalidValue(format!("output.log_format must be pretty or json, got {:?}", cfg.output.log_format)));
    }
    if !matches!(cfg.source.mode.as_str(), "" | "realtime" | "poll") {
        return Err(ConfigError::InvalidValue(format!("source.mode must be realtime or poll, got {:?}", cfg.source.mode)));
    }
    for route in &cfg.notifier.routes {
        if route.event_types.is_empty() {
            return Err(ConfigError::InvalidValue("route.event_types must not be empty".to_owned()));
        }
        for t in &route.event_types {
            if !event::types::is_known(t) {
                return Err(ConfigError::InvalidValue(format!("route references unknown event type {t:?}")));
            }
        }
    }
    for sink in &cfg.notifier.sinks {
        let kind = sink.sink_type.to_lowercase();
        if !matches!(kind.as_str(), "" | "webhook" | "stdout" | "debug" | "discord") {
            return Err(ConfigError::InvalidValue(format!("sink {:?} has unknown type {:?}", sink.name, sink.sink_type)));
        }
        if kind == "discord" && sink.url.as_deref().unwrap_or("").is_empty() {
            return Err(ConfigError::InvalidValue(format!("sink {:?} is type discord but has no url", sink.name)));
        }
    }
    Ok(())
}

/// Expands `${VAR}` references against the process environment. Unknown
/// variables expand to an empty string rather than failing config load.
fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        rest = &rest[start + 2..];
        match rest.find('}') {
            Some(end) => {
                let var = &rest[..end];
                out.push_str(&std::env::var(var).unwrap_or_default());
                rest = &rest[end + 1..];
            }
            None => {
                out.push_str("${");
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    MissingField(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {s}"),
            ConfigError::Parse(s) => write!(f, "Parse error: {s}"),
            ConfigError::MissingField(s) => write!(f, "Missing required field: {s}"),
            ConfigError::InvalidValue(s) => write!(f, "Invalid config value: {s}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_produce_a_valid_config() {
        let cfg = load_config_from_str("").unwrap();
        assert_eq!(cfg.source.mode, "realtime");
        assert_eq!(cfg.detector_order, vec!["presence", "peer_changes", "runtime"]);
        assert_eq!(cfg.notifier.sinks.len(), 1);
    }

    #[test]
    fn unknown_detector_in_order_fails_validation() {
        let toml = r#"
            detector_order = ["presence", "nonexistent"]
        "#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn unknown_event_type_in_route_fails_validation() {
        let toml = r#"
            [notifier]
            [[notifier.routes]]
            event_types = ["peer.teleported"]
            sinks = ["stdout"]
        "#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn discord_sink_without_url_fails_validation() {
        let toml = r#"
            [notifier]
            [[notifier.sinks]]
            name = "chat"
            type = "discord"
        "#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn sink_url_expands_env_var() {
        unsafe {
            std::env::set_var("SENTINEL_TEST_WEBHOOK", "https://example.com/hook");
        }
        let toml = r#"
            [notifier]
            [[notifier.sinks]]
            name = "wh"
            type = "webhook"
            url = "${SENTINEL_TEST_WEBHOOK}"
        "#;
        let cfg = load_config_from_str(toml).unwrap();
        assert_eq!(cfg.notifier.sinks[0].url.as_deref(), Some("https://example.com/hook"));
    }

    #[test]
    fn zero_poll_interval_fails_validation() {
        let toml = "poll_interval_secs = 0";
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }
}
