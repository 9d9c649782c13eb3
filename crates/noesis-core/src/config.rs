use serde::{Deserialize, Serialize};

/// Validation rule for one Config KV key (§6.4).
#[derive(Debug, Clone)]
pub enum ConfigRule {
    IntRange { min: i64, max: i64 },
    RealRange { min: f64, max: f64 },
    BoolLiteral,
    Regex(&'static str),
}

#[derive(Debug, Clone)]
pub struct ConfigKeySpec {
    pub key: &'static str,
    pub default: &'static str,
    pub rule: ConfigRule,
    /// Keys that cannot be deleted (`max_iterations`, `tool_timeout_ms`).
    pub undeletable: bool,
}

/// The built-in Config KV schema (§6.4). Used by the state store to validate reads
/// and writes and to seed defaults for keys never explicitly set.
pub fn builtin_keys() -> Vec<ConfigKeySpec> {
    vec![
        ConfigKeySpec {
            key: "max_iterations",
            default: "100",
            rule: ConfigRule::IntRange { min: 1, max: 1000 },
            undeletable: true,
        },
        ConfigKeySpec {
            key: "thinking_budget",
            default: "10000",
            rule: ConfigRule::IntRange { min: 0, max: 100000 },
            undeletable: false,
        },
        ConfigKeySpec {
            key: "tool_timeout_ms",
            default: "30000",
            rule: ConfigRule::IntRange {
                min: 1000,
                max: 600000,
            },
            undeletable: true,
        },
        ConfigKeySpec {
            key: "code_timeout_ms",
            default: "60000",
            rule: ConfigRule::IntRange {
                min: 1000,
                max: 600000,
            },
            undeletable: false,
        },
        ConfigKeySpec {
            key: "max_output_chars",
            default: "10000",
            rule: ConfigRule::IntRange {
                min: 1000,
                max: 100000,
            },
            undeletable: false,
        },
        ConfigKeySpec {
            key: "verbose",
            default: "false",
            rule: ConfigRule::BoolLiteral,
            undeletable: false,
        },
        ConfigKeySpec {
            key: "temperature",
            default: "0.7",
            rule: ConfigRule::RealRange { min: 0.0, max: 2.0 },
            undeletable: false,
        },
        ConfigKeySpec {
            key: "model",
            default: "gpt-4o-mini",
            rule: ConfigRule::Regex(r"^[a-zA-Z0-9._-]+$"),
            undeletable: false,
        },
    ]
}

pub fn find_key_spec(key: &str) -> Option<ConfigKeySpec> {
    builtin_keys().into_iter().find(|spec| spec.key == key)
}

impl ConfigRule {
    /// Returns true if `value` satisfies this rule.
    pub fn validate(&self, value: &str) -> bool {
        match self {
            ConfigRule::IntRange { min, max } => value
                .parse::<i64>()
                .map(|v| v >= *min && v <= *max)
                .unwrap_or(false),
            ConfigRule::RealRange { min, max } => value
                .parse::<f64>()
                .map(|v| v >= *min && v <= *max)
                .unwrap_or(false),
            ConfigRule::BoolLiteral => value == "true" || value == "false",
            ConfigRule::Regex(pattern) => regex_lite_match(pattern, value),
        }
    }

    /// For a numeric rule, clamp an out-of-range but parseable value to the nearest
    /// bound, per §6.4 "on read, invalid persisted values fall back to the nearest
    /// bound or the default".
    pub fn clamp_or_default(&self, value: &str, default: &str) -> String {
        match self {
            ConfigRule::IntRange { min, max } => match value.parse::<i64>() {
                Ok(v) => v.clamp(*min, *max).to_string(),
                Err(_) => default.to_string(),
            },
            ConfigRule::RealRange { min, max } => match value.parse::<f64>() {
                Ok(v) => v.clamp(*min, *max).to_string(),
                Err(_) => default.to_string(),
            },
            ConfigRule::BoolLiteral | ConfigRule::Regex(_) => {
                if self.validate(value) {
                    value.to_string()
                } else {
                    default.to_string()
                }
            }
        }
    }
}

/// A tiny hand-rolled matcher for the one anchored-charset pattern the built-in schema
/// uses (`^[a-zA-Z0-9._-]+$`); avoids pulling in the `regex` crate for a single
/// character-class check.
fn regex_lite_match(pattern: &str, value: &str) -> bool {
    if pattern == r"^[a-zA-Z0-9._-]+$" {
        return !value.is_empty()
            && value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');
    }
    true
}

/// Deployment-level bootstrap configuration, loaded once at process start from
/// `~/.noesis/config.json`. Distinct from the runtime-validated Config KV above —
/// this only covers what must exist before the state store (and thus the KV table)
/// is even opened.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapConfig {
    pub agent_name: String,
    pub workspace_dir: String,
    pub db_path: Option<String>,
    pub model: String,
    #[serde(default)]
    pub gateway: GatewayBootstrap,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayBootstrap {
    #[serde(default)]
    pub bind: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            agent_name: "noesis".to_string(),
            workspace_dir: ".".to_string(),
            db_path: None,
            model: "gpt-4o-mini".to_string(),
            gateway: GatewayBootstrap::default(),
        }
    }
}

pub fn load_bootstrap_config(path: &std::path::Path) -> anyhow::Result<BootstrapConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: BootstrapConfig = serde_json::from_str(&content)?;
    Ok(config)
}
