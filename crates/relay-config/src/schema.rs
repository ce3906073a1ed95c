use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub agents: AgentsConfig,
    pub providers: ProvidersConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentsConfig {
    pub defaults: AgentDefaults,
    /// Named model tiers. Must contain at least a "default" entry.
    /// The pipeline looks up "router", "master" and "role" and falls back
    /// to "default" for any tier that is missing.
    pub models: HashMap<String, ModelRef>,
}

/// Reference to a provider + model combination for a named tier.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelRef {
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentDefaults {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ProvidersConfig {
    pub ollama: Option<ProviderConfig>,
    pub anthropic: Option<ProviderConfig>,
    pub openai: Option<ProviderConfig>,
    pub openrouter: Option<ProviderConfig>,
    pub deepseek: Option<ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    /// Base URL override, e.g. an OpenAI-compatible endpoint.
    pub api_base: Option<String>,
}

/// Timeouts and fan-out limits for the classify → decompose → execute run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    pub classify_timeout_secs: u64,
    pub decompose_timeout_secs: u64,
    /// Per role. An expired role is reported as failed, siblings keep running.
    pub role_timeout_secs: u64,
    pub max_concurrent_roles: usize,
    /// Upper bound on decomposed roles. 0 means unlimited.
    pub max_roles: usize,
    /// Stream role completions instead of waiting for the full response.
    pub streaming: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            classify_timeout_secs: 60,
            decompose_timeout_secs: 120,
            role_timeout_secs: 300,
            max_concurrent_roles: 4,
            max_roles: 0,
            streaming: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_uses_defaults() {
        let cfg: Config = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(cfg.pipeline, PipelineConfig::default());
        assert_eq!(cfg.agents.defaults.max_tokens, 4096);
        assert!(cfg.agents.models.is_empty());
    }

    #[test]
    fn pipeline_fields_are_camel_case() {
        let cfg: Config = serde_json::from_value(serde_json::json!({
            "pipeline": {
                "roleTimeoutSecs": 5,
                "maxConcurrentRoles": 2,
                "streaming": true
            }
        }))
        .unwrap();
        assert_eq!(cfg.pipeline.role_timeout_secs, 5);
        assert_eq!(cfg.pipeline.max_concurrent_roles, 2);
        assert!(cfg.pipeline.streaming);
        // Untouched fields keep their defaults
        assert_eq!(cfg.pipeline.classify_timeout_secs, 60);
    }

    #[test]
    fn model_tiers_parsed() {
        let cfg: Config = serde_json::from_value(serde_json::json!({
            "agents": {
                "models": {
                    "default": { "provider": "openai", "model": "qwen-turbo" },
                    "master": { "provider": "deepseek", "model": "deepseek-chat" }
                }
            },
            "providers": {
                "openai": { "apiBase": "https://dashscope.aliyuncs.com/compatible-mode/v1" }
            }
        }))
        .unwrap();
        assert_eq!(cfg.agents.models.len(), 2);
        assert_eq!(
            cfg.agents.models["master"],
            ModelRef {
                provider: "deepseek".into(),
                model: "deepseek-chat".into()
            }
        );
        let openai = cfg.providers.openai.unwrap();
        assert!(openai.api_key.is_none());
        assert!(openai.api_base.unwrap().contains("dashscope"));
    }
}
