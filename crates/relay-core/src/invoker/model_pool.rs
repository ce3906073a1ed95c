use std::collections::HashMap;

#[allow(deprecated)]
use rig::client::completion::CompletionModelHandle;

/// Pool of named model tiers (e.g. "default", "router", "master", "role").
///
/// Unknown tier names fall back to "default", which is supplied at
/// construction so a lookup can never miss.
#[allow(deprecated)]
#[derive(Clone)]
pub struct ModelPool {
    default: (CompletionModelHandle<'static>, String),
    /// (model_handle, model_name_for_logging)
    tiers: HashMap<String, (CompletionModelHandle<'static>, String)>,
}

#[allow(deprecated)]
impl ModelPool {
    pub fn new(default: CompletionModelHandle<'static>, model_name: impl Into<String>) -> Self {
        Self {
            default: (default, model_name.into()),
            tiers: HashMap::new(),
        }
    }

    /// Register an additional tier. Registering "default" replaces the default.
    pub fn with_tier(
        mut self,
        tier: &str,
        handle: CompletionModelHandle<'static>,
        model_name: impl Into<String>,
    ) -> Self {
        if tier == "default" {
            self.default = (handle, model_name.into());
        } else {
            self.tiers
                .insert(tier.to_string(), (handle, model_name.into()));
        }
        self
    }

    /// Get a specific tier. Falls back to "default" if the tier is not found.
    pub fn get(&self, tier: &str) -> (&CompletionModelHandle<'static>, &str) {
        let (handle, name) = self.tiers.get(tier).unwrap_or(&self.default);
        (handle, name)
    }

    /// List all configured tier names, "default" first.
    pub fn tiers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tiers.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names.insert(0, "default");
        names
    }
}

#[cfg(test)]
#[allow(deprecated)]
mod tests {
    use std::sync::Arc;

    use rig::client::{CompletionClient, Nothing};
    use rig::providers::ollama;

    use super::*;

    fn handle(model_name: &str) -> CompletionModelHandle<'static> {
        let client: ollama::Client = ollama::Client::builder()
            .api_key(Nothing)
            .build()
            .unwrap();
        CompletionModelHandle::new(Arc::new(client.completion_model(model_name)))
    }

    #[test]
    fn unknown_tier_falls_back_to_default() {
        let pool = ModelPool::new(handle("llama3"), "llama3")
            .with_tier("router", handle("qwen2.5:0.5b"), "qwen2.5:0.5b");

        assert_eq!(pool.get("router").1, "qwen2.5:0.5b");
        assert_eq!(pool.get("master").1, "llama3");
        assert_eq!(pool.get("").1, "llama3");
    }

    #[test]
    fn registering_default_replaces_it() {
        let pool = ModelPool::new(handle("llama3"), "llama3")
            .with_tier("default", handle("mistral"), "mistral");

        assert_eq!(pool.get("default").1, "mistral");
        assert_eq!(pool.get("role").1, "mistral");
        assert_eq!(pool.tiers(), vec!["default"]);
    }

    #[test]
    fn tiers_list_default_first_then_sorted() {
        let pool = ModelPool::new(handle("llama3"), "llama3")
            .with_tier("role", handle("a"), "a")
            .with_tier("master", handle("b"), "b");
        assert_eq!(pool.tiers(), vec!["default", "master", "role"]);
    }
}
