//! Credential provider: a narrow seam between the engine and wherever vendor
//! API keys actually live, so prompt/telemetry payload construction never
//! has direct access to a raw environment dump.

use std::collections::HashMap;

/// Looks up a named credential. Implementations must never be queried for
/// more than the handful of names the engine actually needs.
pub trait CredentialProvider: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
}

/// Default provider: one `std::env::var` lookup per name, nothing cached.
#[derive(Default)]
pub struct EnvCredentialProvider;

impl EnvCredentialProvider {
    pub fn new() -> Self {
        Self
    }
}

impl CredentialProvider for EnvCredentialProvider {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Fixed in-memory provider, used by tests and by the CLI's `--set-cred` flag.
pub struct StaticCredentialProvider {
    values: HashMap<String, String>,
}

impl StaticCredentialProvider {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }
}

impl CredentialProvider for StaticCredentialProvider {
    fn get(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_provider_reads_process_environment() {
        std::env::set_var("AGENT_WEAVE_TEST_CRED", "secret-value");
        let provider = EnvCredentialProvider::new();
        assert_eq!(provider.get("AGENT_WEAVE_TEST_CRED"), Some("secret-value".to_string()));
        std::env::remove_var("AGENT_WEAVE_TEST_CRED");
    }

    #[test]
    fn env_provider_missing_var_is_none() {
        let provider = EnvCredentialProvider::new();
        assert_eq!(provider.get("AGENT_WEAVE_DOES_NOT_EXIST"), None);
    }

    #[test]
    fn static_provider_serves_fixed_values() {
        let mut values = HashMap::new();
        values.insert("OPENAI_API_KEY".to_string(), "sk-test".to_string());
        let provider = StaticCredentialProvider::new(values);
        assert_eq!(provider.get("OPENAI_API_KEY"), Some("sk-test".to_string()));
        assert_eq!(provider.get("UNKNOWN"), None);
    }
}
