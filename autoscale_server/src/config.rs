//! Server configuration from environment variables.
//!
//! Secrets are checked lazily: a missing secret surfaces as a 500 on the
//! endpoint that needs it, not at startup, so a partially configured
//! deployment still serves what it can.

/// Environment variable names, with their legacy fallbacks.
const ENV_INGEST_SECRET: &str = "FUNCTION_SECRET";
const ENV_PROCESSOR_SECRET: &str = "FUNCTION_SECRET_PROCESSOR";
const ENV_DEFAULT_HOUSEHOLD: &str = "DEFAULT_HOUSEHOLD_ID";
const ENV_DB_URL: [&str; 2] = ["SB_URL", "SUPABASE_URL"];
const ENV_DB_KEY: [&str; 2] = ["SB_SERVICE_ROLE_KEY", "SUPABASE_SERVICE_ROLE_KEY"];

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// Shared secret the device presents on /ingest.
    pub ingest_secret: Option<String>,
    /// Shared secret for /process and /devices.
    pub processor_secret: Option<String>,
    /// When set, unknown devices auto-register into this household.
    pub default_household_id: Option<String>,
    /// External relational backend, when one is wired in.
    pub db_url: Option<String>,
    pub db_service_key: Option<String>,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            ingest_secret: env_opt(ENV_INGEST_SECRET),
            processor_secret: env_opt(ENV_PROCESSOR_SECRET),
            default_household_id: env_opt(ENV_DEFAULT_HOUSEHOLD),
            db_url: first_env(&ENV_DB_URL),
            db_service_key: first_env(&ENV_DB_KEY),
        }
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn first_env(names: &[&str]) -> Option<String> {
    names.iter().find_map(|n| env_opt(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_fully_unset() {
        let cfg = ServerConfig::default();
        assert!(cfg.ingest_secret.is_none());
        assert!(cfg.default_household_id.is_none());
    }
}
