//! Runtime configuration for the coordinator.
//!
//! Everything is read once at startup. Opaque secrets (provider keys,
//! identity api key) come from environment variables first and fall back to
//! single-line key files next to the binary, so deployments can mount them
//! as files without exporting them into the process environment.

use once_cell::sync::Lazy;
use std::env;
use std::fs;

use crate::model::Region;

#[derive(Debug)]
pub struct Settings {
    /// Address the HTTP server binds to.
    pub bind_addr: String,
    /// Postgres URL; `None` selects the in-memory store (local runs).
    pub database_url: Option<String>,
    /// Redis URL; `None` selects the in-memory cache (local runs).
    pub redis_url: Option<String>,
    /// Base URL the task dispatcher posts back to (this service).
    pub task_base_url: String,
    /// Header carrying the task redelivery counter.
    pub retry_header: String,
    /// Seconds a plain cache entry lives.
    pub cache_ttl: u64,

    /// Verify enqueue tickets against the identity provider.
    pub identity_enabled: bool,
    pub identity_api_url: String,
    pub identity_app_id: String,
    pub identity_api_key: String,
    /// Accepted ticket when identity verification is disabled.
    pub shared_auth_token: String,

    pub provider_base_url: String,
    pub provider_profile_id: String,
    pub provider_access_key: String,
    pub provider_secret_key: String,
    pub provider_region_na: String,
    pub provider_region_eu: String,
    /// Region/service the provider expects in the request signature.
    pub provider_sig_region: String,
    pub provider_sig_service: String,

    /// Root directory for the filesystem object store.
    pub storage_root: String,
}

impl Settings {
    fn from_env() -> Self {
        Settings {
            bind_addr: var_or("BIND_ADDR", "127.0.0.1:8080"),
            database_url: env::var("DATABASE_URL").ok(),
            redis_url: env::var("REDIS_URL").ok(),
            task_base_url: var_or("TASK_BASE_URL", "http://127.0.0.1:8080"),
            retry_header: var_or("TASK_RETRY_HEADER", "X-Task-Retry-Count"),
            cache_ttl: env::var("CACHE_TTL")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(3600),

            identity_enabled: var_or("IDENTITY_ENABLED", "false") == "true",
            identity_api_url: var_or(
                "IDENTITY_API_URL",
                "https://partner.steam-api.com/ISteamUserAuth/AuthenticateUserTicket/v1/",
            ),
            identity_app_id: secret("IDENTITY_APP_ID", "identity-appid.key"),
            identity_api_key: secret("IDENTITY_API_KEY", "identity-api.key"),
            shared_auth_token: var_or("SHARED_AUTH_TOKEN", "SecretAuthToken"),

            provider_base_url: var_or("PROVIDER_API_URL", "https://api.multiplay.co.uk/cfp/v1"),
            provider_profile_id: secret("PROVIDER_PROFILE_ID", "provider-profile.key"),
            provider_access_key: secret("PROVIDER_ACCESS_KEY", "provider-access.key"),
            provider_secret_key: secret("PROVIDER_SECRET_KEY", "provider-secret.key"),
            provider_region_na: secret("PROVIDER_REGION_NA", "provider-region-na.key"),
            provider_region_eu: secret("PROVIDER_REGION_EU", "provider-region-eu.key"),
            provider_sig_region: var_or("PROVIDER_SIG_REGION", "eu-west-1"),
            provider_sig_service: var_or("PROVIDER_SIG_SERVICE", "cf"),

            storage_root: var_or("STORAGE_ROOT", "var/storage"),
        }
    }

    /// Provider-side region id for one of our coarse regions.
    pub fn region_id(&self, region: Region) -> &str {
        match region {
            Region::Na => &self.provider_region_na,
            Region::Eu => &self.provider_region_eu,
        }
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Env var first, key file second, empty string last.
fn secret(key: &str, file: &str) -> String {
    if let Ok(v) = env::var(key) {
        return v;
    }
    fs::read_to_string(file)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

static SETTINGS: Lazy<Settings> = Lazy::new(Settings::from_env);

pub fn settings() -> &'static Settings {
    &SETTINGS
}
