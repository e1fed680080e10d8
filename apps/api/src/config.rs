use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::orchestration::AiSettings;
use crate::providers::ProviderKind;
use crate::rate_limit::{RateLimitConfig, RateLimitRule};

/// Application configuration loaded from environment variables.
/// Startup fails if no AI provider key is configured.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub rust_log: String,
    /// Falls back to the in-process store when unset.
    pub redis_url: Option<String>,
    pub providers: Vec<ProviderConfig>,
    pub cache_enabled: bool,
    pub cache_ttl_secs: u64,
    pub provider_timeout_secs: u64,
    pub usage_retention_days: u32,
    pub rate_limit_max_requests: u32,
    pub rate_limit_window_ms: u64,
    /// Honor `X-User-Id` and `X-Forwarded-For` for rate-limit identity. Only
    /// safe behind a proxy that sets (and strips client copies of) both.
    pub rate_limit_trust_forwarded: bool,
}

/// One enabled provider. Present only when its API key is set.
#[derive(Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub api_key: String,
    pub priority: i32,
    pub cost_per_unit: f64,
    pub model: String,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("api_key", &"<redacted>")
            .field("priority", &self.priority)
            .field("cost_per_unit", &self.cost_per_unit)
            .field("model", &self.model)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut providers = Vec::new();
        for kind in ProviderKind::ALL {
            let prefix = kind.env_prefix();
            let Some(api_key) = var(&format!("{prefix}_API_KEY")) else {
                continue;
            };
            providers.push(ProviderConfig {
                kind,
                api_key,
                priority: parse_or(&var, &format!("{prefix}_PRIORITY"), kind.default_priority())?,
                cost_per_unit: parse_or(
                    &var,
                    &format!("{prefix}_COST_PER_1K"),
                    kind.default_cost_per_unit(),
                )?,
                model: var(&format!("{prefix}_MODEL"))
                    .unwrap_or_else(|| kind.default_model().to_string()),
            });
        }
        if providers.is_empty() {
            bail!("No AI provider configured: set at least one of GEMINI_API_KEY, OPENAI_API_KEY, ANTHROPIC_API_KEY");
        }

        let config = Config {
            port: parse_or(&var, "PORT", 8080)?,
            rust_log: var("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            redis_url: var("REDIS_URL"),
            providers,
            cache_enabled: parse_or(&var, "AI_CACHE_ENABLED", true)?,
            cache_ttl_secs: parse_or(&var, "AI_CACHE_TTL_SECS", 86_400)?,
            provider_timeout_secs: parse_or(&var, "AI_PROVIDER_TIMEOUT_SECS", 30)?,
            usage_retention_days: parse_or(&var, "USAGE_RETENTION_DAYS", 30)?,
            rate_limit_max_requests: parse_or(&var, "RATE_LIMIT_MAX_REQUESTS", 100)?,
            rate_limit_window_ms: parse_or(&var, "RATE_LIMIT_WINDOW_MS", 60_000)?,
            rate_limit_trust_forwarded: parse_or(&var, "RATE_LIMIT_TRUST_FORWARDED", false)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        in_range("AI_CACHE_TTL_SECS", self.cache_ttl_secs, 1, MAX_CACHE_TTL_SECS)?;
        in_range("AI_PROVIDER_TIMEOUT_SECS", self.provider_timeout_secs, 1, 600)?;
        in_range(
            "USAGE_RETENTION_DAYS",
            u64::from(self.usage_retention_days),
            1,
            MAX_RETENTION_DAYS,
        )?;
        in_range(
            "RATE_LIMIT_MAX_REQUESTS",
            u64::from(self.rate_limit_max_requests),
            1,
            u64::from(u32::MAX),
        )?;
        in_range(
            "RATE_LIMIT_WINDOW_MS",
            self.rate_limit_window_ms,
            1,
            MAX_RATE_LIMIT_WINDOW_MS,
        )?;
        Ok(())
    }

    pub fn ai_settings(&self) -> AiSettings {
        AiSettings {
            cache_enabled: self.cache_enabled,
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            provider_timeout: Duration::from_secs(self.provider_timeout_secs),
            usage_retention_days: self.usage_retention_days,
        }
    }

    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig::new(RateLimitRule::new(
            self.rate_limit_max_requests,
            self.rate_limit_window_ms,
        ))
        .with_default_routes()
        .trust_forwarded(self.rate_limit_trust_forwarded)
    }
}

const MAX_CACHE_TTL_SECS: u64 = 30 * 24 * 60 * 60;
const MAX_RETENTION_DAYS: u64 = 366;
const MAX_RATE_LIMIT_WINDOW_MS: u64 = 24 * 60 * 60 * 1000;

fn in_range(key: &str, value: u64, min: u64, max: u64) -> Result<()> {
    if !(min..=max).contains(&value) {
        bail!("Environment variable '{key}' must be between {min} and {max}, got {value}");
    }
    Ok(())
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value: {raw}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config> {
        let env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults_with_single_provider() {
        let config = config_from(&[("OPENAI_API_KEY", "sk-test")]).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.rust_log, "info");
        assert!(config.redis_url.is_none());
        assert!(config.cache_enabled);
        assert_eq!(config.cache_ttl_secs, 86_400);
        assert_eq!(config.usage_retention_days, 30);

        assert_eq!(config.providers.len(), 1);
        let openai = &config.providers[0];
        assert_eq!(openai.kind, ProviderKind::OpenAi);
        assert_eq!(openai.priority, 2);
        assert_eq!(openai.model, ProviderKind::OpenAi.default_model());
    }

    #[test]
    fn test_no_provider_is_an_error() {
        let err = config_from(&[("PORT", "9000")]).unwrap_err();
        assert!(err.to_string().contains("No AI provider configured"));
    }

    #[test]
    fn test_blank_key_does_not_enable_provider() {
        let config =
            config_from(&[("GEMINI_API_KEY", "  "), ("ANTHROPIC_API_KEY", "key")]).unwrap();
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.providers[0].kind, ProviderKind::Anthropic);
    }

    #[test]
    fn test_provider_overrides() {
        let config = config_from(&[
            ("GEMINI_API_KEY", "g"),
            ("GEMINI_PRIORITY", "5"),
            ("GEMINI_COST_PER_1K", "0.25"),
            ("GEMINI_MODEL", "gemini-pro"),
        ])
        .unwrap();
        let gemini = &config.providers[0];
        assert_eq!(gemini.priority, 5);
        assert_eq!(gemini.cost_per_unit, 0.25);
        assert_eq!(gemini.model, "gemini-pro");
    }

    #[test]
    fn test_invalid_number_names_the_variable() {
        let err = config_from(&[("OPENAI_API_KEY", "k"), ("AI_CACHE_TTL_SECS", "soon")])
            .unwrap_err();
        assert!(err.to_string().contains("AI_CACHE_TTL_SECS"));
    }

    #[test]
    fn test_out_of_range_values_are_rejected() {
        for (key, value) in [
            ("AI_CACHE_TTL_SECS", "0"),
            ("USAGE_RETENTION_DAYS", "0"),
            ("RATE_LIMIT_WINDOW_MS", "0"),
            ("RATE_LIMIT_WINDOW_MS", "18446744073709551615"),
            ("RATE_LIMIT_MAX_REQUESTS", "0"),
            ("AI_PROVIDER_TIMEOUT_SECS", "0"),
        ] {
            let err = config_from(&[("OPENAI_API_KEY", "k"), (key, value)]).unwrap_err();
            assert!(err.to_string().contains(key), "{key}={value} accepted");
        }
    }

    #[test]
    fn test_forwarded_identity_is_opt_in() {
        let config = config_from(&[("OPENAI_API_KEY", "k")]).unwrap();
        assert!(!config.rate_limit().trust_forwarded);

        let config = config_from(&[
            ("OPENAI_API_KEY", "k"),
            ("RATE_LIMIT_TRUST_FORWARDED", "true"),
        ])
        .unwrap();
        assert!(config.rate_limit().trust_forwarded);
    }

    #[test]
    fn test_debug_redacts_api_keys() {
        let config = config_from(&[("ANTHROPIC_API_KEY", "super-secret")]).unwrap();
        let printed = format!("{config:?}");
        assert!(!printed.contains("super-secret"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn test_rate_limit_uses_global_default() {
        let config = config_from(&[
            ("OPENAI_API_KEY", "k"),
            ("RATE_LIMIT_MAX_REQUESTS", "7"),
            ("RATE_LIMIT_WINDOW_MS", "1000"),
        ])
        .unwrap();
        let rules = config.rate_limit();
        assert_eq!(rules.rule_for("/health"), RateLimitRule::new(7, 1000));
        assert_eq!(rules.rule_for("/api/v1/ai/analyze").max_requests, 10);
    }
}
