use std::str::FromStr;
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::catalog::SourceCatalog;
use crate::dispatch::DispatchConfig;
use crate::error::AppError;
use crate::session_pool::SessionPoolConfig;
use crate::throttle::ThrottleConfig;

/// Tunables for the whole discovery engine.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub pool: SessionPoolConfig,
    pub throttle: ThrottleConfig,
    pub dispatch: DispatchConfig,
    /// Per-source adapter timeout.
    pub source_timeout: Option<Duration>,
    /// Tie-break order that overrides catalog reliability tiers.
    pub source_priority: Vec<String>,
}

impl EngineConfig {
    /// Read configuration from environment variables.
    ///
    /// All variables are optional:
    /// - `PRICEHOUND_CACHE_TTL_SECS` (default 3600)
    /// - `PRICEHOUND_CACHE_MAX_ENTRIES` (default 1000)
    /// - `PRICEHOUND_MAX_SESSIONS` (default 5)
    /// - `PRICEHOUND_SOURCE_TIMEOUT_SECS` (default: each adapter's own, 30)
    /// - `PRICEHOUND_DISPATCH_DEADLINE_SECS` (default 45)
    /// - `PRICEHOUND_RATE_LIMIT_MS` (default 1000)
    /// - `PRICEHOUND_RATE_LIMIT_JITTER_MS` (default 0)
    /// - `PRICEHOUND_RATE_LIMIT_OVERRIDES` (per-source spacing, e.g. `amazon=2000,eprice=1500`)
    /// - `PRICEHOUND_SOURCE_PRIORITY` (comma-separated source ids)
    /// - `PRICEHOUND_LOCALE` (default `it-IT`)
    /// - `PRICEHOUND_USER_AGENT` (default: rotate built-in list)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env), reading values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(secs) = parse_positive::<u64>(&lookup, "PRICEHOUND_CACHE_TTL_SECS")? {
            config.cache.ttl = Duration::from_secs(secs);
        }
        if let Some(n) = parse_positive::<u64>(&lookup, "PRICEHOUND_CACHE_MAX_ENTRIES")? {
            config.cache.max_entries = n;
        }
        if let Some(n) = parse_positive::<usize>(&lookup, "PRICEHOUND_MAX_SESSIONS")? {
            config.pool.max_sessions = n;
        }
        if let Some(secs) = parse_positive::<u64>(&lookup, "PRICEHOUND_SOURCE_TIMEOUT_SECS")? {
            config.source_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(secs) = parse_positive::<u64>(&lookup, "PRICEHOUND_DISPATCH_DEADLINE_SECS")? {
            config.dispatch.deadline = Duration::from_secs(secs);
        }
        if let Some(ms) = parse::<u64>(&lookup, "PRICEHOUND_RATE_LIMIT_MS")? {
            config.throttle.delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64>(&lookup, "PRICEHOUND_RATE_LIMIT_JITTER_MS")? {
            config.throttle.jitter = Duration::from_millis(ms);
        }
        if let Some(raw) = lookup("PRICEHOUND_RATE_LIMIT_OVERRIDES") {
            for (source, delay) in parse_rate_overrides(&raw)? {
                config.throttle = config.throttle.with_override(source, delay);
            }
        }
        if let Some(locale) = lookup("PRICEHOUND_LOCALE").filter(|v| !v.trim().is_empty()) {
            config.pool.locale = locale.trim().to_string();
        }
        if let Some(ua) = lookup("PRICEHOUND_USER_AGENT").filter(|v| !v.trim().is_empty()) {
            config.pool.user_agent = Some(ua.trim().to_string());
        }
        if let Some(raw) = lookup("PRICEHOUND_SOURCE_PRIORITY") {
            config.source_priority = parse_priority(&raw)?;
        }

        Ok(config)
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, AppError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            AppError::ConfigError(format!(
                "Invalid {key} '{raw}': must be a non-negative integer"
            ))
        }),
    }
}

fn parse_positive<T: FromStr + Default + PartialEq>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, AppError> {
    match parse::<T>(lookup, key)? {
        Some(value) if value == T::default() => Err(AppError::ConfigError(format!(
            "{key} must be at least 1"
        ))),
        other => Ok(other),
    }
}

fn parse_priority(raw: &str) -> Result<Vec<String>, AppError> {
    let catalog = SourceCatalog::default();
    let mut priority = Vec::new();
    for id in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !catalog.contains(id) {
            return Err(AppError::ConfigError(format!(
                "PRICEHOUND_SOURCE_PRIORITY names unknown source '{id}'"
            )));
        }
        if !priority.iter().any(|p| p == id) {
            priority.push(id.to_string());
        }
    }
    Ok(priority)
}

/// `source=millis` pairs, comma-separated.
fn parse_rate_overrides(raw: &str) -> Result<Vec<(String, Duration)>, AppError> {
    let catalog = SourceCatalog::default();
    let mut overrides = Vec::new();
    for pair in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let invalid = || {
            AppError::ConfigError(format!(
                "Invalid PRICEHOUND_RATE_LIMIT_OVERRIDES entry '{pair}': expected source=millis"
            ))
        };
        let (id, ms) = pair.split_once('=').ok_or_else(invalid)?;
        let id = id.trim();
        if !catalog.contains(id) {
            return Err(AppError::ConfigError(format!(
                "PRICEHOUND_RATE_LIMIT_OVERRIDES names unknown source '{id}'"
            )));
        }
        let ms: u64 = ms.trim().parse().map_err(|_| invalid())?;
        overrides.push((id.to_string(), Duration::from_millis(ms)));
    }
    Ok(overrides)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<EngineConfig, AppError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EngineConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_without_variables() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.cache.ttl, Duration::from_secs(3600));
        assert_eq!(config.cache.max_entries, 1000);
        assert_eq!(config.pool.max_sessions, 5);
        assert_eq!(config.dispatch.deadline, Duration::from_secs(45));
        assert_eq!(config.throttle.delay, Duration::from_secs(1));
        assert!(config.source_timeout.is_none());
        assert!(config.source_priority.is_empty());
    }

    #[test]
    fn reads_overrides() {
        let config = from_pairs(&[
            ("PRICEHOUND_CACHE_TTL_SECS", "60"),
            ("PRICEHOUND_MAX_SESSIONS", "2"),
            ("PRICEHOUND_SOURCE_TIMEOUT_SECS", "10"),
            ("PRICEHOUND_RATE_LIMIT_MS", "0"),
            ("PRICEHOUND_SOURCE_PRIORITY", "eprice, amazon,eprice"),
            ("PRICEHOUND_LOCALE", "en-GB"),
        ])
        .unwrap();

        assert_eq!(config.cache.ttl, Duration::from_secs(60));
        assert_eq!(config.pool.max_sessions, 2);
        assert_eq!(config.source_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.throttle.delay, Duration::ZERO);
        assert_eq!(config.source_priority, vec!["eprice", "amazon"]);
        assert_eq!(config.pool.locale, "en-GB");
    }

    #[test]
    fn rejects_garbage_and_zero() {
        let err = from_pairs(&[("PRICEHOUND_CACHE_TTL_SECS", "soon")]).unwrap_err();
        assert!(matches!(err, AppError::ConfigError(_)));

        let err = from_pairs(&[("PRICEHOUND_MAX_SESSIONS", "0")]).unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn rejects_unknown_priority_source() {
        let err = from_pairs(&[("PRICEHOUND_SOURCE_PRIORITY", "amazon,ebay")]).unwrap_err();
        assert!(err.to_string().contains("ebay"));
    }

    #[test]
    fn reads_per_source_rate_limits() {
        let config = from_pairs(&[
            ("PRICEHOUND_RATE_LIMIT_MS", "500"),
            ("PRICEHOUND_RATE_LIMIT_OVERRIDES", "amazon=2000, eprice = 1500"),
        ])
        .unwrap();

        assert_eq!(config.throttle.delay, Duration::from_millis(500));
        assert_eq!(config.throttle.overrides.len(), 2);
        assert_eq!(config.throttle.overrides["amazon"], Duration::from_millis(2000));
        assert_eq!(config.throttle.overrides["eprice"], Duration::from_millis(1500));
    }

    #[test]
    fn rejects_malformed_rate_limit_overrides() {
        for raw in ["amazon", "amazon=fast", "ebay=1000"] {
            let err = from_pairs(&[("PRICEHOUND_RATE_LIMIT_OVERRIDES", raw)]).unwrap_err();
            assert!(matches!(err, AppError::ConfigError(_)), "{raw}");
        }
    }
}
