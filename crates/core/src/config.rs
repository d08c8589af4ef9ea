use std::collections::HashMap;
use std::env;
use std::str::FromStr;

use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Environment variable used to pick the active profile.
pub const PROFILE_VAR: &str = "PRIOSCHED_PROFILE";

/// Snapshot of environment overrides for one key prefix.
///
/// A key `min_critical_priority` under prefix `PRIOSCHED` is looked up as
/// `{PROFILE}_PRIOSCHED_MIN_CRITICAL_PRIORITY` first (when a profile is
/// active), falling back to `PRIOSCHED_MIN_CRITICAL_PRIORITY`. Empty values
/// count as unset.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    profile: String,
    prefix: String,
    vars: HashMap<String, String>,
}

impl EnvOverrides {
    /// Capture the process environment. The profile is read from `PRIOSCHED_PROFILE`.
    pub fn from_env(prefix: &str) -> Self {
        let profile = env::var(PROFILE_VAR).unwrap_or_default();
        Self::from_pairs(&profile, prefix, env::vars())
    }

    /// Build from explicit pairs; used by tests and embedding applications.
    pub fn from_pairs<I, K, V>(profile: &str, prefix: &str, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            profile: profile.trim().to_uppercase(),
            prefix: prefix.to_uppercase(),
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .filter(|(_, v)| !v.is_empty())
                .collect(),
        }
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    fn var_name(&self, key: &str) -> String {
        format!("{}_{}", self.prefix, key.to_uppercase())
    }

    /// Raw override for `key`, profile-prefixed variable first.
    pub fn get(&self, key: &str) -> Option<&str> {
        let name = self.var_name(key);
        if !self.profile.is_empty() {
            let prefixed = format!("{}_{}", self.profile, name);
            if let Some(v) = self.vars.get(&prefixed) {
                return Some(v.as_str());
            }
        }
        self.vars.get(&name).map(String::as_str)
    }

    /// Parsed override for `key`. Unparsable values are an error rather than
    /// silently falling back to the file value.
    pub fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::InvalidValue {
                    key: self.var_name(key),
                    value: raw.to_string(),
                }),
        }
    }
}
