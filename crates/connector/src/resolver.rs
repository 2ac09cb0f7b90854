use std::collections::HashMap;
use std::env;

use crate::auth::ApiCredentials;
use crate::error::ResolverError;
use crate::traits::KeyResolver;

const ENV_PREFIX: &str = "env:";

/// Resolves keys from environment variables
pub struct EnvResolver;

impl EnvResolver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EnvResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn source_vars(source: &str) -> Result<Vec<&str>, ResolverError> {
    let vars_part = source.strip_prefix(ENV_PREFIX).ok_or_else(|| {
        ResolverError::UnsupportedSource(format!("expected 'env:' prefix, got: {}", source))
    })?;
    let vars: Vec<&str> = vars_part
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .collect();
    if vars.is_empty() {
        return Err(ResolverError::UnsupportedSource("empty env source".to_string()));
    }
    Ok(vars)
}

impl KeyResolver for EnvResolver {
    /// Parses "env:VAR1,VAR2" and returns values from environment
    fn resolve(&self, source: &str) -> Result<HashMap<String, String>, ResolverError> {
        source_vars(source)?
            .into_iter()
            .map(|var| {
                env::var(var)
                    .map(|value| (var.to_string(), value))
                    .map_err(|_| ResolverError::MissingKey(var.to_string()))
            })
            .collect()
    }
}

/// Resolve an API key pair from a source naming exactly two variables,
/// key first and secret second (e.g. `env:BX_API_KEY,BX_API_SECRET`).
pub fn resolve_credentials(
    resolver: &dyn KeyResolver,
    source: &str,
) -> Result<ApiCredentials, ResolverError> {
    let vars = source_vars(source)?;
    let [key_var, secret_var] = vars.as_slice() else {
        return Err(ResolverError::UnsupportedSource(format!(
            "expected key and secret variables, got {}",
            vars.len()
        )));
    };
    let mut values = resolver.resolve(source)?;
    let api_key = values
        .remove(*key_var)
        .ok_or_else(|| ResolverError::MissingKey(key_var.to_string()))?;
    let api_secret = values
        .remove(*secret_var)
        .ok_or_else(|| ResolverError::MissingKey(secret_var.to_string()))?;
    Ok(ApiCredentials::new(api_key, api_secret))
}
