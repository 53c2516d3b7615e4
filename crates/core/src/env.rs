//! Environment-variable helpers shared by the configuration loaders.

use std::str::FromStr;

/// Read `key` from the environment and parse it, falling back to
/// `default` when the variable is unset or unparsable.
///
/// An unparsable value is logged at `warn` so misconfiguration is visible.
pub fn var_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, "Ignoring unparsable environment variable");
                default
            }
        },
        Err(_) => default,
    }
}
