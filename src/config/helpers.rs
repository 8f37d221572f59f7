use std::str::FromStr;

use crate::error::ConfigError;

/// Read an environment variable, treating empty values as unset.
pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(val) if val.trim().is_empty() => Ok(None),
        Ok(val) => Ok(Some(val.trim().to_string())),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("failed to read {key}: {e}"),
        }),
    }
}

/// Parse an optional environment variable, falling back to `default`.
pub(crate) fn parse_optional_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(key)?
        .map(|s| {
            s.parse().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("must be a valid {}: {e}", std::any::type_name::<T>()),
            })
        })
        .transpose()
        .map(|opt| opt.unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test uses its own variable name; the process environment is shared
    // across test threads.

    #[test]
    fn test_empty_value_is_unset() {
        unsafe { std::env::set_var("DOCKHAND_TEST_HELPERS_EMPTY", "   ") };
        assert_eq!(optional_env("DOCKHAND_TEST_HELPERS_EMPTY").unwrap(), None);
    }

    #[test]
    fn test_parse_falls_back_to_default() {
        let value: u64 = parse_optional_env("DOCKHAND_TEST_HELPERS_UNSET", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        unsafe { std::env::set_var("DOCKHAND_TEST_HELPERS_GARBAGE", "soon") };
        let err = parse_optional_env::<i64>("DOCKHAND_TEST_HELPERS_GARBAGE", 2).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "DOCKHAND_TEST_HELPERS_GARBAGE"));
    }
}
