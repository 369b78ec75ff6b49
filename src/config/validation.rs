use super::{AppConfig, ConfigError};

/// Semantic validation beyond what serde can express.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] naming the first offending field.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.server.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "server.timeout_secs must be greater than 0".to_string(),
        ));
    }
    if config.server.body_limit_bytes == 0 {
        return Err(ConfigError::Validation(
            "server.body_limit_bytes must be greater than 0".to_string(),
        ));
    }

    let upstream = &config.upstream;
    let url = url::Url::parse(&upstream.base_url).map_err(|err| {
        ConfigError::Validation(format!(
            "upstream.base_url is not a valid URL: {err}"
        ))
    })?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "upstream.base_url must use http or https, got '{}'",
            url.scheme()
        )));
    }
    if upstream.api_key.trim().is_empty() {
        return Err(ConfigError::Validation(
            "upstream.api_key must not be empty".to_string(),
        ));
    }
    if upstream.model.trim().is_empty() {
        return Err(ConfigError::Validation(
            "upstream.model must not be empty".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FeaturesConfig, ServerConfig, UpstreamConfig};

    fn valid_config() -> AppConfig {
        AppConfig {
            server: ServerConfig::default(),
            upstream: UpstreamConfig {
                base_url: "https://example.com/v1/chat/completions".to_string(),
                api_key: "key".to_string(),
                model: "model".to_string(),
            },
            features: FeaturesConfig::default(),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn test_rejects_bad_base_url() {
        let mut config = valid_config();
        config.upstream.base_url = "not a url".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_non_http_scheme() {
        let mut config = valid_config();
        config.upstream.base_url = "ftp://example.com/chat".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_empty_api_key() {
        let mut config = valid_config();
        config.upstream.api_key = "  ".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let mut config = valid_config();
        config.server.timeout_secs = 0;
        assert!(validate_config(&config).is_err());
    }
}
