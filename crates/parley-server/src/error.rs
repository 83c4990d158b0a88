use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },
    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// `provider.api_key` -> `PARLEY_PROVIDER__API_KEY`
pub fn to_env_var(field_path: &str) -> String {
    format!("PARLEY_{}", field_path.replace('.', "__").to_uppercase())
}
