//! Environment-driven configuration.
//!
//! All variables carry the `DSDE_` prefix. Only `server_addr` and
//! `log_level` have defaults; the AWS and Postgres settings are validated
//! by the clients that consume them.

/// Flat configuration record populated from the environment.
#[derive(Clone, Debug, Default)]
pub struct Config {
    pub server_addr: String,
    pub log_level: String,

    pub aws_region: String,
    pub kms_key_id: String,
    pub s3_bucket: String,
    pub postgres_dsn: String,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(format!("DSDE_{}", key)).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Read configuration from the environment. Missing service settings
    /// are left empty and rejected later by the client constructors.
    pub fn from_env() -> Self {
        Self {
            server_addr: env_or("SERVER_ADDR", "0.0.0.0:8080"),
            log_level: env_or("LOG_LEVEL", "info"),

            aws_region: env_or("AWS_REGION", ""),
            kms_key_id: env_or("KMS_KEY_ID", ""),
            s3_bucket: env_or("S3_BUCKET", ""),
            postgres_dsn: env_or("POSTGRES_DSN", ""),
        }
    }
}
