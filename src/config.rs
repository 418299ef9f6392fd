use std::env;

use crate::crypto::MasterKey;
use crate::error::{AppError, Result};

#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub base_url: String,
    pub master_key: MasterKey,
    /// Receiver for payment notifications (None disables dispatch).
    pub notify_webhook_url: Option<String>,
    /// Processed webhook events older than this are purged (0 = keep forever).
    pub webhook_retention_days: i64,
    pub dev_mode: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("TALLY_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let base_url =
            env::var("BASE_URL").unwrap_or_else(|_| format!("http://{}:{}", host, port));

        let webhook_retention_days = env::var("TALLY_WEBHOOK_RETENTION_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(90);

        Ok(Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "tally.db".to_string()),
            base_url,
            master_key: load_master_key(dev_mode)?,
            notify_webhook_url: env::var("TALLY_NOTIFY_WEBHOOK_URL").ok(),
            webhook_retention_days,
            dev_mode,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Load the master encryption key from `TALLY_MASTER_KEY` (base64) or
/// `TALLY_MASTER_KEY_FILE`. Outside dev mode a missing key is fatal:
/// stored credentials cannot be decrypted without it.
fn load_master_key(dev_mode: bool) -> Result<MasterKey> {
    if let Ok(encoded) = env::var("TALLY_MASTER_KEY") {
        return MasterKey::from_base64(&encoded);
    }
    if let Ok(path) = env::var("TALLY_MASTER_KEY_FILE") {
        return load_master_key_from_file(&path);
    }
    if dev_mode {
        tracing::warn!(
            "No master key configured; using the all-zero DEV key. \
             Credentials encrypted with it are NOT protected."
        );
        return Ok(MasterKey::from_bytes([0u8; 32]));
    }
    Err(AppError::Internal(
        "TALLY_MASTER_KEY or TALLY_MASTER_KEY_FILE must be set (generate one with --generate-master-key)"
            .into(),
    ))
}

pub fn load_master_key_from_file(path: &str) -> Result<MasterKey> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        AppError::Internal(format!("Failed to read master key file {}: {}", path, e))
    })?;
    MasterKey::from_base64(contents.trim())
}
