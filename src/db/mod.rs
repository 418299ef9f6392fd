mod from_row;
mod schema;
pub mod queries;

pub use schema::init_db;

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::credentials::CredentialCache;
use crate::crypto::MasterKey;
use crate::gateways::GatewayRegistry;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state holding the database pool and shared services
#[derive(Clone)]
pub struct AppState {
    /// Main database pool (tenants, transactions, webhook events, etc.)
    pub db: DbPool,
    /// Key encrypting gateway credentials at rest
    pub master_key: MasterKey,
    /// Shared HTTP client for gateway API calls and notifications
    pub http_client: reqwest::Client,
    /// Registered payment gateways, keyed by URL path segment
    pub gateways: Arc<GatewayRegistry>,
    /// TTL cache over decrypted gateway credentials
    pub credentials: Arc<CredentialCache>,
    /// Student notification webhook (fire-and-forget; None disables)
    pub notify_webhook_url: Option<String>,
    /// Base URL for checkout return links (e.g., https://pay.example.com)
    pub base_url: String,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path);
    Pool::builder().max_size(10).build(manager)
}
