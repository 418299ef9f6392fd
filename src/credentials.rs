//! Gateway credential resolution and caching.
//!
//! Access tokens are stored encrypted per scope (tenant id or the platform
//! default) and resolved with tenant-over-platform precedence. Because a
//! resolution costs a DB read plus an AES decryption on the webhook hot
//! path, successful results are held in a small TTL cache. Failures are
//! never cached: a fixed credential must take effect on the next delivery.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rusqlite::Connection;

use crate::crypto::MasterKey;
use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::{CredentialSource, ResolvedCredentials};

/// How long a resolved credential stays cached before the next delivery
/// re-reads the store.
const DEFAULT_TTL_SECS: u64 = 300;

/// Time source for cache expiry. Injected so tests can advance time
/// without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock implementation used outside of tests.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

struct CacheEntry {
    credentials: ResolvedCredentials,
    cached_at: Instant,
}

/// TTL cache over decrypted gateway credentials, keyed by the scope the
/// caller asked for and the gateway name.
pub struct CredentialCache {
    entries: Mutex<HashMap<(String, String), CacheEntry>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl CredentialCache {
    pub fn new() -> Self {
        Self::with_clock(Duration::from_secs(DEFAULT_TTL_SECS), Arc::new(SystemClock))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    /// Resolve credentials for a gateway, preferring the tenant's own
    /// configuration over the platform default.
    ///
    /// Returns `CredentialsNotConfigured` when neither scope has a row and
    /// `CredentialsInvalid` when the stored secret decrypts to something
    /// unusable. Both leave the cache untouched.
    pub fn resolve(
        &self,
        conn: &Connection,
        master_key: &MasterKey,
        tenant_id: Option<&str>,
        gateway: &str,
    ) -> Result<ResolvedCredentials> {
        let key = (
            tenant_id.unwrap_or(crate::models::PLATFORM_SCOPE).to_string(),
            gateway.to_string(),
        );

        if let Some(credentials) = self.lookup_cached(&key) {
            return Ok(credentials);
        }

        let credentials = lookup_credentials(conn, master_key, tenant_id, gateway)?;
        self.store(key, credentials.clone());
        Ok(credentials)
    }

    /// Drop the cached entry for a scope so the next resolve re-reads the
    /// store. Called after a credential update.
    pub fn invalidate(&self, tenant_id: Option<&str>, gateway: &str) {
        let key = (
            tenant_id.unwrap_or(crate::models::PLATFORM_SCOPE).to_string(),
            gateway.to_string(),
        );
        self.entries.lock().unwrap().remove(&key);
    }

    fn lookup_cached(&self, key: &(String, String)) -> Option<ResolvedCredentials> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if now.duration_since(entry.cached_at) < self.ttl => {
                Some(entry.credentials.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn store(&self, key: (String, String), credentials: ResolvedCredentials) {
        let cached_at = self.clock.now();
        self.entries.lock().unwrap().insert(
            key,
            CacheEntry {
                credentials,
                cached_at,
            },
        );
    }
}

impl Default for CredentialCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Uncached resolution: tenant row first, platform default second, then
/// decrypt and validate the stored token.
pub fn lookup_credentials(
    conn: &Connection,
    master_key: &MasterKey,
    tenant_id: Option<&str>,
    gateway: &str,
) -> Result<ResolvedCredentials> {
    let tenant_row = match tenant_id {
        Some(tenant) => queries::get_gateway_credential(conn, Some(tenant), gateway)?,
        None => None,
    };

    let (row, source) = match tenant_row {
        Some(row) => (row, CredentialSource::Tenant),
        None => match queries::get_gateway_credential(conn, None, gateway)? {
            Some(row) => (row, CredentialSource::Platform),
            None => return Err(AppError::CredentialsNotConfigured(gateway.to_string())),
        },
    };

    let scope = row.scope().to_string();
    let plaintext = master_key
        .decrypt_secret(&scope, &row.access_token_enc)
        .map_err(|e| {
            AppError::CredentialsInvalid(format!("{} ({} scope): {}", gateway, scope, e))
        })?;

    let access_token = String::from_utf8(plaintext).map_err(|_| {
        AppError::CredentialsInvalid(format!(
            "{} ({} scope): stored access token is not valid UTF-8",
            gateway, scope
        ))
    })?;

    if let Err(reason) = validate_access_token(&access_token) {
        return Err(AppError::CredentialsInvalid(format!(
            "{} ({} scope): {}",
            gateway, scope, reason
        )));
    }

    Ok(ResolvedCredentials {
        access_token,
        sandbox: row.sandbox,
        source,
    })
}

/// Reject tokens that cannot possibly authenticate a gateway call.
///
/// The `[object ` check catches a known corruption shape where a config
/// writer stringified an object instead of extracting the secret, leaving
/// values like "[object Object]" in the store.
fn validate_access_token(token: &str) -> std::result::Result<(), &'static str> {
    if token.trim().is_empty() {
        return Err("stored access token is empty");
    }
    if token.contains("[object ") {
        return Err("stored access token is a stringified object, not a secret");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CredentialSource;

    struct ManualClock {
        now: Mutex<Instant>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                now: Mutex::new(Instant::now()),
            }
        }

        fn advance(&self, d: Duration) {
            let mut now = self.now.lock().unwrap();
            *now += d;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.now.lock().unwrap()
        }
    }

    fn creds(token: &str) -> ResolvedCredentials {
        ResolvedCredentials {
            access_token: token.to_string(),
            sandbox: false,
            source: CredentialSource::Tenant,
        }
    }

    #[test]
    fn test_validate_access_token() {
        assert!(validate_access_token("APP_USR-123456").is_ok());
        assert!(validate_access_token("").is_err());
        assert!(validate_access_token("   ").is_err());
        assert!(validate_access_token("[object Object]").is_err());
        assert!(validate_access_token("prefix [object Map]").is_err());
    }

    #[test]
    fn test_cache_returns_entry_within_ttl() {
        let clock = Arc::new(ManualClock::new());
        let cache = CredentialCache::with_clock(Duration::from_secs(300), clock.clone());
        let key = ("tnt_a".to_string(), "mercadopago".to_string());

        cache.store(key.clone(), creds("token-1"));
        clock.advance(Duration::from_secs(299));

        let hit = cache.lookup_cached(&key).expect("entry within ttl");
        assert_eq!(hit.access_token, "token-1");
    }

    #[test]
    fn test_cache_expires_entry_after_ttl() {
        let clock = Arc::new(ManualClock::new());
        let cache = CredentialCache::with_clock(Duration::from_secs(300), clock.clone());
        let key = ("tnt_a".to_string(), "mercadopago".to_string());

        cache.store(key.clone(), creds("token-1"));
        clock.advance(Duration::from_secs(301));

        assert!(cache.lookup_cached(&key).is_none());
        // The expired entry is gone, not resurrected by a later lookup.
        assert!(cache.lookup_cached(&key).is_none());
    }

    #[test]
    fn test_invalidate_drops_entry() {
        let cache = CredentialCache::new();
        let key = ("platform".to_string(), "stripe".to_string());

        cache.store(key.clone(), creds("token-1"));
        cache.invalidate(None, "stripe");

        assert!(cache.lookup_cached(&key).is_none());
    }

    #[test]
    fn test_scopes_are_cached_independently() {
        let cache = CredentialCache::new();

        cache.store(
            ("tnt_a".to_string(), "mercadopago".to_string()),
            creds("tenant-token"),
        );
        cache.store(
            ("platform".to_string(), "mercadopago".to_string()),
            creds("platform-token"),
        );

        let tenant = cache
            .lookup_cached(&("tnt_a".to_string(), "mercadopago".to_string()))
            .unwrap();
        let platform = cache
            .lookup_cached(&("platform".to_string(), "mercadopago".to_string()))
            .unwrap();
        assert_eq!(tenant.access_token, "tenant-token");
        assert_eq!(platform.access_token, "platform-token");
    }
}
