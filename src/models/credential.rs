use serde::Serialize;

/// Stored gateway credential set. The access token is encrypted at rest
/// under the master key, scoped to the owning tenant (or `"platform"` for
/// the default set).
#[derive(Debug, Clone, Serialize)]
pub struct GatewayCredential {
    pub id: String,
    /// None = platform default set.
    pub tenant_id: Option<String>,
    pub gateway: String,
    #[serde(skip)]
    pub access_token_enc: Vec<u8>,
    pub sandbox: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl GatewayCredential {
    /// Encryption scope for this row's secret.
    pub fn scope(&self) -> &str {
        self.tenant_id.as_deref().unwrap_or(PLATFORM_SCOPE)
    }
}

/// Scope string used for platform-default credentials.
pub const PLATFORM_SCOPE: &str = "platform";

/// Which level of the hierarchy a credential set was resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialSource {
    Tenant,
    Platform,
}

impl CredentialSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tenant => "tenant",
            Self::Platform => "platform",
        }
    }
}

impl std::fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Decrypted, validated credentials ready for gateway API calls.
#[derive(Debug, Clone)]
pub struct ResolvedCredentials {
    pub access_token: String,
    pub sandbox: bool,
    pub source: CredentialSource,
}
