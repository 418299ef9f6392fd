//! Prefixed ID generation for tally entities.
//!
//! All internal IDs carry an entity prefix so they can never be confused
//! with gateway-side identifiers (MercadoPago's numeric payment ids,
//! Stripe's `ch_` / `re_` objects) in logs or in `external_reference`
//! round-trips.
//!
//! Format: `{entity}_{uuid_simple}` (32 hex chars, no hyphens)

use uuid::Uuid;

/// Entity types that have prefixed IDs in tally.
#[derive(Debug, Clone, Copy)]
pub enum EntityType {
    Tenant,
    Plan,
    Course,
    ManualCharge,
    Transaction,
    Subscription,
    CourseUnlock,
    PointAward,
    Credential,
}

impl EntityType {
    /// Returns the prefix for this entity type.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Tenant => "tnt",
            Self::Plan => "pln",
            Self::Course => "crs",
            Self::ManualCharge => "chg",
            Self::Transaction => "tx",
            Self::Subscription => "sub",
            Self::CourseUnlock => "unl",
            Self::PointAward => "pts",
            Self::Credential => "cred",
        }
    }

    /// Generates a new prefixed ID for this entity type.
    pub fn gen_id(&self) -> String {
        format!("{}_{}", self.prefix(), Uuid::new_v4().as_simple())
    }
}
