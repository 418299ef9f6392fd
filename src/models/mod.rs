pub mod course;
pub mod credential;
pub mod manual_charge;
pub mod plan;
pub mod points;
pub mod subscription;
pub mod tenant;
pub mod transaction;
pub mod webhook;

pub use course::{Course, CourseUnlock};
pub use credential::{CredentialSource, GatewayCredential, ResolvedCredentials, PLATFORM_SCOPE};
pub use manual_charge::{ManualCharge, ManualChargeStatus};
pub use plan::{Plan, PlanInterval};
pub use points::PointAward;
pub use subscription::Subscription;
pub use tenant::Tenant;
pub use transaction::{CreateTransaction, PaymentItemType, Transaction, TransactionStatus};
pub use webhook::{Admission, WebhookEvent};
