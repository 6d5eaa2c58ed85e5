pub mod plan;
pub mod subscription;
pub mod transcription;

pub use plan::SubscriptionPlan;
pub use subscription::{OrganizationSubscription, SubscriptionStatus, UsagePeriod};
pub use transcription::{Transcription, TranscriptionStatus};
