pub mod base;
pub mod plan;
pub mod subscription;
pub mod transcription;

pub use base::{DaoError, DaoResult};
pub use plan::PlanDao;
pub use subscription::{SubscriptionDao, UsagePeriodDao};
pub use transcription::TranscriptionDao;
