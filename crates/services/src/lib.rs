pub mod auth;
pub mod dao;
pub mod quota;
pub mod write_queue;

pub use auth::AuthService;
pub use quota::QuotaService;
pub use write_queue::DbWriteQueue;
