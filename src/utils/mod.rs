pub mod error;
pub mod supervisor;
pub mod ttl_cache;

pub use error::{ApiError, ApiResult};
pub use supervisor::{spawn_worker_thread, SupervisedWorker, Supervisor};
pub use ttl_cache::TtlCache;
