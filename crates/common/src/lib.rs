//! Common utilities and shared types for the notes service.
//!
//! - **Configuration**: Application settings via [`Config`]
//! - **Error handling**: Unified error types via [`AppError`] and [`AppResult`]
//! - **ID Generation**: ULID row ids and UUID object names via [`IdGenerator`]
//! - **Object storage**: The [`ObjectStore`] capability (local, S3-compatible)
//! - **Cache**: The [`Cache`] capability (Redis, no-op)
//!
//! # Example
//!
//! ```no_run
//! use notes_common::{AppResult, Config, IdGenerator};
//!
//! fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     let id = IdGenerator::new().generate();
//!     println!("{} -> {id}", config.database.url);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod id;
pub mod storage;

pub use cache::{Cache, CacheError, CacheService, NoopCache, RedisCache};
pub use config::Config;
pub use error::{AppError, AppResult};
pub use id::{IdGenerator, extension_of};
#[cfg(feature = "s3")]
pub use storage::S3ObjectStore;
pub use storage::{
    HEALTH_CHECK_TIMEOUT, LocalObjectStore, ObjectStore, ObjectStoreService, PresignMethod,
};
