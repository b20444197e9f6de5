//! # SummitHub Core
//!
//! Shared building blocks for SummitHub services.
//!
//! ## Modules
//!
//! - `config`: Configuration loading and validation
//! - `database`: Shared PostgreSQL connection pool
//! - `error`: Error types
//! - `observability`: Structured logging setup
//! - `retry`: Exponential backoff retry utilities
//! - `validation`: Input validation helpers

pub mod config;
pub mod database;
pub mod error;
pub mod observability;
pub mod retry;
pub mod validation;

pub use config::{load_dotenv, ConfigLoader, DatabaseConfig, RedisConfig, ServiceConfig};
pub use database::{DatabasePool, PoolStats};
pub use error::SummitHubError;
pub use observability::{init_logging, LogConfig, LogFormat};
pub use retry::{retry_with_backoff, RetryPolicy};
