//! PostgreSQL implementations of the Vigil storage traits: targets with
//! their job history, the shared seen-set, and the cross-process scrape lock.

pub mod config;
pub mod database;
pub mod lock_repository;
pub mod seen_repository;
pub mod target_repository;

pub use config::DatabaseConfig;
pub use database::Database;
pub use lock_repository::LockRepository;
pub use seen_repository::SeenRepository;
pub use target_repository::TargetRepository;
