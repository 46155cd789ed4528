//! Migration orchestrator.
//!
//! # Overview
//!
//! - Exactly one migration is current: the most recently created one
//! - `MigrationService::start_migration` only creates a migration when none is
//!   in progress
//! - Stage-driving components call `assert_current_stage` before starting
//!   work, then `transition` forward or `error` on failure
//! - Stage changes are broadcast as `MigrationEvent`s
//!
//! # Usage
//!
//! ```ignore
//! let service = MigrationService::new(Arc::new(JsonFileStore::new(data_dir)));
//! service.start_migration().await?;
//! service.transition(MigrationStage::Authentication).await?;
//! ```

mod service;
mod types;

pub use service::MigrationService;
pub use types::{FailureCause, MigrationError, MigrationEvent};
