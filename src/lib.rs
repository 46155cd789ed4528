pub mod config;
pub mod db;
pub mod deployment;
pub mod fs;
pub mod migration;
pub mod remote;
pub mod stage;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use config::{read_config, write_config, ConfigError, ConfigOverrides, MigrationConfig};
pub use db::{
    DatabaseArchiver, DatabaseMigrationError, DatabaseMigrationService, DatabaseRestorer,
    MigrationScheduler, TokioScheduler,
};
pub use deployment::{
    DeploymentError, DeploymentOutcome, InfrastructureDeploymentState, MigrationStackDeployment,
    StackApi,
};
pub use fs::{
    FileSystemMigrationReport, FilesystemMigrationService, FsMigrationError, ObjectTransfer,
    UploadQueue,
};
pub use migration::{FailureCause, MigrationError, MigrationEvent, MigrationService};
pub use remote::{RemoteCommandApi, RemoteCommandRunner, RemoteDatabaseRestore};
pub use stage::MigrationStage;
pub use store::{JsonFileStore, MemoryStore, Migration, MigrationContext, MigrationStore};
