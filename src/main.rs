use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use cloud_migrate::config::{read_config, write_config, MigrationConfig};
use cloud_migrate::deployment::{
    MigrationStackDeployment, StackApi, StackApiError, StackDescription, StackStatus,
};
use cloud_migrate::fs::{FilesystemMigrationService, LocalDirectoryTransfer};
use cloud_migrate::migration::MigrationService;
use cloud_migrate::store::JsonFileStore;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_DATA_DIR: &str = ".cloud-migrate";

/// cloud-migrate - Inspect and drive the migration of an application to the cloud
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding the migration records and configuration
    #[arg(long, env = "CLOUD_MIGRATE_DATA_DIR", default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the current migration stage, last error and deployment state
    Status,
    /// Start a new migration unless one is in progress
    Start,
    /// Start over from the filesystem copy, keeping the deployed migration stack
    Restart,
    /// Forget the migration stack details persisted for the current migration
    ClearStackDetails,
    /// Mark a validated migration as done
    Finish,
    /// Write the default configuration unless one exists, then print it
    Config,
    /// Copy a directory into a local bucket directory
    CopyFiles {
        /// Directory to migrate
        #[arg(long)]
        source: PathBuf,
        /// Directory standing in for object storage, one subdirectory per bucket
        #[arg(long)]
        target: PathBuf,
    },
}

/// The command line never talks to the stack provider. Commands only read
/// and update what the orchestrator persisted.
struct DisconnectedStackApi;

#[async_trait]
impl StackApi for DisconnectedStackApi {
    async fn provision(
        &self,
        _template_url: &str,
        _stack_name: &str,
        _params: &HashMap<String, String>,
    ) -> Result<String, StackApiError> {
        Err(disconnected())
    }

    async fn status(&self, _stack_name: &str) -> Result<StackStatus, StackApiError> {
        Err(disconnected())
    }

    async fn describe(&self, _stack_name: &str) -> Result<Option<StackDescription>, StackApiError> {
        Err(disconnected())
    }

    async fn group_instances(&self, _group: &str) -> Result<Vec<String>, StackApiError> {
        Err(disconnected())
    }
}

fn disconnected() -> StackApiError {
    StackApiError("no stack provider available from the command line".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let data_dir = args.data_dir;

    let config = read_config(&data_dir)
        .await
        .with_context(|| format!("reading configuration from {}", data_dir.display()))?
        .unwrap_or_default();

    let store = Arc::new(JsonFileStore::new(&data_dir));
    let migration = Arc::new(MigrationService::new(store));
    let deployment = Arc::new(MigrationStackDeployment::new(
        Arc::clone(&migration),
        Arc::new(DisconnectedStackApi),
        &config,
    ));

    match args.command {
        Command::Status => {
            let stage = migration.current_stage().await?;
            println!("stage: {}", stage);
            if stage != cloud_migrate::MigrationStage::NotStarted {
                let migration_record = migration.current_migration().await?;
                println!("migration: {}", migration_record.id);
                if let Some(message) = migration.last_error().await? {
                    println!("error: {}", message);
                }
            }
            println!("deployment: {}", deployment.deployment_status().await?);
        }
        Command::Start => {
            if migration.start_migration().await? {
                println!("started migration {}", migration.current_migration().await?.id);
            } else {
                println!("a migration is already in progress");
            }
        }
        Command::Restart => {
            let restarted = migration.restart_retaining_infrastructure().await?;
            println!("restarted as migration {} at {}", restarted.id, restarted.stage);
        }
        Command::ClearStackDetails => {
            deployment.clear_persisted_stack_details().await?;
            println!("cleared migration stack details");
        }
        Command::Finish => {
            let finished = migration.finish_migration().await?;
            println!("migration {} is {}", finished.id, finished.stage);
        }
        Command::Config => {
            if read_config(&data_dir).await?.is_none() {
                write_config(&data_dir, &MigrationConfig::default()).await?;
                info!(data_dir = %data_dir.display(), "Wrote default configuration");
            }
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Command::CopyFiles { source, target } => {
            let fs_migration = FilesystemMigrationService::new(
                Arc::clone(&migration),
                Arc::clone(&deployment),
                Arc::new(LocalDirectoryTransfer::new(target)),
                &config,
            );
            let report = fs_migration.start_migration(&source).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            for failed in fs_migration.report().await.failed_files() {
                println!("failed: {} ({})", failed.path.display(), failed.reason);
            }
        }
    }

    Ok(())
}
