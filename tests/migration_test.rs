mod common;

use cloud_migrate::migration::{MigrationError, MigrationEvent, MigrationService};
use cloud_migrate::stage::MigrationStage;
use cloud_migrate::store::{JsonFileStore, MemoryStore, MigrationStore};
use common::{create_test_dir, migration_at};
use std::sync::Arc;

// ============ Start Migration Tests ============

#[tokio::test]
async fn test_start_migration_only_once_while_in_progress() {
    let service = MigrationService::new(Arc::new(MemoryStore::new()));

    assert!(service.start_migration().await.expect("Should start"));
    assert!(!service.start_migration().await.expect("Should not fail"));

    assert_eq!(
        service.current_stage().await.unwrap(),
        MigrationStage::Started
    );
    assert_eq!(service.store().list_migrations().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_start_migration_after_completed_run() {
    let service = migration_at(MigrationStage::Validate).await;
    service.finish_migration().await.expect("Should finish");

    assert!(service.start_migration().await.unwrap());
    let current = service.current_migration().await.unwrap();
    assert_eq!(current.stage, MigrationStage::Started);
    assert!(service.current_context().await.unwrap().start_epoch > 0);
}

#[tokio::test]
async fn test_start_migration_after_failed_run() {
    let service = migration_at(MigrationStage::FsMigrationCopyWait).await;
    service.error("disk full").await;

    assert!(service.start_migration().await.unwrap());
    assert!(service.last_error().await.unwrap().is_none());
}

// ============ Stage Transition Tests ============

#[tokio::test]
async fn test_full_walk_through_progress_stages() {
    let service = MigrationService::new(Arc::new(MemoryStore::new()));
    service.start_migration().await.unwrap();

    let mut stage = MigrationStage::Started;
    while let Some(next) = stage.next_stage() {
        let migration = service.transition(next).await.expect("Should transition");
        assert_eq!(migration.stage, next);
        stage = next;
    }

    assert_eq!(service.current_stage().await.unwrap(), MigrationStage::Done);
    assert!(matches!(
        service.transition(MigrationStage::Error).await,
        Err(MigrationError::InvalidStageTransition { .. })
    ));
}

#[tokio::test]
async fn test_stage_survives_restart_with_file_store() {
    let temp_dir = create_test_dir();

    {
        let service = MigrationService::new(Arc::new(JsonFileStore::new(temp_dir.path())));
        service.start_migration().await.unwrap();
        service
            .transition_with_context(MigrationStage::Authentication, |context| {
                context.service_url = "https://jira.example.com".to_string();
            })
            .await
            .unwrap();
    }

    let service = MigrationService::new(Arc::new(JsonFileStore::new(temp_dir.path())));
    assert_eq!(
        service.current_stage().await.unwrap(),
        MigrationStage::Authentication
    );
    assert_eq!(
        service.current_context().await.unwrap().service_url,
        "https://jira.example.com"
    );
    assert!(!service.start_migration().await.unwrap());
}

#[tokio::test]
async fn test_events_follow_the_workflow() {
    let service = MigrationService::new(Arc::new(MemoryStore::new()));
    let mut events = service.subscribe();

    service.start_migration().await.unwrap();
    service.transition(MigrationStage::Authentication).await.unwrap();
    service.error("bad credentials").await;

    let migration_id = service.current_migration().await.unwrap().id;
    assert_eq!(
        events.recv().await.unwrap(),
        MigrationEvent::Created {
            migration_id,
            stage: MigrationStage::Started
        }
    );
    assert_eq!(
        events.recv().await.unwrap(),
        MigrationEvent::StageTransition {
            migration_id,
            from: MigrationStage::Started,
            to: MigrationStage::Authentication
        }
    );
    assert_eq!(
        events.recv().await.unwrap(),
        MigrationEvent::StageTransition {
            migration_id,
            from: MigrationStage::Authentication,
            to: MigrationStage::Error
        }
    );
}

#[tokio::test]
async fn test_concurrent_transitions_apply_once() {
    let service = migration_at(MigrationStage::DbMigrationExport).await;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service
                    .transition(MigrationStage::DbMigrationExportWait)
                    .await
                    .is_ok()
            })
        })
        .collect();

    for handle in handles {
        // Repeating the transition into the current stage is a no-op
        assert!(handle.await.unwrap());
    }
    assert_eq!(
        service.current_stage().await.unwrap(),
        MigrationStage::DbMigrationExportWait
    );
}

#[tokio::test]
async fn test_operations_without_migration() {
    let service = MigrationService::new(Arc::new(MemoryStore::new()));

    assert!(matches!(
        service.transition(MigrationStage::Started).await,
        Err(MigrationError::NoMigrationInProgress)
    ));
    assert!(matches!(
        service.restart_retaining_infrastructure().await,
        Err(MigrationError::NoMigrationInProgress)
    ));
    assert!(matches!(
        service.assert_current_stage(MigrationStage::Started).await,
        Err(MigrationError::InvalidStage {
            expected: MigrationStage::Started,
            actual: MigrationStage::NotStarted
        })
    ));
}
