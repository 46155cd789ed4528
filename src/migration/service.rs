//! The migration orchestrator.

use super::types::{FailureCause, MigrationError, MigrationEvent};
use crate::stage::{can_transition, MigrationStage};
use crate::store::{Migration, MigrationContext, MigrationStore, StoreError};
use crate::utils::{now_epoch, now_iso};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Single entry point for reading and mutating the current migration.
///
/// Every mutation of the current migration or its context goes through a
/// single writer lock, so a transition driven by the deployment poller cannot
/// interleave with one driven by the database sequencer. Reads always go to
/// the store.
pub struct MigrationService {
    store: Arc<dyn MigrationStore>,
    write_lock: Mutex<()>,
    events: broadcast::Sender<MigrationEvent>,
}

impl MigrationService {
    pub fn new(store: Arc<dyn MigrationStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            write_lock: Mutex::new(()),
            events,
        }
    }

    pub fn store(&self) -> &Arc<dyn MigrationStore> {
        &self.store
    }

    /// Receive stage change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<MigrationEvent> {
        self.events.subscribe()
    }

    /// Begin a new migration.
    ///
    /// Returns `false` without doing anything while another migration is in
    /// progress. A migration that reached `Done` or an error stage does not
    /// block a new one.
    pub async fn start_migration(&self) -> Result<bool, MigrationError> {
        let _guard = self.write_lock.lock().await;

        let context = MigrationContext {
            start_epoch: now_epoch(),
            ..Default::default()
        };

        match self
            .store
            .create_migration(MigrationStage::Started, context)
            .await
        {
            Ok(migration) => {
                info!(migration_id = migration.id, "Created migration");
                self.publish(MigrationEvent::Created {
                    migration_id: migration.id,
                    stage: migration.stage,
                });
                Ok(true)
            }
            Err(StoreError::MigrationInProgress(id)) => {
                info!(migration_id = id, "Migration already in progress, not creating a new one");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Start over from the filesystem copy, keeping the migration stack that
    /// was already deployed for the previous run.
    pub async fn restart_retaining_infrastructure(&self) -> Result<Migration, MigrationError> {
        let _guard = self.write_lock.lock().await;

        let previous = self.load_current().await?;
        if !previous.stage.is_terminal() {
            return Err(MigrationError::StageNotAllowed {
                operation: "restarting a migration",
                actual: previous.stage,
            });
        }

        let previous_context = self.store.load_context(previous.id).await?;
        let context = MigrationContext {
            start_epoch: now_epoch(),
            ..previous_context.retaining_infrastructure()
        };

        let migration = self
            .store
            .create_migration(MigrationStage::FsMigrationCopy, context)
            .await?;

        info!(
            previous_id = previous.id,
            migration_id = migration.id,
            "Restarted migration retaining infrastructure"
        );
        self.publish(MigrationEvent::Created {
            migration_id: migration.id,
            stage: migration.stage,
        });
        Ok(migration)
    }

    pub async fn current_migration(&self) -> Result<Migration, MigrationError> {
        self.load_current().await
    }

    /// Stage of the current migration, `NotStarted` when there is none.
    pub async fn current_stage(&self) -> Result<MigrationStage, MigrationError> {
        Ok(self
            .store
            .find_current()
            .await?
            .map(|m| m.stage)
            .unwrap_or(MigrationStage::NotStarted))
    }

    /// Context of the current migration, freshly loaded from the store.
    pub async fn current_context(&self) -> Result<MigrationContext, MigrationError> {
        let migration = self.load_current().await?;
        Ok(self.store.load_context(migration.id).await?)
    }

    /// Error message recorded by the last `error` call, if any.
    pub async fn last_error(&self) -> Result<Option<String>, MigrationError> {
        let context = self.current_context().await?;
        Ok(Some(context.error_message).filter(|m| !m.is_empty()))
    }

    pub async fn assert_current_stage(
        &self,
        expected: MigrationStage,
    ) -> Result<(), MigrationError> {
        let actual = self.current_stage().await?;
        if actual != expected {
            return Err(MigrationError::InvalidStage { expected, actual });
        }
        Ok(())
    }

    /// Whether `migration_id` is still the current migration and sits in
    /// `stage`. Background tasks check this before acting. A failed store
    /// read is returned as an error, never as "not current".
    pub async fn is_current(
        &self,
        migration_id: u64,
        stage: MigrationStage,
    ) -> Result<bool, MigrationError> {
        Ok(self
            .store
            .find_current()
            .await?
            .map(|current| current.id == migration_id && current.stage == stage)
            .unwrap_or(false))
    }

    /// Move the current migration to `target`.
    ///
    /// Only the next progress stage or the phase's error stage are accepted.
    /// Transitioning into the current stage is a no-op.
    pub async fn transition(&self, target: MigrationStage) -> Result<Migration, MigrationError> {
        self.transition_with_context(target, |_| {}).await
    }

    /// Apply `update` to the context and transition, persisted together.
    pub async fn transition_with_context<F>(
        &self,
        target: MigrationStage,
        update: F,
    ) -> Result<Migration, MigrationError>
    where
        F: FnOnce(&mut MigrationContext) + Send,
    {
        self.transition_inner(None, target, update).await
    }

    /// Like `transition_with_context`, but only when `migration_id` is still
    /// the current migration and sits in `from`. Fails with `InvalidStage`
    /// otherwise, leaving everything untouched.
    pub async fn transition_if_current<F>(
        &self,
        migration_id: u64,
        from: MigrationStage,
        target: MigrationStage,
        update: F,
    ) -> Result<Migration, MigrationError>
    where
        F: FnOnce(&mut MigrationContext) + Send,
    {
        self.transition_inner(Some((migration_id, from)), target, update).await
    }

    async fn transition_inner<F>(
        &self,
        expected: Option<(u64, MigrationStage)>,
        target: MigrationStage,
        update: F,
    ) -> Result<Migration, MigrationError>
    where
        F: FnOnce(&mut MigrationContext) + Send,
    {
        let _guard = self.write_lock.lock().await;

        let mut migration = self.load_current().await?;
        let from = migration.stage;

        if let Some((expected_id, expected_stage)) = expected {
            if migration.id != expected_id || from != expected_stage {
                return Err(MigrationError::InvalidStage {
                    expected: expected_stage,
                    actual: from,
                });
            }
        }

        if from != target && !can_transition(from, target) {
            return Err(MigrationError::InvalidStageTransition { from, to: target });
        }

        let mut context = self.store.load_context(migration.id).await?;
        update(&mut context);

        migration.stage = target;
        migration.updated_at = now_iso();
        self.store.save_record(&migration, &context).await?;

        if from != target {
            info!(
                migration_id = migration.id,
                from = %from,
                to = %target,
                "Migration stage transition"
            );
            self.publish(MigrationEvent::StageTransition {
                migration_id: migration.id,
                from,
                to: target,
            });
        }

        Ok(migration)
    }

    /// Read-modify-write the current context under the writer lock.
    pub async fn update_context<F>(&self, update: F) -> Result<MigrationContext, MigrationError>
    where
        F: FnOnce(&mut MigrationContext) + Send,
    {
        let _guard = self.write_lock.lock().await;

        let migration = self.load_current().await?;
        let mut context = self.store.load_context(migration.id).await?;
        update(&mut context);
        self.store.save_context(&context).await?;
        Ok(context)
    }

    /// Record a failure and move to the error stage of the current phase.
    ///
    /// This never fails: the error stage is picked from the current stage
    /// alone, whatever the cause. If the migration already sits in an error
    /// stage only the message is updated. Storage failures are logged.
    pub async fn error(&self, cause: impl Into<FailureCause>) {
        self.record_error(None, cause.into(), |_| {}).await
    }

    /// `error` for a specific migration, applying `update` to its context in
    /// the same write. Ignored when `migration_id` is no longer current.
    pub async fn error_for_migration<F>(
        &self,
        migration_id: u64,
        cause: impl Into<FailureCause>,
        update: F,
    ) where
        F: FnOnce(&mut MigrationContext) + Send,
    {
        self.record_error(Some(migration_id), cause.into(), update).await
    }

    async fn record_error<F>(&self, expected_id: Option<u64>, cause: FailureCause, update: F)
    where
        F: FnOnce(&mut MigrationContext) + Send,
    {
        let _guard = self.write_lock.lock().await;

        let mut migration = match self.store.find_current().await {
            Ok(Some(migration)) => migration,
            Ok(None) => {
                warn!(cause = %cause, "Failure reported with no migration in progress");
                return;
            }
            Err(e) => {
                error!(
                    cause = %cause,
                    error = %e,
                    "Failed to load migration while recording failure"
                );
                return;
            }
        };

        if let Some(expected_id) = expected_id {
            if migration.id != expected_id {
                warn!(
                    migration_id = expected_id,
                    current_id = migration.id,
                    cause = %cause,
                    "Ignoring failure of a migration that is no longer current"
                );
                return;
            }
        }

        let from = migration.stage;
        if from == MigrationStage::Done {
            warn!(
                migration_id = migration.id,
                cause = %cause,
                "Ignoring failure reported after the migration finished"
            );
            return;
        }
        let target = from.error_stage();

        let mut context = match self.store.load_context(migration.id).await {
            Ok(context) => context,
            Err(e) => {
                error!(
                    cause = %cause,
                    error = %e,
                    "Failed to load context while recording failure"
                );
                MigrationContext {
                    migration_id: migration.id,
                    ..Default::default()
                }
            }
        };
        update(&mut context);
        context.error_message = cause.to_string();
        context.end_epoch = now_epoch();

        migration.stage = target;
        migration.updated_at = now_iso();

        if let Err(e) = self.store.save_record(&migration, &context).await {
            error!(cause = %cause, error = %e, "Failed to persist migration error stage");
            return;
        }

        error!(
            migration_id = migration.id,
            from = %from,
            to = %target,
            cause = %cause,
            "Migration failed"
        );
        if from != target {
            self.publish(MigrationEvent::StageTransition {
                migration_id: migration.id,
                from,
                to: target,
            });
        }
    }

    /// Complete a validated migration.
    pub async fn finish_migration(&self) -> Result<Migration, MigrationError> {
        self.transition_with_context(MigrationStage::Done, |context| {
            context.end_epoch = now_epoch();
        })
        .await
    }

    async fn load_current(&self) -> Result<Migration, MigrationError> {
        self.store
            .find_current()
            .await?
            .ok_or(MigrationError::NoMigrationInProgress)
    }

    fn publish(&self, event: MigrationEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
