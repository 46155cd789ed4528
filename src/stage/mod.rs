//! Migration stage state machine.
//!
//! A migration moves through a fixed, ordered list of progress stages. From
//! any progress stage exactly two automatic transitions exist: advance to the
//! next progress stage, or fall to the error stage of the stage's phase.
//! Error stages and `Done` are terminal; leaving them requires a new
//! migration (see `MigrationService::start_migration` and
//! `MigrationService::restart_retaining_infrastructure`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown migration stage: {0}")]
pub struct UnknownStageError(pub String);

/// Group of stages sharing one error stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationPhase {
    None,
    Provision,
    Filesystem,
    Database,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationStage {
    NotStarted,
    Started,
    Authentication,
    ProvisionApplication,
    ProvisionApplicationWait,
    ProvisionMigrationStack,
    ProvisionMigrationStackWait,
    FsMigrationCopy,
    FsMigrationCopyWait,
    OfflineWarning,
    DbMigrationExport,
    DbMigrationExportWait,
    DbMigrationUpload,
    DbMigrationUploadWait,
    DataMigrationImport,
    Validate,
    Done,

    ProvisioningError,
    FsMigrationCopyError,
    FinalSyncError,
    Error,
}

/// Progress stages in workflow order. The index is the stage ordinal.
const PROGRESS: [MigrationStage; 17] = [
    MigrationStage::NotStarted,
    MigrationStage::Started,
    MigrationStage::Authentication,
    MigrationStage::ProvisionApplication,
    MigrationStage::ProvisionApplicationWait,
    MigrationStage::ProvisionMigrationStack,
    MigrationStage::ProvisionMigrationStackWait,
    MigrationStage::FsMigrationCopy,
    MigrationStage::FsMigrationCopyWait,
    MigrationStage::OfflineWarning,
    MigrationStage::DbMigrationExport,
    MigrationStage::DbMigrationExportWait,
    MigrationStage::DbMigrationUpload,
    MigrationStage::DbMigrationUploadWait,
    MigrationStage::DataMigrationImport,
    MigrationStage::Validate,
    MigrationStage::Done,
];

impl MigrationStage {
    /// Every stage, progress stages first.
    pub const ALL: [MigrationStage; 21] = [
        MigrationStage::NotStarted,
        MigrationStage::Started,
        MigrationStage::Authentication,
        MigrationStage::ProvisionApplication,
        MigrationStage::ProvisionApplicationWait,
        MigrationStage::ProvisionMigrationStack,
        MigrationStage::ProvisionMigrationStackWait,
        MigrationStage::FsMigrationCopy,
        MigrationStage::FsMigrationCopyWait,
        MigrationStage::OfflineWarning,
        MigrationStage::DbMigrationExport,
        MigrationStage::DbMigrationExportWait,
        MigrationStage::DbMigrationUpload,
        MigrationStage::DbMigrationUploadWait,
        MigrationStage::DataMigrationImport,
        MigrationStage::Validate,
        MigrationStage::Done,
        MigrationStage::ProvisioningError,
        MigrationStage::FsMigrationCopyError,
        MigrationStage::FinalSyncError,
        MigrationStage::Error,
    ];

    /// Position in the workflow. Error stages have none.
    pub fn ordinal(self) -> Option<usize> {
        PROGRESS.iter().position(|s| *s == self)
    }

    pub fn phase(self) -> MigrationPhase {
        use MigrationStage::*;
        match self {
            ProvisionApplication
            | ProvisionApplicationWait
            | ProvisionMigrationStack
            | ProvisionMigrationStackWait
            | ProvisioningError => MigrationPhase::Provision,
            FsMigrationCopy | FsMigrationCopyWait | FsMigrationCopyError => {
                MigrationPhase::Filesystem
            }
            DbMigrationExport
            | DbMigrationExportWait
            | DbMigrationUpload
            | DbMigrationUploadWait
            | DataMigrationImport
            | FinalSyncError => MigrationPhase::Database,
            NotStarted | Started | Authentication | OfflineWarning | Validate | Done | Error => {
                MigrationPhase::None
            }
        }
    }

    pub fn is_error(self) -> bool {
        matches!(
            self,
            MigrationStage::ProvisioningError
                | MigrationStage::FsMigrationCopyError
                | MigrationStage::FinalSyncError
                | MigrationStage::Error
        )
    }

    /// Error stages and `Done` admit no automatic transition.
    pub fn is_terminal(self) -> bool {
        self.is_error() || self == MigrationStage::Done
    }

    pub fn is_provision_phase(self) -> bool {
        self.phase() == MigrationPhase::Provision
    }

    pub fn is_fs_phase(self) -> bool {
        self.phase() == MigrationPhase::Filesystem
    }

    pub fn is_db_phase(self) -> bool {
        self.phase() == MigrationPhase::Database
    }

    /// The progress stage following this one.
    pub fn next_stage(self) -> Option<MigrationStage> {
        self.ordinal().and_then(|i| PROGRESS.get(i + 1).copied())
    }

    /// The error stage of this stage's phase. An error stage maps to itself.
    pub fn error_stage(self) -> MigrationStage {
        match self.phase() {
            MigrationPhase::Provision => MigrationStage::ProvisioningError,
            MigrationPhase::Filesystem => MigrationStage::FsMigrationCopyError,
            MigrationPhase::Database => MigrationStage::FinalSyncError,
            MigrationPhase::None => MigrationStage::Error,
        }
    }

    /// Ordinal comparison. Always false when either stage is an error stage,
    /// so a failed run never counts as having progressed past anything.
    pub fn is_after(self, other: MigrationStage) -> bool {
        match (self.ordinal(), other.ordinal()) {
            (Some(a), Some(b)) => a > b,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        use MigrationStage::*;
        match self {
            NotStarted => "NOT_STARTED",
            Started => "STARTED",
            Authentication => "AUTHENTICATION",
            ProvisionApplication => "PROVISION_APPLICATION",
            ProvisionApplicationWait => "PROVISION_APPLICATION_WAIT",
            ProvisionMigrationStack => "PROVISION_MIGRATION_STACK",
            ProvisionMigrationStackWait => "PROVISION_MIGRATION_STACK_WAIT",
            FsMigrationCopy => "FS_MIGRATION_COPY",
            FsMigrationCopyWait => "FS_MIGRATION_COPY_WAIT",
            OfflineWarning => "OFFLINE_WARNING",
            DbMigrationExport => "DB_MIGRATION_EXPORT",
            DbMigrationExportWait => "DB_MIGRATION_EXPORT_WAIT",
            DbMigrationUpload => "DB_MIGRATION_UPLOAD",
            DbMigrationUploadWait => "DB_MIGRATION_UPLOAD_WAIT",
            DataMigrationImport => "DATA_MIGRATION_IMPORT",
            Validate => "VALIDATE",
            Done => "DONE",
            ProvisioningError => "PROVISIONING_ERROR",
            FsMigrationCopyError => "FS_MIGRATION_COPY_ERROR",
            FinalSyncError => "FINAL_SYNC_ERROR",
            Error => "ERROR",
        }
    }
}

impl fmt::Display for MigrationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MigrationStage {
    type Err = UnknownStageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        MigrationStage::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == wanted)
            .ok_or_else(|| UnknownStageError(s.to_string()))
    }
}

/// Whether `target` is a legal automatic transition out of `current`.
pub fn can_transition(current: MigrationStage, target: MigrationStage) -> bool {
    if current.is_terminal() {
        return false;
    }
    current.next_stage() == Some(target) || current.error_stage() == target
}

pub fn next_stage(current: MigrationStage) -> Option<MigrationStage> {
    current.next_stage()
}

pub fn error_stage_for(current: MigrationStage) -> MigrationStage {
    current.error_stage()
}

pub fn is_after(a: MigrationStage, b: MigrationStage) -> bool {
    a.is_after(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_stage_can_fall_to_its_error_stage() {
        for stage in MigrationStage::ALL.iter().filter(|s| !s.is_terminal()) {
            assert!(
                can_transition(*stage, error_stage_for(*stage)),
                "{} should be able to fall to {}",
                stage,
                error_stage_for(*stage)
            );
        }
    }

    #[test]
    fn test_error_stages_are_terminal() {
        for error in MigrationStage::ALL.iter().filter(|s| s.is_error()) {
            for target in MigrationStage::ALL {
                assert!(!can_transition(*error, target));
            }
            assert_eq!(error_stage_for(*error), *error);
        }
    }

    #[test]
    fn test_only_successor_or_error_stage_is_legal() {
        for current in MigrationStage::ALL {
            for target in MigrationStage::ALL {
                let expected = !current.is_terminal()
                    && (next_stage(current) == Some(target) || error_stage_for(current) == target);
                assert_eq!(can_transition(current, target), expected, "{} -> {}", current, target);
            }
        }
    }

    #[test]
    fn test_done_has_no_successor() {
        assert_eq!(next_stage(MigrationStage::Done), None);
        assert!(!can_transition(MigrationStage::Done, MigrationStage::Error));
        assert_eq!(
            next_stage(MigrationStage::ProvisionMigrationStackWait),
            Some(MigrationStage::FsMigrationCopy)
        );
    }

    #[test]
    fn test_phase_error_stages() {
        assert_eq!(
            error_stage_for(MigrationStage::ProvisionMigrationStackWait),
            MigrationStage::ProvisioningError
        );
        assert_eq!(
            error_stage_for(MigrationStage::FsMigrationCopyWait),
            MigrationStage::FsMigrationCopyError
        );
        assert_eq!(
            error_stage_for(MigrationStage::DbMigrationUpload),
            MigrationStage::FinalSyncError
        );
        assert_eq!(error_stage_for(MigrationStage::Validate), MigrationStage::Error);
    }

    #[test]
    fn test_phase_membership() {
        assert!(MigrationStage::DbMigrationExport.is_db_phase());
        assert!(MigrationStage::DataMigrationImport.is_db_phase());
        assert!(!MigrationStage::Validate.is_db_phase());
        assert!(MigrationStage::FsMigrationCopyWait.is_fs_phase());
        assert!(!MigrationStage::OfflineWarning.is_fs_phase());
        assert!(MigrationStage::ProvisioningError.is_provision_phase());
    }

    #[test]
    fn test_is_after_excludes_error_stages() {
        assert!(is_after(
            MigrationStage::FsMigrationCopy,
            MigrationStage::ProvisionMigrationStackWait
        ));
        assert!(!is_after(
            MigrationStage::ProvisionMigrationStack,
            MigrationStage::ProvisionMigrationStackWait
        ));
        assert!(!is_after(MigrationStage::ProvisioningError, MigrationStage::NotStarted));
        assert!(!is_after(MigrationStage::Done, MigrationStage::FinalSyncError));
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!(
            "fs_migration_copy_wait".parse::<MigrationStage>().unwrap(),
            MigrationStage::FsMigrationCopyWait
        );
        assert_eq!(MigrationStage::FinalSyncError.to_string(), "FINAL_SYNC_ERROR");
        assert!("NOPE".parse::<MigrationStage>().is_err());
        for stage in MigrationStage::ALL {
            assert_eq!(stage.to_string().parse::<MigrationStage>().unwrap(), stage);
        }
    }

    #[test]
    fn test_serde_uses_screaming_snake_case() {
        let json = serde_json::to_string(&MigrationStage::DbMigrationUploadWait).unwrap();
        assert_eq!(json, "\"DB_MIGRATION_UPLOAD_WAIT\"");
    }
}
