use crate::RunError;

/// Mutations that pass through the integrity gate before any I/O.
///
/// The runner routes every guarded mutation through [`integrity_check`]
/// first. `DeleteCrmEntry` and `CreateCrmEntry` have no production
/// constructor — the engine owns no code path that builds them — but a
/// hostile or corrupt instruction source can inject them, and the gate is
/// where they die.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardedAction {
    /// Archive one page. `managed` records whether the page carries the
    /// join-key property; archiving an unmanaged page is a violation.
    ArchivePage { page_id: String, managed: bool },
    /// Journal intended CRM field writes. Always allowed — staging never
    /// mutates the CRM.
    StageCrmWrite { entry_id: i64 },
    /// Never allowed: the engine must not delete CRM entries.
    DeleteCrmEntry { entity_id: i64 },
    /// Never allowed: the engine must not create CRM entries.
    CreateCrmEntry { entity_id: i64 },
}

/// Reject any action the engine is forbidden to perform. Must be called
/// before the corresponding I/O; a rejection terminates the run.
pub fn integrity_check(action: &GuardedAction) -> Result<(), RunError> {
    match action {
        GuardedAction::ArchivePage { page_id, managed } => {
            if *managed {
                Ok(())
            } else {
                Err(RunError::Integrity(format!(
                    "refusing to archive unmanaged page {page_id}"
                )))
            }
        }
        GuardedAction::StageCrmWrite { .. } => Ok(()),
        GuardedAction::DeleteCrmEntry { entity_id } => Err(RunError::Integrity(format!(
            "delete of CRM entity {entity_id} requested; the engine never deletes CRM entries"
        ))),
        GuardedAction::CreateCrmEntry { entity_id } => Err(RunError::Integrity(format!(
            "create of CRM entity {entity_id} requested; the engine never creates CRM entries"
        ))),
    }
}
