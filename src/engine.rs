//! Approval Engine: who may act on a requisition, and what acting does to it
use tracing::{info, warn};

use crate::config::{ApprovalOrdering, WorkflowConfig};
use crate::directory::UserDirectory;
use crate::error::{AuthorizationError, ValidationError, WorkflowError};
use crate::requisition::{Decision, Requisition, RequisitionPatch, RequisitionStatus};
use crate::store::RequisitionStore;
use crate::types::TimeStamp;

pub struct ApprovalEngine<D> {
    store: RequisitionStore,
    directory: D,
    ordering: ApprovalOrdering,
}

impl<D: UserDirectory> ApprovalEngine<D> {
    pub fn new(store: RequisitionStore, directory: D, config: &WorkflowConfig) -> Self {
        Self {
            store,
            directory,
            ordering: config.ordering,
        }
    }

    pub fn store(&self) -> &RequisitionStore {
        &self.store
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    /// Records `approver_id`'s decision on a pending requisition and returns
    /// the updated record.
    ///
    /// Fails without changing anything when the requisition is unknown, the
    /// approver is not assigned, the requisition is not pending, the approver
    /// already acted, or the comment is blank (checked in that order).
    pub fn decide(
        &self,
        requisition_id: &str,
        approver_id: &str,
        action: Decision,
        comment: &str,
    ) -> Result<Requisition, WorkflowError> {
        let result = self.store.mutate(requisition_id, |requisition| {
            requisition
                .record_decision(approver_id, action, comment, self.ordering, TimeStamp::now())
                .map(|_| ())
        });

        match &result {
            Ok(requisition) => {
                info!(
                    requisition_id,
                    approver_id,
                    action = ?action,
                    status = ?requisition.status,
                    "decision recorded"
                );
                if requisition.status.is_terminal() {
                    info!(requisition_id, status = ?requisition.status, "requisition closed");
                }
            }
            Err(e) => warn!(requisition_id, approver_id, error = %e, "decision refused"),
        }
        result
    }

    pub fn approve(
        &self,
        requisition_id: &str,
        approver_id: &str,
        comment: &str,
    ) -> Result<Requisition, WorkflowError> {
        self.decide(requisition_id, approver_id, Decision::Approved, comment)
    }

    pub fn reject(
        &self,
        requisition_id: &str,
        approver_id: &str,
        comment: &str,
    ) -> Result<Requisition, WorkflowError> {
        self.decide(requisition_id, approver_id, Decision::Rejected, comment)
    }

    /// Whether `user_id` could record a decision on `requisition` right now.
    pub fn can_decide(&self, requisition: &Requisition, user_id: &str) -> bool {
        requisition
            .authorize_decision(user_id, self.ordering)
            .is_ok()
    }

    /// Moves the author's draft to `Pending`. Every approver must be a known,
    /// active user.
    pub fn submit(&self, requisition_id: &str, actor_id: &str) -> Result<Requisition, WorkflowError> {
        let submitted = self.store.mutate(requisition_id, |requisition| {
            ensure_owner(requisition, actor_id)?;
            if requisition.status != RequisitionStatus::Draft {
                return Err(AuthorizationError::NotActionable {
                    status: requisition.status,
                }
                .into());
            }
            self.check_approvers(&requisition.assigned_approvers)?;
            requisition.apply_patch(RequisitionPatch::new().set_status(RequisitionStatus::Pending))
        })?;

        info!(
            requisition_id,
            approvers = submitted.assigned_approvers.len(),
            "requisition submitted for approval"
        );
        Ok(submitted)
    }

    /// Author edit of a requisition that is still a draft or pending.
    pub fn edit(
        &self,
        requisition_id: &str,
        actor_id: &str,
        patch: RequisitionPatch,
    ) -> Result<Requisition, WorkflowError> {
        let edited = self.store.mutate(requisition_id, |requisition| {
            ensure_owner(requisition, actor_id)?;
            if requisition.status.is_terminal() {
                return Err(AuthorizationError::Terminal {
                    status: requisition.status,
                }
                .into());
            }
            let approvers = patch
                .assigned_approvers
                .as_ref()
                .unwrap_or(&requisition.assigned_approvers);
            let status = patch.status.unwrap_or(requisition.status);
            if status == RequisitionStatus::Pending {
                self.check_approvers(approvers)?;
            }
            requisition.apply_patch(patch.clone())
        })?;

        info!(requisition_id, status = ?edited.status, "requisition edited by author");
        Ok(edited)
    }

    fn check_approvers(&self, approvers: &[String]) -> Result<(), WorkflowError> {
        if approvers.is_empty() {
            return Err(ValidationError::MissingApprovers.into());
        }
        for approver in approvers {
            let user = self
                .directory
                .user_by_id(approver)
                .ok_or_else(|| WorkflowError::not_found("user", approver.as_str()))?;
            if !user.active {
                return Err(ValidationError::InactiveApprover(user.id).into());
            }
        }
        Ok(())
    }
}

fn ensure_owner(requisition: &Requisition, actor_id: &str) -> Result<(), WorkflowError> {
    if requisition.created_by != actor_id {
        return Err(AuthorizationError::NotOwner {
            actor_id: actor_id.to_string(),
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{MemoryDirectory, User};
    use crate::error::ConflictError;
    use crate::requisition::RequisitionDraft;

    fn engine(ordering: ApprovalOrdering) -> ApprovalEngine<MemoryDirectory> {
        let config = WorkflowConfig::default().with_ordering(ordering);
        let directory = MemoryDirectory::new([
            User::new("1", "John Doe", "john@example.com"),
            User::new("2", "Jane Smith", "jane@example.com"),
            User::new("3", "Bob Johnson", "bob@example.com"),
            User::new("5", "Charlie Brown", "charlie@example.com").deactivated(),
        ]);
        ApprovalEngine::new(RequisitionStore::temporary(&config).unwrap(), directory, &config)
    }

    fn pending(engine: &ApprovalEngine<MemoryDirectory>, approvers: &[&str]) -> Requisition {
        engine
            .store()
            .create(
                RequisitionDraft::new("1")
                    .set_subject("Office chairs")
                    .set_approvers(approvers.iter().copied())
                    .submit(),
            )
            .unwrap()
    }

    #[test]
    fn double_vote_is_a_conflict_and_changes_nothing() {
        let engine = engine(ApprovalOrdering::AnyOrder);
        let req = pending(&engine, &["2", "3"]);
        engine.approve(&req.id, "2", "fine").unwrap();
        let before = engine.store().fetch(&req.id).unwrap();

        let err = engine.reject(&req.id, "2", "changed my mind").unwrap_err();

        assert!(matches!(
            err,
            WorkflowError::Conflict(ConflictError::AlreadyActed { .. })
        ));
        assert_eq!(engine.store().fetch(&req.id).unwrap(), before);
    }

    #[test]
    fn unknown_requisition() {
        let engine = engine(ApprovalOrdering::AnyOrder);
        assert!(matches!(
            engine.approve("req1nothing", "2", "ok"),
            Err(WorkflowError::NotFound { .. })
        ));
    }

    #[test]
    fn can_decide_tracks_authorization() {
        let engine = engine(ApprovalOrdering::Sequential);
        let req = pending(&engine, &["2", "3"]);

        assert!(engine.can_decide(&req, "2"));
        assert!(!engine.can_decide(&req, "3"));
        assert!(!engine.can_decide(&req, "1"));

        let req = engine.approve(&req.id, "2", "ok").unwrap();
        assert!(!engine.can_decide(&req, "2"));
        assert!(engine.can_decide(&req, "3"));
    }

    #[test]
    fn submit_checks_owner_and_directory() {
        let engine = engine(ApprovalOrdering::AnyOrder);
        let draft = engine
            .store()
            .create(RequisitionDraft::new("1").set_subject("Laptops"))
            .unwrap();

        assert!(matches!(
            engine.submit(&draft.id, "1"),
            Err(WorkflowError::Validation(ValidationError::MissingApprovers))
        ));

        engine
            .edit(&draft.id, "1", RequisitionPatch::new().set_approvers(["2", "5"]))
            .unwrap();
        assert!(matches!(
            engine.submit(&draft.id, "2"),
            Err(WorkflowError::Authorization(AuthorizationError::NotOwner { .. }))
        ));
        assert!(matches!(
            engine.submit(&draft.id, "1"),
            Err(WorkflowError::Validation(ValidationError::InactiveApprover(_)))
        ));

        engine
            .edit(&draft.id, "1", RequisitionPatch::new().set_approvers(["2", "99"]))
            .unwrap();
        assert!(matches!(
            engine.submit(&draft.id, "1"),
            Err(WorkflowError::NotFound { kind: "user", .. })
        ));

        engine
            .edit(&draft.id, "1", RequisitionPatch::new().set_approvers(["2", "3"]))
            .unwrap();
        let submitted = engine.submit(&draft.id, "1").unwrap();
        assert_eq!(submitted.status, RequisitionStatus::Pending);
    }

    #[test]
    fn closed_requisitions_cannot_be_edited() {
        let engine = engine(ApprovalOrdering::AnyOrder);
        let req = pending(&engine, &["2"]);
        engine.reject(&req.id, "2", "over budget").unwrap();

        let err = engine
            .edit(&req.id, "1", RequisitionPatch::new().set_subject("Cheaper chairs"))
            .unwrap_err();

        assert!(matches!(
            err,
            WorkflowError::Authorization(AuthorizationError::Terminal {
                status: RequisitionStatus::Rejected
            })
        ));
    }

    #[test]
    fn rerouting_after_a_decision_is_refused() {
        let engine = engine(ApprovalOrdering::AnyOrder);
        let req = pending(&engine, &["2", "3"]);
        engine.approve(&req.id, "2", "fine").unwrap();

        for patch in [
            RequisitionPatch::new().set_approvers(["2"]),
            RequisitionPatch::new().set_status(RequisitionStatus::Draft),
        ] {
            assert!(matches!(
                engine.edit(&req.id, "1", patch),
                Err(WorkflowError::Validation(ValidationError::RoutingLocked))
            ));
        }

        let stored = engine.store().fetch(&req.id).unwrap();
        assert_eq!(stored.status, RequisitionStatus::Pending);
        assert_eq!(stored.approval_history.len(), 1);

        let done = engine.approve(&req.id, "3", "ok").unwrap();
        assert_eq!(done.status, RequisitionStatus::Approved);
    }
}
