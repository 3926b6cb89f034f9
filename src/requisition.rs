//! Requisition records, approval actions and the rules that derive status from them
use std::collections::HashSet;

use chrono::Utc;

use crate::config::ApprovalOrdering;
use crate::error::{AuthorizationError, ConflictError, ValidationError, WorkflowError};
use crate::types::TimeStamp;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequisitionStatus {
    #[n(0)]
    Draft,
    #[n(1)]
    Pending,
    #[n(2)]
    Approved,
    #[n(3)]
    Rejected,
}

impl RequisitionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    #[n(0)]
    Approved,
    #[n(1)]
    Rejected,
}

/// A single approver's decision. Never modified once appended.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ApprovalAction {
    #[n(0)]
    pub approver_id: String,
    #[n(1)]
    pub action: Decision,
    #[n(2)]
    pub comment: String,
    #[n(3)]
    pub action_date: TimeStamp<Utc>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct FileAttachment {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub file_name: String,
    #[n(2)]
    pub file_size: u64, // bytes
    #[n(3)]
    pub upload_date: TimeStamp<Utc>,
    #[n(4)]
    pub file_type: Option<String>, // MIME type or extension
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Requisition {
    #[n(0)]
    pub id: String, // bech32m encoded uuid7
    #[n(1)]
    pub reference_number: String, // MEMO-YYYY-NNN
    #[n(2)]
    pub date: TimeStamp<Utc>,
    #[n(3)]
    pub subject: String,
    #[n(4)]
    pub summary: String,
    #[n(5)]
    pub tin_number: Option<String>,
    #[n(6)]
    pub bin_nid: Option<String>,
    #[n(7)]
    pub budget: Option<u64>, // minor currency units
    #[n(8)]
    pub accounts_person_id: Option<String>,
    #[n(9)]
    pub created_by: String,
    #[n(10)]
    pub assigned_approvers: Vec<String>, // routing order
    #[n(11)]
    pub status: RequisitionStatus,
    #[n(12)]
    pub created_at: TimeStamp<Utc>,
    #[n(13)]
    pub approval_history: Vec<ApprovalAction>, // chronological, append only
    #[n(14)]
    pub attached_files: Vec<FileAttachment>,
    #[n(15)]
    pub remarks: Option<String>,
}

impl Requisition {
    pub fn to_cbor(&self) -> Result<Vec<u8>, WorkflowError> {
        Ok(minicbor::to_vec(self)?)
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self, WorkflowError> {
        Ok(minicbor::decode(bytes)?)
    }

    /// sha256 of the encoded record. Changes on every successful mutation.
    pub fn revision(&self) -> Result<String, WorkflowError> {
        let contents = self.to_cbor()?;
        Ok(sha256::digest(&contents))
    }

    pub fn is_assigned(&self, user_id: &str) -> bool {
        self.assigned_approvers.iter().any(|id| id == user_id)
    }

    pub fn action_by(&self, user_id: &str) -> Option<&ApprovalAction> {
        self.approval_history
            .iter()
            .find(|action| action.approver_id == user_id)
    }

    fn has_approved(&self, user_id: &str) -> bool {
        self.approval_history
            .iter()
            .any(|a| a.approver_id == user_id && a.action == Decision::Approved)
    }

    /// First approver in routing order without an approval on record.
    pub fn waiting_on(&self) -> Option<&str> {
        self.assigned_approvers
            .iter()
            .find(|id| !self.has_approved(id))
            .map(String::as_str)
    }

    /// Status implied by the history of a requisition that has left draft.
    ///
    /// Any rejection wins. Otherwise the requisition is approved once every
    /// assigned approver has an approval recorded, and pending until then.
    pub fn derived_status(&self) -> RequisitionStatus {
        if self
            .approval_history
            .iter()
            .any(|a| a.action == Decision::Rejected)
        {
            return RequisitionStatus::Rejected;
        }
        if !self.assigned_approvers.is_empty()
            && self.assigned_approvers.iter().all(|id| self.has_approved(id))
        {
            return RequisitionStatus::Approved;
        }
        RequisitionStatus::Pending
    }

    /// Checks whether `approver_id` may record a decision right now.
    pub fn authorize_decision(
        &self,
        approver_id: &str,
        ordering: ApprovalOrdering,
    ) -> Result<(), WorkflowError> {
        if !self.is_assigned(approver_id) {
            return Err(AuthorizationError::NotAssigned {
                approver_id: approver_id.to_string(),
            }
            .into());
        }
        if self.status != RequisitionStatus::Pending {
            return Err(AuthorizationError::NotActionable {
                status: self.status,
            }
            .into());
        }
        if self.action_by(approver_id).is_some() {
            return Err(ConflictError::AlreadyActed {
                approver_id: approver_id.to_string(),
            }
            .into());
        }
        if ordering == ApprovalOrdering::Sequential {
            if let Some(waiting_on) = self.waiting_on().filter(|id| *id != approver_id) {
                return Err(AuthorizationError::OutOfTurn {
                    approver_id: approver_id.to_string(),
                    waiting_on: waiting_on.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Appends a decision and recomputes status. Leaves `self` untouched on error.
    pub fn record_decision(
        &mut self,
        approver_id: &str,
        action: Decision,
        comment: &str,
        ordering: ApprovalOrdering,
        at: TimeStamp<Utc>,
    ) -> Result<RequisitionStatus, WorkflowError> {
        self.authorize_decision(approver_id, ordering)?;
        if comment.trim().is_empty() {
            return Err(ValidationError::EmptyComment.into());
        }

        self.approval_history.push(ApprovalAction {
            approver_id: approver_id.to_string(),
            action,
            comment: comment.to_string(),
            action_date: at,
        });
        self.status = self.derived_status();

        Ok(self.status)
    }

    /// Applies an owner edit. The patch is validated against the merged record
    /// before anything in `self` changes.
    pub fn apply_patch(&mut self, patch: RequisitionPatch) -> Result<(), WorkflowError> {
        if let Some(expected) = &patch.expected_revision {
            let actual = self.revision()?;
            if *expected != actual {
                return Err(ConflictError::StaleRevision {
                    expected: expected.clone(),
                    actual,
                }
                .into());
            }
        }
        if let Some(status) = patch.status {
            if status.is_terminal() {
                return Err(ValidationError::InvalidPatchStatus(status).into());
            }
        }

        let mut merged = self.clone();
        if let Some(date) = patch.date {
            merged.date = date;
        }
        if let Some(subject) = patch.subject {
            merged.subject = subject;
        }
        if let Some(summary) = patch.summary {
            merged.summary = summary;
        }
        if let Some(tin_number) = patch.tin_number {
            merged.tin_number = tin_number;
        }
        if let Some(bin_nid) = patch.bin_nid {
            merged.bin_nid = bin_nid;
        }
        if let Some(budget) = patch.budget {
            merged.budget = budget;
        }
        if let Some(accounts_person_id) = patch.accounts_person_id {
            merged.accounts_person_id = accounts_person_id;
        }
        if let Some(approvers) = patch.assigned_approvers {
            merged.assigned_approvers = approvers;
        }
        if let Some(status) = patch.status {
            merged.status = status;
        }
        if let Some(files) = patch.attached_files {
            merged.attached_files = files;
        }
        if let Some(remarks) = patch.remarks {
            merged.remarks = remarks;
        }

        // status is derived from approvers and history from the first decision on
        if !self.approval_history.is_empty()
            && (merged.status != self.status
                || merged.assigned_approvers != self.assigned_approvers)
        {
            return Err(ValidationError::RoutingLocked.into());
        }
        validate_routing(merged.status, &merged.subject, &merged.assigned_approvers)?;

        *self = merged;
        Ok(())
    }
}

fn validate_routing(
    status: RequisitionStatus,
    subject: &str,
    approvers: &[String],
) -> Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for approver in approvers {
        if !seen.insert(approver.as_str()) {
            return Err(ValidationError::DuplicateApprover(approver.clone()));
        }
    }
    if status == RequisitionStatus::Pending {
        if approvers.is_empty() {
            return Err(ValidationError::MissingApprovers);
        }
        // drafts may be saved half written
        if subject.trim().is_empty() {
            return Err(ValidationError::EmptySubject);
        }
    }
    Ok(())
}

/// Caller supplied fields of a new requisition. The store fills in identity,
/// creation time and, when absent, the reference number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequisitionDraft {
    pub reference_number: Option<String>,
    pub date: Option<TimeStamp<Utc>>,
    pub subject: String,
    pub summary: String,
    pub tin_number: Option<String>,
    pub bin_nid: Option<String>,
    pub budget: Option<u64>,
    pub accounts_person_id: Option<String>,
    pub created_by: String,
    pub assigned_approvers: Vec<String>,
    pub status: RequisitionStatus,
    pub attached_files: Vec<FileAttachment>,
    pub remarks: Option<String>,
}

impl RequisitionDraft {
    pub fn new(created_by: impl Into<String>) -> Self {
        Self {
            reference_number: None,
            date: None,
            subject: String::new(),
            summary: String::new(),
            tin_number: None,
            bin_nid: None,
            budget: None,
            accounts_person_id: None,
            created_by: created_by.into(),
            assigned_approvers: vec![],
            status: RequisitionStatus::Draft,
            attached_files: vec![],
            remarks: None,
        }
    }
    pub fn set_reference_number(mut self, reference: impl Into<String>) -> Self {
        self.reference_number = Some(reference.into());
        self
    }
    pub fn set_date(mut self, date: TimeStamp<Utc>) -> Self {
        self.date = Some(date);
        self
    }
    pub fn set_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }
    pub fn set_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }
    pub fn set_tin_number(mut self, tin: impl Into<String>) -> Self {
        self.tin_number = Some(tin.into());
        self
    }
    pub fn set_bin_nid(mut self, bin_nid: impl Into<String>) -> Self {
        self.bin_nid = Some(bin_nid.into());
        self
    }
    pub fn set_budget(mut self, amount: u64) -> Self {
        self.budget = Some(amount);
        self
    }
    pub fn set_accounts_person(mut self, user_id: impl Into<String>) -> Self {
        self.accounts_person_id = Some(user_id.into());
        self
    }
    pub fn add_approver(mut self, user_id: impl Into<String>) -> Self {
        self.assigned_approvers.push(user_id.into());
        self
    }
    pub fn set_approvers<I, S>(mut self, approvers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.assigned_approvers = approvers.into_iter().map(Into::into).collect();
        self
    }
    pub fn attach(mut self, file: FileAttachment) -> Self {
        self.attached_files.push(file);
        self
    }
    pub fn set_remarks(mut self, remarks: impl Into<String>) -> Self {
        self.remarks = Some(remarks.into());
        self
    }
    /// Request that the requisition goes straight to `Pending`.
    pub fn submit(mut self) -> Self {
        self.status = RequisitionStatus::Pending;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.status.is_terminal() {
            return Err(ValidationError::InvalidInitialStatus(self.status));
        }
        if let Some(reference) = &self.reference_number {
            if reference.trim().is_empty() {
                return Err(ValidationError::EmptyReference);
            }
        }
        validate_routing(self.status, &self.subject, &self.assigned_approvers)
    }

    pub(crate) fn into_requisition(
        self,
        id: String,
        reference_number: String,
        created_at: TimeStamp<Utc>,
    ) -> Requisition {
        Requisition {
            id,
            reference_number,
            date: self.date.unwrap_or_else(|| created_at.clone()),
            subject: self.subject,
            summary: self.summary,
            tin_number: self.tin_number,
            bin_nid: self.bin_nid,
            budget: self.budget,
            accounts_person_id: self.accounts_person_id,
            created_by: self.created_by,
            assigned_approvers: self.assigned_approvers,
            status: self.status,
            created_at,
            approval_history: vec![],
            attached_files: self.attached_files,
            remarks: self.remarks,
        }
    }
}

/// Partial update of the editable fields. `None` leaves a field as is; for
/// optional fields `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequisitionPatch {
    pub expected_revision: Option<String>,
    pub date: Option<TimeStamp<Utc>>,
    pub subject: Option<String>,
    pub summary: Option<String>,
    pub tin_number: Option<Option<String>>,
    pub bin_nid: Option<Option<String>>,
    pub budget: Option<Option<u64>>,
    pub accounts_person_id: Option<Option<String>>,
    pub assigned_approvers: Option<Vec<String>>,
    pub status: Option<RequisitionStatus>,
    pub attached_files: Option<Vec<FileAttachment>>,
    pub remarks: Option<Option<String>>,
}

impl RequisitionPatch {
    pub fn new() -> Self {
        Self::default()
    }
    /// Only apply the patch if the stored record still has this revision.
    pub fn expect_revision(mut self, revision: impl Into<String>) -> Self {
        self.expected_revision = Some(revision.into());
        self
    }
    pub fn set_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
    pub fn set_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }
    pub fn set_budget(mut self, amount: Option<u64>) -> Self {
        self.budget = Some(amount);
        self
    }
    pub fn set_accounts_person(mut self, user_id: Option<String>) -> Self {
        self.accounts_person_id = Some(user_id);
        self
    }
    pub fn set_approvers<I, S>(mut self, approvers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.assigned_approvers = Some(approvers.into_iter().map(Into::into).collect());
        self
    }
    pub fn set_status(mut self, status: RequisitionStatus) -> Self {
        self.status = Some(status);
        self
    }
    pub fn set_attachments(mut self, files: Vec<FileAttachment>) -> Self {
        self.attached_files = Some(files);
        self
    }
    pub fn set_remarks(mut self, remarks: Option<String>) -> Self {
        self.remarks = Some(remarks);
        self
    }
}

/// Predicate for [`crate::store::RequisitionStore::list`]. Unset criteria match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequisitionFilter {
    pub created_by: Option<String>,
    pub assigned_to: Option<String>,
    pub status: Option<RequisitionStatus>,
    pub search: Option<String>,
}

impl RequisitionFilter {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn created_by(mut self, user_id: impl Into<String>) -> Self {
        self.created_by = Some(user_id.into());
        self
    }
    pub fn assigned_to(mut self, user_id: impl Into<String>) -> Self {
        self.assigned_to = Some(user_id.into());
        self
    }
    pub fn status(mut self, status: RequisitionStatus) -> Self {
        self.status = Some(status);
        self
    }
    /// Case insensitive substring match on the subject.
    pub fn search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into().to_lowercase());
        self
    }

    pub fn matches(&self, requisition: &Requisition) -> bool {
        if let Some(creator) = &self.created_by {
            if requisition.created_by != *creator {
                return false;
            }
        }
        if let Some(approver) = &self.assigned_to {
            if !requisition.is_assigned(approver) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if requisition.status != status {
                return false;
            }
        }
        if let Some(term) = &self.search {
            if !requisition.subject.to_lowercase().contains(term.as_str()) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(approvers: &[&str]) -> Requisition {
        RequisitionDraft::new("author")
            .set_subject("Office chairs")
            .set_approvers(approvers.iter().copied())
            .submit()
            .into_requisition(
                "req_test".into(),
                "MEMO-2024-001".into(),
                TimeStamp::now(),
            )
    }

    fn decide(
        req: &mut Requisition,
        approver: &str,
        action: Decision,
    ) -> Result<RequisitionStatus, WorkflowError> {
        req.record_decision(
            approver,
            action,
            "looks fine",
            ApprovalOrdering::AnyOrder,
            TimeStamp::now(),
        )
    }

    #[test]
    fn all_approvals_complete_the_requisition() {
        let mut req = pending(&["a", "b"]);

        assert_eq!(
            decide(&mut req, "a", Decision::Approved).unwrap(),
            RequisitionStatus::Pending
        );
        assert_eq!(
            decide(&mut req, "b", Decision::Approved).unwrap(),
            RequisitionStatus::Approved
        );
        let order: Vec<_> = req
            .approval_history
            .iter()
            .map(|a| a.approver_id.as_str())
            .collect();
        assert_eq!(order, ["a", "b"]);
    }

    #[test]
    fn single_rejection_is_final() {
        let mut req = pending(&["a", "b", "c"]);
        decide(&mut req, "b", Decision::Approved).unwrap();

        assert_eq!(
            decide(&mut req, "a", Decision::Rejected).unwrap(),
            RequisitionStatus::Rejected
        );
        assert!(matches!(
            decide(&mut req, "c", Decision::Approved),
            Err(WorkflowError::Authorization(
                AuthorizationError::NotActionable { .. }
            ))
        ));
    }

    #[test]
    fn checks_run_in_order() {
        let mut req = pending(&["a"]);
        req.status = RequisitionStatus::Draft;
        // not assigned beats not actionable
        assert!(matches!(
            decide(&mut req, "z", Decision::Approved),
            Err(WorkflowError::Authorization(
                AuthorizationError::NotAssigned { .. }
            ))
        ));

        let mut req = pending(&["a", "b"]);
        decide(&mut req, "a", Decision::Approved).unwrap();
        // already acted beats empty comment
        let err = req
            .record_decision(
                "a",
                Decision::Rejected,
                "",
                ApprovalOrdering::AnyOrder,
                TimeStamp::now(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Conflict(ConflictError::AlreadyActed { .. })
        ));
    }

    #[test]
    fn blank_comment_leaves_record_untouched() {
        let mut req = pending(&["a"]);
        let before = req.clone();

        let err = req
            .record_decision(
                "a",
                Decision::Approved,
                "   ",
                ApprovalOrdering::AnyOrder,
                TimeStamp::now(),
            )
            .unwrap_err();

        assert!(matches!(
            err,
            WorkflowError::Validation(ValidationError::EmptyComment)
        ));
        assert_eq!(req, before);
    }

    #[test]
    fn sequential_ordering_gates_later_approvers() {
        let mut req = pending(&["a", "b"]);
        let err = req
            .record_decision(
                "b",
                Decision::Approved,
                "ok",
                ApprovalOrdering::Sequential,
                TimeStamp::now(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Authorization(AuthorizationError::OutOfTurn { ref waiting_on, .. })
                if waiting_on == "a"
        ));

        req.record_decision(
            "a",
            Decision::Approved,
            "ok",
            ApprovalOrdering::Sequential,
            TimeStamp::now(),
        )
        .unwrap();
        assert_eq!(req.waiting_on(), Some("b"));
    }

    #[test]
    fn draft_validation() {
        assert!(RequisitionDraft::new("u").validate().is_ok());
        assert_eq!(
            RequisitionDraft::new("u").set_subject("x").submit().validate(),
            Err(ValidationError::MissingApprovers)
        );
        assert_eq!(
            RequisitionDraft::new("u")
                .set_approvers(["a", "a"])
                .validate(),
            Err(ValidationError::DuplicateApprover("a".into()))
        );
        let mut draft = RequisitionDraft::new("u").add_approver("a");
        draft.status = RequisitionStatus::Approved;
        assert_eq!(
            draft.validate(),
            Err(ValidationError::InvalidInitialStatus(RequisitionStatus::Approved))
        );
        assert_eq!(
            RequisitionDraft::new("u").set_reference_number(" ").validate(),
            Err(ValidationError::EmptyReference)
        );
    }

    #[test]
    fn patch_is_all_or_nothing() {
        let mut req = pending(&["a"]);
        let before = req.clone();

        let err = req
            .apply_patch(
                RequisitionPatch::new()
                    .set_subject("Standing desks")
                    .set_approvers(Vec::<String>::new()),
            )
            .unwrap_err();

        assert!(matches!(
            err,
            WorkflowError::Validation(ValidationError::MissingApprovers)
        ));
        assert_eq!(req, before);
    }

    #[test]
    fn patch_checks_revision() {
        let mut req = pending(&["a"]);
        let revision = req.revision().unwrap();

        req.apply_patch(
            RequisitionPatch::new()
                .expect_revision(revision.clone())
                .set_budget(Some(12_500)),
        )
        .unwrap();
        assert_eq!(req.budget, Some(12_500));
        assert_ne!(req.revision().unwrap(), revision);

        let err = req
            .apply_patch(RequisitionPatch::new().expect_revision(revision))
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Conflict(ConflictError::StaleRevision { .. })
        ));
    }

    #[test]
    fn routing_is_locked_after_a_decision() {
        let mut req = pending(&["a", "b"]);
        decide(&mut req, "a", Decision::Approved).unwrap();
        let before = req.clone();

        for patch in [
            RequisitionPatch::new().set_approvers(["a"]),
            RequisitionPatch::new().set_approvers(["a", "b", "c"]),
            RequisitionPatch::new().set_status(RequisitionStatus::Draft),
        ] {
            let err = req.apply_patch(patch).unwrap_err();
            assert!(matches!(
                err,
                WorkflowError::Validation(ValidationError::RoutingLocked)
            ));
            assert_eq!(req, before);
        }

        // descriptive fields stay editable and the decision can still complete
        req.apply_patch(
            RequisitionPatch::new()
                .set_subject("Ergonomic office chairs")
                .set_approvers(["a", "b"])
                .set_status(RequisitionStatus::Pending),
        )
        .unwrap();
        assert_eq!(req.status, req.derived_status());
        assert_eq!(
            decide(&mut req, "b", Decision::Approved).unwrap(),
            RequisitionStatus::Approved
        );
    }

    #[test]
    fn routing_is_free_before_any_decision() {
        let mut req = pending(&["a", "b"]);

        req.apply_patch(RequisitionPatch::new().set_approvers(["b"]))
            .unwrap();
        req.apply_patch(RequisitionPatch::new().set_status(RequisitionStatus::Draft))
            .unwrap();

        assert_eq!(req.assigned_approvers, vec!["b".to_string()]);
        assert_eq!(req.status, RequisitionStatus::Draft);
    }

    #[test]
    fn filter_combines_criteria() {
        let req = pending(&["a", "b"]);

        assert!(RequisitionFilter::new().matches(&req));
        assert!(
            RequisitionFilter::new()
                .created_by("author")
                .assigned_to("b")
                .status(RequisitionStatus::Pending)
                .search("CHAIR")
                .matches(&req)
        );
        assert!(!RequisitionFilter::new().assigned_to("author").matches(&req));
        assert!(!RequisitionFilter::new().search("desk").matches(&req));
    }

    #[test]
    fn record_survives_cbor() {
        let mut req = pending(&["a"]);
        decide(&mut req, "a", Decision::Approved).unwrap();

        let decoded = Requisition::from_cbor(&req.to_cbor().unwrap()).unwrap();
        assert_eq!(decoded, req);
    }
}
