//! Read-side projections: the per-approver timeline and the dashboard counts.
//!
//! The timeline presents routing as sequential (an approver is "in progress"
//! once everyone before them has approved) even when the engine accepts
//! decisions in any order.
use chrono::Utc;

use crate::directory::UserDirectory;
use crate::error::WorkflowError;
use crate::requisition::{Decision, Requisition, RequisitionFilter, RequisitionStatus};
use crate::store::RequisitionStore;
use crate::types::TimeStamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApproverStage {
    Waiting,
    InProgress,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineEntry {
    pub approver_id: String,
    pub approver_name: Option<String>, // None when the directory doesn't know the id
    pub stage: ApproverStage,
    pub action_date: Option<TimeStamp<Utc>>,
    pub comment: Option<String>,
}

/// One entry per assigned approver, in routing order.
pub fn approver_timeline<D: UserDirectory>(
    requisition: &Requisition,
    directory: &D,
) -> Vec<TimelineEntry> {
    let mut earlier_all_approved = true;
    let mut entries = Vec::with_capacity(requisition.assigned_approvers.len());

    for approver_id in &requisition.assigned_approvers {
        let action = requisition.action_by(approver_id);
        let stage = match action.map(|a| a.action) {
            Some(Decision::Approved) => ApproverStage::Approved,
            Some(Decision::Rejected) => ApproverStage::Rejected,
            None if requisition.status == RequisitionStatus::Pending && earlier_all_approved => {
                ApproverStage::InProgress
            }
            None => ApproverStage::Waiting,
        };
        earlier_all_approved &= stage == ApproverStage::Approved;

        entries.push(TimelineEntry {
            approver_id: approver_id.clone(),
            approver_name: directory.user_by_id(approver_id).map(|u| u.name),
            stage,
            action_date: action.map(|a| a.action_date.clone()),
            comment: action.map(|a| a.comment.clone()),
        });
    }
    entries
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DashboardSummary {
    pub my_drafts: usize,
    pub my_pending: usize,
    pub my_approved: usize,
    pub my_rejected: usize,
    /// Pending requisitions on which the user is an assigned approver.
    pub pending_assigned: usize,
    /// The subset of `pending_assigned` still waiting on the user's decision.
    pub awaiting_my_decision: usize,
}

pub fn dashboard_summary(
    store: &RequisitionStore,
    user_id: &str,
) -> Result<DashboardSummary, WorkflowError> {
    let mut summary = DashboardSummary::default();

    for requisition in store.list(&RequisitionFilter::new().created_by(user_id))? {
        match requisition.status {
            RequisitionStatus::Draft => summary.my_drafts += 1,
            RequisitionStatus::Pending => summary.my_pending += 1,
            RequisitionStatus::Approved => summary.my_approved += 1,
            RequisitionStatus::Rejected => summary.my_rejected += 1,
        }
    }

    let assigned = store.list(
        &RequisitionFilter::new()
            .assigned_to(user_id)
            .status(RequisitionStatus::Pending),
    )?;
    summary.pending_assigned = assigned.len();
    summary.awaiting_my_decision = assigned
        .iter()
        .filter(|r| r.action_by(user_id).is_none())
        .count();

    Ok(summary)
}
