//! Requisition approval workflow.
//!
//! Requisitions are created through the [`store::RequisitionStore`], routed to
//! one or more approvers, and driven to `Approved` or `Rejected` by the
//! [`engine::ApprovalEngine`].

pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod requisition;
pub mod store;
pub mod timeline;
pub mod types;
pub mod utils;

pub use config::{ApprovalOrdering, WorkflowConfig};
pub use engine::ApprovalEngine;
pub use error::{ErrorKind, WorkflowError};
pub use requisition::{
    ApprovalAction, Decision, FileAttachment, Requisition, RequisitionDraft, RequisitionFilter,
    RequisitionPatch, RequisitionStatus,
};
pub use store::RequisitionStore;
