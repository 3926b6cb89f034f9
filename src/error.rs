use crate::requisition::RequisitionStatus;

/// Coarse classification used by transports to map failures onto response codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authorization,
    Conflict,
    NotFound,
    /// Storage trouble; the caller may retry.
    Transient,
    /// A stored record could not be read back or written.
    Internal,
}

#[derive(thiserror::Error, Debug)]
pub enum WorkflowError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("not authorized: {0}")]
    Authorization(#[from] AuthorizationError),
    #[error("conflict: {0}")]
    Conflict(#[from] ConflictError),
    #[error("{kind} `{id}` not found")]
    NotFound { kind: &'static str, id: String },
    #[error("storage failure: {0}")]
    Storage(#[from] sled::Error),
    #[error("failed to encode or decode record: {0}")]
    Codec(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("a comment is required")]
    EmptyComment,
    #[error("at least one approver is required")]
    MissingApprovers,
    #[error("approver `{0}` is assigned more than once")]
    DuplicateApprover(String),
    #[error("subject must not be empty")]
    EmptySubject,
    #[error("reference number must not be empty")]
    EmptyReference,
    #[error("a requisition cannot be created as {0:?}")]
    InvalidInitialStatus(RequisitionStatus),
    #[error("status cannot be set to {0:?} through an edit")]
    InvalidPatchStatus(RequisitionStatus),
    #[error("approver `{0}` is not an active user")]
    InactiveApprover(String),
    #[error("approvers and status are fixed once a decision has been recorded")]
    RoutingLocked,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationError {
    #[error("`{approver_id}` is not an assigned approver")]
    NotAssigned { approver_id: String },
    #[error("requisition is {status:?} and does not accept decisions")]
    NotActionable { status: RequisitionStatus },
    #[error("`{approver_id}` must wait for `{waiting_on}` to approve first")]
    OutOfTurn {
        approver_id: String,
        waiting_on: String,
    },
    #[error("`{actor_id}` is not the author of this requisition")]
    NotOwner { actor_id: String },
    #[error("requisition is {status:?} and can no longer be changed")]
    Terminal { status: RequisitionStatus },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConflictError {
    #[error("`{approver_id}` has already acted on this requisition")]
    AlreadyActed { approver_id: String },
    #[error("reference number `{0}` is already in use")]
    DuplicateReference(String),
    #[error("requisition changed since revision {expected}, now at {actual}")]
    StaleRevision { expected: String, actual: String },
}

impl WorkflowError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Authorization(_) => ErrorKind::Authorization,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Storage(_) => ErrorKind::Transient,
            Self::Codec(_) => ErrorKind::Internal,
        }
    }
}

impl<E: std::fmt::Display> From<minicbor::encode::Error<E>> for WorkflowError {
    fn from(value: minicbor::encode::Error<E>) -> Self {
        Self::Codec(value.to_string())
    }
}

impl From<minicbor::decode::Error> for WorkflowError {
    fn from(value: minicbor::decode::Error) -> Self {
        Self::Codec(value.to_string())
    }
}
