//! Workflow configuration
use anyhow::{Context, bail};

pub const DEFAULT_REFERENCE_PREFIX: &str = "MEMO";
pub const DEFAULT_SEQUENCE_WIDTH: usize = 3;

const PREFIX_VAR: &str = "REQUISITION_REFERENCE_PREFIX";
const WIDTH_VAR: &str = "REQUISITION_SEQUENCE_WIDTH";
const ORDERING_VAR: &str = "REQUISITION_APPROVAL_ORDERING";

/// How the engine treats the order of `assigned_approvers`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ApprovalOrdering {
    /// Any assigned approver may decide while the requisition is pending.
    #[default]
    AnyOrder,
    /// An approver may only decide once every earlier approver has approved.
    Sequential,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowConfig {
    pub reference_prefix: String,
    pub sequence_width: usize,
    pub ordering: ApprovalOrdering,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            reference_prefix: DEFAULT_REFERENCE_PREFIX.to_string(),
            sequence_width: DEFAULT_SEQUENCE_WIDTH,
            ordering: ApprovalOrdering::AnyOrder,
        }
    }
}

impl WorkflowConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from `lookup`, keeping defaults for unset keys.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(prefix) = lookup(PREFIX_VAR) {
            let prefix = prefix.trim();
            if prefix.is_empty() || prefix.contains('-') {
                bail!("{PREFIX_VAR} must be non-empty and must not contain '-', got {prefix:?}");
            }
            config.reference_prefix = prefix.to_string();
        }

        if let Some(width) = lookup(WIDTH_VAR) {
            config.sequence_width = width
                .trim()
                .parse()
                .with_context(|| format!("{WIDTH_VAR} is not a number: {width:?}"))?;
            if config.sequence_width == 0 {
                bail!("{WIDTH_VAR} must be at least 1");
            }
        }

        if let Some(ordering) = lookup(ORDERING_VAR) {
            config.ordering = match ordering.trim().to_ascii_lowercase().as_str() {
                "any" | "any-order" => ApprovalOrdering::AnyOrder,
                "sequential" => ApprovalOrdering::Sequential,
                other => bail!("{ORDERING_VAR} must be `any` or `sequential`, got {other:?}"),
            };
        }

        Ok(config)
    }

    pub fn with_ordering(mut self, ordering: ApprovalOrdering) -> Self {
        self.ordering = ordering;
        self
    }
}
