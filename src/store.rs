//! Requisition Store: the authoritative collection of requisition records
use std::sync::Arc;

use chrono::Utc;
use sled::Transactional;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use tracing::{debug, info};

use crate::config::WorkflowConfig;
use crate::error::{ConflictError, WorkflowError};
use crate::requisition::{Requisition, RequisitionDraft, RequisitionFilter, RequisitionPatch};
use crate::types::TimeStamp;
use crate::utils::{self, REQUISITION_HRP};

const REQUISITIONS_TREE: &str = "requisitions";
const SEQUENCES_TREE: &str = "reference_sequences";
const REFERENCES_TREE: &str = "reference_numbers";

/// Records live in one sled tree keyed by id. A second tree counts the
/// requisitions created per year and a third maps every reference number in
/// use to its record.
///
/// Every read decodes a fresh copy, so nothing handed out aliases stored state.
#[derive(Clone)]
pub struct RequisitionStore {
    requisitions: sled::Tree,
    sequences: sled::Tree,
    references: sled::Tree,
    reference_prefix: String,
    sequence_width: usize,
}

impl RequisitionStore {
    pub fn open(instance: Arc<sled::Db>, config: &WorkflowConfig) -> Result<Self, WorkflowError> {
        Ok(Self {
            requisitions: instance.open_tree(REQUISITIONS_TREE)?,
            sequences: instance.open_tree(SEQUENCES_TREE)?,
            references: instance.open_tree(REFERENCES_TREE)?,
            reference_prefix: config.reference_prefix.clone(),
            sequence_width: config.sequence_width,
        })
    }

    /// A store backed by a throwaway database, removed when dropped.
    pub fn temporary(config: &WorkflowConfig) -> Result<Self, WorkflowError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::open(Arc::new(db), config)
    }

    pub fn create(&self, draft: RequisitionDraft) -> Result<Requisition, WorkflowError> {
        self.create_at(draft, TimeStamp::now())
    }

    /// Creates a requisition as if it were created at `created_at`.
    ///
    /// The reference sequence is the number of requisitions already created in
    /// that year plus one, moved past any sequence an explicit reference has
    /// already claimed. A supplied reference that is already taken is refused.
    /// Bumping the yearly count, claiming the reference and inserting the
    /// record happen in one transaction.
    pub fn create_at(
        &self,
        draft: RequisitionDraft,
        created_at: TimeStamp<Utc>,
    ) -> Result<Requisition, WorkflowError> {
        draft.validate()?;

        let id = utils::new_record_id(REQUISITION_HRP)?;
        let year = created_at.year();
        let year_key = year.to_be_bytes();

        let trees = (&self.requisitions, &self.sequences, &self.references);
        let result = trees.transaction(|(records, sequences, references)| {
            let created = match sequences.get(year_key)? {
                Some(count) => decode_count(&count).map_err(ConflictableTransactionError::Abort)?,
                None => 0,
            };
            sequences.insert(&year_key[..], (created + 1).to_be_bytes().to_vec())?;

            let reference = match &draft.reference_number {
                Some(reference) => {
                    if references.get(reference.as_bytes())?.is_some() {
                        return Err(ConflictableTransactionError::Abort(WorkflowError::from(
                            ConflictError::DuplicateReference(reference.clone()),
                        )));
                    }
                    reference.clone()
                }
                None => {
                    let mut sequence = created + 1;
                    loop {
                        let candidate = utils::format_reference(
                            &self.reference_prefix,
                            year,
                            sequence,
                            self.sequence_width,
                        );
                        if references.get(candidate.as_bytes())?.is_none() {
                            break candidate;
                        }
                        sequence += 1;
                    }
                }
            };
            references.insert(reference.as_bytes(), id.as_bytes())?;

            let requisition =
                draft
                    .clone()
                    .into_requisition(id.clone(), reference, created_at.clone());
            let bytes = requisition
                .to_cbor()
                .map_err(ConflictableTransactionError::Abort)?;
            records.insert(id.as_bytes(), bytes)?;

            Ok(requisition)
        });

        let requisition = result.map_err(|e| match e {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => WorkflowError::Storage(e),
        })?;

        info!(
            requisition_id = %requisition.id,
            reference = %requisition.reference_number,
            status = ?requisition.status,
            "requisition created"
        );
        Ok(requisition)
    }

    pub fn get_by_id(&self, id: &str) -> Result<Option<Requisition>, WorkflowError> {
        self.requisitions
            .get(id.as_bytes())?
            .map(|bytes| Requisition::from_cbor(&bytes))
            .transpose()
    }

    /// Like [`Self::get_by_id`] but an unknown id is an error.
    pub fn fetch(&self, id: &str) -> Result<Requisition, WorkflowError> {
        self.get_by_id(id)?
            .ok_or_else(|| WorkflowError::not_found("requisition", id))
    }

    /// Matching requisitions, newest first.
    pub fn list(&self, filter: &RequisitionFilter) -> Result<Vec<Requisition>, WorkflowError> {
        let mut found = vec![];
        for entry in self.requisitions.iter() {
            let (_, bytes) = entry?;
            let requisition = Requisition::from_cbor(&bytes)?;
            if filter.matches(&requisition) {
                found.push(requisition);
            }
        }
        found.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        debug!(matched = found.len(), "listed requisitions");
        Ok(found)
    }

    /// Merges `patch` into the stored record.
    ///
    /// This is the raw store primitive: it keeps routing consistent but does
    /// not check who is editing or whether the requisition is already closed.
    /// Author edits go through [`crate::engine::ApprovalEngine::edit`].
    pub fn update(&self, id: &str, patch: RequisitionPatch) -> Result<Requisition, WorkflowError> {
        let updated = self.mutate(id, |requisition| requisition.apply_patch(patch.clone()))?;

        info!(requisition_id = %id, status = ?updated.status, "requisition updated");
        Ok(updated)
    }

    /// Read-modify-write of a single record.
    ///
    /// `change` always sees the latest stored value. If another writer replaced
    /// the record in between, the swap fails and `change` runs again on the new
    /// value, so its checks are never made against stale state. Only the one
    /// key is contended; other requisitions are unaffected.
    pub fn mutate<F>(&self, id: &str, mut change: F) -> Result<Requisition, WorkflowError>
    where
        F: FnMut(&mut Requisition) -> Result<(), WorkflowError>,
    {
        loop {
            let current = self
                .requisitions
                .get(id.as_bytes())?
                .ok_or_else(|| WorkflowError::not_found("requisition", id))?;

            let mut requisition = Requisition::from_cbor(&current)?;
            change(&mut requisition)?;
            let replacement = requisition.to_cbor()?;

            match self.requisitions.compare_and_swap(
                id.as_bytes(),
                Some(&current),
                Some(replacement),
            )? {
                Ok(()) => return Ok(requisition),
                Err(_) => {
                    debug!(requisition_id = %id, "concurrent write detected, re-reading");
                }
            }
        }
    }

    /// Blocks until pending writes of both trees are on disk.
    pub fn flush(&self) -> Result<(), WorkflowError> {
        self.requisitions.flush()?;
        self.sequences.flush()?;
        self.references.flush()?;
        Ok(())
    }

    /// Number of requisitions created in `year`.
    pub fn created_in_year(&self, year: i32) -> Result<u64, WorkflowError> {
        match self.sequences.get(year.to_be_bytes())? {
            Some(count) => decode_count(&count),
            None => Ok(0),
        }
    }
}

fn decode_count(bytes: &[u8]) -> Result<u64, WorkflowError> {
    <[u8; 8]>::try_from(bytes)
        .map(u64::from_be_bytes)
        .map_err(|_| {
            WorkflowError::Codec(format!("yearly count is {} bytes, expected 8", bytes.len()))
        })
}
