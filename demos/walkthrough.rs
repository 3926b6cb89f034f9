//! Walks a requisition from draft to a final decision on a sled database.
//!
//! RUST_LOG=debug cargo run --example walkthrough

use std::sync::Arc;

use anyhow::Context;
use requisition_approval::{
    ApprovalEngine, RequisitionDraft, RequisitionPatch, RequisitionStore, WorkflowConfig,
    directory::{MemoryDirectory, User, UserDirectory},
    timeline::{approver_timeline, dashboard_summary},
};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = WorkflowConfig::from_env().context("invalid workflow configuration")?;
    let db = sled::Config::new()
        .temporary(true)
        .open()
        .context("failed to open database")?;
    let store = RequisitionStore::open(Arc::new(db), &config)?;

    let mut directory = MemoryDirectory::new([
        User::new("1", "John Doe", "john@example.com"),
        User::new("2", "Jane Smith", "jane@example.com"),
        User::new("3", "Bob Johnson", "bob@example.com"),
    ]);
    directory.sign_in_as("1");
    let author = directory
        .current_user()
        .context("no user signed in")?;

    let engine = ApprovalEngine::new(store, directory, &config);

    let draft = engine.store().create(
        RequisitionDraft::new(author.id.as_str())
            .set_subject("Standing Desks")
            .set_summary("Request for 3 adjustable standing desks"),
    )?;
    println!("created {} ({:?})", draft.reference_number, draft.status);

    engine.edit(
        &draft.id,
        &author.id,
        RequisitionPatch::new()
            .set_budget(Some(120_000))
            .set_approvers(["2", "3"]),
    )?;
    let pending = engine.submit(&draft.id, &author.id)?;
    println!("submitted {} ({:?})", pending.reference_number, pending.status);

    engine.approve(&pending.id, "2", "Within the quarterly budget")?;
    let done = engine.approve(&pending.id, "3", "Approved")?;

    for entry in approver_timeline(&done, engine.directory()) {
        println!(
            "  {:<12} {:?} {}",
            entry.approver_name.as_deref().unwrap_or(&entry.approver_id),
            entry.stage,
            entry.comment.unwrap_or_default()
        );
    }
    println!("final status: {:?}", done.status);

    let summary = dashboard_summary(engine.store(), &author.id)?;
    println!("dashboard for {}: {summary:?}", author.name);

    Ok(())
}
