//! Template seeding
//!
//! The seed file is a JSON array of template drafts. Each one is
//! published through the engine, so it gets the same validation (and the
//! next version number) as any other registration.

use anyhow::Context;
use approval_engine::ApprovalEngine;
use approval_types::TemplateDraft;
use std::path::Path;

/// Read template drafts from `path`
pub fn read_drafts(path: impl AsRef<Path>) -> anyhow::Result<Vec<TemplateDraft>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading template file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("parsing template file {}", path.display()))
}

/// Publish every draft. Stops at the first invalid one.
pub fn publish_all(engine: &ApprovalEngine, drafts: &[TemplateDraft]) -> anyhow::Result<usize> {
    for draft in drafts {
        engine
            .publish_template(draft)
            .with_context(|| format!("publishing template for {}", draft.request_type))?;
    }
    Ok(drafts.len())
}
