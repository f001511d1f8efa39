use serde::{Deserialize, Serialize};

use crate::model::Chapter;
use crate::working_copy::WorkingCopy;

/// Decides when a freshly fetched chapter may overwrite the working copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergePolicy {
    /// Replace when both sides hold the same number of blocks. This is a
    /// cheap staleness check: a pending add or delete changes the count,
    /// while pending text edits do not and are overwritten.
    #[default]
    BlockCount,
    /// Replace only when nothing is touched and no save is pending.
    RejectDirty,
}

impl MergePolicy {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "block-count" | "count" => Ok(Self::BlockCount),
            "reject-dirty" | "dirty" => Ok(Self::RejectDirty),
            other => anyhow::bail!("unsupported merge policy: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    Replace,
    Keep,
}

/// `save_pending` is true while a debounce timer or a save is outstanding.
pub fn decide(
    working: &WorkingCopy,
    remote: &Chapter,
    policy: MergePolicy,
    save_pending: bool,
) -> MergeDecision {
    let replace = match policy {
        MergePolicy::BlockCount => working.block_count() == remote.contents.len(),
        MergePolicy::RejectDirty => !working.is_dirty() && !save_pending,
    };
    if replace {
        MergeDecision::Replace
    } else {
        MergeDecision::Keep
    }
}

/// Applies `remote` to the working copy according to `policy`. On keep the
/// server timestamp is still taken over.
pub fn reconcile(
    working: &mut WorkingCopy,
    remote: &Chapter,
    policy: MergePolicy,
    save_pending: bool,
) -> MergeDecision {
    let decision = decide(working, remote, policy, save_pending);
    match decision {
        MergeDecision::Replace => working.replace_with(remote),
        MergeDecision::Keep => {
            keep_local(working, remote);
        }
    }
    tracing::debug!(
        chapter_id = %remote.id,
        ?policy,
        ?decision,
        local_blocks = working.block_count(),
        remote_blocks = remote.contents.len(),
        "reconciled chapter"
    );
    decision
}

/// Keeps the working copy and only takes over the server timestamp.
pub fn keep_local(working: &mut WorkingCopy, remote: &Chapter) -> MergeDecision {
    working.modified_at = remote.modified_at.or(working.modified_at);
    MergeDecision::Keep
}
