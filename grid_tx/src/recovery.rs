// SPDX-License-Identifier: MIT OR Apache-2.0
//! Snapshot of in-doubt transactions for a recovery manager.
//!
//! A transaction is in doubt when it prepared locally but never reached a clean
//! end: either it is still waiting for the commit decision, or a step after
//! prepare failed. Recovery needs them in a cluster-wide order, which is the
//! internal-id order of [`GlobalTransaction::recovery_cmp`].

use serde::{Deserialize, Serialize};

use crate::{
    cluster_id::InternalId,
    global_tx::GlobalTransaction,
    local_tx::{LocalTransaction, LocalTxPhase},
};

/// Point-in-time view of one in-doubt local transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InDoubtTransaction {
    pub origin: Option<String>,
    pub id: u64,
    pub internal_id: Option<InternalId>,
    pub phase: LocalTxPhase,
    pub prepared: bool,
    pub completion_failed: bool,
}

impl InDoubtTransaction {
    /// `None` unless `tx` is recovery-aware and currently in doubt.
    pub fn capture(tx: &LocalTransaction) -> Option<Self> {
        let recovery = tx.recovery()?;
        if !recovery.is_in_doubt() {
            return None;
        }
        let identity = tx.identity();
        Some(Self {
            origin: identity.origin().map(str::to_string),
            id: identity.id(),
            internal_id: identity.internal_id(),
            phase: recovery.phase(),
            prepared: recovery.is_prepared(),
            completion_failed: recovery.is_completion_failed(),
        })
    }

    /// Waiting for a decision, as opposed to a failed commit or rollback.
    pub fn awaiting_decision(&self) -> bool {
        self.phase == LocalTxPhase::Prepared
    }
}

/// Collect in-doubt transactions ordered by internal id.
///
/// Non-recovery kinds and cleanly finished transactions are skipped.
pub fn collect_in_doubt<'a, I>(transactions: I) -> Vec<InDoubtTransaction>
where
    I: IntoIterator<Item = &'a LocalTransaction>,
{
    let mut found: Vec<(&GlobalTransaction, InDoubtTransaction)> = transactions
        .into_iter()
        .filter_map(|tx| InDoubtTransaction::capture(tx).map(|snap| (tx.identity(), snap)))
        .collect();
    found.sort_by(|(a, _), (b, _)| a.recovery_cmp(b));

    tracing::debug!(count = found.len(), "Collected in-doubt transactions");
    found.into_iter().map(|(_, snap)| snap).collect()
}
