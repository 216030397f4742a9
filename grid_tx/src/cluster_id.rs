// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cluster-wide internal ids for recovery-aware transaction identities.
//!
//! # Overview
//!
//! An [`InternalId`] totally orders transactions across the cluster and across
//! node restarts. It combines three parts:
//!
//! | Part | Source | Purpose |
//! |------|--------|---------|
//! | `view_id` | view in which the rank was computed | separates restart epochs |
//! | `rank` | local position in the view's member list | separates nodes |
//! | `sequence` | per-generator atomic counter | separates transactions |
//!
//! # Rank snapshot
//!
//! The [`RankCalculator`] is registered as a [`ViewListener`] and recomputes the
//! rank on every view change. View and rank are packed into one `AtomicU64`:
//!
//! ```text
//! 63                 32 31                  0
//! +--------------------+--------------------+
//! |   view_id + 1      |       rank         |
//! +--------------------+--------------------+
//! ```
//!
//! A zero upper half means no view has been installed yet. Readers do a single
//! atomic load, so an id never mixes the rank of one view with the epoch of
//! another. Writers use a CAS loop and refuse views older than the stored one.
//!
//! Before the first view, ids are generated with rank 0 and view 0. This is the
//! soft-start case and is not reported as an error.

use std::fmt;
#[cfg(not(feature = "loom"))]
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[cfg(feature = "loom")]
use loom::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::membership::{NodeId, ViewChange, ViewListener};

const RANK_MASK: u64 = 0xFFFF_FFFF;

/// Largest view id that keeps its own epoch in an [`InternalId`].
///
/// Later views still update the rank but share this epoch.
pub const MAX_VIEW_ID: u64 = u32::MAX as u64 - 1;

/// Recovery ordering key attached to recovery-aware identities.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct InternalId {
    /// View in which the rank was computed (0 before the first view),
    /// capped at [`MAX_VIEW_ID`].
    pub view_id: u32,
    /// Rank of the generating node in that view.
    pub rank: u32,
    /// Per-node sequence number.
    pub sequence: u64,
}

impl fmt::Display for InternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.view_id, self.rank, self.sequence)
    }
}

/// Consistent (view, rank) pair read from the calculator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankSnapshot {
    /// `None` until the first view is applied.
    pub view_id: Option<u32>,
    pub rank: u32,
}

impl RankSnapshot {
    fn unpack(packed: u64) -> Self {
        let epoch = (packed >> 32) as u32;
        Self {
            view_id: epoch.checked_sub(1),
            rank: (packed & RANK_MASK) as u32,
        }
    }
}

fn pack(view_id: u64, rank: u32) -> u64 {
    let epoch = u32::try_from(view_id.min(MAX_VIEW_ID) + 1).unwrap_or(u32::MAX);
    (u64::from(epoch) << 32) | u64::from(rank)
}

/// Recomputes the local rank whenever the cluster view changes.
#[derive(Debug, Default)]
pub struct RankCalculator {
    packed: AtomicU64,
}

impl RankCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a view. Returns the new rank, or `None` if the view was ignored.
    ///
    /// A view is ignored when the local address is not a member or when it is
    /// older than the view already applied.
    pub fn calculate_rank(&self, local: &str, members: &[NodeId], view_id: u64) -> Option<u32> {
        let Some(index) = members.iter().position(|m| m == local) else {
            tracing::warn!(
                local = local,
                view_id = view_id,
                members = members.len(),
                "Local address missing from view, keeping previous rank"
            );
            return None;
        };
        let rank = u32::try_from(index).unwrap_or(u32::MAX);
        if view_id > MAX_VIEW_ID {
            tracing::warn!(
                view_id = view_id,
                max_view_id = MAX_VIEW_ID,
                "View id exceeds internal id epoch range, epoch saturated"
            );
        }
        let new = pack(view_id, rank);

        let mut current = self.packed.load(Ordering::Acquire);
        loop {
            if (current >> 32) > (new >> 32) {
                tracing::debug!(
                    view_id = view_id,
                    current_view = ?RankSnapshot::unpack(current).view_id,
                    "Ignoring stale view"
                );
                return None;
            }
            match self
                .packed
                .compare_exchange_weak(current, new, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(c) => current = c,
            }
        }

        tracing::debug!(view_id = view_id, rank = rank, "Recalculated node rank");
        Some(rank)
    }

    pub fn snapshot(&self) -> RankSnapshot {
        RankSnapshot::unpack(self.packed.load(Ordering::Acquire))
    }

    pub fn rank(&self) -> u32 {
        self.snapshot().rank
    }

    pub fn has_view(&self) -> bool {
        self.snapshot().view_id.is_some()
    }
}

impl ViewListener for RankCalculator {
    fn on_view_change(&self, view: &ViewChange) {
        self.calculate_rank(&view.local_address, &view.members, view.view_id);
    }
}

/// Per-node generator of [`InternalId`]s.
#[derive(Debug, Default)]
pub struct ClusterIdGenerator {
    cluster_sequence: AtomicU64,
    local_sequence: AtomicU64,
    rank: Arc<RankCalculator>,
}

impl ClusterIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listener to register with the membership notifier.
    pub fn rank_calculator(&self) -> Arc<RankCalculator> {
        Arc::clone(&self.rank)
    }

    /// Next sequence value; never repeats for this generator instance.
    ///
    /// Clustered and local sequences are counted separately. Local values
    /// are only compared on this node.
    pub fn next_sequence(&self, clustered: bool) -> u64 {
        let counter = if clustered {
            &self.cluster_sequence
        } else {
            &self.local_sequence
        };
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Build a complete internal id from one rank snapshot and one sequence.
    pub fn new_internal_id(&self, clustered: bool) -> InternalId {
        if !clustered {
            return InternalId {
                view_id: 0,
                rank: 0,
                sequence: self.next_sequence(false),
            };
        }

        let snapshot = self.rank.snapshot();
        if snapshot.view_id.is_none() {
            tracing::trace!("No cluster view yet, using default rank");
        }
        InternalId {
            view_id: snapshot.view_id.unwrap_or(0),
            rank: snapshot.rank,
            sequence: self.next_sequence(true),
        }
    }
}
