// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cluster-wide transaction identities.
//!
//! # Overview
//!
//! A [`GlobalTransaction`] names one distributed transaction. Every kind shares
//! the same core: the originating node and a sequence value drawn from one
//! process-wide counter, so factories for different caches on the same node
//! never mint equal identities. Two identities are equal iff their cores are
//! equal.
//!
//! Kinds add optional fields on top of the core:
//!
//! | Kind | Coin toss | Internal id |
//! |------|-----------|-------------|
//! | [`IdentityKind::Plain`] | - | - |
//! | [`IdentityKind::CoinToss`] | yes | - |
//! | [`IdentityKind::Recovery`] | - | yes |
//! | [`IdentityKind::RecoveryCoinToss`] | yes | yes |
//!
//! The optional fields never affect equality or hashing. The coin toss feeds
//! [`GlobalTransaction::deadlock_cmp`]; the internal id feeds
//! [`GlobalTransaction::recovery_cmp`].
//!
//! # Wire form
//!
//! Identities travel between nodes as an [`IdentityPayload`]. A receiving node
//! asks its factory for a template of its own kind and fills it with
//! [`GlobalTransaction::materialize`], which rejects payloads produced by an
//! incompatible variant family.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{self, AtomicU64};

use serde::{Deserialize, Serialize};

use crate::{
    cluster_id::InternalId,
    error::{Result, TxError},
    membership::NodeId,
};

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Next identity sequence value for this process. Never returns 0.
pub(crate) fn next_identity_id() -> u64 {
    NEXT_ID.fetch_add(1, atomic::Ordering::Relaxed) + 1
}

/// Which optional fields an identity carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentityKind {
    Plain,
    /// Deadlock-detection aware.
    CoinToss,
    /// Recovery aware.
    Recovery,
    /// Recovery and deadlock-detection aware.
    RecoveryCoinToss,
}

impl IdentityKind {
    pub fn has_coin_toss(self) -> bool {
        matches!(self, IdentityKind::CoinToss | IdentityKind::RecoveryCoinToss)
    }

    pub fn is_recovery_aware(self) -> bool {
        matches!(self, IdentityKind::Recovery | IdentityKind::RecoveryCoinToss)
    }
}

impl fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IdentityKind::Plain => "plain",
            IdentityKind::CoinToss => "coin-toss",
            IdentityKind::Recovery => "recovery",
            IdentityKind::RecoveryCoinToss => "recovery+coin-toss",
        };
        f.write_str(name)
    }
}

/// Serializable identity fields exchanged between nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityPayload {
    pub origin: Option<NodeId>,
    pub id: u64,
    pub coin_toss: Option<u64>,
    pub internal_id: Option<InternalId>,
}

impl IdentityPayload {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Identity of a distributed transaction.
#[derive(Debug, Clone)]
pub struct GlobalTransaction {
    kind: IdentityKind,
    origin: Option<NodeId>,
    id: u64,
    remote: bool,
    coin_toss: Option<u64>,
    internal_id: Option<InternalId>,
    /// False only for an unfilled template.
    assigned: bool,
}

impl GlobalTransaction {
    /// Create an identity with the given core and no optional fields.
    ///
    /// Prefer the factory; this exists for callers that rebuild identities from
    /// their own records.
    pub fn new(kind: IdentityKind, origin: Option<NodeId>, id: u64, remote: bool) -> Self {
        Self {
            kind,
            origin,
            id,
            remote,
            coin_toss: None,
            internal_id: None,
            assigned: true,
        }
    }

    /// Fully-built identity; used by the factory so nothing partial escapes.
    pub(crate) fn assemble(
        kind: IdentityKind,
        origin: Option<NodeId>,
        id: u64,
        remote: bool,
        coin_toss: Option<u64>,
        internal_id: Option<InternalId>,
    ) -> Self {
        Self {
            kind,
            origin,
            id,
            remote,
            coin_toss,
            internal_id,
            assigned: true,
        }
    }

    /// Unfilled identity of the given kind, awaiting [`Self::materialize`].
    pub(crate) fn template(kind: IdentityKind) -> Self {
        Self {
            kind,
            origin: None,
            id: 0,
            remote: true,
            coin_toss: None,
            internal_id: None,
            assigned: false,
        }
    }

    pub fn kind(&self) -> IdentityKind {
        self.kind
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_remote(&self) -> bool {
        self.remote
    }

    pub fn coin_toss(&self) -> Option<u64> {
        self.coin_toss
    }

    pub fn internal_id(&self) -> Option<InternalId> {
        self.internal_id
    }

    /// False for a template that has not been materialized.
    pub fn is_assigned(&self) -> bool {
        self.assigned
    }

    /// Attach the recovery internal id. Allowed once, on recovery kinds only.
    pub fn set_internal_id(&mut self, internal_id: InternalId) -> Result<()> {
        if !self.kind.is_recovery_aware() {
            tracing::warn!(tx = %self, kind = %self.kind, "Internal id on non-recovery identity");
            return Err(TxError::IncompatibleIdentity(format!(
                "{} identity cannot carry an internal id",
                self.kind
            )));
        }
        if let Some(existing) = self.internal_id {
            tracing::warn!(
                tx = %self,
                existing = %existing,
                rejected = %internal_id,
                "Internal id already set"
            );
            return Err(TxError::InternalIdAlreadySet(self.to_string()));
        }
        self.internal_id = Some(internal_id);
        Ok(())
    }

    /// Attach the deadlock coin toss. Allowed once, on coin-toss kinds only.
    pub fn set_coin_toss(&mut self, coin_toss: u64) -> Result<()> {
        if !self.kind.has_coin_toss() {
            tracing::warn!(tx = %self, kind = %self.kind, "Coin toss on identity without deadlock detection");
            return Err(TxError::IncompatibleIdentity(format!(
                "{} identity cannot carry a coin toss",
                self.kind
            )));
        }
        if self.coin_toss.is_some() {
            tracing::warn!(tx = %self, "Coin toss already set");
            return Err(TxError::CoinTossAlreadySet(self.to_string()));
        }
        self.coin_toss = Some(coin_toss);
        Ok(())
    }

    /// Wire form of this identity.
    pub fn payload(&self) -> IdentityPayload {
        IdentityPayload {
            origin: self.origin.clone(),
            id: self.id,
            coin_toss: self.coin_toss,
            internal_id: self.internal_id,
        }
    }

    /// Fill a template from a received payload.
    ///
    /// The payload must carry exactly the optional fields this kind expects.
    /// The result is marked remote.
    pub fn materialize(mut self, payload: IdentityPayload) -> Result<Self> {
        if self.assigned {
            return Err(TxError::IdentityAlreadyAssigned(self.to_string()));
        }
        if payload.coin_toss.is_some() != self.kind.has_coin_toss() {
            return Err(TxError::IncompatibleIdentity(format!(
                "{} identity received coin toss {:?}",
                self.kind, payload.coin_toss
            )));
        }
        if payload.internal_id.is_some() != self.kind.is_recovery_aware() {
            return Err(TxError::IncompatibleIdentity(format!(
                "{} identity received internal id {:?}",
                self.kind, payload.internal_id
            )));
        }

        self.origin = payload.origin;
        self.id = payload.id;
        self.coin_toss = payload.coin_toss;
        self.internal_id = payload.internal_id;
        self.remote = true;
        self.assigned = true;
        Ok(self)
    }

    /// Deadlock tie-break order: coin toss, then origin, then id.
    ///
    /// Identities without a coin toss sort as if it were 0.
    pub fn deadlock_cmp(&self, other: &Self) -> Ordering {
        self.coin_toss
            .unwrap_or(0)
            .cmp(&other.coin_toss.unwrap_or(0))
            .then_with(|| self.origin.cmp(&other.origin))
            .then_with(|| self.id.cmp(&other.id))
    }

    /// True if `self` wins a deadlock against `other`, making `other` the victim.
    pub fn would_interrupt(&self, other: &Self) -> bool {
        self.deadlock_cmp(other) == Ordering::Greater
    }

    /// Recovery order: internal id (absent first), then origin, then id.
    pub fn recovery_cmp(&self, other: &Self) -> Ordering {
        self.internal_id
            .cmp(&other.internal_id)
            .then_with(|| self.origin.cmp(&other.origin))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialEq for GlobalTransaction {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.origin == other.origin
    }
}

impl Eq for GlobalTransaction {}

impl Hash for GlobalTransaction {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.origin.hash(state);
        self.id.hash(state);
    }
}

impl fmt::Display for GlobalTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GlobalTx:{}:{}:{}",
            self.origin.as_deref().unwrap_or("local"),
            self.id,
            if self.remote { "remote" } else { "local" }
        )
    }
}
