// SPDX-License-Identifier: MIT OR Apache-2.0
//! Variant-family selection and the single construction point for transaction state.
//!
//! # Overview
//!
//! Three independent capabilities shape every transaction object on a node:
//! deadlock detection (DLD), crash recovery, and two-phase (XA) versus
//! single-phase (synchronization) commit. [`VariantFamily`] is the closed set of
//! legal combinations; it is resolved once when the [`TransactionFactory`] is
//! built and never changes afterwards.
//!
//! | Family | Identity | Local | Remote |
//! |--------|----------|-------|--------|
//! | `DldRecoveryXa` | recovery+coin-toss | recovery-aware | recovery-aware |
//! | `DldNoRecoveryXa` | coin-toss | XA | plain |
//! | `DldNoRecoveryNoXa` | coin-toss | synchronization | plain |
//! | `NoDldRecoveryXa` | recovery | recovery-aware | recovery-aware |
//! | `NoDldNoRecoveryXa` | plain | XA | plain |
//! | `NoDldNoRecoveryNoXa` | plain | synchronization | plain |
//!
//! Recovery needs the XA prepare phase, so recovery with synchronization commit
//! is rejected whatever the DLD setting.
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use grid_tx::{LocalMembership, MembershipNotifier, TransactionFactory, TxConfig};
//!
//! let config = TxConfig::new()
//!     .with_deadlock_detection(true)
//!     .with_recovery(true)
//!     .with_clustered(true);
//! let factory = TransactionFactory::new(config)?.with_coin_toss_seed(7);
//!
//! let membership: Arc<dyn MembershipNotifier> = Arc::new(LocalMembership::new("node-b"));
//! factory.start(&membership)?;
//!
//! let gtx = factory.new_global_identity_from(Some("node-b".to_string()), false);
//! assert!(gtx.coin_toss().is_some());
//! assert!(gtx.internal_id().is_some());
//! # Ok::<(), grid_tx::TxError>(())
//! ```
//!
//! # Concurrency
//!
//! All creation methods take `&self`. Identity ids come from a process-wide
//! atomic counter shared by every factory; internal ids from the
//! [`ClusterIdGenerator`]. The coin-toss source
//! sits behind a mutex held only for a single draw.

use std::fmt;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::{
    cluster_id::ClusterIdGenerator,
    config::TxConfig,
    error::{Result, TxError},
    global_tx::{self, GlobalTransaction, IdentityKind},
    local_tx::{LocalTransaction, LocalTxKind, TransactionContext},
    membership::{ListenerId, MembershipNotifier, NodeId, ViewListener},
    remote_tx::{RemoteTransaction, RemoteTxKind},
    write_command::WriteCommand,
};

/// One legal combination of (deadlock detection, recovery, two-phase commit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariantFamily {
    DldRecoveryXa,
    DldNoRecoveryXa,
    DldNoRecoveryNoXa,
    NoDldRecoveryXa,
    NoDldNoRecoveryXa,
    NoDldNoRecoveryNoXa,
}

impl VariantFamily {
    /// Every legal family.
    pub const ALL: [VariantFamily; 6] = [
        VariantFamily::DldRecoveryXa,
        VariantFamily::DldNoRecoveryXa,
        VariantFamily::DldNoRecoveryNoXa,
        VariantFamily::NoDldRecoveryXa,
        VariantFamily::NoDldNoRecoveryXa,
        VariantFamily::NoDldNoRecoveryNoXa,
    ];

    /// Map capability flags to a family.
    pub fn resolve(deadlock_detection: bool, recovery: bool, two_phase_commit: bool) -> Result<Self> {
        let family = match (deadlock_detection, recovery, two_phase_commit) {
            (true, true, true) => VariantFamily::DldRecoveryXa,
            (true, false, true) => VariantFamily::DldNoRecoveryXa,
            (true, false, false) => VariantFamily::DldNoRecoveryNoXa,
            (false, true, true) => VariantFamily::NoDldRecoveryXa,
            (false, false, true) => VariantFamily::NoDldNoRecoveryXa,
            (false, false, false) => VariantFamily::NoDldNoRecoveryNoXa,
            (_, true, false) => {
                tracing::error!(
                    deadlock_detection,
                    recovery,
                    two_phase_commit,
                    "Unsupported transaction capability combination"
                );
                return Err(TxError::UnsupportedCombination {
                    deadlock_detection,
                    recovery,
                    two_phase_commit,
                });
            },
        };
        tracing::trace!(family = %family, "Resolved transaction variant family");
        Ok(family)
    }

    pub fn deadlock_detection(self) -> bool {
        matches!(
            self,
            VariantFamily::DldRecoveryXa
                | VariantFamily::DldNoRecoveryXa
                | VariantFamily::DldNoRecoveryNoXa
        )
    }

    pub fn recovery(self) -> bool {
        matches!(
            self,
            VariantFamily::DldRecoveryXa | VariantFamily::NoDldRecoveryXa
        )
    }

    pub fn two_phase_commit(self) -> bool {
        !matches!(
            self,
            VariantFamily::DldNoRecoveryNoXa | VariantFamily::NoDldNoRecoveryNoXa
        )
    }

    pub fn identity_kind(self) -> IdentityKind {
        match (self.deadlock_detection(), self.recovery()) {
            (true, true) => IdentityKind::RecoveryCoinToss,
            (true, false) => IdentityKind::CoinToss,
            (false, true) => IdentityKind::Recovery,
            (false, false) => IdentityKind::Plain,
        }
    }

    pub fn local_kind(self) -> LocalTxKind {
        if self.recovery() {
            LocalTxKind::RecoveryAware
        } else if self.two_phase_commit() {
            LocalTxKind::Xa
        } else {
            LocalTxKind::Synchronization
        }
    }

    pub fn remote_kind(self) -> RemoteTxKind {
        if self.recovery() {
            RemoteTxKind::RecoveryAware
        } else {
            RemoteTxKind::Plain
        }
    }
}

impl fmt::Display for VariantFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VariantFamily::DldRecoveryXa => "DLD_RECOVERY_XA",
            VariantFamily::DldNoRecoveryXa => "DLD_NORECOVERY_XA",
            VariantFamily::DldNoRecoveryNoXa => "DLD_NORECOVERY_NOXA",
            VariantFamily::NoDldRecoveryXa => "NODLD_RECOVERY_XA",
            VariantFamily::NoDldNoRecoveryXa => "NODLD_NORECOVERY_XA",
            VariantFamily::NoDldNoRecoveryNoXa => "NODLD_NORECOVERY_NOXA",
        };
        f.write_str(name)
    }
}

/// Counters for objects created by a factory.
#[derive(Debug, Default)]
pub struct FactoryStats {
    /// Identities minted for new transactions.
    pub identities_created: AtomicU64,
    /// Unfilled templates handed out for received payloads.
    pub templates_created: AtomicU64,
    pub local_created: AtomicU64,
    pub remote_created: AtomicU64,
    pub coin_tosses: AtomicU64,
    pub internal_ids: AtomicU64,
}

impl FactoryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> FactoryStatsSnapshot {
        FactoryStatsSnapshot {
            identities_created: self.identities_created.load(Ordering::Relaxed),
            templates_created: self.templates_created.load(Ordering::Relaxed),
            local_created: self.local_created.load(Ordering::Relaxed),
            remote_created: self.remote_created.load(Ordering::Relaxed),
            coin_tosses: self.coin_tosses.load(Ordering::Relaxed),
            internal_ids: self.internal_ids.load(Ordering::Relaxed),
        }
    }

    /// Emit current counters as a structured log event.
    pub fn emit_as_logs(&self) {
        let s = self.snapshot();
        tracing::info!(
            target: "grid_tx::metrics",
            identities_created = s.identities_created,
            templates_created = s.templates_created,
            local_created = s.local_created,
            remote_created = s.remote_created,
            coin_tosses = s.coin_tosses,
            internal_ids = s.internal_ids,
            "Transaction factory stats snapshot"
        );
    }
}

/// Point-in-time snapshot of factory statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactoryStatsSnapshot {
    pub identities_created: u64,
    pub templates_created: u64,
    pub local_created: u64,
    pub remote_created: u64,
    pub coin_tosses: u64,
    pub internal_ids: u64,
}

struct Subscription {
    notifier: Arc<dyn MembershipNotifier>,
    listener: ListenerId,
}

/// Sole entry point for creating transaction identities and state.
pub struct TransactionFactory {
    family: VariantFamily,
    clustered: bool,
    cluster_ids: Option<Arc<ClusterIdGenerator>>,
    coin_source: Mutex<ChaCha8Rng>,
    subscription: Mutex<Option<Subscription>>,
    stats: FactoryStats,
}

impl TransactionFactory {
    /// Resolve the variant family and build the factory.
    ///
    /// Fails with [`TxError::UnsupportedCombination`] for configurations no
    /// family covers. The coin-toss source is seeded from the OS generator.
    pub fn new(config: TxConfig) -> Result<Self> {
        let family = config.variant_family()?;
        let cluster_ids = family
            .recovery()
            .then(|| Arc::new(ClusterIdGenerator::new()));

        tracing::debug!(
            family = %family,
            clustered = config.clustered,
            "Transaction factory configured"
        );

        Ok(Self {
            family,
            clustered: config.clustered,
            cluster_ids,
            coin_source: Mutex::new(ChaCha8Rng::seed_from_u64(rand::rng().next_u64())),
            subscription: Mutex::new(None),
            stats: FactoryStats::new(),
        })
    }

    /// Replace the coin-toss source with a deterministic one.
    pub fn with_coin_toss_seed(self, seed: u64) -> Self {
        self.with_coin_toss_rng(ChaCha8Rng::seed_from_u64(seed))
    }

    pub fn with_coin_toss_rng(self, rng: ChaCha8Rng) -> Self {
        *self.coin_source.lock() = rng;
        self
    }

    /// Wire the rank calculator to cluster view changes.
    ///
    /// Registers the listener with `notifier` and applies its current view,
    /// if any, before returning. Without recovery there is nothing to wire.
    pub fn start(&self, notifier: &Arc<dyn MembershipNotifier>) -> Result<()> {
        let Some(generator) = &self.cluster_ids else {
            tracing::debug!(family = %self.family, "Recovery disabled, no rank tracking");
            return Ok(());
        };

        let mut subscription = self.subscription.lock();
        if subscription.is_some() {
            tracing::warn!(family = %self.family, "Transaction factory already started");
            return Err(TxError::AlreadyStarted);
        }

        let calculator = generator.rank_calculator();
        let listener = notifier.register_listener(calculator.clone() as Arc<dyn ViewListener>);
        if let Some(view) = notifier.current_view() {
            calculator.on_view_change(&view);
        }
        *subscription = Some(Subscription {
            notifier: Arc::clone(notifier),
            listener,
        });

        tracing::info!(
            family = %self.family,
            clustered = self.clustered,
            rank = calculator.rank(),
            "Rank calculator registered for cluster view changes"
        );
        Ok(())
    }

    /// Unregister from view changes. Safe to call when not started.
    pub fn stop(&self) {
        if let Some(sub) = self.subscription.lock().take() {
            sub.notifier.unregister_listener(sub.listener);
            tracing::info!(family = %self.family, "Rank calculator unregistered");
        }
    }

    pub fn is_started(&self) -> bool {
        self.subscription.lock().is_some()
    }

    pub fn family(&self) -> VariantFamily {
        self.family
    }

    pub fn is_clustered(&self) -> bool {
        self.clustered
    }

    /// Generator behind internal ids; `None` unless recovery is enabled.
    pub fn cluster_id_generator(&self) -> Option<&Arc<ClusterIdGenerator>> {
        self.cluster_ids.as_ref()
    }

    pub fn stats(&self) -> &FactoryStats {
        &self.stats
    }

    /// Unfilled identity of this family's kind, for a received payload.
    ///
    /// Fill it with [`GlobalTransaction::materialize`].
    pub fn new_global_identity(&self) -> GlobalTransaction {
        self.stats.templates_created.fetch_add(1, Ordering::Relaxed);
        GlobalTransaction::template(self.family.identity_kind())
    }

    /// Mint a new identity originating at `origin`.
    ///
    /// Internal id and coin toss, when the family has them, are attached before
    /// the identity is returned.
    pub fn new_global_identity_from(&self, origin: Option<NodeId>, is_remote: bool) -> GlobalTransaction {
        let kind = self.family.identity_kind();
        let id = global_tx::next_identity_id();

        let internal_id = match &self.cluster_ids {
            Some(generator) if kind.is_recovery_aware() => {
                self.stats.internal_ids.fetch_add(1, Ordering::Relaxed);
                Some(generator.new_internal_id(self.clustered))
            },
            _ => None,
        };
        let coin_toss = kind.has_coin_toss().then(|| {
            self.stats.coin_tosses.fetch_add(1, Ordering::Relaxed);
            self.coin_source.lock().next_u64()
        });

        let gtx = GlobalTransaction::assemble(kind, origin, id, is_remote, coin_toss, internal_id);
        self.stats.identities_created.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(tx = %gtx, kind = %kind, "Created global transaction");
        gtx
    }

    pub fn new_local_transaction(
        &self,
        context: Arc<dyn TransactionContext>,
        identity: GlobalTransaction,
    ) -> LocalTransaction {
        self.note_foreign_kind(&identity);
        self.stats.local_created.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            tx = %identity,
            context = context.context_id(),
            kind = ?self.family.local_kind(),
            "Created local transaction"
        );
        LocalTransaction::new(self.family.local_kind(), context, identity)
    }

    /// Remote transaction carrying an initial write set.
    pub fn new_remote_transaction_with(
        &self,
        modifications: Vec<WriteCommand>,
        identity: GlobalTransaction,
    ) -> RemoteTransaction {
        self.note_foreign_kind(&identity);
        self.stats.remote_created.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            tx = %identity,
            modifications = modifications.len(),
            kind = ?self.family.remote_kind(),
            "Created remote transaction"
        );
        RemoteTransaction::new(self.family.remote_kind(), modifications, identity)
    }

    pub fn new_remote_transaction(&self, identity: GlobalTransaction) -> RemoteTransaction {
        self.new_remote_transaction_with(Vec::new(), identity)
    }

    fn note_foreign_kind(&self, identity: &GlobalTransaction) {
        if identity.kind() != self.family.identity_kind() {
            tracing::debug!(
                tx = %identity,
                kind = %identity.kind(),
                family = %self.family,
                "Identity kind differs from factory family"
            );
        }
    }
}

impl Drop for TransactionFactory {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for TransactionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionFactory")
            .field("family", &self.family)
            .field("clustered", &self.clustered)
            .field("started", &self.is_started())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}
