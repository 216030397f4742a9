// SPDX-License-Identifier: MIT OR Apache-2.0
//! Transaction state held by the originating node.
//!
//! A [`LocalTransaction`] wraps the handle of the underlying transaction context
//! (XA or synchronization based) together with its identity. The recovery-aware
//! kind additionally tracks completion state for crash recovery:
//!
//! ```text
//!   Active ──set_prepared──▶ Prepared ──mark_committed──▶ Committed
//!     │                         │
//!     └──────mark_rolled_back───┴──────────────────────▶ RolledBack
//!
//!   completion_failed: orthogonal, settable from Prepared onward
//! ```
//!
//! Both `prepared` and `completion_failed` are monotonic. They live in one
//! atomic together with the phase so the recovery subsystem can read them
//! while the protocol layer owns the transaction.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, TxError},
    global_tx::GlobalTransaction,
    write_command::WriteCommand,
};

/// Handle to the underlying two-phase or synchronization transaction.
pub trait TransactionContext: Send + Sync + fmt::Debug {
    /// Identifier of the context within its transaction manager.
    fn context_id(&self) -> u64;
}

/// Concrete kind of a local transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocalTxKind {
    /// Enlisted as an XA resource (two-phase commit).
    Xa,
    /// Registered as a synchronization (single-phase commit).
    Synchronization,
    /// XA with recovery tracking.
    RecoveryAware,
}

impl LocalTxKind {
    pub fn uses_two_phase_commit(self) -> bool {
        !matches!(self, LocalTxKind::Synchronization)
    }
}

/// Completion phase of a recovery-aware local transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum LocalTxPhase {
    #[default]
    Active = 0,
    Prepared = 1,
    Committed = 2,
    RolledBack = 3,
}

impl LocalTxPhase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => LocalTxPhase::Prepared,
            2 => LocalTxPhase::Committed,
            3 => LocalTxPhase::RolledBack,
            _ => LocalTxPhase::Active,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, LocalTxPhase::Committed | LocalTxPhase::RolledBack)
    }
}

const PHASE_MASK: u8 = 0b0011;
const PREPARED: u8 = 0b0100;
const COMPLETION_FAILED: u8 = 0b1000;

/// Recovery bookkeeping of a recovery-aware local transaction.
///
/// Phase and both flags share one `AtomicU8`, so a reader never sees the
/// `Prepared` phase without the prepared flag:
///
/// ```text
///   7        4    3                   2          1   0
/// +----------+-------------------+----------+-------+
/// |  unused  | completion_failed | prepared | phase |
/// +----------+-------------------+----------+-------+
/// ```
#[derive(Default)]
pub struct RecoveryState {
    state: AtomicU8,
}

impl RecoveryState {
    pub fn new() -> Self {
        Self::default()
    }

    fn load(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    fn phase_of(bits: u8) -> LocalTxPhase {
        LocalTxPhase::from_u8(bits & PHASE_MASK)
    }

    pub fn phase(&self) -> LocalTxPhase {
        Self::phase_of(self.load())
    }

    pub fn is_prepared(&self) -> bool {
        self.load() & PREPARED != 0
    }

    /// True if a phase after local prepare failed (e.g. commit not confirmed).
    pub fn is_completion_failed(&self) -> bool {
        self.load() & COMPLETION_FAILED != 0
    }

    /// Prepared and not cleanly finished.
    pub fn is_in_doubt(&self) -> bool {
        let bits = self.load();
        bits & PREPARED != 0
            && (Self::phase_of(bits) == LocalTxPhase::Prepared || bits & COMPLETION_FAILED != 0)
    }

    /// Record the outcome of the local prepare.
    ///
    /// `true` moves `Active` to `Prepared` and is idempotent. `false` is a no-op
    /// unless the transaction is already prepared, in which case it is rejected.
    pub fn set_prepared(&self, prepared: bool) -> Result<()> {
        if !prepared {
            if self.is_prepared() {
                tracing::warn!("Attempt to clear prepared flag rejected");
                return Err(TxError::FlagReset { flag: "prepared" });
            }
            return Ok(());
        }

        match self.update(|bits| {
            (Self::phase_of(bits) == LocalTxPhase::Active)
                .then(|| (bits & !PHASE_MASK) | PREPARED | LocalTxPhase::Prepared as u8)
        }) {
            Ok(_) => Ok(()),
            Err(bits) if bits & PREPARED != 0 => Ok(()),
            Err(bits) => {
                let current = Self::phase_of(bits);
                tracing::warn!(phase = ?current, "Prepare recorded after completion");
                Err(TxError::InvalidTransition(format!("{current:?} -> Prepared")))
            },
        }
    }

    /// Record that a post-prepare step failed. Does not change the phase.
    pub fn set_completion_failed(&self, failed: bool) -> Result<()> {
        if !failed {
            if self.is_completion_failed() {
                tracing::warn!("Attempt to clear completion-failed flag rejected");
                return Err(TxError::FlagReset {
                    flag: "completion_failed",
                });
            }
            return Ok(());
        }
        self.update(|bits| (bits & PREPARED != 0).then_some(bits | COMPLETION_FAILED))
            .map(|_| ())
            .map_err(|bits| {
                tracing::warn!(phase = ?Self::phase_of(bits), "Completion failure before prepare rejected");
                TxError::InvalidTransition("completion failure recorded before prepare".to_string())
            })
    }

    pub fn mark_committed(&self) -> Result<()> {
        self.transition(&[LocalTxPhase::Prepared], LocalTxPhase::Committed)
    }

    pub fn mark_rolled_back(&self) -> Result<()> {
        self.transition(
            &[LocalTxPhase::Active, LocalTxPhase::Prepared],
            LocalTxPhase::RolledBack,
        )
    }

    /// Move the phase from any of `from` to `to`, keeping the flags.
    fn transition(&self, from: &[LocalTxPhase], to: LocalTxPhase) -> Result<()> {
        self.update(|bits| {
            from.contains(&Self::phase_of(bits))
                .then(|| (bits & !PHASE_MASK) | to as u8)
        })
        .map(|_| ())
        .map_err(|bits| {
            TxError::InvalidTransition(format!("{:?} -> {to:?}", Self::phase_of(bits)))
        })
    }

    /// CAS loop over the packed bits; on refusal returns the bits found.
    fn update(&self, f: impl FnMut(u8) -> Option<u8>) -> std::result::Result<u8, u8> {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, f)
    }
}

impl fmt::Debug for RecoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bits = self.load();
        f.debug_struct("RecoveryState")
            .field("phase", &Self::phase_of(bits))
            .field("prepared", &(bits & PREPARED != 0))
            .field("completion_failed", &(bits & COMPLETION_FAILED != 0))
            .finish()
    }
}

/// State owned by the node that started the transaction.
#[derive(Debug)]
pub struct LocalTransaction {
    kind: LocalTxKind,
    context: Arc<dyn TransactionContext>,
    identity: GlobalTransaction,
    modifications: Vec<WriteCommand>,
    recovery: Option<RecoveryState>,
}

impl LocalTransaction {
    pub(crate) fn new(
        kind: LocalTxKind,
        context: Arc<dyn TransactionContext>,
        identity: GlobalTransaction,
    ) -> Self {
        let recovery = (kind == LocalTxKind::RecoveryAware).then(RecoveryState::new);
        Self {
            kind,
            context,
            identity,
            modifications: Vec::new(),
            recovery,
        }
    }

    pub fn kind(&self) -> LocalTxKind {
        self.kind
    }

    pub fn identity(&self) -> &GlobalTransaction {
        &self.identity
    }

    pub fn context(&self) -> &Arc<dyn TransactionContext> {
        &self.context
    }

    pub fn uses_two_phase_commit(&self) -> bool {
        self.kind.uses_two_phase_commit()
    }

    pub fn add_modification(&mut self, command: WriteCommand) {
        self.modifications.push(command);
    }

    pub fn modifications(&self) -> &[WriteCommand] {
        &self.modifications
    }

    pub fn has_modifications(&self) -> bool {
        !self.modifications.is_empty()
    }

    /// Recovery flags; `None` unless the kind is recovery-aware.
    pub fn recovery(&self) -> Option<&RecoveryState> {
        self.recovery.as_ref()
    }

    /// Shorthand for [`RecoveryState::set_prepared`].
    pub fn set_prepared(&self, prepared: bool) -> Result<()> {
        self.require_recovery()?.set_prepared(prepared)
    }

    /// Shorthand for [`RecoveryState::set_completion_failed`].
    pub fn set_completion_failed(&self, failed: bool) -> Result<()> {
        self.require_recovery()?.set_completion_failed(failed)
    }

    fn require_recovery(&self) -> Result<&RecoveryState> {
        self.recovery.as_ref().ok_or_else(|| {
            TxError::RecoveryDisabled(format!(
                "{:?} transaction {} has no recovery state",
                self.kind, self.identity
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::global_tx::IdentityKind;

    #[derive(Debug)]
    struct TestContext(u64);

    impl TransactionContext for TestContext {
        fn context_id(&self) -> u64 {
            self.0
        }
    }

    fn local(kind: LocalTxKind) -> LocalTransaction {
        let identity =
            GlobalTransaction::new(IdentityKind::Recovery, Some("a".to_string()), 1, false);
        LocalTransaction::new(kind, Arc::new(TestContext(1)), identity)
    }

    #[test]
    fn test_prepared_idempotent() {
        let state = RecoveryState::new();
        assert!(!state.is_prepared());
        state.set_prepared(true).unwrap();
        state.set_prepared(true).unwrap();
        assert!(state.is_prepared());
        assert_eq!(state.phase(), LocalTxPhase::Prepared);
    }

    #[test]
    fn test_prepared_cannot_be_cleared() {
        let state = RecoveryState::new();
        state.set_prepared(false).unwrap();
        state.set_prepared(true).unwrap();
        assert!(matches!(
            state.set_prepared(false),
            Err(TxError::FlagReset { flag: "prepared" })
        ));
        assert!(state.is_prepared());
    }

    #[test]
    fn test_completion_failed_after_prepare() {
        let state = RecoveryState::new();
        state.set_prepared(true).unwrap();
        state.set_completion_failed(true).unwrap();
        assert!(state.is_prepared());
        assert!(state.is_completion_failed());
        assert_eq!(state.phase(), LocalTxPhase::Prepared);
        assert!(state.is_in_doubt());

        assert!(matches!(
            state.set_completion_failed(false),
            Err(TxError::FlagReset { .. })
        ));
        assert!(state.is_completion_failed());
    }

    #[test]
    fn test_concurrent_prepare_publishes_flag() {
        for _ in 0..2_000 {
            let state = RecoveryState::new();
            std::thread::scope(|scope| {
                for _ in 0..2 {
                    scope.spawn(|| {
                        state.set_prepared(true).unwrap();
                        // Whichever caller returns first, the flag is visible
                        assert!(state.is_prepared());
                        assert_eq!(state.phase(), LocalTxPhase::Prepared);
                        state.set_completion_failed(true).unwrap();
                    });
                }
            });
            assert!(state.is_in_doubt());
            assert!(state.is_completion_failed());
        }
    }

    #[test]
    fn test_flags_survive_phase_changes() {
        let state = RecoveryState::new();
        state.set_prepared(true).unwrap();
        state.set_completion_failed(true).unwrap();
        state.mark_rolled_back().unwrap();
        assert_eq!(state.phase(), LocalTxPhase::RolledBack);
        assert!(state.is_prepared());
        assert!(state.is_completion_failed());

        let debug = format!("{state:?}");
        assert!(debug.contains("RolledBack"));
        assert!(debug.contains("completion_failed: true"));
    }

    #[test]
    fn test_completion_failed_before_prepare_rejected() {
        let state = RecoveryState::new();
        assert!(matches!(
            state.set_completion_failed(true),
            Err(TxError::InvalidTransition(_))
        ));
        assert!(!state.is_completion_failed());
    }

    #[test]
    fn test_commit_requires_prepare() {
        let state = RecoveryState::new();
        assert!(state.mark_committed().is_err());
        state.set_prepared(true).unwrap();
        state.mark_committed().unwrap();
        assert_eq!(state.phase(), LocalTxPhase::Committed);
        assert!(!state.is_in_doubt());
        // Prepared flag survives completion
        state.set_prepared(true).unwrap();
        assert!(state.is_prepared());
    }

    #[test]
    fn test_commit_failure_after_commit_keeps_in_doubt() {
        let state = RecoveryState::new();
        state.set_prepared(true).unwrap();
        state.mark_committed().unwrap();
        state.set_completion_failed(true).unwrap();
        assert!(state.is_in_doubt());
    }

    #[test]
    fn test_rollback_paths() {
        let active = RecoveryState::new();
        active.mark_rolled_back().unwrap();
        assert_eq!(active.phase(), LocalTxPhase::RolledBack);
        assert!(matches!(
            active.set_prepared(true),
            Err(TxError::InvalidTransition(_))
        ));
        assert!(!active.is_prepared());

        let prepared = RecoveryState::new();
        prepared.set_prepared(true).unwrap();
        prepared.mark_rolled_back().unwrap();
        assert_eq!(prepared.phase(), LocalTxPhase::RolledBack);
        assert!(prepared.mark_rolled_back().is_err());
        assert!(prepared.mark_committed().is_err());
    }

    #[test]
    fn test_non_recovery_kinds_have_no_flags() {
        for kind in [LocalTxKind::Xa, LocalTxKind::Synchronization] {
            let tx = local(kind);
            assert!(tx.recovery().is_none());
            assert!(matches!(
                tx.set_prepared(true),
                Err(TxError::RecoveryDisabled(_))
            ));
        }
        assert!(local(LocalTxKind::RecoveryAware).recovery().is_some());
    }

    #[test]
    fn test_modifications_and_protocol() {
        let mut tx = local(LocalTxKind::Synchronization);
        assert!(!tx.uses_two_phase_commit());
        assert!(!tx.has_modifications());
        tx.add_modification(WriteCommand::put("k", b"v".to_vec()));
        tx.add_modification(WriteCommand::remove("k"));
        assert_eq!(tx.modifications().len(), 2);
        assert_eq!(tx.context().context_id(), 1);
        assert!(local(LocalTxKind::Xa).uses_two_phase_commit());
    }
}
