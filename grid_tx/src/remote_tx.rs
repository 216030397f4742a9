// SPDX-License-Identifier: MIT OR Apache-2.0
//! Transaction state held by participant nodes.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, TxError},
    global_tx::GlobalTransaction,
    membership::NodeId,
    write_command::WriteCommand,
};

/// Concrete kind of a remote transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemoteTxKind {
    Plain,
    RecoveryAware,
}

/// How a transaction finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxOutcome {
    Committed,
    RolledBack,
}

/// Recovery bookkeeping of a recovery-aware remote transaction.
#[derive(Debug, Default)]
pub struct RemoteRecoveryState {
    prepared: AtomicBool,
    orphan: AtomicBool,
}

impl RemoteRecoveryState {
    pub fn is_prepared(&self) -> bool {
        self.prepared.load(Ordering::Acquire)
    }

    /// Monotonic: clearing a set flag is rejected.
    pub fn set_prepared(&self, prepared: bool) -> Result<()> {
        if prepared {
            self.prepared.store(true, Ordering::Release);
            Ok(())
        } else if self.is_prepared() {
            tracing::warn!("Attempt to clear remote prepared flag rejected");
            Err(TxError::FlagReset { flag: "prepared" })
        } else {
            Ok(())
        }
    }

    /// True once the originator was seen missing from a view.
    pub fn is_orphan(&self) -> bool {
        self.orphan.load(Ordering::Acquire)
    }
}

/// State held by a participant for a transaction started elsewhere.
#[derive(Debug)]
pub struct RemoteTransaction {
    kind: RemoteTxKind,
    identity: GlobalTransaction,
    modifications: Vec<WriteCommand>,
    outcome: Option<TxOutcome>,
    recovery: Option<RemoteRecoveryState>,
}

impl RemoteTransaction {
    pub(crate) fn new(
        kind: RemoteTxKind,
        modifications: Vec<WriteCommand>,
        identity: GlobalTransaction,
    ) -> Self {
        let recovery = (kind == RemoteTxKind::RecoveryAware).then(RemoteRecoveryState::default);
        Self {
            kind,
            identity,
            modifications,
            outcome: None,
            recovery,
        }
    }

    pub fn kind(&self) -> RemoteTxKind {
        self.kind
    }

    pub fn identity(&self) -> &GlobalTransaction {
        &self.identity
    }

    pub fn modifications(&self) -> &[WriteCommand] {
        &self.modifications
    }

    pub fn outcome(&self) -> Option<TxOutcome> {
        self.outcome
    }

    pub fn is_completed(&self) -> bool {
        self.outcome.is_some()
    }

    /// Append a write. Rejected once the transaction completed.
    pub fn add_modification(&mut self, command: WriteCommand) -> Result<()> {
        self.ensure_active()?;
        self.modifications.push(command);
        Ok(())
    }

    /// Append a batch of writes, e.g. the write set carried by a prepare.
    pub fn extend_modifications(
        &mut self,
        commands: impl IntoIterator<Item = WriteCommand>,
    ) -> Result<()> {
        self.ensure_active()?;
        self.modifications.extend(commands);
        Ok(())
    }

    /// Move to a terminal state. The write set is read-only afterwards.
    pub fn complete(&mut self, outcome: TxOutcome) -> Result<()> {
        self.ensure_active()?;
        tracing::debug!(tx = %self.identity, outcome = ?outcome, "Remote transaction completed");
        self.outcome = Some(outcome);
        Ok(())
    }

    /// Recovery flags; `None` unless the kind is recovery-aware.
    pub fn recovery(&self) -> Option<&RemoteRecoveryState> {
        self.recovery.as_ref()
    }

    /// Flag the transaction as orphaned if its originator is not in `members`.
    ///
    /// Only recovery-aware transactions track this. Once orphaned it stays so.
    pub fn compute_orphan(&self, members: &[NodeId]) -> bool {
        let Some(recovery) = &self.recovery else {
            return false;
        };
        if let Some(origin) = self.identity.origin() {
            let departed = !members.iter().any(|m| m == origin);
            if departed && !recovery.orphan.swap(true, Ordering::AcqRel) {
                tracing::info!(
                    tx = %self.identity,
                    prepared = recovery.is_prepared(),
                    "Originator left the cluster, transaction orphaned"
                );
            }
        }
        recovery.is_orphan()
    }

    fn ensure_active(&self) -> Result<()> {
        match self.outcome {
            None => Ok(()),
            Some(outcome) => Err(TxError::TransactionCompleted(format!(
                "{} already {:?}",
                self.identity, outcome
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::global_tx::IdentityKind;

    fn remote(kind: RemoteTxKind) -> RemoteTransaction {
        let identity =
            GlobalTransaction::new(IdentityKind::Recovery, Some("origin".to_string()), 3, true);
        RemoteTransaction::new(kind, Vec::new(), identity)
    }

    #[test]
    fn test_append_until_completed() {
        let mut tx = remote(RemoteTxKind::Plain);
        tx.add_modification(WriteCommand::put("a", b"1".to_vec()))
            .unwrap();
        tx.extend_modifications(vec![WriteCommand::remove("b"), WriteCommand::Clear])
            .unwrap();
        assert_eq!(tx.modifications().len(), 3);
        assert_eq!(tx.modifications()[0].key(), Some("a"));

        tx.complete(TxOutcome::Committed).unwrap();
        assert!(tx.is_completed());
        assert!(matches!(
            tx.add_modification(WriteCommand::remove("c")),
            Err(TxError::TransactionCompleted(_))
        ));
        assert!(tx.complete(TxOutcome::RolledBack).is_err());
        assert_eq!(tx.outcome(), Some(TxOutcome::Committed));
        assert_eq!(tx.modifications().len(), 3);
    }

    #[test]
    fn test_plain_has_no_recovery_state() {
        let tx = remote(RemoteTxKind::Plain);
        assert!(tx.recovery().is_none());
        assert!(!tx.compute_orphan(&[]));
    }

    #[test]
    fn test_remote_prepared_monotonic() {
        let tx = remote(RemoteTxKind::RecoveryAware);
        let recovery = tx.recovery().unwrap();
        recovery.set_prepared(false).unwrap();
        recovery.set_prepared(true).unwrap();
        assert!(recovery.set_prepared(false).is_err());
        assert!(recovery.is_prepared());
    }

    #[test]
    fn test_orphan_detection() {
        let tx = remote(RemoteTxKind::RecoveryAware);
        let members = vec!["origin".to_string(), "other".to_string()];
        assert!(!tx.compute_orphan(&members));

        assert!(tx.compute_orphan(&["other".to_string()]));
        // Originator rejoining does not clear the flag
        assert!(tx.compute_orphan(&members));
    }
}
