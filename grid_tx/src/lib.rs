// SPDX-License-Identifier: MIT OR Apache-2.0
//! grid_tx - transaction identity and state core for a clustered data grid
//!
//! Builds the identities and per-node state of distributed transactions. Three
//! capabilities are chosen once at startup and fixed for the node's lifetime:
//! - Deadlock detection: identities carry a random coin toss used to pick a victim
//! - Recovery: identities carry a cluster-wide internal id, local state tracks
//!   prepared/completion-failed flags
//! - Two-phase (XA) or single-phase (synchronization) commit
//!
//! # Architecture
//!
//! ```text
//! TransactionFactory (VariantFamily fixed at construction)
//!   ├── GlobalTransaction (identity, deadlock and recovery ordering)
//!   ├── LocalTransaction (originator state, RecoveryState)
//!   ├── RemoteTransaction (participant state, write set)
//!   └── ClusterIdGenerator
//!         └── RankCalculator ◀── MembershipNotifier (view changes)
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use grid_tx::{TransactionContext, TransactionFactory, TxConfig, WriteCommand};
//!
//! #[derive(Debug)]
//! struct Ctx;
//! impl TransactionContext for Ctx {
//!     fn context_id(&self) -> u64 { 1 }
//! }
//!
//! let factory = TransactionFactory::new(TxConfig::new().with_deadlock_detection(true))?;
//!
//! // Originator side
//! let gtx = factory.new_global_identity_from(Some("node-a".to_string()), false);
//! let mut local = factory.new_local_transaction(Arc::new(Ctx), gtx.clone());
//! local.add_modification(WriteCommand::put("k", b"v".to_vec()));
//!
//! // Participant side: rebuild the identity from its wire payload
//! let bytes = gtx.payload().encode()?;
//! let received = factory
//!     .new_global_identity()
//!     .materialize(grid_tx::IdentityPayload::decode(&bytes)?)?;
//! assert_eq!(received, gtx);
//! let remote = factory.new_remote_transaction_with(local.modifications().to_vec(), received);
//! assert_eq!(remote.modifications().len(), 1);
//! # Ok::<(), grid_tx::TxError>(())
//! ```

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

pub mod cluster_id;
pub mod config;
pub mod error;
pub mod factory;
pub mod global_tx;
pub mod local_tx;
pub mod membership;
pub mod recovery;
pub mod remote_tx;
pub mod write_command;

pub use cluster_id::{ClusterIdGenerator, InternalId, RankCalculator, RankSnapshot, MAX_VIEW_ID};
pub use config::TxConfig;
pub use error::{Result, TxError};
pub use factory::{FactoryStats, FactoryStatsSnapshot, TransactionFactory, VariantFamily};
pub use global_tx::{GlobalTransaction, IdentityKind, IdentityPayload};
pub use local_tx::{LocalTransaction, LocalTxKind, LocalTxPhase, RecoveryState, TransactionContext};
pub use membership::{
    ListenerId, LocalMembership, MembershipNotifier, NodeId, ViewChange, ViewListener,
};
pub use recovery::{collect_in_doubt, InDoubtTransaction};
pub use remote_tx::{RemoteRecoveryState, RemoteTransaction, RemoteTxKind, TxOutcome};
pub use write_command::WriteCommand;
