// SPDX-License-Identifier: MIT OR Apache-2.0
//! Write operations recorded under a transaction.
//!
//! Only the shape the transaction core needs: the affected key and whether the
//! operation is conditional. Executing the write is the cache engine's job.

use serde::{Deserialize, Serialize};

/// A single write applied under a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteCommand {
    /// Unconditional store.
    Put {
        key: String,
        value: Vec<u8>,
        ignore_return_value: bool,
    },
    /// Unconditional removal.
    Remove {
        key: String,
        ignore_return_value: bool,
    },
    /// Replace only if the current value equals `expected`.
    Replace {
        key: String,
        expected: Vec<u8>,
        value: Vec<u8>,
        ignore_return_value: bool,
    },
    /// Remove only if the current value equals `expected`.
    RemoveIfEquals {
        key: String,
        expected: Vec<u8>,
        ignore_return_value: bool,
    },
    /// Remove every entry.
    Clear,
}

impl WriteCommand {
    pub fn put(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        WriteCommand::Put {
            key: key.into(),
            value: value.into(),
            ignore_return_value: false,
        }
    }

    pub fn remove(key: impl Into<String>) -> Self {
        WriteCommand::Remove {
            key: key.into(),
            ignore_return_value: false,
        }
    }

    pub fn replace(
        key: impl Into<String>,
        expected: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        WriteCommand::Replace {
            key: key.into(),
            expected: expected.into(),
            value: value.into(),
            ignore_return_value: false,
        }
    }

    pub fn remove_if_equals(key: impl Into<String>, expected: impl Into<Vec<u8>>) -> Self {
        WriteCommand::RemoveIfEquals {
            key: key.into(),
            expected: expected.into(),
            ignore_return_value: false,
        }
    }

    /// Mark the command as not needing the previous value.
    ///
    /// Conditional commands still report whether they applied.
    pub fn ignoring_return_value(mut self) -> Self {
        match &mut self {
            WriteCommand::Put {
                ignore_return_value,
                ..
            }
            | WriteCommand::Remove {
                ignore_return_value,
                ..
            }
            | WriteCommand::Replace {
                ignore_return_value,
                ..
            }
            | WriteCommand::RemoveIfEquals {
                ignore_return_value,
                ..
            } => *ignore_return_value = true,
            WriteCommand::Clear => {},
        }
        self
    }

    /// Key written by this command; `None` for [`WriteCommand::Clear`].
    pub fn key(&self) -> Option<&str> {
        match self {
            WriteCommand::Put { key, .. }
            | WriteCommand::Remove { key, .. }
            | WriteCommand::Replace { key, .. }
            | WriteCommand::RemoveIfEquals { key, .. } => Some(key),
            WriteCommand::Clear => None,
        }
    }

    pub fn is_conditional(&self) -> bool {
        matches!(
            self,
            WriteCommand::Replace { .. } | WriteCommand::RemoveIfEquals { .. }
        )
    }

    pub fn ignores_return_value(&self) -> bool {
        match self {
            WriteCommand::Put {
                ignore_return_value,
                ..
            }
            | WriteCommand::Remove {
                ignore_return_value,
                ..
            }
            | WriteCommand::Replace {
                ignore_return_value,
                ..
            }
            | WriteCommand::RemoveIfEquals {
                ignore_return_value,
                ..
            } => *ignore_return_value,
            WriteCommand::Clear => false,
        }
    }
}
