//! Transactions around event handling and the policy deciding when to roll
//! them back.

use crate::handler::AsAny;

// ---------------------------------------------------------------------------
// TransactionManager
// ---------------------------------------------------------------------------

/// An open transaction. Consumed by either `commit` or `rollback`.
pub trait Transaction: Send {
    /// # Errors
    ///
    /// The commit failed; the work must be considered lost.
    fn commit(self: Box<Self>) -> anyhow::Result<()>;

    fn rollback(self: Box<Self>);
}

pub trait TransactionManager: AsAny {
    fn start_transaction(&self) -> Box<dyn Transaction>;
}

/// Transaction manager that does nothing. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTransactionManager;

struct NoTransaction;

impl Transaction for NoTransaction {
    fn commit(self: Box<Self>) -> anyhow::Result<()> {
        Ok(())
    }

    fn rollback(self: Box<Self>) {}
}

impl TransactionManager for NoTransactionManager {
    fn start_transaction(&self) -> Box<dyn Transaction> {
        Box::new(NoTransaction)
    }
}

// ---------------------------------------------------------------------------
// RollbackConfiguration
// ---------------------------------------------------------------------------

/// Decides whether a failure rolls back the surrounding transaction.
pub trait RollbackConfiguration: AsAny {
    fn roll_back_on(&self, error: &anyhow::Error) -> bool;
}

/// Built-in rollback configurations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RollbackConfigurationType {
    /// Roll back on every failure. The default.
    #[default]
    AnyError,
    /// Never roll back; failed work is committed.
    Never,
}

impl RollbackConfiguration for RollbackConfigurationType {
    fn roll_back_on(&self, _error: &anyhow::Error) -> bool {
        match self {
            Self::AnyError => true,
            Self::Never => false,
        }
    }
}
