use thiserror::Error;

/// Failures surfaced by the ledger core.
///
/// Idempotent no-ops (a charge that already exists, a set-balance that is
/// already satisfied) are not errors and never produce one of these.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Input rejected before reaching the store.
    #[error("{0}")]
    Validation(String),

    #[error("Account code '{0}' already exists")]
    DuplicateCode(String),

    #[error("No such account: '{0}'")]
    AccountNotFound(String),

    /// A stored value could not be parsed back (amount, date, month).
    #[error("Invalid {column} in {table} table: '{value}'")]
    Corrupt {
        table: &'static str,
        column: &'static str,
        value: String,
    },

    /// A sum over stored amounts left the representable range.
    #[error("Total of {0} exceeds the supported amount range")]
    Overflow(&'static str),

    #[error("storage failure")]
    Store(#[from] rusqlite::Error),
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Errors the user can act on directly (bad input, duplicate code, unknown account).
    pub fn is_user_actionable(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::DuplicateCode(_) | Self::AccountNotFound(_)
        )
    }
}

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;
