use derive_more::Display;

/// Lifecycle status of a batch as recorded by the remote catalog.
///
/// Only [`Committed`](Self::Committed) batches are downloaded, and only they
/// survive reconciliation. Codes this crate doesn't know about are preserved
/// as [`Other`](Self::Other) rather than rejected: they are simply not
/// committed.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchStatus {
    #[display("submitted")]
    Submitted,
    #[display("processing")]
    Processing,
    #[display("committed")]
    Committed,
    #[display("failed")]
    Failed,
    #[display("status {_0}")]
    Other(i64),
}

impl BatchStatus {
    pub const COMMITTED: i64 = 3;

    pub fn code(self) -> i64 {
        match self {
            Self::Submitted => 1,
            Self::Processing => 2,
            Self::Committed => Self::COMMITTED,
            Self::Failed => 4,
            Self::Other(code) => code,
        }
    }

    pub fn is_committed(self) -> bool {
        self.code() == Self::COMMITTED
    }
}

impl From<i64> for BatchStatus {
    fn from(code: i64) -> Self {
        match code {
            1 => Self::Submitted,
            2 => Self::Processing,
            Self::COMMITTED => Self::Committed,
            4 => Self::Failed,
            other => Self::Other(other),
        }
    }
}
