//! Engine errors
//!
//! Every rejection carries a stable code so callers can tell bad input from
//! missing authority from a state conflict without parsing messages.

use crate::types::{Address, EpochId, MarketId};
use thiserror::Error;

/// Broad class of a rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller lacks the required role
    Unauthorized,
    /// Market is disabled
    Inactive,
    /// Malformed arguments
    InvalidInput,
    /// Valid arguments that clash with recorded state
    Conflict,
    /// Referenced entity does not exist
    NotFound,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarketError {
    #[error("caller {0} is not a validator")]
    OnlyValidator(Address),

    #[error("market {0} is not active")]
    MarketNotActive(MarketId),

    #[error("caller {0} is not the market owner")]
    OnlyOwner(Address),

    #[error("caller {0} is not a sequencer")]
    OnlySequencer(Address),

    #[error("caller {0} is not the epoch authority")]
    OnlyEpochAuthority(Address),

    #[error("caller {0} is not the registry owner")]
    OnlyRegistryOwner(Address),

    #[error("caller {0} is not an admin")]
    OnlyAdmin(Address),

    #[error("zero address not allowed")]
    ZeroAddress,

    #[error("unknown market {0}")]
    UnknownMarket(MarketId),

    #[error("unknown market address {0}")]
    UnknownMarketAddress(Address),

    #[error("unknown role tag {0}")]
    UnknownRole(u8),

    #[error("input lengths mismatch: {left} vs {right}")]
    ArrayLengthMismatch { left: usize, right: usize },

    #[error("epoch end {end} is before begin {begin}")]
    EpochRangeInvalid { begin: u64, end: u64 },

    #[error("epoch size {got} does not match configured {expected}")]
    EpochSizeMismatch { expected: u64, got: u64 },

    #[error("epoch begin {begin} does not follow previous end {previous_end}")]
    EpochNotContinuous { begin: u64, previous_end: u64 },

    #[error("skipped epoch begin {begin} must be after previous end {previous_end}")]
    EpochNotAhead { begin: u64, previous_end: u64 },

    #[error("batch is empty")]
    EmptyBatch,

    #[error("snapshot for project {project} in epoch {epoch} already submitted")]
    DuplicateSnapshot { project: String, epoch: EpochId },

    #[error("batch {0} already submitted")]
    DuplicateBatch(String),

    #[error("unknown epoch {0}")]
    UnknownEpoch(EpochId),

    #[error("batch {batch} does not belong to epoch {epoch}")]
    BatchEpochMismatch { batch: String, epoch: EpochId },

    #[error("validator {validator} already attested batch {batch}")]
    AlreadyAttested { batch: String, validator: Address },

    #[error("batch {0} is already finalized")]
    BatchAlreadyFinalized(String),

    #[error("attestation window for batch {0} is still open or consensus was reached")]
    ConsensusNotStalled(String),

    #[error("batch submissions already completed for epoch {0}")]
    AlreadyCompleted(EpochId),

    #[error("invalid setting: {0}")]
    InvalidSetting(&'static str),

    #[error("day {day} would reward {requested} slots but only {eligible} are eligible")]
    RewardCapExceeded { day: u64, requested: u64, eligible: u64 },

    #[error("vault holds {available}, claim needs {required}")]
    InsufficientFunds { available: u128, required: u128 },

    #[error("caller {caller} cannot claim for {claimant}")]
    NotClaimant { caller: Address, claimant: Address },

    #[error("arithmetic overflow")]
    Overflow,
}

impl MarketError {
    /// Stable short code for the rejection
    pub fn code(&self) -> &'static str {
        use MarketError::*;
        match self {
            OnlyValidator(_) => "E01",
            MarketNotActive(_) => "E02",
            OnlyOwner(_) => "E03",
            OnlySequencer(_) => "E04",
            OnlyEpochAuthority(_) => "E05",
            OnlyRegistryOwner(_) => "E06",
            OnlyAdmin(_) => "E07",
            ZeroAddress => "E08",
            UnknownMarket(_) => "E09",
            UnknownMarketAddress(_) => "E10",
            UnknownRole(_) => "E11",
            ArrayLengthMismatch { .. } => "E12",
            EpochRangeInvalid { .. } => "E13",
            EpochSizeMismatch { .. } => "E14",
            EpochNotContinuous { .. } => "E15",
            EpochNotAhead { .. } => "E16",
            EmptyBatch => "E17",
            DuplicateSnapshot { .. } => "E18",
            DuplicateBatch(_) => "E19",
            UnknownEpoch(_) => "E20",
            BatchEpochMismatch { .. } => "E21",
            AlreadyAttested { .. } => "E22",
            BatchAlreadyFinalized(_) => "E23",
            ConsensusNotStalled(_) => "E24",
            AlreadyCompleted(_) => "E25",
            InvalidSetting(_) => "E26",
            RewardCapExceeded { .. } => "E27",
            InsufficientFunds { .. } => "E28",
            NotClaimant { .. } => "E29",
            Overflow => "E30",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        use MarketError::*;
        match self {
            OnlyValidator(_) | OnlyOwner(_) | OnlySequencer(_) | OnlyEpochAuthority(_)
            | OnlyRegistryOwner(_) | OnlyAdmin(_) | NotClaimant { .. } => ErrorKind::Unauthorized,
            MarketNotActive(_) => ErrorKind::Inactive,
            ZeroAddress | UnknownRole(_) | ArrayLengthMismatch { .. } | EpochRangeInvalid { .. }
            | EpochSizeMismatch { .. } | EmptyBatch | InvalidSetting(_) | Overflow => {
                ErrorKind::InvalidInput
            }
            EpochNotContinuous { .. } | EpochNotAhead { .. } | DuplicateSnapshot { .. }
            | DuplicateBatch(_) | BatchEpochMismatch { .. } | AlreadyAttested { .. }
            | BatchAlreadyFinalized(_) | ConsensusNotStalled(_) | AlreadyCompleted(_)
            | RewardCapExceeded { .. } | InsufficientFunds { .. } => ErrorKind::Conflict,
            UnknownMarket(_) | UnknownMarketAddress(_) | UnknownEpoch(_) => ErrorKind::NotFound,
        }
    }
}

/// Length check shared by every bulk operation
pub fn ensure_same_len(left: usize, right: usize) -> Result<(), MarketError> {
    if left != right {
        return Err(MarketError::ArrayLengthMismatch { left, right });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_kinds() {
        let dup = MarketError::DuplicateSnapshot { project: "p1".into(), epoch: 1 };
        assert_eq!(dup.code(), "E18");
        assert_eq!(dup.kind(), ErrorKind::Conflict);

        let auth = MarketError::OnlySequencer(Address::ZERO);
        assert_eq!(auth.code(), "E04");
        assert_eq!(auth.kind(), ErrorKind::Unauthorized);

        assert_eq!(MarketError::EmptyBatch.kind(), ErrorKind::InvalidInput);
        assert_eq!(MarketError::UnknownEpoch(3).kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_codes_are_contiguous() {
        let a = Address::ZERO;
        let all = [
            MarketError::OnlyValidator(a),
            MarketError::MarketNotActive(1),
            MarketError::OnlyOwner(a),
            MarketError::OnlySequencer(a),
            MarketError::OnlyEpochAuthority(a),
            MarketError::OnlyRegistryOwner(a),
            MarketError::OnlyAdmin(a),
            MarketError::ZeroAddress,
            MarketError::UnknownMarket(1),
            MarketError::UnknownMarketAddress(a),
            MarketError::UnknownRole(9),
            MarketError::ArrayLengthMismatch { left: 1, right: 2 },
            MarketError::EpochRangeInvalid { begin: 2, end: 1 },
            MarketError::EpochSizeMismatch { expected: 10, got: 9 },
            MarketError::EpochNotContinuous { begin: 5, previous_end: 10 },
            MarketError::EpochNotAhead { begin: 5, previous_end: 10 },
            MarketError::EmptyBatch,
            MarketError::DuplicateSnapshot { project: "p".into(), epoch: 1 },
            MarketError::DuplicateBatch("b".into()),
            MarketError::UnknownEpoch(1),
            MarketError::BatchEpochMismatch { batch: "b".into(), epoch: 1 },
            MarketError::AlreadyAttested { batch: "b".into(), validator: a },
            MarketError::BatchAlreadyFinalized("b".into()),
            MarketError::ConsensusNotStalled("b".into()),
            MarketError::AlreadyCompleted(1),
            MarketError::InvalidSetting("x"),
            MarketError::RewardCapExceeded { day: 1, requested: 2, eligible: 1 },
            MarketError::InsufficientFunds { available: 0, required: 1 },
            MarketError::NotClaimant { caller: a, claimant: a },
            MarketError::Overflow,
        ];
        for (i, err) in all.iter().enumerate() {
            assert_eq!(err.code(), format!("E{:02}", i + 1));
        }
    }

    #[test]
    fn test_ensure_same_len() {
        assert!(ensure_same_len(2, 2).is_ok());
        assert_eq!(
            ensure_same_len(1, 2),
            Err(MarketError::ArrayLengthMismatch { left: 1, right: 2 })
        );
    }
}
