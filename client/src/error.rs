use crate::gateway::ContractKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] async_std::io::Error),

    #[error("No wallet extension detected. Install one to continue.")]
    WalletUnavailable,
    #[error("Wallet connection request was rejected.")]
    UserRejected,
    #[error("Connect a wallet to continue.")]
    NotConnected,
    #[error("Please switch to chain ID {0}.")]
    WrongNetwork(String),
    #[error("{0} contract not initialized.")]
    NotInitialized(ContractKind),
    #[error("Invalid address format `{0}`. Must start with 0x followed by 40 hex digits.")]
    InvalidAddressFormat(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Contract call failed: {0}")]
    ContractCallFailed(String),
    #[error("Results already published.")]
    AlreadyPublished,
    #[error("Caller is not an admin.")]
    NotAdmin,
    #[error("Already voted.")]
    AlreadyVoted,
    #[error("Election is not active.")]
    ElectionNotActive,
    #[error("Election {0} has not ended yet.")]
    ElectionNotEnded(u64),
    #[error("Invalid election: {0}")]
    InvalidElection(String),
    #[error("Failed to find config dir.")]
    ConfigDirNotFound,
}

impl Error {
    /// Maps a contract revert reason onto the matching error.
    pub fn from_revert<S: Into<String>>(reason: S) -> Self {
        let reason = reason.into();
        let lower = reason.to_lowercase();
        if lower.contains("not an admin") {
            Error::NotAdmin
        } else if lower.contains("already voted") {
            Error::AlreadyVoted
        } else if lower.contains("not active") {
            Error::ElectionNotActive
        } else if lower.contains("already published") {
            Error::AlreadyPublished
        } else {
            Error::ContractCallFailed(reason)
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revert_reasons_map_to_typed_errors() {
        assert!(matches!(
            Error::from_revert("Auth: caller is not an admin"),
            Error::NotAdmin
        ));
        assert!(matches!(
            Error::from_revert("Caller is not an admin"),
            Error::NotAdmin
        ));
        assert!(matches!(
            Error::from_revert("Already voted"),
            Error::AlreadyVoted
        ));
        assert!(matches!(
            Error::from_revert("Election is not active"),
            Error::ElectionNotActive
        ));
        assert!(matches!(
            Error::from_revert("Results already published"),
            Error::AlreadyPublished
        ));
        match Error::from_revert("Start time must be less than end time") {
            Error::ContractCallFailed(reason) => {
                assert_eq!(reason, "Start time must be less than end time")
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
