use crate::{
    address::Address,
    error::{
        Error,
        Result,
    },
};
use core::time::Duration;

/// Hardhat's local network.
pub const DEFAULT_CHAIN_ID: &str = "0x7a69";
pub const DEFAULT_REVALIDATE_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_REVOCATION_GRACE: Duration = Duration::from_secs(3);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub const CHAIN_ID_VAR: &str = "BALLOT_CHAIN_ID";
pub const ACCESS_CONTROL_VAR: &str = "BALLOT_ACCESS_CONTROL_ADDRESS";
pub const ELECTION_MANAGER_VAR: &str = "BALLOT_ELECTION_MANAGER_ADDRESS";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    pub desired_chain_id: String,
    pub access_control: Option<String>,
    pub election_manager: Option<String>,
    /// Period of the background admin check.
    pub revalidate_interval: Duration,
    /// Delay between a detected revocation and the forced logout.
    pub revocation_grace: Duration,
    /// Period of vote count and election list polling.
    pub poll_interval: Duration,
}

impl Default for Config {
    /// Values baked in at build time.
    fn default() -> Self {
        Self {
            desired_chain_id: option_env!("BALLOT_CHAIN_ID")
                .unwrap_or(DEFAULT_CHAIN_ID)
                .to_string(),
            access_control: option_env!("BALLOT_ACCESS_CONTROL_ADDRESS")
                .map(str::to_string),
            election_manager: option_env!("BALLOT_ELECTION_MANAGER_ADDRESS")
                .map(str::to_string),
            revalidate_interval: DEFAULT_REVALIDATE_INTERVAL,
            revocation_grace: DEFAULT_REVOCATION_GRACE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl Config {
    pub fn new(access_control: &str, election_manager: &str) -> Self {
        Self {
            access_control: Some(access_control.to_string()),
            election_manager: Some(election_manager.to_string()),
            ..Self::default()
        }
    }

    /// Build time values overridden by the process environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(chain_id) = std::env::var(CHAIN_ID_VAR) {
            config.desired_chain_id = chain_id;
        }
        if let Ok(address) = std::env::var(ACCESS_CONTROL_VAR) {
            config.access_control = Some(address);
        }
        if let Ok(address) = std::env::var(ELECTION_MANAGER_VAR) {
            config.election_manager = Some(address);
        }
        config
    }

    pub fn with_chain_id(mut self, chain_id: &str) -> Self {
        self.desired_chain_id = chain_id.to_string();
        self
    }

    pub fn with_timings(
        mut self,
        revalidate_interval: Duration,
        revocation_grace: Duration,
        poll_interval: Duration,
    ) -> Self {
        self.revalidate_interval = revalidate_interval;
        self.revocation_grace = revocation_grace;
        self.poll_interval = poll_interval;
        self
    }

    pub fn is_desired_chain(&self, chain_id: &str) -> bool {
        chain_id.eq_ignore_ascii_case(&self.desired_chain_id)
    }

    pub fn access_control_address(&self) -> Result<Address> {
        contract_address(ACCESS_CONTROL_VAR, self.access_control.as_deref())
    }

    pub fn election_manager_address(&self) -> Result<Address> {
        contract_address(
            ELECTION_MANAGER_VAR,
            self.election_manager.as_deref(),
        )
    }
}

fn contract_address(name: &str, raw: Option<&str>) -> Result<Address> {
    let raw = raw
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .ok_or_else(|| Error::Configuration(format!("{} is not set", name)))?;
    let address: Address = raw.parse()?;
    if address.is_zero() {
        return Err(Error::Configuration(format!(
            "{} is still the placeholder address",
            name
        )))
    }
    Ok(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    const AUTH: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";
    const MANAGER: &str = "0xe7f1725e7734ce288f8367e1bb143e90bb3f0512";

    #[test]
    fn chain_comparison_ignores_case() {
        let config = Config::new(AUTH, MANAGER).with_chain_id("0x7A69");
        assert!(config.is_desired_chain("0x7a69"));
        assert!(config.is_desired_chain("0x7A69"));
        assert!(!config.is_desired_chain("0x1"));
    }

    #[test]
    fn validates_contract_addresses() {
        let config = Config::new(AUTH, MANAGER);
        assert_eq!(
            config.access_control_address().unwrap().as_str(),
            AUTH.to_lowercase()
        );
        assert!(config.election_manager_address().is_ok());

        let missing = Config {
            access_control: None,
            election_manager: Some("   ".into()),
            ..Config::new(AUTH, MANAGER)
        };
        assert!(matches!(
            missing.access_control_address(),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            missing.election_manager_address(),
            Err(Error::Configuration(_))
        ));

        let placeholder = Config::new(
            "0x0000000000000000000000000000000000000000",
            "0xdeadbeef",
        );
        assert!(matches!(
            placeholder.access_control_address(),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            placeholder.election_manager_address(),
            Err(Error::InvalidAddressFormat(_))
        ));
    }

    #[test]
    fn environment_overrides_build_values() {
        std::env::set_var(CHAIN_ID_VAR, "0x1");
        std::env::set_var(ACCESS_CONTROL_VAR, AUTH);
        std::env::set_var(ELECTION_MANAGER_VAR, MANAGER);
        let config = Config::from_env();
        std::env::remove_var(CHAIN_ID_VAR);
        std::env::remove_var(ACCESS_CONTROL_VAR);
        std::env::remove_var(ELECTION_MANAGER_VAR);

        assert!(config.is_desired_chain("0x1"));
        assert_eq!(config.access_control.as_deref(), Some(AUTH));
        assert_eq!(
            config.election_manager_address().unwrap().as_str(),
            MANAGER
        );
        assert_eq!(config.revalidate_interval, DEFAULT_REVALIDATE_INTERVAL);
        assert_eq!(config.poll_interval, DEFAULT_POLL_INTERVAL);
    }
}
