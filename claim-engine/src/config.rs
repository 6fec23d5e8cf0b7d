//! Configuration for the faucet

use crate::error::{ClaimError, Result};
use claim_ledger::{ChannelId, LockSettings};
use claim_policy::{PolicyDefaults, MAX_COOLDOWN_HOURS};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use transfer_executor::{Address, AssetKind, ChannelSpec, ConfirmationSettings};

/// Slack added to the longest claim when sizing the stale-lock window
pub const LOCK_HOLD_MARGIN: Duration = Duration::from_secs(30);

/// RPC calls a claim may make while holding the lock, besides receipt
/// polls that start before the confirmation deadline: two balance reads,
/// the broadcast and one last receipt poll.
const RPC_CALLS_PER_HOLD: u32 = 4;

/// Faucet configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding ledger, lock and policy files
    pub data_dir: PathBuf,

    /// Ledger file name
    pub ledger_file: String,

    /// Per-community policy file name
    pub policy_file: String,

    /// Global policy file name
    pub global_policy_file: String,

    /// Ledger lock
    pub lock: LockConfig,

    /// Transfer confirmation
    pub confirmation: ConfirmationConfig,

    /// Policy fallbacks
    pub policy_defaults: DefaultsConfig,

    /// Claimants must hold the faucet role
    pub require_role: bool,

    /// Payout channels
    pub channels: Vec<ChannelConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            ledger_file: "giveaway_state.json".to_string(),
            policy_file: "guild_config.json".to_string(),
            global_policy_file: "global_config.json".to_string(),
            lock: LockConfig::default(),
            confirmation: ConfirmationConfig::default(),
            policy_defaults: DefaultsConfig::default(),
            require_role: true,
            channels: vec![ChannelConfig::base_usdt(), ChannelConfig::sepolia_eth()],
        }
    }
}

/// Ledger lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Give up acquiring after (milliseconds)
    pub timeout_ms: u64,

    /// Delay between attempts (milliseconds)
    pub retry_interval_ms: u64,

    /// Reclaim a marker older than this (seconds); 0 never reclaims.
    /// Must exceed the longest possible claim, see [`Config::max_lock_hold`].
    pub stale_after_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            retry_interval_ms: 100,
            stale_after_secs: 300,
        }
    }
}

/// Confirmation wait configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    /// Stop waiting for a receipt after (seconds)
    pub timeout_secs: u64,

    /// Delay between receipt polls (milliseconds)
    pub poll_interval_ms: u64,

    /// Per-request RPC timeout (seconds)
    pub rpc_timeout_secs: u64,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            poll_interval_ms: 2_000,
            rpc_timeout_secs: 30,
        }
    }
}

/// Policy fallbacks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    /// Cooldown when a community has none
    pub cooldown_hours: u64,

    /// Cap for channels without `default_cap`
    pub cap: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            cooldown_hours: 24,
            cap: 10,
        }
    }
}

/// One payout channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Channel identifier
    pub id: String,

    /// Name shown to participants
    pub display_name: String,

    /// Asset symbol
    pub symbol: String,

    /// Native coin or token
    pub asset: AssetKind,

    /// Payout per claim in whole units
    pub payout: Decimal,

    /// Asset decimals
    pub decimals: u32,

    /// JSON-RPC endpoint (must be able to sign for `sender`)
    pub rpc_url: String,

    /// Distributing account; the channel is disabled without one
    #[serde(default)]
    pub sender: Option<Address>,

    /// Transaction link prefix
    pub explorer_tx_url: String,

    /// Cap when a community has not set one
    #[serde(default)]
    pub default_cap: Option<u64>,
}

impl ChannelConfig {
    /// USDT on Base mainnet
    pub fn base_usdt() -> Self {
        Self {
            id: "base-usdt".to_string(),
            display_name: "USDT (Base)".to_string(),
            symbol: "USDT".to_string(),
            asset: AssetKind::Token {
                contract: Address::parse("0xfde4C96c8593536E31F229EA8f37b2ADa2699bb2")
                    .expect("valid token address"),
            },
            payout: Decimal::from(10),
            decimals: 6,
            rpc_url: "https://mainnet.base.org".to_string(),
            sender: None,
            explorer_tx_url: "https://basescan.org/tx/".to_string(),
            default_cap: None,
        }
    }

    /// ETH on the Sepolia testnet
    pub fn sepolia_eth() -> Self {
        Self {
            id: "sepolia-eth".to_string(),
            display_name: "Sepolia ETH".to_string(),
            symbol: "ETH".to_string(),
            asset: AssetKind::Native,
            payout: Decimal::new(5, 3),
            decimals: 18,
            rpc_url: "https://rpc.sepolia.org".to_string(),
            sender: None,
            explorer_tx_url: "https://sepolia.etherscan.io/tx/".to_string(),
            default_cap: None,
        }
    }

    /// Executor spec, `None` when no sender is configured
    pub fn spec(&self) -> Option<ChannelSpec> {
        let sender = self.sender.clone()?;
        Some(ChannelSpec {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            symbol: self.symbol.clone(),
            asset: self.asset.clone(),
            payout: self.payout,
            decimals: self.decimals,
            sender,
            explorer_tx_url: self.explorer_tx_url.clone(),
        })
    }
}

impl Config {
    /// Load from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClaimError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| ClaimError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(dir) = var("FAUCET_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(v) = var("FAUCET_LOCK_TIMEOUT_MS") {
            self.lock.timeout_ms = parse_env("FAUCET_LOCK_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = var("FAUCET_LOCK_STALE_SECS") {
            self.lock.stale_after_secs = parse_env("FAUCET_LOCK_STALE_SECS", &v)?;
        }
        if let Some(v) = var("FAUCET_CONFIRM_TIMEOUT_SECS") {
            self.confirmation.timeout_secs = parse_env("FAUCET_CONFIRM_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = var("FAUCET_RPC_TIMEOUT_SECS") {
            self.confirmation.rpc_timeout_secs = parse_env("FAUCET_RPC_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = var("FAUCET_COOLDOWN_HOURS") {
            self.policy_defaults.cooldown_hours = parse_env("FAUCET_COOLDOWN_HOURS", &v)?;
        }

        for channel in &mut self.channels {
            let (rpc, token, sender, amount, cap) = match channel.id.as_str() {
                "base-usdt" => (
                    "BASE_RPC",
                    Some("USDT_ADDRESS_BASE"),
                    "SENDER_ADDRESS_BASE",
                    "CLAIM_AMOUNT_USDT",
                    "GIVEAWAY_CAP_BASE",
                ),
                "sepolia-eth" => (
                    "SEPOLIA_RPC",
                    None,
                    "SENDER_ADDRESS_SEPOLIA",
                    "TEST_ETH_AMOUNT",
                    "GIVEAWAY_CAP_SEPOLIA",
                ),
                _ => continue,
            };

            if let Some(url) = var(rpc) {
                channel.rpc_url = url;
            }
            if let Some(key) = token {
                if let Some(contract) = var(key) {
                    channel.asset = AssetKind::Token {
                        contract: parse_env(key, &contract)?,
                    };
                }
            }
            if let Some(address) = var(sender) {
                channel.sender = Some(parse_env(sender, &address)?);
            }
            if let Some(v) = var(amount) {
                channel.payout = parse_env(amount, &v)?;
            }
            if let Some(v) = var(cap) {
                channel.default_cap = Some(parse_env(cap, &v)?);
            }
        }

        Ok(())
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(ClaimError::Config("no channels configured".to_string()));
        }
        if !(1..=MAX_COOLDOWN_HOURS).contains(&self.policy_defaults.cooldown_hours) {
            return Err(ClaimError::Config(format!(
                "default cooldown must be between 1 and {} hours, got {}",
                MAX_COOLDOWN_HOURS, self.policy_defaults.cooldown_hours
            )));
        }
        if self.policy_defaults.cap == 0 {
            return Err(ClaimError::Config("default cap must be at least 1".to_string()));
        }
        if self.confirmation.rpc_timeout_secs == 0 {
            return Err(ClaimError::Config("rpc timeout must be at least 1 second".to_string()));
        }

        // A live holder must never look stale
        if let Some(stale_after) = self.lock_settings().stale_after {
            let hold = self.max_lock_hold();
            if stale_after <= hold {
                return Err(ClaimError::Config(format!(
                    "lock.stale_after_secs ({}) must exceed the longest lock hold ({}s: confirmation timeout + {} RPC timeouts + {}s margin)",
                    stale_after.as_secs(),
                    hold.as_secs(),
                    RPC_CALLS_PER_HOLD,
                    LOCK_HOLD_MARGIN.as_secs()
                )));
            }
        }

        for channel in &self.channels {
            transfer_executor::to_units(channel.payout, channel.decimals).map_err(|e| {
                ClaimError::Config(format!("channel {}: {}", channel.id, e))
            })?;
            if channel.default_cap == Some(0) {
                return Err(ClaimError::Config(format!(
                    "channel {}: default cap must be at least 1",
                    channel.id
                )));
            }
        }
        Ok(())
    }

    /// Ledger file path
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join(&self.ledger_file)
    }

    /// Lock marker path
    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.lock", self.ledger_file))
    }

    /// Community policy path
    pub fn policy_path(&self) -> PathBuf {
        self.data_dir.join(&self.policy_file)
    }

    /// Global policy path
    pub fn global_policy_path(&self) -> PathBuf {
        self.data_dir.join(&self.global_policy_file)
    }

    /// Configured channel ids
    pub fn channel_ids(&self) -> Vec<ChannelId> {
        self.channels.iter().map(|c| ChannelId::new(c.id.clone())).collect()
    }

    /// Lock settings
    pub fn lock_settings(&self) -> LockSettings {
        LockSettings {
            timeout: Duration::from_millis(self.lock.timeout_ms),
            retry_interval: Duration::from_millis(self.lock.retry_interval_ms),
            stale_after: (self.lock.stale_after_secs > 0)
                .then(|| Duration::from_secs(self.lock.stale_after_secs)),
        }
    }

    /// Upper bound on how long one claim holds the ledger lock
    pub fn max_lock_hold(&self) -> Duration {
        Duration::from_secs(self.confirmation.timeout_secs)
            + Duration::from_secs(self.confirmation.rpc_timeout_secs) * RPC_CALLS_PER_HOLD
            + LOCK_HOLD_MARGIN
    }

    /// Confirmation settings
    pub fn confirmation_settings(&self) -> ConfirmationSettings {
        ConfirmationSettings {
            timeout: Duration::from_secs(self.confirmation.timeout_secs),
            poll_interval: Duration::from_millis(self.confirmation.poll_interval_ms),
        }
    }

    /// Policy fallbacks
    pub fn policy_defaults(&self) -> PolicyDefaults {
        PolicyDefaults {
            caps: self
                .channels
                .iter()
                .filter_map(|c| c.default_cap.map(|cap| (ChannelId::new(c.id.clone()), cap)))
                .collect(),
            fallback_cap: self.policy_defaults.cap,
            cooldown_hours: self.policy_defaults.cooldown_hours,
        }
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ClaimError::Config(format!("{}={:?}: {}", key, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.ledger_path(), PathBuf::from("./data/giveaway_state.json"));
        assert_eq!(config.lock.timeout_ms, 5_000);
        assert_eq!(config.channels.len(), 2);
        assert_eq!(config.channels[1].payout.to_string(), "0.005");
        assert!(config.validate().is_ok());
        assert!(config.channels.iter().all(|c| c.spec().is_none()));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("SENDER_ADDRESS_BASE", "0x00000000000000000000000000000000000000bb"),
            ("GIVEAWAY_CAP_BASE", "3"),
            ("TEST_ETH_AMOUNT", "0.01"),
            ("FAUCET_LOCK_STALE_SECS", "0"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert!(config.channels[0].spec().is_some());
        assert_eq!(config.policy_defaults().cap_for(&ChannelId::new("base-usdt")), 3);
        assert_eq!(config.policy_defaults().cap_for(&ChannelId::new("sepolia-eth")), 10);
        assert_eq!(config.channels[1].payout, Decimal::new(1, 2));
        assert_eq!(config.lock_settings().stale_after, None);
    }

    #[test]
    fn test_unparseable_env_value() {
        let mut config = Config::default();
        let err = config
            .apply_env(|key| (key == "FAUCET_LOCK_TIMEOUT_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ClaimError::Config(_)));
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faucet.toml");
        let mut config = Config::default();
        config.require_role = false;
        std::fs::write(&path, toml::to_string(&config).unwrap()).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert!(!loaded.require_role);
        assert_eq!(loaded.channels[0].asset, config.channels[0].asset);
    }

    #[test]
    fn test_stale_window_must_outlast_a_claim() {
        let config = Config::default();
        assert_eq!(config.max_lock_hold(), Duration::from_secs(120 + 4 * 30 + 30));
        assert!(config.validate().is_ok());

        let mut config = Config::default();
        config
            .apply_env(|key| (key == "FAUCET_CONFIRM_TIMEOUT_SECS").then(|| "600".to_string()))
            .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("stale_after_secs"));

        config.lock.stale_after_secs = 900;
        assert!(config.validate().is_ok());

        // Never reclaiming is always safe
        config.lock.stale_after_secs = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_stale_window_rejected_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faucet.toml");
        let mut config = Config::default();
        config.confirmation.rpc_timeout_secs = 60;
        std::fs::write(&path, toml::to_string(&config).unwrap()).unwrap();

        assert!(matches!(Config::from_file(&path), Err(ClaimError::Config(_))));
    }

    #[test]
    fn test_default_policy_values_are_range_checked() {
        let mut config = Config::default();
        config.policy_defaults.cooldown_hours = 1_000_000_000_000;
        assert!(config.validate().is_err());

        config.policy_defaults.cooldown_hours = 0;
        assert!(config.validate().is_err());

        config.policy_defaults.cooldown_hours = 168;
        config.policy_defaults.cap = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_overprecise_payout() {
        let mut config = Config::default();
        config.channels[0].payout = Decimal::new(1, 7);
        assert!(config.validate().is_err());
    }
}
