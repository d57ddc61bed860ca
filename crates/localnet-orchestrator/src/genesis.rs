//! Genesis ledger construction.
//!
//! The ledger funds every block producer at its stake tier (and any zkApp fee
//! payers) and carries the genesis state timestamp. Two maintenance paths
//! exist and are kept apart:
//!
//! - [`reset`] re-wraps an existing account list under a fresh timestamp
//! - [`touch_timestamp`] rewrites only the timestamp of a rendered file
//!
//! Account regeneration goes through [`build`] and nothing else.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, info};

use crate::config::StakeConfig;
use crate::error::{OrchestratorError, Result};
use crate::store::write_atomic;

/// File name of the rendered ledger inside a network directory.
pub const GENESIS_FILE: &str = "genesis_ledger.json";

/// Name recorded in the ledger section.
const LEDGER_NAME: &str = "release";

/// Total account count the daemon pads the ledger to.
const LEDGER_PADDING: usize = 250;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

const NANOS_PER_UNIT: u64 = 1_000_000_000;

/// Token amount with nine fractional digits, stored in base units.
///
/// Rendered as a fixed-point decimal string, e.g. `11550000.000000000`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Balance(u64);

impl Balance {
    /// Creates a balance of `units` whole tokens.
    pub const fn from_whole(units: u64) -> Self {
        Self(units * NANOS_PER_UNIT)
    }

    /// Creates a balance from base units.
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Returns the balance in base units.
    pub const fn nanos(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.0 / NANOS_PER_UNIT, self.0 % NANOS_PER_UNIT)
    }
}

impl FromStr for Balance {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (whole, fraction) = s.split_once('.').unwrap_or((s, ""));
        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("invalid balance {s:?}"));
        }
        if fraction.len() > 9 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("invalid balance {s:?}: at most nine fractional digits"));
        }

        let whole: u64 = whole.parse().map_err(|_| format!("balance {s:?} out of range"))?;
        let fraction: u64 = if fraction.is_empty() {
            0
        } else {
            format!("{fraction:0<9}")
                .parse()
                .map_err(|_| format!("invalid balance {s:?}"))?
        };

        whole
            .checked_mul(NANOS_PER_UNIT)
            .and_then(|n| n.checked_add(fraction))
            .map(Balance)
            .ok_or_else(|| format!("balance {s:?} out of range"))
    }
}

impl Serialize for Balance {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Balance {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Stake tier an account is funded at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StakeTier {
    /// Large block-producer stake.
    Whale,
    /// Small block-producer stake.
    Fish,
    /// Unstaked account paying zkApp fees.
    FeePayer,
}

impl fmt::Display for StakeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Whale => "whale",
            Self::Fish => "fish",
            Self::FeePayer => "fee-payer",
        })
    }
}

/// One ledger account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Public key.
    pub pk: String,
    /// Secret key; always null for generated accounts.
    pub sk: Option<String>,
    /// Initial balance.
    pub balance: Balance,
    /// Delegate; null means self-delegation.
    pub delegate: Option<String>,
    /// Fields this tool does not interpret (`nonce`, `timing`,
    /// `permissions`, zkApp state, ...). Carried through verbatim.
    #[serde(flatten, default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Account {
    /// Creates a self-delegated account without a secret key.
    pub fn funded(pk: impl Into<String>, balance: Balance) -> Self {
        Self {
            pk: pk.into(),
            sk: None,
            balance,
            delegate: None,
            extra: serde_json::Map::new(),
        }
    }
}

/// The genesis ledger as held in the network record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisLedger {
    /// Genesis state timestamp, ISO-8601 with numeric offset.
    pub state_timestamp: String,
    /// Accounts in ledger order.
    pub accounts: Vec<Account>,
}

impl GenesisLedger {
    /// Returns the account for `pk`, if any.
    pub fn account(&self, pk: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.pk == pk)
    }

    /// Converts the ledger into the document the daemon reads.
    pub fn to_document(&self) -> GenesisDocument {
        GenesisDocument {
            genesis: GenesisSection {
                genesis_state_timestamp: self.state_timestamp.clone(),
            },
            ledger: LedgerSection {
                name: Some(LEDGER_NAME.to_string()),
                num_accounts: Some(self.accounts.len().max(LEDGER_PADDING)),
                accounts: self.accounts.clone(),
            },
        }
    }

    /// Renders the daemon document as pretty JSON.
    pub fn render(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_document())?)
    }

    /// Loads an operator-supplied ledger document.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => OrchestratorError::ConfigNotFound(path.to_path_buf()),
            _ => OrchestratorError::Io(e),
        })?;
        let document: GenesisDocument = serde_json::from_str(&content)?;
        Ok(Self {
            state_timestamp: document.genesis.genesis_state_timestamp,
            accounts: document.ledger.accounts,
        })
    }
}

/// On-disk ledger document consumed by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisDocument {
    pub genesis: GenesisSection,
    pub ledger: LedgerSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisSection {
    pub genesis_state_timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSection {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub num_accounts: Option<usize>,
    pub accounts: Vec<Account>,
}

/// A public key to fund and the tier it is funded at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundedKey {
    pub public_key: String,
    pub tier: StakeTier,
}

/// Builds a ledger funding `keys` at their tier balances.
///
/// Accounts from `base` (an operator-supplied ledger) come first and are kept
/// verbatim. A generated key that collides with any existing account is
/// rejected rather than funded twice.
pub fn build(keys: &[FundedKey], stake: &StakeConfig, base: Option<&GenesisLedger>) -> Result<GenesisLedger> {
    let mut accounts: Vec<Account> = base.map(|l| l.accounts.clone()).unwrap_or_default();
    let mut seen: BTreeSet<String> = accounts.iter().map(|a| a.pk.clone()).collect();

    for key in keys {
        if !seen.insert(key.public_key.clone()) {
            return Err(OrchestratorError::invalid_topology(format!(
                "public key {} would appear in more than one genesis account",
                key.public_key
            )));
        }
        accounts.push(Account::funded(&key.public_key, stake.balance(key.tier)));
    }

    let ledger = GenesisLedger {
        state_timestamp: current_timestamp(),
        accounts,
    };
    debug!(
        accounts = ledger.accounts.len(),
        timestamp = %ledger.state_timestamp,
        "Built genesis ledger"
    );
    Ok(ledger)
}

/// Wraps the accounts of `ledger` under a fresh timestamp.
pub fn reset(ledger: &GenesisLedger) -> GenesisLedger {
    GenesisLedger {
        state_timestamp: current_timestamp(),
        accounts: ledger.accounts.clone(),
    }
}

/// Rewrites only `genesis.genesis_state_timestamp` of the rendered ledger at
/// `path`, leaving every other byte of content as parsed. Returns the new
/// timestamp.
pub fn touch_timestamp(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => OrchestratorError::ConfigNotFound(path.to_path_buf()),
        _ => OrchestratorError::Io(e),
    })?;

    let mut document: serde_json::Value = serde_json::from_str(&content)?;
    let genesis = document
        .get_mut("genesis")
        .and_then(|g| g.as_object_mut())
        .ok_or_else(|| {
            OrchestratorError::serialization(format!(
                "{} has no genesis section",
                path.display()
            ))
        })?;

    let timestamp = current_timestamp();
    genesis.insert(
        "genesis_state_timestamp".to_string(),
        serde_json::Value::String(timestamp.clone()),
    );

    write_atomic(path, serde_json::to_string_pretty(&document)?.as_bytes())?;
    info!(path = %path.display(), timestamp = %timestamp, "Updated genesis timestamp");
    Ok(timestamp)
}

/// Current local wall-clock time in the ledger's timestamp format.
pub fn current_timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}
