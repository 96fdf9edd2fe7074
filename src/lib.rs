//! Delegated fee compounding for concentrated-liquidity positions.
//!
//! Owners park positions in a [`Vault`]; anyone may then compound a parked
//! position's fees back into it for a bonus, while leftovers are credited to
//! the owner in the custody ledger.

pub mod config;
pub mod custody;
pub mod error;
pub mod external;
pub mod pools;
pub mod rebalance;
pub mod sim;
pub mod vault;

pub use config::{BonusConfig, RuntimeConfig};
pub use error::VaultError;
pub use external::{External, ExternalError};
pub use rebalance::BonusMode;
pub use vault::{AutoCompoundParams, CompoundOutcome, Vault};
