mod account;
mod analytics;
mod ledger;
mod money;
mod tiers;
mod transaction;
mod withdrawal;

pub use account::*;
pub use analytics::*;
pub use ledger::*;
pub use money::*;
pub use tiers::*;
pub use transaction::*;
pub use withdrawal::*;
