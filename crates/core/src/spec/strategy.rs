//! Reuse strategy selection.
//!
//! A pure function of driver capabilities, caller toggles and test context.
//! Transactions win over journaling when both are eligible: a rollback is
//! cheaper than replaying recorded changes in reverse.

use serde::{Deserialize, Serialize};

use crate::driver::DriverCapabilities;
use crate::spec::ReuseToggles;

/// Everything the selector looks at.
#[derive(Debug, Clone, Copy)]
pub struct StrategyInputs {
    pub connection_exists: bool,
    pub capabilities: DriverCapabilities,
    pub toggles: ReuseToggles,
    pub is_browser_test: bool,
}

/// The mechanism that keeps a database reusable across tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReuseMechanism {
    Transaction,
    Journal,
}

/// The selected strategy. At most one of `transaction` and `journal` is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReuseStrategy {
    pub transaction: bool,
    pub journal: bool,
    pub verify: bool,
}

impl ReuseStrategy {
    pub fn is_reusing(&self) -> bool {
        self.transaction || self.journal
    }

    pub fn mechanism(&self) -> Option<ReuseMechanism> {
        if self.transaction {
            Some(ReuseMechanism::Transaction)
        } else if self.journal {
            Some(ReuseMechanism::Journal)
        } else {
            None
        }
    }
}

/// Pick the reuse strategy.
pub fn select(inputs: StrategyInputs) -> ReuseStrategy {
    let caps = inputs.capabilities;
    let reusable = inputs.connection_exists && caps.reuse;

    // browser tests run the app in another process, which cannot see an open transaction
    let transaction = reusable && caps.transactions && !inputs.is_browser_test && inputs.toggles.transaction;
    let journal = !transaction && reusable && caps.journaling && inputs.toggles.journal;
    let verify = inputs.connection_exists && caps.verification && inputs.toggles.verify;

    ReuseStrategy { transaction, journal, verify }
}
