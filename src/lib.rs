//! Library facade - re-export internal modules so integration
//! tests or external code can use `vpn_impact::...`.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod formatter;
pub mod parser;
pub mod pingstream;
pub mod probe;
pub mod record;
pub mod report;
pub mod signal;
pub mod stats;
pub mod store;
pub mod vpn;
