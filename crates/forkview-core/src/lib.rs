//! # forkview-core
//! Block tree tracking and point-of-view transaction lookup.

pub mod blockchain;
pub mod chain_state;
pub mod constants;
pub mod error;
pub mod fork;
pub mod graph;
pub mod merkle;
pub mod side_cache;
pub mod traits;
pub mod txlookup;
pub mod types;
pub mod view;
