//! Integration and property test suite for forkview.
//!
//! Point-of-view lookups are exercised against in-memory and RocksDB
//! storage, across side branches, reorganizations and in-flight blocks.

pub mod helpers;
