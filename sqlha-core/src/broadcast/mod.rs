//! Eventually-consistent state exchange between cluster peers.
//!
//! Every unit owns one bag of string keys it alone writes. A single group bag
//! is shared by all units but only the leader may write it. Readers see the
//! latest value of each key; there is no ordering across writers.

pub mod keys;
mod memory;
mod traits;

pub use memory::{Delivery, MemoryBroadcast, MemoryBroadcastHub};
pub use traits::{BroadcastError, BroadcastResult, BroadcastStore, Bag};
