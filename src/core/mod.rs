// Core module: the application-side block lifecycle and everything it dispatches to.
//
// DETERMINISM GUARANTEES:
// =======================
// 1. Same canonical state + same ordered batch + same vote code -> same results and app hash
// 2. No randomness: the per-block seed is derived from height, proposer and tx bytes
// 3. No system time anywhere on the execution path
// 4. Ordered collections only, so hashing and validator diffs ignore insertion history
//
// INVARIANTS:
// - At most one governance action decides a block's vote code
// - CheckTx never observes or mutates the block in progress
// - The working state exists only between FinalizeBlock and Commit

pub mod abci;
pub mod admission;
pub mod events;
pub mod execution;
pub mod handler;
pub mod lifecycle;
pub mod oracle;
pub mod state;
pub mod transaction;
pub mod vote;
pub mod working;

/// Hex sha256 of raw transaction bytes.
pub type TxHash = String;
