//! Block-level vote code: the agreed outcome of the (at most one) governance action in a block.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::transaction::TxType;
use crate::error::ConcordError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown vote code: {0}")]
pub struct UnknownVoteCode(pub i64);

impl From<UnknownVoteCode> for ConcordError {
    fn from(err: UnknownVoteCode) -> Self {
        ConcordError::Lifecycle(err.to_string())
    }
}

/// Outcome of governance-action processing, computed once per block.
///
/// The numeric values travel through the consensus engine (ProcessProposal response ->
/// FinalizeBlock request) and must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(i64)]
pub enum VoteCode {
    #[default]
    NoAction = 0,
    GrantNewMember = 1,
    RejectNewMember = 2,
    ProcessProposal = 3,
    IgnoreProposal = 4,
    AcceptProposal = 5,
    RejectProposal = 6,
}

impl VoteCode {
    /// Maps an oracle decision for a governance transaction type to its accept/reject code.
    /// Returns `None` for non-governance types.
    pub fn from_decision(tx_type: TxType, pass: bool) -> Option<Self> {
        let code = match (tx_type, pass) {
            (TxType::Grant, true) => VoteCode::GrantNewMember,
            (TxType::Grant, false) => VoteCode::RejectNewMember,
            (TxType::Proposal, true) => VoteCode::ProcessProposal,
            (TxType::Proposal, false) => VoteCode::IgnoreProposal,
            (TxType::SettleProposal, true) => VoteCode::AcceptProposal,
            (TxType::SettleProposal, false) => VoteCode::RejectProposal,
            _ => return None,
        };
        Some(code)
    }

    /// Governance transaction type this code decides, if any.
    pub fn governs(self) -> Option<TxType> {
        match self {
            VoteCode::NoAction => None,
            VoteCode::GrantNewMember | VoteCode::RejectNewMember => Some(TxType::Grant),
            VoteCode::ProcessProposal | VoteCode::IgnoreProposal => Some(TxType::Proposal),
            VoteCode::AcceptProposal | VoteCode::RejectProposal => Some(TxType::SettleProposal),
        }
    }

    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

impl TryFrom<i64> for VoteCode {
    type Error = UnknownVoteCode;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => VoteCode::NoAction,
            1 => VoteCode::GrantNewMember,
            2 => VoteCode::RejectNewMember,
            3 => VoteCode::ProcessProposal,
            4 => VoteCode::IgnoreProposal,
            5 => VoteCode::AcceptProposal,
            6 => VoteCode::RejectProposal,
            other => return Err(UnknownVoteCode(other)),
        })
    }
}

impl fmt::Display for VoteCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VoteCode::NoAction => "no_action",
            VoteCode::GrantNewMember => "grant_new_member",
            VoteCode::RejectNewMember => "reject_new_member",
            VoteCode::ProcessProposal => "process_proposal",
            VoteCode::IgnoreProposal => "ignore_proposal",
            VoteCode::AcceptProposal => "accept_proposal",
            VoteCode::RejectProposal => "reject_proposal",
        };
        f.write_str(name)
    }
}
