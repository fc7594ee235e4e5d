//! Request and response types exchanged with the consensus engine.
//!
//! Shapes follow the ABCI++ calls the engine makes; transport framing is the engine adapter's
//! concern and not modelled here.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::core::events::Event;
use crate::core::handler::TxResult;
use crate::core::state::{AppHash, ValidatorUpdate};
use crate::core::vote::VoteCode;

/// Status code returned by CheckTx for bytes that do not decode.
pub const CODE_DECODE_FAILED: u32 = 1;
/// Status code returned by CheckTx when signature, account or nonce checks fail.
pub const CODE_VERIFY_FAILED: u32 = 4;
/// Status code returned by CheckTx when no handler is registered for the type.
pub const CODE_UNKNOWN_TYPE: u32 = 5;
/// Status code returned by CheckTx when the handler call itself fails.
pub const CODE_HANDLER_FAILED: u32 = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckTxRequest {
    pub tx: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CheckTxResponse {
    pub code: u32,
    pub log: String,
}

impl CheckTxResponse {
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

impl From<TxResult> for CheckTxResponse {
    fn from(result: TxResult) -> Self {
        Self {
            code: result.code,
            log: result.log,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareProposalRequest {
    pub height: u64,
    /// Address of the local node, which is proposing.
    pub proposer: String,
    pub txs: Vec<Bytes>,
    /// Byte budget for the returned batch. Negative means unlimited.
    pub max_tx_bytes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PrepareProposalResponse {
    pub txs: Vec<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessProposalRequest {
    pub height: u64,
    pub proposer: String,
    pub txs: Vec<Bytes>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalVerdict {
    Accept,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessProposalResponse {
    pub status: ProposalVerdict,
    /// Vote code computed while validating; handed back in FinalizeBlock.
    pub vote_code: i64,
}

impl ProcessProposalResponse {
    pub fn accept(vote_code: VoteCode) -> Self {
        Self {
            status: ProposalVerdict::Accept,
            vote_code: vote_code.as_i64(),
        }
    }

    pub fn reject() -> Self {
        Self {
            status: ProposalVerdict::Reject,
            vote_code: VoteCode::NoAction.as_i64(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == ProposalVerdict::Accept
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeBlockRequest {
    pub height: u64,
    pub proposer: String,
    pub txs: Vec<Bytes>,
    pub vote_code: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeBlockResponse {
    pub tx_results: Vec<TxResult>,
    #[serde(with = "hex_hash")]
    pub app_hash: AppHash,
    pub validator_updates: Vec<ValidatorUpdate>,
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitResponse {
    pub height: u64,
    #[serde(with = "hex_hash")]
    pub app_hash: AppHash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InfoResponse {
    pub last_height: u64,
    #[serde(with = "hex_hash")]
    pub last_app_hash: AppHash,
}

mod hex_hash {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    use crate::core::state::AppHash;

    pub fn serialize<S: Serializer>(hash: &AppHash, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(hash))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<AppHash, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let bytes = hex::decode(&raw).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| D::Error::custom("app hash must be 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_response_constructors() {
        let accepted = ProcessProposalResponse::accept(VoteCode::GrantNewMember);
        assert!(accepted.is_accepted());
        assert_eq!(accepted.vote_code, 1);
        let rejected = ProcessProposalResponse::reject();
        assert!(!rejected.is_accepted());
        assert_eq!(rejected.vote_code, 0);
    }

    #[test]
    fn test_commit_response_hash_is_hex() {
        let resp = CommitResponse { height: 4, app_hash: [0xab; 32] };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains(&"ab".repeat(32)));
        let back: CommitResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back, resp);
    }
}
