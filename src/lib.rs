pub mod config;
pub mod core;
pub mod error;
pub mod signature;

pub use config::{ConfigError, GenesisAccount, GenesisConfig, NodeConfig, OracleConfig};
pub use error::{ConcordError, Result};
pub use signature::{
    address_from_pubkey, hash_message, parse_public_key, public_key_hex, sign_message,
    verify_signature,
};

// Core API exports
pub use crate::core::TxHash;
pub use crate::core::abci::{
    CheckTxRequest,
    CheckTxResponse,
    CommitResponse,
    FinalizeBlockRequest,
    FinalizeBlockResponse,
    InfoResponse,
    PrepareProposalRequest,
    PrepareProposalResponse,
    ProcessProposalRequest,
    ProcessProposalResponse,
    ProposalVerdict,
    CODE_DECODE_FAILED,
    CODE_HANDLER_FAILED,
    CODE_UNKNOWN_TYPE,
    CODE_VERIFY_FAILED,
};
pub use crate::core::admission::{compute_vote_code, parse_transaction, AdmissionError};
pub use crate::core::events::{
    validator_update_event, Event, EventAttribute, EVENT_UPDATE_VALIDATORS,
};
pub use crate::core::execution::{
    default_registry,
    DiscussionHandler,
    GrantHandler,
    ProposalHandler,
    SettleProposalHandler,
    TransferHandler,
    CODE_BAD_PAYLOAD,
    CODE_INSUFFICIENT_FUNDS,
    CODE_PROPOSAL_NOT_ACTIVE,
    CODE_UNKNOWN_RECIPIENT,
    CODE_VOTE_MISMATCH,
    MEMBER_POWER,
};
pub use crate::core::handler::{
    BlockContext, HandlerError, HandlerRegistry, RegistryBuilder, TxHandler, TxResult, CODE_OK,
};
pub use crate::core::lifecycle::App;
pub use crate::core::oracle::{GovernanceOracle, OracleError, PolicyOracle};
pub use crate::core::state::{
    Account,
    Address,
    AppHash,
    GrantRecord,
    MemoryState,
    MemoryStore,
    NonceMode,
    ProposalRecord,
    ProposalStatus,
    StateError,
    StateStore,
    Validator,
    ValidatorSet,
    ValidatorUpdate,
    WorldState,
};
pub use crate::core::transaction::{
    DecodeError,
    DiscussionTx,
    Grant,
    GrantTx,
    ProposalTx,
    SettleProposalTx,
    Transaction,
    TransferTx,
    TxPayload,
    TxType,
    MAX_TX_BYTES,
};
pub use crate::core::vote::{UnknownVoteCode, VoteCode};
pub use crate::core::working::WorkingState;
