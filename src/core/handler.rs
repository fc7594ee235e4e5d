//! Handler capability contract and the registry that routes transactions by type.
//!
//! A handler implements `check` (pool admission), `prepare` (speculative execution while building
//! a proposal) and `process` (validation and finalization) for one [`TxType`]. `reset_context` is
//! called once at the start of every block-lifecycle call, before any transaction is touched.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::core::events::Event;
use crate::core::state::WorldState;
use crate::core::transaction::{Transaction, TxType};
use crate::core::vote::VoteCode;
use crate::error::ConcordError;

/// Success status code.
pub const CODE_OK: u32 = 0;

/// Call-level handler failure, as opposed to a non-zero [`TxResult`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("handler for {0} cannot execute: {1}")]
    Execution(TxType, String),

    #[error("payload does not match handler {0}")]
    WrongPayload(TxType),
}

impl From<HandlerError> for ConcordError {
    fn from(err: HandlerError) -> Self {
        ConcordError::Handler(err.to_string())
    }
}

/// Per-transaction outcome. `code == 0` is success; anything else carries a reason in `log`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TxResult {
    pub code: u32,
    pub log: String,
    pub events: Vec<Event>,
}

impl TxResult {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn with_event(mut self, event: Event) -> Self {
        self.events.push(event);
        self
    }

    pub fn failed(code: u32, log: impl Into<String>) -> Self {
        debug_assert_ne!(code, CODE_OK);
        Self {
            code,
            log: log.into(),
            events: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }
}

/// Per-call execution scope shared by all handlers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockContext {
    pub height: u64,
    pub proposer: String,
    /// Deterministic per-block seed, identical on every replica for the same call input.
    pub seed: [u8; 32],
}

impl BlockContext {
    /// seed = sha256(height || proposer || tx_1 || ... || tx_n)
    pub fn new<T: AsRef<[u8]>>(height: u64, proposer: &str, txs: &[T]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(height.to_le_bytes());
        hasher.update(proposer.as_bytes());
        for tx in txs {
            hasher.update((tx.as_ref().len() as u64).to_le_bytes());
            hasher.update(tx.as_ref());
        }
        Self {
            height,
            proposer: proposer.to_string(),
            seed: hasher.finalize().into(),
        }
    }
}

pub trait TxHandler<S: WorldState>: Send + Sync {
    /// Installs a fresh per-call scope.
    fn reset_context(&self, ctx: &BlockContext);

    /// Stateless-ish admission check against the live committed state.
    fn check(&self, state: &S, tx: &Transaction) -> Result<TxResult, HandlerError>;

    /// Speculative execution against a scratch clone while building a proposal. Defaults to
    /// `process`, so a candidate is kept exactly when it would later execute.
    fn prepare(
        &self,
        state: &mut S,
        tx: &Transaction,
        vote: VoteCode,
    ) -> Result<TxResult, HandlerError> {
        self.process(state, tx, vote)
    }

    /// Execution during proposal validation and block finalization.
    fn process(
        &self,
        state: &mut S,
        tx: &Transaction,
        vote: VoteCode,
    ) -> Result<TxResult, HandlerError>;
}

/// Immutable mapping from transaction type to handler. Built once with [`RegistryBuilder`].
pub struct HandlerRegistry<S: WorldState> {
    handlers: BTreeMap<TxType, Arc<dyn TxHandler<S>>>,
}

impl<S: WorldState> HandlerRegistry<S> {
    pub fn builder() -> RegistryBuilder<S> {
        RegistryBuilder {
            handlers: BTreeMap::new(),
        }
    }

    pub fn get(&self, tx_type: TxType) -> Option<&Arc<dyn TxHandler<S>>> {
        self.handlers.get(&tx_type)
    }

    pub fn supports(&self, tx_type: TxType) -> bool {
        self.handlers.contains_key(&tx_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Resets every handler's context, in type order. A handler registered under several types is
    /// reset once per registration.
    pub fn reset_all(&self, ctx: &BlockContext) {
        for handler in self.handlers.values() {
            handler.reset_context(ctx);
        }
    }
}

impl<S: WorldState> fmt::Debug for HandlerRegistry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("types", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

pub struct RegistryBuilder<S: WorldState> {
    handlers: BTreeMap<TxType, Arc<dyn TxHandler<S>>>,
}

impl<S: WorldState> RegistryBuilder<S> {
    /// Registers `handler` for `tx_type`, replacing any earlier registration.
    pub fn register(mut self, tx_type: TxType, handler: Arc<dyn TxHandler<S>>) -> Self {
        self.handlers.insert(tx_type, handler);
        self
    }

    pub fn build(self) -> HandlerRegistry<S> {
        HandlerRegistry {
            handlers: self.handlers,
        }
    }
}
