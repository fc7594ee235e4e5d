//! Block lifecycle orchestrator: CheckTx, PrepareProposal, ProcessProposal, FinalizeBlock and
//! Commit over a [`StateStore`], a [`HandlerRegistry`] and a [`GovernanceOracle`].
//!
//! # Failure policy
//! - CheckTx and PrepareProposal never fail the call: bad transactions become a non-zero status
//!   or are left out of the proposal, and a failed vote-code computation yields an empty proposal.
//! - ProcessProposal is all-or-nothing: any bad transaction rejects the proposal.
//! - FinalizeBlock and Commit return errors; the network already agreed on the block, so a
//!   failure here means this replica diverged.
//!
//! # Invariants
//! - Lifecycle calls serialise on the working-slot mutex. CheckTx works on its own clone of the
//!   canonical state and never sees the block in progress.
//! - Every lifecycle call resets all handler contexts exactly once, before touching any
//!   transaction.
//! - The working slot is filled by FinalizeBlock and emptied by Commit; a failed FinalizeBlock
//!   empties it as well.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use bytes::Bytes;
use tracing::{debug, info, instrument, warn, Level};

use crate::config::NodeConfig;
use crate::core::abci::{
    CheckTxRequest, CheckTxResponse, CommitResponse, FinalizeBlockRequest, FinalizeBlockResponse,
    InfoResponse, PrepareProposalRequest, PrepareProposalResponse, ProcessProposalRequest,
    ProcessProposalResponse, CODE_DECODE_FAILED, CODE_HANDLER_FAILED, CODE_UNKNOWN_TYPE,
    CODE_VERIFY_FAILED,
};
use crate::core::admission::{compute_vote_code, parse_transaction};
use crate::core::events::validator_update_event;
use crate::core::execution::default_registry;
use crate::core::handler::{BlockContext, HandlerRegistry, TxResult};
use crate::core::oracle::{GovernanceOracle, PolicyOracle};
use crate::core::state::{MemoryStore, NonceMode, StateStore, WorldState};
use crate::core::transaction::Transaction;
use crate::core::vote::VoteCode;
use crate::core::working::WorkingState;
use crate::error::{ConcordError, Result};

pub struct App<St: StateStore> {
    store: St,
    registry: HandlerRegistry<St::State>,
    oracle: Arc<dyn GovernanceOracle>,
    working: Mutex<WorkingState<St::State>>,
    last_block: RwLock<InfoResponse>,
}

impl App<MemoryStore> {
    /// In-memory application from a node config: genesis state, built-in handlers and the
    /// policy oracle.
    pub fn from_config(config: &NodeConfig) -> Result<Self> {
        let store = MemoryStore::from_genesis(&config.genesis)?;
        let genesis_hash = store.canonical().app_hash();
        let app = Self::new(
            store,
            default_registry(),
            Arc::new(PolicyOracle::new(config.oracle.clone())),
        );
        app.set_last_block(InfoResponse {
            last_height: 0,
            last_app_hash: genesis_hash,
        });
        info!(chain_id = %config.chain_id, app_hash = %hex::encode(genesis_hash), "genesis loaded");
        Ok(app)
    }
}

impl<St: StateStore> App<St> {
    pub fn new(
        store: St,
        registry: HandlerRegistry<St::State>,
        oracle: Arc<dyn GovernanceOracle>,
    ) -> Self {
        Self {
            store,
            registry,
            oracle,
            working: Mutex::new(WorkingState::new()),
            last_block: RwLock::new(InfoResponse::default()),
        }
    }

    pub fn store(&self) -> &St {
        &self.store
    }

    /// True when a finalized block is waiting for Commit.
    pub fn has_pending_block(&self) -> bool {
        !self.lock_working().is_clear()
    }

    pub fn info(&self) -> InfoResponse {
        *self.last_block.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_last_block(&self, info: InfoResponse) {
        *self.last_block.write().unwrap_or_else(PoisonError::into_inner) = info;
    }

    fn lock_working(&self) -> MutexGuard<'_, WorkingState<St::State>> {
        self.working.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_call(&self, height: u64, proposer: &str, txs: &[Bytes]) {
        self.registry.reset_all(&BlockContext::new(height, proposer, txs));
    }

    /// Pool admission against a clone of the canonical state. Forward nonce gaps are accepted.
    pub fn check_tx(&self, req: CheckTxRequest) -> CheckTxResponse {
        let state = self.store.canonical();
        let tx = match parse_transaction(&state, &req.tx, NonceMode::AllowGap) {
            Ok(tx) => tx,
            Err(err) => {
                let code = match err {
                    ConcordError::Decode(_) => CODE_DECODE_FAILED,
                    _ => CODE_VERIFY_FAILED,
                };
                debug!(
                    tx = %Transaction::hash_of(&req.tx),
                    code,
                    error = %err,
                    "check_tx rejected"
                );
                return CheckTxResponse {
                    code,
                    log: err.to_string(),
                };
            }
        };
        let Some(handler) = self.registry.get(tx.tx_type()) else {
            return CheckTxResponse {
                code: CODE_UNKNOWN_TYPE,
                log: format!("no handler registered for {}", tx.tx_type()),
            };
        };
        match handler.check(&state, &tx) {
            Ok(result) => result.into(),
            Err(err) => CheckTxResponse {
                code: CODE_HANDLER_FAILED,
                log: err.to_string(),
            },
        }
    }

    /// Builds the proposal from the candidate batch.
    ///
    /// Governance transactions survive only if signed by the proposer, and only the first such
    /// one. Each remaining candidate is executed on a clone of the state accepted so far and kept
    /// only on success. Dropped candidates stay in the engine's pool and may be proposed again.
    #[instrument(name = "App::prepare_proposal", skip_all, fields(height = req.height))]
    pub fn prepare_proposal(&self, req: PrepareProposalRequest) -> PrepareProposalResponse {
        let _serial = self.lock_working();
        self.begin_call(req.height, &req.proposer, &req.txs);
        let canonical = self.store.canonical();

        let proposer_index = match canonical.find_account(&req.proposer) {
            Ok(account) => Some(account.index),
            Err(error) => {
                warn!(
                    proposer = %req.proposer,
                    %error,
                    "unknown proposer, governance transactions excluded"
                );
                None
            }
        };

        let mut governance_kept = false;
        let candidates: Vec<Bytes> = req
            .txs
            .into_iter()
            .filter(|raw| {
                let Ok(tx) = Transaction::decode(raw) else {
                    return false;
                };
                if !tx.tx_type().is_governance() {
                    return true;
                }
                let eligible = !governance_kept
                    && Some(tx.validator) == proposer_index
                    && canonical.verify(&tx, NonceMode::AllowGap).is_ok();
                governance_kept |= eligible;
                eligible
            })
            .collect();

        let vote = match compute_vote_code(self.oracle.as_ref(), &canonical, &candidates) {
            Ok(vote) => vote,
            Err(error) => {
                warn!(%error, "vote code computation failed, proposing an empty block");
                return PrepareProposalResponse::default();
            }
        };

        let budget = u64::try_from(req.max_tx_bytes).ok();
        let mut used: u64 = 0;
        let mut accepted = canonical;
        let mut txs = Vec::with_capacity(candidates.len());
        for (index, raw) in candidates.into_iter().enumerate() {
            let size = raw.len() as u64;
            if budget.is_some_and(|max| used + size > max) {
                debug!(index, size, "candidate exceeds proposal byte budget");
                continue;
            }
            let tx = match parse_transaction(&accepted, &raw, NonceMode::Strict) {
                Ok(tx) => tx,
                Err(error) => {
                    debug!(index, %error, "dropping candidate");
                    continue;
                }
            };
            let Some(handler) = self.registry.get(tx.tx_type()) else {
                debug!(index, tx_type = %tx.tx_type(), "dropping candidate without handler");
                continue;
            };
            let mut scratch = accepted.clone();
            match handler.prepare(&mut scratch, &tx, vote) {
                Ok(result) if result.is_ok() => {
                    accepted = scratch;
                    used += size;
                    txs.push(raw);
                }
                Ok(result) => {
                    debug!(
                        index,
                        code = result.code,
                        log = %result.log,
                        "candidate failed prepare"
                    );
                }
                Err(error) => {
                    warn!(index, tx_type = %tx.tx_type(), %error, "handler failed in prepare");
                }
            }
        }
        info!(txs = txs.len(), vote_code = %vote, "proposal prepared");
        PrepareProposalResponse { txs }
    }

    /// Validates a proposal by executing it on a scratch clone. Any failure rejects it.
    #[instrument(name = "App::process_proposal", skip_all, fields(height = req.height))]
    pub fn process_proposal(&self, req: ProcessProposalRequest) -> ProcessProposalResponse {
        let _serial = self.lock_working();
        if req.txs.is_empty() {
            return ProcessProposalResponse::accept(VoteCode::NoAction);
        }
        self.begin_call(req.height, &req.proposer, &req.txs);
        let mut scratch = self.store.canonical();

        let vote = match compute_vote_code(self.oracle.as_ref(), &scratch, &req.txs) {
            Ok(vote) => vote,
            Err(error) => {
                warn!(%error, "rejecting proposal: vote code computation failed");
                return ProcessProposalResponse::reject();
            }
        };
        if let Err(error) = self.execute_all(&mut scratch, &req.txs, vote) {
            warn!(%error, "rejecting proposal");
            return ProcessProposalResponse::reject();
        }
        debug!(vote_code = %vote, "proposal accepted");
        ProcessProposalResponse::accept(vote)
    }

    /// Executes the agreed block into a fresh working state taken from the canonical state.
    #[instrument(
        name = "App::finalize_block",
        skip_all,
        fields(height = req.height, vote_code = req.vote_code),
        err(level = Level::ERROR)
    )]
    pub fn finalize_block(&self, req: FinalizeBlockRequest) -> Result<FinalizeBlockResponse> {
        let mut working = self.lock_working();
        self.begin_call(req.height, &req.proposer, &req.txs);
        let state = working.open(req.height, self.store.canonical());
        let outcome = self.finalize_into(state, &req);
        if outcome.is_err() {
            working.clear();
        }
        outcome
    }

    fn finalize_into(
        &self,
        state: &mut St::State,
        req: &FinalizeBlockRequest,
    ) -> Result<FinalizeBlockResponse> {
        let vote = VoteCode::try_from(req.vote_code)?;
        let previous = state.current_validators();
        let tx_results = self.execute_all(state, &req.txs, vote)?;
        let app_hash = state.update()?;
        let validator_updates = state.validators_update(&previous)?;
        let events = validator_update_event(&validator_updates)
            .into_iter()
            .collect::<Vec<_>>();
        info!(
            txs = tx_results.len(),
            validator_updates = validator_updates.len(),
            app_hash = %hex::encode(app_hash),
            "block finalized"
        );
        Ok(FinalizeBlockResponse {
            tx_results,
            app_hash,
            validator_updates,
            events,
        })
    }

    /// Adopts the finalized working state as canonical. The slot is empty afterwards whatever
    /// the outcome.
    #[instrument(name = "App::commit", skip_all, err(level = Level::ERROR))]
    pub fn commit(&self) -> Result<CommitResponse> {
        let (height, state) = self
            .lock_working()
            .take()
            .ok_or_else(|| ConcordError::Lifecycle("commit without a finalized block".into()))?;
        let app_hash = self.store.adopt(state)?;
        self.set_last_block(InfoResponse {
            last_height: height,
            last_app_hash: app_hash,
        });
        info!(height, app_hash = %hex::encode(app_hash), "block committed");
        Ok(CommitResponse { height, app_hash })
    }

    /// Strict, in-order execution of a whole batch. Stops at the first failure.
    fn execute_all(
        &self,
        state: &mut St::State,
        txs: &[Bytes],
        vote: VoteCode,
    ) -> Result<Vec<TxResult>> {
        let mut results = Vec::with_capacity(txs.len());
        for (index, raw) in txs.iter().enumerate() {
            let tx = parse_transaction(state, raw, NonceMode::Strict)?;
            let handler = self.registry.get(tx.tx_type()).ok_or_else(|| {
                ConcordError::Dispatch(format!("tx {}: no handler for {}", index, tx.tx_type()))
            })?;
            let result = handler.process(state, &tx, vote)?;
            if !result.is_ok() {
                return Err(ConcordError::Handler(format!(
                    "tx {} ({}) failed with code {}: {}",
                    index,
                    tx.tx_type(),
                    result.code,
                    result.log
                )));
            }
            results.push(result);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GenesisAccount, GenesisConfig, OracleConfig};
    use crate::core::transaction::{Grant, GrantTx, ProposalTx, TransferTx, TxPayload};
    use crate::signature::{address_from_pubkey, public_key_hex};
    use secp256k1::SecretKey;

    fn key(n: u8) -> SecretKey {
        SecretKey::from_slice(&[n; 32]).unwrap()
    }

    fn address(n: u8) -> String {
        address_from_pubkey(&public_key_hex(&key(n))).unwrap()
    }

    fn config() -> NodeConfig {
        NodeConfig {
            chain_id: "concord-test".into(),
            log_filter: "info".into(),
            genesis: GenesisConfig {
                accounts: vec![
                    GenesisAccount { pubkey: public_key_hex(&key(1)), balance: 1000, power: 10 },
                    GenesisAccount { pubkey: public_key_hex(&key(2)), balance: 1000, power: 10 },
                ],
            },
            oracle: OracleConfig::default(),
        }
    }

    fn app() -> App<MemoryStore> {
        App::from_config(&config()).unwrap()
    }

    fn signed(validator: u64, nonce: u64, payload: TxPayload) -> Bytes {
        Transaction::new(validator, nonce, payload)
            .sign(&key(validator as u8 + 1))
            .unwrap()
            .encode()
            .unwrap()
    }

    fn transfer(validator: u64, nonce: u64, amount: u128) -> Bytes {
        let to = address(if validator == 0 { 2 } else { 1 });
        signed(validator, nonce, TxPayload::Transfer(TransferTx { to, amount }))
    }

    fn proposal(validator: u64, nonce: u64) -> Bytes {
        signed(
            validator,
            nonce,
            TxPayload::Proposal(ProposalTx { proposer: "alice".into(), data: "fund docs".into() }),
        )
    }

    fn grant(validator: u64) -> Bytes {
        signed(
            validator,
            0,
            TxPayload::Grant(GrantTx {
                grants: vec![Grant {
                    grantee_pubkey: public_key_hex(&key(9)),
                    amount: 50,
                    statement: "new maintainer".into(),
                }],
            }),
        )
    }

    fn finalize(
        app: &App<MemoryStore>,
        height: u64,
        txs: Vec<Bytes>,
        vote: VoteCode,
    ) -> Result<FinalizeBlockResponse> {
        app.finalize_block(FinalizeBlockRequest {
            height,
            proposer: address(1),
            txs,
            vote_code: vote.as_i64(),
        })
    }

    #[test]
    fn test_check_tx_codes() {
        let app = app();
        assert!(app.check_tx(CheckTxRequest { tx: transfer(0, 0, 5) }).is_ok());
        assert_eq!(
            app.check_tx(CheckTxRequest { tx: Bytes::from_static(b"junk") }).code,
            CODE_DECODE_FAILED
        );
        let payload = TxPayload::Transfer(TransferTx { to: address(2), amount: 1 });
        let forged = Transaction::new(0, 0, payload)
            .sign(&key(7))
            .unwrap()
            .encode()
            .unwrap();
        assert_eq!(app.check_tx(CheckTxRequest { tx: forged }).code, CODE_VERIFY_FAILED);
    }

    #[test]
    fn test_check_tx_does_not_see_block_in_progress() {
        let app = app();
        finalize(&app, 1, vec![transfer(0, 0, 5)], VoteCode::NoAction).unwrap();
        // The pending block consumed nonce 0, but the canonical state has not.
        assert!(app.check_tx(CheckTxRequest { tx: transfer(0, 0, 5) }).is_ok());
    }

    #[test]
    fn test_prepare_keeps_only_proposer_governance() {
        let app = app();
        let resp = app.prepare_proposal(PrepareProposalRequest {
            height: 1,
            proposer: address(1),
            txs: vec![proposal(1, 0), proposal(0, 0), proposal(0, 1), transfer(1, 0, 3)],
            max_tx_bytes: -1,
        });
        assert_eq!(resp.txs, vec![proposal(0, 0), transfer(1, 0, 3)]);
    }

    #[test]
    fn test_prepare_unknown_proposer_drops_governance() {
        let app = app();
        let resp = app.prepare_proposal(PrepareProposalRequest {
            height: 1,
            proposer: "00".repeat(20),
            txs: vec![proposal(0, 0), transfer(0, 0, 3)],
            max_tx_bytes: -1,
        });
        assert_eq!(resp.txs, vec![transfer(0, 0, 3)]);
    }

    #[test]
    fn test_prepare_drops_failing_and_sequences_nonces() {
        let app = app();
        let resp = app.prepare_proposal(PrepareProposalRequest {
            height: 1,
            proposer: address(1),
            txs: vec![
                transfer(0, 0, 600),
                transfer(0, 1, 600),
                transfer(0, 1, 100),
                Bytes::from_static(b"junk"),
            ],
            max_tx_bytes: -1,
        });
        assert_eq!(resp.txs, vec![transfer(0, 0, 600), transfer(0, 1, 100)]);
    }

    #[test]
    fn test_prepare_respects_byte_budget() {
        let app = app();
        let first = transfer(0, 0, 1);
        let resp = app.prepare_proposal(PrepareProposalRequest {
            height: 1,
            proposer: address(1),
            txs: vec![first.clone(), transfer(1, 0, 1)],
            max_tx_bytes: first.len() as i64,
        });
        assert_eq!(resp.txs, vec![first]);
    }

    #[test]
    fn test_process_empty_and_double_governance() {
        let app = app();
        let empty = app.process_proposal(ProcessProposalRequest {
            height: 1,
            proposer: address(1),
            txs: vec![],
        });
        assert!(empty.is_accepted());
        assert_eq!(empty.vote_code, VoteCode::NoAction.as_i64());

        let double = app.process_proposal(ProcessProposalRequest {
            height: 1,
            proposer: address(1),
            txs: vec![proposal(0, 0), proposal(1, 0)],
        });
        assert!(!double.is_accepted());
    }

    #[test]
    fn test_process_rejects_failed_tx() {
        let app = app();
        let resp = app.process_proposal(ProcessProposalRequest {
            height: 1,
            proposer: address(1),
            txs: vec![transfer(0, 0, 5000)],
        });
        assert!(!resp.is_accepted());
    }

    #[test]
    fn test_grant_block_updates_validators() {
        let app = app();
        let processed = app.process_proposal(ProcessProposalRequest {
            height: 1,
            proposer: address(1),
            txs: vec![grant(0)],
        });
        assert_eq!(processed.vote_code, VoteCode::GrantNewMember.as_i64());
        let resp = finalize(&app, 1, vec![grant(0)], VoteCode::GrantNewMember).unwrap();
        assert_eq!(resp.tx_results[0].code, 0);
        assert_eq!(resp.validator_updates.len(), 1);
        assert_eq!(resp.events[0].kind, crate::core::events::EVENT_UPDATE_VALIDATORS);
        app.commit().unwrap();
        assert_eq!(app.store().canonical().current_validators().len(), 3);
    }

    #[test]
    fn test_commit_clears_slot_and_records_info() {
        let app = app();
        let resp = finalize(&app, 1, vec![transfer(0, 0, 5)], VoteCode::NoAction).unwrap();
        assert!(app.has_pending_block());
        let committed = app.commit().unwrap();
        assert!(!app.has_pending_block());
        assert_eq!(committed.app_hash, resp.app_hash);
        assert_eq!(app.info().last_height, 1);
        assert_eq!(app.info().last_app_hash, resp.app_hash);
        assert!(matches!(app.commit(), Err(ConcordError::Lifecycle(_))));
    }

    #[test]
    fn test_failed_finalize_clears_slot() {
        let app = app();
        assert!(finalize(&app, 1, vec![transfer(0, 3, 5)], VoteCode::NoAction).is_err());
        assert!(!app.has_pending_block());
        let unknown_vote = app.finalize_block(FinalizeBlockRequest {
            height: 1,
            proposer: address(1),
            txs: vec![],
            vote_code: 42,
        });
        assert!(unknown_vote.is_err());
        assert!(!app.has_pending_block());
    }

    #[test]
    fn test_finalize_discards_leftover_working_state() {
        let app = app();
        finalize(&app, 1, vec![transfer(0, 0, 5)], VoteCode::NoAction).unwrap();
        // Same nonce again: only valid if the uncommitted block was discarded.
        finalize(&app, 1, vec![transfer(0, 0, 7)], VoteCode::NoAction).unwrap();
        app.commit().unwrap();
        assert_eq!(app.store().canonical().account(0).unwrap().balance, 993);
    }
}
