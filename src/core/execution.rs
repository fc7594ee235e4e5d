//! Built-in transaction handlers for [`MemoryState`].
//!
//! One handler per [`TxType`]. `check` looks at payload shape only; `process` (and therefore
//! `prepare`) applies the transaction, bumps the signer's nonce and emits a `tx.<type>` event.
//! Governance handlers act on the block [`VoteCode`]; a vote that does not decide their type
//! fails the transaction with [`CODE_VOTE_MISMATCH`].
//!
//! **Determinism:** handlers read nothing but the state, the transaction, the vote code and the
//! block context. Non-zero result codes leave the state untouched.

use std::sync::{Arc, PoisonError, RwLock};

use crate::core::events::Event;
use crate::core::handler::{BlockContext, HandlerError, HandlerRegistry, TxHandler, TxResult};
use crate::core::state::{
    GrantRecord, MemoryState, ProposalStatus, StateError, Validator, WorldState,
};
use crate::core::transaction::{Transaction, TxPayload, TxType};
use crate::core::vote::VoteCode;
use crate::signature::address_from_pubkey;

/// Voting power given to a newly granted member.
pub const MEMBER_POWER: u64 = 10;

pub const CODE_INSUFFICIENT_FUNDS: u32 = 2;
pub const CODE_VOTE_MISMATCH: u32 = 3;
pub const CODE_BAD_PAYLOAD: u32 = 7;
pub const CODE_PROPOSAL_NOT_ACTIVE: u32 = 8;
pub const CODE_UNKNOWN_RECIPIENT: u32 = 9;

/// Holds the block context installed by `reset_context`.
#[derive(Debug, Default)]
struct ContextCell(RwLock<BlockContext>);

impl ContextCell {
    fn set(&self, ctx: &BlockContext) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = ctx.clone();
    }

    fn height(&self) -> u64 {
        self.0.read().unwrap_or_else(PoisonError::into_inner).height
    }
}

fn tx_event(tx_type: TxType, height: u64, signer: u64) -> Event {
    Event::new(format!("tx.{}", tx_type))
        .with_attr("height", height)
        .with_attr("signer", signer)
}

fn state_failure(tx_type: TxType, err: StateError) -> HandlerError {
    HandlerError::Execution(tx_type, err.to_string())
}

fn bump(state: &mut MemoryState, tx: &Transaction) -> Result<(), HandlerError> {
    state
        .bump_nonce(tx.validator)
        .map_err(|e| state_failure(tx.tx_type(), e))
}

/// Failure result unless `vote` decides transactions of `tx_type`.
fn vote_mismatch(tx_type: TxType, vote: VoteCode) -> Option<TxResult> {
    if vote.governs() == Some(tx_type) {
        return None;
    }
    Some(TxResult::failed(
        CODE_VOTE_MISMATCH,
        format!("vote code {} does not decide a {} transaction", vote, tx_type),
    ))
}

fn is_address(s: &str) -> bool {
    s.len() == 40 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

#[derive(Debug, Default)]
pub struct TransferHandler {
    ctx: ContextCell,
}

impl TxHandler<MemoryState> for TransferHandler {
    fn reset_context(&self, ctx: &BlockContext) {
        self.ctx.set(ctx);
    }

    fn check(&self, _state: &MemoryState, tx: &Transaction) -> Result<TxResult, HandlerError> {
        let TxPayload::Transfer(body) = &tx.payload else {
            return Err(HandlerError::WrongPayload(TxType::Transfer));
        };
        if body.amount == 0 {
            return Ok(TxResult::failed(CODE_BAD_PAYLOAD, "transfer amount must be positive"));
        }
        if !is_address(&body.to) {
            return Ok(TxResult::failed(CODE_BAD_PAYLOAD, "malformed recipient address"));
        }
        Ok(TxResult::ok())
    }

    fn process(
        &self,
        state: &mut MemoryState,
        tx: &Transaction,
        _vote: VoteCode,
    ) -> Result<TxResult, HandlerError> {
        let shape = self.check(state, tx)?;
        if !shape.is_ok() {
            return Ok(shape);
        }
        let TxPayload::Transfer(body) = &tx.payload else {
            return Err(HandlerError::WrongPayload(TxType::Transfer));
        };
        match state.transfer(tx.validator, &body.to, body.amount) {
            Ok(()) => {}
            Err(StateError::InsufficientBalance { required, available }) => {
                return Ok(TxResult::failed(
                    CODE_INSUFFICIENT_FUNDS,
                    format!("insufficient funds: need {}, have {}", required, available),
                ))
            }
            Err(StateError::UnknownAddress(addr)) => {
                return Ok(TxResult::failed(
                    CODE_UNKNOWN_RECIPIENT,
                    format!("unknown recipient {}", addr),
                ))
            }
            Err(e) => return Err(state_failure(TxType::Transfer, e)),
        }
        bump(state, tx)?;
        Ok(TxResult::ok().with_event(
            tx_event(TxType::Transfer, self.ctx.height(), tx.validator)
                .with_attr("to", &body.to)
                .with_attr("amount", body.amount),
        ))
    }
}

/// Membership grants. An approved grantee is credited (created if new) and staged as a
/// validator with [`MEMBER_POWER`]; a rejection is recorded without moving funds.
#[derive(Debug, Default)]
pub struct GrantHandler {
    ctx: ContextCell,
}

impl TxHandler<MemoryState> for GrantHandler {
    fn reset_context(&self, ctx: &BlockContext) {
        self.ctx.set(ctx);
    }

    fn check(&self, _state: &MemoryState, tx: &Transaction) -> Result<TxResult, HandlerError> {
        let TxPayload::Grant(body) = &tx.payload else {
            return Err(HandlerError::WrongPayload(TxType::Grant));
        };
        let [grant] = body.grants.as_slice() else {
            return Ok(TxResult::failed(
                CODE_BAD_PAYLOAD,
                format!("expected exactly one grant, got {}", body.grants.len()),
            ));
        };
        if address_from_pubkey(&grant.grantee_pubkey).is_err() {
            return Ok(TxResult::failed(CODE_BAD_PAYLOAD, "malformed grantee public key"));
        }
        Ok(TxResult::ok())
    }

    fn process(
        &self,
        state: &mut MemoryState,
        tx: &Transaction,
        vote: VoteCode,
    ) -> Result<TxResult, HandlerError> {
        let shape = self.check(state, tx)?;
        if !shape.is_ok() {
            return Ok(shape);
        }
        let TxPayload::Grant(body) = &tx.payload else {
            return Err(HandlerError::WrongPayload(TxType::Grant));
        };
        let grant = &body.grants[0];
        let grantee = address_from_pubkey(&grant.grantee_pubkey)
            .map_err(|e| HandlerError::Execution(TxType::Grant, e.to_string()))?;

        if let Some(mismatch) = vote_mismatch(TxType::Grant, vote) {
            return Ok(mismatch);
        }
        let approved = vote == VoteCode::GrantNewMember;
        if approved {
            match state.account_by_address(&grantee).map(|a| a.index) {
                Some(index) => state
                    .credit(index, grant.amount)
                    .map_err(|e| state_failure(TxType::Grant, e))?,
                None => {
                    state
                        .create_account(&grant.grantee_pubkey, grant.amount)
                        .map_err(|e| state_failure(TxType::Grant, e))?;
                }
            }
            if state.current_validators().get(&grantee).is_none() {
                state.stage_validator(Validator {
                    address: grantee.clone(),
                    pubkey: grant.grantee_pubkey.clone(),
                    power: MEMBER_POWER,
                });
            }
        }
        state.record_grant(GrantRecord {
            grantee: grantee.clone(),
            amount: grant.amount,
            statement: grant.statement.clone(),
            approved,
        });
        bump(state, tx)?;
        Ok(TxResult::ok().with_event(
            tx_event(TxType::Grant, self.ctx.height(), tx.validator)
                .with_attr("grantee", grantee)
                .with_attr("amount", grant.amount)
                .with_attr("approved", approved),
        ))
    }
}

#[derive(Debug, Default)]
pub struct ProposalHandler {
    ctx: ContextCell,
}

impl TxHandler<MemoryState> for ProposalHandler {
    fn reset_context(&self, ctx: &BlockContext) {
        self.ctx.set(ctx);
    }

    fn check(&self, _state: &MemoryState, tx: &Transaction) -> Result<TxResult, HandlerError> {
        let TxPayload::Proposal(body) = &tx.payload else {
            return Err(HandlerError::WrongPayload(TxType::Proposal));
        };
        if body.proposer.trim().is_empty() {
            return Ok(TxResult::failed(CODE_BAD_PAYLOAD, "proposal needs a proposer"));
        }
        Ok(TxResult::ok())
    }

    fn process(
        &self,
        state: &mut MemoryState,
        tx: &Transaction,
        vote: VoteCode,
    ) -> Result<TxResult, HandlerError> {
        let shape = self.check(state, tx)?;
        if !shape.is_ok() {
            return Ok(shape);
        }
        let TxPayload::Proposal(body) = &tx.payload else {
            return Err(HandlerError::WrongPayload(TxType::Proposal));
        };
        if let Some(mismatch) = vote_mismatch(TxType::Proposal, vote) {
            return Ok(mismatch);
        }
        let status = if vote == VoteCode::ProcessProposal {
            ProposalStatus::Active
        } else {
            ProposalStatus::Ignored
        };
        let id = state.insert_proposal(
            tx.validator,
            body.proposer.clone(),
            body.data.clone(),
            status,
        );
        bump(state, tx)?;
        Ok(TxResult::ok().with_event(
            tx_event(TxType::Proposal, self.ctx.height(), tx.validator)
                .with_attr("proposal", id)
                .with_attr("status", format!("{:?}", status)),
        ))
    }
}

#[derive(Debug, Default)]
pub struct SettleProposalHandler {
    ctx: ContextCell,
}

impl TxHandler<MemoryState> for SettleProposalHandler {
    fn reset_context(&self, ctx: &BlockContext) {
        self.ctx.set(ctx);
    }

    fn check(&self, _state: &MemoryState, tx: &Transaction) -> Result<TxResult, HandlerError> {
        match &tx.payload {
            TxPayload::SettleProposal(_) => Ok(TxResult::ok()),
            _ => Err(HandlerError::WrongPayload(TxType::SettleProposal)),
        }
    }

    fn process(
        &self,
        state: &mut MemoryState,
        tx: &Transaction,
        vote: VoteCode,
    ) -> Result<TxResult, HandlerError> {
        let TxPayload::SettleProposal(body) = &tx.payload else {
            return Err(HandlerError::WrongPayload(TxType::SettleProposal));
        };
        if let Some(mismatch) = vote_mismatch(TxType::SettleProposal, vote) {
            return Ok(mismatch);
        }
        let status = if vote == VoteCode::AcceptProposal {
            ProposalStatus::Accepted
        } else {
            ProposalStatus::Rejected
        };
        if state.proposal(body.proposal).map(|p| p.status) != Some(ProposalStatus::Active) {
            return Ok(TxResult::failed(
                CODE_PROPOSAL_NOT_ACTIVE,
                format!("proposal {} is not active", body.proposal),
            ));
        }
        state
            .set_proposal_status(body.proposal, status)
            .map_err(|e| state_failure(TxType::SettleProposal, e))?;
        bump(state, tx)?;
        Ok(TxResult::ok().with_event(
            tx_event(TxType::SettleProposal, self.ctx.height(), tx.validator)
                .with_attr("proposal", body.proposal)
                .with_attr("status", format!("{:?}", status)),
        ))
    }
}

/// Comments on an active proposal. Not a governance action; ignores the vote code.
#[derive(Debug, Default)]
pub struct DiscussionHandler {
    ctx: ContextCell,
}

impl TxHandler<MemoryState> for DiscussionHandler {
    fn reset_context(&self, ctx: &BlockContext) {
        self.ctx.set(ctx);
    }

    fn check(&self, _state: &MemoryState, tx: &Transaction) -> Result<TxResult, HandlerError> {
        let TxPayload::Discussion(body) = &tx.payload else {
            return Err(HandlerError::WrongPayload(TxType::Discussion));
        };
        if body.comment.trim().is_empty() {
            return Ok(TxResult::failed(CODE_BAD_PAYLOAD, "empty comment"));
        }
        Ok(TxResult::ok())
    }

    fn process(
        &self,
        state: &mut MemoryState,
        tx: &Transaction,
        _vote: VoteCode,
    ) -> Result<TxResult, HandlerError> {
        let shape = self.check(state, tx)?;
        if !shape.is_ok() {
            return Ok(shape);
        }
        let TxPayload::Discussion(body) = &tx.payload else {
            return Err(HandlerError::WrongPayload(TxType::Discussion));
        };
        if state.proposal(body.proposal).map(|p| p.status) != Some(ProposalStatus::Active) {
            return Ok(TxResult::failed(
                CODE_PROPOSAL_NOT_ACTIVE,
                format!("proposal {} is not open for discussion", body.proposal),
            ));
        }
        state
            .append_discussion(body.proposal, body.comment.clone())
            .map_err(|e| state_failure(TxType::Discussion, e))?;
        bump(state, tx)?;
        Ok(TxResult::ok().with_event(
            tx_event(TxType::Discussion, self.ctx.height(), tx.validator)
                .with_attr("proposal", body.proposal),
        ))
    }
}

/// Registry with every built-in handler.
pub fn default_registry() -> HandlerRegistry<MemoryState> {
    HandlerRegistry::builder()
        .register(TxType::Transfer, Arc::new(TransferHandler::default()))
        .register(TxType::Grant, Arc::new(GrantHandler::default()))
        .register(TxType::Proposal, Arc::new(ProposalHandler::default()))
        .register(TxType::SettleProposal, Arc::new(SettleProposalHandler::default()))
        .register(TxType::Discussion, Arc::new(DiscussionHandler::default()))
        .build()
}
