//! World state: accounts, validator set and governance records, plus the facade the lifecycle
//! consumes ([`WorldState`], [`StateStore`]).
//!
//! # Determinism
//! All collections are ordered maps, so iteration (and therefore hashing and validator diffs) is
//! independent of insertion history. No randomness or system time is used.
//!
//! # Invariants
//! - `clone()` is O(1) (`Arc` copy-on-write) and the clone is fully isolated: writes to the clone
//!   never reach the original.
//! - Validator-set changes are staged and only become visible to `current_validators()` after
//!   `update()`; the set observed during block execution is the pre-block set.
//! - `update()` bumps the state version and returns the commitment hash of the resulting state.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::GenesisConfig;
use crate::core::transaction::Transaction;
use crate::error::{ConcordError, Result};
use crate::signature::address_from_pubkey;

/// Address type: hex of the first 20 bytes of sha256(pubkey).
pub type Address = String;

/// Fixed-width state commitment.
pub type AppHash = [u8; 32];

/// Nonce policy applied by [`WorldState::verify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceMode {
    /// `tx.nonce` must equal the account nonce. Used when executing a block.
    Strict,
    /// `tx.nonce` may be ahead of the account nonce (out-of-order arrival into the pool).
    AllowGap,
}

/// Errors produced by state operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("Unknown account index {0}")]
    UnknownAccount(u64),

    #[error("Unknown address {0}")]
    UnknownAddress(String),

    #[error("Account already exists: {0}")]
    DuplicateAccount(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Nonce gap: expected {expected}, got {got}")]
    NonceGap { expected: u64, got: u64 },

    #[error("Nonce already used: expected {expected}, got {got}")]
    NonceReplay { expected: u64, got: u64 },

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: u128, available: u128 },

    #[error("Balance overflow crediting {amount} to account {index}")]
    BalanceOverflow { index: u64, amount: u128 },

    #[error("Unknown proposal {0}")]
    UnknownProposal(u64),

    #[error("Commit failed: {0}")]
    Commit(String),
}

impl From<StateError> for ConcordError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::Commit(msg) => ConcordError::StateCommit(msg),
            other => ConcordError::Verification(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub index: u64,
    pub address: Address,
    pub pubkey: String,
    pub balance: u128,
    pub nonce: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub address: Address,
    pub pubkey: String,
    /// Voting power. A staged power of 0 removes the validator.
    pub power: u64,
}

/// Validator-set diff entry. `power == 0` means removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorUpdate {
    pub pubkey: String,
    pub power: u64,
}

/// Validator set keyed by address (ordered).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidatorSet(BTreeMap<Address, Validator>);

impl ValidatorSet {
    pub fn get(&self, address: &str) -> Option<&Validator> {
        self.0.get(address)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total_power(&self) -> u64 {
        self.0.values().map(|v| v.power).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Validator> {
        self.0.values()
    }

    /// Diff from `previous` to `self`: added or reweighted validators carry their new power,
    /// removed ones carry power 0. Ordered by address.
    pub fn diff(&self, previous: &ValidatorSet) -> Vec<ValidatorUpdate> {
        let mut updates = Vec::new();
        for (addr, v) in &self.0 {
            match previous.0.get(addr) {
                Some(prev) if prev.power == v.power => {}
                _ => updates.push(ValidatorUpdate {
                    pubkey: v.pubkey.clone(),
                    power: v.power,
                }),
            }
        }
        for (addr, prev) in &previous.0 {
            if !self.0.contains_key(addr) {
                updates.push(ValidatorUpdate {
                    pubkey: prev.pubkey.clone(),
                    power: 0,
                });
            }
        }
        updates
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalStatus {
    Active,
    Ignored,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalRecord {
    pub id: u64,
    /// Index of the account that submitted the proposal.
    pub submitted_by: u64,
    pub proposer: String,
    pub data: String,
    pub status: ProposalStatus,
    pub discussion: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantRecord {
    pub grantee: Address,
    pub amount: u128,
    pub statement: String,
    pub approved: bool,
}

/// State operations the lifecycle depends on. Implementations must be deterministic and every
/// operation must only affect the instance it is invoked on.
pub trait WorldState: Clone + Send + Sync + 'static {
    /// Checks that `tx` may execute against this state: known signer, valid signature, nonce
    /// acceptable under `mode`. Returns the acting account.
    fn verify(&self, tx: &Transaction, mode: NonceMode) -> std::result::Result<Account, StateError>;

    fn find_account(&self, address: &str) -> std::result::Result<Account, StateError>;

    fn find_account_by_index(&self, index: u64) -> std::result::Result<Account, StateError>;

    /// Committed validator set (staged changes excluded).
    fn current_validators(&self) -> ValidatorSet;

    /// Applies staged changes, bumps the version and returns the commitment hash.
    fn update(&mut self) -> std::result::Result<AppHash, StateError>;

    fn validators_update(
        &self,
        previous: &ValidatorSet,
    ) -> std::result::Result<Vec<ValidatorUpdate>, StateError>;
}

/// Owner of the canonical state.
pub trait StateStore: Send + Sync {
    type State: WorldState;

    /// Isolated copy of the canonical (last committed) state.
    fn canonical(&self) -> Self::State;

    /// Makes `working` the canonical state and returns its commitment hash.
    fn adopt(&self, working: Self::State) -> std::result::Result<AppHash, StateError>;
}

/// In-memory world state with O(1) copy-on-write clones.
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    accounts: Arc<BTreeMap<u64, Account>>,
    by_address: Arc<BTreeMap<Address, u64>>,
    validators: Arc<BTreeMap<Address, Validator>>,
    /// Staged validator changes, applied on `update()`.
    pending_validators: Arc<BTreeMap<Address, Validator>>,
    proposals: Arc<BTreeMap<u64, ProposalRecord>>,
    grants: Arc<Vec<GrantRecord>>,
    version: u64,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the genesis state. Accounts with non-zero power become validators immediately.
    pub fn from_genesis(genesis: &GenesisConfig) -> Result<Self> {
        let mut state = Self::new();
        for entry in &genesis.accounts {
            let account = state.create_account(&entry.pubkey, entry.balance)?;
            if entry.power > 0 {
                Arc::make_mut(&mut state.validators).insert(
                    account.address.clone(),
                    Validator {
                        address: account.address,
                        pubkey: entry.pubkey.clone(),
                        power: entry.power,
                    },
                );
            }
        }
        Ok(state)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Creates an account for `pubkey` with the next free index.
    pub fn create_account(
        &mut self,
        pubkey: &str,
        balance: u128,
    ) -> std::result::Result<Account, StateError> {
        let address = address_from_pubkey(pubkey)
            .map_err(|e| StateError::InvalidSignature(e.to_string()))?;
        if self.by_address.contains_key(&address) {
            return Err(StateError::DuplicateAccount(address));
        }
        let index = self.accounts.len() as u64;
        let account = Account {
            index,
            address: address.clone(),
            pubkey: pubkey.to_string(),
            balance,
            nonce: 0,
        };
        Arc::make_mut(&mut self.accounts).insert(index, account.clone());
        Arc::make_mut(&mut self.by_address).insert(address, index);
        Ok(account)
    }

    pub fn account(&self, index: u64) -> Option<&Account> {
        self.accounts.get(&index)
    }

    pub fn account_by_address(&self, address: &str) -> Option<&Account> {
        self.by_address
            .get(&address.to_ascii_lowercase())
            .and_then(|idx| self.accounts.get(idx))
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    fn account_mut(&mut self, index: u64) -> std::result::Result<&mut Account, StateError> {
        Arc::make_mut(&mut self.accounts)
            .get_mut(&index)
            .ok_or(StateError::UnknownAccount(index))
    }

    /// Advances the account nonce by one.
    pub fn bump_nonce(&mut self, index: u64) -> std::result::Result<(), StateError> {
        let account = self.account_mut(index)?;
        account.nonce += 1;
        Ok(())
    }

    /// Adds `amount` to the balance. Overflow is rejected and leaves the balance unchanged.
    pub fn credit(&mut self, index: u64, amount: u128) -> std::result::Result<(), StateError> {
        let account = self.account_mut(index)?;
        account.balance = account
            .balance
            .checked_add(amount)
            .ok_or(StateError::BalanceOverflow { index, amount })?;
        Ok(())
    }

    /// Moves `amount` from account `from` to the account at `to`. Nothing changes on failure.
    pub fn transfer(
        &mut self,
        from: u64,
        to: &str,
        amount: u128,
    ) -> std::result::Result<(), StateError> {
        let (to_index, to_balance) = self
            .account_by_address(to)
            .map(|a| (a.index, a.balance))
            .ok_or_else(|| StateError::UnknownAddress(to.to_string()))?;
        let available = self
            .account(from)
            .map(|a| a.balance)
            .ok_or(StateError::UnknownAccount(from))?;
        if available < amount {
            return Err(StateError::InsufficientBalance {
                required: amount,
                available,
            });
        }
        if from != to_index && to_balance.checked_add(amount).is_none() {
            return Err(StateError::BalanceOverflow {
                index: to_index,
                amount,
            });
        }
        self.account_mut(from)?.balance = available - amount;
        self.credit(to_index, amount)
    }

    /// Stages a validator change; visible after the next `update()`.
    pub fn stage_validator(&mut self, validator: Validator) {
        Arc::make_mut(&mut self.pending_validators).insert(validator.address.clone(), validator);
    }

    pub fn pending_validator_count(&self) -> usize {
        self.pending_validators.len()
    }

    /// Records a new proposal and returns its id.
    pub fn insert_proposal(
        &mut self,
        submitted_by: u64,
        proposer: String,
        data: String,
        status: ProposalStatus,
    ) -> u64 {
        let id = self.proposals.keys().next_back().map_or(0, |last| last + 1);
        Arc::make_mut(&mut self.proposals).insert(
            id,
            ProposalRecord {
                id,
                submitted_by,
                proposer,
                data,
                status,
                discussion: Vec::new(),
            },
        );
        id
    }

    pub fn proposal(&self, id: u64) -> Option<&ProposalRecord> {
        self.proposals.get(&id)
    }

    pub fn set_proposal_status(
        &mut self,
        id: u64,
        status: ProposalStatus,
    ) -> std::result::Result<(), StateError> {
        let record = Arc::make_mut(&mut self.proposals)
            .get_mut(&id)
            .ok_or(StateError::UnknownProposal(id))?;
        record.status = status;
        Ok(())
    }

    pub fn append_discussion(
        &mut self,
        id: u64,
        comment: String,
    ) -> std::result::Result<(), StateError> {
        let record = Arc::make_mut(&mut self.proposals)
            .get_mut(&id)
            .ok_or(StateError::UnknownProposal(id))?;
        record.discussion.push(comment);
        Ok(())
    }

    pub fn record_grant(&mut self, grant: GrantRecord) {
        Arc::make_mut(&mut self.grants).push(grant);
    }

    pub fn grants(&self) -> &[GrantRecord] {
        &self.grants
    }

    /// Commitment over every field of every record, in key order. Variable-length fields are
    /// prefixed with their length so distinct records never share an encoding.
    pub fn app_hash(&self) -> AppHash {
        let mut hasher = Sha256::new();
        hasher.update(self.version.to_le_bytes());
        hasher.update((self.accounts.len() as u64).to_le_bytes());
        for account in self.accounts.values() {
            hasher.update(account.index.to_le_bytes());
            hash_str(&mut hasher, &account.address);
            hash_str(&mut hasher, &account.pubkey);
            hasher.update(account.balance.to_le_bytes());
            hasher.update(account.nonce.to_le_bytes());
        }
        hasher.update((self.validators.len() as u64).to_le_bytes());
        for validator in self.validators.values() {
            hash_str(&mut hasher, &validator.address);
            hash_str(&mut hasher, &validator.pubkey);
            hasher.update(validator.power.to_le_bytes());
        }
        hasher.update((self.proposals.len() as u64).to_le_bytes());
        for proposal in self.proposals.values() {
            hasher.update(proposal.id.to_le_bytes());
            hasher.update(proposal.submitted_by.to_le_bytes());
            hash_str(&mut hasher, &proposal.proposer);
            hash_str(&mut hasher, &proposal.data);
            hasher.update([proposal.status as u8]);
            hasher.update((proposal.discussion.len() as u64).to_le_bytes());
            for comment in &proposal.discussion {
                hash_str(&mut hasher, comment);
            }
        }
        hasher.update((self.grants.len() as u64).to_le_bytes());
        for grant in self.grants.iter() {
            hash_str(&mut hasher, &grant.grantee);
            hasher.update(grant.amount.to_le_bytes());
            hash_str(&mut hasher, &grant.statement);
            hasher.update([grant.approved as u8]);
        }
        hasher.finalize().into()
    }
}

fn hash_str(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

impl WorldState for MemoryState {
    fn verify(
        &self,
        tx: &Transaction,
        mode: NonceMode,
    ) -> std::result::Result<Account, StateError> {
        let account = self.find_account_by_index(tx.validator)?;
        match tx.verify_signature(&account.pubkey) {
            Ok(true) => {}
            Ok(false) => {
                return Err(StateError::InvalidSignature("signature mismatch".to_string()))
            }
            Err(e) => return Err(StateError::InvalidSignature(e.to_string())),
        }
        if tx.nonce < account.nonce {
            return Err(StateError::NonceReplay {
                expected: account.nonce,
                got: tx.nonce,
            });
        }
        if tx.nonce > account.nonce && mode == NonceMode::Strict {
            return Err(StateError::NonceGap {
                expected: account.nonce,
                got: tx.nonce,
            });
        }
        Ok(account)
    }

    fn find_account(&self, address: &str) -> std::result::Result<Account, StateError> {
        self.account_by_address(address)
            .cloned()
            .ok_or_else(|| StateError::UnknownAddress(address.to_string()))
    }

    fn find_account_by_index(&self, index: u64) -> std::result::Result<Account, StateError> {
        self.account(index)
            .cloned()
            .ok_or(StateError::UnknownAccount(index))
    }

    fn current_validators(&self) -> ValidatorSet {
        ValidatorSet(self.validators.as_ref().clone())
    }

    fn update(&mut self) -> std::result::Result<AppHash, StateError> {
        let pending = std::mem::take(Arc::make_mut(&mut self.pending_validators));
        let validators = Arc::make_mut(&mut self.validators);
        for (addr, v) in pending {
            if v.power == 0 {
                validators.remove(&addr);
            } else {
                validators.insert(addr, v);
            }
        }
        self.version = self
            .version
            .checked_add(1)
            .ok_or_else(|| StateError::Commit("state version overflow".to_string()))?;
        Ok(self.app_hash())
    }

    fn validators_update(
        &self,
        previous: &ValidatorSet,
    ) -> std::result::Result<Vec<ValidatorUpdate>, StateError> {
        if !self.pending_validators.is_empty() {
            return Err(StateError::Commit(
                "validator diff requested with staged changes".to_string(),
            ));
        }
        Ok(self.current_validators().diff(previous))
    }
}

/// Canonical-state holder for [`MemoryState`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    canonical: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new(state: MemoryState) -> Self {
        Self {
            canonical: RwLock::new(state),
        }
    }

    pub fn from_genesis(genesis: &GenesisConfig) -> Result<Self> {
        Ok(Self::new(MemoryState::from_genesis(genesis)?))
    }
}

impl StateStore for MemoryStore {
    type State = MemoryState;

    fn canonical(&self) -> MemoryState {
        self.canonical
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn adopt(&self, working: MemoryState) -> std::result::Result<AppHash, StateError> {
        if !working.pending_validators.is_empty() {
            return Err(StateError::Commit(
                "cannot adopt a state with staged validator changes".to_string(),
            ));
        }
        let hash = working.app_hash();
        let mut canonical = self
            .canonical
            .write()
            .map_err(|_| StateError::Commit("canonical state lock poisoned".to_string()))?;
        *canonical = working;
        Ok(hash)
    }
}
