//! Admission gate: transaction parsing shared by every lifecycle stage, and the block vote-code
//! computation that enforces a single governance action per block.

use thiserror::Error;
use tracing::{debug, warn};

use crate::core::oracle::{GovernanceOracle, OracleError};
use crate::core::state::{NonceMode, WorldState};
use crate::core::transaction::{Grant, GrantTx, Transaction, TxPayload};
use crate::core::vote::VoteCode;
use crate::error::{ConcordError, Result};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("multiple governance actions in one block")]
    MultipleGovernanceActions,

    #[error("only one grant per transaction is supported, got {0}")]
    OnlyOneGrantSupported(usize),

    #[error(transparent)]
    Oracle(#[from] OracleError),
}

impl From<AdmissionError> for ConcordError {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::Oracle(e) => e.into(),
            other => ConcordError::Governance(other.to_string()),
        }
    }
}

/// Decodes `raw` and verifies it against `state` under `mode`.
///
/// This is the single verification routine for every stage; the stages differ only in the
/// nonce mode and in what they do with a failure.
pub fn parse_transaction<S: WorldState>(
    state: &S,
    raw: &[u8],
    mode: NonceMode,
) -> Result<Transaction> {
    let tx = Transaction::decode(raw)?;
    state.verify(&tx, mode)?;
    Ok(tx)
}

fn claim_action(acted: &mut bool) -> std::result::Result<(), AdmissionError> {
    if *acted {
        return Err(AdmissionError::MultipleGovernanceActions);
    }
    *acted = true;
    Ok(())
}

fn single_grant(grant: &GrantTx) -> std::result::Result<&Grant, AdmissionError> {
    match grant.grants.as_slice() {
        [only] => Ok(only),
        grants => Err(AdmissionError::OnlyOneGrantSupported(grants.len())),
    }
}

/// Scans `txs` for the block's governance action and resolves it into a vote code.
///
/// Entries that fail to parse are skipped. A second governance transaction fails the whole scan,
/// as does a grant transaction without exactly one grant or an oracle failure. Returns
/// [`VoteCode::NoAction`] when the batch has no governance transaction.
pub fn compute_vote_code<S, T>(
    oracle: &dyn GovernanceOracle,
    state: &S,
    txs: &[T],
) -> std::result::Result<VoteCode, AdmissionError>
where
    S: WorldState,
    T: AsRef<[u8]>,
{
    let mut acted = false;
    let mut code = VoteCode::NoAction;
    for (index, raw) in txs.iter().enumerate() {
        let tx = match parse_transaction(state, raw.as_ref(), NonceMode::AllowGap) {
            Ok(tx) => tx,
            Err(error) => {
                warn!(index, %error, "skipping unparsable transaction in vote-code scan");
                continue;
            }
        };
        let pass = match &tx.payload {
            TxPayload::Transfer(_) | TxPayload::Discussion(_) => continue,
            TxPayload::Grant(grant) => {
                claim_action(&mut acted)?;
                let grant = single_grant(grant)?;
                oracle.grant_decision(grant.amount, &grant.statement)?
            }
            TxPayload::Proposal(proposal) => {
                claim_action(&mut acted)?;
                oracle.proposal_decision(&proposal.proposer, &proposal.data)?
            }
            TxPayload::SettleProposal(settle) => {
                claim_action(&mut acted)?;
                oracle.settlement_decision(settle.proposal)?
            }
        };
        code = VoteCode::from_decision(tx.tx_type(), pass).unwrap_or_default();
        debug!(
            index,
            tx_type = %tx.tx_type(),
            pass,
            vote_code = %code,
            "governance action resolved"
        );
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GenesisAccount, GenesisConfig};
    use crate::core::state::MemoryState;
    use crate::core::transaction::{ProposalTx, SettleProposalTx, TransferTx};
    use crate::signature::public_key_hex;
    use bytes::Bytes;
    use secp256k1::SecretKey;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedOracle {
        answer: std::result::Result<bool, OracleError>,
        calls: AtomicUsize,
    }

    impl FixedOracle {
        fn new(answer: std::result::Result<bool, OracleError>) -> Self {
            Self { answer, calls: AtomicUsize::new(0) }
        }
        fn answer(&self) -> std::result::Result<bool, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone()
        }
    }

    impl GovernanceOracle for FixedOracle {
        fn grant_decision(&self, _: u128, _: &str) -> std::result::Result<bool, OracleError> {
            self.answer()
        }
        fn proposal_decision(&self, _: &str, _: &str) -> std::result::Result<bool, OracleError> {
            self.answer()
        }
        fn settlement_decision(&self, _: u64) -> std::result::Result<bool, OracleError> {
            self.answer()
        }
    }

    fn key(n: u8) -> SecretKey {
        SecretKey::from_slice(&[n; 32]).unwrap()
    }

    fn state() -> MemoryState {
        MemoryState::from_genesis(&GenesisConfig {
            accounts: vec![
                GenesisAccount { pubkey: public_key_hex(&key(1)), balance: 100, power: 10 },
                GenesisAccount { pubkey: public_key_hex(&key(2)), balance: 100, power: 10 },
            ],
        })
        .unwrap()
    }

    fn signed(validator: u64, nonce: u64, payload: TxPayload) -> Bytes {
        Transaction::new(validator, nonce, payload)
            .sign(&key(validator as u8 + 1))
            .unwrap()
            .encode()
            .unwrap()
    }

    fn grant_tx(validator: u64, count: usize) -> Bytes {
        let grants = (0..count)
            .map(|i| Grant {
                grantee_pubkey: public_key_hex(&key(50 + i as u8)),
                amount: 10,
                statement: "contributor".into(),
            })
            .collect();
        signed(validator, 0, TxPayload::Grant(GrantTx { grants }))
    }

    fn proposal_tx(validator: u64) -> Bytes {
        signed(
            validator,
            0,
            TxPayload::Proposal(ProposalTx { proposer: "alice".into(), data: "fund docs".into() }),
        )
    }

    #[test]
    fn test_no_governance_is_no_action() {
        let oracle = FixedOracle::new(Ok(true));
        let to = state().account(1).unwrap().address.clone();
        let txs = vec![signed(0, 0, TxPayload::Transfer(TransferTx { to, amount: 1 }))];
        assert_eq!(compute_vote_code(&oracle, &state(), &txs), Ok(VoteCode::NoAction));
        assert_eq!(compute_vote_code::<_, Bytes>(&oracle, &state(), &[]), Ok(VoteCode::NoAction));
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_single_grant_accepted_and_rejected() {
        let txs = vec![grant_tx(0, 1)];
        assert_eq!(
            compute_vote_code(&FixedOracle::new(Ok(true)), &state(), &txs),
            Ok(VoteCode::GrantNewMember)
        );
        assert_eq!(
            compute_vote_code(&FixedOracle::new(Ok(false)), &state(), &txs),
            Ok(VoteCode::RejectNewMember)
        );
    }

    #[test]
    fn test_grant_count_must_be_one_regardless_of_oracle() {
        for count in [0, 2] {
            for answer in [true, false] {
                let oracle = FixedOracle::new(Ok(answer));
                assert_eq!(
                    compute_vote_code(&oracle, &state(), &[grant_tx(0, count)]),
                    Err(AdmissionError::OnlyOneGrantSupported(count))
                );
                assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
            }
        }
    }

    #[test]
    fn test_two_governance_actions_fail() {
        let oracle = FixedOracle::new(Ok(true));
        let txs = vec![proposal_tx(0), proposal_tx(1)];
        assert_eq!(
            compute_vote_code(&oracle, &state(), &txs),
            Err(AdmissionError::MultipleGovernanceActions)
        );
        let mixed = vec![
            proposal_tx(0),
            signed(1, 0, TxPayload::SettleProposal(SettleProposalTx { proposal: 0 })),
        ];
        assert_eq!(
            compute_vote_code(&oracle, &state(), &mixed),
            Err(AdmissionError::MultipleGovernanceActions)
        );
    }

    #[test]
    fn test_undecodable_entries_are_skipped() {
        let oracle = FixedOracle::new(Ok(false));
        let txs = vec![Bytes::from_static(b"garbage"), proposal_tx(0), Bytes::new()];
        assert_eq!(compute_vote_code(&oracle, &state(), &txs), Ok(VoteCode::IgnoreProposal));
    }

    #[test]
    fn test_oracle_failure_propagates() {
        let oracle = FixedOracle::new(Err(OracleError::Timeout));
        assert_eq!(
            compute_vote_code(&oracle, &state(), &[proposal_tx(0)]),
            Err(AdmissionError::Oracle(OracleError::Timeout))
        );
    }

    #[test]
    fn test_parse_transaction_modes() {
        let st = state();
        let payload = TxPayload::Proposal(ProposalTx { proposer: "a".into(), data: "b".into() });
        let ahead = signed(0, 3, payload);
        assert!(parse_transaction(&st, &ahead, NonceMode::AllowGap).is_ok());
        assert!(matches!(
            parse_transaction(&st, &ahead, NonceMode::Strict),
            Err(ConcordError::Verification(_))
        ));
        assert!(matches!(
            parse_transaction(&st, b"junk", NonceMode::AllowGap),
            Err(ConcordError::Decode(_))
        ));
    }
}
