//! Governance oracle: the external yes/no decision service for grants, proposals and settlements.

use thiserror::Error;

use crate::config::OracleConfig;
use crate::error::ConcordError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("oracle unavailable: {0}")]
    Unavailable(String),

    #[error("oracle timed out")]
    Timeout,
}

impl From<OracleError> for ConcordError {
    fn from(err: OracleError) -> Self {
        ConcordError::Oracle(err.to_string())
    }
}

/// Decision queries. Implementations may call out to a remote service; transport failures are
/// reported as [`OracleError`] and never turned into a decision.
pub trait GovernanceOracle: Send + Sync {
    fn grant_decision(&self, amount: u128, statement: &str) -> Result<bool, OracleError>;

    fn proposal_decision(&self, proposer: &str, data: &str) -> Result<bool, OracleError>;

    fn settlement_decision(&self, proposal: u64) -> Result<bool, OracleError>;
}

/// Local oracle driven by [`OracleConfig`].
#[derive(Debug, Clone)]
pub struct PolicyOracle {
    config: OracleConfig,
    blocked: Vec<String>,
}

impl PolicyOracle {
    pub fn new(config: OracleConfig) -> Self {
        let blocked = config
            .blocked_words
            .iter()
            .map(|w| w.to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        Self { config, blocked }
    }
}

impl GovernanceOracle for PolicyOracle {
    fn grant_decision(&self, amount: u128, statement: &str) -> Result<bool, OracleError> {
        if amount == 0 || amount > self.config.max_grant_amount {
            return Ok(false);
        }
        let statement = statement.to_lowercase();
        Ok(!self.blocked.iter().any(|w| statement.contains(w.as_str())))
    }

    fn proposal_decision(&self, _proposer: &str, data: &str) -> Result<bool, OracleError> {
        Ok(self.config.accept_proposals && !data.trim().is_empty())
    }

    fn settlement_decision(&self, _proposal: u64) -> Result<bool, OracleError> {
        Ok(self.config.accept_settlements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oracle() -> PolicyOracle {
        PolicyOracle::new(OracleConfig {
            max_grant_amount: 100,
            accept_proposals: true,
            accept_settlements: false,
            blocked_words: vec!["Spam".into(), "".into()],
        })
    }

    #[test]
    fn test_grant_amount_bounds() {
        let o = oracle();
        assert_eq!(o.grant_decision(100, "builder"), Ok(true));
        assert_eq!(o.grant_decision(101, "builder"), Ok(false));
        assert_eq!(o.grant_decision(0, "builder"), Ok(false));
    }

    #[test]
    fn test_grant_blocked_words_case_insensitive() {
        assert_eq!(oracle().grant_decision(10, "pure SPAM account"), Ok(false));
    }

    #[test]
    fn test_proposal_and_settlement_policy() {
        let o = oracle();
        assert_eq!(o.proposal_decision("alice", "fund docs"), Ok(true));
        assert_eq!(o.proposal_decision("alice", "   "), Ok(false));
        assert_eq!(o.settlement_decision(3), Ok(false));
    }
}
