//! Eligibility rules
//!
//! A vote carries a list of rules; a participant may vote only if every rule
//! holds against the context captured when the vote was opened. Evaluation
//! stops at the first failing rule, which is reported back for diagnostics.

use agora_core::{GovernanceError, ParticipantId, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Facts a rule can be checked against
pub trait EligibilityContext {
    fn balance(&self, token: &str, participant: &str) -> u64;
    fn reputation(&self, participant: &str) -> Option<u64>;
    fn is_member(&self, dao: &str, participant: &str) -> bool;
    /// Amount staked for at least `min_duration` ms
    fn staked_for(&self, participant: &str, min_duration: u64) -> u64;
    /// Time since registration
    fn account_age(&self, participant: &str) -> Option<u64>;
    fn is_authority(&self, participant: &str) -> bool;
    fn inviter(&self, participant: &str) -> Option<ParticipantId>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "kebab-case")]
pub enum EligibilityRule {
    TokenHolder { token: String, min: u64 },
    ReputationThreshold { min: u64 },
    DaoMember { dao: String },
    StakingRequirement { min: u64, min_duration_ms: u64 },
    AccountAge { min_ms: u64 },
    AuthorityFlag,
    InvitedBy { participant: ParticipantId },
}

impl fmt::Display for EligibilityRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EligibilityRule::TokenHolder { token, min } => write!(f, "token-holder({} >= {})", token, min),
            EligibilityRule::ReputationThreshold { min } => write!(f, "reputation >= {}", min),
            EligibilityRule::DaoMember { dao } => write!(f, "member of {}", dao),
            EligibilityRule::StakingRequirement {
                min,
                min_duration_ms,
            } => write!(f, "staking {} for {}ms", min, min_duration_ms),
            EligibilityRule::AccountAge { min_ms } => write!(f, "account age >= {}ms", min_ms),
            EligibilityRule::AuthorityFlag => f.write_str("authority"),
            EligibilityRule::InvitedBy { participant } => write!(f, "invited by {}", participant),
        }
    }
}

impl EligibilityRule {
    pub fn holds(&self, ctx: &dyn EligibilityContext, participant: &str) -> bool {
        match self {
            EligibilityRule::TokenHolder { token, min } => ctx.balance(token, participant) >= *min,
            EligibilityRule::ReputationThreshold { min } => {
                ctx.reputation(participant).is_some_and(|r| r >= *min)
            }
            EligibilityRule::DaoMember { dao } => ctx.is_member(dao, participant),
            EligibilityRule::StakingRequirement {
                min,
                min_duration_ms,
            } => ctx.staked_for(participant, *min_duration_ms) >= *min,
            EligibilityRule::AccountAge { min_ms } => {
                ctx.account_age(participant).is_some_and(|age| age >= *min_ms)
            }
            EligibilityRule::AuthorityFlag => ctx.is_authority(participant),
            EligibilityRule::InvitedBy { participant: inviter } => {
                ctx.inviter(participant).as_ref() == Some(inviter)
            }
        }
    }
}

/// First failing rule, if any
pub fn first_failure<'r>(
    rules: &'r [EligibilityRule],
    ctx: &dyn EligibilityContext,
    participant: &str,
) -> Option<&'r EligibilityRule> {
    rules.iter().find(|rule| !rule.holds(ctx, participant))
}

pub fn check(rules: &[EligibilityRule], ctx: &dyn EligibilityContext, participant: &str) -> Result<()> {
    match first_failure(rules, ctx, participant) {
        None => Ok(()),
        Some(rule) => Err(GovernanceError::IneligibleParticipant {
            participant: participant.to_string(),
            rule: rule.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Fixed {
        calls: Cell<usize>,
    }

    impl EligibilityContext for Fixed {
        fn balance(&self, _token: &str, participant: &str) -> u64 {
            self.calls.set(self.calls.get() + 1);
            if participant == "alice" {
                500
            } else {
                5
            }
        }
        fn reputation(&self, _participant: &str) -> Option<u64> {
            self.calls.set(self.calls.get() + 1);
            Some(80)
        }
        fn is_member(&self, dao: &str, participant: &str) -> bool {
            dao == "gov-1" && participant == "alice"
        }
        fn staked_for(&self, _participant: &str, min_duration: u64) -> u64 {
            if min_duration <= 1_000 {
                100
            } else {
                0
            }
        }
        fn account_age(&self, _participant: &str) -> Option<u64> {
            Some(10_000)
        }
        fn is_authority(&self, participant: &str) -> bool {
            participant == "alice"
        }
        fn inviter(&self, participant: &str) -> Option<ParticipantId> {
            (participant == "bob").then(|| "alice".into())
        }
    }

    #[test]
    fn test_short_circuits_on_first_failure() {
        let ctx = Fixed { calls: Cell::new(0) };
        let rules = vec![
            EligibilityRule::TokenHolder {
                token: "AGR".into(),
                min: 100,
            },
            EligibilityRule::ReputationThreshold { min: 50 },
        ];

        let failing = first_failure(&rules, &ctx, "bob").unwrap();
        assert_eq!(failing, &rules[0]);
        // reputation was never consulted
        assert_eq!(ctx.calls.get(), 1);

        assert!(check(&rules, &ctx, "alice").is_ok());
    }

    #[test]
    fn test_rule_variants() {
        let ctx = Fixed { calls: Cell::new(0) };
        let staking = EligibilityRule::StakingRequirement {
            min: 50,
            min_duration_ms: 500,
        };
        assert!(staking.holds(&ctx, "bob"));
        let long_staking = EligibilityRule::StakingRequirement {
            min: 50,
            min_duration_ms: 5_000,
        };
        assert!(!long_staking.holds(&ctx, "bob"));

        assert!(EligibilityRule::AccountAge { min_ms: 10_000 }.holds(&ctx, "bob"));
        assert!(EligibilityRule::AuthorityFlag.holds(&ctx, "alice"));
        assert!(!EligibilityRule::DaoMember { dao: "gov-1".into() }.holds(&ctx, "bob"));
        assert!(EligibilityRule::InvitedBy {
            participant: "alice".into()
        }
        .holds(&ctx, "bob"));
    }

    #[test]
    fn test_error_names_rule() {
        let ctx = Fixed { calls: Cell::new(0) };
        let rules = vec![EligibilityRule::AuthorityFlag];
        let err = check(&rules, &ctx, "bob").unwrap_err();
        assert_eq!(
            err,
            GovernanceError::IneligibleParticipant {
                participant: "bob".into(),
                rule: "authority".into()
            }
        );
    }
}
