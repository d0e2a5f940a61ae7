//! DAO container
//!
//! Holds the member roster, treasury, governance parameters and proposal set
//! of one governance, and routes proposal and vote operations through the
//! lifecycle. Callers hold the governance's lock for the whole call; on error
//! nothing observable has changed.

use crate::config::{GovernanceConfig, GovernanceKind};
use crate::executor::{DaoExecutor, DaoState};
use crate::membership::{Member, MembershipType, Roster};
use agora_core::{
    EntityKind, GovernanceError, GovernanceId, Participant, ParticipantId, ParticipantRegistry,
    ProposalId, Result, Score, VoteId,
};
use agora_governance::action::execute_all;
use agora_governance::{
    Action, ActionReport, BallotPayload, CastReceipt, Decision, GovernanceParams, Proposal,
    ProposalCatalogue, ProposalKind, ProposalPhase, ProposalSpec, ResolvedProposalType, Role,
    SupportReceipt, Vote, VoteContext,
};
use agora_ledger::{LockPurpose, TokenLedger};
use agora_treasury::{TreasuryPool, TreasurySource};
use log::{info, warn};
use std::collections::{BTreeMap, BTreeSet};

/// A vote that just opened
#[derive(Debug, Clone, PartialEq)]
pub struct VotingOpened {
    pub vote: VoteId,
    pub mechanism: String,
    pub closes_at: Option<u64>,
}

/// Where a proposal ended up after its vote closed
#[derive(Debug, Clone, PartialEq)]
pub struct VotingClosed {
    pub vote: VoteId,
    pub kind: ProposalKind,
    pub decision: Decision,
    pub phase: ProposalPhase,
    pub execute_at: Option<u64>,
    pub needs_ratification: bool,
    pub reason: Option<String>,
}

#[derive(Debug)]
pub struct Dao {
    pub id: GovernanceId,
    pub kind: GovernanceKind,
    pub config: GovernanceConfig,
    pub created_at: u64,
    catalogue: ProposalCatalogue,
    state: DaoState,
    proposals: Vec<Proposal>,
    next_proposal: u64,
    degraded: Option<String>,
}

impl Dao {
    pub fn new(id: GovernanceId, kind: GovernanceKind, config: GovernanceConfig, at: u64) -> Self {
        let state = DaoState::new(config.params.clone(), config.max_members);
        Self {
            id,
            kind,
            catalogue: config.catalogue(),
            config,
            created_at: at,
            state,
            proposals: Vec::new(),
            next_proposal: 0,
            degraded: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn token(&self) -> &str {
        self.config.token.symbol.as_str()
    }

    pub fn state(&self) -> &DaoState {
        &self.state
    }

    pub fn params(&self) -> &GovernanceParams {
        &self.state.params
    }

    pub fn roster(&self) -> &Roster {
        &self.state.roster
    }

    pub fn treasury(&self) -> &TreasuryPool {
        &self.state.treasury
    }

    pub fn degraded(&self) -> Option<&str> {
        self.degraded.as_deref()
    }

    /// Take the governance out of service; later mutations fail
    pub fn degrade(&mut self, reason: impl Into<String>) {
        if self.degraded.is_none() {
            let reason = reason.into();
            warn!("🚨 Governance {} degraded: {}", self.id, reason);
            self.degraded = Some(reason);
        }
    }

    pub fn ensure_active(&self) -> Result<()> {
        match &self.degraded {
            Some(reason) => Err(GovernanceError::InvariantViolation(format!(
                "governance {} is degraded: {}",
                self.id, reason
            ))),
            None => Ok(()),
        }
    }

    /// Membership sets visible to eligibility rules
    pub fn memberships(&self) -> BTreeMap<String, BTreeSet<ParticipantId>> {
        BTreeMap::from([(self.id.to_string(), self.state.roster.ids())])
    }

    /// Members with the authority role; they validate ratification rounds
    pub fn authorities(&self) -> Vec<ParticipantId> {
        self.state.roster.with_role(Role::Authority)
    }

    pub fn add_founder(&mut self, founder: &Participant, at: u64) -> Result<()> {
        self.state.roster.insert(Member::new(founder.id.clone(), Role::Admin, at))
    }

    pub fn add_member(
        &mut self,
        participant: &Participant,
        role: Role,
        invited_by: Option<&str>,
        provisional: bool,
        ledger: &TokenLedger,
        at: u64,
    ) -> Result<()> {
        self.ensure_active()?;
        if !participant.active {
            return Err(GovernanceError::IneligibleParticipant {
                participant: participant.id.to_string(),
                rule: "active participant".into(),
            });
        }
        let inviter = match invited_by {
            Some(id) => Some(self.state.roster.require(id)?),
            None => None,
        };
        match &self.config.membership {
            MembershipType::Open => {}
            MembershipType::InviteOnly => {
                if inviter.is_none() {
                    return Err(GovernanceError::PermissionDenied(format!(
                        "{} is invite-only",
                        self.id
                    )));
                }
            }
            gated @ MembershipType::TokenGated { token, min } => {
                let balance = ledger.balance(token, participant.id.as_str())?;
                if balance < *min {
                    return Err(GovernanceError::IneligibleParticipant {
                        participant: participant.id.to_string(),
                        rule: gated.to_string(),
                    });
                }
            }
        }
        if matches!(role, Role::Admin | Role::Authority | Role::Guardian)
            && !inviter.is_some_and(|m| m.role == Role::Admin)
        {
            return Err(GovernanceError::PermissionDenied(format!(
                "only an admin may admit a {}",
                role
            )));
        }

        let mut member = Member::new(participant.id.clone(), role, at);
        if let Some(inviter) = invited_by {
            member = member.invited_by(inviter);
        }
        if provisional {
            member = member.provisional();
        }
        self.state.roster.insert(member)?;
        info!("👤 {} joined {} as {}", participant.id, self.id, role);
        Ok(())
    }

    /// Only provisional members leave without an executed proposal
    pub fn remove_member(&mut self, member: &str) -> Result<Member> {
        self.ensure_active()?;
        if !self.state.roster.require(member)?.provisional {
            return Err(GovernanceError::PermissionDenied(format!(
                "{} can only be removed by an executed proposal",
                member
            )));
        }
        self.state.roster.remove(member)
    }

    /// Admin-only role change; returns the previous role
    pub fn change_role(&mut self, by: &str, member: &str, role: Role) -> Result<Role> {
        self.ensure_active()?;
        self.require_role(by, &[Role::Admin])?;
        self.state.roster.set_role(member, role)
    }

    fn require_role(&self, who: &str, roles: &[Role]) -> Result<()> {
        let member = self.state.roster.require(who)?;
        if roles.contains(&member.role) {
            Ok(())
        } else {
            Err(GovernanceError::PermissionDenied(format!(
                "{} is a {} of {}",
                who, member.role, self.id
            )))
        }
    }

    pub fn require_moderator(&self, who: &str) -> Result<()> {
        self.require_role(who, &[Role::Admin, Role::Guardian])
    }

    /// Deposit into the treasury
    pub fn contribute(&mut self, from: &str, asset: &str, amount: u64, at: u64) -> Result<u64> {
        self.ensure_active()?;
        let tx = self
            .state
            .treasury
            .deposit(asset, from, amount, TreasurySource::Contribution, None, at)?;
        Ok(tx)
    }

    pub fn proposals(&self) -> &[Proposal] {
        &self.proposals
    }

    pub fn proposal(&self, id: &str) -> Result<&Proposal> {
        self.proposals
            .iter()
            .find(|p| p.id.as_str() == id)
            .ok_or_else(|| GovernanceError::unknown(EntityKind::Proposal, id))
    }

    pub fn active_votes(&self) -> usize {
        self.proposals
            .iter()
            .filter(|p| p.vote().is_some_and(|v| v.is_active()))
            .count()
    }

    fn next_id(&self, prefix: &str) -> ProposalId {
        ProposalId::new(format!("{}/{}-{}", self.id, prefix, self.next_proposal + 1))
    }

    fn require_participation(&self, who: &str) -> Result<()> {
        if self.kind == GovernanceKind::TokenVoting || self.state.roster.contains(who) {
            Ok(())
        } else {
            Err(GovernanceError::IneligibleParticipant {
                participant: who.to_string(),
                rule: format!("member of {}", self.id),
            })
        }
    }

    fn resolve(&self, spec: &ProposalSpec) -> Result<ResolvedProposalType> {
        let mut params =
            self.catalogue
                .resolve_with(spec.category, &self.state.params, spec.mechanism.as_ref())?;
        params.requires_ratification = self.kind.ratifies(&params);
        Ok(params)
    }

    /// Draft and submit a proposal into its support period
    pub fn submit_proposal(&mut self, spec: ProposalSpec, ledger: &mut TokenLedger, at: u64) -> Result<ProposalId> {
        self.ensure_active()?;
        self.require_participation(spec.proposer.as_str())?;
        let params = self.resolve(&spec)?;
        let id = self.next_id("prop");
        let token = self.token().to_string();
        let proposer = spec.proposer.clone();

        let mut proposal = Proposal::new(id.clone(), ProposalKind::Proposal, spec, params, at)?;
        let balance = ledger.balance(&token, proposer.as_str())?;
        let supply = ledger.total_supply(&token)?;
        proposal.submit(balance, Score::from_units(supply), at)?;
        let bond = proposal.params.proposal_bond;
        if bond > 0 {
            let lock = ledger.lock(&token, proposer.as_str(), bond, LockPurpose::ProposalBond, at, at)?;
            proposal.hold_lock(lock);
        }

        self.next_proposal += 1;
        self.proposals.push(proposal);
        Ok(id)
    }

    /// Referendums skip the support phase and open voting at once
    pub fn create_referendum(
        &mut self,
        spec: ProposalSpec,
        ledger: &mut TokenLedger,
        registry: &ParticipantRegistry,
        at: u64,
    ) -> Result<(ProposalId, VotingOpened)> {
        self.ensure_active()?;
        self.require_participation(spec.proposer.as_str())?;
        let params = self.resolve(&spec)?;
        let id = self.next_id("ref");
        let mut proposal = Proposal::new(id.clone(), ProposalKind::Referendum, spec, params, at)?;
        let rules = self.kind.vote_rules(&self.id, self.token());
        let opened = open_vote(&mut proposal, self.token(), rules, self.memberships(), ledger, registry, at)?;

        self.next_proposal += 1;
        self.proposals.push(proposal);
        Ok((id, opened))
    }

    pub fn support(
        &mut self,
        proposal: &str,
        supporter: &str,
        stake: Option<u64>,
        ledger: &mut TokenLedger,
        at: u64,
    ) -> Result<SupportReceipt> {
        self.ensure_active()?;
        self.require_participation(supporter)?;
        let token = self.token().to_string();
        let proposal = find_mut(&mut self.proposals, proposal)?;
        let available = ledger.balance(&token, supporter)?;
        let weight = match stake {
            Some(amount) if amount > available => {
                return Err(GovernanceError::InsufficientBalance {
                    required: amount,
                    available,
                })
            }
            Some(amount) => amount,
            None => available,
        };
        let receipt = proposal.support(supporter, Score::from_units(weight), at)?;
        if let Some(amount) = stake {
            let lock = ledger.lock(&token, supporter, amount, LockPurpose::SupportStake, at, at)?;
            proposal.hold_lock(lock);
        }
        Ok(receipt)
    }

    /// Support deadline reached; a rejected proposal forfeits its bond
    pub fn close_support(&mut self, proposal: &str, ledger: &mut TokenLedger, at: u64) -> Result<bool> {
        self.ensure_active()?;
        let token = self.token().to_string();
        let proposal = find_mut(&mut self.proposals, proposal)?;
        let proceed = proposal.close_support(at)?;
        if !proceed {
            release_locks(proposal, &token, ledger, &mut self.state.treasury, true, at)?;
        }
        Ok(proceed)
    }

    pub fn is_support_met(&self, proposal: &str) -> Result<bool> {
        let proposal = self.proposal(proposal)?;
        Ok(proposal.phase() == ProposalPhase::Support && proposal.support_met())
    }

    pub fn open_voting(
        &mut self,
        proposal: &str,
        ledger: &mut TokenLedger,
        registry: &ParticipantRegistry,
        at: u64,
    ) -> Result<VotingOpened> {
        self.ensure_active()?;
        let rules = self.kind.vote_rules(&self.id, self.token());
        let memberships = self.memberships();
        let token = self.token().to_string();
        let proposal = find_mut(&mut self.proposals, proposal)?;
        open_vote(proposal, &token, rules, memberships, ledger, registry, at)
    }

    pub fn cast(&mut self, proposal: &str, voter: &str, payload: BallotPayload, at: u64) -> Result<(VoteId, CastReceipt)> {
        self.ensure_active()?;
        let proposal = find_mut(&mut self.proposals, proposal)?;
        let id = proposal.id.clone();
        let vote = proposal
            .vote_mut()
            .ok_or_else(|| GovernanceError::VoteClosed(format!("{} has no open vote", id)))?;
        let receipt = vote.cast(voter, payload, at)?;
        Ok((vote.id.clone(), receipt))
    }

    pub fn preview(&self, proposal: &str, now: u64) -> Result<Decision> {
        let proposal = self.proposal(proposal)?;
        let vote = proposal
            .vote()
            .ok_or_else(|| GovernanceError::unknown(EntityKind::Vote, format!("{}/vote", proposal.id)))?;
        Ok(vote.preview(now))
    }

    /// Admin or guardian cancel; the next close observes it
    pub fn cancel_vote(&mut self, proposal: &str, by: &str) -> Result<VoteId> {
        self.ensure_active()?;
        self.require_moderator(by)?;
        let proposal = find_mut(&mut self.proposals, proposal)?;
        let id = proposal.id.clone();
        let vote = proposal
            .vote_mut()
            .ok_or_else(|| GovernanceError::unknown(EntityKind::Vote, format!("{}/vote", id)))?;
        vote.cancel()?;
        Ok(vote.id.clone())
    }

    pub fn cancel_proposal(&mut self, proposal: &str, by: &str, ledger: &mut TokenLedger, at: u64) -> Result<()> {
        self.ensure_active()?;
        let token = self.token().to_string();
        let proposal = find_mut(&mut self.proposals, proposal)?;
        proposal.cancel(by, at)?;
        release_locks(proposal, &token, ledger, &mut self.state.treasury, false, at)
    }

    pub fn close_voting(&mut self, proposal: &str, ledger: &mut TokenLedger, at: u64) -> Result<VotingClosed> {
        self.ensure_active()?;
        let token = self.token().to_string();
        let proposal = find_mut(&mut self.proposals, proposal)?;
        let decision = proposal.close_voting(at)?;
        if proposal.phase().is_terminal() {
            release_locks(proposal, &token, ledger, &mut self.state.treasury, false, at)?;
        }
        let vote = proposal
            .vote()
            .map(|v| v.id.clone())
            .ok_or_else(|| GovernanceError::InvariantViolation(format!("{} closed without a vote", proposal.id)))?;
        Ok(VotingClosed {
            vote,
            kind: proposal.kind,
            decision,
            phase: proposal.phase(),
            execute_at: proposal.execute_at(),
            needs_ratification: proposal.needs_ratification(),
            reason: proposal.reason().map(str::to_string),
        })
    }

    pub fn record_ratification(
        &mut self,
        proposal: &str,
        approved: bool,
        ledger: &mut TokenLedger,
        at: u64,
    ) -> Result<ProposalPhase> {
        self.ensure_active()?;
        let token = self.token().to_string();
        let proposal = find_mut(&mut self.proposals, proposal)?;
        proposal.record_ratification(approved, at)?;
        if proposal.phase().is_terminal() {
            release_locks(proposal, &token, ledger, &mut self.state.treasury, false, at)?;
        }
        Ok(proposal.phase())
    }

    /// Apply a ready proposal's actions
    pub fn execute(&mut self, proposal: &str, ledger: &mut TokenLedger, at: u64) -> Result<(ProposalPhase, ActionReport)> {
        self.ensure_active()?;
        let token = self.token().to_string();
        let proposal = find_mut(&mut self.proposals, proposal)?;
        let report = {
            let mut executor = DaoExecutor::new(proposal.id.to_string(), &mut self.state, ledger, at);
            proposal.execute(&mut executor, at)?
        };
        release_locks(proposal, &token, ledger, &mut self.state.treasury, false, at)?;
        Ok((proposal.phase(), report))
    }

    /// Apply actions approved outside this governance's own votes
    pub fn apply_actions(
        &mut self,
        authorization: &str,
        actions: &[Action],
        ledger: &mut TokenLedger,
        at: u64,
    ) -> Result<ActionReport> {
        self.ensure_active()?;
        for action in actions {
            action.validate_schema()?;
        }
        let mut executor = DaoExecutor::new(authorization, &mut self.state, ledger, at);
        Ok(execute_all(&mut executor, actions))
    }

    /// Dry run of `actions` against a copy of this governance's state
    ///
    /// `ledger` is expected to be a scratch copy; it carries the effects
    /// forward so several governances can rehearse in sequence.
    pub fn rehearse_actions(
        &self,
        authorization: &str,
        actions: &[Action],
        ledger: &mut TokenLedger,
        at: u64,
    ) -> Result<ActionReport> {
        self.ensure_active()?;
        for action in actions {
            action.validate_schema()?;
        }
        let mut state = self.state.clone();
        let mut executor = DaoExecutor::new(authorization, &mut state, ledger, at);
        Ok(execute_all(&mut executor, actions))
    }

    /// Dry run of a ready proposal's actions
    pub fn rehearse(&self, proposal: &str, ledger: &mut TokenLedger, at: u64) -> Result<ActionReport> {
        let proposal = self.proposal(proposal)?;
        if !proposal.is_ready(at) {
            return Err(GovernanceError::transition(proposal.phase(), ProposalPhase::Executed));
        }
        self.rehearse_actions(proposal.id.as_str(), &proposal.spec.actions, ledger, at)
    }

    /// Reject an unfinished proposal from outside its lifecycle and return
    /// its locks. `None` when it had already finished.
    pub fn abandon(
        &mut self,
        proposal: &str,
        reason: &str,
        ledger: &mut TokenLedger,
        at: u64,
    ) -> Result<Option<ProposalPhase>> {
        self.ensure_active()?;
        let token = self.token().to_string();
        let proposal = find_mut(&mut self.proposals, proposal)?;
        if proposal.phase().is_terminal() {
            return Ok(None);
        }
        proposal.reject(reason, at)?;
        release_locks(proposal, &token, ledger, &mut self.state.treasury, false, at)?;
        warn!("🚫 {} abandoned: {}", proposal.id, reason);
        Ok(Some(proposal.phase()))
    }

    /// Treasury log, ledger supply and roster cap all hold
    pub fn audit(&self, ledger: &TokenLedger) -> Result<()> {
        self.state.treasury.check_invariants()?;
        ledger.check_invariants()?;
        if self.state.roster.len() > self.state.roster.max_members() {
            return Err(GovernanceError::InvariantViolation(format!(
                "{} has {} members, limit {}",
                self.id,
                self.state.roster.len(),
                self.state.roster.max_members()
            )));
        }
        Ok(())
    }
}

fn find_mut<'p>(proposals: &'p mut [Proposal], id: &str) -> Result<&'p mut Proposal> {
    proposals
        .iter_mut()
        .find(|p| p.id.as_str() == id)
        .ok_or_else(|| GovernanceError::unknown(EntityKind::Proposal, id))
}

fn open_vote(
    proposal: &mut Proposal,
    token: &str,
    rules: Vec<agora_governance::EligibilityRule>,
    memberships: BTreeMap<String, BTreeSet<ParticipantId>>,
    ledger: &mut TokenLedger,
    registry: &ParticipantRegistry,
    at: u64,
) -> Result<VotingOpened> {
    let mut spec = proposal.vote_spec(at);
    spec.eligibility.extend(rules);
    let context = VoteContext::capture(ledger, token, registry, memberships, &spec, at)?;
    let id = VoteId::new(format!("{}/vote", proposal.id));
    let vote = Vote::new(id.clone(), spec, context)?;
    let opened = VotingOpened {
        vote: id,
        mechanism: vote.spec.mechanism.name().to_string(),
        closes_at: vote.spec.closes_at,
    };
    proposal.open_voting(vote, at)?;
    Ok(opened)
}

/// Return a terminal proposal's locks; bonds are forfeited to the treasury
/// when `forfeit` is set
fn release_locks(
    proposal: &mut Proposal,
    token: &str,
    ledger: &mut TokenLedger,
    treasury: &mut TreasuryPool,
    forfeit: bool,
    at: u64,
) -> Result<()> {
    for lock in proposal.take_locks() {
        let purpose = ledger.token(token)?.lock(lock).map(|l| l.purpose);
        let amount = ledger.unlock(token, lock, at)?;
        if forfeit && purpose == Some(LockPurpose::ProposalBond) {
            let owner = proposal.proposer().clone();
            ledger.burn(token, owner.as_str(), amount, "forfeited proposal bond", at)?;
            treasury.deposit(
                token,
                owner,
                amount,
                TreasurySource::ForfeitedBond,
                Some(format!("bond of {}", proposal.id)),
                at,
            )?;
            info!("💰 Bond of {} forfeited to the treasury", proposal.id);
        }
    }
    Ok(())
}
