//! Governance orchestrator
//!
//! Registers governances, dispatches participant operations to them, drives
//! every deadline through one scheduler and binds consensus rounds to the
//! proposals they ratify. Each governance sits behind its own async mutex;
//! the ledger lock is only ever taken while that mutex is held, never the
//! other way round. Work spanning several governances takes their mutexes in
//! id order.

use crate::config::{GovernanceConfig, GovernanceKind, OrchestratorConfig};
use crate::cross::{CoordinationMode, CrossGovernance, CrossGovernanceSpec, CrossStatus};
use crate::dao::{Dao, VotingOpened};
use crate::status::{GovernanceStatus, HealthReport, ProposalStatus, StatusReport};
use agora_consensus::{
    ConsensusEngine, ConsensusMechanism, ConsensusMessage, MessageOutcome, RoundSpec, Validator,
    ValidatorSet, Verdict,
};
use agora_core::{
    Clock, EntityKind, ErrorKind, EventSink, GovernanceError, GovernanceId, Participant,
    ParticipantHandle, ParticipantId, ParticipantRegistry, ProposalId, Result, RoundId, Scheduler,
    SignatureVerifier, SignedMessage, SystemEvent,
};
use agora_governance::{
    Action, ActionReport, BallotPayload, CastReceipt, Decision, ProposalKind, ProposalPhase, ProposalSpec, Role,
    SupportReceipt,
};
use agora_ledger::{DelegationChange, DelegationScope, LedgerHandle, TokenLedger};
use chrono::Utc;
use dashmap::DashMap;
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, OwnedMutexGuard};

/// Deadline callbacks
#[derive(Debug, Clone, PartialEq, Eq)]
enum Task {
    CloseSupport {
        governance: GovernanceId,
        proposal: ProposalId,
    },
    CloseVoting {
        governance: GovernanceId,
        proposal: ProposalId,
    },
    Execute {
        governance: GovernanceId,
        proposal: ProposalId,
    },
}

/// `None` when the actions went through, otherwise why they did not
fn failure_reason(governance: &GovernanceId, result: Result<ActionReport>) -> Option<String> {
    match result {
        Ok(report) if report.succeeded() => None,
        Ok(report) => Some(format!("{}: {}", governance, report.error.unwrap_or_default())),
        Err(err) => Some(format!("{}: {}", governance, err)),
    }
}

/// What a finished consensus round decides
#[derive(Debug, Clone)]
enum RoundBinding {
    Ratification {
        governance: GovernanceId,
        proposal: ProposalId,
    },
    Cross {
        cross: String,
    },
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    clock: Arc<dyn Clock>,
    registry: ParticipantHandle,
    ledger: LedgerHandle,
    engine: Arc<ConsensusEngine>,
    governances: DashMap<GovernanceId, Arc<Mutex<Dao>>>,
    next_governance: AtomicU64,
    next_cross: AtomicU64,
    scheduler: parking_lot::Mutex<Scheduler<Task>>,
    bindings: DashMap<RoundId, RoundBinding>,
    crosses: DashMap<String, CrossGovernance>,
    events: Arc<dyn EventSink>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        clock: Arc<dyn Clock>,
        verifier: Arc<dyn SignatureVerifier>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        config.validate()?;
        let engine = ConsensusEngine::new(config.consensus.clone(), verifier, events.clone())?;
        let registry = ParticipantRegistry::new().shared();
        let ledger = TokenLedger::with_registry(registry.clone()).shared();
        Ok(Self {
            config,
            clock,
            registry,
            ledger,
            engine: Arc::new(engine),
            governances: DashMap::new(),
            next_governance: AtomicU64::new(1),
            next_cross: AtomicU64::new(1),
            scheduler: parking_lot::Mutex::new(Scheduler::new()),
            bindings: DashMap::new(),
            crosses: DashMap::new(),
            events,
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn ledger(&self) -> &LedgerHandle {
        &self.ledger
    }

    pub fn registry(&self) -> &ParticipantHandle {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<ConsensusEngine> {
        &self.engine
    }

    pub fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    fn publish(&self, event: SystemEvent) {
        self.events.publish(self.now(), event);
    }

    fn schedule(&self, at: u64, task: Task) {
        debug!("⏱️  Scheduled {:?} at {}", task, at);
        self.scheduler.lock().schedule_at(at, task);
    }

    fn dao(&self, id: &str) -> Result<Arc<Mutex<Dao>>> {
        self.governances
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| GovernanceError::unknown(EntityKind::Governance, id))
    }

    /// Lock several governances in id order
    async fn lock_all<T>(&self, mut targets: Vec<(GovernanceId, T)>) -> Result<Vec<(OwnedMutexGuard<Dao>, T)>> {
        targets.sort_by(|a, b| a.0.cmp(&b.0));
        let mut guards = Vec::with_capacity(targets.len());
        for (governance, extra) in targets {
            let handle = self.dao(governance.as_str())?;
            guards.push((handle.lock_owned().await, extra));
        }
        Ok(guards)
    }

    /// Fatal errors take the governance out of service
    fn guard<T>(&self, dao: &mut Dao, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            if err.is_fatal() && dao.degraded().is_none() {
                dao.degrade(err.to_string());
                self.publish(SystemEvent::GovernanceDegraded {
                    governance: dao.id.clone(),
                    reason: err.to_string(),
                });
            }
        }
        result
    }

    fn audit(&self, dao: &mut Dao) -> Result<()> {
        let result = {
            let ledger = self.ledger.read();
            dao.audit(&ledger)
        };
        self.guard(dao, result)
    }

    pub fn register_participant(&self, participant: Participant) -> Result<()> {
        let id = participant.id.clone();
        self.registry.write().register(participant)?;
        debug!("👤 Registered participant {}", id);
        Ok(())
    }

    pub fn register_validator(&self, validator: Validator) -> Result<()> {
        self.engine.register_validator(validator, self.now())?;
        Ok(())
    }

    /// Genesis issuance outside any governance
    pub fn mint(&self, token: &str, to: &str, amount: u64, reason: &str) -> Result<u64> {
        let now = self.now();
        let balance = self.ledger.write().mint(token, to, amount, reason, now)?;
        Ok(balance)
    }

    pub fn governance_ids(&self) -> Vec<GovernanceId> {
        let mut ids: Vec<GovernanceId> = self.governances.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Register a governance; `config` falls back to the configured defaults
    pub async fn create_governance(
        &self,
        kind: GovernanceKind,
        config: Option<GovernanceConfig>,
    ) -> Result<GovernanceId> {
        let config = config.unwrap_or_else(|| self.config.defaults.clone());
        config.validate()?;
        let now = self.now();

        let founders: Vec<Participant> = {
            let registry = self.registry.read();
            config
                .founders
                .iter()
                .map(|id| registry.active(id.as_str()).cloned())
                .collect::<Result<_>>()?
        };
        {
            let mut ledger = self.ledger.write();
            if ledger.token(config.token.symbol.as_str()).is_err() {
                ledger.create_token(config.token.clone(), now)?;
            }
        }

        let seq = self.next_governance.fetch_add(1, Ordering::SeqCst);
        let id = GovernanceId::new(format!("gov-{}", seq));
        let mut dao = Dao::new(id.clone(), kind, config, now);
        for founder in &founders {
            dao.add_founder(founder, now)?;
        }
        let name = dao.name().to_string();
        self.governances.insert(id.clone(), Arc::new(Mutex::new(dao)));

        info!("🏛️  Created {} governance {} ({})", kind, id, name);
        self.publish(SystemEvent::GovernanceCreated {
            governance: id.clone(),
            kind: kind.to_string(),
        });
        if kind == GovernanceKind::Dao {
            self.publish(SystemEvent::DaoCreated {
                governance: id.clone(),
                name,
            });
        }
        for founder in founders {
            self.publish(SystemEvent::MemberAdded {
                governance: id.clone(),
                member: founder.id,
                role: Role::Admin.to_string(),
            });
        }
        Ok(id)
    }

    pub async fn add_member(
        &self,
        governance: &str,
        participant: &str,
        role: Role,
        invited_by: Option<&str>,
        provisional: bool,
    ) -> Result<()> {
        let now = self.now();
        let handle = self.dao(governance)?;
        let mut dao = handle.lock().await;
        let participant = self.registry.read().active(participant)?.clone();
        let result = {
            let ledger = self.ledger.read();
            dao.add_member(&participant, role, invited_by, provisional, &ledger, now)
        };
        self.guard(&mut dao, result)?;
        self.publish(SystemEvent::MemberAdded {
            governance: dao.id.clone(),
            member: participant.id,
            role: role.to_string(),
        });
        Ok(())
    }

    pub async fn remove_member(&self, governance: &str, member: &str) -> Result<()> {
        let handle = self.dao(governance)?;
        let mut dao = handle.lock().await;
        let result = dao.remove_member(member);
        let removed = self.guard(&mut dao, result)?;
        self.publish(SystemEvent::MemberRemoved {
            governance: dao.id.clone(),
            member: removed.id,
        });
        Ok(())
    }

    /// Returns the previous role
    pub async fn change_role(&self, governance: &str, by: &str, member: &str, role: Role) -> Result<Role> {
        let handle = self.dao(governance)?;
        let mut dao = handle.lock().await;
        let result = dao.change_role(by, member, role);
        let previous = self.guard(&mut dao, result)?;
        self.publish(SystemEvent::MemberRoleUpdated {
            governance: dao.id.clone(),
            member: member.into(),
            role: role.to_string(),
        });
        Ok(previous)
    }

    pub async fn contribute(&self, governance: &str, from: &str, asset: &str, amount: u64) -> Result<u64> {
        let now = self.now();
        let handle = self.dao(governance)?;
        let mut dao = handle.lock().await;
        let result = dao.contribute(from, asset, amount, now);
        self.guard(&mut dao, result)
    }

    pub async fn submit_proposal(&self, governance: &str, spec: ProposalSpec) -> Result<ProposalId> {
        let now = self.now();
        let handle = self.dao(governance)?;
        let mut dao = handle.lock().await;
        let result = {
            let mut ledger = self.ledger.write();
            dao.submit_proposal(spec, &mut ledger, now)
        };
        let id = self.guard(&mut dao, result)?;

        let proposal = dao.proposal(id.as_str())?;
        self.publish(SystemEvent::ProposalCreated {
            governance: dao.id.clone(),
            proposal: id.clone(),
            proposer: proposal.proposer().clone(),
            category: proposal.params.category.to_string(),
        });
        if let Some(deadline) = proposal.support_deadline() {
            self.schedule(
                deadline,
                Task::CloseSupport {
                    governance: dao.id.clone(),
                    proposal: id.clone(),
                },
            );
        }
        Ok(id)
    }

    /// Voting opens as soon as the support threshold is met
    pub async fn support_proposal(
        &self,
        governance: &str,
        proposal: &str,
        supporter: &str,
        stake: Option<u64>,
    ) -> Result<SupportReceipt> {
        let now = self.now();
        let handle = self.dao(governance)?;
        let mut dao = handle.lock().await;
        let result = {
            let mut ledger = self.ledger.write();
            dao.support(proposal, supporter, stake, &mut ledger, now)
        };
        let receipt = self.guard(&mut dao, result)?;
        self.publish(SystemEvent::ProposalSupported {
            governance: dao.id.clone(),
            proposal: proposal.into(),
            supporter: supporter.into(),
            total_support: receipt.total_support.to_string(),
            threshold_met: receipt.threshold_met,
        });
        if receipt.threshold_met {
            self.open_voting(&mut dao, proposal, now)?;
        }
        Ok(receipt)
    }

    pub async fn cancel_proposal(&self, governance: &str, proposal: &str, by: &str) -> Result<()> {
        let now = self.now();
        let handle = self.dao(governance)?;
        let mut dao = handle.lock().await;
        let result = {
            let mut ledger = self.ledger.write();
            dao.cancel_proposal(proposal, by, &mut ledger, now)
        };
        self.guard(&mut dao, result)?;
        let id = ProposalId::from(proposal);
        self.publish(SystemEvent::ProposalRejected {
            governance: dao.id.clone(),
            proposal: id.clone(),
            reason: "cancelled by proposer".into(),
        });
        let governance = dao.id.clone();
        drop(dao);
        self.settle(&governance, &id, ProposalPhase::Rejected).await;
        Ok(())
    }

    fn open_voting(&self, dao: &mut Dao, proposal: &str, now: u64) -> Result<()> {
        let result = {
            let mut ledger = self.ledger.write();
            let registry = self.registry.read();
            dao.open_voting(proposal, &mut ledger, &registry, now)
        };
        let opened = self.guard(dao, result)?;
        self.voting_started(dao, &ProposalId::from(proposal), opened);
        Ok(())
    }

    fn voting_started(&self, dao: &Dao, proposal: &ProposalId, opened: VotingOpened) {
        info!(
            "🗳️  Voting on {} opened ({}), closes {:?}",
            proposal, opened.mechanism, opened.closes_at
        );
        if let Some(closes_at) = opened.closes_at {
            self.schedule(
                closes_at,
                Task::CloseVoting {
                    governance: dao.id.clone(),
                    proposal: proposal.clone(),
                },
            );
        }
        self.publish(SystemEvent::VotingStarted {
            governance: dao.id.clone(),
            proposal: proposal.clone(),
            vote: opened.vote,
            mechanism: opened.mechanism,
            closes_at: opened.closes_at,
        });
    }

    /// A referendum opens its vote immediately
    pub async fn create_referendum(&self, governance: &str, spec: ProposalSpec) -> Result<ProposalId> {
        let now = self.now();
        let handle = self.dao(governance)?;
        let mut dao = handle.lock().await;
        let result = {
            let mut ledger = self.ledger.write();
            let registry = self.registry.read();
            dao.create_referendum(spec, &mut ledger, &registry, now)
        };
        let (id, opened) = self.guard(&mut dao, result)?;
        self.publish(SystemEvent::ReferendumCreated {
            governance: dao.id.clone(),
            referendum: id.clone(),
        });
        self.voting_started(&dao, &id, opened);
        Ok(id)
    }

    pub async fn cast_vote(
        &self,
        governance: &str,
        proposal: &str,
        voter: &str,
        payload: BallotPayload,
    ) -> Result<CastReceipt> {
        let now = self.now();
        let handle = self.dao(governance)?;
        let mut dao = handle.lock().await;
        let result = dao.cast(proposal, voter, payload, now);
        let (vote, receipt) = self.guard(&mut dao, result)?;
        if receipt.accepted {
            self.publish(SystemEvent::VoteCast {
                governance: dao.id.clone(),
                vote,
                voter: voter.into(),
                weight: receipt.weight.to_string(),
            });
        }
        Ok(receipt)
    }

    /// Admin cancel; the proposal is rejected on the next tick
    pub async fn cancel_vote(&self, governance: &str, proposal: &str, by: &str) -> Result<()> {
        let now = self.now();
        let handle = self.dao(governance)?;
        let mut dao = handle.lock().await;
        let result = dao.cancel_vote(proposal, by);
        let vote = self.guard(&mut dao, result)?;
        warn!("🛑 Vote {} cancelled by {}", vote, by);
        self.publish(SystemEvent::VoteCancelled {
            governance: dao.id.clone(),
            vote,
        });
        self.schedule(
            now,
            Task::CloseVoting {
                governance: dao.id.clone(),
                proposal: proposal.into(),
            },
        );
        Ok(())
    }

    /// Close an open-ended vote such as conviction voting
    pub async fn close_vote(&self, governance: &str, proposal: &str, by: &str) -> Result<()> {
        let now = self.now();
        let handle = self.dao(governance)?;
        let mut dao = handle.lock().await;
        dao.require_moderator(by)?;
        let scheduled = dao
            .proposal(proposal)?
            .vote()
            .and_then(|v| v.spec.closes_at);
        if let Some(closes_at) = scheduled {
            return Err(GovernanceError::PermissionDenied(format!(
                "{} closes on schedule at {}",
                proposal, closes_at
            )));
        }
        let phase = self.finish_voting(&mut dao, proposal, now)?;
        let governance = dao.id.clone();
        drop(dao);
        self.settle(&governance, &ProposalId::from(proposal), phase).await;
        Ok(())
    }

    /// Non-terminal tally of an open vote
    pub async fn preview_vote(&self, governance: &str, proposal: &str) -> Result<Decision> {
        let now = self.now();
        let handle = self.dao(governance)?;
        let dao = handle.lock().await;
        dao.preview(proposal, now)
    }

    pub async fn delegate(
        &self,
        governance: &str,
        token: &str,
        delegator: &str,
        delegate: &str,
        scope: DelegationScope,
    ) -> Result<DelegationChange> {
        let now = self.now();
        let handle = self.dao(governance)?;
        let dao = handle.lock().await;
        dao.ensure_active()?;
        let change = self
            .ledger
            .write()
            .delegate(token, delegator, delegate, scope.clone(), now)?;
        info!("🤝 {} delegated {} power to {} ({})", delegator, token, delegate, scope);
        self.publish(SystemEvent::VotingPowerDelegated {
            token: token.into(),
            delegator: delegator.into(),
            delegate: delegate.into(),
            scope: scope.to_string(),
        });
        Ok(change)
    }

    /// Start a standalone consensus round over the registered validators
    pub fn execute_consensus(&self, spec: RoundSpec) -> Result<RoundId> {
        let round = self.engine.start_round(spec, self.now())?;
        Ok(round)
    }

    /// Deliver a consensus message; settles bound rounds once finalized
    pub async fn submit_consensus(
        &self,
        round: &RoundId,
        message: SignedMessage<ConsensusMessage>,
    ) -> Result<MessageOutcome> {
        let outcome = self.engine.submit(round, message, self.now())?;
        if self.bindings.contains_key(round) {
            let check = self.engine.check(round)?;
            if check.finalized {
                self.settle_round(round, check.verdict).await?;
            }
        }
        Ok(outcome)
    }

    /// Close the vote and route the proposal to execution, ratification or rejection
    fn finish_voting(&self, dao: &mut Dao, proposal: &str, now: u64) -> Result<ProposalPhase> {
        let result = {
            let mut ledger = self.ledger.write();
            dao.close_voting(proposal, &mut ledger, now)
        };
        let closed = self.guard(dao, result)?;
        let id = ProposalId::from(proposal);
        self.publish(SystemEvent::VotingEnded {
            governance: dao.id.clone(),
            vote: closed.vote.clone(),
            outcome: closed.decision.outcome.clone(),
            passed: closed.decision.passed,
            quorum_met: closed.decision.quorum_met,
        });
        if closed.kind == ProposalKind::Referendum {
            self.publish(SystemEvent::ReferendumCompleted {
                governance: dao.id.clone(),
                referendum: id.clone(),
                outcome: closed.decision.outcome.clone(),
                passed: closed.phase == ProposalPhase::ExecutionPending,
            });
        }

        match closed.phase {
            ProposalPhase::ExecutionPending if closed.needs_ratification => {
                self.start_ratification(dao, &id, now)?;
            }
            ProposalPhase::ExecutionPending => {
                let at = closed.execute_at.unwrap_or(now);
                self.schedule_execution(dao, &id, at);
            }
            _ => {
                self.publish(SystemEvent::ProposalRejected {
                    governance: dao.id.clone(),
                    proposal: id.clone(),
                    reason: closed.reason.unwrap_or_default(),
                });
            }
        }
        Ok(dao.proposal(proposal)?.phase())
    }

    fn schedule_execution(&self, dao: &Dao, proposal: &ProposalId, at: u64) {
        self.schedule(
            at,
            Task::Execute {
                governance: dao.id.clone(),
                proposal: proposal.clone(),
            },
        );
        self.publish(SystemEvent::ExecutionScheduled {
            governance: dao.id.clone(),
            proposal: proposal.clone(),
            execute_at: at,
        });
    }

    /// Active registered validators among `authorities`
    fn validators_for(&self, authorities: &BTreeSet<ParticipantId>, limit: usize) -> Result<ValidatorSet> {
        let registered = self.engine.validators();
        let chosen = registered
            .active()
            .filter(|v| authorities.contains(&v.id))
            .take(limit)
            .cloned();
        Ok(ValidatorSet::from_validators(chosen)?)
    }

    /// A passing proposal in a ratifying governance waits for a validator round
    fn start_ratification(&self, dao: &mut Dao, proposal: &ProposalId, now: u64) -> Result<()> {
        let authorities: BTreeSet<ParticipantId> = dao.authorities().into_iter().collect();
        let started = self
            .validators_for(&authorities, dao.config.max_validators)
            .and_then(|validators| {
                let spec = RoundSpec::new(dao.config.ratification.clone(), proposal.to_string());
                Ok(self.engine.start_round_with(spec, validators, now)?)
            });
        match started {
            Ok(round) => {
                info!("🔏 {} awaits ratification in {}", proposal, round);
                self.bindings.insert(
                    round,
                    RoundBinding::Ratification {
                        governance: dao.id.clone(),
                        proposal: proposal.clone(),
                    },
                );
                Ok(())
            }
            Err(err) => {
                warn!("⚠️  Ratification of {} could not start: {}", proposal, err);
                let result = {
                    let mut ledger = self.ledger.write();
                    dao.record_ratification(proposal.as_str(), false, &mut ledger, now)
                };
                self.guard(dao, result)?;
                self.publish(SystemEvent::ProposalRejected {
                    governance: dao.id.clone(),
                    proposal: proposal.clone(),
                    reason: format!("ratification could not start: {}", err),
                });
                Ok(())
            }
        }
    }

    async fn settle_round(&self, round: &RoundId, verdict: Option<Verdict>) -> Result<()> {
        let Some((_, binding)) = self.bindings.remove(round) else {
            return Ok(());
        };
        let now = self.now();
        match binding {
            RoundBinding::Ratification {
                governance,
                proposal,
            } => {
                let approved = verdict == Some(Verdict::Commit(proposal.to_string()));
                let handle = self.dao(governance.as_str())?;
                let mut dao = handle.lock().await;
                let result = {
                    let mut ledger = self.ledger.write();
                    dao.record_ratification(proposal.as_str(), approved, &mut ledger, now)
                };
                let phase = self.guard(&mut dao, result)?;
                if phase == ProposalPhase::ExecutionPending {
                    info!("✅ {} ratified in {}", proposal, round);
                    let at = dao.proposal(proposal.as_str())?.execute_at().unwrap_or(now).max(now);
                    self.schedule_execution(&dao, &proposal, at);
                } else {
                    self.publish(SystemEvent::ProposalRejected {
                        governance: governance.clone(),
                        proposal: proposal.clone(),
                        reason: format!("ratification rejected in {}", round),
                    });
                }
                drop(dao);
                self.settle(&governance, &proposal, phase).await;
                Ok(())
            }
            RoundBinding::Cross { cross } => self.finish_cross_round(&cross, verdict).await,
        }
    }

    async fn run_execution(&self, governance: &GovernanceId, proposal: &ProposalId, now: u64) -> Result<()> {
        if let Some(cross) = self.parallel_cross_of(proposal) {
            return self.hold_parallel_leg(&cross, governance, proposal, now).await;
        }
        let handle = self.dao(governance.as_str())?;
        let mut dao = handle.lock().await;
        if !dao.proposal(proposal.as_str())?.is_ready(now) {
            return Ok(());
        }
        let result = {
            let mut ledger = self.ledger.write();
            dao.execute(proposal.as_str(), &mut ledger, now)
        };
        let (phase, report) = self.guard(&mut dao, result)?;
        self.publish_execution(governance, proposal, phase, &report);
        self.audit(&mut dao)?;
        drop(dao);
        self.settle(governance, proposal, phase).await;
        Ok(())
    }

    fn publish_execution(&self, governance: &GovernanceId, proposal: &ProposalId, phase: ProposalPhase, report: &ActionReport) {
        if phase == ProposalPhase::Executed {
            self.publish(SystemEvent::ProposalExecuted {
                governance: governance.clone(),
                proposal: proposal.clone(),
                actions: report.applied,
            });
        } else {
            self.publish(SystemEvent::ProposalExecutionFailed {
                governance: governance.clone(),
                proposal: proposal.clone(),
                reason: report.error.clone().unwrap_or_default(),
                kind: report.error_kind.unwrap_or(ErrorKind::ExecutionFailed),
            });
        }
    }

    fn parallel_cross_of(&self, proposal: &ProposalId) -> Option<String> {
        self.crosses
            .iter()
            .find(|c| c.mode() == CoordinationMode::Parallel && c.involves(proposal))
            .map(|c| c.key().clone())
    }

    /// A due parallel leg waits until every leg of its cross proposal is due
    async fn hold_parallel_leg(
        &self,
        id: &str,
        governance: &GovernanceId,
        proposal: &ProposalId,
        now: u64,
    ) -> Result<()> {
        {
            let handle = self.dao(governance.as_str())?;
            let dao = handle.lock().await;
            if !dao.proposal(proposal.as_str())?.is_ready(now) {
                return Ok(());
            }
        }
        let (status, all_ready) = match self.crosses.get_mut(id) {
            Some(mut cross) => {
                let all_ready = cross.mark_ready(proposal);
                (cross.status.clone(), all_ready)
            }
            None => return Ok(()),
        };
        match status {
            CrossStatus::Rejected { reason } => self.abandon_legs(id, &reason).await,
            CrossStatus::Running if all_ready => self.execute_parallel(id, now).await,
            CrossStatus::Running => {
                info!("⏸️  {} held until every leg of {} is due", proposal, id);
                Ok(())
            }
            CrossStatus::Passed => Ok(()),
        }
    }

    /// Rehearse every leg on a scratch ledger, then execute them all or none
    async fn execute_parallel(&self, id: &str, now: u64) -> Result<()> {
        let legs = match self.crosses.get(id) {
            Some(cross) => cross.leg_proposals(),
            None => return Ok(()),
        };
        let mut guards = self.lock_all(legs).await?;
        let failure = {
            let mut scratch = (*self.ledger.read()).clone();
            guards.iter().find_map(|(dao, proposal)| {
                failure_reason(&dao.id, dao.rehearse(proposal.as_str(), &mut scratch, now))
            })
        };
        if let Some(reason) = failure {
            drop(guards);
            if let Some(mut cross) = self.crosses.get_mut(id) {
                cross.resolve(false, reason.clone());
            }
            warn!("🌐 {} rejected before execution: {}", id, reason);
            return self.abandon_legs(id, &reason).await;
        }

        let mut phases = Vec::with_capacity(guards.len());
        for (dao, proposal) in guards.iter_mut() {
            let result = {
                let mut ledger = self.ledger.write();
                dao.execute(proposal.as_str(), &mut ledger, now)
            };
            let (phase, report) = self.guard(dao, result)?;
            self.publish_execution(&dao.id, proposal, phase, &report);
            self.audit(dao)?;
            phases.push((dao.id.clone(), proposal.clone(), phase));
        }
        drop(guards);
        for (governance, proposal, phase) in phases {
            self.settle(&governance, &proposal, phase).await;
        }
        Ok(())
    }

    /// Reject every unfinished leg of a failed cross proposal
    async fn abandon_legs(&self, id: &str, reason: &str) -> Result<()> {
        let legs = match self.crosses.get(id) {
            Some(cross) => cross.leg_proposals(),
            None => return Ok(()),
        };
        let now = self.now();
        let reason = format!("{} rejected: {}", id, reason);
        for (governance, proposal) in legs {
            let handle = self.dao(governance.as_str())?;
            let mut dao = handle.lock().await;
            let result = {
                let mut ledger = self.ledger.write();
                dao.abandon(proposal.as_str(), &reason, &mut ledger, now)
            };
            let phase = match self.guard(&mut dao, result) {
                Ok(Some(phase)) => phase,
                Ok(None) => continue,
                Err(err) => {
                    warn!("⚠️  {} could not be abandoned: {}", proposal, err);
                    continue;
                }
            };
            self.publish(SystemEvent::ProposalRejected {
                governance: governance.clone(),
                proposal: proposal.clone(),
                reason: reason.clone(),
            });
            self.audit(&mut dao)?;
            drop(dao);
            if let Some(mut cross) = self.crosses.get_mut(id) {
                cross.record(&proposal, phase);
            }
        }
        Ok(())
    }

    async fn run_task(&self, task: Task, now: u64) -> Result<()> {
        match task {
            Task::CloseSupport {
                governance,
                proposal,
            } => {
                let handle = self.dao(governance.as_str())?;
                let mut dao = handle.lock().await;
                if dao.proposal(proposal.as_str())?.phase() != ProposalPhase::Support {
                    return Ok(());
                }
                let result = {
                    let mut ledger = self.ledger.write();
                    dao.close_support(proposal.as_str(), &mut ledger, now)
                };
                if self.guard(&mut dao, result)? {
                    self.open_voting(&mut dao, proposal.as_str(), now)?;
                } else {
                    let reason = dao
                        .proposal(proposal.as_str())?
                        .reason()
                        .unwrap_or_default()
                        .to_string();
                    self.publish(SystemEvent::ProposalRejected {
                        governance: governance.clone(),
                        proposal: proposal.clone(),
                        reason,
                    });
                    self.audit(&mut dao)?;
                }
                let phase = dao.proposal(proposal.as_str())?.phase();
                drop(dao);
                self.settle(&governance, &proposal, phase).await;
                Ok(())
            }
            Task::CloseVoting {
                governance,
                proposal,
            } => {
                let handle = self.dao(governance.as_str())?;
                let mut dao = handle.lock().await;
                if dao.proposal(proposal.as_str())?.phase() != ProposalPhase::Voting {
                    return Ok(());
                }
                let phase = self.finish_voting(&mut dao, proposal.as_str(), now)?;
                drop(dao);
                self.settle(&governance, &proposal, phase).await;
                Ok(())
            }
            Task::Execute {
                governance,
                proposal,
            } => self.run_execution(&governance, &proposal, now).await,
        }
    }

    /// Fire every due deadline and consensus timeout; returns how many fired
    pub async fn tick(&self) -> usize {
        let now = self.now();
        let mut fired = 0;
        loop {
            let due = self.scheduler.lock().pop_due(now);
            if due.is_empty() {
                break;
            }
            for (_, task) in due {
                fired += 1;
                if let Err(err) = self.run_task(task.clone(), now).await {
                    warn!("⚠️  Task {:?} failed: {}", task, err);
                }
            }
        }

        for (round, outcome) in self.engine.tick(now) {
            fired += 1;
            if outcome.verdict.is_none() && outcome.view_change {
                continue;
            }
            if let Err(err) = self.settle_round(&round, outcome.verdict).await {
                warn!("⚠️  Settling {} failed: {}", round, err);
            }
        }
        fired
    }

    /// Drive `tick` every `tick_interval_ms` until `shutdown` flips to true
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.tick_interval_ms));
        info!("🚀 Orchestrator running, tick every {}ms", self.config.tick_interval_ms);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let fired = self.tick().await;
                    if fired > 0 {
                        debug!("⏱️  Tick fired {} deadlines", fired);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("🛑 Orchestrator stopped");
    }

    /// Start a proposal spanning several governances
    pub async fn propose_cross(&self, spec: CrossGovernanceSpec) -> Result<String> {
        let distinct: BTreeSet<&GovernanceId> = spec.governances.iter().collect();
        if spec.governances.is_empty() || distinct.len() != spec.governances.len() {
            return Err(GovernanceError::PermissionDenied(
                "a cross-governance proposal needs distinct governances".into(),
            ));
        }
        let mut authorities = BTreeSet::new();
        for governance in &spec.governances {
            let handle = self.dao(governance.as_str())?;
            let dao = handle.lock().await;
            dao.ensure_active()?;
            authorities.extend(dao.authorities());
        }

        let seq = self.next_cross.fetch_add(1, Ordering::SeqCst);
        let id = format!("cross-{}", seq);
        let mut cross = CrossGovernance::new(id.clone(), spec);
        if cross.mode() == CoordinationMode::Consensus {
            for action in &cross.spec.proposal.actions {
                action.validate_schema()?;
            }
            let mechanism = cross.spec.mechanism.clone().unwrap_or(ConsensusMechanism::Pbft);
            let validators = self.validators_for(&authorities, self.engine.config().max_validators)?;
            let round = self
                .engine
                .start_round_with(RoundSpec::new(mechanism, id.clone()), validators, self.now())?;
            self.bindings.insert(round.clone(), RoundBinding::Cross { cross: id.clone() });
            cross.round = Some(round);
        }
        info!(
            "🌐 {} spans {} governances ({:?})",
            id,
            cross.legs.len(),
            cross.mode()
        );
        self.crosses.insert(id.clone(), cross);
        self.advance_cross(&id).await;
        Ok(id)
    }

    /// Start whichever legs the coordination mode allows now
    async fn advance_cross(&self, id: &str) {
        let (starts, spec) = match self.crosses.get(id) {
            Some(cross) => (cross.pending_starts(), cross.spec.proposal.clone()),
            None => return,
        };
        for governance in starts {
            let started = self.submit_proposal(governance.as_str(), spec.clone()).await;
            let Some(mut cross) = self.crosses.get_mut(id) else {
                return;
            };
            match started {
                Ok(proposal) => cross.started(&governance, proposal, ProposalPhase::Support),
                Err(err) => {
                    warn!("⚠️  {} could not start in {}: {}", id, governance, err);
                    cross.resolve(false, format!("{} could not start: {}", governance, err));
                    return;
                }
            }
        }
    }

    /// Fold a proposal's new phase into the cross-governance proposals it belongs to
    async fn settle(&self, governance: &GovernanceId, proposal: &ProposalId, phase: ProposalPhase) {
        let ids: Vec<String> = self
            .crosses
            .iter()
            .filter(|c| c.involves(proposal))
            .map(|c| c.key().clone())
            .collect();
        for id in ids {
            let (status, mode) = match self.crosses.get_mut(&id) {
                Some(mut cross) => {
                    let status = cross.record(proposal, phase).clone();
                    (status, cross.mode())
                }
                None => continue,
            };
            match status {
                CrossStatus::Running => self.advance_cross(&id).await,
                CrossStatus::Passed => info!("🌐 {} passed ({} last in {})", id, proposal, governance),
                CrossStatus::Rejected { reason } => {
                    warn!("🌐 {} rejected: {}", id, reason);
                    if mode == CoordinationMode::Parallel {
                        if let Err(err) = self.abandon_legs(&id, &reason).await {
                            warn!("⚠️  Abandoning legs of {} failed: {}", id, err);
                        }
                    }
                }
            }
        }
    }

    /// Apply a committed cross-governance decision in every governance
    async fn finish_cross_round(&self, id: &str, verdict: Option<Verdict>) -> Result<()> {
        let (governances, actions) = match self.crosses.get(id) {
            Some(cross) => (cross.spec.governances.clone(), cross.spec.proposal.actions.clone()),
            None => return Err(GovernanceError::unknown(EntityKind::CrossGovernance, id)),
        };
        let now = self.now();
        let failure = if verdict != Some(Verdict::Commit(id.to_string())) {
            Some("consensus round did not commit".to_string())
        } else {
            self.apply_everywhere(id, governances, &actions, now).await?
        };
        if let Some(mut cross) = self.crosses.get_mut(id) {
            match &failure {
                None => info!("🌐 {} committed and applied", id),
                Some(reason) => warn!("🌐 {} rejected: {}", id, reason),
            }
            cross.resolve(failure.is_none(), failure.unwrap_or_default());
        }
        Ok(())
    }

    /// Rehearse the actions in every governance on a scratch ledger and apply
    /// them only once all rehearsals succeed
    async fn apply_everywhere(
        &self,
        id: &str,
        governances: Vec<GovernanceId>,
        actions: &[Action],
        now: u64,
    ) -> Result<Option<String>> {
        let mut guards = self
            .lock_all(governances.into_iter().map(|g| (g, ())).collect())
            .await?;
        let rehearsal = {
            let mut scratch = (*self.ledger.read()).clone();
            guards.iter().find_map(|(dao, _)| {
                failure_reason(&dao.id, dao.rehearse_actions(id, actions, &mut scratch, now))
            })
        };
        if rehearsal.is_some() {
            return Ok(rehearsal);
        }
        for (dao, _) in guards.iter_mut() {
            let result = {
                let mut ledger = self.ledger.write();
                dao.apply_actions(id, actions, &mut ledger, now)
            };
            let report = self.guard(dao, result)?;
            if let Some(reason) = failure_reason(&dao.id, Ok(report)) {
                return Ok(Some(reason));
            }
            self.audit(dao)?;
        }
        Ok(None)
    }

    /// Status of a governance, proposal, vote, round or cross-governance proposal
    pub async fn query_status(&self, id: &str) -> Result<StatusReport> {
        if id.starts_with("round-") {
            let report = self.engine.status(&RoundId::new(id))?;
            return Ok(StatusReport::round(report));
        }
        if id.starts_with("cross-") {
            return self
                .crosses
                .get(id)
                .map(|cross| StatusReport::cross(cross.value().clone()))
                .ok_or_else(|| GovernanceError::unknown(EntityKind::CrossGovernance, id));
        }
        match id.split_once('/') {
            Some((governance, _)) => {
                let handle = self.dao(governance)?;
                let dao = handle.lock().await;
                let proposal = dao.proposal(id.strip_suffix("/vote").unwrap_or(id))?;
                Ok(StatusReport::proposal(ProposalStatus::of(&dao.id, proposal)))
            }
            None => {
                let handle = self.dao(id)?;
                let dao = handle.lock().await;
                Ok(StatusReport::governance(GovernanceStatus::of(&dao)))
            }
        }
    }

    pub async fn health(&self) -> HealthReport {
        let handles: Vec<Arc<Mutex<Dao>>> = self.governances.iter().map(|e| e.value().clone()).collect();
        let mut degraded = Vec::new();
        let mut active_votes = 0;
        for handle in &handles {
            let dao = handle.lock().await;
            active_votes += dao.active_votes();
            if dao.degraded().is_some() {
                degraded.push(dao.id.clone());
            }
        }
        degraded.sort();
        HealthReport {
            governances: handles.len(),
            healthy: degraded.is_empty(),
            degraded,
            active_votes,
            active_rounds: self.engine.active_rounds(),
            pending_tasks: self.scheduler.lock().len(),
            checked_at: Utc::now(),
        }
    }

    /// Take a governance out of service by hand
    pub async fn degrade(&self, governance: &str, reason: &str) -> Result<()> {
        let handle = self.dao(governance)?;
        let mut dao = handle.lock().await;
        let _ = self.guard::<()>(&mut dao, Err(GovernanceError::InvariantViolation(reason.to_string())));
        Ok(())
    }
}
