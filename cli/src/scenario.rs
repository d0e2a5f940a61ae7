//! Scripted simulation runs
//!
//! A scenario is a JSON file listing participants, validators and an ordered
//! list of steps. Steps run against a fresh orchestrator on a manual clock;
//! `advance` moves the clock and fires every deadline that came due. A step
//! that fails is recorded and the run continues, so scenarios can show the
//! errors the system returns.

use agora_consensus::{ConsensusMessage, RoundSpec, Validator};
use agora_core::{
    EventLog, EventRecord, GovernanceId, ManualClock, Participant, ParticipantId, RoundId,
    SignedMessage,
};
use agora_dao::{
    CrossGovernanceSpec, GovernanceKind, HealthReport, Orchestrator, OrchestratorConfig, StatusReport,
};
use agora_governance::{BallotPayload, ProposalSpec, Role};
use agora_ledger::DelegationScope;
use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub start_ms: u64,
    #[serde(default)]
    pub participants: Vec<ScenarioParticipant>,
    #[serde(default)]
    pub validators: Vec<Validator>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioParticipant {
    pub id: ParticipantId,
    #[serde(default)]
    pub authority: bool,
}

fn genesis() -> String {
    "genesis".to_string()
}

fn member() -> Role {
    Role::Member
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Step {
    /// Uses the config file's defaults with `name` and `founders` applied
    CreateGovernance {
        kind: GovernanceKind,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        founders: Vec<ParticipantId>,
    },
    Mint {
        token: String,
        to: String,
        amount: u64,
        #[serde(default = "genesis")]
        reason: String,
    },
    AddMember {
        governance: String,
        participant: String,
        #[serde(default = "member")]
        role: Role,
        #[serde(default)]
        invited_by: Option<String>,
        #[serde(default)]
        provisional: bool,
    },
    RemoveMember {
        governance: String,
        member: String,
    },
    ChangeRole {
        governance: String,
        by: String,
        member: String,
        role: Role,
    },
    Contribute {
        governance: String,
        from: String,
        asset: String,
        amount: u64,
    },
    Delegate {
        governance: String,
        token: String,
        delegator: String,
        delegate: String,
        #[serde(default)]
        topic: Option<String>,
    },
    Propose {
        governance: String,
        proposal: ProposalSpec,
    },
    Referendum {
        governance: String,
        proposal: ProposalSpec,
    },
    Support {
        governance: String,
        proposal: String,
        supporter: String,
        #[serde(default)]
        stake: Option<u64>,
    },
    Vote {
        governance: String,
        proposal: String,
        voter: String,
        ballot: BallotPayload,
    },
    CancelProposal {
        governance: String,
        proposal: String,
        by: String,
    },
    CancelVote {
        governance: String,
        proposal: String,
        by: String,
    },
    CloseVote {
        governance: String,
        proposal: String,
        by: String,
    },
    /// Move the clock forward and fire what came due
    Advance {
        ms: u64,
    },
    StartRound {
        round: RoundSpec,
    },
    Consensus {
        round: RoundId,
        sender: String,
        message: ConsensusMessage,
    },
    Cross {
        spec: CrossGovernanceSpec,
    },
    Degrade {
        governance: String,
        reason: String,
    },
}

impl Step {
    pub fn op(&self) -> &'static str {
        match self {
            Step::CreateGovernance { .. } => "create-governance",
            Step::Mint { .. } => "mint",
            Step::AddMember { .. } => "add-member",
            Step::RemoveMember { .. } => "remove-member",
            Step::ChangeRole { .. } => "change-role",
            Step::Contribute { .. } => "contribute",
            Step::Delegate { .. } => "delegate",
            Step::Propose { .. } => "propose",
            Step::Referendum { .. } => "referendum",
            Step::Support { .. } => "support",
            Step::Vote { .. } => "vote",
            Step::CancelProposal { .. } => "cancel-proposal",
            Step::CancelVote { .. } => "cancel-vote",
            Step::CloseVote { .. } => "close-vote",
            Step::Advance { .. } => "advance",
            Step::StartRound { .. } => "start-round",
            Step::Consensus { .. } => "consensus",
            Step::Cross { .. } => "cross",
            Step::Degrade { .. } => "degrade",
        }
    }
}

/// Result of one step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutcome {
    pub step: usize,
    pub op: String,
    pub at: u64,
    pub ok: bool,
    pub detail: String,
}

/// Everything a finished run produced
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub finished_at: u64,
    pub steps: Vec<StepOutcome>,
    pub statuses: Vec<StatusReport>,
    pub health: HealthReport,
    pub events: Vec<EventRecord>,
}

impl SimulationReport {
    pub fn failures(&self) -> impl Iterator<Item = &StepOutcome> {
        self.steps.iter().filter(|s| !s.ok)
    }
}

impl Scenario {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("parsing scenario {}", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

pub struct Simulation {
    orch: Orchestrator,
    clock: Arc<ManualClock>,
    events: Arc<EventLog>,
}

impl Simulation {
    pub fn new(config: OrchestratorConfig, start_ms: u64) -> Result<Self> {
        let clock = Arc::new(ManualClock::new(start_ms));
        let events = Arc::new(EventLog::new());
        let orch = Orchestrator::new(
            config,
            clock.clone(),
            Arc::new(agora_core::AcceptAllVerifier),
            events.clone(),
        )?;
        Ok(Self { orch, clock, events })
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orch
    }

    /// Run a whole scenario and collect the final state
    pub async fn run(config: OrchestratorConfig, scenario: Scenario) -> Result<SimulationReport> {
        let sim = Self::new(config, scenario.start_ms)?;
        let now = sim.orch.now();
        for p in &scenario.participants {
            let participant = Participant::new(p.id.clone(), Vec::new(), now).with_authority(p.authority);
            sim.orch.register_participant(participant)?;
        }
        for validator in scenario.validators {
            sim.orch.register_validator(validator)?;
        }

        let mut steps = Vec::with_capacity(scenario.steps.len());
        for (index, step) in scenario.steps.into_iter().enumerate() {
            let op = step.op();
            let outcome = match sim.apply(step).await {
                Ok(detail) => StepOutcome {
                    step: index + 1,
                    op: op.to_string(),
                    at: sim.orch.now(),
                    ok: true,
                    detail,
                },
                Err(err) => {
                    warn!("⚠️  Step {} ({}) failed: {}", index + 1, op, err);
                    StepOutcome {
                        step: index + 1,
                        op: op.to_string(),
                        at: sim.orch.now(),
                        ok: false,
                        detail: err.to_string(),
                    }
                }
            };
            steps.push(outcome);
        }

        let statuses = sim.statuses().await?;
        let health = sim.orch.health().await;
        info!(
            "🏁 Scenario finished at {}ms: {} steps, {} events",
            sim.orch.now(),
            steps.len(),
            sim.events.len()
        );
        Ok(SimulationReport {
            finished_at: sim.orch.now(),
            steps,
            statuses,
            health,
            events: sim.events.records(),
        })
    }

    /// Every governance followed by each of its proposals
    pub async fn statuses(&self) -> Result<Vec<StatusReport>> {
        let mut reports = Vec::new();
        for governance in self.orch.governance_ids() {
            let report = self.orch.query_status(governance.as_str()).await?;
            let proposals = match &report {
                StatusReport::Governance { status, .. } => status.proposals,
                _ => 0,
            };
            reports.push(report);
            for id in proposal_ids(&governance, proposals) {
                if let Ok(report) = self.orch.query_status(&id).await {
                    reports.push(report);
                }
            }
        }
        for round in self.orch.engine().round_ids() {
            reports.push(self.orch.query_status(round.as_str()).await?);
        }
        Ok(reports)
    }

    pub async fn apply(&self, step: Step) -> Result<String> {
        let orch = &self.orch;
        let detail = match step {
            Step::CreateGovernance { kind, name, founders } => {
                let mut config = orch.config().defaults.clone();
                if let Some(name) = name {
                    config.name = name;
                }
                if !founders.is_empty() {
                    config.founders = founders;
                }
                orch.create_governance(kind, Some(config)).await?.to_string()
            }
            Step::Mint {
                token,
                to,
                amount,
                reason,
            } => {
                let balance = orch.mint(&token, &to, amount, &reason)?;
                format!("{} holds {} {}", to, balance, token)
            }
            Step::AddMember {
                governance,
                participant,
                role,
                invited_by,
                provisional,
            } => {
                orch.add_member(&governance, &participant, role, invited_by.as_deref(), provisional)
                    .await?;
                format!("{} joined as {}", participant, role)
            }
            Step::RemoveMember { governance, member } => {
                orch.remove_member(&governance, &member).await?;
                format!("{} removed", member)
            }
            Step::ChangeRole {
                governance,
                by,
                member,
                role,
            } => {
                let previous = orch.change_role(&governance, &by, &member, role).await?;
                format!("{} {} -> {}", member, previous, role)
            }
            Step::Contribute {
                governance,
                from,
                asset,
                amount,
            } => {
                let tx = orch.contribute(&governance, &from, &asset, amount).await?;
                format!("treasury tx {}", tx)
            }
            Step::Delegate {
                governance,
                token,
                delegator,
                delegate,
                topic,
            } => {
                let scope = topic.map(DelegationScope::Topic).unwrap_or(DelegationScope::All);
                let change = orch
                    .delegate(&governance, &token, &delegator, &delegate, scope)
                    .await?;
                format!("{:?}", change)
            }
            Step::Propose { governance, proposal } => {
                orch.submit_proposal(&governance, proposal).await?.to_string()
            }
            Step::Referendum { governance, proposal } => {
                orch.create_referendum(&governance, proposal).await?.to_string()
            }
            Step::Support {
                governance,
                proposal,
                supporter,
                stake,
            } => {
                let receipt = orch
                    .support_proposal(&governance, &proposal, &supporter, stake)
                    .await?;
                format!(
                    "support {} (threshold met: {})",
                    receipt.total_support, receipt.threshold_met
                )
            }
            Step::Vote {
                governance,
                proposal,
                voter,
                ballot,
            } => {
                let receipt = orch.cast_vote(&governance, &proposal, &voter, ballot).await?;
                format!("weight {} (accepted: {})", receipt.weight, receipt.accepted)
            }
            Step::CancelProposal { governance, proposal, by } => {
                orch.cancel_proposal(&governance, &proposal, &by).await?;
                format!("{} cancelled", proposal)
            }
            Step::CancelVote { governance, proposal, by } => {
                orch.cancel_vote(&governance, &proposal, &by).await?;
                format!("vote on {} cancelled", proposal)
            }
            Step::CloseVote { governance, proposal, by } => {
                orch.close_vote(&governance, &proposal, &by).await?;
                format!("vote on {} closed", proposal)
            }
            Step::Advance { ms } => {
                let now = self.clock.advance(ms);
                let fired = orch.tick().await;
                format!("now {}ms, {} fired", now, fired)
            }
            Step::StartRound { round } => orch.execute_consensus(round)?.to_string(),
            Step::Consensus {
                round,
                sender,
                message,
            } => {
                let outcome = orch
                    .submit_consensus(&round, SignedMessage::unsigned(sender, message))
                    .await?;
                format!("{:?}", outcome)
            }
            Step::Cross { spec } => orch.propose_cross(spec).await?,
            Step::Degrade { governance, reason } => {
                orch.degrade(&governance, &reason).await?;
                format!("{} degraded", governance)
            }
        };
        Ok(detail)
    }
}

/// Proposal and referendum ids share one counter per governance
fn proposal_ids(governance: &GovernanceId, count: usize) -> Vec<String> {
    (1..=count)
        .flat_map(|n| {
            [
                format!("{}/prop-{}", governance, n),
                format!("{}/ref-{}", governance, n),
            ]
        })
        .collect()
}
