//! Terminal rendering of simulation results

use crate::scenario::{SimulationReport, StepOutcome};
use agora_dao::StatusReport;
use owo_colors::OwoColorize;

const RULE: &str = "═══════════════════════════════════════════════════";

fn banner(title: &str) {
    println!("\n{}", RULE.cyan());
    println!("{}", title.cyan().bold());
    println!("{}", RULE.cyan());
}

fn step_line(step: &StepOutcome) -> String {
    let mark = if step.ok {
        "✓".green().to_string()
    } else {
        "✗".red().to_string()
    };
    format!(
        "  {} {:>3}. {:<18} @{:<8} {}",
        mark,
        step.step,
        step.op.yellow(),
        step.at,
        step.detail
    )
}

fn status_line(report: &StatusReport) -> String {
    match report {
        StatusReport::Governance { status, .. } => format!(
            "{} {} ({}) members={} proposals={} votes={} treasury={:?}{}",
            "🏛️ ".bold(),
            status.id.bright_blue(),
            status.kind,
            status.members,
            status.proposals,
            status.active_votes,
            status.treasury,
            status
                .degraded
                .as_ref()
                .map(|r| format!(" DEGRADED: {}", r).red().to_string())
                .unwrap_or_default()
        ),
        StatusReport::Proposal { status, .. } => {
            let outcome = status
                .vote
                .as_ref()
                .and_then(|v| v.decision.as_ref())
                .map(|d| {
                    format!(
                        " outcome={} passed={} quorum={}",
                        d.outcome.as_deref().unwrap_or("none"),
                        d.passed,
                        d.quorum_met
                    )
                })
                .unwrap_or_default();
            format!(
                "   📜 {} [{}] {} \"{}\"{}{}",
                status.id.bright_blue(),
                status.category,
                status.phase.to_string().green(),
                status.title,
                outcome,
                status
                    .reason
                    .as_ref()
                    .map(|r| format!(" ({})", r))
                    .unwrap_or_default()
            )
        }
        StatusReport::Round { status, .. } => format!(
            "{} {} {} {:?} view={} messages={} decision={}",
            "🔏".bold(),
            status.id.bright_blue(),
            status.mechanism,
            status.status,
            status.view,
            status.messages,
            status.decision.as_deref().unwrap_or("none")
        ),
        StatusReport::Cross { status, .. } => format!(
            "{} {} {:?} legs={} {:?}",
            "🌐".bold(),
            status.id.bright_blue(),
            status.spec.mode,
            status.legs.len(),
            status.status
        ),
    }
}

pub fn print_report(report: &SimulationReport) {
    banner("SCENARIO STEPS");
    for step in &report.steps {
        println!("{}", step_line(step));
    }

    banner("STATUS");
    for status in &report.statuses {
        println!("{}", status_line(status));
    }

    banner("EVENTS");
    for record in &report.events {
        println!(
            "  #{:<4} @{:<8} {}",
            record.seq,
            record.at,
            record.event.name().bright_white()
        );
    }

    let health = &report.health;
    println!();
    let verdict = if health.healthy {
        "healthy".green().bold().to_string()
    } else {
        "degraded".red().bold().to_string()
    };
    println!(
        "{}: {} ({} governances, {} active votes, {} active rounds, {} pending tasks)",
        "Health".yellow().bold(),
        verdict,
        health.governances,
        health.active_votes,
        health.active_rounds,
        health.pending_tasks
    );
    let failures = report.failures().count();
    if failures > 0 {
        println!("{}: {}", "Failed steps".yellow().bold(), failures.to_string().red());
    }
    println!();
}
