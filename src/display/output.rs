use crate::gis::engine::{BatchReport, GisSummary, MatchBreakdown, RebuildReport};
use crate::gis::weights::RawRoleWeights;
use crate::gis::{Domain, NEUTRAL};
use colored::*;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
struct DomainRow {
    domain: String,
    score: String,
    deficit: String,
}

#[derive(Tabled)]
struct ZRow {
    metric: String,
    z: String,
}

#[derive(Tabled)]
struct WeightRow {
    role: String,
    domain: String,
    weight: String,
}

fn colored_score(score: f64) -> String {
    let text = format!("{:.1}", score);
    if score >= NEUTRAL + 3.0 {
        text.green().to_string()
    } else if score <= NEUTRAL - 3.0 {
        text.red().to_string()
    } else {
        text
    }
}

fn signed(value: f64) -> String {
    format!("{:+.2}", value)
}

pub fn display_summary(summary: &GisSummary) {
    let queue = summary.context.queue.map(|q| q.to_string()).unwrap_or_else(|| "any".to_string());
    let role = summary.context.role.as_deref().unwrap_or("any");
    println!(
        "\n{}",
        format!("📈 Growth Improvement Score (queue {}, role {})", queue, role)
            .bold()
            .cyan()
    );
    println!("{}\n", "=".repeat(60).cyan());

    if !summary.gis_visible {
        println!(
            "{}",
            format!(
                "Calibrating: only {} ranked matches in this context so far",
                summary.sample_count
            )
            .yellow()
        );
        return;
    }

    println!(
        "{} {}   {} {}   {} ±{:.1}",
        "Overall:".bold(),
        colored_score(summary.overall),
        "Δ5:".bold(),
        signed(summary.delta5),
        "Band:".bold(),
        summary.confidence_band
    );
    println!(
        "{} {} ({} ranked matches)\n",
        "Stage:".bold(),
        summary.calibration_stage,
        summary.sample_count
    );

    let rows: Vec<DomainRow> = Domain::ALL
        .iter()
        .map(|d| DomainRow {
            domain: d.label(),
            score: colored_score(summary.domains.get(d).copied().unwrap_or(NEUTRAL)),
            deficit: summary.deficits.get(d).map(|v| signed(*v)).unwrap_or_default(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{}", table);

    println!("\n{}", "Focus".bold().yellow());
    match summary.primary {
        Some(primary) => {
            println!("  {} {}", "Primary:".bold().red(), primary.label());
            if !summary.secondary.is_empty() {
                let names: Vec<String> = summary.secondary.iter().map(|d| d.label()).collect();
                println!("  Secondary: {}", names.join(", "));
            }
            if let Some(advice) = &summary.advice {
                println!("  {} {}", "💡".yellow(), advice);
            }
        }
        None => {
            let debug = &summary.focus_debug;
            let candidate = debug.primary_domain.map(|d| d.label()).unwrap_or_else(|| "-".to_string());
            println!(
                "  No stable weakness yet (candidate {}, streak {}, band {:.1})",
                candidate, debug.streak_matches, debug.band_width
            );
        }
    }
    println!();
}

pub fn display_match(breakdown: &MatchBreakdown) {
    println!(
        "\n{}",
        format!("🎮 Match {}", breakdown.match_id).bold().cyan()
    );
    println!("{}\n", "=".repeat(60).cyan());
    println!(
        "{} {}  {}",
        "Instant overall:".bold(),
        colored_score(breakdown.overall_inst),
        if breakdown.computed { "(computed)".dimmed().to_string() } else { "(cached)".dimmed().to_string() }
    );

    let rows: Vec<DomainRow> = breakdown
        .domains
        .iter()
        .map(|(d, v)| DomainRow {
            domain: d.label(),
            score: colored_score(*v),
            deficit: signed(v - NEUTRAL),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{}", table);

    if !breakdown.z.is_empty() {
        let rows: Vec<ZRow> = breakdown
            .z
            .iter()
            .map(|(m, z)| ZRow {
                metric: m.clone(),
                z: signed(*z),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{}", table);
    }
    println!();
}

pub fn display_weights(weights: &RawRoleWeights) {
    println!("\n{}", "⚖️  Role weights".bold().cyan());
    println!("{}\n", "=".repeat(60).cyan());

    let mut rows = vec![];
    for (role, domains) in weights {
        for (domain, weight) in domains {
            rows.push(WeightRow {
                role: role.clone(),
                domain: domain.clone(),
                weight: format!("{:.2}", weight),
            });
        }
    }
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{}\n", table);
}

pub fn display_batch(report: &BatchReport) {
    display_success(&format!(
        "Scored {} matches ({} skipped, {} failed)",
        report.processed, report.skipped, report.failed
    ));
}

pub fn display_rebuild(report: &RebuildReport) {
    display_success(&format!(
        "Rebuilt {} matches across {} contexts",
        report.matches, report.contexts
    ));
    display_batch(&report.second_pass);
}

pub fn display_error(error: &str) {
    eprintln!("{} {}", "❌ Error:".red().bold(), error);
}

pub fn display_info(message: &str) {
    println!("{} {}", "ℹ️".cyan(), message);
}

pub fn display_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}
