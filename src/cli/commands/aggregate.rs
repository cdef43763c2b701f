//! Recipe aggregation command.

use console::style;

use crate::aggregate::{AggregateError, AttemptOutcome, SourceAttempt};
use crate::cli::helpers::{build_aggregator, truncate};
use crate::config::Config;

fn print_attempts(attempts: &[SourceAttempt]) {
    for attempt in attempts {
        let latency = attempt
            .latency_ms
            .map(|ms| format!(" ({}ms)", ms))
            .unwrap_or_default();
        let line = match &attempt.outcome {
            AttemptOutcome::Accepted {
                completeness,
                match_score,
            } => format!(
                "{} {} accepted, {}% complete, match {:.2}",
                style("✓").green(),
                attempt.source_id,
                completeness,
                match_score
            ),
            AttemptOutcome::Duplicate { similarity } => format!(
                "{} {} duplicate ({:.2} similar)",
                style("=").cyan(),
                attempt.source_id,
                similarity
            ),
            AttemptOutcome::NoMatch { results } => format!(
                "{} {} no match in {} results",
                style("-").dim(),
                attempt.source_id,
                results
            ),
            AttemptOutcome::Skipped { reason } => format!(
                "{} {} skipped: {}",
                style("→").dim(),
                attempt.source_id,
                reason
            ),
            AttemptOutcome::Failed { reason, detail } => format!(
                "{} {} {}: {}",
                style("✗").red(),
                attempt.source_id,
                reason,
                truncate(detail, 60)
            ),
        };
        println!("  {}{}", line, style(latency).dim());
    }
}

/// Query every configured source and print the merged recipe.
pub async fn cmd_aggregate(
    config: &Config,
    query: &str,
    hint_url: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    if config.sources.is_empty() {
        anyhow::bail!("No sources configured. Add [[sources]] entries to larder.toml.");
    }

    let aggregator = build_aggregator(config)?;

    let result = match aggregator.aggregate(query, hint_url).await {
        Ok(result) => result,
        Err(AggregateError::NoCandidatesFound {
            query,
            attempts,
            rejections,
        }) => {
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "error": "no_candidates_found",
                        "query": query,
                        "attempts": attempts,
                        "rejections": rejections,
                    }))?
                );
            } else {
                println!("{} No candidates found for \"{}\"", style("✗").red(), query);
                print_attempts(&attempts);
            }
            std::process::exit(1);
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let recipe = &result.recipe;
    println!("\n{}", style(&recipe.title).bold());
    println!(
        "{} {}% complete, {:.0}% confidence, from {}",
        style("→").dim(),
        result.combined_completeness,
        result.combined_confidence,
        result.sources.join(", ")
    );
    if let Some(url) = &recipe.source_url {
        println!("{} {}", style("→").dim(), url);
    }

    if !recipe.ingredients.is_empty() {
        println!("\n{}", style("Ingredients").bold());
        for line in &recipe.ingredients {
            println!("  • {}", line);
        }
    }
    if !recipe.instructions.is_empty() {
        println!("\n{}", style("Instructions").bold());
        for (i, step) in recipe.instructions.iter().enumerate() {
            println!("  {}. {}", i + 1, step);
        }
    }

    println!("\n{}", style("Sources").bold());
    print_attempts(&result.attempts);
    for rejection in &result.rejections {
        println!(
            "  {} {} rejected \"{}\" as duplicate ({:.2})",
            style("=").cyan(),
            rejection.source_id,
            truncate(&rejection.title, 40),
            rejection.similarity
        );
    }

    Ok(())
}
