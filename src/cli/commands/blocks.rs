//! Block registry commands.

use chrono::Utc;
use console::style;

use crate::blocklist::{BlockRecord, BlockRegistry};
use crate::cli::helpers::{relative_time, truncate};
use crate::utils::extract_domain;

/// List every tracked domain.
pub async fn cmd_blocks_list(registry: &BlockRegistry, json: bool) -> anyhow::Result<()> {
    let records = registry.list().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("{} No domains tracked", style("✓").green());
        return Ok(());
    }

    let now = Utc::now();
    println!(
        "\n{} ({} backend)",
        style("Block Registry").bold(),
        registry.backend_name()
    );
    println!("{}", "-".repeat(90));
    println!(
        "{:<28} {:<10} {:>8} {:<16} {:<12} Reason",
        "Domain", "State", "Failures", "Type", "Until"
    );
    println!("{}", "-".repeat(90));

    for record in &records {
        let state = match record.state_label(now) {
            "permanent" => style("permanent").red(),
            "cooldown" => style("cooldown").yellow(),
            other => style(other).dim(),
        };
        let until = record
            .cooldown_until
            .filter(|_| !record.is_permanent())
            .map(|t| relative_time(t, now))
            .unwrap_or_else(|| "-".to_string());

        println!(
            "{:<28} {:<10} {:>8} {:<16} {:<12} {}",
            truncate(&record.domain, 27),
            state,
            record.attempt_count,
            record.error_type.as_str(),
            until,
            truncate(&record.reason, 40)
        );
    }

    Ok(())
}

fn print_record(record: &BlockRecord) {
    let now = Utc::now();
    println!("  {} Failures: {}", style("→").dim(), record.attempt_count);
    println!("  {} Type: {}", style("→").dim(), record.error_type);
    println!("  {} Reason: {}", style("→").dim(), record.reason);
    println!(
        "  {} First failed: {}",
        style("→").dim(),
        record.first_failed_at.format("%Y-%m-%d %H:%M")
    );
    if let Some(until) = record.cooldown_until.filter(|_| !record.is_permanent()) {
        println!(
            "  {} Cooldown ends: {}",
            style("→").dim(),
            relative_time(until, now)
        );
    }
}

/// Check whether a URL's domain is currently blocked.
pub async fn cmd_blocks_check(registry: &BlockRegistry, url: &str) -> anyhow::Result<()> {
    let Some(domain) = extract_domain(url) else {
        anyhow::bail!("Cannot extract a domain from '{}'", url);
    };

    if registry.is_blocked(url).await {
        println!("{} {} is blocked", style("✗").red(), style(&domain).bold());
    } else {
        println!("{} {} is not blocked", style("✓").green(), style(&domain).bold());
    }

    if let Some(record) = registry.get(&domain).await? {
        print_record(&record);
    }

    Ok(())
}

/// Remove a domain's record entirely.
pub async fn cmd_blocks_unblock(registry: &BlockRegistry, domain: &str) -> anyhow::Result<()> {
    let domain = extract_domain(domain).unwrap_or_else(|| domain.to_string());

    if registry.unblock(&domain).await? {
        println!("{} Unblocked {}", style("✓").green(), domain);
    } else {
        println!("{} {} was not tracked", style("!").yellow(), domain);
    }

    Ok(())
}

/// Record a failure against a URL's domain.
pub async fn cmd_blocks_fail(
    registry: &BlockRegistry,
    url: &str,
    message: &str,
) -> anyhow::Result<()> {
    let Some(record) = registry.record_failure(url, message).await else {
        anyhow::bail!("Failed to record failure for '{}'", url);
    };

    let now = Utc::now();
    println!(
        "{} Recorded {} failure for {} ({})",
        style("!").yellow(),
        record.error_type,
        style(&record.domain).bold(),
        record.state_label(now)
    );
    print_record(&record);

    Ok(())
}

/// Record a success against a URL's domain.
pub async fn cmd_blocks_succeed(registry: &BlockRegistry, url: &str) -> anyhow::Result<()> {
    let Some(domain) = extract_domain(url) else {
        anyhow::bail!("Cannot extract a domain from '{}'", url);
    };

    match registry.record_success(url).await {
        Some(record) => {
            println!(
                "{} Recorded success for {} ({} failures remain)",
                style("✓").green(),
                style(&domain).bold(),
                record.attempt_count
            );
        }
        None => println!("{} {} has a clean record", style("✓").green(), domain),
    }

    Ok(())
}
