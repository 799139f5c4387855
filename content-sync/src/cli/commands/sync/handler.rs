use anyhow::{Context, Result};
use colored::*;

use super::{CompareArgs, PlanArgs, RequestArgs};
use crate::cli::commands::{
    find_request, format_counts, instance_clients, selection_label, state_colored, status_label,
};
use crate::config::Config;
use crate::sync::comparator::ComparisonOutcome;
use crate::sync::merge::MergeReport;
use crate::sync::pipeline::SyncPipeline;
use crate::sync::planner::{Plan, PlanItem};
use crate::sync::schema::{AttributeStatus, SchemaCheck};
use crate::sync::types::ComparisonState;

pub async fn handle_check_command(args: RequestArgs, config: &Config) -> Result<()> {
    let mut request = find_request(&config.pool, &args.request).await?;
    let (source, target) =
        instance_clients(config, &request.source_instance, &request.target_instance)?;
    let pipeline = SyncPipeline::new(&config.pool, &source, &target, &config.settings.sync);

    println!(
        "Checking schemas of {} → {}...",
        request.source_instance.cyan(),
        request.target_instance.cyan()
    );
    let check = pipeline.check(&mut request).await?;
    print_schema_check(&check);
    println!("Status: {}", status_label(request.status));
    Ok(())
}

fn print_schema_check(check: &SchemaCheck) {
    for structure in &check.structures {
        let changed: Vec<_> = structure
            .attributes
            .iter()
            .filter(|a| a.status != AttributeStatus::InBoth)
            .collect();
        if changed.is_empty() {
            continue;
        }
        println!("  {}", structure.uid.bold());
        for attribute in changed {
            println!("    {} {}", attribute.status.symbol(), attribute.name);
        }
    }
    for uid in &check.source_only_types {
        println!("  {} {} (source only)", "+".bright_green(), uid);
    }
    for uid in &check.target_only_types {
        println!("  {} {} (target only)", "-".bright_red(), uid);
    }
    for warning in &check.warnings {
        println!("{} {}", "warning:".yellow(), warning);
    }
    for issue in &check.incompatibilities {
        println!("{} {}", "incompatible:".bright_red().bold(), issue);
    }

    if check.is_compatible() {
        println!("{}", "Schemas are compatible".bright_green());
    } else {
        println!(
            "{}",
            format!(
                "{} incompatibilit(ies) block comparison",
                check.incompatibilities.len()
            )
            .bright_red()
        );
    }
}

pub async fn handle_compare_command(args: CompareArgs, config: &Config) -> Result<()> {
    let mut request = find_request(&config.pool, &args.request).await?;
    let (source, target) =
        instance_clients(config, &request.source_instance, &request.target_instance)?;
    let pipeline = SyncPipeline::new(&config.pool, &source, &target, &config.settings.sync);

    println!(
        "Comparing {} → {}...",
        request.source_instance.cyan(),
        request.target_instance.cyan()
    );
    let run = pipeline.compare(&mut request).await?;

    for warning in &run.schema_check.warnings {
        println!("{} {}", "warning:".yellow(), warning);
    }
    if run.pruned_mappings > 0 {
        println!("Pruned {} stale id mapping(s)", run.pruned_mappings);
    }

    let summary = run.comparison.summary();
    println!();
    for (content_type, counts) in &summary.by_type {
        println!("  {:<40} {}", content_type, format_counts(counts));
    }
    println!("  {:<40} {}", "total".bold(), format_counts(&summary.total));

    if args.list {
        println!();
        print_results(&run.comparison, args.content_type.as_deref());
    }

    println!();
    println!("Status: {}", status_label(request.status));
    Ok(())
}

fn print_results(comparison: &ComparisonOutcome, content_type: Option<&str>) {
    let results = comparison
        .results()
        .filter(|r| r.state != ComparisonState::Identical)
        .filter(|r| content_type.is_none_or(|t| r.key.content_type == t));

    for result in results {
        let line = format!("{} {}", result.state.symbol(), result.key);
        print!("  {}", state_colored(result.state, &line));
        if let Some(target_doc) = result.target_document_id.as_deref() {
            print!(" {}", format!("(target {})", target_doc).dimmed());
        }
        if !result.changed_fields.is_empty() {
            print!(" {}", result.changed_fields.join(", ").dimmed());
        }
        println!();
    }
}

pub async fn handle_plan_command(args: PlanArgs, config: &Config) -> Result<()> {
    let request = find_request(&config.pool, &args.request).await?;
    let (source, target) =
        instance_clients(config, &request.source_instance, &request.target_instance)?;
    let pipeline = SyncPipeline::new(&config.pool, &source, &target, &config.settings.sync);

    let plan = pipeline.plan(&request).await?;

    if args.json {
        let json = serde_json::to_string_pretty(&plan).context("Failed to format plan")?;
        println!("{}", json);
        return Ok(());
    }

    print_plan(&plan);
    Ok(())
}

fn print_items(items: &[PlanItem]) {
    for item in items {
        println!("    {:<7} {}", item.direction.as_str(), item.key);
    }
}

fn print_plan(plan: &Plan) {
    if plan.is_empty() {
        println!("Nothing selected.");
        return;
    }

    for (n, batch) in plan.batches.iter().enumerate() {
        println!("  {}", format!("Batch {}", n + 1).bold());
        print_items(batch);
    }
    if !plan.cyclic.is_empty() {
        println!("  {}", "Cyclic (created first, references patched after)".yellow());
        print_items(&plan.cyclic);
        for edge in &plan.circular_edges {
            println!(
                "    {} {} {} {}",
                edge.from,
                format!("--{}-->", edge.field_path).dimmed(),
                edge.to,
                "(circular)".yellow()
            );
        }
    }
    if !plan.deletions.is_empty() {
        println!("  {}", "Deletions".bright_red());
        print_items(&plan.deletions);
    }
    if !plan.missing_dependencies.is_empty() {
        println!();
        println!("{}", "Missing dependencies:".yellow());
        for missing in &plan.missing_dependencies {
            println!(
                "  {} {} → {} (not selected, not on target)",
                missing.key,
                missing.field_path.dimmed(),
                missing.target
            );
        }
    }
    println!();
    println!("{} item(s)", plan.item_count());
}

pub async fn handle_apply_command(args: RequestArgs, config: &Config) -> Result<()> {
    let mut request = find_request(&config.pool, &args.request).await?;
    let (source, target) =
        instance_clients(config, &request.source_instance, &request.target_instance)?;
    let pipeline = SyncPipeline::new(&config.pool, &source, &target, &config.settings.sync);

    println!(
        "Applying {} ({} selection(s)) to {}...",
        request.name.bold(),
        request.selections.len(),
        request.target_instance.cyan()
    );
    let report = pipeline.apply(&mut request).await?;
    print_report(&report);

    println!();
    println!("Status: {}", status_label(request.status));
    if !report.all_succeeded() {
        anyhow::bail!("{} selection(s) failed", report.failed_count());
    }
    Ok(())
}

fn print_report(report: &MergeReport) {
    for outcome in &report.outcomes {
        println!(
            "  {:<8} {:<7} {} {}",
            selection_label(outcome.status),
            outcome.direction.as_str(),
            outcome.key,
            format!("[{}]", outcome.phase.label()).dimmed()
        );
        if let Some(error) = &outcome.error {
            println!("           {}", error.red());
        }
        for dropped in &outcome.dropped {
            let target = dropped
                .target
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "unknown entity".to_string());
            println!(
                "           {} {} → {}",
                "dropped".yellow(),
                dropped.field_path,
                target
            );
        }
    }
    if !report.repatched.is_empty() {
        println!("  Re-patched {} circular reference holder(s)", report.repatched.len());
    }

    let elapsed = report.finished_at - report.started_at;
    println!(
        "{} succeeded, {} failed in {:.1}s",
        report.succeeded_count().to_string().bright_green(),
        report.failed_count().to_string().bright_red(),
        elapsed.num_milliseconds() as f64 / 1000.0
    );
}
