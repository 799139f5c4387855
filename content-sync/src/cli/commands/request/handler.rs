use anyhow::Result;
use colored::*;

use super::{CreateArgs, RequestCommands, ShowArgs};
use crate::cli::commands::{find_request, format_counts, selection_label, status_label};
use crate::config::Config;
use crate::config::repository::{merge_requests, snapshots};
use crate::sync::merge_request::MergeRequest;

pub async fn handle_request_command(args: RequestCommands, config: &Config) -> Result<()> {
    match args {
        RequestCommands::Create(args) => create(args, config).await,
        RequestCommands::List => list(config).await,
        RequestCommands::Show(args) => show(args, config).await,
        RequestCommands::Delete(args) => delete(args, config).await,
    }
}

async fn create(args: CreateArgs, config: &Config) -> Result<()> {
    config.settings.instance(&args.source)?;
    config.settings.instance(&args.target)?;
    if args.source == args.target {
        anyhow::bail!("Source and target must be different instances");
    }

    let request = MergeRequest::new(&args.name, &args.source, &args.target);
    merge_requests::insert_merge_request(&config.pool, &request).await?;

    println!(
        "Created merge request {} ({} → {})",
        request.name.bright_green().bold(),
        request.source_instance.cyan(),
        request.target_instance.cyan()
    );
    println!("  id: {}", request.id.to_string().dimmed());
    Ok(())
}

async fn list(config: &Config) -> Result<()> {
    let requests = merge_requests::list_merge_requests(&config.pool).await?;
    if requests.is_empty() {
        println!("No merge requests. Create one with 'content-sync request create'.");
        return Ok(());
    }

    for request in requests {
        println!(
            "{:<24} {:<16} {} → {}  {} selection(s)  {}",
            request.name.bold(),
            status_label(request.status),
            request.source_instance.cyan(),
            request.target_instance.cyan(),
            request.selection_count,
            request.updated_at.format("%Y-%m-%d %H:%M").to_string().dimmed()
        );
    }
    Ok(())
}

async fn show(args: ShowArgs, config: &Config) -> Result<()> {
    let request = find_request(&config.pool, &args.request).await?;

    println!("{}", request.name.bold());
    println!("  id:      {}", request.id.to_string().dimmed());
    println!("  status:  {}", status_label(request.status));
    println!(
        "  route:   {} → {}",
        request.source_instance.cyan(),
        request.target_instance.cyan()
    );
    println!("  created: {}", request.created_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(compared_at) = request.compared_at {
        println!("  compared: {}", compared_at.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(completed_at) = request.completed_at {
        println!("  completed: {}", completed_at.format("%Y-%m-%d %H:%M:%S"));
    }

    if let Some(check) = &request.schema_check {
        let verdict = if check.is_compatible() {
            "compatible".bright_green()
        } else {
            "incompatible".bright_red()
        };
        println!(
            "  schema:  {} ({} warning(s))",
            verdict,
            check.warnings.len()
        );
    }

    let cached = snapshots::load_snapshot(&config.pool, request.id).await?;
    if let Some(comparison) = cached.and_then(|c| c.comparison) {
        println!("  diff:    {}", format_counts(&comparison.summary().total));
    }

    println!();
    if request.selections.is_empty() {
        println!("No selections.");
        return Ok(());
    }

    println!("Selections:");
    for selection in &request.selections {
        println!(
            "  {:<8} {:<7} {}",
            selection_label(selection.status),
            selection.direction.as_str(),
            selection.key
        );
        if let Some(error) = &selection.error {
            println!("           {}", error.red());
        }
    }
    Ok(())
}

async fn delete(args: ShowArgs, config: &Config) -> Result<()> {
    let request = find_request(&config.pool, &args.request).await?;
    merge_requests::delete_merge_request(&config.pool, &request).await?;
    println!("Deleted merge request {}", request.name.bold());
    Ok(())
}
