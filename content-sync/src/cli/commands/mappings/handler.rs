use anyhow::Result;
use colored::*;

use super::{ListArgs, MappingsCommands, PruneArgs};
use crate::cli::commands::instance_clients;
use crate::config::Config;
use crate::config::repository::id_mappings;
use crate::sync::loader;

pub async fn handle_mappings_command(args: MappingsCommands, config: &Config) -> Result<()> {
    match args {
        MappingsCommands::List(args) => list(args, config).await,
        MappingsCommands::Prune(args) => prune(args, config).await,
    }
}

async fn list(args: ListArgs, config: &Config) -> Result<()> {
    let mappings = id_mappings::list_mappings(
        &config.pool,
        &args.pair.source,
        &args.pair.target,
        args.content_type.as_deref(),
    )
    .await?;

    if mappings.is_empty() {
        println!(
            "No id mappings for {} → {}",
            args.pair.source.cyan(),
            args.pair.target.cyan()
        );
        return Ok(());
    }

    for mapping in &mappings {
        println!(
            "{:<36} {:<6} {} ({}) → {} ({})",
            mapping.content_type,
            mapping.locale.as_deref().unwrap_or("-").dimmed(),
            mapping.source_document_id,
            mapping.source_id,
            mapping.target_document_id.bright_green(),
            mapping.target_id
        );
    }
    println!("{} mapping(s)", mappings.len());
    Ok(())
}

async fn prune(args: PruneArgs, config: &Config) -> Result<()> {
    let (source_name, target_name) = (&args.pair.source, &args.pair.target);

    if args.all {
        let removed = id_mappings::clear_mappings(&config.pool, source_name, target_name).await?;
        println!(
            "Removed {} mapping(s) for {} → {}",
            removed,
            source_name.cyan(),
            target_name.cyan()
        );
        return Ok(());
    }

    let (source, target) = instance_clients(config, source_name, target_name)?;
    let mut loader_config = config.settings.sync.loader();
    loader_config.fingerprint_media = false;

    println!("Loading {} and {}...", source_name.cyan(), target_name.cyan());
    let snapshot = loader::prefetch(&source, &target, &loader_config).await?;

    let mut table = id_mappings::load_table(&config.pool, source_name, target_name).await?;
    let stale = table.sanitize(&snapshot);
    let (refreshed, _) =
        id_mappings::save_changes(&config.pool, source_name, target_name, &mut table).await?;

    println!(
        "Pruned {} stale mapping(s), refreshed {} ({} remain)",
        stale,
        refreshed,
        table.len()
    );
    Ok(())
}
