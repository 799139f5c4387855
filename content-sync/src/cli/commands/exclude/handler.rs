use anyhow::Result;
use colored::*;

use super::{AddArgs, ExcludeCommands, ListArgs, RemoveArgs};
use crate::config::Config;
use crate::config::repository::exclusions;
use crate::sync::exclusions::ExclusionRule;

pub async fn handle_exclude_command(args: ExcludeCommands, config: &Config) -> Result<()> {
    match args {
        ExcludeCommands::Add(args) => add(args, config).await,
        ExcludeCommands::Remove(args) => remove(args, config).await,
        ExcludeCommands::List(args) => list(args, config).await,
    }
}

fn rule_from_args(args: &AddArgs) -> ExclusionRule {
    let mut rule = ExclusionRule::for_type(&args.content_type);
    if let Some(document) = &args.document {
        rule = rule.with_document(document);
    }
    if let Some(field) = &args.field {
        rule = rule.with_field(field);
    }
    rule
}

async fn add(args: AddArgs, config: &Config) -> Result<()> {
    let rule = rule_from_args(&args);
    let id = exclusions::add_rule(&config.pool, &args.source, &args.target, &rule).await?;
    println!(
        "Excluding {} for {} → {} (rule {})",
        rule.describe().bold(),
        args.source.cyan(),
        args.target.cyan(),
        id
    );
    Ok(())
}

async fn remove(args: RemoveArgs, config: &Config) -> Result<()> {
    if !exclusions::remove_rule(&config.pool, args.id).await? {
        anyhow::bail!("No exclusion rule with id {}", args.id);
    }
    println!("Removed exclusion rule {}", args.id);
    Ok(())
}

async fn list(args: ListArgs, config: &Config) -> Result<()> {
    let rules = exclusions::list_rules(&config.pool, &args.source, &args.target).await?;
    if rules.is_empty() {
        println!(
            "No exclusion rules for {} → {}",
            args.source.cyan(),
            args.target.cyan()
        );
        return Ok(());
    }

    for rule in &rules {
        let id = rule.id.map(|id| id.to_string()).unwrap_or_default();
        println!("{:>4}  {}", id.dimmed(), rule.describe());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_from_args() {
        let args = AddArgs {
            source: "staging".to_string(),
            target: "prod".to_string(),
            content_type: "api::article.article".to_string(),
            document: None,
            field: Some("seo.metaTitle".to_string()),
        };
        let rule = rule_from_args(&args);
        assert_eq!(rule.document_id, None);
        assert_eq!(rule.field_path.as_deref(), Some("seo.metaTitle"));
    }
}
