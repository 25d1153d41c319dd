/*!
savestate CLI - inspect and edit save games from the command line.

Works on a local save directory, optionally mirrored to a second directory or
(with the `s3` feature) an S3 bucket.
*/

use anyhow::{bail, Context};
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use savestate_core::{
    load_flag_file, open_save_game, CloudConfig, CloudTarget, DirectoryStore, DynStore,
    FlagValue, KeyValueStore, SaveConfig, SaveGame,
};
use std::path::PathBuf;
use tabled::{Table, Tabled};
use tracing::{info, warn};

type Game = SaveGame<DirectoryStore, DynStore>;

#[derive(Parser)]
#[command(name = "savestate")]
#[command(about = "CLI for savestate save games")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Local save directory
    #[arg(short, long, global = true, env = "SAVESTATE_DIR", default_value = "./savegame")]
    dir: PathBuf,

    /// Directory used as the cloud mirror
    #[arg(long, global = true)]
    #[cfg_attr(feature = "s3", arg(conflicts_with = "cloud_s3"))]
    cloud_dir: Option<PathBuf>,

    /// S3 location used as the cloud mirror (s3://bucket/prefix)
    #[cfg(feature = "s3")]
    #[arg(long, global = true)]
    cloud_s3: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show where saves live and which side is newer
    Status,
    /// Print the newest saved record
    Show {
        /// Print the record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set a flag and save locally
    SetFlag {
        name: String,
        value: String,
        /// Store the value as text even if it parses as an integer
        #[arg(long)]
        text: bool,
    },
    /// Add to an integer flag and save locally
    Incr {
        name: String,
        #[arg(allow_hyphen_values = true)]
        delta: i64,
    },
    /// Merge flags from a JSON file and save locally
    ImportFlags {
        file: PathBuf,
        /// Replace flags that already exist
        #[arg(long)]
        overwrite: bool,
    },
    /// Reset every flag and save locally
    ResetFlags,
    /// Save the local record and mirror it to the cloud
    Push,
    /// Replace the local save with the cloud save
    Pull,
    /// Start a fresh record and save it locally
    New,
}

#[derive(Tabled)]
struct FlagRow {
    #[tabled(rename = "Flag")]
    name: String,
    #[tabled(rename = "Type")]
    kind: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

#[derive(Tabled)]
struct AliasRow {
    #[tabled(rename = "Sprite")]
    name: String,
    #[tabled(rename = "Alias")]
    target: String,
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let config = create_save_config(&cli)?;
    let mut game = open_save_game(&config)
        .with_context(|| format!("Failed to open save game at {}", config.local_dir.display()))?;

    match cli.command {
        Commands::Status => show_status(&game),
        Commands::Show { json } => show_record(&mut game, json)?,
        Commands::SetFlag { name, value, text } => {
            load_for_edit(&mut game)?;
            let value = parse_flag_value(&value, text);
            println!("{name} = {value}");
            game.records_mut().set_flag(&name, value);
            game.save_local()?;
        }
        Commands::Incr { name, delta } => {
            load_for_edit(&mut game)?;
            let total = game.records_mut().increment_flag(&name, delta);
            println!("{name} = {total}");
            game.save_local()?;
        }
        Commands::ImportFlags { file, overwrite } => {
            let flags = load_flag_file(&file)
                .with_context(|| format!("Failed to import {}", file.display()))?;
            load_for_edit(&mut game)?;
            game.records_mut().merge_flags(&flags, overwrite);
            game.save_local()?;
            println!("✓ Imported {} flags from {}", flags.len(), file.display());
        }
        Commands::ResetFlags => {
            load_for_edit(&mut game)?;
            game.records_mut().reset_all_flags();
            game.save_local()?;
            println!("✓ Flags reset");
        }
        Commands::Push => {
            require_cloud(&game)?;
            load_for_edit(&mut game)?;
            game.save_cloud()?;
            println!("✓ Pushed save to {}", game.cloud().store().describe());
        }
        Commands::Pull => {
            require_cloud(&game)?;
            game.load_from_cloud()?;
            game.save_local()?;
            println!("✓ Pulled save from {}", game.cloud().store().describe());
        }
        Commands::New => {
            game.records_mut().start_new_record();
            game.save_local()?;
            println!("✓ Started a new record in {}", config.local_dir.display());
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"))
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn create_save_config(cli: &Cli) -> Result<SaveConfig, anyhow::Error> {
    let config = SaveConfig::local(&cli.dir);

    #[cfg(feature = "s3")]
    if let Some(uri) = &cli.cloud_s3 {
        let target = CloudTarget::from_uri(uri)?;
        if !matches!(target, CloudTarget::S3 { .. }) {
            bail!("--cloud-s3 expects an s3:// URI, got {uri}");
        }
        return Ok(config.with_cloud(CloudConfig::new(target)));
    }

    Ok(match &cli.cloud_dir {
        Some(path) => config.with_cloud(CloudConfig::new(CloudTarget::Directory {
            path: path.clone(),
        })),
        None => config,
    })
}

fn require_cloud(game: &Game) -> Result<(), anyhow::Error> {
    if !game.cloud_enabled() {
        bail!("No cloud mirror configured (use --cloud-dir)");
    }
    Ok(())
}

/// Load the existing local save, or start a new record if there is none
fn load_for_edit(game: &mut Game) -> Result<(), anyhow::Error> {
    if game.has_local_saved_data() {
        game.load_local().context("Local save exists but could not be loaded")?;
    } else {
        info!("No local save found, starting a new record");
        game.records_mut().start_new_record();
    }
    Ok(())
}

fn parse_flag_value(raw: &str, force_text: bool) -> FlagValue {
    if force_text {
        return FlagValue::Text(raw.to_string());
    }
    raw.parse::<i64>()
        .map(FlagValue::Int)
        .unwrap_or_else(|_| FlagValue::Text(raw.to_string()))
}

fn show_status(game: &Game) {
    println!("Save Status:");
    println!("  Local: {}", game.local().store().describe());
    match game.local().saved_timestamp() {
        Ok(Some(t)) => println!("    Saved: {}", format_timestamp(&t)),
        Ok(None) => println!("    Saved: never"),
        Err(e) => println!("    Saved: unreadable ({e})"),
    }

    if !game.cloud_enabled() {
        println!("  Cloud: disabled");
        return;
    }
    println!("  Cloud: {}", game.cloud().store().describe());
    match game.cloud().saved_timestamp() {
        Ok(Some(t)) => println!("    Saved: {}", format_timestamp(&t)),
        Ok(None) => println!("    Saved: never"),
        Err(e) => println!("    Saved: unreadable ({e})"),
    }
    println!("  Cloud is newer: {}", game.cloud_is_newer());
}

fn show_record(game: &mut Game, json: bool) -> Result<(), anyhow::Error> {
    if !game.has_local_saved_data() && !game.cloud_is_newer() {
        println!("No save found");
        return Ok(());
    }
    let source = game.load_newest()?;
    let Some(record) = game.records().record() else {
        warn!("Load succeeded but no record is present");
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(record)?);
        return Ok(());
    }

    println!("Record (from {source}):");
    let activity = game.records().get_activity();
    println!("  Activity: {}", activity.activity_type);
    for (key, value) in &activity.payload {
        println!("    {key}: {}", serde_json::to_string(value)?);
    }

    let flags: Vec<FlagRow> = record
        .flags
        .iter()
        .map(|(name, value)| FlagRow {
            name: name.clone(),
            kind: value.type_name(),
            value: value.to_string(),
        })
        .collect();
    println!("{}", Table::new(flags));

    if !record.sprite_aliases.is_empty() {
        let aliases: Vec<AliasRow> = record
            .sprite_aliases
            .iter()
            .map(|(name, target)| AliasRow {
                name: name.clone(),
                target: target.clone(),
            })
            .collect();
        println!("{}", Table::new(aliases));
    }
    Ok(())
}

fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S%.3f")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag_value() {
        assert_eq!(parse_flag_value("42", false), FlagValue::Int(42));
        assert_eq!(parse_flag_value("-3", false), FlagValue::Int(-3));
        assert_eq!(parse_flag_value("42", true), FlagValue::Text("42".to_string()));
        assert_eq!(
            parse_flag_value("Marigold", false),
            FlagValue::Text("Marigold".to_string())
        );
    }

    #[test]
    fn test_cli_parses_cloud_dir() {
        let cli = Cli::parse_from([
            "savestate",
            "--dir",
            "/tmp/saves",
            "--cloud-dir",
            "/tmp/mirror",
            "push",
        ]);
        let config = create_save_config(&cli).unwrap();
        assert!(config.cloud_enabled);
        assert_eq!(config.local_dir, PathBuf::from("/tmp/saves"));
    }

    #[test]
    fn test_cli_negative_increment() {
        let cli = Cli::parse_from(["savestate", "incr", "gold", "-5"]);
        assert!(matches!(cli.command, Commands::Incr { delta: -5, .. }));
    }

    #[test]
    fn test_cli_verify() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
