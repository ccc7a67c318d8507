use std::sync::Arc;

use anyhow::{bail, Context};
use async_trait::async_trait;
use colored::Colorize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

use somnia_sdk::{
    AutoConfirm, Collection, ConfirmOverwrite, DurabilityNotifier, DurabilityWarning, Journal,
    JournalConfig, OverwriteKind, Record, RemoteProvider, Snapshot, SyncOutcome,
};
use somnia_types::{format_timestamp, now};

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    match &cli.command {
        Command::Init(args) => cmd_init(&cli, args).await,
        Command::Status(_) => cmd_status(&cli).await,
        Command::New(args) => cmd_new(&cli, args).await,
        Command::Put(args) => cmd_put(&cli, args).await,
        Command::Get(args) => cmd_get(&cli, args).await,
        Command::List(args) => cmd_list(&cli, args).await,
        Command::Delete(args) => cmd_delete(&cli, args).await,
        Command::Export(args) => cmd_export(&cli, args).await,
        Command::Import(args) => cmd_import(&cli, args).await,
        Command::Encryption(args) => cmd_encryption(&cli, args).await,
        Command::Sync(args) => cmd_sync(&cli, args).await,
    }
}

/// Prints durability warnings as soon as storage is selected.
struct PrintWarning;

impl DurabilityNotifier for PrintWarning {
    fn notify(&self, warning: &DurabilityWarning) {
        eprintln!("{} {}", "warning:".yellow().bold(), warning.message);
    }
}

/// Asks on the terminal before a sync or import overwrites data.
struct StdinConfirm;

#[async_trait]
impl ConfirmOverwrite for StdinConfirm {
    async fn confirm_overwrite(&self, kind: OverwriteKind) -> bool {
        let question = match kind {
            OverwriteKind::Local => "Local changes since the last sync will be overwritten.",
            OverwriteKind::Remote => "The remote backup changed since the last sync and will be overwritten.",
        };
        eprint!("{} Continue? [y/N] ", question.yellow());
        let mut line = String::new();
        match BufReader::new(tokio::io::stdin()).read_line(&mut line).await {
            Ok(_) => matches!(line.trim(), "y" | "Y" | "yes"),
            Err(_) => false,
        }
    }
}

fn confirmer(yes: bool) -> Arc<dyn ConfirmOverwrite> {
    if yes {
        Arc::new(AutoConfirm(true))
    } else {
        Arc::new(StdinConfirm)
    }
}

async fn open(cli: &Cli) -> anyhow::Result<Journal> {
    let config = JournalConfig::load_or_default(&cli.config)
        .with_context(|| format!("reading {}", cli.config.display()))?;
    let journal = Journal::open_with_notifier(config, Some(Arc::new(PrintWarning))).await?;
    if let Some(password) = &cli.password {
        journal.unlock(password)?;
    }
    Ok(journal)
}

fn password(cli: &Cli) -> anyhow::Result<&str> {
    cli.password
        .as_deref()
        .context("a password is required: pass --password or set SOMNIA_PASSWORD")
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn label(record: &Record) -> &str {
    record
        .get("title")
        .or_else(|| record.get("text"))
        .and_then(Value::as_str)
        .unwrap_or("(untitled)")
}

async fn cmd_init(cli: &Cli, args: &InitArgs) -> anyhow::Result<()> {
    if cli.config.exists() && !args.force {
        bail!("{} already exists (use --force to overwrite)", cli.config.display());
    }
    if args.encrypt {
        password(cli)?;
    }
    let mut config = JournalConfig::at(&args.dir);
    config.encryption.enabled = args.encrypt;
    config.remote.folder = args.remote.clone();
    std::fs::write(&cli.config, config.to_toml()?)
        .with_context(|| format!("writing {}", cli.config.display()))?;

    let journal = open(cli).await?;
    if args.encrypt {
        journal.enable_encryption(password(cli)?).await?;
    }
    println!(
        "{} Initialized journal in {}",
        "✓".green().bold(),
        args.dir.display().to_string().bold()
    );
    println!("  Storage: {}", journal.mode().to_string().cyan());
    println!(
        "  Encryption: {}",
        if args.encrypt { "enabled".green() } else { "disabled".yellow() }
    );
    Ok(())
}

async fn cmd_status(cli: &Cli) -> anyhow::Result<()> {
    let journal = open(cli).await?;
    let store = journal.vault().store();
    let mut counts = serde_json::Map::new();
    for collection in Collection::ALL {
        counts.insert(collection.to_string(), store.get_all(collection)?.len().into());
    }
    let last_sync = journal.sync_marker().last_sync()?;

    if matches!(cli.format, OutputFormat::Json) {
        return print_json(&json!({
            "mode": journal.mode(),
            "schemaVersion": journal.backends().schema_version(),
            "encryption": {
                "enabled": journal.encryption_enabled(),
                "unlocked": journal.is_unlocked(),
            },
            "lastSync": last_sync.map(|t| format_timestamp(&t)),
            "records": counts,
        }));
    }

    println!("Storage: {}", journal.mode().to_string().cyan().bold());
    if let Some(version) = journal.backends().schema_version() {
        println!("Schema version: {}", version.to_string().bold());
    }
    let encryption = match (journal.encryption_enabled(), journal.is_unlocked()) {
        (false, _) => "disabled".yellow(),
        (true, true) => "enabled, unlocked".green(),
        (true, false) => "enabled, locked".red(),
    };
    println!("Encryption: {encryption}");
    match last_sync {
        Some(t) => println!("Last sync: {}", format_timestamp(&t)),
        None => println!("Last sync: {}", "never".dimmed()),
    }
    for (name, count) in &counts {
        println!("  {name}: {count}");
    }
    Ok(())
}

async fn cmd_new(cli: &Cli, args: &NewArgs) -> anyhow::Result<()> {
    let journal = open(cli).await?;
    let stamp = format_timestamp(&now());
    let id = Uuid::now_v7().to_string();
    let mut dream = Record::new(id.clone())
        .with("title", args.title.as_str())
        .with("created", stamp.as_str())
        .with("modified", stamp.as_str());
    if let Some(content) = &args.content {
        dream.set("content", content.as_str());
    }
    for (key, value) in &args.fields {
        dream.set(key.as_str(), value.as_str());
    }
    journal.save_dream(dream).await?;
    println!("{} Saved dream {}", "✓".green().bold(), id.yellow());
    Ok(())
}

async fn cmd_put(cli: &Cli, args: &PutArgs) -> anyhow::Result<()> {
    let mut record = Record::from_json(&args.json).context("record must be a JSON object")?;
    if record.id().is_none() {
        record.set("id", Uuid::now_v7().to_string());
    }
    record.set("modified", format_timestamp(&now()));
    let id = record.id().unwrap_or_default().to_string();

    let journal = open(cli).await?;
    journal.save(args.collection, record).await?;
    println!("{} Saved {} {}", "✓".green().bold(), args.collection, id.yellow());
    Ok(())
}

async fn cmd_get(cli: &Cli, args: &GetArgs) -> anyhow::Result<()> {
    let journal = open(cli).await?;
    match journal.load(args.collection, &args.id)? {
        Some(record) => print_json(&record),
        None => bail!("no {} record with id {}", args.collection, args.id),
    }
}

async fn cmd_list(cli: &Cli, args: &ListArgs) -> anyhow::Result<()> {
    let journal = open(cli).await?;
    let records = journal.load_all(args.collection)?;
    if matches!(cli.format, OutputFormat::Json) {
        return print_json(&records);
    }
    if records.is_empty() {
        println!("No {}.", args.collection);
        return Ok(());
    }
    for record in &records {
        let when = record
            .last_changed()
            .map(|t| format_timestamp(&t))
            .unwrap_or_default();
        println!(
            "{}  {}  {}",
            record.id().unwrap_or_default().yellow(),
            when.dimmed(),
            label(record)
        );
    }
    Ok(())
}

async fn cmd_delete(cli: &Cli, args: &DeleteArgs) -> anyhow::Result<()> {
    let journal = open(cli).await?;
    if journal.delete(args.collection, &args.id).await? {
        println!("{} Deleted {} {}", "✓".green().bold(), args.collection, args.id.yellow());
    } else {
        println!("No {} record with id {}", args.collection, args.id);
    }
    Ok(())
}

async fn cmd_export(cli: &Cli, args: &ExportArgs) -> anyhow::Result<()> {
    let journal = open(cli).await?;
    let snapshot = journal.export_snapshot()?;
    let text = snapshot.to_json()?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
            eprintln!(
                "{} Exported {} records to {}",
                "✓".green().bold(),
                snapshot.data.len(),
                path.display()
            );
        }
        None => println!("{text}"),
    }
    Ok(())
}

async fn cmd_import(cli: &Cli, args: &ImportArgs) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(&args.path)
        .with_context(|| format!("reading {}", args.path.display()))?;
    let snapshot = Snapshot::from_json(&text)?;
    let journal = open(cli).await?;
    if !confirmer(args.yes).confirm_overwrite(OverwriteKind::Local).await {
        println!("Import cancelled.");
        return Ok(());
    }
    let written = journal.import_snapshot(&snapshot).await?;
    println!("{} Imported {} records", "✓".green().bold(), written);
    Ok(())
}

async fn cmd_encryption(cli: &Cli, args: &EncryptionArgs) -> anyhow::Result<()> {
    match args.action {
        EncryptionAction::Enable => {
            let pw = password(cli)?;
            let journal = open(cli).await?;
            let converted = journal.enable_encryption(pw).await?;
            println!("{} Encryption enabled ({} records sealed)", "✓".green().bold(), converted);
        }
        EncryptionAction::Disable => {
            let journal = open(cli).await?;
            let converted = journal.disable_encryption().await?;
            println!("{} Encryption disabled ({} records opened)", "✓".green().bold(), converted);
        }
        EncryptionAction::Status => {
            let journal = open(cli).await?;
            if journal.encryption_enabled() {
                println!("Encryption: {}", "enabled".green());
            } else {
                println!("Encryption: {}", "disabled".yellow());
            }
        }
    }
    Ok(())
}

fn remote(journal: &Journal) -> anyhow::Result<Arc<dyn RemoteProvider>> {
    let folder = journal
        .config()
        .folder_remote()
        .context("no remote configured: set [remote] folder in the configuration file")?;
    Ok(Arc::new(folder))
}

fn print_outcome(outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Uploaded { export_date, records } => println!(
            "{} Uploaded {} records (exported {})",
            "✓".green().bold(),
            records,
            format_timestamp(export_date)
        ),
        SyncOutcome::Downloaded { export_date, records } => println!(
            "{} Downloaded {} records (exported {})",
            "✓".green().bold(),
            records,
            format_timestamp(export_date)
        ),
        SyncOutcome::Declined(kind) => println!("Sync cancelled; {kind} data left unchanged."),
        SyncOutcome::NothingToDownload => println!("The remote holds no backup yet."),
    }
}

async fn cmd_sync(cli: &Cli, args: &SyncArgs) -> anyhow::Result<()> {
    let journal = open(cli).await?;
    match args.action {
        SyncAction::Push { yes } => {
            let engine = journal.sync_engine(remote(&journal)?, confirmer(yes));
            print_outcome(&engine.upload().await?);
        }
        SyncAction::Pull { yes } => {
            let engine = journal.sync_engine(remote(&journal)?, confirmer(yes));
            print_outcome(&engine.download().await?);
        }
        SyncAction::Status => {
            let engine = journal.sync_engine(remote(&journal)?, confirmer(false));
            let last_sync = journal.sync_marker().last_sync()?;
            let report = engine.detector().assess(last_sync).await;
            if matches!(cli.format, OutputFormat::Json) {
                return print_json(&json!({
                    "lastSync": last_sync.map(|t| format_timestamp(&t)),
                    "localChanges": report.local_changes,
                    "remoteChanges": report.remote_changes,
                    "conflict": report.is_conflict(),
                }));
            }
            match last_sync {
                Some(t) => println!("Last sync: {}", format_timestamp(&t)),
                None => println!("Last sync: {}", "never".dimmed()),
            }
            println!("Local changes: {}", yes_no(report.local_changes));
            println!("Remote changes: {}", yes_no(report.remote_changes));
            if report.is_conflict() {
                println!("{} both sides changed; push or pull will ask before overwriting", "conflict:".red().bold());
            }
        }
        SyncAction::Disconnect => {
            if journal.disconnect()? {
                println!("{} Disconnected; the next sync starts fresh", "✓".green().bold());
            } else {
                println!("Not connected.");
            }
        }
    }
    Ok(())
}

fn yes_no(value: bool) -> colored::ColoredString {
    if value {
        "yes".yellow()
    } else {
        "no".green()
    }
}
