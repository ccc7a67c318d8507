use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use somnia_types::Collection;

#[derive(Parser)]
#[command(
    name = "somnia",
    about = "Somnia -- local-first dream journal",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[arg(long, global = true, default_value = "somnia.toml")]
    pub config: PathBuf,

    /// Session password for encrypted journals
    #[arg(long, global = true, env = "SOMNIA_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Write a configuration file for a new journal
    Init(InitArgs),
    /// Show storage tier, encryption, and sync state
    Status(StatusArgs),
    /// Record a new dream
    New(NewArgs),
    /// Store a record given as JSON
    Put(PutArgs),
    /// Print one record
    Get(GetArgs),
    /// List the records of a collection
    List(ListArgs),
    /// Delete one record
    Delete(DeleteArgs),
    /// Write a plaintext snapshot of the journal
    Export(ExportArgs),
    /// Replace the journal with a snapshot
    Import(ImportArgs),
    /// Manage at-rest encryption
    Encryption(EncryptionArgs),
    /// Synchronize with the configured remote folder
    Sync(SyncArgs),
}

fn parse_collection(s: &str) -> Result<Collection, somnia_types::TypeError> {
    s.parse()
}

#[derive(Args)]
pub struct InitArgs {
    /// Data directory
    #[arg(default_value = "somnia-data")]
    pub dir: PathBuf,
    /// Encrypt dreams and goals from the start
    #[arg(long)]
    pub encrypt: bool,
    /// Folder to sync with
    #[arg(long)]
    pub remote: Option<PathBuf>,
    /// Overwrite an existing configuration file
    #[arg(long)]
    pub force: bool,
}

#[derive(Args)]
pub struct StatusArgs {}

#[derive(Args)]
pub struct NewArgs {
    pub title: String,
    #[arg(short, long)]
    pub content: Option<String>,
    /// Extra field as key=value
    #[arg(long = "field", value_parser = parse_field)]
    pub fields: Vec<(String, String)>,
}

pub fn parse_field(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got {s:?}")),
    }
}

#[derive(Args)]
pub struct PutArgs {
    #[arg(value_parser = parse_collection)]
    pub collection: Collection,
    /// Record as a JSON object; an `id` is generated when absent
    pub json: String,
}

#[derive(Args)]
pub struct GetArgs {
    #[arg(value_parser = parse_collection)]
    pub collection: Collection,
    pub id: String,
}

#[derive(Args)]
pub struct ListArgs {
    #[arg(value_parser = parse_collection, default_value = "dreams")]
    pub collection: Collection,
}

#[derive(Args)]
pub struct DeleteArgs {
    #[arg(value_parser = parse_collection)]
    pub collection: Collection,
    pub id: String,
}

#[derive(Args)]
pub struct ExportArgs {
    /// Output file; stdout when omitted
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct ImportArgs {
    pub path: PathBuf,
    /// Do not ask before replacing local data
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Args)]
pub struct EncryptionArgs {
    #[command(subcommand)]
    pub action: EncryptionAction,
}

#[derive(Subcommand)]
pub enum EncryptionAction {
    /// Encrypt dreams and goals with --password
    Enable,
    /// Store everything in plaintext again
    Disable,
    Status,
}

#[derive(Args)]
pub struct SyncArgs {
    #[command(subcommand)]
    pub action: SyncAction,
}

#[derive(Subcommand)]
pub enum SyncAction {
    /// Upload the journal as the remote backup
    Push {
        #[arg(short, long)]
        yes: bool,
    },
    /// Replace the journal with the remote backup
    Pull {
        #[arg(short, long)]
        yes: bool,
    },
    /// Show the last sync and pending changes
    Status,
    /// Forget the last sync
    Disconnect,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_init() {
        let cli = Cli::try_parse_from(["somnia", "init"]).unwrap();
        if let Command::Init(args) = cli.command {
            assert_eq!(args.dir, PathBuf::from("somnia-data"));
            assert!(!args.encrypt);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_init_with_remote() {
        let cli = Cli::try_parse_from(["somnia", "init", "/data", "--encrypt", "--remote", "/drive"]).unwrap();
        if let Command::Init(args) = cli.command {
            assert!(args.encrypt);
            assert_eq!(args.remote, Some(PathBuf::from("/drive")));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_new_with_fields() {
        let cli = Cli::try_parse_from(["somnia", "new", "Flying", "-c", "over the sea", "--field", "mood=calm"]).unwrap();
        if let Command::New(args) = cli.command {
            assert_eq!(args.title, "Flying");
            assert_eq!(args.content.as_deref(), Some("over the sea"));
            assert_eq!(args.fields, vec![("mood".to_string(), "calm".to_string())]);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_field_rejects_missing_key() {
        assert!(parse_field("=x").is_err());
        assert!(parse_field("novalue").is_err());
        assert_eq!(parse_field("a=b=c").unwrap(), ("a".into(), "b=c".into()));
    }

    #[test]
    fn parse_collections_by_storage_name() {
        let cli = Cli::try_parse_from(["somnia", "get", "voiceNotes", "v1"]).unwrap();
        if let Command::Get(args) = cli.command {
            assert_eq!(args.collection, Collection::VoiceNotes);
        } else { panic!("wrong command"); }
        assert!(Cli::try_parse_from(["somnia", "list", "nightmares"]).is_err());
    }

    #[test]
    fn parse_list_defaults_to_dreams() {
        let cli = Cli::try_parse_from(["somnia", "list"]).unwrap();
        if let Command::List(args) = cli.command {
            assert_eq!(args.collection, Collection::Dreams);
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_sync_push_yes() {
        let cli = Cli::try_parse_from(["somnia", "sync", "push", "--yes"]).unwrap();
        if let Command::Sync(args) = cli.command {
            assert!(matches!(args.action, SyncAction::Push { yes: true }));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_encryption_enable() {
        let cli = Cli::try_parse_from(["somnia", "--password", "pw", "encryption", "enable"]).unwrap();
        assert_eq!(cli.password.as_deref(), Some("pw"));
        if let Command::Encryption(args) = cli.command {
            assert!(matches!(args.action, EncryptionAction::Enable));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_verbose_count() {
        let cli = Cli::try_parse_from(["somnia", "-vv", "status"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn parse_json_format() {
        let cli = Cli::try_parse_from(["somnia", "--format", "json", "status"]).unwrap();
        assert!(matches!(cli.format, OutputFormat::Json));
        assert_eq!(cli.config, PathBuf::from("somnia.toml"));
    }
}
