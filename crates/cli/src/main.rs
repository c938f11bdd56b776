//! st - a concurrent CLI client for OpenStack Swift object storage.

mod commands;
mod exit_code;
#[cfg(test)]
mod testutil;

use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use st_core::{Credentials, Reporter};

use crate::commands::Ctx;
use crate::exit_code::ExitCode;

#[derive(Parser, Debug)]
#[command(
    name = "st",
    version,
    about = "A concurrent client for OpenStack Swift object storage",
    after_help = "Example:\n  st -A https://auth.example.com/v1.0 -U user -K key stat"
)]
struct Cli {
    /// URL for obtaining an auth token
    #[arg(short = 'A', long = "auth", env = "ST_AUTH", global = true)]
    auth: Option<String>,

    /// User name for obtaining an auth token
    #[arg(short = 'U', long = "user", env = "ST_USER", global = true)]
    user: Option<String>,

    /// Key for obtaining an auth token
    #[arg(short = 'K', long = "key", env = "ST_KEY", global = true)]
    key: Option<String>,

    /// Use the SERVICENET internal network
    #[arg(short = 's', long = "snet", global = true)]
    snet: bool,

    /// Print more info
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress status output
    #[arg(short = 'q', long = "quiet", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Delete containers and objects
    Delete(commands::delete::DeleteArgs),

    /// Download containers and objects
    Download(commands::download::DownloadArgs),

    /// List containers for the account or objects for a container
    List(commands::list::ListArgs),

    /// Update metadata for the account, a container, or an object
    Post(commands::post::PostArgs),

    /// Display information for the account, a container, or an object
    Stat(commands::stat::StatArgs),

    /// Upload files and directories to a container
    Upload(commands::upload::UploadArgs),
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let credentials = match Credentials::resolve(cli.auth, cli.user, cli.key, cli.snet) {
        Ok(credentials) => credentials,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::UsageError.into();
        }
    };
    // Status lines are on by default; -q silences them, each -v adds
    // detail.
    let verbose = if cli.quiet {
        0
    } else {
        1u8.saturating_add(cli.verbose)
    };

    let reporter = Reporter::new();
    let ctx = Ctx {
        credentials,
        verbose,
        sink: reporter.sink(),
    };

    let code = match cli.command {
        Commands::Delete(args) => commands::delete::execute(args, &ctx).await,
        Commands::Download(args) => commands::download::execute(args, &ctx).await,
        Commands::List(args) => commands::list::execute(args, &ctx).await,
        Commands::Post(args) => commands::post::execute(args, &ctx).await,
        Commands::Stat(args) => commands::stat::execute(args, &ctx).await,
        Commands::Upload(args) => commands::upload::execute(args, &ctx).await,
    };

    drop(ctx);
    let errored = reporter.close().await;
    if code == ExitCode::Success && errored {
        ExitCode::GeneralError.into()
    } else {
        code.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_parse_before_and_after_the_command() {
        let cli = Cli::try_parse_from([
            "st", "-A", "http://auth", "-U", "u", "-K", "k", "list", "-p", "ph", "photos",
        ])
        .unwrap();
        assert_eq!(cli.auth.as_deref(), Some("http://auth"));
        let Commands::List(args) = cli.command else {
            panic!("expected list");
        };
        assert_eq!(args.prefix.as_deref(), Some("ph"));
        assert_eq!(args.container.as_deref(), Some("photos"));

        let cli = Cli::try_parse_from(["st", "stat", "-v", "-v", "photos"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn upload_requires_container_and_paths() {
        assert!(Cli::try_parse_from(["st", "upload", "photos"]).is_err());
        let cli =
            Cli::try_parse_from(["st", "upload", "-S", "1048576", "photos", "a", "b"]).unwrap();
        let Commands::Upload(args) = cli.command else {
            panic!("expected upload");
        };
        assert_eq!(args.segment_size, Some(1_048_576));
        assert_eq!(args.paths, ["a", "b"]);
    }

    #[test]
    fn delete_all_conflicts_with_a_container() {
        assert!(Cli::try_parse_from(["st", "delete", "--all", "photos"]).is_err());
        let cli = Cli::try_parse_from(["st", "delete", "photos", "a.jpg", "b.jpg"]).unwrap();
        let Commands::Delete(args) = cli.command else {
            panic!("expected delete");
        };
        assert_eq!(args.objects, ["a.jpg", "b.jpg"]);
    }
}
