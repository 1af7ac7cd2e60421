use clap::Parser;
use ktwo::cli::commands::add::NewEntry;
use ktwo::cli::{Cli, Commands};

/// Environment variable holding a tracing filter, e.g. `ktwo=debug`.
const LOG_ENV: &str = "KTWO_LOG";

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Newdb {
            ref vault,
            ref bucket,
        } => ktwo::cli::commands::newdb::execute(vault, bucket.as_deref()),
        Commands::Add {
            ref vault,
            ref group,
            ref title,
            ref user,
            ref url,
            ref note,
            askpass,
        } => ktwo::cli::commands::add::execute(
            vault,
            &NewEntry {
                group,
                title: title.as_deref(),
                user: user.as_deref(),
                url: url.as_deref(),
                note: note.as_deref(),
                askpass,
            },
        ),
        Commands::List {
            ref vault,
            ref group,
            ref title,
            show_passwords,
        } => ktwo::cli::commands::list::execute(
            vault,
            group.as_deref(),
            title.as_deref(),
            show_passwords,
        ),
        Commands::Pull { ref remote } => ktwo::cli::commands::pull::execute(remote),
        Commands::Sync { ref vault } => ktwo::cli::commands::sync::execute(vault),
        Commands::Remove {
            ref vault,
            ref title,
            ref group,
        } => ktwo::cli::commands::remove::execute(vault, title, group.as_deref()),
    };

    if let Err(e) = result {
        ktwo::cli::output::error(&e.to_string());
        std::process::exit(1);
    }
}

/// Log to stderr so command output on stdout stays clean.
fn init_tracing(verbose: u8) {
    use tracing_subscriber::EnvFilter;

    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(format!("ktwo={level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
