use anyhow::anyhow;
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use mirror_cli::{commands, profiles, CliCopyMode};
use mirror_pipeline::{CopyMode, MirrorOptions, RunOutcome};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage profiles (saved source/destination pairs)
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    /// Show or change the persisted engine settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommands,
    },
    /// Show what a reconciliation would do without touching anything
    Plan {
        #[command(flatten)]
        roots: Roots,
        #[arg(long, help = "Copy every file even if it looks unchanged")]
        always_copy: bool,
    },
    /// Reconcile the destination, then mirror live changes until Ctrl-C
    Run {
        #[command(flatten)]
        roots: Roots,
        #[arg(long, help = "Copy every file even if it looks unchanged")]
        always_copy: bool,
        #[arg(long, help = "Quiet period before a changed file is copied")]
        debounce_ms: Option<u64>,
        #[arg(long, help = "Reconcile once and exit without watching")]
        once: bool,
    },
}

#[derive(Args)]
struct Roots {
    #[arg(long, required_unless_present = "profile")]
    source: Option<Utf8PathBuf>,
    #[arg(long, required_unless_present = "profile")]
    dest: Option<Utf8PathBuf>,
    #[arg(
        short,
        long,
        conflicts_with_all = ["source", "dest"],
        help = "Use the roots from a named profile"
    )]
    profile: Option<String>,
}

#[derive(Subcommand)]
enum ProfileCommands {
    List,
    Add {
        name: String,
        source: Utf8PathBuf,
        dest: Utf8PathBuf,
    },
    Remove {
        name: String,
    },
}

#[derive(Subcommand)]
enum SettingsCommands {
    Show,
    Set {
        #[arg(long, value_enum)]
        copy_mode: Option<CliCopyMode>,
        #[arg(long)]
        mtime_tolerance_ms: Option<u64>,
        #[arg(long)]
        debounce_ms: Option<u64>,
        #[arg(long)]
        retry_attempts: Option<u32>,
        #[arg(long)]
        retry_delay_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mgr = profiles::ProfileManager::new();

    let resolve_roots = |roots: Roots| -> anyhow::Result<(Utf8PathBuf, Utf8PathBuf)> {
        if let Some(name) = roots.profile {
            let p = mgr.find(&name)?;
            return Ok((
                Utf8PathBuf::from(p.source_root),
                Utf8PathBuf::from(p.dest_root),
            ));
        }
        match (roots.source, roots.dest) {
            (Some(source), Some(dest)) => Ok((source, dest)),
            _ => Err(anyhow!("Both --source and --dest are required")),
        }
    };

    match cli.command {
        Commands::Profile { command } => match command {
            ProfileCommands::List => profiles::handle_list(&mgr)?,
            ProfileCommands::Add { name, source, dest } => {
                profiles::handle_add(&mgr, name, source, dest)?
            }
            ProfileCommands::Remove { name } => profiles::handle_remove(&mgr, name)?,
        },
        Commands::Settings { command } => match command {
            SettingsCommands::Show => {
                let settings = mgr.persistence().load_settings()?;
                println!("{}", serde_json::to_string_pretty(&settings)?);
            }
            SettingsCommands::Set {
                copy_mode,
                mtime_tolerance_ms,
                debounce_ms,
                retry_attempts,
                retry_delay_ms,
            } => {
                let mut settings = mgr.persistence().load_settings()?;
                if let Some(mode) = copy_mode {
                    settings.copy_mode = mode.into();
                }
                if let Some(ms) = mtime_tolerance_ms {
                    settings.mtime_tolerance_ms = ms;
                }
                if let Some(ms) = debounce_ms {
                    settings.debounce_ms = mirror_config::clamp_debounce_ms(ms);
                }
                if let Some(n) = retry_attempts {
                    settings.retry_attempts = mirror_config::clamp_retry_attempts(n);
                }
                if let Some(ms) = retry_delay_ms {
                    settings.retry_delay_ms = ms;
                }
                mgr.persistence().save_settings(&settings)?;
                println!("Settings saved.");
            }
        },
        Commands::Plan { roots, always_copy } => {
            let (source, dest) = resolve_roots(roots)?;
            let options = options_with(mgr.persistence().load_settings()?, always_copy, None);
            commands::cmd_plan(source, dest, options).await?;
        }
        Commands::Run {
            roots,
            always_copy,
            debounce_ms,
            once,
        } => {
            let profile = roots.profile.clone();
            let (source, dest) = resolve_roots(roots)?;
            let options =
                options_with(mgr.persistence().load_settings()?, always_copy, debounce_ms);
            let report = commands::cmd_run(source, dest, options, once).await?;

            if let Some(name) = profile {
                if report.outcome != RunOutcome::AlreadyRunning {
                    mgr.touch(&name)?;
                }
            }
        }
    }

    Ok(())
}

fn options_with(
    mut options: MirrorOptions,
    always_copy: bool,
    debounce_ms: Option<u64>,
) -> MirrorOptions {
    if always_copy {
        options.copy_mode = CopyMode::AlwaysCopy;
    }
    if let Some(ms) = debounce_ms {
        options.debounce_ms = ms;
    }
    options
}
