use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use roster_storage::IntentJournal;
use roster_sync::{export_plan, resume_intent, ExportReport, SyncConfig};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "roster-cli")]
#[command(about = "Preacher roster sync and export")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Mirror directory groups into the roster store.
    Sync,
    /// Run the JSON API.
    Serve,
    /// Push a stored plan's assignments to the directory.
    Export {
        #[arg(long)]
        plan: String,
    },
    /// Re-apply a journaled export intent.
    Resume {
        #[arg(long)]
        intent: PathBuf,
    },
    /// Print the effective roster rules.
    Rules,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn print_report(report: &ExportReport) {
    let s = &report.summary;
    println!(
        "export complete: plan_id={} created={} confirmed={} deleted={} unchanged={} skipped={} errors={} intent={} results={}",
        report.plan_id,
        s.created,
        s.confirmed,
        s.deleted,
        s.unchanged,
        s.skipped,
        s.errors,
        report.intent_path.display(),
        report.results_path.display()
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let summary = roster_sync::run_member_sync_from_env().await?;
            println!(
                "sync complete: run_id={} groups={} created={} updated={} deleted={} users_created={} users_updated={} failures={}",
                summary.run_id,
                summary.groups.len(),
                summary.members_created,
                summary.members_updated,
                summary.members_deleted,
                summary.users_created,
                summary.users_updated,
                summary.failures
            );
        }
        Commands::Serve => {
            roster_web::serve_from_env().await?;
        }
        Commands::Export { plan } => {
            let config = SyncConfig::from_env();
            let rules = config.load_rules()?;
            let repo = config.connect_store().await?;
            let directory = config.connect_directory()?;
            let plan = repo.plan(&plan).await?;
            let group = repo.group_by_ct_id(&config.preacher_group_id).await?;
            let members = repo.members_in_group(&group.id).await?;
            let journal = IntentJournal::new(config.journal_dir.clone());
            let report = export_plan(&journal, &plan, &members, &rules.services, &directory).await?;
            print_report(&report);
        }
        Commands::Resume { intent } => {
            let config = SyncConfig::from_env();
            let directory = config.connect_directory()?;
            let journal = IntentJournal::new(config.journal_dir.clone());
            let report = resume_intent(&journal, &intent, &directory).await?;
            print_report(&report);
        }
        Commands::Rules => {
            let config = SyncConfig::from_env();
            let rules = config.load_rules()?;
            print!("{}", serde_yaml::to_string(&rules)?);
        }
    }

    Ok(())
}
