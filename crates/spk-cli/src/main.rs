use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use std::sync::Arc;

use spk_engine::{ApplySpec, JobRegistry, PropagateOptions};
use spk_store::{NewVersion, VersionStore};

#[derive(Parser)]
#[command(name = "spk")]
#[command(about = "Schema propagation CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Version store commands
    Version {
        #[command(subcommand)]
        cmd: VersionCmd,
    },

    /// Write a new SQL version into the store
    Generate {
        #[arg(long)]
        description: String,

        /// File containing the upgrade SQL
        #[arg(long = "upgrade-file")]
        upgrade_file: String,

        /// File containing the downgrade SQL (archived, never executed)
        #[arg(long = "downgrade-file")]
        downgrade_file: Option<String>,

        /// Upstream revision identifier, if any
        #[arg(long)]
        revision: Option<String>,
    },

    /// List tenant databases matching a pattern
    Databases {
        #[arg(long, default_value = "cmp_%")]
        pattern: String,
    },

    /// Apply a stored version to all matching tenant databases
    Propagate {
        #[arg(long = "version-id")]
        version_id: String,

        #[arg(long, default_value = "cmp_%")]
        pattern: String,

        /// Semaphore width; defaults to MAX_CONCURRENT_CONNECTIONS
        #[arg(long = "max-connections")]
        max_connections: Option<usize>,

        /// Probe and report without mutating any database
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },

    /// Test-database fleet management
    Simulate {
        #[command(subcommand)]
        cmd: SimCmd,
    },
}

#[derive(Subcommand)]
enum VersionCmd {
    List,
    Show {
        version_id: String,
    },
}

#[derive(Subcommand)]
enum SimCmd {
    /// Create a batch of empty test databases
    Create {
        #[arg(long)]
        count: u32,

        #[arg(long, default_value = "cmp_")]
        prefix: String,

        #[arg(long = "start-id", default_value_t = 1)]
        start_id: u32,

        #[arg(long)]
        template: Option<String>,
    },

    /// Drop every database matching prefix
    Cleanup {
        #[arg(long, default_value = "cmp_")]
        prefix: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let settings = spk_config::Settings::from_env()?;

    match cli.cmd {
        Commands::Version { cmd } => {
            let store = VersionStore::open(&settings.sql_versions_dir)?;
            match cmd {
                VersionCmd::List => {
                    for meta in store.list()? {
                        println!(
                            "version_id={} checksum={} created_at={} description={}",
                            meta.version_id, meta.checksum, meta.created_at, meta.description
                        );
                    }
                }
                VersionCmd::Show { version_id } => {
                    let Some(artifact) = store.get(&version_id)? else {
                        bail!("version not found: {version_id}");
                    };
                    println!("version_id={}", artifact.version_id);
                    println!("checksum={}", artifact.checksum);
                    println!("description={}", artifact.description);
                    println!("revision_id={}", artifact.revision_id.as_deref().unwrap_or("-"));
                    println!("created_at={}", artifact.created_at);
                    println!("{}", artifact.upgrade_sql);
                }
            }
        }

        Commands::Generate {
            description,
            upgrade_file,
            downgrade_file,
            revision,
        } => {
            let upgrade_sql = std::fs::read_to_string(&upgrade_file)
                .with_context(|| format!("read upgrade file: {upgrade_file}"))?;
            let downgrade_sql = match downgrade_file {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("read downgrade file: {path}"))?,
                None => String::new(),
            };

            let store = VersionStore::open(&settings.sql_versions_dir)?;
            let put = store.put(&NewVersion {
                description,
                upgrade_sql,
                downgrade_sql,
                revision_id: revision,
            })?;
            println!("version_id={}", put.version_id);
            println!("checksum={}", put.checksum);
            println!("upgrade={}", put.upgrade_path.display());
            println!("downgrade={}", put.downgrade_path.display());
        }

        Commands::Databases { pattern } => {
            for name in spk_db::list_tenant_databases(&settings, &pattern).await? {
                println!("{name}");
            }
        }

        Commands::Propagate {
            version_id,
            pattern,
            max_connections,
            dry_run,
        } => {
            let store = VersionStore::open(&settings.sql_versions_dir)?;
            let Some(artifact) = store.get(&version_id)? else {
                bail!("version not found: {version_id}");
            };

            let databases = spk_db::list_tenant_databases(&settings, &pattern).await?;
            if databases.is_empty() {
                bail!("no databases match pattern: {pattern}");
            }

            let registry = JobRegistry::new();
            let job = spk_engine::start(
                Arc::new(settings),
                &registry,
                ApplySpec {
                    version_id: artifact.version_id,
                    checksum: artifact.checksum,
                    sql: artifact.upgrade_sql,
                    dry_run,
                },
                databases,
                PropagateOptions {
                    max_connections,
                    ..Default::default()
                },
            )
            .await?;

            println!("job_id={}", job.job_id());

            let mut progress = Box::pin(spk_engine::job_progress(Arc::clone(&job)));
            let mut last = None;
            while let Some(snapshot) = progress.next().await {
                println!(
                    "progress completed={}/{} successful={} failed={} skipped={} rate={:.1}",
                    snapshot.completed,
                    snapshot.total,
                    snapshot.successful,
                    snapshot.failed,
                    snapshot.skipped,
                    snapshot.rate
                );
                last = Some(snapshot);
            }

            if let Some(snapshot) = last {
                println!("status={}", snapshot.status.as_str());
                for e in &snapshot.errors {
                    println!("error database={} message={}", e.database, e.error);
                }
                if snapshot.status != spk_engine::JobStatus::Completed {
                    std::process::exit(1);
                }
            }
        }

        Commands::Simulate { cmd } => match cmd {
            SimCmd::Create {
                count,
                prefix,
                start_id,
                template,
            } => {
                let created = spk_sim::create_test_databases(
                    &settings,
                    count,
                    &prefix,
                    start_id,
                    template.as_deref(),
                )
                .await?;
                println!("created={}", created.len());
                for name in created.iter().take(20) {
                    println!("{name}");
                }
            }
            SimCmd::Cleanup { prefix } => {
                if !spk_db::is_safe_ident(&prefix) {
                    bail!("invalid database prefix: {prefix:?}");
                }
                let pattern = format!("{prefix}%");
                let databases = spk_db::list_tenant_databases(&settings, &pattern).await?;
                let removed = spk_sim::cleanup_test_databases(&settings, &databases).await?;
                println!("removed={removed}");
            }
        },
    }

    Ok(())
}
