//! # Packstore CLI (`packstore`)
//!
//! The `packstore` binary is the operator's interface to the store. It
//! provides commands for database initialization, record import/export,
//! top-element pack matching, whole-database dump/load, and record-version
//! upgrades.
//!
//! ## Usage
//!
//! ```bash
//! packstore --config ./config/packstore.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `packstore init` | Create the SQLite database and run schema migrations |
//! | `packstore status` | Show record counts per table |
//! | `packstore import <kind> <file>` | Store a file as an XML document, schema, metadata, or pack |
//! | `packstore export <kind> <name>` | Write a stored record's payload back out |
//! | `packstore list <kind>` | List stored records of one kind |
//! | `packstore delete <kind> <name>` | Delete a stored record |
//! | `packstore match <local>` | Find the pack matching a top element |
//! | `packstore dump` | Export the whole database as JSON |
//! | `packstore load <file>` | Replace the whole database from a dump |
//! | `packstore upgrade` | Migrate obsolete records, with a backup first |

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use packstore::chunk::ChunkStore;
use packstore::confirm::{Confirmer, ConsoleConfirmer, PresetConfirmer};
use packstore::grammar::RelaxNgIntrospector;
use packstore::metadata::MetadataService;
use packstore::packs::PacksService;
use packstore::records::{Record, RecordFormat};
use packstore::schemas::SchemasService;
use packstore::xml_files::XmlFilesService;
use packstore::{config, db, dump, migrate, upgrade};

/// Packstore — a local store for XML documents, schemas, and the packs
/// that match them to editing modes.
#[derive(Parser)]
#[command(
    name = "packstore",
    about = "A local store for XML documents, schemas, and schema packs",
    version,
    long_about = "Packstore keeps XML documents, validation schemas, mode metadata, and schema \
    packs in a content-addressed SQLite store, and answers which pack should handle a document \
    given its top element — from an explicit match rule or by introspecting the pack's schema \
    grammar."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/packstore.toml`. Database and backup settings
    /// are read from this file.
    #[arg(long, global = true, default_value = "./config/packstore.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// The kinds of records the store holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Kind {
    /// XML documents.
    Xml,
    /// Validation schemas.
    Schema,
    /// Mode metadata.
    Metadata,
    /// Schema packs.
    Pack,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. This
    /// command is idempotent — running it multiple times is safe.
    Init,

    /// Show record counts per table.
    Status,

    /// Store a file as a record.
    ///
    /// The record is named after the file unless `--name` is given. Packs
    /// are read in their JSON interchange form and carry their own name.
    /// Importing over an existing name asks for confirmation unless
    /// `--force` is given.
    Import {
        /// What kind of record the file becomes.
        kind: Kind,

        /// The file to import.
        path: PathBuf,

        /// Store under this name instead of the file name.
        #[arg(long)]
        name: Option<String>,

        /// Overwrite an existing record without asking.
        #[arg(long)]
        force: bool,
    },

    /// Write a stored record's payload to a file or stdout.
    ///
    /// XML documents get their `downloaded` time stamped.
    Export {
        /// What kind of record to export.
        kind: Kind,

        /// The record's name.
        name: String,

        /// Write to this file instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// List stored records of one kind.
    List {
        /// What kind of records to list.
        kind: Kind,
    },

    /// Delete a stored record by name.
    ///
    /// A pack still referenced by an XML document cannot be deleted.
    Delete {
        /// What kind of record to delete.
        kind: Kind,

        /// The record's name.
        name: String,
    },

    /// Find the pack matching a document's top element.
    Match {
        /// The top element's local name.
        local_name: String,

        /// The top element's namespace URI.
        #[arg(long, default_value = "")]
        ns: String,
    },

    /// Export the whole database as a versioned JSON dump.
    Dump {
        /// Write to this file instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Replace the whole database from a dump file.
    ///
    /// Asks for confirmation unless `--force` is given. The load is
    /// all-or-nothing.
    Load {
        /// The dump file to load.
        path: PathBuf,

        /// Replace without asking.
        #[arg(long)]
        force: bool,
    },

    /// Migrate obsolete records to the current version.
    ///
    /// Writes a full dump to the backup directory before changing
    /// anything. Asks for confirmation unless `--yes` is given.
    Upgrade {
        /// Upgrade without asking.
        #[arg(long)]
        yes: bool,
    },
}

/// The wired-up services over one database.
struct App {
    pool: sqlx::SqlitePool,
    chunks: Arc<ChunkStore>,
    xml_files: XmlFilesService,
    schemas: SchemasService,
    metadata: MetadataService,
    packs: Arc<PacksService>,
}

impl App {
    async fn open(config: &config::Config) -> Result<App> {
        let pool = db::connect(config).await?;
        let chunks = Arc::new(ChunkStore::new(pool.clone()));
        Ok(App {
            xml_files: XmlFilesService::new(pool.clone(), chunks.clone()),
            schemas: SchemasService::new(pool.clone(), chunks.clone()),
            metadata: MetadataService::new(pool.clone(), chunks.clone()),
            packs: Arc::new(PacksService::new(
                pool.clone(),
                chunks.clone(),
                Arc::new(RelaxNgIntrospector),
            )),
            chunks,
            pool,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("packstore=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Status => {
            let app = App::open(&cfg).await?;
            println!("chunks    {}", app.chunks.get_record_count().await?);
            println!("xmlfiles  {}", app.xml_files.records().get_record_count().await?);
            println!("schemas   {}", app.schemas.records().get_record_count().await?);
            println!("metadata  {}", app.metadata.records().get_record_count().await?);
            println!("packs     {}", app.packs.records().get_record_count().await?);
        }
        Commands::Import {
            kind,
            path,
            name,
            force,
        } => {
            let app = App::open(&cfg).await?;
            let confirmer = pick_confirmer(force);
            match kind {
                Kind::Xml => import(&app.xml_files, &path, name, confirmer.as_ref()).await?,
                Kind::Schema => import(&app.schemas, &path, name, confirmer.as_ref()).await?,
                Kind::Metadata => import(&app.metadata, &path, name, confirmer.as_ref()).await?,
                Kind::Pack => import(app.packs.as_ref(), &path, name, confirmer.as_ref()).await?,
            }
        }
        Commands::Export { kind, name, out } => {
            let app = App::open(&cfg).await?;
            let data = match kind {
                Kind::Xml => {
                    let record = require(&app.xml_files, kind, &name).await?;
                    let data = app.xml_files.get_download_data(&record).await?;
                    app.xml_files.mark_downloaded(&record).await?;
                    data
                }
                Kind::Schema => {
                    let record = require(&app.schemas, kind, &name).await?;
                    app.schemas.get_download_data(&record).await?
                }
                Kind::Metadata => {
                    let record = require(&app.metadata, kind, &name).await?;
                    app.metadata.get_download_data(&record).await?
                }
                Kind::Pack => {
                    let record = require(app.packs.as_ref(), kind, &name).await?;
                    app.packs.get_download_data(&record).await?
                }
            };
            write_out(out.as_deref(), &data).await?;
        }
        Commands::List { kind } => {
            let app = App::open(&cfg).await?;
            let pairs = match kind {
                Kind::Xml => app.xml_files.records().get_name_id_array().await?,
                Kind::Schema => app.schemas.records().get_name_id_array().await?,
                Kind::Metadata => app.metadata.records().get_name_id_array().await?,
                Kind::Pack => app.packs.records().get_name_id_array().await?,
            };
            for pair in pairs {
                println!("{}\t{}", pair.id, pair.name);
            }
        }
        Commands::Delete { kind, name } => {
            let app = App::open(&cfg).await?;
            match kind {
                Kind::Xml => {
                    let record = require(&app.xml_files, kind, &name).await?;
                    app.xml_files.records().delete_record(&record).await?;
                }
                Kind::Schema => {
                    let record = require(&app.schemas, kind, &name).await?;
                    app.schemas.records().delete_record(&record).await?;
                }
                Kind::Metadata => {
                    let record = require(&app.metadata, kind, &name).await?;
                    app.metadata.records().delete_record(&record).await?;
                }
                Kind::Pack => {
                    let record = require(app.packs.as_ref(), kind, &name).await?;
                    if let Some(id) = record.id {
                        if app.xml_files.is_pack_used(id).await? {
                            anyhow::bail!(
                                "pack {name} is still associated with XML documents; \
                                 detach them before deleting it"
                            );
                        }
                    }
                    app.packs.records().delete_record(&record).await?;
                }
            }
            println!("Deleted {name}.");
        }
        Commands::Match { local_name, ns } => {
            let app = App::open(&cfg).await?;
            match app.packs.match_with_pack(&local_name, &ns).await? {
                Some(pack) => println!(
                    "{} (id {}, mode {})",
                    pack.name,
                    pack.id.unwrap_or_default(),
                    pack.mode
                ),
                None => println!("No pack matches {{{ns}}}{local_name}."),
            }
        }
        Commands::Dump { out } => {
            let app = App::open(&cfg).await?;
            let snapshot = dump::dump(&app.pool).await?;
            write_out(out.as_deref(), &serde_json::to_string_pretty(&snapshot)?).await?;
        }
        Commands::Load { path, force } => {
            let app = App::open(&cfg).await?;
            let confirmer = pick_confirmer(force);
            let proceed = confirmer
                .confirm("This will replace the entire database. Continue?")
                .await?;
            if !proceed {
                println!("Load aborted.");
                return Ok(());
            }
            let text = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read dump file: {}", path.display()))?;
            let snapshot: dump::Dump = serde_json::from_str(&text)?;
            dump::load(&app.pool, &snapshot).await?;
            println!("Database loaded from {}.", path.display());
        }
        Commands::Upgrade { yes } => {
            let pool = db::connect(&cfg).await?;
            let service =
                upgrade::UpgradeService::new(pool, pick_confirmer(yes), cfg.backup.dir.clone());
            match service.upgrade().await? {
                Some(backup) => println!("Upgrade applied; backup at {}.", backup.display()),
                None => println!("Nothing to upgrade."),
            }
        }
    }

    Ok(())
}

fn pick_confirmer(force: bool) -> Arc<dyn Confirmer> {
    if force {
        Arc::new(PresetConfirmer::yes())
    } else {
        Arc::new(ConsoleConfirmer)
    }
}

async fn require<F: RecordFormat>(service: &F, kind: Kind, name: &str) -> Result<F::Record> {
    let kind = format!("{kind:?}").to_lowercase();
    service
        .records()
        .get_record_by_name(name)
        .await?
        .with_context(|| format!("no {kind} record named {name}"))
}

async fn import<F: RecordFormat>(
    service: &F,
    path: &Path,
    name: Option<String>,
    confirmer: &dyn Confirmer,
) -> Result<()> {
    let record = match name {
        Some(name) => {
            let check = service.write_check(&name, confirmer).await?;
            if !check.write {
                println!("Import aborted.");
                return Ok(());
            }
            let data = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let mut record = service.make_record(&name, data).await?;
            if let Some(existing) = check.record {
                if let Some(id) = existing.id() {
                    record.set_id(id);
                }
            }
            record.set_name(name);
            service.records().update_record(&record).await?
        }
        None => match service.safe_load_from_file(path, confirmer).await? {
            Some(record) => record,
            None => {
                println!("Import aborted.");
                return Ok(());
            }
        },
    };
    println!(
        "Imported {} (id {}).",
        record.name(),
        record.id().unwrap_or_default()
    );
    Ok(())
}

async fn write_out(out: Option<&Path>, data: &str) -> Result<()> {
    match out {
        Some(path) => {
            tokio::fs::write(path, data)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {}.", path.display());
        }
        None => println!("{data}"),
    }
    Ok(())
}
