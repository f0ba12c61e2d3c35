//! Semantic-model draft CLI.
//!
//! Provides the `semdraft` binary for working with models stored in a SQLite
//! file. `edit` opens a real edit session on the model, applies one change
//! and flushes the save pipeline, so drafts written here carry the same
//! version and checklist stamps as drafts saved from an editor.
//!
//! Reads `SEMDRAFT_DB_PATH` for the database file (default: "semdraft.db")
//! and the session settings (`SEMDRAFT_SAVE_DEBOUNCE_MS`,
//! `SEMDRAFT_HISTORY_LIMIT`) from the environment.

use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use semdraft_core::{EntityId, ModelId};
use semdraft_session::{ColumnRole, EditSession, NewColumn, NewEntity, SessionConfig, SessionError};
use semdraft_storage::{ModelRepository, SqliteTransport, StorageError, TransportError};

/// Semantic-model draft tools.
#[derive(Parser)]
#[command(name = "semdraft", about = "Semantic-model draft tools")]
struct Cli {
    /// Path to the model database file.
    #[arg(long, env = "SEMDRAFT_DB_PATH", default_value = "semdraft.db", global = true)]
    db: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty model.
    Create {
        /// Model name.
        name: String,
    },
    /// List stored models.
    List,
    /// Print a model's draft as JSON.
    Show {
        /// Model id.
        model: String,
    },
    /// Apply one change to a model's draft and save it.
    Edit {
        /// Model id.
        model: String,

        #[command(subcommand)]
        action: EditAction,
    },
    /// Publish a model's draft.
    Publish {
        /// Model id.
        model: String,

        /// Release notes stored with the published model.
        #[arg(short, long)]
        notes: Option<String>,
    },
}

#[derive(Subcommand)]
enum EditAction {
    /// Add a cube over a fact table.
    AddCube {
        name: String,
        #[arg(long)]
        caption: Option<String>,
        /// Fact table.
        #[arg(short, long)]
        table: Option<String>,
        /// Column aggregated as a `sum` measure (repeatable).
        #[arg(short, long)]
        measure: Vec<String>,
        /// Column turned into a private dimension (repeatable).
        #[arg(short, long)]
        dimension: Vec<String>,
    },
    /// Add a shared dimension with one hierarchy.
    AddDimension {
        name: String,
        #[arg(long)]
        caption: Option<String>,
        /// Dimension table.
        #[arg(short, long)]
        table: Option<String>,
        #[arg(long)]
        primary_key: Option<String>,
        /// Column turned into a level, top-down (repeatable).
        #[arg(short, long)]
        level: Vec<String>,
    },
    /// Copy a cube or shared dimension.
    Duplicate {
        /// Entity id.
        id: String,
    },
    /// Delete a cube, shared dimension or virtual cube.
    Delete {
        /// Entity id.
        id: String,
    },
    /// Rename the model.
    Rename { name: String },
}

#[derive(Debug, Error)]
enum CliError {
    #[error("failed to open database '{path}': {source}")]
    Open { path: String, source: StorageError },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("no cube or shared dimension with id '{0}'")]
    UnknownEntity(String),

    #[error("failed to serialize output: {0}")]
    Output(#[from] serde_json::Error),
}

impl CliError {
    /// 1 = rejected edit or unknown entity, 2 = save/publish failure,
    /// 3 = database or I/O error.
    fn exit_code(&self) -> i32 {
        match self {
            CliError::Session(SessionError::SaveFailed(_)) | CliError::Transport(_) => 2,
            CliError::Open { .. } | CliError::Output(_) => 3,
            _ => 1,
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        error!(error = %err, "command failed");
        eprintln!("Error: {err}");
        process::exit(err.exit_code());
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let transport = Arc::new(SqliteTransport::new(&cli.db).map_err(|source| CliError::Open {
        path: cli.db.clone(),
        source,
    })?);

    match cli.command {
        Commands::Create { name } => {
            let model = transport.create_model(&name).await?;
            info!(model = %model.id, "model created");
            println!("{}", model.id);
        }
        Commands::List => {
            for summary in transport.list_models().await? {
                let saved = summary
                    .saved_at
                    .map_or_else(|| "-".to_string(), |at| at.to_rfc3339());
                println!("{}\t{}\tv{}\t{}", summary.id, summary.name, summary.version, saved);
            }
        }
        Commands::Show { model } => {
            let model = transport.load_model(&ModelId::new(model)).await?;
            let draft = model.extract_draft();
            println!("{}", serde_json::to_string_pretty(&draft)?);
        }
        Commands::Edit { model, action } => {
            let record = transport.load_model(&ModelId::new(model)).await?;
            let session = EditSession::builder(record, transport.clone())
                .config(SessionConfig {
                    register_on_open: false,
                    ..SessionConfig::from_env()
                })
                .open()
                .await?;

            let applied = apply(&session, action);
            let saved = match &applied {
                Ok(_) => session.flush().await,
                Err(_) => Ok(()),
            };
            session.close().await;
            let touched = applied?;
            saved?;

            let draft = session.draft();
            let output = serde_json::json!({
                "entity": touched,
                "version": draft.version,
                "savedAt": draft.saved_at,
                "checklist": draft.checklist,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Commands::Publish { model, notes } => {
            let record = transport.load_model(&ModelId::new(model)).await?;
            let session = EditSession::builder(record, transport.clone())
                .config(SessionConfig {
                    register_on_open: false,
                    ..SessionConfig::from_env()
                })
                .open()
                .await?;
            let published = session.publish(notes.as_deref()).await;
            session.close().await;
            let published = published?;
            info!(model = %published.id, "model published");
            println!(
                "{}",
                published
                    .published_at
                    .map_or_else(String::new, |at| at.to_rfc3339())
            );
        }
    }
    Ok(())
}

/// Applies one edit; returns the id of the entity it touched, if any.
fn apply(session: &EditSession, action: EditAction) -> Result<Option<EntityId>, CliError> {
    match action {
        EditAction::AddCube {
            name,
            caption,
            table,
            measure,
            dimension,
        } => {
            let measures = measure.into_iter().map(|column| NewColumn {
                name: column,
                caption: None,
                role: ColumnRole::Measure { aggregator: None },
            });
            let dimensions = dimension.into_iter().map(|column| NewColumn {
                name: column,
                caption: None,
                role: ColumnRole::Dimension,
            });
            let new = NewEntity {
                caption,
                table,
                columns: dimensions.chain(measures).collect(),
                ..NewEntity::named(name)
            };
            Ok(Some(session.create_cube(new)?))
        }
        EditAction::AddDimension {
            name,
            caption,
            table,
            primary_key,
            level,
        } => {
            let new = NewEntity {
                caption,
                table,
                primary_key,
                columns: level
                    .into_iter()
                    .map(|column| NewColumn {
                        name: column,
                        caption: None,
                        role: ColumnRole::Dimension,
                    })
                    .collect(),
                ..NewEntity::named(name)
            };
            Ok(Some(session.create_dimension(new)?))
        }
        EditAction::Duplicate { id } => {
            let id = EntityId::new(id);
            let kind = session
                .entities()
                .into_iter()
                .find(|entity| entity.id == id)
                .map(|entity| entity.kind)
                .ok_or_else(|| CliError::UnknownEntity(id.to_string()))?;
            Ok(Some(session.duplicate(kind, &id, EntityId::generate())?))
        }
        EditAction::Delete { id } => {
            let id = EntityId::new(id);
            if !session.delete_entity(&id)? {
                return Err(CliError::UnknownEntity(id.to_string()));
            }
            Ok(Some(id))
        }
        EditAction::Rename { name } => {
            session.update_model(|model| {
                model.name = name;
                Ok(())
            })?;
            Ok(None)
        }
    }
}
