use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use semsearch::commands::{
    add_document, check_consistency, check_model, delete_document, list_documents, rebuild_index,
    search, show_config, show_query_log, show_stats,
};
use semsearch::config::Config;
use semsearch::database::SqliteStore;
use semsearch::engine::Engine;

#[derive(Parser)]
#[command(name = "semsearch")]
#[command(about = "Semantic search over local text documents")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the configuration file, or show the current configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Chunk, embed and index a text file
    Add {
        /// Path of the file to add
        path: PathBuf,
        /// Characters per chunk, overriding the configured value
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Characters shared by adjacent chunks, overriding the configured value
        #[arg(long)]
        overlap: Option<usize>,
    },
    /// Search indexed documents
    Search {
        /// Query text
        query: String,
        /// Number of results to return
        #[arg(long, short = 'k')]
        top_k: Option<usize>,
        /// Number of clusters to probe
        #[arg(long)]
        probes: Option<usize>,
    },
    /// Delete a document and its index entries
    Delete {
        /// Document ID to delete
        id: i64,
        /// Reclaim the freed database space afterwards
        #[arg(long)]
        compact: bool,
    },
    /// List all stored documents
    List,
    /// Retrain the index clusters over every stored vector
    Rebuild,
    /// Show storage, query and index statistics
    Stats,
    /// Show recently logged queries
    Logs {
        /// Number of queries to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Compare stored chunks with the index
    Check {
        /// Remove orphaned vectors and restore missing ones
        #[arg(long)]
        repair: bool,
    },
    /// Check that the embedding server is reachable and serves the model
    Health,
}

async fn open_engine(config: &Config) -> Result<Engine> {
    let store = SqliteStore::initialize_from_config_dir(config.get_base_dir())
        .await
        .context("Failed to open database")?;
    let engine = Engine::from_config(config, Arc::new(store))?;
    engine
        .warm_start()
        .await
        .context("Failed to load stored vectors")?;
    Ok(engine)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load_default()?;

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&config)?;
            } else {
                config.save()?;
                println!(
                    "Wrote configuration to {}",
                    config.config_file_path().display()
                );
            }
        }
        Commands::Health => {
            check_model(&config).await?;
        }
        Commands::Add {
            path,
            chunk_size,
            overlap,
        } => {
            let engine = open_engine(&config).await?;
            add_document(&engine, &path, chunk_size, overlap).await?;
        }
        Commands::Search {
            query,
            top_k,
            probes,
        } => {
            let engine = open_engine(&config).await?;
            search(&engine, &query, top_k, probes).await?;
        }
        Commands::Delete { id, compact } => {
            delete_document(&open_engine(&config).await?, id, compact).await?;
        }
        Commands::List => {
            list_documents(&open_engine(&config).await?).await?;
        }
        Commands::Rebuild => {
            rebuild_index(&open_engine(&config).await?).await?;
        }
        Commands::Stats => {
            show_stats(&open_engine(&config).await?).await?;
        }
        Commands::Logs { limit } => {
            show_query_log(&open_engine(&config).await?, limit).await?;
        }
        Commands::Check { repair } => {
            check_consistency(&open_engine(&config).await?, repair).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn cli_parsing() {
        let cli = Cli::try_parse_from(["semsearch", "list"]).expect("parse");
        assert!(matches!(cli.command, Commands::List));
    }

    #[test]
    fn add_command_with_overrides() {
        let cli = Cli::try_parse_from([
            "semsearch",
            "add",
            "notes.txt",
            "--chunk-size",
            "200",
            "--overlap",
            "20",
        ])
        .expect("parse");

        let Commands::Add {
            path,
            chunk_size,
            overlap,
        } = cli.command
        else {
            panic!("expected add command");
        };
        assert_eq!(path, PathBuf::from("notes.txt"));
        assert_eq!(chunk_size, Some(200));
        assert_eq!(overlap, Some(20));
    }

    #[test]
    fn search_command_with_top_k() {
        let cli =
            Cli::try_parse_from(["semsearch", "search", "vector index", "-k", "3"]).expect("parse");

        let Commands::Search {
            query,
            top_k,
            probes,
        } = cli.command
        else {
            panic!("expected search command");
        };
        assert_eq!(query, "vector index");
        assert_eq!(top_k, Some(3));
        assert_eq!(probes, None);
    }

    #[test]
    fn logs_default_limit() {
        let cli = Cli::try_parse_from(["semsearch", "logs"]).expect("parse");
        assert!(matches!(cli.command, Commands::Logs { limit: 20 }));
    }

    #[test]
    fn delete_requires_numeric_id() {
        let cli = Cli::try_parse_from(["semsearch", "delete", "abc"]);
        assert!(cli.is_err());
    }

    #[test]
    fn delete_compact_flag() {
        let cli = Cli::try_parse_from(["semsearch", "delete", "7", "--compact"]).expect("parse");
        assert!(matches!(
            cli.command,
            Commands::Delete {
                id: 7,
                compact: true
            }
        ));

        let cli = Cli::try_parse_from(["semsearch", "delete", "7"]).expect("parse");
        assert!(matches!(
            cli.command,
            Commands::Delete { compact: false, .. }
        ));
    }

    #[test]
    fn check_repair_flag() {
        let cli = Cli::try_parse_from(["semsearch", "check", "--repair"]).expect("parse");
        assert!(matches!(cli.command, Commands::Check { repair: true }));
    }

    #[test]
    fn config_show_flag() {
        let cli = Cli::try_parse_from(["semsearch", "config", "--show"]).expect("parse");
        assert!(matches!(cli.command, Commands::Config { show: true }));
    }

    #[test]
    fn invalid_command() {
        let err = Cli::try_parse_from(["semsearch", "invalid"])
            .err()
            .expect("should fail");
        assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
    }

    #[test]
    fn help_message() {
        let err = Cli::try_parse_from(["semsearch", "--help"])
            .err()
            .expect("should fail");
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
    }
}
