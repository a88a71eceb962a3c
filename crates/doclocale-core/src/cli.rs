//! `doclocale` command line.

use anyhow::Result;
use clap::{Parser, Subcommand};
use doclocale_store::{DocFilter, DocId, Mode, StorageId};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::DoclocaleConfig;
use crate::error::DocError;
use crate::pages::ParentRef;
use crate::service::DocService;
use crate::workflow::SourceRef;

/// Command line arguments.
#[derive(Parser)]
#[command(name = "doclocale")]
#[command(about = "Multi-locale document replication", long_about = None)]
pub struct Cli {
    /// Config file, TOML or JSON.
    #[arg(short, long, env = "DOCLOCALE_CONFIG", default_value = "doclocale.toml")]
    pub config: PathBuf,

    /// Overrides the configured store directory.
    #[arg(long)]
    pub store_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Park singleton documents and print their ids.
    Startup,
    /// Insert a draft page.
    InsertPage {
        /// Page title; the slug is derived from it.
        title: String,
        /// Target locale; the default locale when omitted.
        #[arg(short, long)]
        locale: Option<String>,
        /// Storage id of the parent page; the home page when omitted.
        #[arg(short, long)]
        parent: Option<String>,
        /// Page type.
        #[arg(short = 't', long = "type", default_value = "default-page")]
        doc_type: String,
    },
    /// Create the draft of a document in another locale.
    Localize {
        /// Storage id of the source record.
        id: String,
        /// Target locale.
        #[arg(long)]
        to: String,
    },
    /// Publish a draft.
    Publish {
        /// Storage id of either copy, or the aposDocId with --locale.
        id: String,
        /// Locale of the draft when `id` is an aposDocId.
        #[arg(short, long)]
        locale: Option<String>,
    },
    /// Resolve a public URL to published content.
    Get {
        /// Public URL path, e.g. `/ca/en/child-page`.
        url: String,
    },
    /// List documents of one locale and mode.
    List {
        /// Locale; the default locale when omitted.
        #[arg(short, long)]
        locale: Option<String>,
        /// `draft` or `published`.
        #[arg(short, long, default_value = "draft")]
        mode: Mode,
        /// Only documents of this type.
        #[arg(long = "type")]
        doc_type: Option<String>,
        /// Only the document with this parked id.
        #[arg(long)]
        parked: Option<String>,
    },
}

#[derive(Serialize)]
struct ParkedEntry<'a> {
    parked_id: &'a str,
    apos_doc_id: &'a DocId,
}

#[derive(Serialize)]
struct ErrorOutput<'a> {
    error: &'static str,
    status: u16,
    message: &'a str,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

impl Cli {
    /// Loads the config file, falling back to defaults when it is missing.
    pub fn load_config(&self) -> Result<DoclocaleConfig> {
        let mut config = load_or_default(&self.config)?;
        if let Some(dir) = &self.store_dir {
            config.store_dir = Some(dir.clone());
        }
        Ok(config)
    }

    /// True when the config file is missing and defaults are used.
    pub fn uses_defaults(&self) -> bool {
        !self.config.exists()
    }

    /// Opens the store, parks singletons and runs the subcommand. Results are
    /// printed to stdout as JSON.
    pub async fn run(self, config: DoclocaleConfig) -> Result<()> {
        let service = DocService::open(&config).map_err(report)?;
        let startup = service.startup().await.map_err(report)?;

        match self.command {
            Command::Startup => {
                let parked: Vec<_> = startup
                    .parked()
                    .into_iter()
                    .map(|(parked_id, apos_doc_id)| ParkedEntry {
                        parked_id,
                        apos_doc_id,
                    })
                    .collect();
                print_json(&parked)
            }
            Command::InsertPage {
                title,
                locale,
                parent,
                doc_type,
            } => {
                let locale = locale.unwrap_or_else(|| service.locales().default_locale().code.clone());
                let parent = match parent {
                    Some(id) => ParentRef::Doc(StorageId::new(id)),
                    None => ParentRef::Home,
                };
                let page = service
                    .insert_page(&locale, parent, &title, &doc_type)
                    .await
                    .map_err(report)?;
                print_json(&page)
            }
            Command::Localize { id, to } => {
                let copy = service
                    .localize(SourceRef::Storage(StorageId::new(id)), &to)
                    .await
                    .map_err(report)?;
                print_json(&copy)
            }
            Command::Publish { id, locale } => {
                let source = match locale {
                    Some(locale) => SourceRef::Canonical {
                        apos_doc_id: DocId::new(id),
                        locale,
                    },
                    None => SourceRef::Storage(StorageId::new(id)),
                };
                let published = service.publish(source).await.map_err(report)?;
                print_json(&published)
            }
            Command::Get { url } => {
                let view = service.public_get(&url).await.map_err(report)?;
                print_json(&view)
            }
            Command::List {
                locale,
                mode,
                doc_type,
                parked,
            } => {
                let locale = locale.unwrap_or_else(|| service.locales().default_locale().code.clone());
                let mut filter = DocFilter::new();
                if let Some(doc_type) = &doc_type {
                    filter = filter.doc_type(doc_type);
                }
                if let Some(parked) = &parked {
                    filter = filter.parked_id(parked);
                }
                let docs = service.find(&locale, mode, filter).await.map_err(report)?;
                print_json(&docs)
            }
        }
    }
}

fn load_or_default(path: &Path) -> Result<DoclocaleConfig> {
    if path.exists() {
        DoclocaleConfig::from_file(path)
    } else {
        Ok(DoclocaleConfig::default())
    }
}

/// Prints the error's external code and status, then hands it to anyhow.
fn report(err: DocError) -> anyhow::Error {
    let message = err.to_string();
    let output = ErrorOutput {
        error: err.code(),
        status: err.http_status(),
        message: &message,
    };
    if let Ok(json) = serde_json::to_string(&output) {
        eprintln!("{}", json);
    }
    err.into()
}
