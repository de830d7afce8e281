//! citelib Core Library
//!
//! This crate provides the core functionality for citelib, an ingestion and
//! reconciliation engine for bibliography databases. It loads CSL-JSON and
//! BibLaTeX files, normalizes their records into one [`Entry`] type, merges
//! several databases into a [`Library`] and keeps a search index over it.
//!
//! # Architecture
//!
//! - **Sources** read one database each and watch it for changes
//! - **Parse worker** runs format parsing off the caller's task, one job at a time
//! - **Merge** rewrites colliding citekeys to `citekey@source` so nothing is dropped
//! - **Service** orchestrates load cycles, timeouts, retries and state events
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! let service = LibraryService::new(config);
//!
//! // Load every configured database
//! let library = service.load().await?;
//!
//! // Query the index
//! let ids = service.search("knuth literate");
//! ```
//!
//! # Modules
//!
//! - `service`: Library orchestrator (main entry point)
//! - `entry`: Normalized entries over CSL and BibLaTeX records
//! - `parse`: CSL-JSON and BibLaTeX parsers
//! - `source`: Local-file and vault data sources
//! - `merge`: Reconciliation of entries from several sources
//! - `search`: Ranked full-text search
//! - `config`: Application configuration

pub mod config;
pub mod debounce;
pub mod entry;
pub mod error;
pub mod library;
pub mod merge;
pub mod parse;
pub mod search;
pub mod service;
pub mod source;
pub mod state;
pub mod worker;

pub use config::{Config, DatabaseConfig, LoaderConfig, SourceKind};
pub use entry::{Author, Entry, Reference};
pub use error::{LibraryError, ParseError, ParseWarning, SearchError, SourceError};
pub use library::Library;
pub use merge::{merge, MergeStrategy, SourceEntries};
pub use parse::{DatabaseFormat, RawRecord};
pub use search::SearchService;
pub use service::{LibraryService, LoadResult};
pub use source::{DataSource, DirectoryVault, LocalFileSource, MemoryVault, Vault, VaultFileSource};
pub use state::{LibraryEvent, LibraryState, LoadingStatus, Subscription};
