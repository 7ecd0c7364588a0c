//! # oppm Core Library
//!
//! This crate contains the core logic of `oppm`, a manager for portable
//! applications. Everything lives under one root directory:
//!
//! ```text
//! <root>/
//!   meta.toml     registry of apps and shims
//!   apps/<name>/  one directory per installed application
//!   shims/        command proxies to put on PATH
//! ```
//!
//! All recorded paths are relative (to the root, or to `shims/` for shim
//! links), so a root keeps working after being moved, packed or restored on
//! another machine.
//!
//! This library is built for the `oppm` CLI, but you can also reuse it as a
//! backend in other tools.
//!
//! ## Modules Overview
//! - [`metadata`] – The metadata store (`meta.toml`): app and shim records
//! - [`installer`] – Installing, removing, syncing and cleaning applications
//! - [`shims`] – Creating proxy shims to forward command invocations
//! - [`migrate`] – Moving a whole root to a new location
//! - [`pack`] – Packing a root into one archive and rebuilding it elsewhere
//! - [`health`] – Consistency checks with optional repair
//! - [`archive`] – Archive extraction and compression
//! - [`config`] – The user config naming the active root
//! - [`layout`] – Paths of everything under a root
//! - [`error`] – Error kinds and their exit codes
//! - [`util`] – Shared path and filesystem helpers

pub mod archive;
pub mod config;
pub mod error;
pub mod health;
pub mod installer;
pub mod layout;
pub mod metadata;
pub mod migrate;
pub mod pack;
pub mod shims;
pub mod util;

pub use error::{EntryKind, Error, Result};
pub use layout::Layout;
pub use metadata::{AppRecord, ShimKind, ShimRecord, SourceKind, Store};
