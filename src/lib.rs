// src/lib.rs

//! holo-build
//!
//! Compiles an abstract, declarative package description (name, version,
//! file tree, scripts, dependency relations) into installable binary
//! packages for multiple package-manager formats.
//!
//! # Architecture
//!
//! - Package model: a single mutable aggregate (identity, relations,
//!   scripts, filesystem tree) threaded through a strictly sequential
//!   pipeline
//! - Build orchestrator: pre-processes the model, then drives a format
//!   generator through an in-memory build or a materialized-filesystem
//!   fallback
//! - Generators: per-format encoders (RPM binary container, Pacman
//!   metadata + archive) producing byte-for-byte reproducible output on
//!   request

pub mod archive;
pub mod build;
pub mod compression;
mod error;
pub mod generator;
pub mod package;

pub use error::{Error, Result};
pub use generator::{BuildOutcome, Generator, OutputFormat};
pub use package::{Architecture, Package, PackageRelation};

/// Tool version embedded in non-reproducible output banners.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
