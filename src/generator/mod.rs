// src/generator/mod.rs

//! Common interface for the package format generators
//!
//! One generator exists per target format. The build orchestrator drives a
//! generator through validation, an in-memory build attempt and, when that
//! is unsupported, a filesystem-rooted build against a materialized tree.

pub mod pacman;
pub mod rpm;

use crate::error::Result;
use crate::package::Package;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// The wall-clock timestamp stamped into non-reproducible builds.
pub(crate) fn build_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Outcome of a build-strategy attempt.
///
/// `Unsupported` is a distinguished non-error: the orchestrator branches on
/// it to select another strategy instead of surfacing a failure.
#[derive(Debug)]
pub enum BuildOutcome {
    /// The finished package.
    Built(Vec<u8>),
    /// This generator does not implement the requested build strategy.
    Unsupported,
}

/// A package format encoder.
pub trait Generator {
    /// Format-specific structural checks on top of the model invariants
    /// (e.g. permitted character sets for names and versions in this
    /// ecosystem). All applicable checks run; every violation is reported,
    /// never just the first.
    fn validate(&self, pkg: &Package) -> Vec<String>;

    /// Build the package entirely in memory. Generators may inject
    /// synthetic metadata files into the package's filesystem tree.
    fn build_in_memory(&self, pkg: &mut Package, reproducible: bool) -> Result<BuildOutcome>;

    /// Build the package from a directory already populated with the
    /// package's file tree.
    fn build_from_root(
        &self,
        pkg: &mut Package,
        root: &Path,
        reproducible: bool,
    ) -> Result<BuildOutcome>;

    /// The file name this package should be written to, following the
    /// format's naming convention. Must be a plain file name, not a path.
    /// Only meaningful after a successful build.
    fn recommended_file_name(&self, pkg: &Package) -> String;
}

/// Target package format selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Rpm,
    Pacman,
}

impl OutputFormat {
    pub fn generator(self) -> Box<dyn Generator> {
        match self {
            Self::Rpm => Box::new(rpm::RpmGenerator),
            Self::Pacman => Box::new(pacman::PacmanGenerator),
        }
    }
}
