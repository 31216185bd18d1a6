// src/package/mod.rs

//! The abstract package model
//!
//! A [`Package`] is the single mutable aggregate that the build pipeline
//! threads through its pre-processing passes and hands to a format
//! generator. It is constructed by the declaration loader, mutated in place
//! by the orchestrator, and consumed read-mostly by generators (which may
//! inject synthetic metadata files into the tree).

mod fs;
mod loader;

pub use fs::{EntityRef, FsDirectory, FsMetadata, FsNode, FsRegularFile, FsSymlink};
pub use loader::{load_package, parse_package};

use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Path prefix under which a package's files are recognized as belonging to
/// a named Holo plugin (the provisioning namespace).
pub const HOLO_PROVISION_PREFIX: &str = "/usr/share/holo/";

/// Target architectures understood by the model. Each generator maps these
/// to its own ecosystem's architecture identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Architecture {
    #[default]
    Any,
    I386,
    X86_64,
    Armv5,
    Armv6h,
    Armv7h,
    Aarch64,
}

impl Architecture {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::I386 => "i386",
            Self::X86_64 => "x86_64",
            Self::Armv5 => "armv5",
            Self::Armv6h => "armv6h",
            Self::Armv7h => "armv7h",
            Self::Aarch64 => "aarch64",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Architecture {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "any" => Ok(Self::Any),
            "i386" => Ok(Self::I386),
            "x86_64" => Ok(Self::X86_64),
            "armv5" => Ok(Self::Armv5),
            "armv6h" => Ok(Self::Armv6h),
            "armv7h" => Ok(Self::Armv7h),
            "aarch64" => Ok(Self::Aarch64),
            _ => Err(format!("unknown architecture: {:?}", s)),
        }
    }
}

/// Comparison operator of a version constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintRelation {
    Equal,
    GreaterOrEqual,
    LessOrEqual,
    Greater,
    Less,
}

impl ConstraintRelation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::GreaterOrEqual => ">=",
            Self::LessOrEqual => "<=",
            Self::Greater => ">",
            Self::Less => "<",
        }
    }
}

impl FromStr for ConstraintRelation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "=" => Ok(Self::Equal),
            ">=" => Ok(Self::GreaterOrEqual),
            "<=" => Ok(Self::LessOrEqual),
            ">" => Ok(Self::Greater),
            "<" => Ok(Self::Less),
            _ => Err(format!("unknown version comparison: {:?}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConstraint {
    pub relation: ConstraintRelation,
    pub version: String,
}

/// A relation to another package (requirement, provision, conflict or
/// replacement). Deduplication of synthesized relations compares the related
/// package name only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRelation {
    pub related_package: String,
    pub constraint: Option<VersionConstraint>,
}

impl PackageRelation {
    pub fn new(related_package: impl Into<String>) -> Self {
        Self {
            related_package: related_package.into(),
            constraint: None,
        }
    }
}

/// The abstract package: identity, descriptive fields, relations, lifecycle
/// scripts and the owned filesystem tree.
#[derive(Debug, Clone)]
pub struct Package {
    pub name: String,
    pub version: String,
    pub release: u32,
    /// 0 means "no epoch".
    pub epoch: u32,
    pub architecture: Architecture,
    pub description: String,
    pub author: Option<String>,
    pub requires: Vec<PackageRelation>,
    pub provides: Vec<PackageRelation>,
    pub conflicts: Vec<PackageRelation>,
    pub replaces: Vec<PackageRelation>,
    /// Shell fragment run on install/upgrade. Generators wrap it into their
    /// format's hook syntax.
    pub setup_script: String,
    /// Shell fragment run on removal.
    pub cleanup_script: String,
    pub fs_root: FsDirectory,
}

impl Package {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            release: 1,
            epoch: 0,
            architecture: Architecture::Any,
            description: String::new(),
            author: None,
            requires: Vec::new(),
            provides: Vec::new(),
            conflicts: Vec::new(),
            replaces: Vec::new(),
            setup_script: String::new(),
            cleanup_script: String::new(),
            fs_root: FsDirectory::new(),
        }
    }

    /// Sum of the content sizes of all regular files in the tree.
    pub fn installed_size(&self) -> u64 {
        let mut size = 0u64;
        // the walk callback is infallible here
        let _ = self.fs_root.walk(&mut |_, node| {
            if let FsNode::File(file) = node {
                size += file.content.len() as u64;
            }
            Ok(())
        });
        size
    }

    pub fn has_requirement(&self, related_package: &str) -> bool {
        self.requires
            .iter()
            .any(|rel| rel.related_package == related_package)
    }

    /// Format-independent model invariants. Generators add their own checks
    /// on top of these; all violations are collected.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.name.is_empty() {
            problems.push("package name is empty".to_string());
        }
        if self.name.contains('/') || self.name.chars().any(char::is_whitespace) {
            problems.push(format!(
                "package name {:?} contains path separators or whitespace",
                self.name
            ));
        }
        if self.version.is_empty() {
            problems.push("package version is empty".to_string());
        }
        if self.release == 0 {
            problems.push("package release must be a positive integer".to_string());
        }
        for (kind, relations) in [
            ("requires", &self.requires),
            ("provides", &self.provides),
            ("conflicts", &self.conflicts),
            ("replaces", &self.replaces),
        ] {
            for rel in relations.iter() {
                if rel.related_package.is_empty() {
                    problems.push(format!("empty package name in {} list", kind));
                }
            }
        }
        problems
    }
}

/// Collapse runs of whitespace to single spaces and trim, the way makepkg
/// normalizes package descriptions.
pub(crate) fn normalize_whitespace(text: &str) -> String {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    let re = WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("static regex"));
    re.replace_all(text.trim(), " ").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_installed_size_counts_regular_files_only() {
        let mut pkg = Package::new("example", "1.0");
        pkg.fs_root
            .insert(
                "/usr/bin/example",
                FsNode::File(FsRegularFile {
                    content: vec![0u8; 100],
                    metadata: FsMetadata::for_regular_file(),
                }),
            )
            .unwrap();
        pkg.fs_root
            .insert(
                "/usr/bin/example-link",
                FsNode::Symlink(FsSymlink {
                    target: "example".into(),
                }),
            )
            .unwrap();
        assert_eq!(pkg.installed_size(), 100);
    }

    #[test]
    fn test_validate_collects_all_problems() {
        let mut pkg = Package::new("bad name", "");
        pkg.release = 0;
        pkg.requires.push(PackageRelation::new(""));
        let problems = pkg.validate();
        assert_eq!(problems.len(), 4);
    }

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(
            normalize_whitespace("  a\tpackage\n  description "),
            "a package description"
        );
    }

    #[test]
    fn test_architecture_round_trip() {
        for name in ["any", "i386", "x86_64", "armv5", "armv6h", "armv7h", "aarch64"] {
            let arch: Architecture = name.parse().unwrap();
            assert_eq!(arch.name(), name);
        }
        assert!("mips".parse::<Architecture>().is_err());
    }
}
