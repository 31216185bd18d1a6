// src/package/loader.rs

//! TOML package declaration loader
//!
//! Thin entry layer that turns a declarative TOML document into a validated
//! [`Package`]. The build pipeline itself never touches TOML; it receives a
//! fully-populated model from here.

use super::{
    Architecture, EntityRef, FsDirectory, FsMetadata, FsNode, FsRegularFile, FsSymlink, Package,
    PackageRelation, VersionConstraint,
};
use crate::error::{Error, Result};
use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Declaration {
    package: PackageSection,
    #[serde(default, rename = "file")]
    files: Vec<FileSection>,
    #[serde(default, rename = "directory")]
    directories: Vec<DirectorySection>,
    #[serde(default, rename = "symlink")]
    symlinks: Vec<SymlinkSection>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PackageSection {
    name: String,
    version: String,
    #[serde(default = "default_release")]
    release: u32,
    #[serde(default)]
    epoch: u32,
    architecture: Option<String>,
    #[serde(default)]
    description: String,
    author: Option<String>,
    #[serde(default)]
    requires: Vec<String>,
    #[serde(default)]
    provides: Vec<String>,
    #[serde(default)]
    conflicts: Vec<String>,
    #[serde(default)]
    replaces: Vec<String>,
    #[serde(default)]
    setup_script: String,
    #[serde(default)]
    cleanup_script: String,
}

fn default_release() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSection {
    path: String,
    content: String,
    mode: Option<String>,
    owner: Option<IdOrName>,
    group: Option<IdOrName>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DirectorySection {
    path: String,
    mode: Option<String>,
    owner: Option<IdOrName>,
    group: Option<IdOrName>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SymlinkSection {
    path: String,
    target: String,
}

/// An owner/group reference: numeric id or symbolic name.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IdOrName {
    Id(u32),
    Name(String),
}

impl From<IdOrName> for EntityRef {
    fn from(value: IdOrName) -> Self {
        match value {
            IdOrName::Id(id) => EntityRef::Id(id),
            IdOrName::Name(name) => EntityRef::Name(name),
        }
    }
}

/// Load a package declaration from a file.
pub fn load_package(path: &Path) -> Result<Package> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::io(format!("cannot read {}", path.display()), e))?;
    parse_package(&text)
}

/// Parse a package declaration from TOML text into a validated [`Package`].
pub fn parse_package(text: &str) -> Result<Package> {
    let declaration: Declaration =
        toml::from_str(text).map_err(|e| Error::Declaration(e.to_string()))?;

    let section = declaration.package;
    let mut pkg = Package::new(section.name, section.version);
    pkg.release = section.release;
    pkg.epoch = section.epoch;
    if let Some(arch) = &section.architecture {
        pkg.architecture = arch
            .parse::<Architecture>()
            .map_err(Error::Declaration)?;
    }
    pkg.description = section.description;
    pkg.author = section.author;
    pkg.setup_script = section.setup_script;
    pkg.cleanup_script = section.cleanup_script;
    pkg.requires = parse_relations(&section.requires)?;
    pkg.provides = parse_relations(&section.provides)?;
    pkg.conflicts = parse_relations(&section.conflicts)?;
    pkg.replaces = parse_relations(&section.replaces)?;

    for dir in declaration.directories {
        let mut node = FsDirectory::new();
        node.metadata = parse_metadata(dir.mode.as_deref(), dir.owner, dir.group, 0o755)?;
        pkg.fs_root.insert(&dir.path, FsNode::Directory(node))?;
    }
    for file in declaration.files {
        let metadata = parse_metadata(file.mode.as_deref(), file.owner, file.group, 0o644)?;
        let node = FsRegularFile {
            content: file.content.into_bytes(),
            metadata,
        };
        pkg.fs_root.insert(&file.path, FsNode::File(node))?;
    }
    for link in declaration.symlinks {
        pkg.fs_root.insert(
            &link.path,
            FsNode::Symlink(FsSymlink {
                target: link.target,
            }),
        )?;
    }

    let problems = pkg.validate();
    if !problems.is_empty() {
        return Err(Error::Validation(problems));
    }

    debug!(
        "loaded declaration for {} {} ({} bytes installed)",
        pkg.name,
        pkg.version,
        pkg.installed_size()
    );
    Ok(pkg)
}

fn parse_metadata(
    mode: Option<&str>,
    owner: Option<IdOrName>,
    group: Option<IdOrName>,
    default_mode: u32,
) -> Result<FsMetadata> {
    let mode = match mode {
        Some(text) => u32::from_str_radix(text, 8)
            .map_err(|_| Error::Declaration(format!("invalid mode: {:?}", text)))?,
        None => default_mode,
    };
    Ok(FsMetadata {
        mode,
        owner: owner.map(EntityRef::from),
        group: group.map(EntityRef::from),
        mtime: None,
    })
}

/// Parse relation strings like `"other-pkg"` or `"other-pkg >= 2.1"`.
fn parse_relations(texts: &[String]) -> Result<Vec<PackageRelation>> {
    static RELATION: OnceLock<Regex> = OnceLock::new();
    let re = RELATION.get_or_init(|| {
        Regex::new(r"^\s*([^\s<>=]+)\s*(?:(<=|>=|=|<|>)\s*(\S+))?\s*$").expect("static regex")
    });

    texts
        .iter()
        .map(|text| {
            let captures = re
                .captures(text)
                .ok_or_else(|| Error::Declaration(format!("invalid package relation: {:?}", text)))?;
            let constraint = match (captures.get(2), captures.get(3)) {
                (Some(op), Some(version)) => Some(VersionConstraint {
                    relation: op
                        .as_str()
                        .parse()
                        .map_err(Error::Declaration)?,
                    version: version.as_str().to_string(),
                }),
                _ => None,
            };
            Ok(PackageRelation {
                related_package: captures[1].to_string(),
                constraint,
            })
        })
        .collect()
}
