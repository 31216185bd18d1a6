// src/package/fs.rs

//! In-memory filesystem tree model
//!
//! A package owns a tree of directories, regular files and symlinks that is
//! either encoded directly into an archive (in-memory build strategies) or
//! materialized onto a real filesystem (filesystem-rooted strategies).

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// An owner or group, identified either by numeric id or by symbolic name.
///
/// Symbolic identities cannot be written into a binary archive at build time
/// (the builder does not resolve user databases), so they must be deferred
/// into the setup script before the tree reaches an encoder. See
/// [`FsMetadata::postpone_unmaterializable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityRef {
    Id(u32),
    Name(String),
}

impl EntityRef {
    pub fn id(&self) -> Option<u32> {
        match self {
            Self::Id(id) => Some(*id),
            Self::Name(_) => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Id(_) => None,
            Self::Name(name) => Some(name),
        }
    }
}

/// Metadata carried by directories and regular files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsMetadata {
    /// Permission bits (no file-type bits).
    pub mode: u32,
    pub owner: Option<EntityRef>,
    pub group: Option<EntityRef>,
    /// Modification timestamp (seconds since the epoch). `None` means "use
    /// the build's default timestamp" (0 in reproducible mode).
    pub mtime: Option<u64>,
}

impl FsMetadata {
    pub fn for_regular_file() -> Self {
        Self {
            mode: 0o644,
            owner: None,
            group: None,
            mtime: None,
        }
    }

    pub fn for_directory() -> Self {
        Self {
            mode: 0o755,
            owner: None,
            group: None,
            mtime: None,
        }
    }

    /// Numeric owner id to write into archives. Symbolic owners must have
    /// been deferred already; they fall back to root here.
    pub fn uid(&self) -> u32 {
        self.owner.as_ref().and_then(EntityRef::id).unwrap_or(0)
    }

    /// Numeric group id to write into archives.
    pub fn gid(&self) -> u32 {
        self.group.as_ref().and_then(EntityRef::id).unwrap_or(0)
    }

    /// Remove symbolic owner/group identities from this metadata and return
    /// the shell directive that re-establishes them at install time.
    ///
    /// Returns an empty string when both owner and group are already
    /// materializable (numeric or unset).
    pub fn postpone_unmaterializable(&mut self, path: &str) -> String {
        let owner_name = match &self.owner {
            Some(EntityRef::Name(name)) => {
                let name = name.clone();
                self.owner = None;
                Some(name)
            }
            _ => None,
        };
        let group_name = match &self.group {
            Some(EntityRef::Name(name)) => {
                let name = name.clone();
                self.group = None;
                Some(name)
            }
            _ => None,
        };

        match (owner_name, group_name) {
            (Some(owner), Some(group)) => format!("chown {}:{} {}\n", owner, group, path),
            (Some(owner), None) => format!("chown {} {}\n", owner, path),
            (None, Some(group)) => format!("chgrp {} {}\n", group, path),
            (None, None) => String::new(),
        }
    }
}

impl Default for FsMetadata {
    fn default() -> Self {
        Self::for_directory()
    }
}

/// A regular file with byte content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsRegularFile {
    pub content: Vec<u8>,
    pub metadata: FsMetadata,
}

/// A symbolic link. Symlinks carry no metadata of their own; their mode is
/// fixed and their ownership follows the package default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsSymlink {
    pub target: String,
}

/// A directory mapping child names to nodes.
///
/// Children are kept in a sorted map: insertion order is irrelevant for the
/// model, and every encoder that cares about ordering gets a deterministic
/// lexicographic walk for free.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FsDirectory {
    pub entries: BTreeMap<String, FsNode>,
    pub metadata: FsMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsNode {
    Directory(FsDirectory),
    File(FsRegularFile),
    Symlink(FsSymlink),
}

impl FsNode {
    pub fn metadata(&self) -> Option<&FsMetadata> {
        match self {
            Self::Directory(dir) => Some(&dir.metadata),
            Self::File(file) => Some(&file.metadata),
            Self::Symlink(_) => None,
        }
    }
}

impl FsDirectory {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            metadata: FsMetadata::for_directory(),
        }
    }

    /// Insert a node at an absolute path, creating intermediate directories
    /// with default metadata as needed. Fails when the path is not absolute,
    /// when a parent component is not a directory, or when the path already
    /// has an entry.
    pub fn insert(&mut self, path: &str, node: FsNode) -> Result<()> {
        let relative = path.strip_prefix('/').ok_or_else(|| {
            Error::Declaration(format!("path {:?} is not absolute", path))
        })?;
        let segments: Vec<&str> = relative.split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(Error::Declaration(format!(
                "path {:?} contains empty components",
                path
            )));
        }

        let mut current = self;
        for segment in &segments[..segments.len() - 1] {
            let child = current
                .entries
                .entry(segment.to_string())
                .or_insert_with(|| FsNode::Directory(FsDirectory::new()));
            current = match child {
                FsNode::Directory(dir) => dir,
                _ => {
                    return Err(Error::Declaration(format!(
                        "path {:?} traverses a non-directory",
                        path
                    )))
                }
            };
        }

        let leaf = segments[segments.len() - 1].to_string();
        match current.entries.get_mut(&leaf) {
            None => {
                current.entries.insert(leaf, node);
                Ok(())
            }
            // a directory that only exists as an implicit parent may be
            // replaced by an explicit declaration carrying metadata
            Some(FsNode::Directory(existing)) if existing.entries.is_empty() => {
                if let FsNode::Directory(_) = node {
                    current.entries.insert(leaf, node);
                    Ok(())
                } else {
                    Err(Error::Declaration(format!("duplicate entry at {:?}", path)))
                }
            }
            Some(_) => Err(Error::Declaration(format!("duplicate entry at {:?}", path))),
        }
    }

    /// Look up a node by absolute path.
    pub fn lookup(&self, path: &str) -> Option<&FsNode> {
        let relative = path.strip_prefix('/')?;
        let mut current = self;
        let segments: Vec<&str> = relative.split('/').collect();
        for (idx, segment) in segments.iter().enumerate() {
            let node = current.entries.get(*segment)?;
            if idx == segments.len() - 1 {
                return Some(node);
            }
            current = match node {
                FsNode::Directory(dir) => dir,
                _ => return None,
            };
        }
        None
    }

    /// Visit every node below the root (the root itself is not visited) in
    /// lexicographic path order, passing absolute paths.
    pub fn walk<F>(&self, visit: &mut F) -> Result<()>
    where
        F: FnMut(&str, &FsNode) -> Result<()>,
    {
        Self::walk_at("", &self.entries, visit)
    }

    fn walk_at<F>(prefix: &str, entries: &BTreeMap<String, FsNode>, visit: &mut F) -> Result<()>
    where
        F: FnMut(&str, &FsNode) -> Result<()>,
    {
        for (name, node) in entries {
            let path = format!("{}/{}", prefix, name);
            visit(&path, node)?;
            if let FsNode::Directory(dir) = node {
                Self::walk_at(&path, &dir.entries, visit)?;
            }
        }
        Ok(())
    }

    /// Mutable variant of [`walk`](Self::walk), used by the pre-processing
    /// passes that rewrite node metadata in place.
    pub fn walk_mut<F>(&mut self, visit: &mut F) -> Result<()>
    where
        F: FnMut(&str, &mut FsNode) -> Result<()>,
    {
        Self::walk_mut_at("", &mut self.entries, visit)
    }

    fn walk_mut_at<F>(
        prefix: &str,
        entries: &mut BTreeMap<String, FsNode>,
        visit: &mut F,
    ) -> Result<()>
    where
        F: FnMut(&str, &mut FsNode) -> Result<()>,
    {
        for (name, node) in entries.iter_mut() {
            let path = format!("{}/{}", prefix, name);
            visit(&path, node)?;
            if let FsNode::Directory(dir) = node {
                Self::walk_mut_at(&path, &mut dir.entries, visit)?;
            }
        }
        Ok(())
    }

    /// Write this tree onto the real filesystem below `root`.
    ///
    /// `root` itself is created. Numeric ownership is applied with lchown,
    /// which requires the build to run as root or under a privilege
    /// simulator such as fakeroot; symbolic ownership must have been
    /// deferred beforehand.
    pub fn materialize(&self, root: &Path) -> Result<()> {
        fs::create_dir(root)
            .map_err(|e| Error::io(format!("cannot create {}", root.display()), e))?;
        self.materialize_into(root)
    }

    fn materialize_into(&self, dir_path: &Path) -> Result<()> {
        for (name, node) in &self.entries {
            let path = dir_path.join(name);
            match node {
                FsNode::Directory(dir) => {
                    fs::create_dir(&path)
                        .map_err(|e| Error::io(format!("cannot create {}", path.display()), e))?;
                    set_permissions(&path, dir.metadata.mode)?;
                    apply_ownership(&path, &dir.metadata)?;
                    dir.materialize_into(&path)?;
                }
                FsNode::File(file) => {
                    fs::write(&path, &file.content)
                        .map_err(|e| Error::io(format!("cannot write {}", path.display()), e))?;
                    set_permissions(&path, file.metadata.mode)?;
                    apply_ownership(&path, &file.metadata)?;
                }
                FsNode::Symlink(link) => {
                    std::os::unix::fs::symlink(&link.target, &path)
                        .map_err(|e| Error::io(format!("cannot link {}", path.display()), e))?;
                }
            }
        }
        Ok(())
    }
}

fn set_permissions(path: &Path, mode: u32) -> Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| Error::io(format!("cannot chmod {}", path.display()), e))
}

fn apply_ownership(path: &Path, metadata: &FsMetadata) -> Result<()> {
    let uid = metadata.owner.as_ref().and_then(EntityRef::id);
    let gid = metadata.group.as_ref().and_then(EntityRef::id);
    if uid.is_none() && gid.is_none() {
        return Ok(());
    }
    std::os::unix::fs::lchown(path, uid, gid)
        .map_err(|e| Error::io(format!("cannot chown {}", path.display()), e))
}
