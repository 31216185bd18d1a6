// src/generator/pacman/mtree.rs

//! In-memory mtree manifest generation
//!
//! Pacman packages carry a `.MTREE` member, a gzip-compressed mtree(5)
//! manifest of every other archive member. bsdtar produces the same field
//! set with `--options=!all,use-set,type,uid,gid,mode,time,size,md5,sha256,
//! link`; this module computes it directly from the in-memory tree instead
//! of shelling out.

use crate::compression::{self, CompressionFormat};
use crate::error::Result;
use crate::package::{FsDirectory, FsNode};
use md5::Md5;
use sha2::{Digest, Sha256};
use std::fmt::Write;

const GZIP_LEVEL: u32 = 6;

/// Render and compress the manifest. Entries appear in lexicographic path
/// order with `./`-prefixed names; `.MTREE` itself is not listed, so this
/// must run before the manifest is injected into the tree.
pub fn make_mtree(root: &FsDirectory, default_mtime: u64) -> Result<Vec<u8>> {
    let mut manifest = String::from("#mtree\n");
    // both the walk callback and write! on a String are infallible
    let _ = root.walk(&mut |path, node| {
        let _ = match node {
            FsNode::Directory(dir) => writeln!(
                manifest,
                ".{} type=dir uid={} gid={} mode={:o} time={}.0",
                path,
                dir.metadata.uid(),
                dir.metadata.gid(),
                dir.metadata.mode,
                dir.metadata.mtime.unwrap_or(default_mtime),
            ),
            FsNode::File(file) => writeln!(
                manifest,
                ".{} type=file uid={} gid={} mode={:o} time={}.0 size={} md5digest={} sha256digest={}",
                path,
                file.metadata.uid(),
                file.metadata.gid(),
                file.metadata.mode,
                file.metadata.mtime.unwrap_or(default_mtime),
                file.content.len(),
                hex::encode(Md5::digest(&file.content)),
                hex::encode(Sha256::digest(&file.content)),
            ),
            FsNode::Symlink(link) => writeln!(
                manifest,
                ".{} type=link uid=0 gid=0 mode=777 time={}.0 link={}",
                path, default_mtime, link.target,
            ),
        };
        Ok(())
    });
    compression::compress(manifest.as_bytes(), CompressionFormat::Gzip, GZIP_LEVEL)
}
