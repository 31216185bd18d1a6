// src/generator/rpm/payload.rs

//! RPM payload assembly: the package's filesystem tree as a CPIO archive,
//! compressed with LZMA. The header and signature sections both embed
//! values computed from the payload, so it is always built first.

use crate::archive::cpio::CpioWriter;
use crate::compression::{self, CompressionFormat};
use crate::error::Result;
use crate::package::{FsNode, Package};

/// Mode bits identifying the node type (S_IFMT values).
pub const MODE_DIRECTORY: u32 = 0o040000;
pub const MODE_REGULAR: u32 = 0o100000;
pub const MODE_SYMLINK: u32 = 0o120000;

/// Compression preset, advertised in the header's payload flags tag.
pub const COMPRESSION_LEVEL: u32 = 5;

pub struct Payload {
    /// The compressed payload as it appears in the package.
    pub binary: Vec<u8>,
    /// Size of the CPIO archive before compression (signature section
    /// material).
    pub uncompressed_size: u64,
}

/// Serialize the package's tree into the compressed payload. Entries are
/// written in lexicographic path order with `./`-prefixed names.
pub fn make_payload(pkg: &Package, reproducible: bool) -> Result<Payload> {
    let default_mtime = if reproducible { 0 } else { super::build_time() };

    let mut writer = CpioWriter::new();
    pkg.fs_root.walk(&mut |path, node| {
        let name = format!(".{}", path);
        match node {
            FsNode::Directory(dir) => writer.append(
                &name,
                dir.metadata.mode | MODE_DIRECTORY,
                dir.metadata.uid(),
                dir.metadata.gid(),
                dir.metadata.mtime.unwrap_or(default_mtime),
                &[],
            ),
            FsNode::File(file) => writer.append(
                &name,
                file.metadata.mode | MODE_REGULAR,
                file.metadata.uid(),
                file.metadata.gid(),
                file.metadata.mtime.unwrap_or(default_mtime),
                &file.content,
            ),
            FsNode::Symlink(link) => writer.append(
                &name,
                0o777 | MODE_SYMLINK,
                0,
                0,
                default_mtime,
                link.target.as_bytes(),
            ),
        }
        Ok(())
    })?;

    let archive = writer.finish();
    let uncompressed_size = archive.len() as u64;
    let binary = compression::compress(&archive, CompressionFormat::Lzma, COMPRESSION_LEVEL)?;
    Ok(Payload {
        binary,
        uncompressed_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::cpio;
    use crate::package::{FsMetadata, FsRegularFile};

    #[test]
    fn test_payload_round_trip() {
        let mut pkg = Package::new("example", "1.0");
        let mut metadata = FsMetadata::for_regular_file();
        metadata.mode = 0o600;
        pkg.fs_root
            .insert(
                "/etc/example.conf",
                FsNode::File(FsRegularFile {
                    content: b"key = value\n".to_vec(),
                    metadata,
                }),
            )
            .unwrap();

        let payload = make_payload(&pkg, true).unwrap();
        let archive = compression::decompress(&payload.binary, CompressionFormat::Lzma).unwrap();
        assert_eq!(archive.len() as u64, payload.uncompressed_size);

        let entries = cpio::read_entries(archive.as_slice()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0.name, "./etc");
        assert_eq!(entries[0].0.mode, MODE_DIRECTORY | 0o755);
        assert_eq!(entries[1].0.name, "./etc/example.conf");
        assert_eq!(entries[1].0.mode, MODE_REGULAR | 0o600);
        assert_eq!(entries[1].0.mtime, 0);
        assert_eq!(entries[1].1, b"key = value\n");
    }
}
