// src/archive/cpio.rs

//! CPIO "New ASCII" (newc) archive encoding
//!
//! RPM payloads are CPIO archives. The format lists files sequentially, each
//! preceded by a fixed 110-byte header of 8-digit hex fields, terminated by
//! a `TRAILER!!!` entry. A reader lives here as well so that tests can
//! verify encoded payloads entry by entry.

use std::io::{self, Read};

/// Header size of the newc format.
const HEADER_SIZE: usize = 110;
/// Magic string for the newc format.
const MAGIC_NEWC: &[u8] = b"070701";
/// Magic string for the CRC variant (accepted when reading).
const MAGIC_CRC: &[u8] = b"070702";
/// Name of the archive-terminating entry.
const TRAILER: &str = "TRAILER!!!";

/// Metadata of one CPIO entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpioEntry {
    pub name: String,
    pub ino: u32,
    /// Full mode including file-type bits.
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub mtime: u64,
    pub size: u64,
}

/// Sequential writer for newc archives. Inode numbers are assigned in
/// append order, which keeps the output deterministic.
pub struct CpioWriter {
    buf: Vec<u8>,
    next_ino: u32,
}

impl CpioWriter {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            next_ino: 1,
        }
    }

    /// Append one entry. `mode` must carry the file-type bits; symlink
    /// targets are passed as `content`.
    pub fn append(&mut self, name: &str, mode: u32, uid: u32, gid: u32, mtime: u64, content: &[u8]) {
        let ino = self.next_ino;
        self.next_ino += 1;
        self.write_header(name, ino, mode, uid, gid, 1, mtime, content.len() as u64);
        self.buf.extend_from_slice(content);
        self.pad_to_4();
    }

    /// Terminate the archive and return its bytes.
    pub fn finish(mut self) -> Vec<u8> {
        self.write_header(TRAILER, 0, 0, 0, 0, 1, 0, 0);
        self.buf
    }

    #[allow(clippy::too_many_arguments)]
    fn write_header(
        &mut self,
        name: &str,
        ino: u32,
        mode: u32,
        uid: u32,
        gid: u32,
        nlink: u32,
        mtime: u64,
        filesize: u64,
    ) {
        let name_size = name.len() as u32 + 1; // includes trailing NUL
        self.buf.extend_from_slice(MAGIC_NEWC);
        for field in [
            ino,
            mode,
            uid,
            gid,
            nlink,
            mtime as u32,
            filesize as u32,
            0, // devmajor
            0, // devminor
            0, // rdevmajor
            0, // rdevminor
            name_size,
            0, // check (unused in newc)
        ] {
            self.buf.extend_from_slice(format!("{:08x}", field).as_bytes());
        }
        self.buf.extend_from_slice(name.as_bytes());
        self.buf.push(0);
        self.pad_to_4();
    }

    fn pad_to_4(&mut self) {
        while self.buf.len() % 4 != 0 {
            self.buf.push(0);
        }
    }
}

impl Default for CpioWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Read every entry of a newc archive into memory.
pub fn read_entries<R: Read>(mut reader: R) -> io::Result<Vec<(CpioEntry, Vec<u8>)>> {
    let mut entries = Vec::new();
    loop {
        let mut header = [0u8; HEADER_SIZE];
        match reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }

        let magic = &header[0..6];
        if magic != MAGIC_NEWC && magic != MAGIC_CRC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid CPIO magic: {:?}", String::from_utf8_lossy(magic)),
            ));
        }

        let field = |index: usize| -> io::Result<u32> {
            let start = 6 + index * 8;
            let text = std::str::from_utf8(&header[start..start + 8])
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            u32::from_str_radix(text, 16)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
        };

        let ino = field(0)?;
        let mode = field(1)?;
        let uid = field(2)?;
        let gid = field(3)?;
        let nlink = field(4)?;
        let mtime = field(5)? as u64;
        let size = field(6)? as u64;
        let name_size = field(11)? as usize;

        let mut name_buf = vec![0u8; name_size];
        reader.read_exact(&mut name_buf)?;
        if name_buf.last() == Some(&0) {
            name_buf.pop();
        }
        let name = String::from_utf8_lossy(&name_buf).into_owned();

        skip_padding(&mut reader, HEADER_SIZE + name_size)?;

        if name == TRAILER {
            break;
        }

        let mut content = vec![0u8; size as usize];
        reader.read_exact(&mut content)?;
        skip_padding(&mut reader, size as usize)?;

        entries.push((
            CpioEntry {
                name,
                ino,
                mode,
                uid,
                gid,
                nlink,
                mtime,
                size,
            },
            content,
        ));
    }
    Ok(entries)
}

fn skip_padding<R: Read>(reader: &mut R, written: usize) -> io::Result<()> {
    let pad = (4 - written % 4) % 4;
    if pad > 0 {
        let mut skip = [0u8; 3];
        reader.read_exact(&mut skip[..pad])?;
    }
    Ok(())
}
