// src/generator/rpm/lead.rs

//! The RPM lead, a fixed-size legacy header at the start of every package.
//! Modern tools only read its magic and architecture id; everything of
//! substance lives in the header section.

use crate::package::Package;

pub const LEAD_MAGIC: [u8; 4] = [0xed, 0xab, 0xee, 0xdb];
pub const LEAD_SIZE: usize = 96;

/// Package type: binary (as opposed to source).
const TYPE_BINARY: u16 = 0;
/// Target OS identifier for Linux.
const OS_LINUX: u16 = 1;
/// Signature type: header-style signature section follows the lead.
const SIGNATURE_TYPE_HEADER: u16 = 5;

pub struct Lead {
    name: String,
    arch_id: u16,
}

impl Lead {
    pub fn new(pkg: &Package) -> Self {
        Self {
            name: format!("{}-{}", pkg.name, super::full_version_string(pkg)),
            arch_id: super::arch_id(pkg.architecture),
        }
    }

    pub fn to_binary(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(LEAD_SIZE);
        out.extend_from_slice(&LEAD_MAGIC);
        out.push(3); // file format version 3.0
        out.push(0);
        out.extend_from_slice(&TYPE_BINARY.to_be_bytes());
        out.extend_from_slice(&self.arch_id.to_be_bytes());

        // name, NUL-terminated within a fixed 66-byte field
        let mut name_field = [0u8; 66];
        let bytes = self.name.as_bytes();
        let len = bytes.len().min(name_field.len() - 1);
        name_field[..len].copy_from_slice(&bytes[..len]);
        out.extend_from_slice(&name_field);

        out.extend_from_slice(&OS_LINUX.to_be_bytes());
        out.extend_from_slice(&SIGNATURE_TYPE_HEADER.to_be_bytes());
        out.extend_from_slice(&[0u8; 16]); // reserved
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::Architecture;

    #[test]
    fn test_lead_layout() {
        let mut pkg = Package::new("example", "1.0");
        pkg.architecture = Architecture::X86_64;
        let lead = Lead::new(&pkg).to_binary();

        assert_eq!(lead.len(), LEAD_SIZE);
        assert_eq!(&lead[0..4], &LEAD_MAGIC);
        assert_eq!(lead[4], 3);
        // arch id for the x86 family
        assert_eq!(u16::from_be_bytes([lead[8], lead[9]]), 1);
        // name field starts at offset 10
        assert_eq!(&lead[10..23], b"example-1.0-1");
        assert_eq!(lead[23], 0);
        // signature type at offset 78
        assert_eq!(u16::from_be_bytes([lead[78], lead[79]]), 5);
    }

    #[test]
    fn test_lead_truncates_long_names() {
        let pkg = Package::new("x".repeat(100), "1.0");
        let lead = Lead::new(&pkg).to_binary();
        assert_eq!(lead.len(), LEAD_SIZE);
        // final byte of the name field stays NUL
        assert_eq!(lead[75], 0);
    }
}
