// src/generator/rpm/header.rs

//! RPM "header structure" binary encoding
//!
//! Both the header section and the signature section of an RPM package use
//! the same tag-directory layout [LSB 25.2.2]: an 8-byte magic/version
//! preamble, an index of 16-byte entries (tag, type, offset, count, all
//! big-endian), and a typed data store. The first index entry is a region
//! tag whose data is a 16-byte trailer at the end of the store pointing back
//! at the index.

/// Value types of the header store.
const TYPE_INT16: u32 = 3;
const TYPE_INT32: u32 = 4;
const TYPE_STRING: u32 = 6;
const TYPE_BIN: u32 = 7;
const TYPE_STRING_ARRAY: u32 = 8;
const TYPE_I18N_STRING: u32 = 9;

// region tags
pub const TAG_HEADER_SIGNATURES: u32 = 62;
pub const TAG_HEADER_IMMUTABLE: u32 = 63;
pub const TAG_HEADER_I18N_TABLE: u32 = 100;

// signature section tags
pub const SIGTAG_SHA1: u32 = 269;
pub const SIGTAG_SIZE: u32 = 1000;
pub const SIGTAG_MD5: u32 = 1004;
pub const SIGTAG_PAYLOAD_SIZE: u32 = 1007;

// package information tags
pub const TAG_NAME: u32 = 1000;
pub const TAG_VERSION: u32 = 1001;
pub const TAG_RELEASE: u32 = 1002;
pub const TAG_SUMMARY: u32 = 1004;
pub const TAG_DESCRIPTION: u32 = 1005;
pub const TAG_SIZE: u32 = 1009;
pub const TAG_LICENSE: u32 = 1014;
pub const TAG_OS: u32 = 1021;
pub const TAG_ARCH: u32 = 1022;

// installation script tags
pub const TAG_POSTIN: u32 = 1024;
pub const TAG_POSTUN: u32 = 1026;
pub const TAG_POSTIN_PROG: u32 = 1086;
pub const TAG_POSTUN_PROG: u32 = 1088;

// file manifest tags
pub const TAG_FILE_SIZES: u32 = 1028;
pub const TAG_FILE_MODES: u32 = 1030;
pub const TAG_FILE_RDEVS: u32 = 1033;
pub const TAG_FILE_MTIMES: u32 = 1034;
pub const TAG_FILE_MD5S: u32 = 1035;
pub const TAG_FILE_LINKTOS: u32 = 1036;
pub const TAG_FILE_FLAGS: u32 = 1037;
pub const TAG_FILE_USERNAME: u32 = 1039;
pub const TAG_FILE_GROUPNAME: u32 = 1040;
pub const TAG_FILE_DEVICES: u32 = 1095;
pub const TAG_FILE_INODES: u32 = 1096;
pub const TAG_FILE_LANGS: u32 = 1097;
pub const TAG_DIR_INDEXES: u32 = 1116;
pub const TAG_BASENAMES: u32 = 1117;
pub const TAG_DIRNAMES: u32 = 1118;

// dependency tags
pub const TAG_PROVIDE_NAME: u32 = 1047;
pub const TAG_REQUIRE_FLAGS: u32 = 1048;
pub const TAG_REQUIRE_NAME: u32 = 1049;
pub const TAG_REQUIRE_VERSION: u32 = 1050;
pub const TAG_CONFLICT_FLAGS: u32 = 1053;
pub const TAG_CONFLICT_NAME: u32 = 1054;
pub const TAG_CONFLICT_VERSION: u32 = 1055;
pub const TAG_OBSOLETE_NAME: u32 = 1090;
pub const TAG_PROVIDE_FLAGS: u32 = 1112;
pub const TAG_PROVIDE_VERSION: u32 = 1113;
pub const TAG_OBSOLETE_FLAGS: u32 = 1114;
pub const TAG_OBSOLETE_VERSION: u32 = 1115;

// payload description tags
pub const TAG_PAYLOAD_FORMAT: u32 = 1124;
pub const TAG_PAYLOAD_COMPRESSOR: u32 = 1125;
pub const TAG_PAYLOAD_FLAGS: u32 = 1126;
pub const TAG_PAYLOAD_DIGEST: u32 = 5092;
pub const TAG_PAYLOAD_DIGEST_ALGO: u32 = 5093;

/// Dependency flag bits (RPMSENSE_*).
pub const DEPFLAG_LESS: u32 = 0x02;
pub const DEPFLAG_GREATER: u32 = 0x04;
pub const DEPFLAG_EQUAL: u32 = 0x08;

/// File flag bits (RPMFILE_*).
pub const FILEFLAG_CONFIG: u32 = 1 << 0;
pub const FILEFLAG_NOREPLACE: u32 = 1 << 4;

/// PGPHASHALGO_SHA256, the value of TAG_PAYLOAD_DIGEST_ALGO.
pub const HASH_ALGO_SHA256: u32 = 8;

struct Record {
    tag: u32,
    value_type: u32,
    count: u32,
    data: Vec<u8>,
    alignment: usize,
}

/// An RPM header structure under construction. Records are written out in
/// insertion order.
pub struct Header {
    records: Vec<Record>,
}

impl Header {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn add_int16(&mut self, tag: u32, values: &[u16]) {
        let mut data = Vec::with_capacity(values.len() * 2);
        for value in values {
            data.extend_from_slice(&value.to_be_bytes());
        }
        self.records.push(Record {
            tag,
            value_type: TYPE_INT16,
            count: values.len() as u32,
            data,
            alignment: 2,
        });
    }

    pub fn add_int32(&mut self, tag: u32, values: &[u32]) {
        let mut data = Vec::with_capacity(values.len() * 4);
        for value in values {
            data.extend_from_slice(&value.to_be_bytes());
        }
        self.records.push(Record {
            tag,
            value_type: TYPE_INT32,
            count: values.len() as u32,
            data,
            alignment: 4,
        });
    }

    pub fn add_string(&mut self, tag: u32, value: &str) {
        self.records.push(Record {
            tag,
            value_type: TYPE_STRING,
            count: 1,
            data: nul_terminated(value),
            alignment: 1,
        });
    }

    /// A translated string with only the invariant "C" locale, which must be
    /// listed in [`TAG_HEADER_I18N_TABLE`].
    pub fn add_i18n_string(&mut self, tag: u32, value: &str) {
        self.records.push(Record {
            tag,
            value_type: TYPE_I18N_STRING,
            count: 1,
            data: nul_terminated(value),
            alignment: 1,
        });
    }

    pub fn add_string_array<S: AsRef<str>>(&mut self, tag: u32, values: &[S]) {
        let mut data = Vec::new();
        for value in values {
            data.extend_from_slice(&nul_terminated(value.as_ref()));
        }
        self.records.push(Record {
            tag,
            value_type: TYPE_STRING_ARRAY,
            count: values.len() as u32,
            data,
            alignment: 1,
        });
    }

    pub fn add_binary(&mut self, tag: u32, value: &[u8]) {
        self.records.push(Record {
            tag,
            value_type: TYPE_BIN,
            count: value.len() as u32,
            data: value.to_vec(),
            alignment: 1,
        });
    }

    /// Serialize into the on-disk layout, wrapped in the given region tag
    /// (`TAG_HEADER_IMMUTABLE` or `TAG_HEADER_SIGNATURES`).
    pub fn to_binary(&self, region_tag: u32) -> Vec<u8> {
        let mut store: Vec<u8> = Vec::new();
        let mut index: Vec<(u32, u32, u32, u32)> = Vec::new();

        for record in &self.records {
            while store.len() % record.alignment != 0 {
                store.push(0);
            }
            index.push((
                record.tag,
                record.value_type,
                store.len() as u32,
                record.count,
            ));
            store.extend_from_slice(&record.data);
        }

        // region trailer: an index entry stored in the data area whose
        // offset points back across the whole index
        let entry_count = self.records.len() as u32 + 1;
        let trailer_offset = store.len() as u32;
        store.extend_from_slice(&region_tag.to_be_bytes());
        store.extend_from_slice(&TYPE_BIN.to_be_bytes());
        store.extend_from_slice(&(-(16 * entry_count as i32)).to_be_bytes());
        store.extend_from_slice(&16u32.to_be_bytes());

        let mut out = Vec::with_capacity(16 + 16 * entry_count as usize + store.len());
        out.extend_from_slice(&[0x8e, 0xad, 0xe8, 0x01, 0x00, 0x00, 0x00, 0x00]);
        out.extend_from_slice(&entry_count.to_be_bytes());
        out.extend_from_slice(&(store.len() as u32).to_be_bytes());

        write_index_entry(&mut out, region_tag, TYPE_BIN, trailer_offset, 16);
        for (tag, value_type, offset, count) in index {
            write_index_entry(&mut out, tag, value_type, offset, count);
        }
        out.extend_from_slice(&store);
        out
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}

fn write_index_entry(out: &mut Vec<u8>, tag: u32, value_type: u32, offset: u32, count: u32) {
    out.extend_from_slice(&tag.to_be_bytes());
    out.extend_from_slice(&value_type.to_be_bytes());
    out.extend_from_slice(&offset.to_be_bytes());
    out.extend_from_slice(&count.to_be_bytes());
}

fn nul_terminated(value: &str) -> Vec<u8> {
    let mut data = Vec::with_capacity(value.len() + 1);
    data.extend_from_slice(value.as_bytes());
    data.push(0);
    data
}
