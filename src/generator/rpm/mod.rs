// src/generator/rpm/mod.rs

//! RPM package generator
//!
//! Encodes the package model into RPM's binary container: lead, signature
//! section, header section and a CPIO-LZMA payload, with every region
//! boundary aligned to 8 bytes.
//!
//! Format references:
//! [LSB] http://refspecs.linux-foundation.org/LSB_5.0.0/LSB-Core-generic/LSB-Core-generic/pkgformat.html
//! [RPM] http://www.rpm.org/max-rpm/s1-rpm-file-format-rpm-file-format.html

mod header;
mod lead;
mod payload;

use crate::error::Result;
use crate::generator::{build_time, BuildOutcome, Generator};
use crate::package::{
    normalize_whitespace, Architecture, ConstraintRelation, FsNode, Package, PackageRelation,
    HOLO_PROVISION_PREFIX,
};
use header::Header;
use lead::Lead;
use md5::{Digest, Md5};
use payload::Payload;
use regex::Regex;
use sha1::Sha1;
use sha2::Sha256;
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

pub struct RpmGenerator;

/// Architecture strings as rpmrc spells them (`grep arch_canon
/// /usr/lib/rpm/rpmrc`).
fn arch_name(arch: Architecture) -> &'static str {
    match arch {
        Architecture::Any => "noarch",
        Architecture::I386 => "i686",
        Architecture::X86_64 => "x86_64",
        Architecture::Armv5 => "armv5tl",
        Architecture::Armv6h => "armv6hl",
        Architecture::Armv7h => "armv7hl",
        Architecture::Aarch64 => "aarch64",
    }
}

/// Numeric architecture-family ids for the lead, from the same rpmrc table.
fn arch_id(arch: Architecture) -> u16 {
    match arch {
        Architecture::Any => 0,
        Architecture::I386 | Architecture::X86_64 => 1,
        Architecture::Armv5
        | Architecture::Armv6h
        | Architecture::Armv7h
        | Architecture::Aarch64 => 12,
    }
}

/// `[epoch:]version`
fn version_string(pkg: &Package) -> String {
    if pkg.epoch > 0 {
        format!("{}:{}", pkg.epoch, pkg.version)
    } else {
        pkg.version.clone()
    }
}

/// `[epoch:]version-release`
fn full_version_string(pkg: &Package) -> String {
    format!("{}-{}", version_string(pkg), pkg.release)
}

impl Generator for RpmGenerator {
    fn validate(&self, pkg: &Package) -> Vec<String> {
        static NAME_CHARSET: OnceLock<Regex> = OnceLock::new();
        static VERSION_CHARSET: OnceLock<Regex> = OnceLock::new();
        let name_re = NAME_CHARSET
            .get_or_init(|| Regex::new(r"^[a-zA-Z0-9._+-]+$").expect("static regex"));
        let version_re = VERSION_CHARSET
            .get_or_init(|| Regex::new(r"^[a-zA-Z0-9._+~^]+$").expect("static regex"));

        let mut problems = Vec::new();
        if !name_re.is_match(&pkg.name) {
            problems.push(format!(
                "RPM package name contains invalid characters: {:?}",
                pkg.name
            ));
        }
        if pkg.version.contains('-') {
            // the dash separates version from release in RPM's NEVRA syntax
            problems.push(format!(
                "RPM package versions may not contain dashes: {:?}",
                pkg.version
            ));
        } else if !version_re.is_match(&pkg.version) {
            problems.push(format!(
                "RPM package version contains invalid characters: {:?}",
                pkg.version
            ));
        }
        problems
    }

    fn build_in_memory(&self, pkg: &mut Package, reproducible: bool) -> Result<BuildOutcome> {
        // construction order is the reverse of on-disk order: each section
        // embeds values computed from the sections that follow it
        let payload = payload::make_payload(pkg, reproducible)?;
        let header_section = make_header_section(pkg, &payload, reproducible);
        let signature_section = make_signature_section(&header_section, &payload);
        debug!(
            "assembled RPM sections for {}: payload {} bytes ({} uncompressed), header {} bytes",
            pkg.name,
            payload.binary.len(),
            payload.uncompressed_size,
            header_section.len()
        );

        let mut package = Lead::new(pkg).to_binary();
        align_to_8(&mut package);
        package.extend_from_slice(&signature_section);
        align_to_8(&mut package);
        package.extend_from_slice(&header_section);
        package.extend_from_slice(&payload.binary);
        Ok(BuildOutcome::Built(package))
    }

    fn build_from_root(
        &self,
        _pkg: &mut Package,
        _root: &Path,
        _reproducible: bool,
    ) -> Result<BuildOutcome> {
        // the in-memory strategy always succeeds for RPM
        Ok(BuildOutcome::Unsupported)
    }

    fn recommended_file_name(&self, pkg: &Package) -> String {
        format!(
            "{}-{}.{}.rpm",
            pkg.name,
            full_version_string(pkg),
            arch_name(pkg.architecture)
        )
    }
}

/// A header structure shall be aligned to an 8 byte boundary [LSB 25.2.2].
fn align_to_8(buffer: &mut Vec<u8>) {
    while buffer.len() % 8 != 0 {
        buffer.push(0);
    }
}

fn make_header_section(pkg: &Package, payload: &Payload, reproducible: bool) -> Vec<u8> {
    let mut h = Header::new();
    h.add_string_array(header::TAG_HEADER_I18N_TABLE, &["C"]);

    // package information
    h.add_string(header::TAG_NAME, &pkg.name);
    h.add_string(header::TAG_VERSION, &version_string(pkg));
    h.add_string(header::TAG_RELEASE, &pkg.release.to_string());
    h.add_i18n_string(header::TAG_SUMMARY, &normalize_whitespace(&pkg.description));
    h.add_i18n_string(header::TAG_DESCRIPTION, &pkg.description);
    h.add_int32(header::TAG_SIZE, &[pkg.installed_size() as u32]);
    h.add_string(header::TAG_LICENSE, "None");
    h.add_string(header::TAG_OS, "linux");
    h.add_string(header::TAG_ARCH, arch_name(pkg.architecture));

    // payload description
    h.add_string(header::TAG_PAYLOAD_FORMAT, "cpio");
    h.add_string(header::TAG_PAYLOAD_COMPRESSOR, "lzma");
    h.add_string(header::TAG_PAYLOAD_FLAGS, &payload::COMPRESSION_LEVEL.to_string());
    h.add_string_array(
        header::TAG_PAYLOAD_DIGEST,
        &[hex::encode(Sha256::digest(&payload.binary))],
    );
    h.add_int32(header::TAG_PAYLOAD_DIGEST_ALGO, &[header::HASH_ALGO_SHA256]);

    // lifecycle scripts
    if !pkg.setup_script.is_empty() {
        h.add_string(header::TAG_POSTIN, &pkg.setup_script);
        h.add_string(header::TAG_POSTIN_PROG, "/bin/sh");
    }
    if !pkg.cleanup_script.is_empty() {
        h.add_string(header::TAG_POSTUN, &pkg.cleanup_script);
        h.add_string(header::TAG_POSTUN_PROG, "/bin/sh");
    }

    add_file_information(&mut h, pkg, reproducible);

    add_relations(
        &mut h,
        &pkg.requires,
        header::TAG_REQUIRE_NAME,
        header::TAG_REQUIRE_VERSION,
        header::TAG_REQUIRE_FLAGS,
    );
    add_relations(
        &mut h,
        &pkg.provides,
        header::TAG_PROVIDE_NAME,
        header::TAG_PROVIDE_VERSION,
        header::TAG_PROVIDE_FLAGS,
    );
    add_relations(
        &mut h,
        &pkg.conflicts,
        header::TAG_CONFLICT_NAME,
        header::TAG_CONFLICT_VERSION,
        header::TAG_CONFLICT_FLAGS,
    );
    add_relations(
        &mut h,
        &pkg.replaces,
        header::TAG_OBSOLETE_NAME,
        header::TAG_OBSOLETE_VERSION,
        header::TAG_OBSOLETE_FLAGS,
    );

    h.to_binary(header::TAG_HEADER_IMMUTABLE)
}

/// The signature section carries digests over the concatenation of header
/// section and payload, so it is computed after both are final.
fn make_signature_section(header_section: &[u8], payload: &Payload) -> Vec<u8> {
    let mut h = Header::new();
    h.add_string(
        header::SIGTAG_SHA1,
        &hex::encode(Sha1::digest(header_section)),
    );
    h.add_int32(
        header::SIGTAG_SIZE,
        &[(header_section.len() + payload.binary.len()) as u32],
    );

    let mut md5 = Md5::new();
    md5.update(header_section);
    md5.update(&payload.binary);
    h.add_binary(header::SIGTAG_MD5, &md5.finalize());

    h.add_int32(
        header::SIGTAG_PAYLOAD_SIZE,
        &[payload.uncompressed_size as u32],
    );
    h.to_binary(header::TAG_HEADER_SIGNATURES)
}

/// Render the owner or group of a file entry. RPM stores names, not ids;
/// numeric ids other than root are written in decimal.
fn entity_string(entity: Option<u32>) -> String {
    match entity {
        None | Some(0) => "root".to_string(),
        Some(id) => id.to_string(),
    }
}

fn add_file_information(h: &mut Header, pkg: &Package, reproducible: bool) {
    let default_mtime = if reproducible { 0 } else { build_time() };

    let mut dirnames: Vec<String> = Vec::new();
    let mut dir_indexes: Vec<u32> = Vec::new();
    let mut basenames: Vec<String> = Vec::new();
    let mut sizes: Vec<u32> = Vec::new();
    let mut modes: Vec<u16> = Vec::new();
    let mut rdevs: Vec<u16> = Vec::new();
    let mut mtimes: Vec<u32> = Vec::new();
    let mut md5s: Vec<String> = Vec::new();
    let mut linktos: Vec<String> = Vec::new();
    let mut flags: Vec<u32> = Vec::new();
    let mut users: Vec<String> = Vec::new();
    let mut groups: Vec<String> = Vec::new();
    let mut devices: Vec<u32> = Vec::new();
    let mut inodes: Vec<u32> = Vec::new();
    let mut langs: Vec<String> = Vec::new();

    // the walk callback is infallible
    let _ = pkg.fs_root.walk(&mut |path, node| {
        let (dirname, basename) = match path.rfind('/') {
            Some(0) => ("/".to_string(), path[1..].to_string()),
            Some(idx) => (format!("{}/", &path[..idx]), path[idx + 1..].to_string()),
            None => unreachable!("walk always yields absolute paths"),
        };
        let dir_index = match dirnames.iter().position(|d| d == &dirname) {
            Some(idx) => idx as u32,
            None => {
                dirnames.push(dirname);
                (dirnames.len() - 1) as u32
            }
        };
        dir_indexes.push(dir_index);
        basenames.push(basename);
        inodes.push(basenames.len() as u32);
        devices.push(1);
        rdevs.push(0);
        langs.push(String::new());

        match node {
            FsNode::Directory(dir) => {
                sizes.push(4096);
                modes.push((dir.metadata.mode | payload::MODE_DIRECTORY) as u16);
                mtimes.push(dir.metadata.mtime.unwrap_or(default_mtime) as u32);
                md5s.push(String::new());
                linktos.push(String::new());
                flags.push(0);
                users.push(entity_string(dir.metadata.owner.as_ref().and_then(|o| o.id())));
                groups.push(entity_string(dir.metadata.group.as_ref().and_then(|g| g.id())));
            }
            FsNode::File(file) => {
                sizes.push(file.content.len() as u32);
                modes.push((file.metadata.mode | payload::MODE_REGULAR) as u16);
                mtimes.push(file.metadata.mtime.unwrap_or(default_mtime) as u32);
                md5s.push(hex::encode(Md5::digest(&file.content)));
                linktos.push(String::new());
                // files outside the provisioning namespace are configuration
                // owned by the user; pacman's counterpart is the backup list
                if path.starts_with(HOLO_PROVISION_PREFIX) {
                    flags.push(0);
                } else {
                    flags.push(header::FILEFLAG_CONFIG | header::FILEFLAG_NOREPLACE);
                }
                users.push(entity_string(file.metadata.owner.as_ref().and_then(|o| o.id())));
                groups.push(entity_string(file.metadata.group.as_ref().and_then(|g| g.id())));
            }
            FsNode::Symlink(link) => {
                sizes.push(link.target.len() as u32);
                modes.push((0o777 | payload::MODE_SYMLINK) as u16);
                mtimes.push(default_mtime as u32);
                md5s.push(String::new());
                linktos.push(link.target.clone());
                flags.push(0);
                users.push("root".to_string());
                groups.push("root".to_string());
            }
        }
        Ok(())
    });

    if basenames.is_empty() {
        return;
    }

    h.add_int32(header::TAG_FILE_SIZES, &sizes);
    h.add_int16(header::TAG_FILE_MODES, &modes);
    h.add_int16(header::TAG_FILE_RDEVS, &rdevs);
    h.add_int32(header::TAG_FILE_MTIMES, &mtimes);
    h.add_string_array(header::TAG_FILE_MD5S, &md5s);
    h.add_string_array(header::TAG_FILE_LINKTOS, &linktos);
    h.add_int32(header::TAG_FILE_FLAGS, &flags);
    h.add_string_array(header::TAG_FILE_USERNAME, &users);
    h.add_string_array(header::TAG_FILE_GROUPNAME, &groups);
    h.add_int32(header::TAG_FILE_DEVICES, &devices);
    h.add_int32(header::TAG_FILE_INODES, &inodes);
    h.add_string_array(header::TAG_FILE_LANGS, &langs);
    h.add_int32(header::TAG_DIR_INDEXES, &dir_indexes);
    h.add_string_array(header::TAG_BASENAMES, &basenames);
    h.add_string_array(header::TAG_DIRNAMES, &dirnames);
}

fn add_relations(
    h: &mut Header,
    relations: &[PackageRelation],
    name_tag: u32,
    version_tag: u32,
    flags_tag: u32,
) {
    if relations.is_empty() {
        return;
    }

    let mut names = Vec::with_capacity(relations.len());
    let mut versions = Vec::with_capacity(relations.len());
    let mut flags = Vec::with_capacity(relations.len());
    for relation in relations {
        names.push(relation.related_package.clone());
        match &relation.constraint {
            Some(constraint) => {
                versions.push(constraint.version.clone());
                flags.push(match constraint.relation {
                    ConstraintRelation::Equal => header::DEPFLAG_EQUAL,
                    ConstraintRelation::GreaterOrEqual => {
                        header::DEPFLAG_GREATER | header::DEPFLAG_EQUAL
                    }
                    ConstraintRelation::LessOrEqual => header::DEPFLAG_LESS | header::DEPFLAG_EQUAL,
                    ConstraintRelation::Greater => header::DEPFLAG_GREATER,
                    ConstraintRelation::Less => header::DEPFLAG_LESS,
                });
            }
            None => {
                versions.push(String::new());
                flags.push(0);
            }
        }
    }
    h.add_string_array(name_tag, &names);
    h.add_string_array(version_tag, &versions);
    h.add_int32(flags_tag, &flags);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recommended_file_name() {
        let mut pkg = Package::new("example", "1.0");
        pkg.release = 3;
        assert_eq!(
            RpmGenerator.recommended_file_name(&pkg),
            "example-1.0-3.noarch.rpm"
        );

        pkg.epoch = 2;
        pkg.architecture = Architecture::Aarch64;
        assert_eq!(
            RpmGenerator.recommended_file_name(&pkg),
            "example-2:1.0-3.aarch64.rpm"
        );
    }

    #[test]
    fn test_validate_rejects_dashes_in_version() {
        let pkg = Package::new("example", "1.0-beta");
        let problems = RpmGenerator.validate(&pkg);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("dashes"));
    }

    #[test]
    fn test_validate_accepts_tilde_versions() {
        let pkg = Package::new("example", "1.0~rc1");
        assert!(RpmGenerator.validate(&pkg).is_empty());
    }

    #[test]
    fn test_validate_rejects_names_with_odd_characters() {
        let pkg = Package::new("bad$name", "1.0");
        let problems = RpmGenerator.validate(&pkg);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("name"));

        let pkg = Package::new("ok-name+variant.2", "1.0");
        assert!(RpmGenerator.validate(&pkg).is_empty());
    }

    #[test]
    fn test_entity_string_defaults_to_root() {
        assert_eq!(entity_string(None), "root");
        assert_eq!(entity_string(Some(0)), "root");
        assert_eq!(entity_string(Some(42)), "42");
    }
}
