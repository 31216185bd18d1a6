// tests/pacman_format.rs

//! Unpacks packages produced by the Pacman generator (in-memory strategy)
//! and checks the archive members against the package model.

use holo_build::compression::{self, CompressionFormat};
use holo_build::generator::pacman::PacmanGenerator;
use holo_build::package::{FsMetadata, FsNode, FsRegularFile};
use holo_build::{Architecture, BuildOutcome, Generator, Package};
use std::collections::BTreeMap;
use std::io::Read;

fn sample_package() -> Package {
    let mut pkg = Package::new("hello", "2.0");
    pkg.release = 3;
    pkg.description = "A sample\n  package".to_string();
    pkg.setup_script = "echo setup\n".to_string();
    pkg.fs_root
        .insert(
            "/etc/hello.conf",
            FsNode::File(FsRegularFile {
                content: b"greeting = hello\n".to_vec(),
                metadata: FsMetadata::for_regular_file(),
            }),
        )
        .unwrap();
    pkg.fs_root
        .insert(
            "/usr/share/holo/files/01-hello/etc/motd",
            FsNode::File(FsRegularFile {
                content: b"hello\n".to_vec(),
                metadata: FsMetadata::for_regular_file(),
            }),
        )
        .unwrap();
    pkg
}

fn build(pkg: &mut Package) -> Vec<u8> {
    match PacmanGenerator.build_in_memory(pkg, true).unwrap() {
        BuildOutcome::Built(binary) => binary,
        BuildOutcome::Unsupported => panic!("in-memory build must be supported"),
    }
}

/// Unpack the .pkg.tar.xz into member name -> content. Directory members
/// map to empty content, their names keep the trailing slash.
fn unpack(binary: &[u8]) -> BTreeMap<String, Vec<u8>> {
    let tarball = compression::decompress(binary, CompressionFormat::Xz).unwrap();
    let mut archive = tar::Archive::new(tarball.as_slice());
    let mut members = BTreeMap::new();
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        let name = entry.path().unwrap().to_string_lossy().into_owned();
        let mut content = Vec::new();
        entry.read_to_end(&mut content).unwrap();
        members.insert(name, content);
    }
    members
}

fn pkginfo_of(members: &BTreeMap<String, Vec<u8>>) -> String {
    String::from_utf8(members[".PKGINFO"].clone()).unwrap()
}

#[test]
fn archive_contains_metadata_members_and_file_tree() {
    let mut pkg = sample_package();
    let members = unpack(&build(&mut pkg));

    assert!(members.contains_key(".PKGINFO"));
    assert!(members.contains_key(".INSTALL"));
    assert!(members.contains_key(".MTREE"));
    assert!(members
        .keys()
        .any(|name| name.trim_end_matches('/') == "etc"));
    assert_eq!(members["etc/hello.conf"], b"greeting = hello\n");
}

#[test]
fn pkginfo_carries_identity_and_fixed_fields() {
    let mut pkg = sample_package();
    let members = unpack(&build(&mut pkg));
    let pkginfo = pkginfo_of(&members);

    assert!(pkginfo.starts_with("# Generated by holo-build in reproducible mode\n"));
    assert!(pkginfo.contains("pkgname = hello\n"));
    assert!(pkginfo.contains("pkgver = 2.0-3\n"));
    assert!(pkginfo.contains("pkgdesc = A sample package\n"));
    assert!(pkginfo.contains("packager = Unknown Packager\n"));
    assert!(pkginfo.contains("arch = any\n"));
    assert!(pkginfo.contains("license = custom:none\n"));
    assert!(pkginfo.contains("size = 23\n"));
    assert!(pkginfo.contains("makedepend = holo-build\n"));
    assert!(pkginfo.contains("makepkgopt = !strip\n"));
    assert!(!pkginfo.contains("builddate"));
}

#[test]
fn pkgver_rewrites_dashes_and_prefixes_epoch() {
    let mut pkg = Package::new("hello", "1.2-3");
    pkg.release = 4;
    let members = unpack(&build(&mut pkg));
    assert!(pkginfo_of(&members).contains("pkgver = 1.2_3-4\n"));

    let mut pkg = Package::new("hello", "1.2-3");
    pkg.release = 4;
    pkg.epoch = 2;
    let members = unpack(&build(&mut pkg));
    assert!(pkginfo_of(&members).contains("pkgver = 2:1.2_3-4\n"));
}

#[test]
fn backup_markers_are_sorted_and_exclude_provisioned_files() {
    let mut pkg = sample_package();
    pkg.fs_root
        .insert(
            "/etc/another.conf",
            FsNode::File(FsRegularFile {
                content: b"x\n".to_vec(),
                metadata: FsMetadata::for_regular_file(),
            }),
        )
        .unwrap();
    let members = unpack(&build(&mut pkg));
    let pkginfo = pkginfo_of(&members);

    let backups: Vec<&str> = pkginfo
        .lines()
        .filter(|l| l.starts_with("backup = "))
        .collect();
    assert_eq!(
        backups,
        vec!["backup = etc/another.conf", "backup = etc/hello.conf"]
    );
}

#[test]
fn install_member_wraps_scripts_and_is_omitted_without_them() {
    let mut pkg = sample_package();
    pkg.cleanup_script = "echo cleanup\n".to_string();
    let members = unpack(&build(&mut pkg));
    let install = String::from_utf8(members[".INSTALL"].clone()).unwrap();
    assert_eq!(
        install,
        "post_install() {\necho setup\n}\npost_upgrade() {\npost_install\n}\npost_remove() {\necho cleanup\n}\n"
    );

    let mut pkg = sample_package();
    pkg.setup_script = String::new();
    let members = unpack(&build(&mut pkg));
    assert!(!members.contains_key(".INSTALL"));
}

#[test]
fn mtree_member_lists_every_other_member() {
    let mut pkg = sample_package();
    let members = unpack(&build(&mut pkg));

    let manifest =
        compression::decompress(&members[".MTREE"], CompressionFormat::Gzip).unwrap();
    let manifest = String::from_utf8(manifest).unwrap();

    assert!(manifest.starts_with("#mtree\n"));
    assert!(manifest.contains("./.PKGINFO type=file"));
    assert!(manifest.contains("./.INSTALL type=file"));
    assert!(manifest.contains("./etc type=dir uid=0 gid=0 mode=755 time=0.0"));
    assert!(manifest.contains("./etc/hello.conf type=file"));
    assert!(manifest.contains("size=17"));
    // the manifest never lists itself
    assert!(!manifest.contains("./.MTREE"));
}

#[test]
fn reproducible_builds_are_byte_identical() {
    let first = build(&mut sample_package());
    let second = build(&mut sample_package());
    assert_eq!(first, second);
}

#[test]
fn recommended_file_name_follows_pacman_convention() {
    let mut pkg = sample_package();
    assert_eq!(
        PacmanGenerator.recommended_file_name(&pkg),
        "hello-2.0-3-any.pkg.tar.xz"
    );
    pkg.architecture = Architecture::X86_64;
    pkg.epoch = 1;
    assert_eq!(
        PacmanGenerator.recommended_file_name(&pkg),
        "hello-1:2.0-3-x86_64.pkg.tar.xz"
    );
}
