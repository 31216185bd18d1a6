// src/generator/pacman/mod.rs

//! Pacman package generator
//!
//! A pacman package is an xz-compressed tar archive of the file tree with
//! three metadata members at its root: `.PKGINFO` (plain-text key/value
//! metadata), an optional `.INSTALL` (lifecycle hooks) and `.MTREE` (a
//! compressed manifest, see [`mtree`]).
//!
//! The canonical strategy builds everything in memory: the metadata files
//! are injected into the package's tree and the whole tree is encoded with
//! the tar crate. The filesystem-rooted strategy writes the same metadata
//! onto a materialized directory and delegates manifest and archive
//! creation to bsdtar, which is the route to take when metadata only a real
//! filesystem can show (hard links, privileged ownership under fakeroot)
//! matters.

mod mtree;

use crate::compression::{self, CompressionFormat};
use crate::error::{Error, Result};
use crate::generator::{build_time, BuildOutcome, Generator};
use crate::package::{
    normalize_whitespace, Architecture, FsDirectory, FsMetadata, FsNode, FsRegularFile, Package,
    PackageRelation, HOLO_PROVISION_PREFIX,
};
use regex::Regex;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;
use tracing::debug;

const XZ_LEVEL: u32 = 6;

/// makepkg options describing this tool's fixed behavior, recorded in
/// `.PKGINFO` the way makepkg records its own.
const MAKEPKG_OPTIONS: &[&str] = &[
    "!strip",
    "docs",
    "libtool",
    "staticlibs",
    "emptydirs",
    "!zipman",
    "!purge",
    "!upx",
    "!debug",
];

pub struct PacmanGenerator;

/// Architecture strings as pacman.conf spells them.
fn arch_name(arch: Architecture) -> &'static str {
    match arch {
        Architecture::Any => "any",
        Architecture::I386 => "i686",
        Architecture::X86_64 => "x86_64",
        Architecture::Armv5 => "arm",
        Architecture::Armv6h => "armv6h",
        Architecture::Armv7h => "armv7h",
        Architecture::Aarch64 => "aarch64",
    }
}

/// `[epoch:]version-release`, with dashes in the version replaced by
/// underscores since pacman reserves the dash for the release separator.
fn full_version_string(pkg: &Package) -> String {
    let version = format!("{}-{}", pkg.version.replace('-', "_"), pkg.release);
    if pkg.epoch > 0 {
        format!("{}:{}", pkg.epoch, version)
    } else {
        version
    }
}

impl Generator for PacmanGenerator {
    fn validate(&self, pkg: &Package) -> Vec<String> {
        static NAME_CHARSET: OnceLock<Regex> = OnceLock::new();
        static VERSION_CHARSET: OnceLock<Regex> = OnceLock::new();
        let name_re = NAME_CHARSET
            .get_or_init(|| Regex::new(r"^[a-z0-9@._+][a-z0-9@._+-]*$").expect("static regex"));
        let version_re = VERSION_CHARSET
            .get_or_init(|| Regex::new(r"^[a-zA-Z0-9_.+-]+$").expect("static regex"));

        let mut problems = Vec::new();
        if !name_re.is_match(&pkg.name) {
            problems.push(format!(
                "pacman package name contains invalid characters: {:?}",
                pkg.name
            ));
        }
        if !version_re.is_match(&pkg.version) {
            problems.push(format!(
                "pacman package version contains invalid characters: {:?}",
                pkg.version
            ));
        }
        problems
    }

    fn build_in_memory(&self, pkg: &mut Package, reproducible: bool) -> Result<BuildOutcome> {
        let default_mtime = if reproducible { 0 } else { build_time() };

        // metadata derived from the tree (size, backup markers) must be
        // computed before the synthetic members are injected
        let pkginfo = make_pkginfo(pkg, reproducible, None);
        inject_metadata_file(&mut pkg.fs_root, "/.PKGINFO", pkginfo.into_bytes())?;
        if let Some(install) = make_install(pkg) {
            inject_metadata_file(&mut pkg.fs_root, "/.INSTALL", install.into_bytes())?;
        }
        let manifest = mtree::make_mtree(&pkg.fs_root, default_mtime)?;
        inject_metadata_file(&mut pkg.fs_root, "/.MTREE", manifest)?;

        let archive = make_tar(&pkg.fs_root, default_mtime)?;
        debug!(
            "assembled pacman archive for {}: {} bytes uncompressed",
            pkg.name,
            archive.len()
        );
        let binary = compression::compress(&archive, CompressionFormat::Xz, XZ_LEVEL)?;
        Ok(BuildOutcome::Built(binary))
    }

    fn build_from_root(
        &self,
        pkg: &mut Package,
        root: &Path,
        reproducible: bool,
    ) -> Result<BuildOutcome> {
        // tool versions are wall-clock-adjacent provenance, omitted from
        // reproducible output
        let archiver_banner = if reproducible {
            None
        } else {
            Some(fakeroot_version()?)
        };

        let pkginfo = make_pkginfo(pkg, reproducible, archiver_banner.as_deref());
        write_metadata_file(&root.join(".PKGINFO"), pkginfo.as_bytes(), reproducible)?;
        if let Some(install) = make_install(pkg) {
            write_metadata_file(&root.join(".INSTALL"), install.as_bytes(), reproducible)?;
        }
        write_mtree_via_bsdtar(root, reproducible)?;

        let archive = run_bsdtar(
            root,
            &["-cJf", "-", "--strip-components", "1", "."],
        )?;
        Ok(BuildOutcome::Built(archive))
    }

    fn recommended_file_name(&self, pkg: &Package) -> String {
        format!(
            "{}-{}-{}.pkg.tar.xz",
            pkg.name,
            full_version_string(pkg),
            arch_name(pkg.architecture)
        )
    }
}

fn make_pkginfo(pkg: &Package, reproducible: bool, archiver_banner: Option<&str>) -> String {
    let mut contents = String::new();
    if reproducible {
        contents.push_str("# Generated by holo-build in reproducible mode\n");
    } else {
        let _ = writeln!(contents, "# Generated by holo-build {}", crate::VERSION);
        if let Some(banner) = archiver_banner {
            let _ = writeln!(contents, "# using {}", banner);
        }
    }

    let _ = writeln!(contents, "pkgname = {}", pkg.name);
    let _ = writeln!(contents, "pkgver = {}", full_version_string(pkg));
    let _ = writeln!(contents, "pkgdesc = {}", normalize_whitespace(&pkg.description));
    contents.push_str("url = \n");
    if !reproducible {
        let _ = writeln!(contents, "builddate = {}", build_time());
    }
    match &pkg.author {
        Some(author) if !author.is_empty() => {
            let _ = writeln!(contents, "packager = {}", author);
        }
        _ => contents.push_str("packager = Unknown Packager\n"),
    }
    let _ = writeln!(contents, "size = {}", pkg.installed_size());
    let _ = writeln!(contents, "arch = {}", arch_name(pkg.architecture));
    contents.push_str("license = custom:none\n");

    contents.push_str(&compile_relations("replaces", &pkg.replaces));
    contents.push_str(&compile_relations("conflict", &pkg.conflicts));
    contents.push_str(&compile_relations("provides", &pkg.provides));
    contents.push_str(&compile_backup_markers(pkg));
    contents.push_str(&compile_relations("depend", &pkg.requires));

    contents.push_str("makedepend = holo-build\n");
    for option in MAKEPKG_OPTIONS {
        let _ = writeln!(contents, "makepkgopt = {}", option);
    }
    contents
}

/// One `key = name[op]version` line per relation, in encounter order.
fn compile_relations(key: &str, relations: &[PackageRelation]) -> String {
    let mut lines = String::new();
    for relation in relations {
        match &relation.constraint {
            Some(constraint) => {
                let _ = writeln!(
                    lines,
                    "{} = {}{}{}",
                    key,
                    relation.related_package,
                    constraint.relation.as_str(),
                    constraint.version
                );
            }
            None => {
                let _ = writeln!(lines, "{} = {}", key, relation.related_package);
            }
        }
    }
    lines
}

/// Every regular file outside the provisioning namespace is configuration
/// that pacman must preserve across upgrades. Sorted for determinism.
fn compile_backup_markers(pkg: &Package) -> String {
    let mut lines: Vec<String> = Vec::new();
    let _ = pkg.fs_root.walk(&mut |path, node| {
        if matches!(node, FsNode::File(_)) && !path.starts_with(HOLO_PROVISION_PREFIX) {
            lines.push(format!("backup = {}\n", path.trim_start_matches('/')));
        }
        Ok(())
    });
    lines.sort();
    lines.concat()
}

/// The `.INSTALL` hook script, or `None` when the package has no scripts.
/// Upgrades re-run the install hook; there is no separate upgrade script in
/// the model.
fn make_install(pkg: &Package) -> Option<String> {
    let mut contents = String::new();
    let setup = pkg.setup_script.trim();
    if !setup.is_empty() {
        let _ = write!(
            contents,
            "post_install() {{\n{}\n}}\npost_upgrade() {{\npost_install\n}}\n",
            setup
        );
    }
    let cleanup = pkg.cleanup_script.trim();
    if !cleanup.is_empty() {
        let _ = write!(contents, "post_remove() {{\n{}\n}}\n", cleanup);
    }
    if contents.is_empty() {
        None
    } else {
        Some(contents)
    }
}

fn inject_metadata_file(root: &mut FsDirectory, path: &str, content: Vec<u8>) -> Result<()> {
    root.insert(
        path,
        FsNode::File(FsRegularFile {
            content,
            metadata: FsMetadata::for_regular_file(),
        }),
    )
}

/// Encode the tree as an uncompressed tar archive with root-relative member
/// names. Dot-named metadata members sort before regular tree content, which
/// matches the member order makepkg produces.
fn make_tar(root: &FsDirectory, default_mtime: u64) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    root.walk(&mut |path, node| {
        let name = path.trim_start_matches('/');
        let archive_error = |e| Error::io(format!("cannot archive {}", path), e);
        match node {
            FsNode::Directory(dir) => {
                let mut header = tar::Header::new_ustar();
                header.set_entry_type(tar::EntryType::Directory);
                header.set_size(0);
                header.set_mode(dir.metadata.mode);
                header.set_uid(dir.metadata.uid() as u64);
                header.set_gid(dir.metadata.gid() as u64);
                header.set_mtime(dir.metadata.mtime.unwrap_or(default_mtime));
                builder
                    .append_data(&mut header, format!("{}/", name), io::empty())
                    .map_err(archive_error)?;
            }
            FsNode::File(file) => {
                let mut header = tar::Header::new_ustar();
                header.set_entry_type(tar::EntryType::Regular);
                header.set_size(file.content.len() as u64);
                header.set_mode(file.metadata.mode);
                header.set_uid(file.metadata.uid() as u64);
                header.set_gid(file.metadata.gid() as u64);
                header.set_mtime(file.metadata.mtime.unwrap_or(default_mtime));
                builder
                    .append_data(&mut header, name, file.content.as_slice())
                    .map_err(archive_error)?;
            }
            FsNode::Symlink(link) => {
                let mut header = tar::Header::new_ustar();
                header.set_entry_type(tar::EntryType::Symlink);
                header.set_size(0);
                header.set_mode(0o777);
                header.set_uid(0);
                header.set_gid(0);
                header.set_mtime(default_mtime);
                builder
                    .append_link(&mut header, name, &link.target)
                    .map_err(archive_error)?;
            }
        }
        Ok(())
    })?;
    builder
        .into_inner()
        .map_err(|e| Error::io("cannot finalize package archive", e))
}

fn write_metadata_file(path: &Path, content: &[u8], reproducible: bool) -> Result<()> {
    fs::write(path, content)
        .map_err(|e| Error::io(format!("cannot write {}", path.display()), e))?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o644))
        .map_err(|e| Error::io(format!("cannot chmod {}", path.display()), e))?;
    if reproducible {
        reset_timestamp(path)?;
    }
    Ok(())
}

fn reset_timestamp(path: &Path) -> Result<()> {
    let epoch = filetime::FileTime::zero();
    filetime::set_symlink_file_times(path, epoch, epoch)
        .map_err(|e| Error::io(format!("cannot reset timestamp of {}", path.display()), e))
}

/// Generate `.MTREE` inside the root directory with bsdtar, listing every
/// top-level entry (the manifest never includes itself).
fn write_mtree_via_bsdtar(root: &Path, reproducible: bool) -> Result<()> {
    let mut targets = Vec::new();
    let entries = fs::read_dir(root)
        .map_err(|e| Error::io(format!("cannot list {}", root.display()), e))?;
    for entry in entries {
        let entry =
            entry.map_err(|e| Error::io(format!("cannot list {}", root.display()), e))?;
        targets.push(format!("./{}", entry.file_name().to_string_lossy()));
    }
    targets.sort();

    let mut args = vec![
        "-czf",
        ".MTREE",
        "--format=mtree",
        "--options=!all,use-set,type,uid,gid,mode,time,size,md5,sha256,link",
    ];
    args.extend(targets.iter().map(String::as_str));
    run_bsdtar(root, &args)?;

    let mtree_path = root.join(".MTREE");
    fs::set_permissions(&mtree_path, fs::Permissions::from_mode(0o644))
        .map_err(|e| Error::io(format!("cannot chmod {}", mtree_path.display()), e))?;
    if reproducible {
        reset_timestamp(&mtree_path)?;
    }
    Ok(())
}

/// Run bsdtar in the given directory with standardized language settings
/// and return its standard output.
fn run_bsdtar(root: &Path, args: &[&str]) -> Result<Vec<u8>> {
    let output = Command::new("bsdtar")
        .args(args)
        .env("LANG", "C")
        .current_dir(root)
        .output()
        .map_err(|e| Error::Subprocess {
            command: "bsdtar".to_string(),
            detail: e.to_string(),
        })?;
    if !output.status.success() {
        return Err(Error::Subprocess {
            command: format!("bsdtar {}", args.join(" ")),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output.stdout)
}

fn fakeroot_version() -> Result<String> {
    let output = Command::new("fakeroot")
        .arg("--version")
        .output()
        .map_err(|e| Error::Subprocess {
            command: "fakeroot --version".to_string(),
            detail: e.to_string(),
        })?;
    if !output.status.success() {
        return Err(Error::Subprocess {
            command: "fakeroot --version".to_string(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
