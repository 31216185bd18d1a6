// src/build.rs

//! Build orchestrator
//!
//! Drives one package build end to end: validation, pre-processing of the
//! package model (Holo plugin integration, deferral of unmaterializable
//! ownership), the in-memory build attempt with a materialized-filesystem
//! fallback, and the output sink. Strictly sequential; each build owns its
//! materialized root directory exclusively.

use crate::error::{Error, Result};
use crate::generator::{BuildOutcome, Generator};
use crate::package::{FsNode, Package, PackageRelation, HOLO_PROVISION_PREFIX};
use std::collections::BTreeSet;
use std::fs;
use std::io::{self, ErrorKind, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Shell command that activates Holo provisioning at install/remove time.
const HOLO_APPLY: &str = "holo apply\n";

/// Build `pkg` with the given generator and write the result to standard
/// output or to a generator-named file in the working directory.
pub fn build_package(
    pkg: &mut Package,
    generator: &dyn Generator,
    to_stdout: bool,
    reproducible: bool,
) -> Result<()> {
    let mut problems = pkg.validate();
    problems.extend(generator.validate(pkg));
    if !problems.is_empty() {
        return Err(Error::Validation(problems));
    }

    integrate_holo_plugins(pkg);
    postpone_unmaterializable_metadata(pkg);

    let binary = match generator.build_in_memory(pkg, reproducible)? {
        BuildOutcome::Built(binary) => binary,
        BuildOutcome::Unsupported => {
            debug!("{}: falling back to materialized-root build", pkg.name);
            build_from_materialized_root(pkg, generator, reproducible)?
        }
    };

    if to_stdout {
        io::stdout()
            .write_all(&binary)
            .map_err(|e| Error::io("cannot write package to standard output", e))
    } else {
        write_output_file(pkg, generator, &binary)
    }
}

/// Packages that place files below `/usr/share/holo/<plugin>/` provision
/// configuration through Holo plugins. Such packages require the plugin
/// package and must run the activation command on install and on removal.
fn integrate_holo_plugins(pkg: &mut Package) {
    let mut plugins: BTreeSet<String> = BTreeSet::new();
    // the walk callback is infallible
    let _ = pkg.fs_root.walk(&mut |path, _| {
        if let Some(below_prefix) = path.strip_prefix(HOLO_PROVISION_PREFIX) {
            if let Some(plugin) = below_prefix.split('/').next() {
                if !plugin.is_empty() {
                    plugins.insert(plugin.to_string());
                }
            }
        }
        Ok(())
    });
    if plugins.is_empty() {
        return;
    }

    for plugin in plugins {
        let dependency = format!("holo-{}", plugin);
        if !pkg.has_requirement(&dependency) {
            debug!("{}: adding requirement on {}", pkg.name, dependency);
            pkg.requires.push(PackageRelation::new(dependency));
        }
    }

    pkg.setup_script = format!("{}{}", HOLO_APPLY, pkg.setup_script);
    pkg.cleanup_script = format!("{}{}", HOLO_APPLY, pkg.cleanup_script);
}

/// Symbolic owners/groups cannot be written into an archive at build time
/// (the builder does not resolve user databases). Strip them from the tree
/// and prepend equivalent chown/chgrp directives to the setup script, ahead
/// of any existing content so ownership is correct before other setup runs.
fn postpone_unmaterializable_metadata(pkg: &mut Package) {
    let mut ownership_script = String::new();
    let _ = pkg.fs_root.walk_mut(&mut |path, node| {
        match node {
            FsNode::Directory(dir) => {
                ownership_script.push_str(&dir.metadata.postpone_unmaterializable(path));
            }
            FsNode::File(file) => {
                ownership_script.push_str(&file.metadata.postpone_unmaterializable(path));
            }
            FsNode::Symlink(_) => {}
        }
        Ok(())
    });

    if !ownership_script.is_empty() {
        pkg.setup_script = format!("{}{}", ownership_script, pkg.setup_script);
    }
}

/// Materialize the package tree in the working directory and run the
/// generator's filesystem-rooted build against it. The directory is named
/// so the user can find and inspect it when the build fails; it is removed
/// proactively when left over from a previous run, and after success.
fn build_from_materialized_root(
    pkg: &mut Package,
    generator: &dyn Generator,
    reproducible: bool,
) -> Result<Vec<u8>> {
    let root = PathBuf::from(format!("./holo-build-{}-{}", pkg.name, pkg.version));
    remove_dir_if_exists(&root)?;

    pkg.fs_root.materialize(&root)?;
    if reproducible {
        reset_timestamps(&root)?;
    }

    // on failure the root directory is deliberately left behind
    let binary = match generator.build_from_root(pkg, &root, reproducible)? {
        BuildOutcome::Built(binary) => binary,
        BuildOutcome::Unsupported => {
            return Err(Error::Internal(
                "generator supports neither build strategy".to_string(),
            ))
        }
    };

    remove_dir_if_exists(&root)?;
    Ok(binary)
}

fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(format!("cannot remove {}", path.display()), e)),
    }
}

/// Reset every timestamp below (and including) `root` to the epoch.
fn reset_timestamps(root: &Path) -> Result<()> {
    let epoch = filetime::FileTime::zero();
    for entry in walkdir::WalkDir::new(root) {
        let entry = entry
            .map_err(|e| Error::io(format!("cannot walk {}", root.display()), e.into()))?;
        filetime::set_symlink_file_times(entry.path(), epoch, epoch).map_err(|e| {
            Error::io(
                format!("cannot reset timestamp of {}", entry.path().display()),
                e,
            )
        })?;
    }
    Ok(())
}

fn write_output_file(pkg: &Package, generator: &dyn Generator, binary: &[u8]) -> Result<()> {
    let file_name = generator.recommended_file_name(pkg);
    if file_name.contains('/') || file_name.chars().any(char::is_whitespace) {
        return Err(Error::InvalidFileName(file_name));
    }

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o666)
        .open(&file_name)
        .map_err(|e| Error::io(format!("cannot open {}", file_name), e))?;
    file.write_all(binary)
        .map_err(|e| Error::io(format!("cannot write {}", file_name), e))?;
    info!("wrote {} ({} bytes)", file_name, binary.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{EntityRef, FsMetadata, FsRegularFile};
    use std::os::unix::fs::MetadataExt;

    fn file(content: &str) -> FsNode {
        FsNode::File(FsRegularFile {
            content: content.as_bytes().to_vec(),
            metadata: FsMetadata::for_regular_file(),
        })
    }

    #[test]
    fn test_holo_integration_adds_requirement_once() {
        let mut pkg = Package::new("example", "1.0");
        pkg.setup_script = "systemctl daemon-reload\n".to_string();
        pkg.fs_root
            .insert("/usr/share/holo/files/01-example/etc/a.conf", file("a"))
            .unwrap();
        pkg.fs_root
            .insert("/usr/share/holo/files/01-example/etc/b.conf", file("b"))
            .unwrap();
        pkg.fs_root
            .insert("/usr/share/holo/ssh-keys/example/root.pub", file("k"))
            .unwrap();

        integrate_holo_plugins(&mut pkg);

        let mut requires: Vec<&str> = pkg
            .requires
            .iter()
            .map(|r| r.related_package.as_str())
            .collect();
        requires.sort();
        assert_eq!(requires, vec!["holo-files", "holo-ssh-keys"]);
        assert_eq!(
            pkg.setup_script,
            "holo apply\nsystemctl daemon-reload\n"
        );
        assert_eq!(pkg.cleanup_script, "holo apply\n");
    }

    #[test]
    fn test_holo_integration_respects_existing_requirement() {
        let mut pkg = Package::new("example", "1.0");
        pkg.requires.push(PackageRelation::new("holo-files"));
        pkg.fs_root
            .insert("/usr/share/holo/files/01-example/etc/a.conf", file("a"))
            .unwrap();

        integrate_holo_plugins(&mut pkg);
        assert_eq!(pkg.requires.len(), 1);
    }

    #[test]
    fn test_holo_integration_skips_unrelated_packages() {
        let mut pkg = Package::new("example", "1.0");
        pkg.fs_root.insert("/etc/a.conf", file("a")).unwrap();

        integrate_holo_plugins(&mut pkg);
        assert!(pkg.requires.is_empty());
        assert_eq!(pkg.setup_script, "");
    }

    #[test]
    fn test_ownership_deferral_prepends_to_setup_script() {
        let mut pkg = Package::new("example", "1.0");
        pkg.setup_script = "echo done\n".to_string();
        let mut metadata = FsMetadata::for_regular_file();
        metadata.owner = Some(EntityRef::Name("http".into()));
        pkg.fs_root
            .insert(
                "/etc/example.conf",
                FsNode::File(FsRegularFile {
                    content: b"x".to_vec(),
                    metadata,
                }),
            )
            .unwrap();

        postpone_unmaterializable_metadata(&mut pkg);

        assert_eq!(
            pkg.setup_script,
            "chown http /etc/example.conf\necho done\n"
        );
        match pkg.fs_root.lookup("/etc/example.conf") {
            Some(FsNode::File(f)) => assert_eq!(f.metadata.owner, None),
            other => panic!("unexpected node: {:?}", other),
        }
    }

    #[test]
    fn test_validation_problems_from_model_and_generator_are_merged() {
        struct RejectingGenerator;
        impl Generator for RejectingGenerator {
            fn validate(&self, _: &Package) -> Vec<String> {
                vec!["format-specific problem".to_string()]
            }
            fn build_in_memory(&self, _: &mut Package, _: bool) -> Result<BuildOutcome> {
                unreachable!("validation must abort the build")
            }
            fn build_from_root(&self, _: &mut Package, _: &Path, _: bool) -> Result<BuildOutcome> {
                unreachable!("validation must abort the build")
            }
            fn recommended_file_name(&self, _: &Package) -> String {
                String::new()
            }
        }

        let mut pkg = Package::new("example", "");
        match build_package(&mut pkg, &RejectingGenerator, true, true) {
            Err(Error::Validation(problems)) => {
                assert_eq!(problems.len(), 2);
                assert!(problems[1].contains("format-specific"));
            }
            other => panic!("unexpected outcome: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_invalid_recommended_file_name_is_fatal() {
        struct BadNameGenerator;
        impl Generator for BadNameGenerator {
            fn validate(&self, _: &Package) -> Vec<String> {
                Vec::new()
            }
            fn build_in_memory(&self, _: &mut Package, _: bool) -> Result<BuildOutcome> {
                Ok(BuildOutcome::Built(vec![1, 2, 3]))
            }
            fn build_from_root(&self, _: &mut Package, _: &Path, _: bool) -> Result<BuildOutcome> {
                Ok(BuildOutcome::Unsupported)
            }
            fn recommended_file_name(&self, _: &Package) -> String {
                "sub/dir name.pkg".to_string()
            }
        }

        let mut pkg = Package::new("example", "1.0");
        match build_package(&mut pkg, &BadNameGenerator, false, true) {
            Err(Error::InvalidFileName(name)) => assert_eq!(name, "sub/dir name.pkg"),
            other => panic!("unexpected outcome: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_materialized_root_is_removed_after_success() {
        struct RootInspectingGenerator;
        impl Generator for RootInspectingGenerator {
            fn validate(&self, _: &Package) -> Vec<String> {
                Vec::new()
            }
            fn build_in_memory(&self, _: &mut Package, _: bool) -> Result<BuildOutcome> {
                Ok(BuildOutcome::Unsupported)
            }
            fn build_from_root(
                &self,
                _: &mut Package,
                root: &Path,
                _: bool,
            ) -> Result<BuildOutcome> {
                let content = fs::read(root.join("etc/example.conf"))
                    .map_err(|e| Error::io("missing materialized file", e))?;
                Ok(BuildOutcome::Built(content))
            }
            fn recommended_file_name(&self, _: &Package) -> String {
                String::new()
            }
        }

        let mut pkg = Package::new("orchestrator-root-test", "1.0");
        pkg.fs_root.insert("/etc/example.conf", file("abc")).unwrap();

        let binary =
            build_from_materialized_root(&mut pkg, &RootInspectingGenerator, true).unwrap();
        assert_eq!(binary, b"abc");
        assert!(!Path::new("./holo-build-orchestrator-root-test-1.0").exists());
    }

    #[test]
    fn test_stale_materialized_root_is_removed_before_reuse() {
        struct StaleCheckingGenerator;
        impl Generator for StaleCheckingGenerator {
            fn validate(&self, _: &Package) -> Vec<String> {
                Vec::new()
            }
            fn build_in_memory(&self, _: &mut Package, _: bool) -> Result<BuildOutcome> {
                Ok(BuildOutcome::Unsupported)
            }
            fn build_from_root(
                &self,
                _: &mut Package,
                root: &Path,
                _: bool,
            ) -> Result<BuildOutcome> {
                assert!(
                    !root.join("stale").exists(),
                    "leftover content from a previous run survived"
                );
                assert!(root.join("etc/example.conf").exists());
                Ok(BuildOutcome::Built(b"ok".to_vec()))
            }
            fn recommended_file_name(&self, _: &Package) -> String {
                String::new()
            }
        }

        let root = Path::new("./holo-build-orchestrator-stale-test-1.0");
        fs::create_dir_all(root.join("stale")).unwrap();
        fs::write(root.join("stale/leftover"), b"old").unwrap();

        let mut pkg = Package::new("orchestrator-stale-test", "1.0");
        pkg.fs_root.insert("/etc/example.conf", file("abc")).unwrap();

        let binary =
            build_from_materialized_root(&mut pkg, &StaleCheckingGenerator, true).unwrap();
        assert_eq!(binary, b"ok");
        assert!(!root.exists());
    }

    #[test]
    fn test_reset_timestamps_zeroes_whole_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("sub");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("file"), b"x").unwrap();

        reset_timestamps(tmp.path()).unwrap();

        assert_eq!(fs::metadata(dir.join("file")).unwrap().mtime(), 0);
        assert_eq!(fs::metadata(&dir).unwrap().mtime(), 0);
    }
}
