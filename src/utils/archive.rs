//! tar.gz creation and extraction with glob exclusions.
//!
//! Paths are matched relative to the archive root with `glob_match`, so
//! `vendor` prunes only the top-level directory while `**/*.log` prunes at any
//! depth. Symlinks are stored as links, never followed.

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveStats {
    /// Regular files and symlinks written.
    pub file_count: u64,
    /// Compressed archive size in bytes.
    pub archive_size: u64,
    /// Hex SHA-256 of the compressed archive.
    pub sha256: String,
}

pub fn is_excluded(rel: &str, excludes: &[String]) -> bool {
    excludes
        .iter()
        .any(|pattern| glob_match::glob_match(pattern, rel))
}

fn rel_str(root: &Path, path: &Path) -> Option<String> {
    path.strip_prefix(root)
        .ok()
        .map(|p| p.to_string_lossy().replace('\\', "/"))
}

fn io_err(context: &str) -> impl Fn(std::io::Error) -> Error + '_ {
    move |e| Error::internal_io(e.to_string(), Some(context.to_string()))
}

/// Archive `root` into `dest`. A partially written `dest` is removed on failure.
pub fn create_tar_gz(root: &Path, dest: &Path, excludes: &[String]) -> Result<ArchiveStats> {
    match write_tar_gz(root, dest, excludes) {
        Ok(count) => {
            let archive_size = fs::metadata(dest)
                .map_err(io_err("stat archive"))?
                .len();
            Ok(ArchiveStats {
                file_count: count,
                archive_size,
                sha256: file_sha256(dest)?,
            })
        }
        Err(err) => {
            let _ = fs::remove_file(dest);
            Err(err)
        }
    }
}

fn write_tar_gz(root: &Path, dest: &Path, excludes: &[String]) -> Result<u64> {
    if !root.is_dir() {
        return Err(Error::internal_io(
            format!("{} is not a directory", root.display()),
            Some("create archive".to_string()),
        ));
    }

    let file = File::create(dest).map_err(io_err("create archive"))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.follow_symlinks(false);

    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.path() != dest
                && rel_str(root, entry.path()).is_some_and(|rel| !is_excluded(&rel, excludes))
        });

    let mut count = 0u64;
    for entry in walker {
        let entry = entry.map_err(|e| {
            Error::internal_io(e.to_string(), Some("walk application tree".to_string()))
        })?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| Error::internal_unexpected(e.to_string()))?;

        if entry.file_type().is_dir() {
            builder
                .append_dir(rel, entry.path())
                .map_err(io_err("append directory"))?;
        } else {
            builder
                .append_path_with_name(entry.path(), rel)
                .map_err(io_err("append file"))?;
            count += 1;
        }
    }

    let encoder = builder.into_inner().map_err(io_err("finish tar stream"))?;
    let file = encoder.finish().map_err(io_err("finish gzip stream"))?;
    file.sync_all().map_err(io_err("sync archive"))?;
    Ok(count)
}

/// Extract `archive` into `dest`, overwriting existing entries.
pub fn extract_tar_gz(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive).map_err(io_err("open archive"))?;
    let mut tar = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    tar.set_preserve_permissions(true);
    tar.set_preserve_mtime(true);
    tar.set_overwrite(true);
    fs::create_dir_all(dest).map_err(io_err("create extraction root"))?;
    tar.unpack(dest).map_err(io_err("extract archive"))
}

/// Delete everything under `root` except excluded paths. `root` itself stays.
pub fn clear_tree(root: &Path, excludes: &[String]) -> Result<()> {
    clear_dir(root, root, excludes).map(|_| ())
}

/// Returns true when `dir` ended up empty.
fn clear_dir(root: &Path, dir: &Path, excludes: &[String]) -> Result<bool> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(Error::internal_io(e.to_string(), Some(format!("read {}", dir.display())))),
    };

    let mut empty = true;
    for entry in entries {
        let entry = entry.map_err(io_err("read directory entry"))?;
        let path = entry.path();
        let rel = rel_str(root, &path).unwrap_or_default();
        if is_excluded(&rel, excludes) {
            empty = false;
            continue;
        }

        let file_type = entry.file_type().map_err(io_err("stat entry"))?;
        if file_type.is_dir() {
            if clear_dir(root, &path, excludes)? {
                fs::remove_dir(&path).map_err(io_err("remove directory"))?;
            } else {
                empty = false;
            }
        } else {
            fs::remove_file(&path).map_err(io_err("remove file"))?;
        }
    }
    Ok(empty)
}

/// Copy `src` into `dest` (created if missing), recreating symlinks as links.
/// Existing entries in `dest` are replaced, including a file where the source
/// now has a directory and the reverse. Returns the number of files and links
/// copied.
pub fn copy_tree(src: &Path, dest: &Path, excludes: &[String]) -> Result<u64> {
    fs::create_dir_all(dest).map_err(io_err("create copy destination"))?;

    let walker = WalkDir::new(src)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            rel_str(src, entry.path()).is_some_and(|rel| !is_excluded(&rel, excludes))
        });

    let mut count = 0u64;
    for entry in walker {
        let entry = entry
            .map_err(|e| Error::internal_io(e.to_string(), Some("walk source tree".to_string())))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| Error::internal_unexpected(e.to_string()))?;
        let target = dest.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            clear_target(&target, true)?;
            fs::create_dir_all(&target).map_err(io_err("create directory"))?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path()).map_err(io_err("read link"))?;
            clear_target(&target, false)?;
            std::os::unix::fs::symlink(&link, &target).map_err(io_err("create link"))?;
            count += 1;
        } else {
            clear_target(&target, false)?;
            fs::copy(entry.path(), &target).map_err(io_err("copy file"))?;
            count += 1;
        }
    }
    Ok(count)
}

/// Make room for a copied entry. A real directory is kept when a directory
/// is wanted; anything else at `target` is removed. Links are removed, never
/// followed.
fn clear_target(target: &Path, want_dir: bool) -> Result<()> {
    let meta = match fs::symlink_metadata(target) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(Error::internal_io(e.to_string(), Some(format!("stat {}", target.display())))),
    };
    if meta.is_dir() {
        if !want_dir {
            fs::remove_dir_all(target).map_err(io_err("replace directory"))?;
        }
    } else {
        fs::remove_file(target).map_err(io_err("replace file"))?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub copied: u64,
    pub removed: u64,
}

/// Make `dest` mirror `src`: copy with [`copy_tree`], then delete entries of
/// `dest` that no longer exist in `src`. Paths matching `excludes` or `keep`
/// are never deleted.
pub fn sync_tree(src: &Path, dest: &Path, excludes: &[String], keep: &[String]) -> Result<SyncStats> {
    let copied = copy_tree(src, dest, excludes)?;
    let protected: Vec<String> = excludes.iter().chain(keep).cloned().collect();
    let removed = prune_stale(src, dest, dest, &protected)?;
    Ok(SyncStats { copied, removed })
}

/// Delete entries under `dir` with no counterpart in `src`. A stale
/// directory holding protected paths is emptied around them and kept.
fn prune_stale(src: &Path, dest: &Path, dir: &Path, protected: &[String]) -> Result<u64> {
    let entries = fs::read_dir(dir).map_err(io_err("read destination directory"))?;
    let mut removed = 0u64;
    for entry in entries {
        let entry = entry.map_err(io_err("read directory entry"))?;
        let path = entry.path();
        let rel = rel_str(dest, &path).unwrap_or_default();
        if is_excluded(&rel, protected) {
            continue;
        }

        let file_type = entry.file_type().map_err(io_err("stat entry"))?;
        if fs::symlink_metadata(src.join(&rel)).is_ok() {
            if file_type.is_dir() {
                removed += prune_stale(src, dest, &path, protected)?;
            }
            continue;
        }

        if file_type.is_dir() {
            if clear_dir(dest, &path, protected)? {
                fs::remove_dir(&path).map_err(io_err("remove stale directory"))?;
                removed += 1;
            }
        } else {
            fs::remove_file(&path).map_err(io_err("remove stale file"))?;
            removed += 1;
        }
    }
    Ok(removed)
}

pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(io_err("open for checksum"))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(io_err("read for checksum"))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Digest of a directory tree: relative paths, file contents and link
/// targets, excluding matched paths. Two trees with equal digests hold the
/// same files.
pub fn tree_digest(root: &Path, excludes: &[String]) -> Result<String> {
    let mut hasher = Sha256::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            rel_str(root, entry.path()).is_some_and(|rel| !is_excluded(&rel, excludes))
        });

    for entry in walker {
        let entry = entry
            .map_err(|e| Error::internal_io(e.to_string(), Some("walk tree".to_string())))?;
        let rel = rel_str(root, entry.path()).unwrap_or_default();
        hasher.update(rel.as_bytes());
        hasher.update([0]);
        let file_type = entry.file_type();
        if file_type.is_symlink() {
            let target = fs::read_link(entry.path()).map_err(io_err("read link"))?;
            hasher.update(b"L");
            hasher.update(target.to_string_lossy().as_bytes());
        } else if file_type.is_file() {
            hasher.update(b"F");
            hasher.update(fs::read(entry.path()).map_err(io_err("read file"))?);
        } else {
            hasher.update(b"D");
        }
        hasher.update([0]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn excludes(patterns: &[&str]) -> Vec<String> {
        patterns.iter().map(|p| p.to_string()).collect()
    }

    fn sample_app(root: &Path) {
        fs::create_dir_all(root.join("app/Http")).unwrap();
        fs::create_dir_all(root.join("vendor/laravel")).unwrap();
        fs::create_dir_all(root.join("storage/logs")).unwrap();
        fs::write(root.join("artisan"), "#!/usr/bin/env php").unwrap();
        fs::write(root.join("app/Http/Kernel.php"), "<?php").unwrap();
        fs::write(root.join("vendor/laravel/framework.php"), "<?php").unwrap();
        fs::write(root.join("storage/logs/laravel.log"), "noise").unwrap();
        fs::write(root.join("app/debug.log"), "noise").unwrap();
    }

    #[test]
    fn create_and_extract_respects_excludes() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        sample_app(src.path());
        std::os::unix::fs::symlink("app/Http", src.path().join("http-link")).unwrap();

        let archive = out.path().join("files.tar.gz");
        let stats = create_tar_gz(
            src.path(),
            &archive,
            &excludes(&["vendor", "storage/logs", "**/*.log"]),
        )
        .unwrap();
        assert_eq!(stats.file_count, 3);
        assert_eq!(stats.sha256, file_sha256(&archive).unwrap());
        assert_eq!(stats.archive_size, fs::metadata(&archive).unwrap().len());

        let dest = out.path().join("restored");
        extract_tar_gz(&archive, &dest).unwrap();
        assert!(dest.join("app/Http/Kernel.php").is_file());
        assert!(!dest.join("vendor").exists());
        assert!(!dest.join("app/debug.log").exists());
        assert_eq!(
            fs::read_link(dest.join("http-link")).unwrap(),
            Path::new("app/Http")
        );
    }

    #[test]
    fn failed_archive_leaves_no_partial_file() {
        let out = tempfile::tempdir().unwrap();
        let archive = out.path().join("files.tar.gz");
        let err = create_tar_gz(&out.path().join("missing"), &archive, &[]).unwrap_err();
        assert_eq!(err.code.as_str(), "internal.io_error");
        assert!(!archive.exists());
    }

    #[test]
    fn clear_tree_keeps_excluded_paths() {
        let root = tempfile::tempdir().unwrap();
        sample_app(root.path());

        clear_tree(root.path(), &excludes(&["vendor"])).unwrap();

        assert!(root.path().join("vendor/laravel/framework.php").exists());
        assert!(!root.path().join("app").exists());
        assert!(!root.path().join("artisan").exists());
    }

    #[test]
    fn copy_tree_skips_excludes_and_keeps_links() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        sample_app(src.path());
        fs::write(src.path().join(".env"), "APP_KEY=x").unwrap();
        std::os::unix::fs::symlink("artisan", src.path().join("cli")).unwrap();

        let target = dest.path().join("release");
        copy_tree(src.path(), &target, &excludes(&["vendor", ".env", "storage"])).unwrap();

        assert!(target.join("app/Http/Kernel.php").is_file());
        assert!(!target.join(".env").exists());
        assert!(!target.join("vendor").exists());
        assert_eq!(fs::read_link(target.join("cli")).unwrap(), Path::new("artisan"));
    }

    #[test]
    fn copy_tree_twice_replaces_links_and_changed_types() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        sample_app(src.path());
        std::os::unix::fs::symlink("artisan", src.path().join("cli")).unwrap();
        fs::write(src.path().join("routes"), "flat file").unwrap();
        copy_tree(src.path(), dest.path(), &[]).unwrap();

        fs::remove_file(src.path().join("cli")).unwrap();
        std::os::unix::fs::symlink("app/Http/Kernel.php", src.path().join("cli")).unwrap();
        fs::remove_file(src.path().join("routes")).unwrap();
        fs::create_dir(src.path().join("routes")).unwrap();
        fs::write(src.path().join("routes/web.php"), "<?php").unwrap();
        fs::remove_dir_all(src.path().join("app/Http")).unwrap();
        fs::write(src.path().join("app/Http"), "now a file").unwrap();

        copy_tree(src.path(), dest.path(), &[]).unwrap();

        assert_eq!(
            fs::read_link(dest.path().join("cli")).unwrap(),
            Path::new("app/Http/Kernel.php")
        );
        assert!(dest.path().join("routes/web.php").is_file());
        assert_eq!(fs::read_to_string(dest.path().join("app/Http")).unwrap(), "now a file");
    }

    #[test]
    fn sync_tree_drops_deleted_sources_but_keeps_protected_paths() {
        let src = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        sample_app(src.path());
        fs::create_dir_all(src.path().join("routes")).unwrap();
        fs::write(src.path().join("routes/old.php"), "<?php").unwrap();
        fs::write(src.path().join("routes/web.php"), "<?php").unwrap();
        let copy_excludes = excludes(&["vendor", ".env", "storage"]);
        sync_tree(src.path(), dest.path(), &copy_excludes, &[]).unwrap();
        fs::write(dest.path().join(".env"), "APP_KEY=x").unwrap();
        fs::create_dir_all(dest.path().join("vendor/pkg")).unwrap();
        fs::create_dir_all(dest.path().join("bootstrap/cache")).unwrap();
        fs::write(dest.path().join("bootstrap/cache/config.php"), "<?php").unwrap();

        fs::remove_file(src.path().join("routes/old.php")).unwrap();
        fs::remove_dir_all(src.path().join("app/Http")).unwrap();
        let stats = sync_tree(src.path(), dest.path(), &copy_excludes, &excludes(&["bootstrap/cache"])).unwrap();

        assert_eq!(stats.removed, 2);
        assert!(!dest.path().join("routes/old.php").exists());
        assert!(!dest.path().join("app/Http").exists());
        assert!(dest.path().join("routes/web.php").is_file());
        assert!(dest.path().join(".env").is_file());
        assert!(dest.path().join("vendor/pkg").is_dir());
        assert!(dest.path().join("bootstrap/cache/config.php").is_file());
    }

    #[test]
    fn tree_digest_changes_with_content() {
        let root = tempfile::tempdir().unwrap();
        sample_app(root.path());
        let before = tree_digest(root.path(), &[]).unwrap();
        assert_eq!(before, tree_digest(root.path(), &[]).unwrap());

        fs::write(root.path().join("artisan"), "changed").unwrap();
        assert_ne!(before, tree_digest(root.path(), &[]).unwrap());

        let ignoring = tree_digest(root.path(), &excludes(&["artisan"])).unwrap();
        fs::write(root.path().join("artisan"), "again").unwrap();
        assert_eq!(ignoring, tree_digest(root.path(), &excludes(&["artisan"])).unwrap());
    }
}
