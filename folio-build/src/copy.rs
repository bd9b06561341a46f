//! Snapshot of the data directory into a release.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{io_err, BuildError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub files: usize,
    pub dirs: usize,
    pub links: usize,
    pub bytes: u64,
}

/// Copy the tree under `src` into `dst`, skipping every path in `exclude`
/// (and everything below it). Symlinks are recreated, not followed.
///
/// `src` and the excluded paths are compared after resolving `.`, `..` and
/// symlinked parents, so differently spelled paths to the same entry still
/// match. A missing `src` copies nothing.
pub fn copy_tree(src: &Path, dst: &Path, exclude: &[PathBuf]) -> Result<CopyStats, BuildError> {
    let mut stats = CopyStats::default();
    if !src.is_dir() {
        tracing::warn!(src = %src.display(), "data directory missing; nothing to copy");
        return Ok(stats);
    }
    let src = src.canonicalize().map_err(|e| io_err(src, e))?;
    let src = src.as_path();
    let exclude: Vec<PathBuf> = exclude.iter().map(|path| resolve(path)).collect();

    let walker = WalkDir::new(src)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !exclude.iter().any(|ex| entry.path() == ex.as_path()));

    for entry in walker {
        let entry = entry.map_err(|source| BuildError::Walk {
            path: src.to_path_buf(),
            source,
        })?;
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| io_err(&target, e))?;
            stats.dirs += 1;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path()).map_err(|e| io_err(entry.path(), e))?;
            copy_link(&link, &target)?;
            stats.links += 1;
        } else {
            stats.bytes += fs::copy(entry.path(), &target).map_err(|e| io_err(&target, e))?;
            stats.files += 1;
        }
    }

    tracing::info!(
        src = %src.display(),
        dst = %dst.display(),
        files = stats.files,
        bytes = stats.bytes,
        "copied data snapshot",
    );
    Ok(stats)
}

/// Resolve the parent of `path` on disk, keeping its last component as is
/// so an excluded symlink names the link and not its target.
fn resolve(path: &Path) -> PathBuf {
    let lexical: PathBuf = path.components().collect();
    let resolved = match (lexical.parent(), lexical.file_name()) {
        (Some(parent), Some(name)) => parent.canonicalize().ok().map(|parent| parent.join(name)),
        _ => lexical.canonicalize().ok(),
    };
    resolved.unwrap_or(lexical)
}

#[cfg(unix)]
fn copy_link(link: &Path, target: &Path) -> Result<(), BuildError> {
    std::os::unix::fs::symlink(link, target).map_err(|e| io_err(target, e))
}

#[cfg(not(unix))]
fn copy_link(link: &Path, target: &Path) -> Result<(), BuildError> {
    tracing::warn!(link = %link.display(), target = %target.display(), "skipping symlink");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use assert_fs::TempDir;
    use predicates::prelude::*;

    #[test]
    fn copies_tree_except_excluded_dirs() {
        let src = TempDir::new().unwrap();
        src.child("index.html").write_str("<h1>hi</h1>").unwrap();
        src.child("blog/post.html").write_str("post").unwrap();
        src.child(".folio/queue/entry").write_str("internal").unwrap();
        let dst = TempDir::new().unwrap();

        let stats = copy_tree(src.path(), dst.path(), &[src.path().join(".folio")]).unwrap();

        assert_eq!(stats.files, 2);
        dst.child("index.html").assert("<h1>hi</h1>");
        dst.child("blog/post.html").assert(predicate::path::is_file());
        dst.child(".folio").assert(predicate::path::missing());
    }

    #[test]
    fn exclusions_match_differently_spelled_paths() {
        let src = TempDir::new().unwrap();
        src.child("index.html").write_str("home").unwrap();
        src.child(".folio/queue/entry").write_str("internal").unwrap();
        src.child("releases/old/index.html").write_str("old").unwrap();
        let dst = TempDir::new().unwrap();

        let dotted = src.path().join(".");
        let exclude = [
            src.path().join("./.folio/."),
            src.path().join("releases/old/../../releases"),
        ];
        let stats = copy_tree(&dotted, dst.path(), &exclude).unwrap();

        assert_eq!(stats.files, 1);
        dst.child("index.html").assert("home");
        dst.child(".folio").assert(predicate::path::missing());
        dst.child("releases").assert(predicate::path::missing());
    }

    #[test]
    #[cfg(unix)]
    fn exclusions_match_through_symlinked_source() {
        let real = TempDir::new().unwrap();
        real.child("index.html").write_str("home").unwrap();
        real.child(".folio/control").write_str("internal").unwrap();
        let links = TempDir::new().unwrap();
        let alias = links.path().join("site");
        std::os::unix::fs::symlink(real.path(), &alias).unwrap();
        let dst = TempDir::new().unwrap();

        copy_tree(&alias, dst.path(), &[real.path().join(".folio")]).unwrap();
        dst.child("index.html").assert("home");
        dst.child(".folio").assert(predicate::path::missing());

        let dst = TempDir::new().unwrap();
        copy_tree(real.path(), dst.path(), &[alias.join(".folio")]).unwrap();
        dst.child(".folio").assert(predicate::path::missing());
    }

    #[test]
    fn missing_source_copies_nothing() {
        let dst = TempDir::new().unwrap();
        let stats = copy_tree(&dst.path().join("nope"), dst.path(), &[]).unwrap();
        assert_eq!(stats, CopyStats::default());
    }

    #[test]
    #[cfg(unix)]
    fn symlinks_are_recreated() {
        let src = TempDir::new().unwrap();
        src.child("real.txt").write_str("x").unwrap();
        std::os::unix::fs::symlink("real.txt", src.path().join("alias.txt")).unwrap();
        let dst = TempDir::new().unwrap();

        let stats = copy_tree(src.path(), dst.path(), &[]).unwrap();
        assert_eq!(stats.links, 1);
        assert_eq!(
            fs::read_link(dst.path().join("alias.txt")).unwrap(),
            Path::new("real.txt")
        );
    }
}
