//! Assignment staging
//!
//! A pass never mutates the instructor's submission tree. The assignment
//! directory is copied to `<output-dir>/<alias>/` first and everything
//! after discovery happens inside the copy. Staging also normalizes the
//! copy: top-level zip archives are expanded into a sibling directory
//! named after the archive stem, and submissions wrapped in a single
//! nested directory are flattened so their marker files sit at the
//! submission root where classification looks for them.

use log::warn;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zip::read::ZipArchive;

use crate::project::{has_zip_extension, BUILD_DIR_PREFIX};

/// Wrapper levels removed per submission before giving up
const MAX_FLATTEN_DEPTH: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("cannot stage {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no staged copy at {} (stage it with a full or build pass first)", dir.display())]
    MissingStage { dir: PathBuf },
}

impl StageError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Stage an assignment: replace any previous copy under the alias, copy
/// the tree, expand archives, flatten wrappers. Returns the staged
/// assignment directory.
pub fn stage(
    assignment_dir: &Path,
    output_dir: &Path,
    alias: &str,
) -> Result<PathBuf, StageError> {
    let dest = output_dir.join(alias);
    if dest.exists() {
        fs::remove_dir_all(&dest).map_err(|err| StageError::io(&dest, err))?;
    }
    fs::create_dir_all(&dest).map_err(|err| StageError::io(&dest, err))?;

    copy_assignment(assignment_dir, output_dir, &dest)?;
    expand_archives(&dest)?;
    flatten_wrapped_submissions(&dest)?;
    Ok(dest)
}

/// Locate the staged copy from an earlier pass without re-staging.
/// Run-only passes use this so trials hit the binaries already built.
pub fn reuse(output_dir: &Path, alias: &str) -> Result<PathBuf, StageError> {
    let dest = output_dir.join(alias);
    if !dest.is_dir() {
        return Err(StageError::MissingStage { dir: dest });
    }
    Ok(dest)
}

/// Copy the assignment tree, dereferencing symlinks. Build directories
/// from earlier passes and the output directory itself are skipped; the
/// latter keeps a staging destination nested inside the assignment from
/// being copied into itself.
fn copy_assignment(src: &Path, output_dir: &Path, dest: &Path) -> Result<(), StageError> {
    let output_canonical = fs::canonicalize(output_dir).ok();

    let walker = WalkDir::new(src)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| {
            if !entry.file_type().is_dir() {
                return true;
            }
            if entry
                .file_name()
                .to_string_lossy()
                .starts_with(BUILD_DIR_PREFIX)
            {
                return false;
            }
            match (&output_canonical, fs::canonicalize(entry.path())) {
                (Some(output), Ok(canonical)) => canonical != *output,
                _ => true,
            }
        });

    for entry in walker {
        let entry = entry.map_err(|err| StageError::io(src, io::Error::from(err)))?;
        let relative = match entry.path().strip_prefix(src) {
            Ok(relative) => relative,
            Err(_) => continue,
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|err| StageError::io(&target, err))?;
        } else {
            fs::copy(entry.path(), &target).map_err(|err| StageError::io(&target, err))?;
        }
    }
    Ok(())
}

/// Expand each top-level zip into a directory named after its stem, then
/// drop the archive from the staged copy. A broken or unsafe archive is
/// logged and left in place so one student's upload cannot abort the whole
/// batch; discovery skips archive files either way.
fn expand_archives(dest: &Path) -> Result<(), StageError> {
    let entries = fs::read_dir(dest).map_err(|err| StageError::io(dest, err))?;
    let mut archives = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| StageError::io(dest, err))?;
        let path = entry.path();
        if path.is_file() && has_zip_extension(&path) {
            archives.push(path);
        }
    }
    archives.sort();

    for archive in archives {
        let target = archive.with_extension("");
        match extract_archive(&archive, &target) {
            Ok(()) => {
                if let Err(err) = fs::remove_file(&archive) {
                    warn!("cannot remove expanded archive {}: {}", archive.display(), err);
                }
            }
            Err(err) => warn!("skipping archive {}: {}", archive.display(), err),
        }
    }
    Ok(())
}

fn extract_archive(archive_path: &Path, target: &Path) -> io::Result<()> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file)?;
    fs::create_dir_all(target)?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let relative = match entry.enclosed_name().map(|name| name.to_path_buf()) {
            Some(relative) => relative,
            None => {
                warn!(
                    "skipping unsafe entry '{}' in {}",
                    entry.name(),
                    archive_path.display()
                );
                continue;
            }
        };
        let outpath = target.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&outpath)?;
        } else {
            if let Some(parent) = outpath.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut outfile = File::create(&outpath)?;
            io::copy(&mut entry, &mut outfile)?;
        }
    }
    Ok(())
}

/// Unwrap submissions that consist of a single nested directory, as
/// produced by zipping a folder. Repeats per submission until the root
/// holds real content.
fn flatten_wrapped_submissions(dest: &Path) -> Result<(), StageError> {
    let entries = fs::read_dir(dest).map_err(|err| StageError::io(dest, err))?;
    for entry in entries {
        let entry = entry.map_err(|err| StageError::io(dest, err))?;
        let submission = entry.path();
        if !submission.is_dir() {
            continue;
        }
        for _ in 0..MAX_FLATTEN_DEPTH {
            match sole_subdirectory(&submission).map_err(|err| StageError::io(&submission, err))? {
                Some(wrapper) => {
                    unwrap_level(&submission, &wrapper)
                        .map_err(|err| StageError::io(&submission, err))?;
                }
                None => break,
            }
        }
    }
    Ok(())
}

fn sole_subdirectory(dir: &Path) -> io::Result<Option<PathBuf>> {
    let mut entries = fs::read_dir(dir)?;
    let first = match entries.next() {
        Some(entry) => entry?.path(),
        None => return Ok(None),
    };
    if entries.next().is_some() || !first.is_dir() {
        return Ok(None);
    }
    Ok(Some(first))
}

/// Move the wrapper's children up one level. The wrapper is renamed
/// aside first so a child sharing its name cannot collide.
fn unwrap_level(submission: &Path, wrapper: &Path) -> io::Result<()> {
    let holding = submission.join(".submill-staging-tmp");
    fs::rename(wrapper, &holding)?;
    for child in fs::read_dir(&holding)? {
        let child = child?;
        fs::rename(child.path(), submission.join(child.file_name()))?;
    }
    fs::remove_dir(&holding)
}
