//! Unpacks one decompressed layer archive onto a rootfs directory.
//!
//! Recorded permissions are not honoured: directories are created
//! with a permissive mode and every regular file is forced to `0777`.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs::{self, DirBuilder, File, Permissions};
use std::io::{self, Read};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt, symlink};
use std::path::{Component, Path, PathBuf};

use tar::{Archive, EntryType};
use tracing::debug;

use crate::error::FetchError;

pub const FILE_MODE: u32 = 0o777;
pub const DIR_MODE: u32 = 0o777;

/// Creates `path` and any missing parents with [`DIR_MODE`].
pub fn create_dir_all(path: &Path) -> io::Result<()> {
    DirBuilder::new().recursive(true).mode(DIR_MODE).create(path)
}

/// Symlinks followed while resolving one path before it is treated as a loop.
const MAX_LINK_HOPS: usize = 40;

enum Step {
    Down(OsString),
    Up,
}

/// Maps an archive path under `root`, refusing anything that climbs out of it.
///
/// Intermediate symlinks left by earlier layers are resolved as if `root` were
/// `/`: absolute targets restart at `root` and `..` stops there. The final
/// component is never followed.
fn resolve(root: &Path, entry_path: &Path) -> Result<PathBuf, FetchError> {
    let unsafe_path = || FetchError::UnsafePath {
        path: entry_path.to_path_buf(),
    };

    let mut pending = VecDeque::new();
    for component in entry_path.components() {
        match component {
            Component::Normal(part) => pending.push_back(Step::Down(part.to_os_string())),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir | Component::Prefix(_) => return Err(unsafe_path()),
        }
    }
    let Some(Step::Down(leaf)) = pending.pop_back() else {
        return Ok(root.to_path_buf());
    };

    let mut resolved = root.to_path_buf();
    let mut hops = 0;
    while let Some(step) = pending.pop_front() {
        let part = match step {
            Step::Down(part) => part,
            Step::Up => {
                if resolved != root {
                    resolved.pop();
                }
                continue;
            }
        };

        let next = resolved.join(&part);
        let is_link = match fs::symlink_metadata(&next) {
            Ok(meta) => meta.file_type().is_symlink(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(source) => return Err(FetchError::Io { path: next, source }),
        };
        if !is_link {
            resolved = next;
            continue;
        }

        hops += 1;
        if hops > MAX_LINK_HOPS {
            return Err(unsafe_path());
        }
        let target = fs::read_link(&next).map_err(|source| FetchError::Io {
            path: next.clone(),
            source,
        })?;
        if target.is_absolute() {
            resolved = root.to_path_buf();
        }
        let expanded: Vec<Step> = target
            .components()
            .filter_map(|component| match component {
                Component::Normal(part) => Some(Step::Down(part.to_os_string())),
                Component::ParentDir => Some(Step::Up),
                _ => None,
            })
            .collect();
        for step in expanded.into_iter().rev() {
            pending.push_front(step);
        }
    }

    resolved.push(leaf);
    Ok(resolved)
}

/// Removes a file or link left at `path` by an earlier layer so the new entry
/// replaces it instead of writing through it. Directories are kept.
fn clear_non_directory(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if !meta.is_dir() => fs::remove_file(path),
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.exists() => create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Streams a tar archive into `root`.
///
/// `digest` only labels errors. Devices, FIFOs and other entry types are skipped.
pub fn extract_layer<R: Read>(root: &Path, digest: &str, reader: R) -> Result<(), FetchError> {
    let layer_error = |source| FetchError::Layer {
        digest: digest.to_string(),
        source,
    };

    let mut archive = Archive::new(reader);
    for entry in archive.entries().map_err(layer_error)? {
        let mut entry = entry.map_err(layer_error)?;
        let entry_path = entry.path().map_err(layer_error)?.into_owned();
        let dest = resolve(root, &entry_path)?;

        match entry.header().entry_type() {
            EntryType::Directory => {
                if !dest.is_dir() {
                    clear_non_directory(&dest).map_err(layer_error)?;
                    create_dir_all(&dest).map_err(layer_error)?;
                }
            }
            EntryType::Regular | EntryType::Continuous => {
                ensure_parent(&dest).map_err(layer_error)?;
                clear_non_directory(&dest).map_err(layer_error)?;
                let mut file = File::create(&dest).map_err(layer_error)?;
                io::copy(&mut entry, &mut file).map_err(layer_error)?;
                fs::set_permissions(&dest, Permissions::from_mode(FILE_MODE))
                    .map_err(layer_error)?;
            }
            EntryType::Symlink => {
                let Some(target) = entry.link_name().map_err(layer_error)? else {
                    continue;
                };
                ensure_parent(&dest).map_err(layer_error)?;
                clear_non_directory(&dest).map_err(layer_error)?;
                symlink(&target, &dest).map_err(layer_error)?;
            }
            EntryType::Link => {
                let Some(target) = entry.link_name().map_err(layer_error)? else {
                    continue;
                };
                let source = resolve(root, &target)?;
                ensure_parent(&dest).map_err(layer_error)?;
                clear_non_directory(&dest).map_err(layer_error)?;
                fs::hard_link(&source, &dest).map_err(layer_error)?;
            }
            other => debug!(path = %entry_path.display(), kind = ?other, "Skipping entry"),
        }
    }

    Ok(())
}
