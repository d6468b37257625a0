use crate::StoreError;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{trace, warn};

/// Entry counts for a packed layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerStats {
    pub files: usize,
    pub dirs: usize,
    pub symlinks: usize,
    pub skipped: usize,
}

impl LayerStats {
    pub fn entries(&self) -> usize {
        self.files + self.dirs + self.symlinks
    }
}

/// Package `source_dir` into an uncompressed tar file at `dest`.
///
/// Regular files, directories, and symlinks are supported. Device nodes,
/// sockets, and FIFOs are skipped with warnings. `source_dir` must be an
/// existing directory.
///
/// Determinism guarantees:
/// - Entry names are relative to `source_dir`, kept byte for byte
/// - Entries sorted by the bytes of their relative path
/// - All timestamps set to 0 (Unix epoch)
/// - All ownership set to 0:0 (root:root)
/// - Permissions preserved as-is from source
pub fn pack_layer(source_dir: &Path, dest: &Path) -> Result<LayerStats, StoreError> {
    let meta = fs::metadata(source_dir)?;
    if !meta.is_dir() {
        return Err(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::NotADirectory,
            format!("layer root {} is not a directory", source_dir.display()),
        )));
    }

    let mut entries = collect_entries(source_dir, source_dir)?;
    entries.sort_by(|a, b| a.0.as_os_str().as_bytes().cmp(b.0.as_os_str().as_bytes()));

    let out = BufWriter::new(File::create(dest)?);
    let mut ar = tar::Builder::new(out);
    ar.follow_symlinks(false);

    let mut stats = LayerStats::default();
    for (rel_path, full_path) in &entries {
        let ft = match full_path.symlink_metadata() {
            Ok(m) => m.file_type(),
            Err(e) => {
                warn!("skipping {}: metadata error: {e}", rel_path.display());
                stats.skipped += 1;
                continue;
            }
        };

        if ft.is_file() {
            append_file(&mut ar, rel_path, full_path)?;
            stats.files += 1;
        } else if ft.is_dir() {
            append_dir(&mut ar, rel_path, full_path)?;
            stats.dirs += 1;
        } else if ft.is_symlink() {
            append_symlink(&mut ar, rel_path, full_path)?;
            stats.symlinks += 1;
        } else {
            warn!("skipping unsupported file type: {}", rel_path.display());
            stats.skipped += 1;
            continue;
        }
        trace!("adding to layer: {}", rel_path.display());
    }

    let mut out = ar.into_inner()?;
    out.flush()?;
    out.into_inner()
        .map_err(std::io::IntoInnerError::into_error)?
        .sync_all()?;
    Ok(stats)
}

/// Entry paths of a tar file, in archive order.
pub fn list_layer_entries(tar_path: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let mut ar = tar::Archive::new(File::open(tar_path)?);
    let mut names = Vec::new();
    for entry in ar.entries()? {
        let entry = entry?;
        names.push(entry.path()?.into_owned());
    }
    Ok(names)
}

/// Recursively collect (relative_path, full_path) pairs from a directory tree.
fn collect_entries(root: &Path, current: &Path) -> Result<Vec<(PathBuf, PathBuf)>, StoreError> {
    let mut result = Vec::new();
    for entry in fs::read_dir(current)? {
        let entry = entry?;
        let full = entry.path();
        let rel = full
            .strip_prefix(root)
            .map_err(|e| StoreError::Io(std::io::Error::other(format!("path strip: {e}"))))?
            .to_path_buf();

        let meta = full.symlink_metadata()?;
        if meta.is_dir() {
            result.push((rel, full.clone()));
            result.extend(collect_entries(root, &full)?);
        } else {
            result.push((rel, full));
        }
    }
    Ok(result)
}

fn make_header(full_path: &Path, entry_type: tar::EntryType) -> Result<tar::Header, StoreError> {
    let meta = full_path.symlink_metadata()?;
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(meta.permissions().mode());
    Ok(header)
}

fn append_file<W: Write>(
    ar: &mut tar::Builder<W>,
    name: &Path,
    full_path: &Path,
) -> Result<(), StoreError> {
    let file = File::open(full_path)?;
    let mut header = make_header(full_path, tar::EntryType::Regular)?;
    header.set_size(file.metadata()?.len());
    header.set_cksum();
    ar.append_data(&mut header, name, file)?;
    Ok(())
}

fn append_dir<W: Write>(
    ar: &mut tar::Builder<W>,
    name: &Path,
    full_path: &Path,
) -> Result<(), StoreError> {
    let mut header = make_header(full_path, tar::EntryType::Directory)?;
    header.set_size(0);
    header.set_cksum();
    ar.append_data(&mut header, name, std::io::empty())?;
    Ok(())
}

fn append_symlink<W: Write>(
    ar: &mut tar::Builder<W>,
    name: &Path,
    full_path: &Path,
) -> Result<(), StoreError> {
    let target = fs::read_link(full_path)?;
    let mut header = make_header(full_path, tar::EntryType::Symlink)?;
    header.set_size(0);
    header.set_cksum();
    ar.append_link(&mut header, name, &target)?;
    Ok(())
}
