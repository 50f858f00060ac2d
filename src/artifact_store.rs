use std::{
    fs::File,
    io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use tokio::fs;
use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

pub async fn ensure_root(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .await
        .with_context(|| format!("Failed to create directory at {}", path.display()))
}

/// Packs the regular files of `dir` into a sibling `<dir>.zip` and returns
/// the archive path. Blocking; callers on the runtime should wrap this in
/// `spawn_blocking`.
pub fn pack_directory(dir: &Path) -> Result<PathBuf> {
    let archive_path = dir.with_extension("zip");
    let file = File::create(&archive_path)
        .with_context(|| format!("Failed to create archive at {}", archive_path.display()))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .collect::<io::Result<Vec<_>>>()
        .with_context(|| format!("Failed to list {}", dir.display()))?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let file_type = entry
            .file_type()
            .with_context(|| format!("Failed to stat {}", entry.path().display()))?;
        if !file_type.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        writer
            .start_file(name, options)
            .context("Failed to start archive entry")?;
        let mut source = File::open(entry.path())
            .with_context(|| format!("Failed to open {}", entry.path().display()))?;
        io::copy(&mut source, &mut writer)
            .with_context(|| format!("Failed to archive {}", entry.path().display()))?;
    }

    writer.finish().context("Failed to finalize archive")?;
    Ok(archive_path)
}

/// Download names must be bare `.zip` basenames. Anything that could
/// escape the output root is rejected before the filesystem is touched.
pub fn validate_archive_name(name: &str) -> bool {
    name.ends_with(".zip")
        && name.len() > ".zip".len()
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains("..")
}

pub fn resolve_archive(output_root: &Path, name: &str) -> Option<PathBuf> {
    if !validate_archive_name(name) {
        return None;
    }
    Some(output_root.join(name))
}
