use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use crate::error::PixelError;

pub fn is_zip(path: &Path) -> bool {
    fs::File::open(path)
        .ok()
        .map(|file| ZipArchive::new(file).is_ok())
        .unwrap_or(false)
}

pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<Vec<PathBuf>, PixelError> {
    let file = fs::File::open(zip_path).map_err(|err| {
        PixelError::Filesystem(format!("open zip {}: {err}", zip_path.display()))
    })?;
    let mut archive = ZipArchive::new(file)
        .map_err(|_| PixelError::InvalidArchiveFormat(zip_path.to_path_buf()))?;

    let mut extracted = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| PixelError::Filesystem(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(PixelError::Filesystem(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| PixelError::Filesystem(err.to_string()))?;
            extracted.push(entry_path);
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| PixelError::Filesystem(err.to_string()))?;
        }
        let mut outfile = fs::File::create(&entry_path)
            .map_err(|err| PixelError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile)
            .map_err(|err| PixelError::Filesystem(err.to_string()))?;
        extracted.push(entry_path);
    }
    Ok(extracted)
}

/// Name and CRC-32 of every entry, sorted by name.
pub fn zip_entry_crcs(zip_path: &Path) -> Result<Vec<(String, u32)>, PixelError> {
    let file = fs::File::open(zip_path).map_err(|err| {
        PixelError::Filesystem(format!("open zip {}: {err}", zip_path.display()))
    })?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| PixelError::Filesystem(err.to_string()))?;

    let mut crcs = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive
            .by_index_raw(i)
            .map_err(|err| PixelError::Filesystem(err.to_string()))?;
        crcs.push((entry.name().to_string(), entry.crc32()));
    }
    crcs.sort();
    Ok(crcs)
}

pub fn walk_dir(root: &Path) -> Result<Vec<PathBuf>, PixelError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries =
            fs::read_dir(&path).map_err(|err| PixelError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| PixelError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path.clone());
            }
            items.push(path);
        }
    }
    items.sort();
    Ok(items)
}
