use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::{AnalysisId, PixelSetId, PixelerId};
use crate::error::PixelError;
use crate::fs_util::walk_dir;

pub const DEFAULT_ROOT: &str = ".pixel";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRole {
    SecondaryData,
    Notebook,
}

impl FileRole {
    pub fn as_str(self) -> &'static str {
        match self {
            FileRole::SecondaryData => "secondary_data",
            FileRole::Notebook => "notebook",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Store {
    root: Utf8PathBuf,
}

impl Store {
    pub fn new_with_root(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn database_path(&self) -> Utf8PathBuf {
        self.root.join("db.json")
    }

    pub fn processes_dir(&self) -> Utf8PathBuf {
        self.root.join("processes")
    }

    pub fn process_path(&self, id: &str) -> Utf8PathBuf {
        self.processes_dir().join(format!("{id}.json"))
    }

    pub fn media_root(&self) -> Utf8PathBuf {
        self.root.join("media")
    }

    pub fn templates_dir(&self) -> Utf8PathBuf {
        self.root.join("templates")
    }

    pub fn submission_archive_path(
        &self,
        owner: &PixelerId,
        process: &str,
        file_name: &str,
    ) -> Utf8PathBuf {
        self.media_root()
            .join(owner.to_string())
            .join("submissions")
            .join(process)
            .join(file_name)
    }

    pub fn analysis_file_path(
        &self,
        pixeler: &PixelerId,
        analysis: &AnalysisId,
        role: FileRole,
        file_name: &str,
    ) -> Utf8PathBuf {
        self.media_root()
            .join(pixeler.to_string())
            .join(analysis.to_string())
            .join(role.as_str())
            .join(file_name)
    }

    pub fn pixelset_file_path(
        &self,
        pixeler: &PixelerId,
        analysis: &AnalysisId,
        pixel_set: &PixelSetId,
        file_name: &str,
    ) -> Utf8PathBuf {
        self.media_root()
            .join(pixeler.to_string())
            .join(analysis.to_string())
            .join("pixelsets")
            .join(pixel_set.to_string())
            .join(file_name)
    }

    pub fn ensure_root(&self) -> Result<(), PixelError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| PixelError::Filesystem(err.to_string()))
    }

    pub fn write_json<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), PixelError> {
        let content = serde_json::to_vec_pretty(value)
            .map_err(|err| PixelError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(path, &content)
    }

    pub fn read_json<T: DeserializeOwned>(path: &Utf8Path) -> Result<T, PixelError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| PixelError::Filesystem(format!("read {path}: {err}")))?;
        serde_json::from_str(&content)
            .map_err(|err| PixelError::Filesystem(format!("decode {path}: {err}")))
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), PixelError> {
        let parent = path
            .parent()
            .ok_or_else(|| PixelError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| PixelError::Filesystem(err.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix(".pixel-write")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| PixelError::Filesystem(err.to_string()))?;
        fs::write(temp.path(), content).map_err(|err| PixelError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| PixelError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn copy_file_atomic(source: &Utf8Path, dest: &Utf8Path) -> Result<(), PixelError> {
        let parent = dest
            .parent()
            .ok_or_else(|| PixelError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| PixelError::Filesystem(err.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix(".pixel-file")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| PixelError::Filesystem(err.to_string()))?;
        fs::copy(source.as_std_path(), temp.path())
            .map_err(|err| PixelError::Filesystem(format!("copy {source}: {err}")))?;
        if dest.as_std_path().exists() {
            fs::remove_file(dest.as_std_path())
                .map_err(|err| PixelError::Filesystem(err.to_string()))?;
        }
        temp.persist(dest.as_std_path())
            .map_err(|err| PixelError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn list_json<T: DeserializeOwned>(dir: &Utf8Path) -> Result<Vec<T>, PixelError> {
        if !dir.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for path in walk_dir(dir.as_std_path())? {
            if path.is_file() && path.extension().map(|ext| ext == "json").unwrap_or(false) {
                let path = Utf8PathBuf::from_path_buf(path)
                    .map_err(|_| PixelError::Filesystem("non-utf8 path in store".to_string()))?;
                entries.push(Self::read_json(&path)?);
            }
        }
        Ok(entries)
    }
}
