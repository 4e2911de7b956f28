use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

use crate::db::Database;
use crate::domain::PixelerId;
use crate::error::PixelError;
use crate::fs_util::{extract_zip, is_zip, walk_dir};
use crate::import::{ImportSink, ImportTags, ImportationDone, Importer};
use crate::meta::{ParsedMeta, SerializedMeta, parse_template};
use crate::store::Store;
use crate::template::META_FILENAME;

/// A submitted zip archive, extracted to a temporary working directory.
#[derive(Debug)]
pub struct PixelArchive {
    archive_path: PathBuf,
    workdirs: Vec<TempDir>,
    files: Vec<PathBuf>,
    meta_path: PathBuf,
    meta: Option<ParsedMeta>,
}

impl PixelArchive {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PixelError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(PixelError::ArchiveNotFound(path.to_path_buf()));
        }
        if !is_zip(path) {
            return Err(PixelError::InvalidArchiveFormat(path.to_path_buf()));
        }

        let mut archive = Self {
            archive_path: path.to_path_buf(),
            workdirs: Vec::new(),
            files: Vec::new(),
            meta_path: PathBuf::new(),
            meta: None,
        };
        archive.extract(false)?;
        Ok(archive)
    }

    /// Extracts the archive unless already done. `force` extracts again into
    /// a new directory; earlier ones live until the archive is dropped.
    pub fn extract(&mut self, force: bool) -> Result<(), PixelError> {
        if !self.workdirs.is_empty() && !force {
            return Ok(());
        }

        let workdir = tempfile::Builder::new()
            .prefix("pixel-archive")
            .tempdir()
            .map_err(|err| PixelError::Filesystem(err.to_string()))?;
        extract_zip(&self.archive_path, workdir.path())?;
        self.files = walk_dir(workdir.path())?;
        debug!(
            "extracted {} entries from {} into {}",
            self.files.len(),
            self.archive_path.display(),
            workdir.path().display()
        );
        self.workdirs.push(workdir);
        self.meta_path = self.locate_meta()?;
        Ok(())
    }

    fn locate_meta(&self) -> Result<PathBuf, PixelError> {
        self.files
            .iter()
            .find(|file| {
                file.file_name()
                    .map(|name| name == META_FILENAME)
                    .unwrap_or(false)
            })
            .cloned()
            .ok_or(PixelError::MetaFileRequired)
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    /// Current extraction directory.
    pub fn cwd(&self) -> &Path {
        self.workdirs
            .last()
            .map(TempDir::path)
            .unwrap_or_else(|| Path::new(""))
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn meta_path(&self) -> &Path {
        &self.meta_path
    }

    pub fn meta(&self) -> Option<&ParsedMeta> {
        self.meta.as_ref()
    }

    pub fn parse(&mut self, db: &Database) -> Result<&ParsedMeta, PixelError> {
        let meta = db.read(|tables| parse_template(&self.meta_path, &self.files, tables))?;
        Ok(self.meta.insert(meta))
    }

    pub fn serialized_meta(&self) -> Result<SerializedMeta, PixelError> {
        let meta = self
            .meta
            .as_ref()
            .ok_or_else(|| PixelError::MetaFileParsing("archive was not parsed".to_string()))?;
        meta.serialize(self.cwd())
    }

    /// Restores metadata produced by an earlier extraction of this archive.
    pub fn load_meta(
        &mut self,
        serialized: &SerializedMeta,
        db: &Database,
    ) -> Result<&ParsedMeta, PixelError> {
        let root = self.cwd().to_path_buf();
        let meta = db.read(|tables| serialized.resolve(tables, &root))?;
        Ok(self.meta.insert(meta))
    }

    pub fn save(
        &self,
        db: &Database,
        store: &Store,
        pixeler: PixelerId,
        tags: &ImportTags,
        sink: &dyn ImportSink,
    ) -> Result<ImportationDone, PixelError> {
        let meta = self
            .meta
            .as_ref()
            .ok_or_else(|| PixelError::MetaFileParsing("archive was not parsed".to_string()))?;
        Importer::new(db, store).save(meta, pixeler, tags, sink)
    }
}
