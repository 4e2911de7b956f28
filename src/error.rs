use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PixelError {
    #[error("PixelArchive {0} not found")]
    ArchiveNotFound(PathBuf),

    #[error("Pixel submission must be a zip archive: {0}")]
    InvalidArchiveFormat(PathBuf),

    #[error("The required meta.xlsx file is missing in your archive")]
    MetaFileRequired,

    #[error("meta.xlsx format error: {0}")]
    MetaFileFormat(String),

    #[error("meta.xlsx parsing error: {0}")]
    MetaFileParsing(String),

    #[error("pixel set parsing failed: {0}")]
    PixelSetParse(String),

    #[error("pixel set import failed: {0}")]
    PixelSetSave(String),

    #[error("chromosomal features parsing failed: {0}")]
    EntriesParse(String),

    #[error("spreadsheet generation failed: {0}")]
    Spreadsheet(String),

    #[error("export failed: {0}")]
    Export(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("submission process not found: {0}")]
    ProcessNotFound(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("cannot {action}: process is at step {current}")]
    InvalidTransition { action: String, current: String },

    #[error("import failed: {0}")]
    ImportFailed(String),

    #[error("This command should only be used in development, i.e. with debug enabled")]
    NotDebug,
}

