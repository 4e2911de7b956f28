mod common;

use std::fs;

use assert_matches::assert_matches;
use chrono::NaiveDate;
use pixel::archive::PixelArchive;
use pixel::db::Database;
use pixel::domain::DataSource;
use pixel::error::PixelError;
use pixel::meta::SerializedMeta;

use common::{DatasetRow, MetaSheet, build_archive, seed_reference, write_zip};

#[test]
fn archive_without_meta_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("no-meta.zip");
    write_zip(
        &path,
        &[("data/1.txt".to_string(), b"Gene Value Quality_score\n".to_vec())],
    );

    let err = PixelArchive::open(&path).unwrap_err();
    assert_matches!(err, PixelError::MetaFileRequired);
    assert!(err.to_string().contains("meta.xlsx"));
}

#[test]
fn non_zip_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("meta.xlsx.txt");
    fs::write(&path, "not an archive").unwrap();

    assert_matches!(
        PixelArchive::open(&path),
        Err(PixelError::InvalidArchiveFormat(_))
    );
}

#[test]
fn parses_meta_against_reference_data() {
    let temp = tempfile::tempdir().unwrap();
    let db = Database::in_memory();
    let reference = seed_reference(&db);
    let path = build_archive(
        temp.path(),
        "valid",
        &MetaSheet::default(),
        "Gene Value Quality_score\n",
    );

    let mut archive = PixelArchive::open(&path).unwrap();
    let meta = archive.parse(&db).unwrap();

    assert_eq!(meta.experiment.omics_area.id, reference.area.id);
    assert_eq!(
        meta.experiment.completion_date,
        NaiveDate::from_ymd_opt(2017, 10, 17).unwrap()
    );
    assert_eq!(meta.experiment.data_source, DataSource::Published);
    assert_eq!(meta.experiment.repository, "DOI");
    assert_eq!(meta.experiment.entry, "10.1093/nar/gkw1184");
    assert!(meta.analysis.secondary_data_path.ends_with("submission/SECONDARY_DATA.txt"));
    assert!(meta.analysis.notebook_path.is_some());
    assert_eq!(meta.datasets.len(), 1);
    assert_eq!(meta.datasets[0].strain.id, reference.strain.id);
    assert_eq!(meta.datasets[0].omics_unit_type.id, reference.unit_type.id);
    assert_eq!(meta.datasets[0].comment, "First replicate");
}

#[test]
fn serialized_meta_survives_reextraction() {
    let temp = tempfile::tempdir().unwrap();
    let db = Database::in_memory();
    seed_reference(&db);
    let path = build_archive(
        temp.path(),
        "valid",
        &MetaSheet::default(),
        "Gene Value Quality_score\n",
    );

    let mut archive = PixelArchive::open(&path).unwrap();
    archive.parse(&db).unwrap();
    let serialized = archive.serialized_meta().unwrap();
    assert_eq!(serialized.analysis.secondary_data_path, "submission/SECONDARY_DATA.txt");
    assert_eq!(serialized.experiment.completion_date, "2017-10-17");

    let json = serde_json::to_string(&serialized).unwrap();
    let restored: SerializedMeta = serde_json::from_str(&json).unwrap();

    let mut reopened = PixelArchive::open(&path).unwrap();
    let cwd = reopened.cwd().to_path_buf();
    assert_ne!(cwd, archive.cwd());
    let meta = reopened.load_meta(&restored, &db).unwrap();
    assert!(meta.analysis.secondary_data_path.starts_with(&cwd));
    assert!(meta.datasets[0].path.is_file());
}

#[test]
fn unknown_vocabulary_is_a_parsing_error() {
    let temp = tempfile::tempdir().unwrap();
    let db = Database::in_memory();
    seed_reference(&db);
    let sheet = MetaSheet {
        datasets: vec![DatasetRow {
            file: "1.txt".to_string(),
            unit_type: "metabolite".to_string(),
            strain: "CBS138 (Candida glabrata)".to_string(),
            comment: String::new(),
        }],
        ..MetaSheet::default()
    };
    let path = build_archive(temp.path(), "vocabulary", &sheet, "");

    let mut archive = PixelArchive::open(&path).unwrap();
    assert_matches!(
        archive.parse(&db),
        Err(PixelError::MetaFileParsing(message)) if message.contains("metabolite")
    );
}

#[test]
fn missing_required_cell_is_a_parsing_error() {
    let temp = tempfile::tempdir().unwrap();
    let db = Database::in_memory();
    seed_reference(&db);
    let sheet = MetaSheet {
        completion_date: String::new(),
        ..MetaSheet::default()
    };
    let path = build_archive(temp.path(), "no-date", &sheet, "");

    let mut archive = PixelArchive::open(&path).unwrap();
    assert_matches!(
        archive.parse(&db),
        Err(PixelError::MetaFileParsing(message)) if message.contains("B4")
    );
}

#[test]
fn file_missing_from_archive_is_a_parsing_error() {
    let temp = tempfile::tempdir().unwrap();
    let db = Database::in_memory();
    seed_reference(&db);
    let sheet = MetaSheet {
        secondary_data: "ELSEWHERE.txt".to_string(),
        ..MetaSheet::default()
    };
    let path = build_archive(temp.path(), "missing-file", &sheet, "");

    let mut archive = PixelArchive::open(&path).unwrap();
    assert_matches!(
        archive.parse(&db),
        Err(PixelError::MetaFileParsing(message)) if message.contains("ELSEWHERE.txt")
    );
}

#[test]
fn unexpected_layout_is_a_format_error() {
    let temp = tempfile::tempdir().unwrap();
    let db = Database::in_memory();
    seed_reference(&db);

    let meta_path = temp.path().join("meta.xlsx");
    let mut workbook = rust_xlsxwriter::Workbook::new();
    workbook
        .add_worksheet()
        .write_string(0, 0, "Something else")
        .unwrap();
    workbook.save(&meta_path).unwrap();
    let path = temp.path().join("layout.zip");
    write_zip(&path, &[("meta.xlsx".to_string(), fs::read(&meta_path).unwrap())]);

    let mut archive = PixelArchive::open(&path).unwrap();
    assert_matches!(archive.parse(&db), Err(PixelError::MetaFileFormat(_)));
}
