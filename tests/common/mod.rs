#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use pixel::db::Database;
use pixel::domain::{OmicsArea, OmicsUnitType, Strain};
use pixel::template::{
    ANALYSIS_DATE, ANALYSIS_DESCRIPTION, ANALYSIS_TITLE, COMPLETION_DATE, Cell, DATA_SOURCE,
    DATASETS_FIRST_ROW, DATASETS_HEADER_ROW, DATASETS_TITLE, ENTRY, EXPERIMENT_TITLE, MAIN_SHEET,
    META_FILENAME, NOTEBOOK, OMICS_AREA, RELEASE_DATE, SECONDARY_DATA, SUMMARY,
};
use rust_xlsxwriter::Workbook;
use zip::write::SimpleFileOptions;

pub const SECONDARY_DATA_FILE: &str = "SECONDARY_DATA.txt";
pub const NOTEBOOK_FILE: &str = "NOTEBOOK.ipynb";

pub struct Reference {
    pub area: OmicsArea,
    pub unit_type: OmicsUnitType,
    pub strain: Strain,
}

pub fn seed_reference(db: &Database) -> Reference {
    db.transaction(|tables| {
        let species = tables.get_or_create_species("Candida glabrata");
        let strain = tables.get_or_create_strain("CBS138", species.id);
        let unit_type = tables.get_or_create_omics_unit_type("protein");
        let root = tables.get_or_create_omics_area("Proteomics", None)?;
        let area = tables.get_or_create_omics_area("Label free", Some(root.id))?;
        tables.get_or_create_repository("DOI");
        tables.get_or_create_repository("PARTNERS");
        Ok(Reference {
            area,
            unit_type,
            strain,
        })
    })
    .unwrap()
}

pub fn load_entries(db: &Database, identifiers: &[String]) {
    db.transaction(|tables| {
        let repository = tables.get_or_create_repository("CGD");
        for identifier in identifiers {
            tables.get_or_create_entry(identifier, repository.id);
        }
        Ok(())
    })
    .unwrap();
}

pub struct DatasetRow {
    pub file: String,
    pub unit_type: String,
    pub strain: String,
    pub comment: String,
}

pub struct MetaSheet {
    pub omics_area: String,
    pub completion_date: String,
    pub summary: String,
    pub release_date: String,
    pub data_source: String,
    pub entry: String,
    pub secondary_data: String,
    pub notebook: Option<String>,
    pub description: String,
    pub date: String,
    pub datasets: Vec<DatasetRow>,
}

impl Default for MetaSheet {
    fn default() -> Self {
        Self {
            omics_area: "— Label free".to_string(),
            completion_date: "2017-10-17".to_string(),
            summary: "Candida glabrata proteome under fluconazole".to_string(),
            release_date: "2017-10-20".to_string(),
            data_source: "Published".to_string(),
            entry: "10.1093/nar/gkw1184".to_string(),
            secondary_data: SECONDARY_DATA_FILE.to_string(),
            notebook: Some(NOTEBOOK_FILE.to_string()),
            description: "Label free quantification".to_string(),
            date: "2017-10-21".to_string(),
            datasets: vec![DatasetRow {
                file: "1.txt".to_string(),
                unit_type: "protein".to_string(),
                strain: "CBS138 (Candida glabrata)".to_string(),
                comment: "First replicate".to_string(),
            }],
        }
    }
}

pub fn write_meta(path: &Path, sheet: &MetaSheet) {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(MAIN_SHEET).unwrap();

    let mut put = |cell: Cell, value: &str| {
        if !value.is_empty() {
            worksheet.write_string(cell.0, cell.1, value).unwrap();
        }
    };
    put(EXPERIMENT_TITLE, "Experiment");
    put(OMICS_AREA, &sheet.omics_area);
    put(COMPLETION_DATE, &sheet.completion_date);
    put(SUMMARY, &sheet.summary);
    put(RELEASE_DATE, &sheet.release_date);
    put(DATA_SOURCE, &sheet.data_source);
    put(ENTRY, &sheet.entry);
    put(ANALYSIS_TITLE, "Analysis");
    put(SECONDARY_DATA, &sheet.secondary_data);
    put(NOTEBOOK, sheet.notebook.as_deref().unwrap_or_default());
    put(ANALYSIS_DESCRIPTION, &sheet.description);
    put(ANALYSIS_DATE, &sheet.date);
    put(DATASETS_TITLE, "Pixel datasets");
    for (column, header) in ["File name", "Omics Unit type", "Strain (Species)", "Comment"]
        .iter()
        .enumerate()
    {
        put((DATASETS_HEADER_ROW, column as u16), header);
    }
    for (index, dataset) in sheet.datasets.iter().enumerate() {
        let row = DATASETS_FIRST_ROW + index as u32;
        put((row, 0), &dataset.file);
        put((row, 1), &dataset.unit_type);
        put((row, 2), &dataset.strain);
        put((row, 3), &dataset.comment);
    }

    workbook.save(path).unwrap();
}

pub fn write_zip(path: &Path, entries: &[(String, Vec<u8>)]) {
    let file = fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    for (name, content) in entries {
        writer
            .start_file(name.as_str(), SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap();
}

/// Zip with `meta.xlsx`, the analysis files and one pixel file per dataset,
/// all under a `submission/` folder.
pub fn build_archive(dir: &Path, name: &str, sheet: &MetaSheet, pixels: &str) -> PathBuf {
    let meta_path = dir.join(format!("{name}-{META_FILENAME}"));
    write_meta(&meta_path, sheet);

    let mut entries = vec![
        (
            format!("submission/{META_FILENAME}"),
            fs::read(&meta_path).unwrap(),
        ),
        (
            format!("submission/{SECONDARY_DATA_FILE}"),
            b"secondary data".to_vec(),
        ),
        (
            format!("submission/{NOTEBOOK_FILE}"),
            b"{\"cells\": []}".to_vec(),
        ),
    ];
    for dataset in &sheet.datasets {
        entries.push((
            format!("submission/{}", dataset.file),
            pixels.as_bytes().to_vec(),
        ));
    }

    let path = dir.join(format!("{name}.zip"));
    write_zip(&path, &entries);
    path
}

pub struct GeneratedPixels {
    pub content: String,
    pub clean: Vec<String>,
}

/// Whitespace-delimited pixel file with `clean` complete rows, `na` rows with
/// a missing value and `fuzzy` rows with ambiguous identifiers.
pub fn generate_pixels(clean: usize, na: usize, fuzzy: usize) -> GeneratedPixels {
    let mut content = String::from("Gene Value Quality_score\n");
    let mut identifiers = Vec::with_capacity(clean);
    for index in 0..clean {
        let identifier = format!("CAGL0A{index:05}g");
        let value = (index % 200) as f64 / 10.0 - 10.0;
        let score = (index % 100) as f64 / 100.0;
        content.push_str(&format!("{identifier} {value} {score}\n"));
        identifiers.push(identifier);
    }
    for index in 0..na {
        if index % 2 == 0 {
            content.push_str(&format!("CAGL0B{index:05}g NA 0.5\n"));
        } else {
            content.push_str(&format!("CAGL0B{index:05}g 1.25\n"));
        }
    }
    for index in 0..fuzzy {
        content.push_str(&format!(
            "CAGL0C{index:05}g;CAGL0C{:05}g 0.75 0.25\n",
            index + 1
        ));
    }
    GeneratedPixels {
        content,
        clean: identifiers,
    }
}
