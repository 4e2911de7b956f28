use std::fs;

use camino::Utf8Path;
use rust_xlsxwriter::{
    Color, DataValidation, Format, FormatAlign, FormatPattern, Formula, Note, Workbook,
    Worksheet, XlsxError,
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::db::Database;
use crate::domain::{DataSource, omics_area_label, strain_label};
use crate::error::PixelError;
use crate::fs_util::zip_entry_crcs;

pub const META_FILENAME: &str = "meta.xlsx";
pub const MAIN_SHEET: &str = "Import information for Pixel";
pub const VOCABULARY_SHEET: &str = "Vocabularies";

pub type Cell = (u32, u16);

pub const EXPERIMENT_TITLE: Cell = (0, 0);
pub const OMICS_AREA: Cell = (2, 1);
pub const COMPLETION_DATE: Cell = (3, 1);
pub const SUMMARY: Cell = (4, 1);
pub const RELEASE_DATE: Cell = (5, 1);
pub const DATA_SOURCE: Cell = (6, 1);
pub const ENTRY: Cell = (7, 1);

pub const ANALYSIS_TITLE: Cell = (9, 0);
pub const SECONDARY_DATA: Cell = (11, 1);
pub const NOTEBOOK: Cell = (12, 1);
pub const ANALYSIS_DESCRIPTION: Cell = (13, 1);
pub const ANALYSIS_DATE: Cell = (14, 1);

pub const DATASETS_TITLE: Cell = (16, 0);
pub const DATASETS_HEADER_ROW: u32 = 18;
pub const DATASETS_FIRST_ROW: u32 = 19;
pub const MAX_DATASET_ROWS: u32 = 1000;

const COMMENT_LAST_COL: u16 = 10;

/// Cell position as used by spreadsheet readers.
pub fn position(cell: Cell) -> (u32, u32) {
    (cell.0, cell.1 as u32)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateInfo {
    pub checksum: String,
    pub version: String,
}

struct Vocabularies {
    omics_areas: Vec<String>,
    omics_unit_types: Vec<String>,
    strains: Vec<String>,
}

struct Styles {
    section_title: Format,
    field: Format,
    required_field: Format,
    comment: Format,
    pixelset_header: Format,
}

impl Styles {
    fn new() -> Self {
        Self {
            section_title: Format::new()
                .set_bold()
                .set_font_size(18)
                .set_font_color(Color::Red),
            field: Format::new().set_font_color(Color::Blue),
            required_field: Format::new().set_bold().set_font_color(Color::Blue),
            comment: Format::new()
                .set_pattern(FormatPattern::Solid)
                .set_background_color(Color::RGB(0xDBE8D5))
                .set_align(FormatAlign::VerticalCenter)
                .set_text_wrap(),
            pixelset_header: Format::new()
                .set_pattern(FormatPattern::Solid)
                .set_background_color(Color::RGB(0xFFD779)),
        }
    }
}

fn spreadsheet(err: XlsxError) -> PixelError {
    PixelError::Spreadsheet(err.to_string())
}

pub fn generate_template(
    db: &Database,
    path: &Utf8Path,
    dataset_rows: u32,
) -> Result<TemplateInfo, PixelError> {
    if !(1..=MAX_DATASET_ROWS).contains(&dataset_rows) {
        return Err(PixelError::Spreadsheet(format!(
            "dataset rows must be between 1 and {MAX_DATASET_ROWS}, got {dataset_rows}"
        )));
    }
    let vocabularies = db.read(|tables| Vocabularies {
        omics_areas: tables
            .omics_areas_tree()
            .into_iter()
            .map(omics_area_label)
            .collect(),
        omics_unit_types: tables
            .omics_unit_types
            .iter()
            .map(|unit_type| unit_type.name.clone())
            .collect(),
        strains: tables
            .strains
            .iter()
            .filter_map(|strain| {
                tables
                    .species_by_id(strain.species)
                    .map(|species| strain_label(strain, species))
            })
            .collect(),
    });

    let mut workbook = Workbook::new();
    let styles = Styles::new();

    let worksheet = workbook.add_worksheet();
    worksheet.set_name(MAIN_SHEET).map_err(spreadsheet)?;
    write_experiment_section(worksheet, &styles)?;
    write_analysis_section(worksheet, &styles)?;
    write_datasets_section(worksheet, &styles)?;
    add_validations(worksheet, &vocabularies, dataset_rows)?;

    let vocabulary_sheet = workbook.add_worksheet();
    vocabulary_sheet
        .set_name(VOCABULARY_SHEET)
        .map_err(spreadsheet)?;
    for (col, values) in [
        &vocabularies.omics_areas,
        &vocabularies.omics_unit_types,
        &vocabularies.strains,
    ]
    .into_iter()
    .enumerate()
    {
        for (row, value) in values.iter().enumerate() {
            vocabulary_sheet
                .write_string(row as u32, col as u16, value)
                .map_err(spreadsheet)?;
        }
    }
    vocabulary_sheet.set_hidden(true);

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| PixelError::Filesystem(err.to_string()))?;
    }
    workbook.save(path.as_std_path()).map_err(spreadsheet)?;

    let info = fingerprint(path)?;
    debug!(
        checksum = %info.checksum,
        version = %info.version,
        "generated template {path}"
    );
    Ok(info)
}

/// Checksum of the file bytes and version of the workbook structure.
pub fn fingerprint(path: &Utf8Path) -> Result<TemplateInfo, PixelError> {
    let bytes =
        fs::read(path.as_std_path()).map_err(|err| PixelError::Filesystem(err.to_string()))?;
    let checksum = format!("{:x}", Sha256::digest(&bytes));

    let mut hasher = Sha256::new();
    for (name, crc) in zip_entry_crcs(path.as_std_path())? {
        if name.starts_with("docProps/") {
            continue;
        }
        hasher.update(format!("{name}:{crc:08x}\n").as_bytes());
    }
    let version = format!("{:x}", hasher.finalize());

    Ok(TemplateInfo { checksum, version })
}

fn write_comment(
    worksheet: &mut Worksheet,
    styles: &Styles,
    row: u32,
    text: &str,
) -> Result<(), PixelError> {
    worksheet
        .merge_range(row, 0, row, COMMENT_LAST_COL, text, &styles.comment)
        .map_err(spreadsheet)?;
    worksheet.set_row_height(row, 40).map_err(spreadsheet)?;
    Ok(())
}

fn write_title(
    worksheet: &mut Worksheet,
    styles: &Styles,
    cell: Cell,
    text: &str,
) -> Result<(), PixelError> {
    worksheet
        .write_string_with_format(cell.0, cell.1, text, &styles.section_title)
        .map_err(spreadsheet)?;
    worksheet.set_row_height(cell.0, 40).map_err(spreadsheet)?;
    Ok(())
}

fn write_label(
    worksheet: &mut Worksheet,
    format: &Format,
    cell: Cell,
    text: &str,
) -> Result<(), PixelError> {
    worksheet
        .write_string_with_format(cell.0, 0, text, format)
        .map_err(spreadsheet)?;
    Ok(())
}

fn write_experiment_section(
    worksheet: &mut Worksheet,
    styles: &Styles,
) -> Result<(), PixelError> {
    write_title(worksheet, styles, EXPERIMENT_TITLE, "Experiment")?;
    write_comment(
        worksheet,
        styles,
        1,
        "# This section describes the experimental conditions that were applied to obtain \
         the secondary datafile (see section 'Analysis' below). Note that these experiments \
         can be already published (in this situation a DOI is required) or not (in this \
         situation a laboratory has to be specified).",
    )?;
    write_label(worksheet, &styles.required_field, OMICS_AREA, "Omics area")?;
    write_label(worksheet, &styles.field, COMPLETION_DATE, "Completion date")?;
    write_label(worksheet, &styles.field, SUMMARY, "Summary")?;
    write_label(worksheet, &styles.field, RELEASE_DATE, "Release date")?;
    write_label(worksheet, &styles.field, DATA_SOURCE, "Data source")?;
    write_label(worksheet, &styles.field, ENTRY, "Reference (entry)")?;

    let note = Note::new("If this work has been published, we expect a DOI in this cell.")
        .set_author("Pixel's administrator");
    worksheet
        .insert_note(ENTRY.0, ENTRY.1, &note)
        .map_err(spreadsheet)?;
    Ok(())
}

fn write_analysis_section(worksheet: &mut Worksheet, styles: &Styles) -> Result<(), PixelError> {
    write_title(worksheet, styles, ANALYSIS_TITLE, "Analysis")?;
    write_comment(
        worksheet,
        styles,
        10,
        "# This section describes the data analyses that were performed on secondary \
         datasets to obtain pixel datasets. The secondary datafile has to be associated to \
         the pixel datasets during the import process.",
    )?;
    write_label(
        worksheet,
        &styles.required_field,
        SECONDARY_DATA,
        "Name of secondary data file",
    )?;
    write_label(worksheet, &styles.field, NOTEBOOK, "Name of notebook file")?;
    write_label(worksheet, &styles.field, ANALYSIS_DESCRIPTION, "Description")?;
    write_label(worksheet, &styles.field, ANALYSIS_DATE, "Date of the analysis")?;
    Ok(())
}

fn write_datasets_section(worksheet: &mut Worksheet, styles: &Styles) -> Result<(), PixelError> {
    write_title(worksheet, styles, DATASETS_TITLE, "Pixel datasets")?;
    write_comment(
        worksheet,
        styles,
        17,
        "# This section lists and describes each pixel datasets to be imported in the \
         system. These files have to be associated to the secondary datafile (and the \
         notebook datafile if available) during the import process. A specific comment can \
         be added for each set of Pixel to better describe their differences.",
    )?;

    for col in 0..=COMMENT_LAST_COL {
        worksheet
            .write_blank(DATASETS_HEADER_ROW, col, &styles.pixelset_header)
            .map_err(spreadsheet)?;
    }
    for (col, header) in ["File name", "Omics Unit type", "Strain (Species)", "Comment"]
        .into_iter()
        .enumerate()
    {
        worksheet
            .write_string_with_format(
                DATASETS_HEADER_ROW,
                col as u16,
                header,
                &styles.pixelset_header,
            )
            .map_err(spreadsheet)?;
    }

    worksheet.set_column_width(0, 40).map_err(spreadsheet)?;
    for col in 1..=3 {
        worksheet.set_column_width(col, 30).map_err(spreadsheet)?;
    }
    Ok(())
}

fn list_validation(
    column: char,
    len: usize,
    prompt: &str,
    error: &str,
) -> Result<DataValidation, PixelError> {
    let formula = Formula::new(format!("={VOCABULARY_SHEET}!${column}$1:${column}${len}"));
    DataValidation::new()
        .allow_list_formula(formula)
        .ignore_blank(false)
        .set_input_message(prompt)
        .map_err(spreadsheet)?
        .set_error_message(error)
        .map_err(spreadsheet)
}

fn add_validations(
    worksheet: &mut Worksheet,
    vocabularies: &Vocabularies,
    dataset_rows: u32,
) -> Result<(), PixelError> {
    let last_row = DATASETS_FIRST_ROW + dataset_rows - 1;

    if !vocabularies.omics_areas.is_empty() {
        let validation = list_validation(
            'A',
            vocabularies.omics_areas.len(),
            "Select an Omics Area",
            "Omics Area does not exists",
        )?;
        worksheet
            .add_data_validation(OMICS_AREA.0, OMICS_AREA.1, OMICS_AREA.0, OMICS_AREA.1, &validation)
            .map_err(spreadsheet)?;
    }

    let data_source = DataValidation::new()
        .allow_list_strings(&DataSource::CHOICES)
        .map_err(spreadsheet)?
        .ignore_blank(false)
        .set_input_message("Select a data source")
        .map_err(spreadsheet)?
        .set_error_message("Value not allowed")
        .map_err(spreadsheet)?;
    worksheet
        .add_data_validation(
            DATA_SOURCE.0,
            DATA_SOURCE.1,
            DATA_SOURCE.0,
            DATA_SOURCE.1,
            &data_source,
        )
        .map_err(spreadsheet)?;

    if !vocabularies.omics_unit_types.is_empty() {
        let validation = list_validation(
            'B',
            vocabularies.omics_unit_types.len(),
            "Select a type of omics unit",
            "Value not allowed",
        )?;
        worksheet
            .add_data_validation(DATASETS_FIRST_ROW, 1, last_row, 1, &validation)
            .map_err(spreadsheet)?;
    }

    if !vocabularies.strains.is_empty() {
        let validation = list_validation(
            'C',
            vocabularies.strains.len(),
            "Select a strain",
            "Value not allowed",
        )?;
        worksheet
            .add_data_validation(DATASETS_FIRST_ROW, 2, last_row, 2, &validation)
            .map_err(spreadsheet)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use calamine::{Data, Reader, Xlsx, open_workbook};
    use camino::Utf8PathBuf;

    use super::*;

    fn seeded_db() -> Database {
        let db = Database::in_memory();
        db.transaction(|tables| {
            let species = tables.get_or_create_species("Candida glabrata");
            tables.get_or_create_strain("CBS138", species.id);
            tables.get_or_create_omics_unit_type("protein");
            let root = tables.get_or_create_omics_area("Proteomics", None)?;
            tables.get_or_create_omics_area("Label free", Some(root.id))?;
            Ok(())
        })
        .unwrap();
        db
    }

    #[test]
    fn template_has_fixed_layout() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join(META_FILENAME)).unwrap();
        let db = seeded_db();

        let info = generate_template(&db, &path, 11).unwrap();
        assert_eq!(info.checksum.len(), 64);
        assert_eq!(info.version.len(), 64);

        let mut workbook: Xlsx<_> = open_workbook(path.as_std_path()).unwrap();
        let main = workbook.worksheet_range(MAIN_SHEET).unwrap();
        assert_eq!(
            main.get_value(position(EXPERIMENT_TITLE)),
            Some(&Data::String("Experiment".to_string()))
        );
        assert_eq!(
            main.get_value(position(ANALYSIS_TITLE)),
            Some(&Data::String("Analysis".to_string()))
        );
        assert_eq!(
            main.get_value((DATASETS_HEADER_ROW, 2)),
            Some(&Data::String("Strain (Species)".to_string()))
        );

        let vocabularies = workbook.worksheet_range(VOCABULARY_SHEET).unwrap();
        assert_eq!(
            vocabularies.get_value((1, 0)),
            Some(&Data::String("— Label free".to_string()))
        );
        assert_eq!(
            vocabularies.get_value((0, 2)),
            Some(&Data::String("CBS138 (Candida glabrata)".to_string()))
        );
    }

    #[test]
    fn version_tracks_structure_not_timestamps() {
        let temp = tempfile::tempdir().unwrap();
        let db = seeded_db();
        let first = Utf8PathBuf::from_path_buf(temp.path().join("a.xlsx")).unwrap();
        let second = Utf8PathBuf::from_path_buf(temp.path().join("b.xlsx")).unwrap();
        let third = Utf8PathBuf::from_path_buf(temp.path().join("c.xlsx")).unwrap();

        let a = generate_template(&db, &first, 11).unwrap();
        let b = generate_template(&db, &second, 11).unwrap();
        assert_eq!(a.version, b.version);

        db.transaction(|tables| Ok(tables.get_or_create_omics_unit_type("promoter")))
            .unwrap();
        let c = generate_template(&db, &third, 11).unwrap();
        assert_ne!(a.version, c.version);
    }

    #[test]
    fn dataset_rows_out_of_range_are_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join(META_FILENAME)).unwrap();
        let db = seeded_db();

        for rows in [0, MAX_DATASET_ROWS + 1, u32::MAX] {
            let result = generate_template(&db, &path, rows);
            assert!(matches!(result, Err(PixelError::Spreadsheet(_))), "{rows} rows");
        }
        assert!(!path.as_std_path().exists());
        assert!(generate_template(&db, &path, MAX_DATASET_ROWS).is_ok());
    }
}
