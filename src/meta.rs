use std::path::{Path, PathBuf};

use calamine::{Data, DataType, Range, Reader, Xlsx, open_workbook};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::Tables;
use crate::domain::{
    DataSource, OmicsArea, OmicsAreaId, OmicsUnitType, OmicsUnitTypeId, Strain, StrainId,
};
use crate::error::PixelError;
use crate::template::{
    ANALYSIS_DATE, ANALYSIS_DESCRIPTION, ANALYSIS_TITLE, COMPLETION_DATE, Cell, DATA_SOURCE,
    DATASETS_FIRST_ROW, DATASETS_TITLE, ENTRY, EXPERIMENT_TITLE, MAIN_SHEET, NOTEBOOK,
    OMICS_AREA, RELEASE_DATE, SECONDARY_DATA, SUMMARY, position,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentMeta {
    pub omics_area: OmicsArea,
    pub completion_date: NaiveDate,
    pub summary: String,
    pub release_date: NaiveDate,
    pub data_source: DataSource,
    pub entry: String,
    pub repository: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisMeta {
    pub secondary_data_path: PathBuf,
    pub notebook_path: Option<PathBuf>,
    pub description: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatasetMeta {
    pub path: PathBuf,
    pub omics_unit_type: OmicsUnitType,
    pub strain: Strain,
    pub comment: String,
}

/// Metadata of a submitted archive, bound to reference records and to the
/// files of one extraction directory.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMeta {
    pub experiment: ExperimentMeta,
    pub analysis: AnalysisMeta,
    pub datasets: Vec<DatasetMeta>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedExperiment {
    pub omics_area: OmicsAreaId,
    pub completion_date: String,
    pub summary: String,
    pub release_date: String,
    pub data_source: DataSource,
    pub entry: String,
    pub repository: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedAnalysis {
    pub secondary_data_path: String,
    pub notebook_path: Option<String>,
    pub description: String,
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedDataset {
    pub path: String,
    pub omics_unit_type: OmicsUnitTypeId,
    pub strain: StrainId,
    pub comment: String,
}

/// Primitive form of [`ParsedMeta`]: record ids, ISO dates and paths
/// relative to the archive root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedMeta {
    pub experiment: SerializedExperiment,
    pub analysis: SerializedAnalysis,
    pub datasets: Vec<SerializedDataset>,
}

impl ParsedMeta {
    pub fn serialize(&self, root: &Path) -> Result<SerializedMeta, PixelError> {
        let relative = |path: &Path| -> Result<String, PixelError> {
            path.strip_prefix(root)
                .map(|rel| rel.to_string_lossy().replace('\\', "/"))
                .map_err(|_| {
                    PixelError::MetaFileParsing(format!(
                        "{} is outside of the archive",
                        path.display()
                    ))
                })
        };

        Ok(SerializedMeta {
            experiment: SerializedExperiment {
                omics_area: self.experiment.omics_area.id,
                completion_date: self.experiment.completion_date.to_string(),
                summary: self.experiment.summary.clone(),
                release_date: self.experiment.release_date.to_string(),
                data_source: self.experiment.data_source,
                entry: self.experiment.entry.clone(),
                repository: self.experiment.repository.clone(),
            },
            analysis: SerializedAnalysis {
                secondary_data_path: relative(&self.analysis.secondary_data_path)?,
                notebook_path: self
                    .analysis
                    .notebook_path
                    .as_deref()
                    .map(relative)
                    .transpose()?,
                description: self.analysis.description.clone(),
                date: self.analysis.date.to_string(),
            },
            datasets: self
                .datasets
                .iter()
                .map(|dataset| {
                    Ok(SerializedDataset {
                        path: relative(&dataset.path)?,
                        omics_unit_type: dataset.omics_unit_type.id,
                        strain: dataset.strain.id,
                        comment: dataset.comment.clone(),
                    })
                })
                .collect::<Result<Vec<_>, PixelError>>()?,
        })
    }
}

impl SerializedMeta {
    pub fn resolve(&self, tables: &Tables, root: &Path) -> Result<ParsedMeta, PixelError> {
        let date = |value: &str| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .map_err(|_| PixelError::MetaFileParsing(format!("invalid date {value}")))
        };
        let file = |relative: &str| {
            let path = root.join(relative);
            if path.is_file() {
                Ok(path)
            } else {
                Err(PixelError::MetaFileParsing(format!(
                    "{relative} not found in archive"
                )))
            }
        };

        let omics_area = tables
            .omics_area(self.experiment.omics_area)
            .cloned()
            .ok_or_else(|| {
                PixelError::RecordNotFound(format!("omics area {}", self.experiment.omics_area))
            })?;

        let datasets = self
            .datasets
            .iter()
            .map(|dataset| {
                Ok(DatasetMeta {
                    path: file(&dataset.path)?,
                    omics_unit_type: tables
                        .omics_unit_type(dataset.omics_unit_type)
                        .cloned()
                        .ok_or_else(|| {
                            PixelError::RecordNotFound(format!(
                                "omics unit type {}",
                                dataset.omics_unit_type
                            ))
                        })?,
                    strain: tables.strain(dataset.strain).cloned().ok_or_else(|| {
                        PixelError::RecordNotFound(format!("strain {}", dataset.strain))
                    })?,
                    comment: dataset.comment.clone(),
                })
            })
            .collect::<Result<Vec<_>, PixelError>>()?;

        Ok(ParsedMeta {
            experiment: ExperimentMeta {
                omics_area,
                completion_date: date(&self.experiment.completion_date)?,
                summary: self.experiment.summary.clone(),
                release_date: date(&self.experiment.release_date)?,
                data_source: self.experiment.data_source,
                entry: self.experiment.entry.clone(),
                repository: self.experiment.repository.clone(),
            },
            analysis: AnalysisMeta {
                secondary_data_path: file(&self.analysis.secondary_data_path)?,
                notebook_path: self
                    .analysis
                    .notebook_path
                    .as_deref()
                    .map(file)
                    .transpose()?,
                description: self.analysis.description.clone(),
                date: date(&self.analysis.date)?,
            },
            datasets,
        })
    }
}

/// Parses a `meta.xlsx` workbook. File names are looked up among `files`.
pub fn parse_template(
    meta_path: &Path,
    files: &[PathBuf],
    tables: &Tables,
) -> Result<ParsedMeta, PixelError> {
    let mut workbook: Xlsx<_> = open_workbook(meta_path)
        .map_err(|err| PixelError::MetaFileFormat(format!("cannot open workbook: {err}")))?;

    let range = match workbook.worksheet_range(MAIN_SHEET) {
        Ok(range) => range,
        Err(_) => workbook
            .worksheet_range_at(0)
            .ok_or_else(|| PixelError::MetaFileFormat("workbook has no sheet".to_string()))?
            .map_err(|err| PixelError::MetaFileFormat(err.to_string()))?,
    };

    expect_title(&range, EXPERIMENT_TITLE, "Experiment")?;
    expect_title(&range, ANALYSIS_TITLE, "Analysis")?;
    expect_title(&range, DATASETS_TITLE, "Pixel datasets")?;

    let data_source: DataSource = required_text(&range, DATA_SOURCE, "Data source")?.parse()?;
    let experiment = ExperimentMeta {
        omics_area: resolve_omics_area(
            tables,
            &required_text(&range, OMICS_AREA, "Omics area")?,
        )?,
        completion_date: required_date(&range, COMPLETION_DATE, "Completion date")?,
        summary: text(&range, SUMMARY).unwrap_or_default(),
        release_date: required_date(&range, RELEASE_DATE, "Release date")?,
        data_source,
        entry: required_text(&range, ENTRY, "Reference (entry)")?,
        repository: data_source.repository_name().to_string(),
    };

    let secondary_data = required_text(&range, SECONDARY_DATA, "Name of secondary data file")?;
    let analysis = AnalysisMeta {
        secondary_data_path: find_file(files, &secondary_data)?,
        notebook_path: text(&range, NOTEBOOK)
            .map(|name| find_file(files, &name))
            .transpose()?,
        description: text(&range, ANALYSIS_DESCRIPTION).unwrap_or_default(),
        date: required_date(&range, ANALYSIS_DATE, "Date of the analysis")?,
    };

    let mut datasets = Vec::new();
    let last_row = range.end().map(|(row, _)| row).unwrap_or(0);
    for row in DATASETS_FIRST_ROW..=last_row {
        let Some(file_name) = text(&range, (row, 0)) else {
            break;
        };
        let unit_type = required_text(&range, (row, 1), "Omics Unit type")?;
        let strain = required_text(&range, (row, 2), "Strain (Species)")?;
        datasets.push(DatasetMeta {
            path: find_file(files, &file_name)?,
            omics_unit_type: resolve_omics_unit_type(tables, &unit_type)?,
            strain: resolve_strain(tables, &strain)?,
            comment: text(&range, (row, 3)).unwrap_or_default(),
        });
    }
    if datasets.is_empty() {
        return Err(PixelError::MetaFileParsing(
            "no pixel dataset is listed".to_string(),
        ));
    }
    debug!("parsed {} with {} datasets", meta_path.display(), datasets.len());

    Ok(ParsedMeta {
        experiment,
        analysis,
        datasets,
    })
}

fn cell_name(cell: Cell) -> String {
    let column = (b'A' + cell.1 as u8) as char;
    format!("{column}{}", cell.0 + 1)
}

fn cell_text(data: &Data) -> Option<String> {
    let value = match data {
        Data::String(value) | Data::DateTimeIso(value) | Data::DurationIso(value) => {
            value.trim().to_string()
        }
        Data::Int(value) => value.to_string(),
        Data::Float(value) if value.fract() == 0.0 => format!("{}", *value as i64),
        Data::Float(value) => value.to_string(),
        Data::Bool(value) => value.to_string(),
        Data::DateTime(value) => value.as_f64().to_string(),
        Data::Error(_) | Data::Empty => return None,
    };
    (!value.is_empty()).then_some(value)
}

fn text(range: &Range<Data>, cell: Cell) -> Option<String> {
    range.get_value(position(cell)).and_then(cell_text)
}

fn required_text(range: &Range<Data>, cell: Cell, label: &str) -> Result<String, PixelError> {
    text(range, cell).ok_or_else(|| {
        PixelError::MetaFileParsing(format!("{label} ({}) is required", cell_name(cell)))
    })
}

fn parse_date_text(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    ["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
        .or_else(|| {
            value
                .get(..10)
                .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
        })
}

fn required_date(range: &Range<Data>, cell: Cell, label: &str) -> Result<NaiveDate, PixelError> {
    let data = range.get_value(position(cell)).unwrap_or(&Data::Empty);
    let parsed = match data {
        Data::Empty => {
            return Err(PixelError::MetaFileParsing(format!(
                "{label} ({}) is required",
                cell_name(cell)
            )));
        }
        Data::String(value) | Data::DateTimeIso(value) => parse_date_text(value),
        other => other.as_date(),
    };
    parsed.ok_or_else(|| {
        PixelError::MetaFileParsing(format!(
            "{label} ({}) is not a valid date",
            cell_name(cell)
        ))
    })
}

fn expect_title(range: &Range<Data>, cell: Cell, expected: &str) -> Result<(), PixelError> {
    match text(range, cell) {
        Some(found) if found == expected => Ok(()),
        found => Err(PixelError::MetaFileFormat(format!(
            "expected '{expected}' in {}, found '{}'",
            cell_name(cell),
            found.unwrap_or_default()
        ))),
    }
}

fn find_file(files: &[PathBuf], name: &str) -> Result<PathBuf, PixelError> {
    let relative = Path::new(name.trim());
    files
        .iter()
        .find(|file| file.is_file() && file.ends_with(relative))
        .cloned()
        .ok_or_else(|| PixelError::MetaFileParsing(format!("{name} not found in archive")))
}

fn resolve_omics_area(tables: &Tables, label: &str) -> Result<OmicsArea, PixelError> {
    let name = label.trim_start_matches(['—', ' ']).trim();
    tables
        .omics_areas
        .iter()
        .find(|area| area.name == name)
        .cloned()
        .ok_or_else(|| PixelError::MetaFileParsing(format!("unknown omics area: {name}")))
}

fn resolve_omics_unit_type(tables: &Tables, name: &str) -> Result<OmicsUnitType, PixelError> {
    tables
        .omics_unit_types
        .iter()
        .find(|unit_type| unit_type.name == name)
        .cloned()
        .ok_or_else(|| PixelError::MetaFileParsing(format!("unknown omics unit type: {name}")))
}

fn resolve_strain(tables: &Tables, label: &str) -> Result<Strain, PixelError> {
    let (name, species) = match label.rsplit_once(" (") {
        Some((name, rest)) => (name.trim(), Some(rest.trim_end_matches(')').trim())),
        None => (label.trim(), None),
    };
    tables
        .strains
        .iter()
        .find(|strain| {
            strain.name == name
                && species
                    .map(|species| {
                        tables
                            .species_by_id(strain.species)
                            .map(|found| found.name == species)
                            .unwrap_or(false)
                    })
                    .unwrap_or(true)
        })
        .cloned()
        .ok_or_else(|| PixelError::MetaFileParsing(format!("unknown strain: {label}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_names_are_a1_notation() {
        assert_eq!(cell_name(OMICS_AREA), "B3");
        assert_eq!(cell_name(SECONDARY_DATA), "B12");
        assert_eq!(cell_name((DATASETS_FIRST_ROW, 0)), "A20");
    }

    #[test]
    fn numeric_cells_read_as_text() {
        assert_eq!(cell_text(&Data::Float(29102.0)), Some("29102".to_string()));
        assert_eq!(cell_text(&Data::String("  ".to_string())), None);
        assert_eq!(cell_text(&Data::Empty), None);
    }

    #[test]
    fn date_text_formats() {
        let expected = NaiveDate::from_ymd_opt(2015, 1, 1).unwrap();
        assert_eq!(parse_date_text("2015-01-01"), Some(expected));
        assert_eq!(parse_date_text("01/01/2015"), Some(expected));
        assert_eq!(parse_date_text("2015-01-01T00:00:00"), Some(expected));
        assert_eq!(parse_date_text("yesterday"), None);
    }

    #[test]
    fn strain_labels_resolve_with_species() {
        let mut tables = Tables::default();
        let glabrata = tables.get_or_create_species("Candida glabrata");
        let albicans = tables.get_or_create_species("Candida albicans");
        let wanted = tables.get_or_create_strain("deltaHTU", glabrata.id);
        tables.get_or_create_strain("deltaHTU", albicans.id);

        let found = resolve_strain(&tables, "deltaHTU (Candida glabrata)").unwrap();
        assert_eq!(found.id, wanted.id);
        assert!(resolve_strain(&tables, "CBS138 (Candida glabrata)").is_err());
    }

    #[test]
    fn omics_area_labels_strip_depth_prefix() {
        let mut tables = Tables::default();
        let root = tables.get_or_create_omics_area("Proteomics", None).unwrap();
        let child = tables
            .get_or_create_omics_area("Label free", Some(root.id))
            .unwrap();
        let found = resolve_omics_area(&tables, "— Label free").unwrap();
        assert_eq!(found.id, child.id);
    }
}
