use std::collections::HashMap;
use std::io::{Cursor, Write};

use serde::Serialize;
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

use crate::db::{Database, Tables};
use crate::domain::{PixelSet, PixelSetId};
use crate::error::PixelError;

pub const EXPORT_META_FILENAME: &str = "meta.yaml";
pub const EXPORT_PIXELS_FILENAME: &str = "pixels.csv";
pub const OMICS_UNIT_COLUMN: &str = "Omics Unit";
const MISSING: &str = "NA";

#[derive(Debug, Serialize)]
struct ExportMeta {
    pixelsets: Vec<ExportedPixelSet>,
}

#[derive(Debug, Serialize)]
struct ExportedPixelSet {
    pixelset: String,
    description: String,
    columns: [usize; 2],
}

fn format_value(value: Option<f64>) -> String {
    value
        .map(|value| value.to_string())
        .unwrap_or_else(|| MISSING.to_string())
}

fn pixel_sets<'a>(tables: &'a Tables, ids: &[PixelSetId]) -> Result<Vec<&'a PixelSet>, PixelError> {
    ids.iter()
        .map(|id| {
            tables
                .pixel_set(*id)
                .ok_or_else(|| PixelError::RecordNotFound(format!("pixel set {id}")))
        })
        .collect()
}

/// Zip archive holding `meta.yaml` and a wide `pixels.csv` with one value and
/// quality score column pair per pixel set.
pub fn export_pixelsets(db: &Database, ids: &[PixelSetId]) -> Result<Vec<u8>, PixelError> {
    db.read(|tables| {
        let sets = pixel_sets(tables, ids)?;

        let meta = ExportMeta {
            pixelsets: sets
                .iter()
                .enumerate()
                .map(|(index, set)| ExportedPixelSet {
                    pixelset: set.id.short(),
                    description: set.description.clone(),
                    columns: [index * 2 + 1, index * 2 + 2],
                })
                .collect(),
        };
        let meta =
            serde_yaml::to_string(&meta).map_err(|err| PixelError::Export(err.to_string()))?;

        let mut order: Vec<String> = Vec::new();
        let mut rows: HashMap<String, Vec<(Option<f64>, Option<f64>)>> = HashMap::new();
        for (index, set) in sets.iter().enumerate() {
            for pixel in tables.pixels.iter().filter(|pixel| pixel.pixel_set == set.id) {
                let identifier = tables
                    .reference_identifier(pixel.omics_unit)
                    .ok_or_else(|| {
                        PixelError::RecordNotFound(format!("omics unit {}", pixel.omics_unit))
                    })?
                    .to_string();
                let row = rows.entry(identifier.clone()).or_insert_with(|| {
                    order.push(identifier);
                    vec![(None, None); sets.len()]
                });
                row[index] = (Some(pixel.value), pixel.quality_score);
            }
        }

        let mut writer = csv::Writer::from_writer(Vec::new());
        let mut header = vec![OMICS_UNIT_COLUMN.to_string()];
        for set in &sets {
            header.push(format!("Value {}", set.id.short()));
            header.push(format!("QS {}", set.id.short()));
        }
        writer
            .write_record(&header)
            .map_err(|err| PixelError::Export(err.to_string()))?;
        for identifier in &order {
            let mut record = vec![identifier.clone()];
            for (value, score) in rows.get(identifier).into_iter().flatten() {
                record.push(format_value(*value));
                record.push(format_value(*score));
            }
            writer
                .write_record(&record)
                .map_err(|err| PixelError::Export(err.to_string()))?;
        }
        let pixels = writer
            .into_inner()
            .map_err(|err| PixelError::Export(err.to_string()))?;

        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        zip.start_file(EXPORT_META_FILENAME, options)
            .map_err(|err| PixelError::Export(err.to_string()))?;
        zip.write_all(meta.as_bytes())
            .map_err(|err| PixelError::Export(err.to_string()))?;
        zip.start_file(EXPORT_PIXELS_FILENAME, options)
            .map_err(|err| PixelError::Export(err.to_string()))?;
        zip.write_all(&pixels)
            .map_err(|err| PixelError::Export(err.to_string()))?;
        let cursor = zip
            .finish()
            .map_err(|err| PixelError::Export(err.to_string()))?;
        Ok(cursor.into_inner())
    })
}

/// Writes the pixels of one pixel set as `Omics Unit,Value,QS`. An empty
/// `omics_units` list selects every pixel.
pub fn export_pixels<W: Write>(
    db: &Database,
    id: PixelSetId,
    omics_units: &[String],
    output: W,
) -> Result<(), PixelError> {
    db.read(|tables| {
        pixel_sets(tables, &[id])?;

        let mut writer = csv::Writer::from_writer(output);
        writer
            .write_record([OMICS_UNIT_COLUMN, "Value", "QS"])
            .map_err(|err| PixelError::Export(err.to_string()))?;
        for pixel in tables.pixels.iter().filter(|pixel| pixel.pixel_set == id) {
            let Some(identifier) = tables.reference_identifier(pixel.omics_unit) else {
                continue;
            };
            if !omics_units.is_empty() && !omics_units.iter().any(|unit| unit == identifier) {
                continue;
            }
            writer
                .write_record([
                    identifier.to_string(),
                    pixel.value.to_string(),
                    format_value(pixel.quality_score),
                ])
                .map_err(|err| PixelError::Export(err.to_string()))?;
        }
        writer
            .flush()
            .map_err(|err| PixelError::Export(err.to_string()))
    })
}
