use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::info;

use crate::db::{AnalysisKey, Database, ExperimentKey};
use crate::domain::{Pixel, PixelId, PixelSet, PixelSetId};
use crate::error::PixelError;

pub const DEFAULT_EXPERIMENTS: usize = 1;
pub const DEFAULT_PIXEL_SETS: usize = 10;
pub const DEFAULT_PIXELS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixtureOptions {
    pub experiments: usize,
    pub pixel_sets: usize,
    pub pixels: usize,
}

impl Default for FixtureOptions {
    fn default() -> Self {
        Self {
            experiments: DEFAULT_EXPERIMENTS,
            pixel_sets: DEFAULT_PIXEL_SETS,
            pixels: DEFAULT_PIXELS,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FixtureSummary {
    pub experiments: usize,
    pub analyses: usize,
    pub pixel_sets: usize,
    pub pixels: usize,
}

/// Generates development data. Refused unless `debug` is enabled.
pub fn make_development_fixtures(
    db: &Database,
    debug: bool,
    options: FixtureOptions,
) -> Result<FixtureSummary, PixelError> {
    if !debug {
        return Err(PixelError::NotDebug);
    }

    let summary = db.transaction(|tables| {
        let species = tables.get_or_create_species("Candida glabrata");
        let strain = tables.get_or_create_strain("CBS138", species.id);
        let unit_type = tables.get_or_create_omics_unit_type("protein");
        let area = tables.get_or_create_omics_area("Proteomics", None)?;
        let repository = tables.get_or_create_repository("CGD");
        let pixeler = tables.get_or_create_pixeler("fixtures");
        let date = NaiveDate::from_ymd_opt(2017, 1, 1)
            .ok_or_else(|| PixelError::Filesystem("invalid fixture date".to_string()))?;

        let units: Vec<_> = (0..options.pixels)
            .map(|index| {
                let entry =
                    tables.get_or_create_entry(&format!("FIXTURE{index:05}g"), repository.id);
                tables
                    .get_or_create_omics_unit(entry.id, strain.id, unit_type.id)
                    .id
            })
            .collect();

        let mut summary = FixtureSummary::default();
        for experiment_index in 0..options.experiments {
            let description = format!("Development experiment #{}", experiment_index + 1);
            let (experiment, _) = tables.get_or_create_experiment(&ExperimentKey {
                description: &description,
                omics_area: area.id,
                completed_at: date,
                released_at: date,
            });
            let analysis_description = format!("Development analysis #{}", experiment_index + 1);
            let (analysis, _) = tables.get_or_create_analysis(&AnalysisKey {
                description: &analysis_description,
                experiment: experiment.id,
                pixeler: pixeler.id,
                completed_at: date,
            });
            tables.analysis_mut(analysis.id)?.secondary_data = "fixtures/secondary_data.txt".into();
            summary.experiments += 1;
            summary.analyses += 1;

            for set_index in 0..options.pixel_sets {
                let pixel_set = PixelSet {
                    id: PixelSetId::new(),
                    description: format!("Development pixel set #{}", set_index + 1),
                    analysis: analysis.id,
                    pixels_file: "fixtures/pixels.txt".into(),
                    created_at: Utc::now(),
                };
                for (unit_index, unit) in units.iter().enumerate() {
                    let seed = experiment_index * 7919 + set_index * 104_729 + unit_index * 31;
                    tables.pixels.push(Pixel {
                        id: PixelId::new(),
                        value: (seed % 2000) as f64 / 100.0 - 10.0,
                        quality_score: Some((seed % 97) as f64 / 97.0),
                        omics_unit: *unit,
                        pixel_set: pixel_set.id,
                    });
                    summary.pixels += 1;
                }
                tables.pixel_sets.push(pixel_set);
                summary.pixel_sets += 1;
            }
        }
        Ok(summary)
    })?;

    info!(
        "generated {} pixel sets with {} pixels",
        summary.pixel_sets, summary.pixels
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn refused_outside_debug() {
        let db = Database::in_memory();
        assert_matches!(
            make_development_fixtures(&db, false, FixtureOptions::default()),
            Err(PixelError::NotDebug)
        );
        assert!(db.read(|tables| tables.pixel_sets.is_empty()));
    }

    #[test]
    fn generates_requested_amounts() {
        let db = Database::in_memory();
        let options = FixtureOptions {
            experiments: 2,
            pixel_sets: 3,
            pixels: 5,
        };
        let summary = make_development_fixtures(&db, true, options).unwrap();
        assert_eq!(summary.pixel_sets, 6);
        assert_eq!(summary.pixels, 30);
        db.read(|tables| {
            assert_eq!(tables.experiments.len(), 2);
            assert_eq!(tables.omics_units.len(), 5);
            assert_eq!(tables.pixels.len(), 30);
        });
    }
}
