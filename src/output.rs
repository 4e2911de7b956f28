use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    EntriesResult, ExportResult, ProcessDetail, ProcessListResult, ProcessSummary, SeedResult,
    TemplateResult,
};
use crate::fixtures::FixtureSummary;

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_seed(result: &SeedResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_entries(result: &EntriesResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_process(result: &ProcessSummary) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_detail(result: &ProcessDetail) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_list(result: &ProcessListResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_template(result: &TemplateResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_export(result: &ExportResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_fixtures(result: &FixtureSummary) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
