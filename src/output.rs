use std::io::{self, Write};

use serde::Serialize;

use crate::app::AccountReport;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

#[derive(Debug, Serialize)]
struct RunSummary<'a> {
    accounts: &'a [AccountReport],
    elapsed_secs: f64,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_reports(reports: &[AccountReport], elapsed_secs: f64) -> io::Result<()> {
        Self::print_json(&RunSummary {
            accounts: reports,
            elapsed_secs,
        })
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
