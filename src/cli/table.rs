//! Table output for list commands
//!
//! Rows are rendered as a terminal table, TSV, Markdown, JSON or bare
//! identifiers depending on `--format`.

use serde::Serialize;
use tabled::{builder::Builder, settings::Style};

use crate::cli::args::OutputFormat;

/// A list of serializable rows with a fixed set of columns
pub struct ListTable<'a, T> {
    headers: &'a [&'a str],
    rows: Vec<(Vec<String>, &'a T)>,
    /// Column holding the row identifier (for `--format id`)
    id_column: usize,
}

impl<'a, T: Serialize> ListTable<'a, T> {
    pub fn new(headers: &'a [&'a str]) -> Self {
        Self {
            headers,
            rows: Vec::new(),
            id_column: 0,
        }
    }

    pub fn push(&mut self, cells: Vec<String>, record: &'a T) {
        self.rows.push((cells, record));
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn render(&self, format: OutputFormat) -> String {
        match format {
            OutputFormat::Json => {
                let records: Vec<&T> = self.rows.iter().map(|(_, r)| *r).collect();
                serde_json::to_string_pretty(&records).unwrap_or_else(|_| "[]".to_string())
            }
            OutputFormat::Tsv => {
                let mut out = self.headers.join("\t");
                for (cells, _) in &self.rows {
                    out.push('\n');
                    out.push_str(&cells.join("\t"));
                }
                out
            }
            OutputFormat::Id => self
                .rows
                .iter()
                .filter_map(|(cells, _)| cells.get(self.id_column).cloned())
                .collect::<Vec<_>>()
                .join("\n"),
            OutputFormat::Md | OutputFormat::Auto => {
                let mut builder = Builder::default();
                builder.push_record(self.headers.iter().copied());
                for (cells, _) in &self.rows {
                    builder.push_record(cells.iter().cloned());
                }
                let mut table = builder.build();
                if format == OutputFormat::Md {
                    table.with(Style::markdown());
                } else {
                    table.with(Style::sharp());
                }
                table.to_string()
            }
        }
    }

    pub fn print(&self, format: OutputFormat) {
        let rendered = self.render(format);
        if !rendered.is_empty() {
            println!("{}", rendered);
        }
    }
}
