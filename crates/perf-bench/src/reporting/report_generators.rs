use crate::errors::BenchResult;
use crate::reporting::types::{RunResult, SummaryRow};
use std::fmt::Write as _;
use std::io::Write;

/// Column names of a summary, metrics in first-observed order
pub fn summary_columns(rows: &[SummaryRow]) -> Vec<String> {
    let mut columns = vec!["task".to_string(), "model".to_string(), "dataset".to_string()];
    if let Some(first) = rows.first() {
        columns.extend(first.metrics.iter().map(|(name, _)| name.clone()));
    }
    columns.push("failure_count".to_string());
    columns
}

/// Trait for report generators
pub trait ReportGenerator {
    fn generate(&self, rows: &[SummaryRow], results: &[RunResult], out: &mut dyn Write)
        -> BenchResult<()>;
}

/// The summary table as CSV, one row per (task, model, dataset)
pub struct CsvReportGenerator;

impl ReportGenerator for CsvReportGenerator {
    fn generate(
        &self,
        rows: &[SummaryRow],
        _results: &[RunResult],
        out: &mut dyn Write,
    ) -> BenchResult<()> {
        let mut writer = csv::Writer::from_writer(out);
        writer.write_record(summary_columns(rows))?;

        for row in rows {
            let mut record = vec![
                row.task_id.clone(),
                row.model_id.clone(),
                row.dataset_id.clone(),
            ];
            record.extend(
                row.metrics
                    .iter()
                    .map(|(_, value)| value.map(|v| v.to_string()).unwrap_or_default()),
            );
            record.push(row.failure_count.to_string());
            writer.write_record(&record)?;
        }

        writer.flush()?;
        Ok(())
    }
}

/// Every individual run result as pretty JSON
pub struct RunsJsonReportGenerator;

impl ReportGenerator for RunsJsonReportGenerator {
    fn generate(
        &self,
        _rows: &[SummaryRow],
        results: &[RunResult],
        out: &mut dyn Write,
    ) -> BenchResult<()> {
        serde_json::to_writer_pretty(&mut *out, results)?;
        out.write_all(b"\n")?;
        Ok(())
    }
}

/// Aligned plain-text table for the console
pub struct TextReportGenerator;

impl TextReportGenerator {
    pub fn render(rows: &[SummaryRow]) -> String {
        let header = summary_columns(rows);
        let body: Vec<Vec<String>> = rows
            .iter()
            .map(|row| {
                let mut cells = vec![
                    row.task_id.clone(),
                    row.model_id.clone(),
                    row.dataset_id.clone(),
                ];
                cells.extend(row.metrics.iter().map(|(_, value)| match value {
                    Some(v) => format!("{:.4}", v),
                    None => "-".to_string(),
                }));
                cells.push(row.failure_count.to_string());
                cells
            })
            .collect();

        let widths: Vec<usize> = (0..header.len())
            .map(|i| {
                body.iter()
                    .map(|cells| cells[i].len())
                    .chain(std::iter::once(header[i].len()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let mut table = String::new();
        for cells in std::iter::once(&header).chain(body.iter()) {
            let line: Vec<String> = cells
                .iter()
                .zip(&widths)
                .map(|(cell, width)| format!("{:<width$}", cell, width = width))
                .collect();
            let _ = writeln!(table, "{}", line.join("  ").trim_end());
        }
        table
    }
}

impl ReportGenerator for TextReportGenerator {
    fn generate(
        &self,
        rows: &[SummaryRow],
        _results: &[RunResult],
        out: &mut dyn Write,
    ) -> BenchResult<()> {
        out.write_all(Self::render(rows).as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporting::types::GroupStatus;

    fn rows() -> Vec<SummaryRow> {
        vec![
            SummaryRow {
                task_id: "classification".to_string(),
                model_id: "mobilenet".to_string(),
                dataset_id: "flowers".to_string(),
                metrics: vec![
                    ("train/accuracy".to_string(), Some(0.75)),
                    ("export/latency".to_string(), Some(12.0)),
                ],
                success_count: 2,
                failure_count: 1,
                skipped_count: 0,
                status: GroupStatus::Complete,
            },
            SummaryRow {
                task_id: "classification".to_string(),
                model_id: "deit".to_string(),
                dataset_id: "flowers".to_string(),
                metrics: vec![
                    ("train/accuracy".to_string(), None),
                    ("export/latency".to_string(), None),
                ],
                success_count: 0,
                failure_count: 2,
                skipped_count: 0,
                status: GroupStatus::NoSuccessfulRuns,
            },
        ]
    }

    #[test]
    fn test_csv_layout() {
        let mut out = Vec::new();
        CsvReportGenerator.generate(&rows(), &[], &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "task,model,dataset,train/accuracy,export/latency,failure_count\n\
             classification,mobilenet,flowers,0.75,12,1\n\
             classification,deit,flowers,,,2\n"
        );
    }

    #[test]
    fn test_csv_without_rows_has_header() {
        let mut out = Vec::new();
        CsvReportGenerator.generate(&[], &[], &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "task,model,dataset,failure_count\n"
        );
    }

    #[test]
    fn test_text_table() {
        let table = TextReportGenerator::render(&rows());
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("task            model      dataset"));
        assert!(lines[1].contains("0.7500"));
        assert!(lines[2].contains(" -  "));
        assert!(lines[2].ends_with('2'));
    }
}
