use std::path::Path;

use anyhow::Context;
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Cell, CellAlignment, Color, ContentArrangement, Table};
use tracing::info;
use vitals_client::VitalsService;
use vitals_core::export::{to_csv, to_json};
use vitals_core::{
    classified, CodeRegistry, Notice, NoticeLevel, Reading, ReadingSet, VitalStatus, VitalsConfig,
};
use vitals_fhir::{normalize, observations_from_bundle_str};

use crate::cli::{AnalyzeArgs, OutputFormat, ReadingsArgs, ViewArgs};

pub fn run_patients(config: VitalsConfig) -> anyhow::Result<()> {
    let service = VitalsService::from_config(config).context("failed to build FHIR client")?;
    let list = service.discover_subjects();

    print_notices(&list.notices);
    for subject in &list.subjects {
        println!("{subject}");
    }
    Ok(())
}

pub fn run_readings(config: VitalsConfig, args: &ReadingsArgs) -> anyhow::Result<()> {
    let service = VitalsService::from_config(config).context("failed to build FHIR client")?;
    let set = service.load(&args.subject);
    render_view(&set, &args.view)
}

pub fn run_analyze(args: &AnalyzeArgs) -> anyhow::Result<()> {
    let set = analyze_file(&args.input, &CodeRegistry::standard())?;
    render_view(&set, &args.view)
}

/// Normalizes a bundle on disk without any fallback substitution.
pub fn analyze_file(path: &Path, registry: &CodeRegistry) -> anyhow::Result<ReadingSet> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read bundle {}", path.display()))?;
    let observations = observations_from_bundle_str(&data)
        .with_context(|| format!("failed to parse bundle {}", path.display()))?;
    let readings = normalize(&observations, registry)
        .with_context(|| format!("rejected bundle {}", path.display()))?;

    info!(path = %path.display(), count = readings.len(), "analyzed bundle");

    let mut set = ReadingSet::new(classified(readings), false);
    if set.is_empty() {
        set.push_notice(Notice::no_readings());
    }
    Ok(set)
}

fn render_view(set: &ReadingSet, view: &ViewArgs) -> anyhow::Result<()> {
    print_notices(&set.notices);
    if set.is_empty() {
        return Ok(());
    }

    let selected: Vec<Reading> = view.filter().apply(set).into_iter().cloned().collect();
    if selected.is_empty() {
        print_notices(&[Notice::no_data_in_range()]);
    }

    match view.format {
        OutputFormat::Table => {
            println!("{}", summary_line(set));
            if !selected.is_empty() {
                let shown = &selected[..view.limit.min(selected.len())];
                println!("{}", readings_table(shown));
                let anomalies = selected
                    .iter()
                    .filter(|r| r.status.is_some_and(VitalStatus::is_anomalous))
                    .count();
                println!(
                    "Showing {} of {} readings, {} anomalous.",
                    shown.len(),
                    selected.len(),
                    anomalies
                );
            }
            Ok(())
        }
        OutputFormat::Csv => emit(&to_csv(&selected)?, view.output.as_deref()),
        OutputFormat::Json => emit(&to_json(&selected)?, view.output.as_deref()),
    }
}

fn summary_line(set: &ReadingSet) -> String {
    let source = if set.is_fallback {
        "synthetic fallback"
    } else {
        "FHIR server"
    };
    let range = set
        .date_bounds()
        .map(|(from, to)| format!(", {from} to {to}"))
        .unwrap_or_default();
    format!(
        "Vital signs ({source}{range}): {}",
        set.vital_names().join(", ")
    )
}

pub fn readings_table(readings: &[Reading]) -> Table {
    let mut table = Table::new();
    apply_table_style(&mut table);
    table.set_header(vec![
        Cell::new("Timestamp"),
        Cell::new("Vital"),
        Cell::new("Value"),
        Cell::new("Unit"),
        Cell::new("Status"),
    ]);

    for reading in readings {
        let status = match reading.status {
            Some(status) => Cell::new(status.label()).fg(status_color(status)),
            None => Cell::new("-"),
        };
        table.add_row(vec![
            Cell::new(reading.timestamp.format("%Y-%m-%d %H:%M")),
            Cell::new(&reading.vital_name),
            Cell::new(format!("{:.1}", reading.value)).set_alignment(CellAlignment::Right),
            Cell::new(&reading.unit),
            status,
        ]);
    }
    table
}

fn status_color(status: VitalStatus) -> Color {
    match status {
        VitalStatus::Normal => Color::Green,
        VitalStatus::High => Color::Red,
        VitalStatus::Low => Color::Blue,
    }
}

fn apply_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
}

fn print_notices(notices: &[Notice]) {
    for notice in notices {
        let prefix = match notice.level {
            NoticeLevel::Info => "info",
            NoticeLevel::Warning => "warning",
            NoticeLevel::Error => "error",
        };
        eprintln!("{prefix}: {}", notice.message);
    }
}

fn emit(contents: &str, output: Option<&Path>) -> anyhow::Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, contents)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), "wrote export");
        }
        None => print!("{contents}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn synthetic_bundle() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../vitals-client/data/synthetic_bundle.json")
    }

    #[test]
    fn analyze_classifies_the_synthetic_bundle() {
        let set = analyze_file(&synthetic_bundle(), &CodeRegistry::standard()).unwrap();

        assert!(!set.is_fallback);
        assert_eq!(set.len(), 45);
        assert!(set.notices.is_empty());
        assert!(set.readings().iter().all(|r| r.status.is_some()));
        assert!(set.vital_names().contains(&"Heart Rate"));
    }

    #[test]
    fn analyze_reports_missing_file() {
        let err = analyze_file(Path::new("/nonexistent/bundle.json"), &CodeRegistry::standard())
            .unwrap_err();
        assert!(err.to_string().contains("failed to read bundle"));
    }

    #[test]
    fn table_shows_labels_and_values() {
        let set = analyze_file(&synthetic_bundle(), &CodeRegistry::standard()).unwrap();
        let rendered = readings_table(set.latest(3)).to_string();

        assert!(rendered.contains("Timestamp"));
        assert!(rendered.contains("Status"));
        assert!(["Normal", "High Anomaly", "Low Anomaly"]
            .iter()
            .any(|label| rendered.contains(label)));
    }

    #[test]
    fn summary_names_the_source() {
        let set = analyze_file(&synthetic_bundle(), &CodeRegistry::standard()).unwrap();
        let line = summary_line(&set);
        assert!(line.starts_with("Vital signs (FHIR server, "));
        assert!(line.contains("Heart Rate"));
    }
}
