use anyhow::Result;
use log::*;
use rust_xlsxwriter::{Format, Workbook};

use super::cache::InventoryCache;
use super::import::{ImportProgressEntry, ImportReport, ImportStatus};

const COLUMNS: [&str; 4] = ["Square ID", "Status", "WooCommerce ID", "Message"];

fn status_label(status: ImportStatus) -> &'static str {
    match status {
        ImportStatus::Success => "success",
        ImportStatus::Failed => "failed",
    }
}

/// Writes one row per progress entry to an `.xlsx` workbook.
pub fn write_import_report(filename: &str, report: &ImportReport) -> Result<()> {
    let mut workbook = Workbook::new();
    let bold_format = Format::new().set_bold();

    let worksheet = workbook.add_worksheet();
    for (col, title) in COLUMNS.iter().enumerate() {
        worksheet.write_with_format(0, col as u16, *title, &bold_format)?;
    }

    let mut row: u32 = 1;
    for entry in &report.progress {
        write_row(worksheet, row, entry)?;
        row += 1;
    }
    worksheet.write_string(row + 1, 0, format!("Run {}", report.run_id))?;

    workbook.save(filename)?;
    info!("wrote import report for {} products to {}", report.progress.len(), filename);
    Ok(())
}

/// Stores the run's inventory snapshot, then writes the optional workbook.
/// A workbook that cannot be written is logged and does not undo the snapshot.
pub fn save_import_run(
    cache: &mut InventoryCache,
    report: &ImportReport,
    filename: Option<&str>,
) -> Result<()> {
    cache.replace(report.inventory.clone())?;
    if let Some(filename) = filename {
        if let Err(e) = write_import_report(filename, report) {
            error!("could not write import report {}: {}", filename, e);
        }
    }
    Ok(())
}

fn write_row(
    worksheet: &mut rust_xlsxwriter::Worksheet,
    row: u32,
    entry: &ImportProgressEntry,
) -> Result<()> {
    worksheet.write_string(row, 0, &entry.square_id)?;
    worksheet.write_string(row, 1, status_label(entry.status))?;
    match entry.product_id {
        Some(pid) => worksheet.write_number(row, 2, pid as f64)?,
        None => worksheet.write_string(row, 2, "N/A")?,
    };
    worksheet.write_string(row, 3, entry.message.as_deref().unwrap_or(""))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::cache::open_cache;
    use crate::internal::import::{ImportError, RunState};
    use crate::internal::inventory::tests::item;

    #[test]
    fn writes_workbook() {
        let report = ImportReport {
            run_id: uuid::Uuid::new_v4(),
            state: RunState::Failed,
            progress: vec![
                ImportProgressEntry::success(12, "SQ1"),
                ImportProgressEntry::failed("SQ2", &ImportError::NotFound),
            ],
            inventory: vec![],
        };
        let path = std::env::temp_dir().join(format!("sws-report-{}.xlsx", report.run_id));
        let filename = path.to_str().unwrap();
        write_import_report(filename, &report).expect("report");
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn snapshot_survives_unwritable_report() {
        let dir = std::env::temp_dir().join(format!("sws-run-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut cache = open_cache(&dir).unwrap();
        cache.replace(vec![item("SQ1")]).unwrap();

        let mut linked = item("SQ1");
        linked.woocommerce_product_id = Some(12);
        let report = ImportReport {
            run_id: uuid::Uuid::new_v4(),
            state: RunState::Succeeded,
            progress: vec![ImportProgressEntry::success(12, "SQ1")],
            inventory: vec![linked.clone()],
        };
        let bad_path = dir.join("missing").join("report.xlsx");
        save_import_run(&mut cache, &report, bad_path.to_str()).expect("snapshot saved");

        assert!(!bad_path.exists());
        assert_eq!(open_cache(&dir).unwrap().items(), &[linked]);
        std::fs::remove_dir_all(dir).ok();
    }
}
