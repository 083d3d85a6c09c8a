//! 照合結果Excel生成（共通ライブラリ）
//!
//! 明細ごとの照合結果シートと集計シートを作る。
//! 元ブックの書式保持は行わない。

use crate::job::Job;
use crate::types::{MatchOutcome, MatchResult};
use rust_xlsxwriter::*;

/// 結果シートの列定義（見出し, 列幅）
pub const RESULT_COLUMNS: &[(&str, f64)] = &[
    ("Sheet", 14.0),
    ("Row", 6.0),
    ("Description", 48.0),
    ("Section", 30.0),
    ("Quantity", 10.0),
    ("Unit", 8.0),
    ("Matched Description", 48.0),
    ("Matched Rate", 12.0),
    ("Total Amount", 14.0),
    ("Confidence", 11.0),
    ("Category", 11.0),
    ("Method", 10.0),
    ("Outcome", 15.0),
];

/// 結果Excelをバッファに生成
///
/// # Arguments
/// * `job` - 集計シートに出すジョブ
/// * `results` - 照合結果（行順）
pub fn generate_results_buffer(job: &Job, results: &[MatchResult]) -> Result<Vec<u8>, String> {
    let mut workbook = Workbook::new();

    let header_format = Format::new()
        .set_bold()
        .set_font_color(Color::RGB(0xFFFFFF))
        .set_background_color(Color::RGB(0x305496))
        .set_border(FormatBorder::Thin);
    let money_format = Format::new().set_num_format("#,##0.00");
    let percent_format = Format::new().set_num_format("0.0%");
    let low_format = Format::new()
        .set_background_color(Color::RGB(0xFCE4D6))
        .set_num_format("0.0%");

    let worksheet = workbook.add_worksheet();
    worksheet
        .set_name("Matches")
        .map_err(|e| format!("シート名設定エラー: {}", e))?;

    for (col, (title, width)) in RESULT_COLUMNS.iter().enumerate() {
        let col = col as u16;
        worksheet
            .write_string_with_format(0, col, *title, &header_format)
            .map_err(|e| format!("見出し書き込みエラー: {}", e))?;
        worksheet
            .set_column_width(col, *width)
            .map_err(|e| format!("列幅設定エラー: {}", e))?;
    }
    worksheet
        .set_freeze_panes(1, 0)
        .map_err(|e| format!("固定枠設定エラー: {}", e))?;

    for (idx, result) in results.iter().enumerate() {
        let row = idx as u32 + 1;
        let item = &result.line_item;
        let cell_err = |e: XlsxError| format!("{}行目書き込みエラー: {}", row, e);

        worksheet.write_string(row, 0, &item.sheet_name).map_err(cell_err)?;
        worksheet.write_number(row, 1, item.row_number as f64).map_err(cell_err)?;
        worksheet.write_string(row, 2, &item.description).map_err(cell_err)?;
        worksheet
            .write_string(row, 3, item.section_header.as_deref().unwrap_or(""))
            .map_err(cell_err)?;
        worksheet.write_number(row, 4, item.quantity).map_err(cell_err)?;
        worksheet
            .write_string(row, 5, item.unit.as_deref().unwrap_or(""))
            .map_err(cell_err)?;
        worksheet
            .write_string(row, 6, result.matched_description.as_deref().unwrap_or(""))
            .map_err(cell_err)?;
        if let Some(rate) = result.matched_rate {
            worksheet
                .write_number_with_format(row, 7, rate, &money_format)
                .map_err(cell_err)?;
        }
        if let Some(total) = result.total_amount {
            worksheet
                .write_number_with_format(row, 8, total, &money_format)
                .map_err(cell_err)?;
        }
        let confidence_format = if result.outcome == MatchOutcome::Matched {
            &percent_format
        } else {
            &low_format
        };
        worksheet
            .write_number_with_format(row, 9, result.confidence(), confidence_format)
            .map_err(cell_err)?;
        worksheet
            .write_string(row, 10, result.confidence_category.to_string())
            .map_err(cell_err)?;
        let method = result
            .best_candidate
            .as_ref()
            .map(|c| c.method.to_string())
            .unwrap_or_default();
        worksheet.write_string(row, 11, method).map_err(cell_err)?;
        worksheet
            .write_string(row, 12, result.outcome.to_string())
            .map_err(cell_err)?;
    }

    write_summary(&mut workbook, job, results, &header_format, &money_format)?;

    workbook
        .save_to_buffer()
        .map_err(|e| format!("Excel保存エラー: {}", e))
}

/// 集計シート
fn write_summary(
    workbook: &mut Workbook,
    job: &Job,
    results: &[MatchResult],
    label_format: &Format,
    money_format: &Format,
) -> Result<(), String> {
    let worksheet = workbook.add_worksheet();
    worksheet
        .set_name("Summary")
        .map_err(|e| format!("シート名設定エラー: {}", e))?;
    worksheet
        .set_column_width(0, 22.0)
        .map_err(|e| format!("列幅設定エラー: {}", e))?;
    worksheet
        .set_column_width(1, 40.0)
        .map_err(|e| format!("列幅設定エラー: {}", e))?;

    let total_amount: f64 = results.iter().filter_map(|r| r.total_amount).sum();
    let low_confidence = results
        .iter()
        .filter(|r| r.outcome == MatchOutcome::LowConfidenceMatched)
        .count();

    let text_rows = [
        ("Job", job.id.clone()),
        ("Status", job.status.to_string()),
        ("Phase", job.phase_message.clone()),
    ];
    let number_rows = [
        ("Total items", job.total_items as f64),
        ("Matched items", job.matched_items as f64),
        ("Low confidence items", low_confidence as f64),
        ("Mean confidence", job.confidence_score),
    ];

    let mut row = 0u32;
    for (label, value) in text_rows {
        worksheet
            .write_string_with_format(row, 0, label, label_format)
            .and_then(|ws| ws.write_string(row, 1, value))
            .map_err(|e| format!("集計書き込みエラー: {}", e))?;
        row += 1;
    }
    for (label, value) in number_rows {
        worksheet
            .write_string_with_format(row, 0, label, label_format)
            .and_then(|ws| ws.write_number(row, 1, value))
            .map_err(|e| format!("集計書き込みエラー: {}", e))?;
        row += 1;
    }
    worksheet
        .write_string_with_format(row, 0, "Total amount", label_format)
        .and_then(|ws| ws.write_number_with_format(row, 1, total_amount, money_format))
        .map_err(|e| format!("集計書き込みエラー: {}", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CatalogEntry, LineItem, MatchCandidate, MatchMethod};

    #[test]
    fn test_generate_results_buffer() {
        let entry = CatalogEntry {
            id: "c1".into(),
            description: "PVC pipe 100mm".into(),
            rate: 12.5,
            ..Default::default()
        };
        let item = LineItem {
            id: "li-1".into(),
            description: "100mm PVC pipe".into(),
            quantity: 50.0,
            row_number: 4,
            sheet_name: "BOQ".into(),
            ..Default::default()
        };
        let candidate = MatchCandidate::new("c1", 0.92, MatchMethod::Lexical);
        let results = vec![
            MatchResult::build(item.clone(), Some(candidate), Some(&entry), 0.4),
            MatchResult::build(item, None, None, 0.4),
        ];

        let buffer = generate_results_buffer(&Job::new("job-1"), &results).unwrap();
        // xlsxはZIPコンテナ
        assert_eq!(&buffer[..2], b"PK");
    }
}
