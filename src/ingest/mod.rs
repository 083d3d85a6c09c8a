//! 取り込みモジュール
//!
//! 固定スキーマを持たないBOQスプレッドシートから明細を抽出する。
//!
//! ## 処理フロー
//! 1. コンテナ判定とシート列挙（2行未満・2列未満のシートは除外）
//! 2. 見出し行の推定、失敗時は構造推定のフォールバック
//! 3. 行分類と見出しチェーンの付与
//! 4. 行検証・近接重複の統合
//! 5. 品質スコアの算出

pub mod cells;
pub mod fallback;
pub mod header;
pub mod quality;
pub mod section;

pub use cells::Cell;
pub use header::ColumnMap;
pub use quality::QualityScore;

use crate::error::{BoqError, Result};
use boq_match_common::LineItem;
use calamine::{Ods, Reader, Sheets, Xls, Xlsx};
use cells::{cell_at, clean_description, parse_quantity, parse_rate};
use section::{RowClass, SkipReason};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, info, warn};

/// シート1枚分のセル
#[derive(Debug, Clone, Default)]
pub struct SheetGrid {
    pub name: String,
    pub rows: Vec<Vec<Cell>>,
    /// rows[0] のシート上の行位置（0始まり）
    pub first_row: u32,
}

impl SheetGrid {
    pub fn new(name: impl Into<String>, rows: Vec<Vec<Cell>>) -> Self {
        Self {
            name: name.into(),
            rows,
            first_row: 0,
        }
    }

    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }
}

/// 構造の推定元
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StructureSource {
    Header,
    TextNumberScan,
    DescriptionSearch,
    /// 位置による推定（信頼度低）
    PositionalFallback,
    /// 構造なし（明細0件）
    None,
}

impl std::fmt::Display for StructureSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StructureSource::Header => write!(f, "header"),
            StructureSource::TextNumberScan => write!(f, "text-number-scan"),
            StructureSource::DescriptionSearch => write!(f, "description-search"),
            StructureSource::PositionalFallback => write!(f, "positional-fallback"),
            StructureSource::None => write!(f, "none"),
        }
    }
}

/// シートごとの取り込み結果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetReport {
    pub name: String,
    pub source: StructureSource,
    /// 1始まりの見出し行
    pub header_row: Option<u32>,
    pub columns: Option<ColumnMap>,
    pub items: usize,
    pub headers: usize,
    pub skipped: usize,
    pub merged_duplicates: usize,
}

/// 取り込み結果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub items: Vec<LineItem>,
    pub sheets: Vec<SheetReport>,
    pub quality: QualityScore,
}

/// 取り込みオプション
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// 見出し探索行数
    pub header_scan_rows: usize,
    /// フォールバック走査行数
    pub fallback_scan_rows: usize,
    /// フォールバック走査列数
    pub fallback_scan_cols: usize,
    /// 数量の上限（この値未満が有効）
    pub max_quantity: f64,
    /// これより短い説明は見出しを前置する
    pub short_description_len: usize,
    /// 見出しチェーンの深さ
    pub section_depth: usize,
    /// この行数以内の同一明細を統合
    pub duplicate_window: u32,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            header_scan_rows: 15,
            fallback_scan_rows: 30,
            fallback_scan_cols: 15,
            max_quantity: 999_999.0,
            short_description_len: 30,
            section_depth: 3,
            duplicate_window: 2,
        }
    }
}

/// 取り込みエンジン
#[derive(Debug, Clone, Default)]
pub struct IngestionEngine {
    options: IngestOptions,
}

impl IngestionEngine {
    pub fn new(options: IngestOptions) -> Self {
        Self { options }
    }

    /// ファイルから取り込み
    pub fn parse_file(&self, path: &Path) -> Result<IngestReport> {
        if !path.exists() {
            return Err(BoqError::FileNotFound(path.display().to_string()));
        }
        let bytes = std::fs::read(path)?;
        self.parse(&bytes)
    }

    /// スプレッドシートのバイト列から明細を抽出
    ///
    /// # Errors
    /// * `UnreadableDocument` - 破損・暗号化
    /// * `UnsupportedFormat` - スプレッドシート以外
    pub fn parse(&self, bytes: &[u8]) -> Result<IngestReport> {
        let sheets = read_workbook(bytes)?;
        Ok(self.parse_sheets(sheets))
    }

    /// 読み込み済みのシート群から明細を抽出
    pub fn parse_sheets(&self, sheets: Vec<SheetGrid>) -> IngestReport {
        let mut items = Vec::new();
        let mut reports = Vec::new();
        let mut candidate_rows = 0;

        for sheet in &sheets {
            if sheet.rows.len() < 2 || sheet.width() < 2 {
                debug!(sheet = %sheet.name, "skipping sheet smaller than 2x2");
                continue;
            }
            let (sheet_items, report, candidates) = self.parse_sheet(sheet);
            candidate_rows += candidates;
            items.extend(sheet_items);
            reports.push(report);
        }

        let quality = quality::compute_quality(&items, candidate_rows);
        info!(
            items = items.len(),
            sheets = reports.len(),
            quality = quality.score,
            "ingestion finished"
        );

        IngestReport {
            items,
            sheets: reports,
            quality,
        }
    }

    fn parse_sheet(&self, sheet: &SheetGrid) -> (Vec<LineItem>, SheetReport, usize) {
        let Some((source, columns, data_start, header_row)) = self.infer_structure(sheet) else {
            warn!(sheet = %sheet.name, "no matchable structure found in sheet");
            let report = SheetReport {
                name: sheet.name.clone(),
                source: StructureSource::None,
                header_row: None,
                columns: None,
                items: 0,
                headers: 0,
                skipped: sheet.rows.len(),
                merged_duplicates: 0,
            };
            return (Vec::new(), report, 0);
        };

        let classes =
            section::classify_rows(&sheet.rows, &columns, data_start, self.options.max_quantity);
        let chains = section::attach_sections(&classes, self.options.section_depth);

        let mut items = Vec::new();
        let mut headers = 0;
        let mut skipped = 0;
        let mut candidates = 0;

        for (idx, class) in classes.iter().enumerate() {
            match class {
                RowClass::Header(_) => headers += 1,
                RowClass::Skip(SkipReason::BeforeData | SkipReason::Empty) => {}
                RowClass::Skip(_) => {
                    skipped += 1;
                    candidates += 1;
                }
                RowClass::Data => {
                    candidates += 1;
                    let row_number = sheet.first_row + idx as u32 + 1;
                    match self.build_item(sheet, idx, row_number, &columns, chains[idx].clone()) {
                        Some(item) => items.push(item),
                        None => skipped += 1,
                    }
                }
            }
        }

        let before = items.len();
        let items = merge_adjacent_duplicates(items, self.options.duplicate_window);
        let merged = before - items.len();

        debug!(
            sheet = %sheet.name,
            source = ?source,
            items = items.len(),
            headers,
            skipped,
            merged,
            "sheet parsed"
        );

        let report = SheetReport {
            name: sheet.name.clone(),
            source,
            header_row: header_row.map(|r| sheet.first_row + r as u32 + 1),
            columns: Some(columns),
            items: items.len(),
            headers,
            skipped,
            merged_duplicates: merged,
        };
        (items, report, candidates)
    }

    /// 列構造を推定（見出し → 走査 → 見出し探索 → 位置）
    fn infer_structure(
        &self,
        sheet: &SheetGrid,
    ) -> Option<(StructureSource, ColumnMap, usize, Option<usize>)> {
        let rows = &sheet.rows;
        let opts = &self.options;

        if let Some(found) = header::find_header(rows, opts.header_scan_rows) {
            return Some((StructureSource::Header, found.columns, found.row + 1, Some(found.row)));
        }
        if let Some(found) =
            fallback::scan_text_number_columns(rows, opts.fallback_scan_rows, opts.fallback_scan_cols)
        {
            info!(sheet = %sheet.name, "column structure inferred from text/number scan");
            return Some((
                StructureSource::TextNumberScan,
                found.columns,
                found.data_start,
                found.header_row,
            ));
        }
        if let Some(found) = fallback::search_description_header(rows, opts.fallback_scan_rows) {
            info!(sheet = %sheet.name, "column structure inferred from description header search");
            return Some((
                StructureSource::DescriptionSearch,
                found.columns,
                found.data_start,
                found.header_row,
            ));
        }
        if let Some(found) = fallback::positional_structure(rows) {
            warn!(
                sheet = %sheet.name,
                "assuming column 0 = description, column 1 = quantity (degraded confidence)"
            );
            return Some((
                StructureSource::PositionalFallback,
                found.columns,
                found.data_start,
                found.header_row,
            ));
        }
        None
    }

    fn build_item(
        &self,
        sheet: &SheetGrid,
        idx: usize,
        row_number: u32,
        columns: &ColumnMap,
        section_header: Option<String>,
    ) -> Option<LineItem> {
        let row = &sheet.rows[idx];
        let raw = section::row_text(row, columns)?;
        let description = clean_description(&raw);
        if description.chars().count() < 3 {
            return None;
        }

        let quantity = parse_quantity(cell_at(row, columns.quantity))?;
        if quantity.value <= 0.0 || quantity.value >= self.options.max_quantity {
            return None;
        }

        let unit = columns
            .unit
            .and_then(|col| cell_at(row, col).as_text().map(str::to_string))
            .or(quantity.unit);
        let rate = columns
            .rate
            .and_then(|col| parse_rate(cell_at(row, col)))
            .filter(|r| *r > 0.0);
        let enhanced_description = section::enhance_description(
            &description,
            section_header.as_deref(),
            self.options.short_description_len,
        );

        Some(LineItem {
            id: line_item_id(&sheet.name, row_number, &description, quantity.value),
            description,
            quantity: quantity.value,
            unit,
            rate,
            row_number,
            sheet_name: sheet.name.clone(),
            section_header,
            enhanced_description,
        })
    }
}

/// (シート名, 行番号, 内容) から決定的なIDを作る
pub fn line_item_id(sheet_name: &str, row_number: u32, description: &str, quantity: f64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sheet_name.as_bytes());
    hasher.update([0]);
    hasher.update(row_number.to_le_bytes());
    hasher.update([0]);
    hasher.update(description.as_bytes());
    hasher.update([0]);
    hasher.update(quantity.to_le_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("li-{}", &digest[..16])
}

/// 同一（説明, 数量, シート）が近接している場合のみ統合
///
/// 離れた位置の同一明細は正当な繰り返しとして残す。
pub fn merge_adjacent_duplicates(items: Vec<LineItem>, window: u32) -> Vec<LineItem> {
    let mut last_seen: HashMap<(String, String, u64), u32> = HashMap::new();
    let mut kept = Vec::with_capacity(items.len());

    for item in items {
        let key = (
            item.sheet_name.clone(),
            item.description.to_lowercase(),
            item.quantity.to_bits(),
        );
        let is_adjacent = last_seen
            .get(&key)
            .map(|&prev| item.row_number.saturating_sub(prev) <= window)
            .unwrap_or(false);
        last_seen.insert(key, item.row_number);
        if is_adjacent {
            debug!(row = item.row_number, sheet = %item.sheet_name, "merged adjacent duplicate");
            continue;
        }
        kept.push(item);
    }
    kept
}

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const CFB_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// 暗号化OOXMLに含まれるストリーム名（UTF-16LE）
fn has_encrypted_package(bytes: &[u8]) -> bool {
    let marker: Vec<u8> = "EncryptedPackage"
        .encode_utf16()
        .flat_map(|u| u.to_le_bytes())
        .collect();
    bytes.windows(marker.len()).any(|w| w == marker.as_slice())
}

/// ブックを開いて全シートを読み込む
pub fn read_workbook(bytes: &[u8]) -> Result<Vec<SheetGrid>> {
    if bytes.is_empty() {
        return Err(BoqError::UnreadableDocument("empty file".into()));
    }

    let cursor = Cursor::new(bytes.to_vec());
    let mut workbook: Sheets<Cursor<Vec<u8>>> = if bytes.starts_with(ZIP_MAGIC) {
        match Xlsx::new(cursor.clone()) {
            Ok(wb) => Sheets::Xlsx(wb),
            Err(xlsx_err) => match Ods::new(cursor) {
                Ok(wb) => Sheets::Ods(wb),
                Err(_) => {
                    debug!(error = %xlsx_err, "zip container is not a readable workbook");
                    return Err(BoqError::UnreadableDocument("corrupt workbook container".into()));
                }
            },
        }
    } else if bytes.starts_with(CFB_MAGIC) {
        if has_encrypted_package(bytes) {
            return Err(BoqError::UnreadableDocument("password protected".into()));
        }
        match Xls::new(cursor) {
            Ok(wb) => Sheets::Xls(wb),
            Err(e) => {
                let reason = if e.to_string().to_lowercase().contains("password") {
                    "password protected"
                } else {
                    "corrupt legacy workbook"
                };
                debug!(error = %e, "failed to open xls workbook");
                return Err(BoqError::UnreadableDocument(reason.into()));
            }
        }
    } else {
        return Err(BoqError::UnsupportedFormat(
            "expected an xlsx, xls or ods spreadsheet".into(),
        ));
    };

    let mut grids = Vec::new();
    for name in workbook.sheet_names() {
        let range = match workbook.worksheet_range(&name) {
            Ok(range) => range,
            Err(e) => {
                warn!(sheet = %name, error = %e, "failed to read sheet, skipping");
                continue;
            }
        };
        let first_row = range.start().map(|(row, _)| row).unwrap_or(0);
        let rows = range
            .rows()
            .map(|row| row.iter().map(Cell::from_data).collect())
            .collect();
        grids.push(SheetGrid {
            name,
            rows,
            first_row,
        });
    }
    Ok(grids)
}
