//! 見出し行の推定
//!
//! 先頭15行から説明・数量・単価・単位の列を見出し語で判定する。
//! 「description」と完全一致するセルは説明列として最優先。

use super::cells::{cell_at, normalize_header, Cell};
use serde::Serialize;

/// 列の役割
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    Description,
    Quantity,
    Rate,
    Unit,
    /// 金額列（数量と誤認しないため識別のみ）
    Amount,
}

/// 列マップ（0始まり）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMap {
    pub description: usize,
    pub quantity: usize,
    pub rate: Option<usize>,
    pub unit: Option<usize>,
}

/// 見出し推定の結果
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderMatch {
    pub row: usize,
    pub columns: ColumnMap,
}

const DESCRIPTION_CONTAINS: &[&str] = &["description", "desc", "particular", "specification", "narrative"];
const DESCRIPTION_EXACT: &[&str] = &["item", "items", "work", "works", "activity", "details", "scope", "element"];
const QUANTITY_CONTAINS: &[&str] = &["quantity", "qty", "qnty", "quan"];
const QUANTITY_EXACT: &[&str] = &["nos", "no", "number", "volume", "area"];
const RATE_CONTAINS: &[&str] = &["rate", "price", "cost"];
const UNIT_EXACT: &[&str] = &["unit", "units", "uom", "measure", "um"];
const AMOUNT_CONTAINS: &[&str] = &["amount", "total", "sum"];

/// 見出しセルの役割を判定
pub fn classify_header(text: &str) -> Option<ColumnRole> {
    let normalized = normalize_header(text);
    if normalized.is_empty() || normalized.len() > 40 {
        return None;
    }
    let contains = |patterns: &[&str]| patterns.iter().any(|p| normalized.contains(p));
    let exact = |patterns: &[&str]| patterns.iter().any(|p| normalized == *p);

    if contains(RATE_CONTAINS) {
        Some(ColumnRole::Rate)
    } else if contains(AMOUNT_CONTAINS) {
        Some(ColumnRole::Amount)
    } else if contains(QUANTITY_CONTAINS) || exact(QUANTITY_EXACT) {
        Some(ColumnRole::Quantity)
    } else if exact(UNIT_EXACT) || normalized.contains("uom") {
        Some(ColumnRole::Unit)
    } else if contains(DESCRIPTION_CONTAINS) || exact(DESCRIPTION_EXACT) {
        Some(ColumnRole::Description)
    } else {
        None
    }
}

/// 見出し行を探す
///
/// # Arguments
/// * `rows` - シートの行
/// * `scan_rows` - 探索する先頭行数
///
/// # Returns
/// 説明列と数量列を含み、2列以上を判定できた最初の行
pub fn find_header(rows: &[Vec<Cell>], scan_rows: usize) -> Option<HeaderMatch> {
    for (row_idx, row) in rows.iter().take(scan_rows).enumerate() {
        let mut exact_description = None;
        let mut descriptions = Vec::new();
        let mut quantity = None;
        let mut rate = None;
        let mut unit = None;
        let mut classified = 0;

        for (col, cell) in row.iter().enumerate() {
            let Some(text) = cell.as_text() else { continue };
            if normalize_header(text) == "description" && exact_description.is_none() {
                exact_description = Some(col);
                classified += 1;
                continue;
            }
            match classify_header(text) {
                Some(ColumnRole::Description) => {
                    descriptions.push(col);
                    classified += 1;
                }
                Some(ColumnRole::Quantity) if quantity.is_none() => {
                    quantity = Some(col);
                    classified += 1;
                }
                Some(ColumnRole::Rate) if rate.is_none() => {
                    rate = Some(col);
                    classified += 1;
                }
                Some(ColumnRole::Unit) if unit.is_none() => {
                    unit = Some(col);
                    classified += 1;
                }
                _ => {}
            }
        }

        if classified < 2 {
            continue;
        }
        let Some(quantity) = quantity else { continue };
        let description = match exact_description {
            Some(col) => Some(col),
            None => best_description_column(rows, row_idx + 1, &descriptions),
        };
        let Some(description) = description else { continue };

        return Some(HeaderMatch {
            row: row_idx,
            columns: ColumnMap {
                description,
                quantity,
                rate,
                unit,
            },
        });
    }
    None
}

/// 説明列候補を内容で採点して最良の列を返す
pub fn best_description_column(rows: &[Vec<Cell>], data_start: usize, candidates: &[usize]) -> Option<usize> {
    match candidates {
        [] => None,
        [only] => Some(*only),
        _ => candidates
            .iter()
            .map(|&col| (col, description_column_score(rows, data_start, col)))
            .fold(None, |best: Option<(usize, f64)>, (col, score)| match best {
                Some((_, best_score)) if best_score >= score => best,
                _ => Some((col, score)),
            })
            .map(|(col, _)| col),
    }
}

/// 説明列らしさ
///
/// 意味のある文の比率と平均長を加点し、数値や極端に短いセルを減点する。
pub fn description_column_score(rows: &[Vec<Cell>], data_start: usize, col: usize) -> f64 {
    let samples: Vec<&Cell> = rows
        .iter()
        .skip(data_start)
        .take(30)
        .map(|row| cell_at(row, col))
        .filter(|cell| !cell.is_empty())
        .collect();
    if samples.is_empty() {
        return 0.0;
    }

    let total = samples.len() as f64;
    let mut meaningful = 0usize;
    let mut numeric = 0usize;
    let mut short = 0usize;
    let mut length_sum = 0usize;

    for cell in &samples {
        let text = cell.display();
        length_sum += text.len();
        if cell.as_number().is_some() {
            numeric += 1;
            continue;
        }
        let words = text
            .split_whitespace()
            .filter(|w| w.chars().any(char::is_alphabetic))
            .count();
        if words >= 2 || text.len() > 10 {
            meaningful += 1;
        }
        if text.len() < 4 {
            short += 1;
        }
    }

    let avg_len = length_sum as f64 / total;
    (meaningful as f64 / total) * 0.5 + (avg_len / 50.0).min(1.0) * 0.3
        - (numeric as f64 / total) * 0.3
        - (short as f64 / total) * 0.2
}
