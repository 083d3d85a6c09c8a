//! 見出しが見つからない場合の構造推定
//!
//! 1. 長い文字列列とその右の数値列の組を行ごとに集計（1行でも採用、複数の組は票数で選ぶ）
//! 2. "description"/"desc" セルとその右の数量見出しを探索
//! 3. 最終手段として 0列=説明, 1列=数量, 2列=単価 と仮定

use super::cells::{cell_at, normalize_header, Cell};
use super::header::ColumnMap;
use std::collections::HashMap;

/// 推定された構造
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackStructure {
    pub columns: ColumnMap,
    /// 最初のデータ行
    pub data_start: usize,
    /// 見出し行（ある場合）
    pub header_row: Option<usize>,
}

/// 長文列と数値列の組から構造を推定
///
/// # Arguments
/// * `rows` - シートの行
/// * `scan_rows` - 走査する行数
/// * `scan_cols` - 走査する列数
pub fn scan_text_number_columns(
    rows: &[Vec<Cell>],
    scan_rows: usize,
    scan_cols: usize,
) -> Option<FallbackStructure> {
    // (説明列, 数量列) → (票数, 最初の行, 単価列の票)
    let mut votes: HashMap<(usize, usize), (usize, usize, HashMap<usize, usize>)> = HashMap::new();

    for (row_idx, row) in rows.iter().take(scan_rows).enumerate() {
        let width = row.len().min(scan_cols);

        let text_col = (0..width)
            .filter_map(|col| {
                let cell = cell_at(row, col);
                let text = cell.as_text()?;
                let long_enough = text.len() > 10 || text.split_whitespace().count() >= 2;
                (cell.as_number().is_none() && text.len() > 3 && long_enough)
                    .then_some((col, text.len()))
            })
            .fold(None, |best: Option<(usize, usize)>, (col, len)| match best {
                Some((_, best_len)) if best_len >= len => best,
                _ => Some((col, len)),
            })
            .map(|(col, _)| col);
        let Some(text_col) = text_col else { continue };

        let mut numbers = (text_col + 1..width)
            .filter(|&col| cell_at(row, col).as_number().map(|n| n > 0.0).unwrap_or(false));
        let Some(qty_col) = numbers.next() else { continue };
        let rate_col = numbers.next();

        let entry = votes
            .entry((text_col, qty_col))
            .or_insert_with(|| (0, row_idx, HashMap::new()));
        entry.0 += 1;
        if let Some(rate_col) = rate_col {
            *entry.2.entry(rate_col).or_insert(0) += 1;
        }
    }

    let ((description, quantity), (count, first_row, rate_votes)) = votes
        .into_iter()
        .max_by(|a, b| a.1 .0.cmp(&b.1 .0).then(b.1 .1.cmp(&a.1 .1)))?;

    let rate = rate_votes
        .into_iter()
        .filter(|(_, n)| *n * 2 >= count)
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(col, _)| col);

    Some(FallbackStructure {
        columns: ColumnMap {
            description,
            quantity,
            rate,
            unit: None,
        },
        data_start: first_row,
        header_row: first_row.checked_sub(1),
    })
}

/// "description"/"desc" セルと右側の数量見出しを探す
pub fn search_description_header(rows: &[Vec<Cell>], scan_rows: usize) -> Option<FallbackStructure> {
    for (row_idx, row) in rows.iter().take(scan_rows).enumerate() {
        let description = row.iter().position(|cell| {
            cell.as_text()
                .map(|t| {
                    let n = normalize_header(t);
                    n == "description" || n == "desc" || n.starts_with("desc")
                })
                .unwrap_or(false)
        });
        let Some(description) = description else { continue };

        let quantity = (description + 1..row.len()).find(|&col| {
            cell_at(row, col)
                .as_text()
                .map(|t| {
                    let n = normalize_header(t);
                    ["qty", "quantity", "quan", "nos"].iter().any(|p| n.contains(p)) || n == "no"
                })
                .unwrap_or(false)
        });
        let Some(quantity) = quantity else { continue };

        let rate = (quantity + 1..row.len()).find(|&col| {
            cell_at(row, col)
                .as_text()
                .map(|t| {
                    let n = normalize_header(t);
                    n.contains("rate") || n.contains("price")
                })
                .unwrap_or(false)
        });

        return Some(FallbackStructure {
            columns: ColumnMap {
                description,
                quantity,
                rate,
                unit: None,
            },
            data_start: row_idx + 1,
            header_row: Some(row_idx),
        });
    }
    None
}

/// 位置による最終推定（6行以上のシートのみ）
pub fn positional_structure(rows: &[Vec<Cell>]) -> Option<FallbackStructure> {
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    if rows.len() <= 5 || width < 2 {
        return None;
    }
    Some(FallbackStructure {
        columns: ColumnMap {
            description: 0,
            quantity: 1,
            rate: (width >= 3).then_some(2),
            unit: None,
        },
        data_start: 0,
        header_row: None,
    })
}
