//! 見出し（セクション）検出
//!
//! 2パスで処理する:
//! 1. 全行を 見出し / データ / 対象外 に分類
//! 2. データ行に直前の見出しチェーン（最大3件）を付与

use super::cells::{cell_at, clean_description, is_totals_or_separator, parse_quantity, Cell};
use super::header::ColumnMap;
use boq_match_common::SECTION_SEPARATOR;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref NUMBERED_SECTION: Regex =
        Regex::new(r"^\d+(?:\.\d+)*\.?\s+[A-Z][A-Z0-9\s&/,()'\-.:]*$").unwrap();
    static ref LETTER_SECTION: Regex =
        Regex::new(r"^[A-Z]\d*[.)]?\s+[A-Z][A-Z0-9\s&/,()'\-.:]*$").unwrap();
    static ref BILL_SECTION: Regex =
        Regex::new(r"(?i)^(?:sub-?)?bill\s*n[or]?\.?\s*\d+").unwrap();
    static ref PART_SECTION: Regex =
        Regex::new(r"(?i)^(?:part|section|chapter|division)\s+[A-Z0-9]+\b").unwrap();
}

/// 見出し判定に使う工種キーワード
const SECTION_KEYWORDS: &[&str] = &[
    "PRELIMINARIES", "DEMOLITION", "ALTERATIONS", "SITE CLEARANCE", "GROUNDWORK",
    "EARTHWORK", "EXCAVATION", "SUBSTRUCTURE", "SUPERSTRUCTURE", "FRAME", "CONCRETE",
    "REINFORCEMENT", "FORMWORK", "MASONRY", "BRICKWORK", "BLOCKWORK", "STEELWORK",
    "METALWORK", "CARPENTRY", "JOINERY", "ROOF", "ROOFING", "EXTERNAL WALLS",
    "INTERNAL WALLS", "FLOORS", "STAIRS", "DOORS", "WINDOWS", "WALL FINISHES",
    "FLOOR FINISHES", "CEILING FINISHES", "FINISHES", "PAINTING", "DECORATION", "GLAZING",
    "FITTINGS", "WATERPROOFING", "INSULATION", "PLUMBING", "DISPOSAL SYSTEMS",
    "WATER INSTALLATIONS", "HEATING", "VENTILATION", "MECHANICAL", "ELECTRICAL",
    "INSTALLATIONS", "BUILDERS WORK", "DRAINAGE", "EXTERNAL WORKS", "PAVING", "FENCING",
    "LANDSCAPING", "SERVICES", "SECTION", "PART", "CHAPTER", "BILL", "SUMMARY",
];

/// 行の分類
#[derive(Debug, Clone, PartialEq)]
pub enum RowClass {
    /// 見出し行（テキスト）
    Header(String),
    /// 明細候補行
    Data,
    /// 対象外
    Skip(SkipReason),
}

/// 対象外の理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// データ開始前（見出し行など）
    BeforeData,
    Empty,
    /// 合計・区切り行
    Totals,
    /// 数量が範囲外
    InvalidQuantity,
    /// 説明が短すぎる
    ShortDescription,
}

/// 行の説明テキスト（説明列が空なら最初の文字列セル）
pub fn row_text(row: &[Cell], columns: &ColumnMap) -> Option<String> {
    cell_at(row, columns.description)
        .as_text()
        .or_else(|| {
            row.iter()
                .filter_map(Cell::as_text)
                .find(|t| t.chars().any(char::is_alphabetic))
        })
        .map(str::to_string)
}

/// 見出しテキストかどうか
///
/// 番号付き大文字見出し、記号付き大文字見出し、BILL/PART表記、
/// 工種語を含む短い大文字列、または工種語を含むほぼ空の行。
pub fn is_section_header(text: &str, non_empty_cells: usize) -> bool {
    let trimmed = text.trim();
    let letters = trimmed.chars().filter(|c| c.is_alphabetic()).count();
    if letters < 3 || trimmed.len() > 120 {
        return false;
    }

    if NUMBERED_SECTION.is_match(trimmed)
        || LETTER_SECTION.is_match(trimmed)
        || BILL_SECTION.is_match(trimmed)
        || PART_SECTION.is_match(trimmed)
    {
        return true;
    }

    let upper = trimmed.to_uppercase();
    let has_keyword = SECTION_KEYWORDS.iter().any(|k| upper.contains(k));
    let all_caps = !trimmed.chars().any(char::is_lowercase);

    if all_caps && trimmed.len() <= 60 && has_keyword {
        return true;
    }
    non_empty_cells <= 2 && (has_keyword || trimmed.ends_with(':'))
}

/// 全行を分類する（1パス目）
///
/// # Arguments
/// * `rows` - シートの行
/// * `columns` - 列マップ
/// * `data_start` - 最初のデータ行
/// * `max_quantity` - 数量の上限（この値未満が有効）
pub fn classify_rows(
    rows: &[Vec<Cell>],
    columns: &ColumnMap,
    data_start: usize,
    max_quantity: f64,
) -> Vec<RowClass> {
    rows.iter()
        .enumerate()
        .map(|(idx, row)| {
            if idx < data_start {
                return RowClass::Skip(SkipReason::BeforeData);
            }
            let non_empty = row.iter().filter(|c| !c.is_empty()).count();
            if non_empty == 0 {
                return RowClass::Skip(SkipReason::Empty);
            }
            let Some(text) = row_text(row, columns) else {
                return RowClass::Skip(SkipReason::ShortDescription);
            };
            if is_totals_or_separator(&text) {
                return RowClass::Skip(SkipReason::Totals);
            }

            match parse_quantity(cell_at(row, columns.quantity)) {
                None => {
                    if is_section_header(&text, non_empty) {
                        RowClass::Header(text.split_whitespace().collect::<Vec<_>>().join(" "))
                    } else {
                        RowClass::Skip(SkipReason::InvalidQuantity)
                    }
                }
                Some(q) if q.value <= 0.0 || q.value >= max_quantity => {
                    RowClass::Skip(SkipReason::InvalidQuantity)
                }
                Some(_) => {
                    if clean_description(&text).chars().count() < 3 {
                        RowClass::Skip(SkipReason::ShortDescription)
                    } else {
                        RowClass::Data
                    }
                }
            }
        })
        .collect()
}

/// 各行に見出しチェーンを付与する（2パス目）
///
/// データ行には直前の見出し（最大 `depth` 件、古い順）を " > " で連結して返す。
pub fn attach_sections(classes: &[RowClass], depth: usize) -> Vec<Option<String>> {
    let mut chain: Vec<&str> = Vec::with_capacity(depth + 1);
    classes
        .iter()
        .map(|class| match class {
            RowClass::Header(text) => {
                chain.push(text);
                if chain.len() > depth {
                    chain.remove(0);
                }
                None
            }
            RowClass::Data if !chain.is_empty() => Some(chain.join(SECTION_SEPARATOR)),
            _ => None,
        })
        .collect()
}

/// 説明が短い場合に見出しを前置した説明を作る
pub fn enhance_description(description: &str, section_chain: Option<&str>, short_len: usize) -> Option<String> {
    let nearest = section_chain?.rsplit(SECTION_SEPARATOR).next()?.trim();
    if nearest.is_empty() || description.chars().count() >= short_len {
        return None;
    }
    if description.to_lowercase().contains(&nearest.to_lowercase()) {
        return None;
    }
    Some(format!("{}{}{}", nearest, SECTION_SEPARATOR, description))
}
