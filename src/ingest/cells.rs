//! セル値の変換と明細テキストの整形

use boq_match_common::domain::normalize_unit;
use calamine::Data;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref LEADING_NUMBER: Regex = Regex::new(r"^-?\d+(?:\.\d+)?").unwrap();
    static ref COMMA_DECIMAL: Regex = Regex::new(r"^-?\d+,\d{1,2}$").unwrap();
    static ref ITEM_PREFIX: Regex = Regex::new(r"(?i)^item\s*\d+[.\-:\s]*").unwrap();
    static ref NUMBER_PREFIX: Regex = Regex::new(r"^\d+(?:\.\d+)*[.\-:)\s]+").unwrap();
    static ref SEPARATOR_ONLY: Regex = Regex::new(r"^[\s\-=_*.~#]+$").unwrap();
}

/// 正規化済みのセル
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Cell {
    #[default]
    Empty,
    Text(String),
    Number(f64),
}

impl Cell {
    /// calamineのセルから変換（日付などは空扱い）
    pub fn from_data(data: &Data) -> Self {
        match data {
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Float(f) => Cell::Number(*f),
            Data::Bool(b) => Cell::Text(b.to_string()),
            Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    Cell::Empty
                } else {
                    Cell::Text(trimmed.to_string())
                }
            }
            _ => Cell::Empty,
        }
    }

    pub fn text(s: &str) -> Self {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            Cell::Empty
        } else {
            Cell::Text(trimmed.to_string())
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }

    /// 文字列セルのみ
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// 数値セル、または数値として読める文字列
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(n) if n.is_finite() => Some(*n),
            Cell::Text(s) => parse_number_text(s),
            _ => None,
        }
    }

    /// 表示用文字列
    pub fn display(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.clone(),
            Cell::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            Cell::Number(n) => n.to_string(),
        }
    }
}

/// 行のセルを取得（範囲外は空）
pub fn cell_at(row: &[Cell], col: usize) -> &Cell {
    const EMPTY: &Cell = &Cell::Empty;
    row.get(col).unwrap_or(EMPTY)
}

/// 見出しセルの正規化（小文字英数字のみ）
pub fn normalize_header(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// 数値文字列を解釈（桁区切り・小数カンマ対応）
fn parse_number_text(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    let candidate = if COMMA_DECIMAL.is_match(trimmed) {
        trimmed.replace(',', ".")
    } else {
        trimmed.replace([',', ' '], "")
    };
    if candidate.is_empty() {
        return None;
    }
    candidate.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// 数量セルの解釈結果
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuantity {
    pub value: f64,
    /// "50 m2" のような末尾の単位
    pub unit: Option<String>,
}

/// 数量セルを解釈
///
/// 数値セルはそのまま、文字列は先頭の数値部分を読む。
pub fn parse_quantity(cell: &Cell) -> Option<ParsedQuantity> {
    match cell {
        Cell::Number(n) if n.is_finite() => Some(ParsedQuantity { value: *n, unit: None }),
        Cell::Text(text) => {
            let trimmed = text.trim();
            if let Some(value) = parse_number_text(trimmed) {
                return Some(ParsedQuantity { value, unit: None });
            }

            let compact = if COMMA_DECIMAL.is_match(trimmed) {
                trimmed.replace(',', ".")
            } else {
                trimmed.replace(',', "")
            };
            let m = LEADING_NUMBER.find(&compact)?;
            let value: f64 = m.as_str().parse().ok()?;
            let rest = compact[m.end()..].trim();
            let unit = normalize_unit(rest).map(|_| rest.to_string());
            Some(ParsedQuantity { value, unit })
        }
        _ => None,
    }
}

/// 単価セルを解釈（通貨記号を除去）
pub fn parse_rate(cell: &Cell) -> Option<f64> {
    match cell {
        Cell::Number(n) if n.is_finite() => Some(*n),
        Cell::Text(text) => {
            let stripped: String = text
                .chars()
                .filter(|c| !matches!(c, '£' | '$' | '€' | '₹'))
                .collect();
            parse_number_text(&stripped)
        }
        _ => None,
    }
}

/// 説明から項目番号の前置きを除去
pub fn clean_description(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let without_item = ITEM_PREFIX.replace(&collapsed, "");
    let without_number = NUMBER_PREFIX.replace(&without_item, "");
    without_number.trim().to_string()
}

/// 合計行・区切り行
pub fn is_totals_or_separator(text: &str) -> bool {
    let lowered = text.trim().to_lowercase();
    if lowered.is_empty() || SEPARATOR_ONLY.is_match(&lowered) {
        return true;
    }
    const MARKERS: &[&str] = &[
        "grand total",
        "page total",
        "sub-total",
        "subtotal",
        "carried forward",
        "brought forward",
        "carried to collection",
        "carried to summary",
    ];
    MARKERS.iter().any(|m| lowered.contains(m)) || lowered == "total"
}
