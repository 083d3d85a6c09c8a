//! 抽出品質スコア（診断用、取り込みの可否には使わない）

use boq_match_common::LineItem;
use serde::Serialize;

/// 抽出品質
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityScore {
    /// 明細候補行のうち明細になった割合
    pub extraction_rate: f64,
    pub average_description_length: f64,
    /// 数量が常識的な範囲（0.01〜10,000）にある割合
    pub sane_quantity_ratio: f64,
    /// 単位を持つ割合
    pub unit_ratio: f64,
    /// 重み付き合計 [0, 1]
    pub score: f64,
}

const SANE_QUANTITY: std::ops::RangeInclusive<f64> = 0.01..=10_000.0;

/// 品質スコアを計算
///
/// # Arguments
/// * `items` - 抽出された明細
/// * `candidate_rows` - 明細になり得た行数（見出し・空行を除く）
pub fn compute_quality(items: &[LineItem], candidate_rows: usize) -> QualityScore {
    if items.is_empty() {
        return QualityScore::default();
    }
    let n = items.len() as f64;

    let extraction_rate = if candidate_rows == 0 {
        0.0
    } else {
        (n / candidate_rows as f64).min(1.0)
    };
    let average_description_length =
        items.iter().map(|i| i.description.chars().count()).sum::<usize>() as f64 / n;
    let sane_quantity_ratio =
        items.iter().filter(|i| SANE_QUANTITY.contains(&i.quantity)).count() as f64 / n;
    let unit_ratio = items.iter().filter(|i| i.unit.is_some()).count() as f64 / n;

    let score = extraction_rate * 0.4
        + (average_description_length / 40.0).min(1.0) * 0.2
        + sane_quantity_ratio * 0.2
        + unit_ratio * 0.2;

    QualityScore {
        extraction_rate,
        average_description_length,
        sane_quantity_ratio,
        unit_ratio,
        score,
    }
}
