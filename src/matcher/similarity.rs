//! 文字列・トークン類似度
//!
//! すべて [0, 1] を返す。

use std::collections::HashSet;

/// 正規化レーベンシュタイン類似度（両方空なら1）
pub fn levenshtein_ratio(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b)
}

/// トークン集合のJaccard係数
pub fn jaccard<S: AsRef<str>>(a: &[S], b: &[S]) -> f64 {
    let set_a: HashSet<&str> = a.iter().map(AsRef::as_ref).collect();
    let set_b: HashSet<&str> = b.iter().map(AsRef::as_ref).collect();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        return 0.0;
    }
    set_a.intersection(&set_b).count() as f64 / union as f64
}

/// `a` のトークンのうち `b` に含まれる割合
pub fn containment<S: AsRef<str>>(a: &[S], b: &[S]) -> f64 {
    let set_a: HashSet<&str> = a.iter().map(AsRef::as_ref).collect();
    if set_a.is_empty() {
        return 0.0;
    }
    let set_b: HashSet<&str> = b.iter().map(AsRef::as_ref).collect();
    set_a.intersection(&set_b).count() as f64 / set_a.len() as f64
}

/// 共通語数 / 多い方の語数
pub fn word_overlap<S: AsRef<str>>(a: &[S], b: &[S]) -> f64 {
    let set_a: HashSet<&str> = a.iter().map(AsRef::as_ref).collect();
    let set_b: HashSet<&str> = b.iter().map(AsRef::as_ref).collect();
    let larger = set_a.len().max(set_b.len());
    if larger == 0 {
        return 0.0;
    }
    set_a.intersection(&set_b).count() as f64 / larger as f64
}

/// 隣接2語の一致率
pub fn bigram_overlap<S: AsRef<str>>(a: &[S], b: &[S]) -> f64 {
    let pairs = |tokens: &[S]| -> HashSet<(String, String)> {
        tokens
            .windows(2)
            .map(|w| (w[0].as_ref().to_string(), w[1].as_ref().to_string()))
            .collect()
    };
    let (pairs_a, pairs_b) = (pairs(a), pairs(b));
    let larger = pairs_a.len().max(pairs_b.len());
    if larger == 0 {
        return 0.0;
    }
    pairs_a.intersection(&pairs_b).count() as f64 / larger as f64
}

/// 文字3-gramのJaccard係数
pub fn trigram_similarity(a: &str, b: &str) -> f64 {
    let grams = |text: &str| -> HashSet<Vec<char>> {
        let padded: Vec<char> = format!("  {} ", text.to_lowercase()).chars().collect();
        padded.windows(3).map(<[char]>::to_vec).collect()
    };
    let (grams_a, grams_b) = (grams(a), grams(b));
    let union = grams_a.union(&grams_b).count();
    if union == 0 {
        return 0.0;
    }
    grams_a.intersection(&grams_b).count() as f64 / union as f64
}

/// あいまいトークン一致
///
/// 3文字以上の各トークンについて相手側の最も近いトークンとの類似度を取り、
/// `threshold` 以上のものだけを合計して多い方のトークン数で割る。
pub fn fuzzy_token_score<S: AsRef<str>>(a: &[S], b: &[S], threshold: f64) -> f64 {
    let larger = a.len().max(b.len());
    if larger == 0 {
        return 0.0;
    }
    let total: f64 = a
        .iter()
        .map(AsRef::as_ref)
        .filter(|t| t.chars().count() >= 3)
        .filter_map(|token| {
            b.iter()
                .map(AsRef::as_ref)
                .filter(|other| other.chars().count() >= 3)
                .map(|other| levenshtein_ratio(token, other))
                .fold(None, |best: Option<f64>, sim| Some(best.map_or(sim, |cur| cur.max(sim))))
                .filter(|sim| *sim >= threshold)
        })
        .sum();
    (total / larger as f64).min(1.0)
}
