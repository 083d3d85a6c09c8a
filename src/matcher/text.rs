//! 照合用テキスト前処理
//!
//! 小文字化 → 複合語結合 → 寸法・数値のプレースホルダ化 → 記号除去
//! → ストップワード除去 → 同義語変換 → 語幹化 の順に処理する。

use boq_match_common::synonyms::is_stop_word;
use boq_match_common::SynonymTable;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref MEASUREMENT: Regex = Regex::new(
        r"\b\d+(?:\.\d+)?\s*(?:mm|cm|m2|m3|m|inch|inches|ft|feet|yard|yards|yd|kg)\b"
    )
    .unwrap();
    static ref NUMBER: Regex = Regex::new(r"\b\d+(?:\.\d+)?\b").unwrap();
    static ref SPEC_TERM: Regex = Regex::new(r"\b(grade|class|type|size)\s*([a-z0-9]+)\b").unwrap();
    static ref NON_WORD: Regex = Regex::new(r"[^a-z0-9_\s]").unwrap();
}

/// 寸法のプレースホルダ
pub const MEASUREMENT_TOKEN: &str = "measure";
/// 数値のプレースホルダ
pub const NUMBER_TOKEN: &str = "num";

/// 前処理済みテキスト
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessedText {
    /// 語幹化済みトークン（出現順）
    pub tokens: Vec<String>,
    /// トークンを空白で連結したもの
    pub joined: String,
    /// 寸法表記（"100mm" のように空白除去）
    pub measurements: Vec<String>,
    /// 規格表記（"grade c25" など）
    pub specs: Vec<String>,
    /// 記号除去のみのトークン
    pub raw_tokens: Vec<String>,
}

impl ProcessedText {
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// 記号除去のみのトークンで作り直す
    ///
    /// "A/C" のように前処理で語が残らない短い説明の採点に使う。
    pub fn raw(&self) -> ProcessedText {
        ProcessedText {
            tokens: self.raw_tokens.clone(),
            joined: self.raw_tokens.join(" "),
            measurements: self.measurements.clone(),
            specs: self.specs.clone(),
            raw_tokens: self.raw_tokens.clone(),
        }
    }
}

/// 前処理器
#[derive(Debug, Clone, Default)]
pub struct Preprocessor {
    synonyms: SynonymTable,
}

impl Preprocessor {
    pub fn new(synonyms: SynonymTable) -> Self {
        Self { synonyms }
    }

    pub fn synonyms(&self) -> &SynonymTable {
        &self.synonyms
    }

    pub fn process(&self, text: &str) -> ProcessedText {
        let lowered = text.to_lowercase();

        let measurements = MEASUREMENT
            .find_iter(&lowered)
            .map(|m| m.as_str().split_whitespace().collect::<String>())
            .collect();
        let specs = SPEC_TERM
            .captures_iter(&lowered)
            .map(|c| format!("{} {}", &c[1], &c[2]))
            .collect();

        let joined = self.synonyms.join_compounds(&lowered);
        let replaced = MEASUREMENT.replace_all(&joined, format!(" {} ", MEASUREMENT_TOKEN));
        let replaced = NUMBER.replace_all(&replaced, format!(" {} ", NUMBER_TOKEN));
        let cleaned = NON_WORD.replace_all(&replaced, " ");

        let tokens: Vec<String> = cleaned
            .split_whitespace()
            .filter(|t| !is_stop_word(t))
            .map(|t| self.synonyms.canonical(t).to_string())
            .filter(|t| t.chars().count() > 2)
            .map(|t| stem(&t))
            .collect();

        let raw_tokens = NON_WORD
            .replace_all(&lowered, " ")
            .split_whitespace()
            .map(String::from)
            .collect();

        ProcessedText {
            joined: tokens.join(" "),
            tokens,
            measurements,
            specs,
            raw_tokens,
        }
    }
}

/// 簡易語幹化（4文字以下と複合語はそのまま）
pub fn stem(token: &str) -> String {
    if token.len() <= 4 || token.contains('_') {
        return token.to_string();
    }
    for suffix in ["ings", "tion", "sion", "ing", "ed"] {
        if let Some(base) = token.strip_suffix(suffix) {
            if base.len() >= 3 {
                return base.to_string();
            }
        }
    }
    if let Some(base) = token.strip_suffix("es") {
        if base.ends_with(['s', 'x', 'z']) || base.ends_with("ch") || base.ends_with("sh") {
            return base.to_string();
        }
    }
    if !token.ends_with("ss") {
        if let Some(base) = token.strip_suffix('s') {
            return base.to_string();
        }
    }
    token.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn construction() -> Preprocessor {
        Preprocessor::new(SynonymTable::from_preset("construction").unwrap())
    }

    #[test]
    fn test_process_replaces_measurements_and_synonyms() {
        let processed = construction().process("Supply and install 100mm PVC pipes");
        assert_eq!(processed.tokens, vec!["provide", "install", "measure", "pvc", "pipe"]);
        assert_eq!(processed.measurements, vec!["100mm"]);
    }

    #[test]
    fn test_process_keeps_spec_terms() {
        let processed = construction().process("Concrete Grade C25, 2 No. layers");
        assert_eq!(processed.specs, vec!["grade c25"]);
        assert!(processed.tokens.contains(&"num".to_string()));
        assert!(processed.tokens.contains(&"concrete".to_string()));
    }

    #[test]
    fn test_process_joins_compounds() {
        let processed = construction().process("Reinforced concrete slab");
        assert_eq!(processed.tokens[0], "reinforced_concrete");
    }

    #[test]
    fn test_raw_keeps_short_tokens() {
        let processed = construction().process("A/C");
        assert!(processed.is_empty());
        assert_eq!(processed.raw().tokens, vec!["a", "c"]);
        assert_eq!(processed.raw().joined, "a c");
    }

    #[test]
    fn test_stem() {
        assert_eq!(stem("pipes"), "pipe");
        assert_eq!(stem("boxes"), "box");
        assert_eq!(stem("glass"), "glass");
        assert_eq!(stem("painted"), "paint");
        assert_eq!(stem("tiles"), "tile");
        assert_eq!(stem("slab"), "slab");
    }
}
