//! 同義語変換モジュール
//!
//! BOQとカタログの表記ゆれ（bricks / brickwork / blockwork など）を
//! 正規形に寄せる。

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 前処理で除去するストップワード
pub const STOP_WORDS: &[&str] = &[
    "the", "and", "of", "to", "in", "for", "on", "at", "by", "from", "with", "a", "an", "be",
    "is", "are", "as", "it", "its", "into", "or", "this", "that", "will", "shall", "would",
    "could", "should", "may", "might", "per", "each", "all", "any", "some", "no", "not", "only",
    "such", "than", "too", "very", "can", "had", "was", "one", "our", "out", "get", "has", "how",
    "new", "now", "old", "see", "two", "way", "who", "did", "use", "including", "etc",
];

pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(&token)
}

/// 同義語テーブル
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SynonymTable {
    /// 語 → 正規形
    #[serde(default)]
    pub words: HashMap<String, String>,
    /// 1トークンとして扱う複合語
    #[serde(default)]
    pub compounds: Vec<String>,
}

impl SynonymTable {
    /// 組み込みプリセットを取得
    pub fn from_preset(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "construction" | "default" => Some(Self::construction_preset()),
            "none" | "empty" => Some(Self::default()),
            _ => None,
        }
    }

    /// JSONファイルから読み込み
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// JSON文字列から読み込み
    pub fn from_json(json: &str) -> Result<Self> {
        let mut table: Self = serde_json::from_str(json)?;
        table.words = table
            .words
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v.to_lowercase()))
            .collect();
        table.compounds = table.compounds.iter().map(|c| c.to_lowercase()).collect();
        Ok(table)
    }

    /// 別テーブルを上書きマージ
    pub fn merge(&mut self, other: SynonymTable) {
        self.words.extend(other.words);
        for compound in other.compounds {
            if !self.compounds.contains(&compound) {
                self.compounds.push(compound);
            }
        }
    }

    /// 正規形を返す（未登録ならそのまま）
    pub fn canonical<'a>(&'a self, token: &'a str) -> &'a str {
        self.words.get(token).map(String::as_str).unwrap_or(token)
    }

    /// 複合語の空白を `_` に置き換えて1語にする（小文字テキスト前提）
    pub fn join_compounds(&self, lowered: &str) -> String {
        let mut text = lowered.to_string();
        for compound in &self.compounds {
            if text.contains(compound.as_str()) {
                text = text.replace(compound.as_str(), &compound.replace(' ', "_"));
            }
        }
        text
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// 建設工事用プリセット
    fn construction_preset() -> Self {
        let pairs: &[(&str, &str)] = &[
            // 材料
            ("bricks", "brick"), ("brickwork", "brick"), ("blocks", "brick"),
            ("blockwork", "brick"), ("masonry", "brick"), ("stonework", "stone"),
            ("flagstone", "stone"), ("tiles", "tile"), ("tiling", "tile"),
            ("pavers", "paver"), ("paving", "paver"), ("slabs", "slab"),
            // コンクリート
            ("cement", "concrete"), ("mortar", "concrete"), ("grout", "concrete"),
            ("screed", "concrete"), ("render", "concrete"),
            ("stucco", "plaster"), ("skim", "plaster"),
            // 基礎
            ("footing", "foundation"), ("footings", "foundation"),
            ("foundations", "foundation"), ("basement", "foundation"),
            ("substructure", "foundation"), ("raft", "foundation"),
            // 掘削
            ("excavation", "excavate"), ("excavations", "excavate"),
            ("dig", "excavate"), ("digging", "excavate"), ("earthwork", "excavate"),
            ("earthworks", "excavate"), ("trenching", "excavate"), ("grading", "excavate"),
            ("backfill", "fill"), ("backfilling", "fill"), ("filling", "fill"),
            // 施工
            ("installation", "install"), ("installing", "install"), ("installed", "install"),
            ("erection", "install"), ("assembly", "install"), ("fitting", "install"),
            ("fix", "install"), ("fixing", "install"), ("mount", "install"),
            ("mounting", "install"), ("construction", "build"), ("building", "build"),
            // 撤去
            ("demolition", "demolish"), ("demolishing", "demolish"), ("remove", "demolish"),
            ("removal", "demolish"), ("strip", "demolish"), ("break", "demolish"),
            ("dismantle", "demolish"), ("dismantling", "demolish"),
            // 供給
            ("supply", "provide"), ("supplies", "provide"), ("providing", "provide"),
            ("furnish", "provide"), ("deliver", "provide"), ("procurement", "provide"),
            ("provision", "provide"),
            // 仕上げ
            ("painting", "paint"), ("plastering", "plaster"), ("flooring", "floor"),
            ("roofing", "roof"), ("cladding", "clad"), ("insulation", "insulate"),
            ("waterproofing", "waterproof"), ("dampproof", "waterproof"),
            // 設備
            ("electrical", "electric"), ("plumbing", "plumb"), ("sanitary", "plumb"),
            ("hvac", "ventilation"), ("heating", "heat"), ("cooling", "cool"),
            ("drainage", "drain"), ("drains", "drain"),
            // 構造
            ("rebar", "reinforcement"), ("rebars", "reinforcement"),
            ("reinforcing", "reinforcement"), ("reinforce", "reinforcement"),
            ("steelwork", "steel"), ("formwork", "form"), ("shuttering", "form"),
            ("framework", "frame"), ("frames", "frame"), ("structural", "structure"),
            ("girder", "beam"),
            // 建具
            ("doors", "door"), ("windows", "window"), ("glazing", "glass"), ("glazed", "glass"),
        ];

        let compounds = [
            "reinforced concrete", "mild steel", "tor steel", "cement mortar",
            "false ceiling", "suspended ceiling", "damp proof", "water proof",
            "fire rated", "double coat", "single coat", "base coat", "finish coat",
        ];

        Self {
            words: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            compounds: compounds.iter().map(|c| c.to_string()).collect(),
        }
    }
}
