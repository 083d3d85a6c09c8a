//! 単価カタログ索引モジュール
//!
//! カタログ項目をIDとカテゴリで引けるようにし、
//! 明細のカテゴリ推定（見出し → シート名 → 説明の優先順）を行う。

use crate::domain::materials_in;
use crate::error::{Error, Result};
use crate::types::{CatalogEntry, LineItem};
use std::collections::{BTreeMap, HashMap};

/// カタログ索引
#[derive(Debug, Clone, Default)]
pub struct CatalogIndex {
    /// 全項目
    entries: Vec<CatalogEntry>,
    /// ID → 位置
    by_id: HashMap<String, usize>,
    /// 小文字カテゴリ → 位置の一覧
    by_category: BTreeMap<String, Vec<usize>>,
    /// 小文字カテゴリ → 表示名
    category_names: BTreeMap<String, String>,
}

impl CatalogIndex {
    /// 項目一覧から索引を構築
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        let mut by_id = HashMap::new();
        let mut by_category: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        let mut category_names = BTreeMap::new();

        for (idx, entry) in entries.iter().enumerate() {
            by_id.insert(entry.id.clone(), idx);
            if let Some(category) = entry.category.as_deref().map(str::trim) {
                if !category.is_empty() {
                    let key = category.to_lowercase();
                    by_category.entry(key.clone()).or_default().push(idx);
                    category_names.entry(key).or_insert_with(|| category.to_string());
                }
            }
        }

        Self {
            entries,
            by_id,
            by_category,
            category_names,
        }
    }

    /// JSON配列から読み込み（単価の無い項目は不正）
    pub fn from_json(json: &str) -> Result<Self> {
        let entries: Vec<CatalogEntry> = serde_json::from_str(json)?;
        validate_entries(&entries)?;
        Ok(Self::new(entries))
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// IDで項目を取得
    pub fn get(&self, id: &str) -> Option<&CatalogEntry> {
        self.by_id.get(id).map(|&idx| &self.entries[idx])
    }

    /// カテゴリ一覧（表示名、ソート済み）
    pub fn categories(&self) -> Vec<&str> {
        self.category_names.values().map(String::as_str).collect()
    }

    /// 指定カテゴリの項目
    pub fn in_category(&self, category: &str) -> Vec<&CatalogEntry> {
        self.by_category
            .get(&category.to_lowercase())
            .map(|indices| indices.iter().map(|&idx| &self.entries[idx]).collect())
            .unwrap_or_default()
    }

    /// 明細のカテゴリを推定
    ///
    /// 見出し、シート名、説明の順に調べ、最初に見つかったカテゴリを返す。
    pub fn infer_category(&self, item: &LineItem) -> Option<&str> {
        if self.by_category.is_empty() {
            return None;
        }

        let sources = [
            item.section_header.as_deref(),
            Some(item.sheet_name.as_str()),
            Some(item.description.as_str()),
        ];

        sources
            .into_iter()
            .flatten()
            .find_map(|source| self.category_for_text(source))
    }

    /// テキストに対応するカテゴリを探す
    fn category_for_text(&self, text: &str) -> Option<&str> {
        let words = significant_words(text);
        if words.is_empty() {
            return None;
        }

        // カテゴリ名の語が直接現れるもの
        let direct = self.category_names.iter().find(|(key, _)| {
            significant_words(key)
                .iter()
                .any(|cat_word| words.contains(cat_word))
        });
        if let Some((_, name)) = direct {
            return Some(name.as_str());
        }

        // 材料カテゴリ経由
        let text_materials = materials_in(text);
        if text_materials.is_empty() {
            return None;
        }
        self.category_names
            .iter()
            .find(|(key, _)| {
                materials_in(key)
                    .iter()
                    .any(|material| text_materials.contains(material))
            })
            .map(|(_, name)| name.as_str())
    }
}

/// 単価が有限で非負であることを確認
pub fn validate_entries(entries: &[CatalogEntry]) -> Result<()> {
    for entry in entries {
        if entry.id.trim().is_empty() {
            return Err(Error::InvalidCatalog("entry without id".into()));
        }
        if !entry.rate.is_finite() || entry.rate < 0.0 {
            return Err(Error::InvalidCatalog(format!(
                "entry {} has invalid rate {}",
                entry.id, entry.rate
            )));
        }
    }
    Ok(())
}

/// 4文字以上の語を単数形に寄せて返す
fn significant_words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 4 && !matches!(*w, "work" | "works" | "item" | "items" | "bill" | "part"))
        .map(|w| w.strip_suffix('s').unwrap_or(w).to_string())
        .collect()
}
