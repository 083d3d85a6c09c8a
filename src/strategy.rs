use crate::error::BoqError;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// 照合方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Lexical,
    Semantic,
    Hybrid,
}

impl Strategy {
    /// 埋め込みプロバイダを必要とするか
    pub fn needs_embeddings(self) -> bool {
        !matches!(self, Strategy::Lexical)
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Lexical => write!(f, "lexical"),
            Strategy::Semantic => write!(f, "semantic"),
            Strategy::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// 埋め込みプロバイダ
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Cohere,
    Openai,
    /// オフラインの決定的プロバイダ
    Hashing,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Cohere => write!(f, "cohere"),
            ProviderKind::Openai => write!(f, "openai"),
            ProviderKind::Hashing => write!(f, "hashing"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = BoqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cohere" => Ok(ProviderKind::Cohere),
            "openai" => Ok(ProviderKind::Openai),
            "hashing" | "local" => Ok(ProviderKind::Hashing),
            other => Err(BoqError::Config(format!("不明なプロバイダ: {}", other))),
        }
    }
}
