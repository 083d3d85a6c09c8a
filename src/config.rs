use crate::error::{BoqError, Result};
use crate::matcher::hybrid::{HybridWeights, PrefilterOptions};
use crate::strategy::{ProviderKind, Strategy};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cohere_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub cohere_model: String,
    pub openai_model: String,
    /// 照合方式
    pub strategy: Strategy,
    /// semantic/hybrid で使うプロバイダ（先頭が primary、最大2件）
    pub providers: Vec<ProviderKind>,
    /// 1バッチあたりの明細数
    pub batch_size: usize,
    pub timeout_seconds: u64,
    /// この信頼度未満は LowConfidenceMatched
    pub min_confidence: f64,
    pub hybrid: HybridWeights,
    pub prefilter: PrefilterOptions,
    pub synonym_preset: String,
    /// 追加の同義語JSON
    pub synonym_file: Option<PathBuf>,
    /// ジョブ記録の保存先（未指定なら設定ディレクトリ配下）
    pub job_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cohere_api_key: None,
            openai_api_key: None,
            cohere_model: "embed-english-v3.0".into(),
            openai_model: "text-embedding-3-large".into(),
            strategy: Strategy::Lexical,
            providers: vec![ProviderKind::Cohere],
            batch_size: 100,
            timeout_seconds: 240,
            min_confidence: 0.40,
            hybrid: HybridWeights::default(),
            prefilter: PrefilterOptions::default(),
            synonym_preset: "construction".into(),
            synonym_file: None,
            job_dir: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = serde_json::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| BoqError::Config("ホームディレクトリが見つかりません".into()))?;
        Ok(home.join(".config").join("boq-match"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// ジョブ記録ディレクトリ
    pub fn jobs_dir(&self) -> Result<PathBuf> {
        match &self.job_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(Self::config_dir()?.join("jobs")),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(BoqError::Config("batch_size は1以上にしてください".into()));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(BoqError::Config("min_confidence は0〜1で指定してください".into()));
        }
        if self.providers.len() > 2 {
            return Err(BoqError::Config("providers は最大2件です".into()));
        }
        Ok(())
    }

    pub fn get_api_key(&self, provider: ProviderKind) -> Result<String> {
        // 環境変数を優先
        let (env_name, stored) = match provider {
            ProviderKind::Cohere => ("COHERE_API_KEY", &self.cohere_api_key),
            ProviderKind::Openai => ("OPENAI_API_KEY", &self.openai_api_key),
            ProviderKind::Hashing => return Ok(String::new()),
        };
        if let Ok(key) = std::env::var(env_name) {
            if !key.trim().is_empty() {
                return Ok(key);
            }
        }

        stored
            .clone()
            .ok_or_else(|| BoqError::MissingApiKey(provider.to_string()))
    }

    /// `provider=KEY` 形式でAPIキーを設定
    pub fn set_api_key(&mut self, assignment: &str) -> Result<ProviderKind> {
        let (name, key) = assignment
            .split_once('=')
            .ok_or_else(|| BoqError::Config("PROVIDER=KEY の形式で指定してください".into()))?;
        let provider: ProviderKind = name.parse()?;
        match provider {
            ProviderKind::Cohere => self.cohere_api_key = Some(key.trim().to_string()),
            ProviderKind::Openai => self.openai_api_key = Some(key.trim().to_string()),
            ProviderKind::Hashing => {
                return Err(BoqError::Config("hashing プロバイダにキーは不要です".into()))
            }
        }
        self.save()?;
        Ok(provider)
    }
}
