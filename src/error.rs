use thiserror::Error;

#[derive(Error, Debug)]
pub enum BoqError {
    #[error("設定エラー: {0}")]
    Config(String),

    #[error("APIキーが設定されていません ({0})。`boq-match config --set-api-key {0}=KEY` で設定してください")]
    MissingApiKey(String),

    #[error("ファイルが見つかりません: {0}")]
    FileNotFound(String),

    #[error("ドキュメントを読み込めません: {0}")]
    UnreadableDocument(String),

    #[error("未対応のファイル形式: {0}")]
    UnsupportedFormat(String),

    #[error("照合可能な明細構造が見つかりません: {0}")]
    NoMatchableStructure(String),

    #[error("カタログが不正: {0}")]
    InvalidCatalog(String),

    #[error("埋め込みプロバイダエラー: {0}")]
    Provider(String),

    #[error("timed out after {elapsed_secs}s during {phase}")]
    Timeout { elapsed_secs: u64, phase: String },

    #[error("ジョブが中断されました")]
    Cancelled,

    #[error("ジョブが見つかりません: {0}")]
    JobNotFound(String),

    #[error("ジョブストアエラー: {0}")]
    JobStore(String),

    #[error("Excel生成エラー: {0}")]
    ExcelGeneration(String),

    #[error("JSON解析エラー: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IOエラー: {0}")]
    Io(#[from] std::io::Error),
}

impl From<boq_match_common::Error> for BoqError {
    fn from(err: boq_match_common::Error) -> Self {
        use boq_match_common::Error as CommonError;
        match err {
            CommonError::Io(e) => BoqError::Io(e),
            CommonError::Json(e) => BoqError::JsonParse(e),
            CommonError::InvalidCatalog(msg) => BoqError::InvalidCatalog(msg),
            CommonError::Excel(msg) => BoqError::ExcelGeneration(msg),
            other @ CommonError::InvalidTransition { .. } => BoqError::JobStore(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, BoqError>;
