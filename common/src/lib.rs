//! BOQ Match Common Library
//!
//! 取り込み・照合・ジョブ制御で共有される型とドメイン表

pub mod types;
pub mod job;
pub mod synonyms;
pub mod error;
pub mod catalog;
pub mod domain;
pub mod export;

pub use types::{
    CatalogEntry, ConfidenceCategory, LineItem, MatchCandidate, MatchMethod, MatchOutcome,
    MatchResult, SECTION_SEPARATOR,
};
pub use job::{Job, JobStatus, JobUpdate};
pub use synonyms::SynonymTable;
pub use error::{Error, Result};
pub use catalog::CatalogIndex;
pub use domain::{normalize_unit, unit_relation, UnitRelation};
