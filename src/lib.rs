//! BOQ明細の取り込みと単価カタログ照合
//!
//! スプレッドシートから明細を抽出し、lexical / semantic / hybrid の
//! いずれかの方式でカタログ項目と照合する。ジョブはバッチ単位で進み、
//! キャンセル・停止・タイムアウトをバッチ境界で確認する。

pub mod catalog;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod export;
pub mod ingest;
pub mod job;
pub mod logging;
pub mod matcher;
pub mod retry;
pub mod strategy;

pub use error::{BoqError, Result};
