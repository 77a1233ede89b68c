//! # Video TEE Trusted Application
//!
//! 非信頼側から受け取った画像バッファを信頼境界の内側でグレースケールに変換し、
//! 変換結果のダイジェスト・境界外に出ない鍵による署名・検証用公開鍵を返す。
//!
//! ## モジュール構成
//! - [`runtime`]: 暗号プリミティブプロバイダの抽象化とモック実装
//! - [`session`]: セッションごとの暗号ハンドルの生存期間管理
//! - [`params`]: 4スロットのパラメータチャネル
//! - [`grayscale`]: 計算ステージ
//! - [`pipeline`]: ダイジェスト→鍵生成→署名→組み立て
//! - [`dispatch`]: コマンドの振り分けと失敗時の巻き戻し
//! - [`storage`]: セキュアストレージ
//! - [`app`]: TAのエントリポイント

pub mod app;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod grayscale;
pub mod params;
pub mod pipeline;
pub mod runtime;
pub mod session;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use app::TrustedApp;
pub use config::{ConfigError, KeyPolicy, TaConfig};
pub use error::TaError;
pub use params::{OutputBuffer, Param, Parameters, Value};
pub use runtime::mock::MockProvider;
pub use runtime::CryptoProvider;
pub use session::Session;
pub use storage::{MemoryStorage, SecureStorage, StorageError};
