//! # TA エラー型
//!
//! パイプラインの全ステージで共通のエラー型。
//! 呼び出し側へは [`TaError::status`] で数値ステータスに変換して返す。

use vtee_types::TaStatus;

use crate::runtime::ProviderError;

/// TAエラー型。
#[derive(Debug, thiserror::Error)]
pub enum TaError {
    /// パラメータの形状・長さが前提条件を満たさない
    #[error("不正なパラメータ: {0}")]
    BadParameters(String),
    /// セッション状態・暗号ハンドル・入力コピーの確保に失敗
    #[error("リソースが不足しています: {0}")]
    OutOfResources(String),
    /// 暗号プロバイダのエラー、または想定外の長さの出力
    #[error("暗号処理に失敗: {0}")]
    CryptoFailure(String),
}

impl TaError {
    /// 呼び出し側に返すステータス。
    pub fn status(&self) -> TaStatus {
        match self {
            TaError::BadParameters(_) => TaStatus::BadParameters,
            TaError::OutOfResources(_) => TaStatus::OutOfResources,
            TaError::CryptoFailure(_) => TaStatus::CryptoFailure,
        }
    }
}

impl From<ProviderError> for TaError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::SlotsExhausted { .. } => TaError::OutOfResources(e.to_string()),
            ProviderError::UnknownHandle(_)
            | ProviderError::WrongHandleKind(_)
            | ProviderError::Backend(_) => TaError::CryptoFailure(e.to_string()),
        }
    }
}
