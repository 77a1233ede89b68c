//! # Trusted Application
//!
//! TAのエントリポイント（生成・セッションオープン・コマンド呼び出し・セッションクローズ・破棄）を
//! 1つのオブジェクトにまとめる。非信頼側のホストはこの型だけを使う。

use std::sync::Arc;

use vtee_types::{ParamTypes, TaStatus, TA_UUID};

use crate::config::TaConfig;
use crate::dispatch::Dispatcher;
use crate::params::Parameters;
use crate::runtime::CryptoProvider;
use crate::session::{Session, SessionManager};
use crate::storage::SecureStorage;

/// Trusted Application本体。
pub struct TrustedApp {
    sessions: SessionManager,
    dispatcher: Dispatcher,
}

impl TrustedApp {
    /// TAを生成する。
    pub fn new(config: TaConfig, provider: Arc<dyn CryptoProvider>) -> Self {
        tracing::info!(
            uuid = TA_UUID,
            provider = provider.provider_type(),
            max_sessions = config.max_sessions,
            max_image_bytes = config.max_image_bytes,
            key_policy = ?config.key_policy,
            "Trusted Applicationを生成しました"
        );
        Self {
            sessions: SessionManager::new(provider, config.max_sessions),
            dispatcher: Dispatcher::new(config),
        }
    }

    /// 成功したAttestationの保存先を設定する。
    pub fn with_storage(mut self, storage: Arc<dyn SecureStorage>) -> Self {
        self.dispatcher.set_storage(storage);
        self
    }

    pub fn config(&self) -> &TaConfig {
        self.dispatcher.config()
    }

    /// セッションをオープンする。
    pub fn open_session(&self, param_types: ParamTypes) -> Result<Session, TaStatus> {
        self.sessions.open(param_types).map_err(|e| {
            tracing::warn!(error = %e, "セッションをオープンできません");
            e.status()
        })
    }

    /// コマンドを呼び出す。
    pub fn invoke_command(
        &self,
        session: &mut Session,
        command_id: u32,
        params: &mut Parameters<'_>,
    ) -> TaStatus {
        self.dispatcher.invoke(session, command_id, params)
    }

    /// セッションをクローズする。
    pub fn close_session(&self, session: Session) {
        self.sessions.close(session);
    }

    /// 現在オープンしているセッション数。
    pub fn open_sessions(&self) -> usize {
        self.sessions.open_sessions()
    }
}

impl Drop for TrustedApp {
    fn drop(&mut self) {
        tracing::info!(
            open_sessions = self.open_sessions(),
            "Trusted Applicationを破棄します"
        );
    }
}
