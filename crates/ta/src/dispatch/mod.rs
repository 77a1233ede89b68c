//! # 呼び出しディスパッチャ
//!
//! コマンドIDと検証済みパラメータをパイプラインに振り分け、ステータスを返す。
//!
//! ## 処理フロー
//! 1. コマンドIDの解決（未知のIDは`BadParameters`）
//! 2. パラメータ種別の完全一致検査（不一致はバッファ・セッションに触れず拒否）
//! 3. 入力長・出力容量の前提条件検査（セッションに触れず拒否、出力サイズは0）
//! 4. 信頼側コピー → グレースケール変換 → Attestationパイプライン → 出力書き戻し
//! 5. 設定で有効ならセキュアストレージに保存（失敗は警告のみ）
//!
//! 4で失敗した場合はセッションの全ハンドルを解放し、出力サイズを0にする。

mod handler;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use vtee_types::{Command, TaStatus};

use crate::config::TaConfig;
use crate::error::TaError;
use crate::params::Parameters;
use crate::pipeline::{transition, InvocationState};
use crate::session::{Session, SessionId};
use crate::storage::SecureStorage;

/// 呼び出しディスパッチャ。
pub struct Dispatcher {
    config: TaConfig,
    storage: Option<Arc<dyn SecureStorage>>,
}

impl Dispatcher {
    pub fn new(config: TaConfig) -> Self {
        Self {
            config,
            storage: None,
        }
    }

    /// 成功したAttestationの保存先を設定する。
    pub fn with_storage(mut self, storage: Arc<dyn SecureStorage>) -> Self {
        self.set_storage(storage);
        self
    }

    pub fn set_storage(&mut self, storage: Arc<dyn SecureStorage>) {
        self.storage = Some(storage);
    }

    pub fn config(&self) -> &TaConfig {
        &self.config
    }

    /// コマンドを実行し、ステータスを返す。
    pub fn invoke(
        &self,
        session: &mut Session,
        command_id: u32,
        params: &mut Parameters<'_>,
    ) -> TaStatus {
        let session_id = session.id();

        let Some(command) = Command::from_id(command_id) else {
            transition(InvocationState::Idle, InvocationState::Rejected);
            tracing::warn!(session = session_id, command_id, "未知のコマンドIDです");
            return TaStatus::BadParameters;
        };
        if let Err(e) = params.validate(command.expected_param_types()) {
            transition(InvocationState::Idle, InvocationState::Rejected);
            tracing::warn!(
                session = session_id,
                ?command,
                error = %e,
                "パラメータ種別を拒否しました"
            );
            return e.status();
        }
        let state = transition(InvocationState::Idle, InvocationState::ParamsValidated);

        match command {
            Command::ProcessAndAttest => self.process_and_attest(session, params, state),
        }
    }

    fn process_and_attest(
        &self,
        session: &mut Session,
        params: &mut Parameters<'_>,
        state: InvocationState,
    ) -> TaStatus {
        let session_id = session.id();

        let input = match handler::check_preconditions(params, &self.config) {
            Ok(input) => input,
            Err(e) => {
                params.clear_outputs();
                return self.fail(session_id, state, &e);
            }
        };

        let outcome = handler::process_and_attest(
            &mut session.context,
            self.config.key_policy,
            input,
            params,
        );
        let attested = match outcome {
            Ok(attested) => attested,
            Err(e) => {
                session.context.abort();
                params.clear_outputs();
                return self.fail(session_id, state, &e);
            }
        };

        let digest_hex = hex::encode(attested.digest);
        tracing::info!(
            session = session_id,
            image_bytes = attested.image_len,
            digest = %digest_hex,
            completed = session.context.completed_invocations(),
            "Attestationを発行しました"
        );

        if self.config.persist_attestations {
            self.persist(&digest_hex, &attested.bundle);
        }
        transition(InvocationState::Assembled, InvocationState::Idle);
        TaStatus::Ok
    }

    fn persist(&self, id: &str, bundle: &[u8]) {
        let Some(storage) = &self.storage else {
            tracing::warn!(id, "保存先のセキュアストレージが設定されていません");
            return;
        };
        match storage.store_secure(id, bundle) {
            Ok(()) => tracing::debug!(id, "Attestationをセキュアストレージに保存しました"),
            Err(e) => tracing::warn!(id, error = %e, "Attestationの保存に失敗しました"),
        }
    }

    fn fail(&self, session_id: SessionId, state: InvocationState, error: &TaError) -> TaStatus {
        transition(state, InvocationState::Failed);
        tracing::warn!(
            session = session_id,
            status = %error.status(),
            error = %error,
            "呼び出しに失敗しました"
        );
        transition(InvocationState::Failed, InvocationState::Idle);
        error.status()
    }
}
