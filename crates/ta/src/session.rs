//! # セッション管理
//!
//! 呼び出し側セッションごとの可変状態（暗号操作ハンドル・鍵ハンドル・結果バッファ）の
//! 生存期間を管理する。
//!
//! ## 不変条件
//! - 生きている暗号操作ハンドルは常に高々1つ。新しい操作を確保する前に前の操作を解放する。
//! - セッションのクローズ（またはDrop）で全ハンドルが解放される。
//! - 呼び出しには`&mut Session`が必要なため、1セッションに対する呼び出しは重ならない。

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use vtee_types::{AttestationBundle, ParamTypes};

use crate::error::TaError;
use crate::runtime::{
    CryptoProvider, KeyGuard, KeyHandle, OperationGuard, OperationHandle, ProviderError,
};

/// セッション識別子（ログ出力用）。
pub type SessionId = u32;

/// 1セッション分の可変状態。パイプラインの各ステージに`&mut`で渡される。
pub struct SessionContext {
    provider: Arc<dyn CryptoProvider>,
    /// 実行中の暗号操作（ダイジェストまたは署名）
    operation: Option<OperationGuard>,
    /// 生成済みキーペア
    keypair: Option<KeyGuard>,
    /// 直近の呼び出しで組み立てたAttestation結果
    result: Option<AttestationBundle>,
    /// 成功した呼び出しの回数
    completed_invocations: u64,
}

impl SessionContext {
    fn new(provider: Arc<dyn CryptoProvider>) -> Self {
        Self {
            provider,
            operation: None,
            keypair: None,
            result: None,
            completed_invocations: 0,
        }
    }

    pub(crate) fn provider(&self) -> &dyn CryptoProvider {
        self.provider.as_ref()
    }

    /// 前の操作を解放してから新しい操作を確保し、セッションに保持する。
    pub(crate) fn begin_operation<F>(&mut self, allocate: F) -> Result<OperationHandle, TaError>
    where
        F: FnOnce(&dyn CryptoProvider) -> Result<OperationHandle, ProviderError>,
    {
        self.operation = None;
        let handle = allocate(self.provider.as_ref())?;
        self.operation = Some(OperationGuard::new(self.provider.clone(), handle));
        Ok(handle)
    }

    /// 実行中の操作を解放する。
    pub(crate) fn end_operation(&mut self) {
        self.operation = None;
    }

    pub(crate) fn keypair(&self) -> Option<KeyHandle> {
        self.keypair.as_ref().map(KeyGuard::handle)
    }

    /// 生成済みのキーペアをセッションに預ける。既存の鍵は破棄される。
    pub(crate) fn install_keypair(&mut self, handle: KeyHandle) {
        self.keypair = Some(KeyGuard::new(self.provider.clone(), handle));
    }

    pub(crate) fn release_keypair(&mut self) {
        self.keypair = None;
    }

    /// 失敗時の巻き戻し。確保済みの操作と鍵を全て解放し、途中結果を捨てる。
    pub(crate) fn abort(&mut self) {
        self.operation = None;
        self.keypair = None;
        self.result = None;
    }

    pub(crate) fn clear_result(&mut self) {
        self.result = None;
    }

    /// 組み立てた結果を記録し、呼び出し側へのコピー元として返す。
    pub(crate) fn record_result(&mut self, bundle: AttestationBundle) -> &AttestationBundle {
        self.completed_invocations += 1;
        self.result.insert(bundle)
    }

    #[cfg(test)]
    pub(crate) fn result(&self) -> Option<&AttestationBundle> {
        self.result.as_ref()
    }

    pub(crate) fn completed_invocations(&self) -> u64 {
        self.completed_invocations
    }

    #[cfg(test)]
    pub(crate) fn has_live_operation(&self) -> bool {
        self.operation.is_some()
    }
}

/// オープン済みセッション数のカウンタ。Dropで1つ減らす。
struct SessionSlot {
    open: Arc<AtomicUsize>,
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::AcqRel);
    }
}

/// 呼び出し側から見たセッション。中身は不透明で、ディスパッチャだけが参照する。
pub struct Session {
    id: SessionId,
    // contextを先にDropしてハンドルを解放してからスロットを返す
    pub(crate) context: SessionContext,
    _slot: SessionSlot,
}

impl Session {
    pub fn id(&self) -> SessionId {
        self.id
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// セッションマネージャ。セッションの生成・破棄と同時オープン数の上限を管理する。
pub struct SessionManager {
    provider: Arc<dyn CryptoProvider>,
    max_sessions: usize,
    open: Arc<AtomicUsize>,
    next_id: AtomicU32,
}

impl SessionManager {
    pub fn new(provider: Arc<dyn CryptoProvider>, max_sessions: usize) -> Self {
        Self {
            provider,
            max_sessions,
            open: Arc::new(AtomicUsize::new(0)),
            next_id: AtomicU32::new(1),
        }
    }

    /// セッションをオープンする。パラメータは全スロット未使用でなければならない。
    pub fn open(&self, param_types: ParamTypes) -> Result<Session, TaError> {
        if param_types != ParamTypes::NONE {
            return Err(TaError::BadParameters(format!(
                "セッションオープンのパラメータは全て未使用である必要があります: 0x{:04x}",
                param_types.pack()
            )));
        }

        self.open
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_sessions).then_some(n + 1)
            })
            .map_err(|n| {
                TaError::OutOfResources(format!(
                    "同時セッション数が上限に達しています: {n}/{}",
                    self.max_sessions
                ))
            })?;
        let slot = SessionSlot {
            open: self.open.clone(),
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            session = id,
            provider = self.provider.provider_type(),
            "セッションをオープンしました"
        );

        Ok(Session {
            id,
            context: SessionContext::new(self.provider.clone()),
            _slot: slot,
        })
    }

    /// セッションをクローズする。生きている操作・鍵ハンドルは全て解放される。
    pub fn close(&self, session: Session) {
        let id = session.id;
        let completed = session.context.completed_invocations;
        drop(session);
        tracing::info!(session = id, completed, "セッションをクローズしました");
    }

    /// 現在オープンしているセッション数。
    pub fn open_sessions(&self) -> usize {
        self.open.load(Ordering::Acquire)
    }
}
