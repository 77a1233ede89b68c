//! # 暗号プリミティブプロバイダ抽象化
//!
//! ハードウェアの信頼の基点に結びついたダイジェスト・鍵生成・署名操作を抽象化するトレイト。
//! 操作と鍵はハンドルで参照され、明示的に解放されるまでプロバイダのスロットを占有する。
//!
//! 現在のプロバイダ実装:
//! - `mock`: ローカル開発・テスト用（メモリ内で`sha2`と`p256`を使用）
//!
//! ハンドルの解放漏れを防ぐため、TA内部ではハンドルを直接持たず
//! [`OperationGuard`] / [`KeyGuard`] に包んで扱う。ガードのDropで必ず解放される。

pub mod mock;

use std::fmt;
use std::sync::Arc;

/// 暗号操作（ダイジェスト・署名）のハンドル。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationHandle(u32);

impl OperationHandle {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

/// 鍵オブジェクトのハンドル。秘密鍵素材そのものはプロバイダ外に出ない。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyHandle(u32);

impl KeyHandle {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

/// 鍵生成に使う名前付き曲線。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EccCurve {
    /// NIST P-256（256ビット体）
    NistP256,
}

/// 輸出する公開鍵成分。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicComponent {
    X,
    Y,
}

/// プロバイダのエラー型。
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// 操作・鍵スロットの枯渇
    #[error("暗号ハンドルのスロットが枯渇しました（上限: {limit}）")]
    SlotsExhausted { limit: usize },
    /// 存在しない、または解放済みのハンドル
    #[error("不明なハンドルです: {0}")]
    UnknownHandle(u32),
    /// ハンドルの種別が要求された操作と一致しない
    #[error("ハンドル{0}の種別が操作と一致しません")]
    WrongHandleKind(u32),
    /// バックエンドの処理失敗
    #[error("暗号バックエンドの処理に失敗: {0}")]
    Backend(String),
}

/// 暗号プリミティブプロバイダのトレイト。
pub trait CryptoProvider: Send + Sync {
    /// プロバイダ種別を返す（ログ出力用）。
    fn provider_type(&self) -> &str;

    /// SHA-256ダイジェスト操作を確保する。
    fn allocate_digest_operation(&self) -> Result<OperationHandle, ProviderError>;

    /// 確保済みのダイジェスト操作でデータ全体のハッシュを計算する。
    fn digest(&self, op: OperationHandle, data: &[u8]) -> Result<Vec<u8>, ProviderError>;

    /// 指定曲線のキーペアを生成し、鍵オブジェクトのハンドルを返す。
    fn generate_keypair(&self, curve: EccCurve) -> Result<KeyHandle, ProviderError>;

    /// 公開鍵成分を輸出する。符号化長は座標長より短い場合がある。
    fn export_public_component(
        &self,
        key: KeyHandle,
        which: PublicComponent,
    ) -> Result<Vec<u8>, ProviderError>;

    /// 鍵に結びついたECDSA署名操作を確保する。鍵は操作にコピーされる。
    fn allocate_sign_operation(&self, key: KeyHandle) -> Result<OperationHandle, ProviderError>;

    /// ダイジェストに署名する（prehash署名、出力は r || s）。
    fn sign(&self, op: OperationHandle, digest: &[u8]) -> Result<Vec<u8>, ProviderError>;

    /// 操作ハンドルを解放する。
    fn release_operation(&self, op: OperationHandle);

    /// 鍵オブジェクトを破棄する。
    fn release_key(&self, key: KeyHandle);
}

/// 操作ハンドルのスコープガード。Dropで操作を解放する。
pub struct OperationGuard {
    provider: Arc<dyn CryptoProvider>,
    handle: OperationHandle,
}

impl OperationGuard {
    pub fn new(provider: Arc<dyn CryptoProvider>, handle: OperationHandle) -> Self {
        Self { provider, handle }
    }

    pub fn handle(&self) -> OperationHandle {
        self.handle
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        tracing::debug!(handle = self.handle.raw(), "暗号操作を解放します");
        self.provider.release_operation(self.handle);
    }
}

impl fmt::Debug for OperationGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationGuard")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// 鍵ハンドルのスコープガード。Dropで鍵オブジェクトを破棄する。
pub struct KeyGuard {
    provider: Arc<dyn CryptoProvider>,
    handle: KeyHandle,
}

impl KeyGuard {
    pub fn new(provider: Arc<dyn CryptoProvider>, handle: KeyHandle) -> Self {
        Self { provider, handle }
    }

    pub fn handle(&self) -> KeyHandle {
        self.handle
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        tracing::debug!(handle = self.handle.raw(), "鍵オブジェクトを破棄します");
        self.provider.release_key(self.handle);
    }
}

impl fmt::Debug for KeyGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyGuard")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}
