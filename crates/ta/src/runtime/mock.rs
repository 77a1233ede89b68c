//! # ローカル開発用モックプロバイダ
//!
//! TEEハードウェアが利用できない開発環境で使用するモック実装。
//! メモリ内で鍵を生成し、`sha2` / `p256` で計算する。
//!
//! ハードウェアのプロバイダと同じく、操作・鍵の同時保持数に上限がある。
//! 公開鍵成分はbignumの最小長ビッグエンディアン（先頭ゼロバイトを省略）で輸出する。

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use p256::ecdsa::signature::hazmat::PrehashSigner;
use p256::ecdsa::{Signature, SigningKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use vtee_types::DIGEST_SIZE;

use super::{CryptoProvider, EccCurve, KeyHandle, OperationHandle, ProviderError, PublicComponent};

/// デフォルトの同時保持可能ハンドル数（操作 + 鍵）
pub const DEFAULT_MAX_HANDLES: usize = 8;

/// スロットに保持されるオブジェクト。
enum Slot {
    /// SHA-256ダイジェスト操作
    Digest,
    /// ECDSA署名操作（確保時に鍵をコピーして保持）
    Sign(SigningKey),
    /// P-256キーペア
    Key(SigningKey),
}

struct Inner {
    next_handle: u32,
    slots: HashMap<u32, Slot>,
}

/// モック暗号プロバイダ。ローカル開発・テスト用。
pub struct MockProvider {
    inner: Mutex<Inner>,
    max_handles: usize,
}

impl MockProvider {
    /// MockProviderを初期化する。
    pub fn new() -> Self {
        Self::with_handle_limit(DEFAULT_MAX_HANDLES)
    }

    /// 同時保持可能なハンドル数を指定して初期化する。
    pub fn with_handle_limit(max_handles: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_handle: 1,
                slots: HashMap::new(),
            }),
            max_handles,
        }
    }

    /// 現在保持されているハンドル数（操作 + 鍵）。解放漏れの検出に使う。
    pub fn live_handles(&self) -> usize {
        self.lock().slots.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, slot: Slot) -> Result<u32, ProviderError> {
        let mut inner = self.lock();
        if inner.slots.len() >= self.max_handles {
            return Err(ProviderError::SlotsExhausted {
                limit: self.max_handles,
            });
        }
        // 一周した後も使用中のハンドルは再発行しない
        let mut handle = inner.next_handle;
        while inner.slots.contains_key(&handle) {
            handle = handle.wrapping_add(1).max(1);
        }
        inner.next_handle = handle.wrapping_add(1).max(1);
        inner.slots.insert(handle, slot);
        Ok(handle)
    }

    /// 既存の鍵をキーペアスロットに登録する。
    #[cfg(test)]
    pub(crate) fn import_keypair(&self, key: SigningKey) -> Result<KeyHandle, ProviderError> {
        self.insert(Slot::Key(key)).map(KeyHandle::new)
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl CryptoProvider for MockProvider {
    fn provider_type(&self) -> &str {
        "mock"
    }

    fn allocate_digest_operation(&self) -> Result<OperationHandle, ProviderError> {
        self.insert(Slot::Digest).map(OperationHandle::new)
    }

    fn digest(&self, op: OperationHandle, data: &[u8]) -> Result<Vec<u8>, ProviderError> {
        match self.lock().slots.get(&op.raw()) {
            Some(Slot::Digest) => {}
            Some(_) => return Err(ProviderError::WrongHandleKind(op.raw())),
            None => return Err(ProviderError::UnknownHandle(op.raw())),
        }
        // ハッシュ計算中はロックを保持しない
        Ok(vtee_crypto::sha256(data).to_vec())
    }

    fn generate_keypair(&self, curve: EccCurve) -> Result<KeyHandle, ProviderError> {
        let key = match curve {
            EccCurve::NistP256 => SigningKey::random(&mut rand::rngs::OsRng),
        };
        self.insert(Slot::Key(key)).map(KeyHandle::new)
    }

    fn export_public_component(
        &self,
        key: KeyHandle,
        which: PublicComponent,
    ) -> Result<Vec<u8>, ProviderError> {
        let inner = self.lock();
        let signing_key = match inner.slots.get(&key.raw()) {
            Some(Slot::Key(k)) => k,
            Some(_) => return Err(ProviderError::WrongHandleKind(key.raw())),
            None => return Err(ProviderError::UnknownHandle(key.raw())),
        };

        let point = p256::PublicKey::from(signing_key.verifying_key()).to_encoded_point(false);
        let coordinate = match which {
            PublicComponent::X => point.x(),
            PublicComponent::Y => point.y(),
        }
        .ok_or_else(|| ProviderError::Backend("公開鍵が無限遠点です".into()))?;

        // bignum輸出と同じく先頭のゼロバイトを省く
        let start = coordinate
            .iter()
            .position(|&b| b != 0)
            .unwrap_or(coordinate.len());
        Ok(coordinate[start..].to_vec())
    }

    fn allocate_sign_operation(&self, key: KeyHandle) -> Result<OperationHandle, ProviderError> {
        let signing_key = {
            let inner = self.lock();
            match inner.slots.get(&key.raw()) {
                Some(Slot::Key(k)) => k.clone(),
                Some(_) => return Err(ProviderError::WrongHandleKind(key.raw())),
                None => return Err(ProviderError::UnknownHandle(key.raw())),
            }
        };
        self.insert(Slot::Sign(signing_key))
            .map(OperationHandle::new)
    }

    fn sign(&self, op: OperationHandle, digest: &[u8]) -> Result<Vec<u8>, ProviderError> {
        // 署名計算中はロックを保持しない
        let signing_key = match self.lock().slots.get(&op.raw()) {
            Some(Slot::Sign(k)) => k.clone(),
            Some(_) => return Err(ProviderError::WrongHandleKind(op.raw())),
            None => return Err(ProviderError::UnknownHandle(op.raw())),
        };
        if digest.len() != DIGEST_SIZE {
            return Err(ProviderError::Backend(format!(
                "ダイジェスト長が不正です: {} bytes",
                digest.len()
            )));
        }

        let signature: Signature = signing_key
            .sign_prehash(digest)
            .map_err(|e| ProviderError::Backend(format!("ECDSA署名に失敗: {e}")))?;
        Ok(signature.to_bytes().to_vec())
    }

    fn release_operation(&self, op: OperationHandle) {
        let mut inner = self.lock();
        if matches!(inner.slots.get(&op.raw()), Some(Slot::Digest | Slot::Sign(_))) {
            inner.slots.remove(&op.raw());
        } else {
            tracing::warn!(handle = op.raw(), "解放対象の暗号操作が見つかりません");
        }
    }

    fn release_key(&self, key: KeyHandle) {
        let mut inner = self.lock();
        if matches!(inner.slots.get(&key.raw()), Some(Slot::Key(_))) {
            inner.slots.remove(&key.raw());
        } else {
            tracing::warn!(
                handle = key.raw(),
                "破棄対象の鍵オブジェクトが見つかりません"
            );
        }
    }
}
