//! テスト用の共通ヘルパー

use p256::ecdsa::SigningKey;
use p256::elliptic_curve::sec1::ToEncodedPoint;

use crate::runtime::mock::MockProvider;
use crate::runtime::{
    CryptoProvider, EccCurve, KeyHandle, OperationHandle, ProviderError, PublicComponent,
};

/// 注入する障害の種類。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    /// ダイジェスト操作の確保に失敗
    DigestAlloc,
    /// ダイジェスト計算に失敗
    Digest,
    /// 31バイトのダイジェストを返す
    DigestLength,
    /// 鍵生成に失敗
    Keygen,
    /// 公開鍵成分の輸出に失敗
    Export,
    /// 空の公開鍵成分を返す
    EmptyComponent,
    /// 署名操作の確保に失敗（スロット枯渇）
    SignAlloc,
    /// 署名に失敗
    Sign,
    /// 63バイトの署名を返す
    SignatureLength,
}

impl Fault {
    pub(crate) const ALL: [Fault; 9] = [
        Fault::DigestAlloc,
        Fault::Digest,
        Fault::DigestLength,
        Fault::Keygen,
        Fault::Export,
        Fault::EmptyComponent,
        Fault::SignAlloc,
        Fault::Sign,
        Fault::SignatureLength,
    ];
}

/// 指定したステージで失敗するプロバイダ。それ以外は[`MockProvider`]に委譲する。
pub(crate) struct FaultInjectingProvider {
    inner: MockProvider,
    fault: Fault,
}

impl FaultInjectingProvider {
    pub(crate) fn new(fault: Fault) -> Self {
        Self {
            inner: MockProvider::new(),
            fault,
        }
    }

    pub(crate) fn live_handles(&self) -> usize {
        self.inner.live_handles()
    }

    fn injected(&self) -> ProviderError {
        ProviderError::Backend(format!("注入された障害: {:?}", self.fault))
    }
}

impl CryptoProvider for FaultInjectingProvider {
    fn provider_type(&self) -> &str {
        "fault-injecting"
    }

    fn allocate_digest_operation(&self) -> Result<OperationHandle, ProviderError> {
        if self.fault == Fault::DigestAlloc {
            return Err(self.injected());
        }
        self.inner.allocate_digest_operation()
    }

    fn digest(&self, op: OperationHandle, data: &[u8]) -> Result<Vec<u8>, ProviderError> {
        match self.fault {
            Fault::Digest => Err(self.injected()),
            Fault::DigestLength => {
                let mut digest = self.inner.digest(op, data)?;
                digest.truncate(31);
                Ok(digest)
            }
            _ => self.inner.digest(op, data),
        }
    }

    fn generate_keypair(&self, curve: EccCurve) -> Result<KeyHandle, ProviderError> {
        if self.fault == Fault::Keygen {
            return Err(self.injected());
        }
        self.inner.generate_keypair(curve)
    }

    fn export_public_component(
        &self,
        key: KeyHandle,
        which: PublicComponent,
    ) -> Result<Vec<u8>, ProviderError> {
        match self.fault {
            Fault::Export => Err(self.injected()),
            Fault::EmptyComponent if which == PublicComponent::Y => Ok(Vec::new()),
            _ => self.inner.export_public_component(key, which),
        }
    }

    fn allocate_sign_operation(&self, key: KeyHandle) -> Result<OperationHandle, ProviderError> {
        if self.fault == Fault::SignAlloc {
            return Err(ProviderError::SlotsExhausted { limit: 0 });
        }
        self.inner.allocate_sign_operation(key)
    }

    fn sign(&self, op: OperationHandle, digest: &[u8]) -> Result<Vec<u8>, ProviderError> {
        match self.fault {
            Fault::Sign => Err(self.injected()),
            Fault::SignatureLength => {
                let mut signature = self.inner.sign(op, digest)?;
                signature.pop();
                Ok(signature)
            }
            _ => self.inner.sign(op, digest),
        }
    }

    fn release_operation(&self, op: OperationHandle) {
        self.inner.release_operation(op);
    }

    fn release_key(&self, key: KeyHandle) {
        self.inner.release_key(key);
    }
}

/// x成分またはy成分の先頭バイトが0になる鍵を、小さいスカラーから順に探す。
///
/// 成分を最小長で輸出すると32バイト未満になる。
pub(crate) fn short_component_key() -> SigningKey {
    (1u32..)
        .filter_map(|seed| {
            let mut scalar = [0u8; 32];
            scalar[28..].copy_from_slice(&seed.to_be_bytes());
            SigningKey::from_slice(&scalar).ok()
        })
        .find(|key| {
            let point = p256::PublicKey::from(key.verifying_key()).to_encoded_point(false);
            let has_leading_zero = [point.x(), point.y()]
                .into_iter()
                .flatten()
                .any(|coordinate| coordinate[0] == 0);
            has_leading_zero
        })
        .unwrap()
}

/// 鍵生成で常に同じ鍵を返すプロバイダ。それ以外は[`MockProvider`]に委譲する。
pub(crate) struct PinnedKeyProvider {
    inner: MockProvider,
    key: SigningKey,
}

impl PinnedKeyProvider {
    pub(crate) fn new(key: SigningKey) -> Self {
        Self {
            inner: MockProvider::new(),
            key,
        }
    }

    pub(crate) fn live_handles(&self) -> usize {
        self.inner.live_handles()
    }
}

impl CryptoProvider for PinnedKeyProvider {
    fn provider_type(&self) -> &str {
        "pinned-key"
    }

    fn allocate_digest_operation(&self) -> Result<OperationHandle, ProviderError> {
        self.inner.allocate_digest_operation()
    }

    fn digest(&self, op: OperationHandle, data: &[u8]) -> Result<Vec<u8>, ProviderError> {
        self.inner.digest(op, data)
    }

    fn generate_keypair(&self, curve: EccCurve) -> Result<KeyHandle, ProviderError> {
        match curve {
            EccCurve::NistP256 => self.inner.import_keypair(self.key.clone()),
        }
    }

    fn export_public_component(
        &self,
        key: KeyHandle,
        which: PublicComponent,
    ) -> Result<Vec<u8>, ProviderError> {
        self.inner.export_public_component(key, which)
    }

    fn allocate_sign_operation(&self, key: KeyHandle) -> Result<OperationHandle, ProviderError> {
        self.inner.allocate_sign_operation(key)
    }

    fn sign(&self, op: OperationHandle, digest: &[u8]) -> Result<Vec<u8>, ProviderError> {
        self.inner.sign(op, digest)
    }

    fn release_operation(&self, op: OperationHandle) {
        self.inner.release_operation(op);
    }

    fn release_key(&self, key: KeyHandle) {
        self.inner.release_key(key);
    }
}
