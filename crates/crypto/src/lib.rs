//! # Video TEE 暗号処理
//!
//! TAとホストの双方で使う暗号ヘルパー。
//!
//! ## 暗号アルゴリズム
//! | 用途 | アルゴリズム |
//! |------|------------|
//! | ハッシュ | SHA-256 |
//! | 署名 | ECDSA P-256（ダイジェストに対するprehash署名、r \|\| s） |
//! | 公開鍵 | P-256 非圧縮点（x, y 成分を個別に輸出） |

use sha2::{Digest, Sha256};
use vtee_types::{AttestationBundle, PUBKEY_COMPONENT_SIZE, SIGNATURE_SIZE};

/// 暗号処理のエラー型
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// 公開鍵成分の長さが座標長を超えている
    #[error("公開鍵成分が長すぎます: {0} bytes")]
    ComponentTooLong(usize),
    /// 公開鍵がP-256曲線上の点ではない
    #[error("公開鍵がP-256曲線上の点ではありません")]
    InvalidPublicKey,
    /// 署名の形式が不正
    #[error("署名の形式が不正です: {0}")]
    InvalidSignature(String),
}

/// SEC1非圧縮点の長さ（0x04 || x || y）
pub const SEC1_UNCOMPRESSED_SIZE: usize = 1 + 2 * PUBKEY_COMPONENT_SIZE;

/// SHA-256ハッシュ計算。
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// 短く符号化された公開鍵成分を座標長まで先頭ゼロ埋めする。
///
/// TEEのbignum輸出は先頭のゼロバイトを省くため、受け取った長さをそのまま信用せず
/// 必ずこの関数で正規化してから点を組み立てる。
pub fn pad_component(component: &[u8]) -> Result<[u8; PUBKEY_COMPONENT_SIZE], CryptoError> {
    if component.len() > PUBKEY_COMPONENT_SIZE {
        return Err(CryptoError::ComponentTooLong(component.len()));
    }
    let mut out = [0u8; PUBKEY_COMPONENT_SIZE];
    out[PUBKEY_COMPONENT_SIZE - component.len()..].copy_from_slice(component);
    Ok(out)
}

/// x, y 成分からSEC1非圧縮点を組み立てる。点が曲線上にあることも確認する。
pub fn public_key_sec1(x: &[u8], y: &[u8]) -> Result<[u8; SEC1_UNCOMPRESSED_SIZE], CryptoError> {
    let mut out = [0u8; SEC1_UNCOMPRESSED_SIZE];
    out[0] = 0x04;
    out[1..1 + PUBKEY_COMPONENT_SIZE].copy_from_slice(&pad_component(x)?);
    out[1 + PUBKEY_COMPONENT_SIZE..].copy_from_slice(&pad_component(y)?);

    p256::PublicKey::from_sec1_bytes(&out).map_err(|_| CryptoError::InvalidPublicKey)?;
    Ok(out)
}

/// バンドルに含まれる公開鍵をSEC1非圧縮点として取り出す。
pub fn bundle_public_key_sec1(
    bundle: &AttestationBundle,
) -> Result<[u8; SEC1_UNCOMPRESSED_SIZE], CryptoError> {
    public_key_sec1(bundle.pub_key_x.as_bytes(), bundle.pub_key_y.as_bytes())
}

/// 固定長（r || s）の署名をASN.1 DER形式に変換する。
pub fn signature_to_der(raw: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if raw.len() != SIGNATURE_SIZE {
        return Err(CryptoError::InvalidSignature(format!(
            "長さが{}バイトではありません: {}",
            SIGNATURE_SIZE,
            raw.len()
        )));
    }
    let signature = ecdsa::Signature::<p256::NistP256>::from_slice(raw)
        .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
    Ok(signature.to_der().as_bytes().to_vec())
}
