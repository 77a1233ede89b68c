//! # Attestationパイプライン
//!
//! 変換済みバッファから検証可能なAttestationを組み立てる。
//!
//! ## 処理フロー
//! 1. ダイジェスト操作を確保し、変換後のバッファ全体のSHA-256を計算して即座に解放
//! 2. P-256キーペアを生成（鍵ポリシーが`PerSession`なら既存の鍵を再利用）
//! 3. 公開鍵成分x, yを実際の長さのまま輸出
//! 4. 鍵に結びついた署名操作を確保し、ダイジェストに署名して解放
//! 5. 結果をセッションコンテキストに記録
//!
//! どのステージで失敗しても、それまでに確保したハンドルは呼び出し側の巻き戻し
//! （[`SessionContext::abort`]）で解放される。

use std::fmt;

use vtee_types::{AttestationBundle, PubkeyComponent, DIGEST_SIZE, SIGNATURE_SIZE};

use crate::config::KeyPolicy;
use crate::error::TaError;
use crate::runtime::{EccCurve, KeyHandle, PublicComponent};
use crate::session::SessionContext;

/// 1回の呼び出しの状態。ログ出力用。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    Idle,
    ParamsValidated,
    Computed,
    Digested,
    Signed,
    Assembled,
    Failed,
    Rejected,
}

impl fmt::Display for InvocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InvocationState::Idle => "idle",
            InvocationState::ParamsValidated => "params_validated",
            InvocationState::Computed => "computed",
            InvocationState::Digested => "digested",
            InvocationState::Signed => "signed",
            InvocationState::Assembled => "assembled",
            InvocationState::Failed => "failed",
            InvocationState::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// 状態遷移をdebugログに出す。
pub(crate) fn transition(from: InvocationState, to: InvocationState) -> InvocationState {
    tracing::debug!(%from, %to, "状態遷移");
    to
}

/// 変換済みデータのダイジェストを計算する。
pub(crate) fn digest_stage(
    ctx: &mut SessionContext,
    data: &[u8],
) -> Result<[u8; DIGEST_SIZE], TaError> {
    let op = ctx.begin_operation(|p| p.allocate_digest_operation())?;
    let digest = ctx.provider().digest(op, data);
    ctx.end_operation();

    let digest = digest?;
    <[u8; DIGEST_SIZE]>::try_from(digest.as_slice()).map_err(|_| {
        TaError::CryptoFailure(format!(
            "ダイジェスト長が不正です: {} bytes (期待: {DIGEST_SIZE} bytes)",
            digest.len()
        ))
    })
}

/// 署名用キーペアを用意する。
pub(crate) fn keygen_stage(
    ctx: &mut SessionContext,
    policy: KeyPolicy,
) -> Result<KeyHandle, TaError> {
    if policy == KeyPolicy::PerSession {
        if let Some(key) = ctx.keypair() {
            tracing::debug!(handle = key.raw(), "セッション鍵を再利用します");
            return Ok(key);
        }
    }

    ctx.release_keypair();
    let key = ctx.provider().generate_keypair(EccCurve::NistP256)?;
    ctx.install_keypair(key);
    tracing::debug!(handle = key.raw(), "P-256キーペアを生成しました");
    Ok(key)
}

/// 公開鍵成分を輸出する。長さ0または32バイト超は`CryptoFailure`。
pub(crate) fn export_stage(
    ctx: &SessionContext,
    key: KeyHandle,
    which: PublicComponent,
) -> Result<PubkeyComponent, TaError> {
    let raw = ctx.provider().export_public_component(key, which)?;
    if raw.is_empty() {
        return Err(TaError::CryptoFailure(format!(
            "公開鍵成分{which:?}が空です"
        )));
    }
    PubkeyComponent::new(&raw).ok_or_else(|| {
        TaError::CryptoFailure(format!(
            "公開鍵成分{which:?}の長さが不正です: {} bytes",
            raw.len()
        ))
    })
}

/// ダイジェストに署名する。署名長が64バイトでなければ`CryptoFailure`。
pub(crate) fn sign_stage(
    ctx: &mut SessionContext,
    key: KeyHandle,
    digest: &[u8; DIGEST_SIZE],
) -> Result<[u8; SIGNATURE_SIZE], TaError> {
    let op = ctx.begin_operation(|p| p.allocate_sign_operation(key))?;
    let signature = ctx.provider().sign(op, digest);
    ctx.end_operation();

    let signature = signature?;
    <[u8; SIGNATURE_SIZE]>::try_from(signature.as_slice()).map_err(|_| {
        TaError::CryptoFailure(format!(
            "署名長が不正です: {} bytes (期待: {SIGNATURE_SIZE} bytes)",
            signature.len()
        ))
    })
}

/// ダイジェスト→鍵生成→署名→組み立てを実行し、結果をセッションに記録する。
///
/// `image` は変換済みの信頼側コピー。
pub(crate) fn attest<'c>(
    ctx: &'c mut SessionContext,
    image: &[u8],
    policy: KeyPolicy,
) -> Result<&'c AttestationBundle, TaError> {
    let mut state = InvocationState::Computed;

    let digest = digest_stage(ctx, image)?;
    state = transition(state, InvocationState::Digested);

    let key = keygen_stage(ctx, policy)?;
    let pub_key_x = export_stage(ctx, key, PublicComponent::X)?;
    let pub_key_y = export_stage(ctx, key, PublicComponent::Y)?;
    let signature = sign_stage(ctx, key, &digest)?;
    state = transition(state, InvocationState::Signed);

    let bundle = AttestationBundle {
        digest,
        signature,
        pub_key_x,
        pub_key_y,
    };
    transition(state, InvocationState::Assembled);
    Ok(ctx.record_result(bundle))
}
