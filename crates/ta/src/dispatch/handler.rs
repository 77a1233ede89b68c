//! process-and-attest コマンドの実装

use vtee_types::{BUNDLE_SIZE, DIGEST_SIZE};

use crate::config::{KeyPolicy, TaConfig};
use crate::error::TaError;
use crate::grayscale;
use crate::params::Parameters;
use crate::pipeline::{self, InvocationState};
use crate::session::SessionContext;

/// 入力画像（RGB画素列）
pub(crate) const SLOT_IMAGE_IN: usize = 0;
/// Attestationバンドルの出力先
pub(crate) const SLOT_BUNDLE: usize = 1;
/// グレースケール画像の出力先
pub(crate) const SLOT_IMAGE_OUT: usize = 2;

/// 呼び出し成功時の結果。
#[derive(Debug)]
pub(crate) struct Attested {
    pub digest: [u8; DIGEST_SIZE],
    pub bundle: [u8; BUNDLE_SIZE],
    pub image_len: usize,
}

/// 入力長と出力容量の前提条件を検査する。セッションには一切触れない。
pub(crate) fn check_preconditions<'a>(
    params: &Parameters<'a>,
    config: &TaConfig,
) -> Result<&'a [u8], TaError> {
    let input = params.memref_input(SLOT_IMAGE_IN)?;

    if input.is_empty() {
        return Err(TaError::BadParameters("入力画像が空です".into()));
    }
    if input.len() > config.max_image_bytes {
        return Err(TaError::BadParameters(format!(
            "入力画像が上限を超えています: {} bytes (上限: {} bytes)",
            input.len(),
            config.max_image_bytes
        )));
    }
    if input.len() % grayscale::BYTES_PER_PIXEL != 0 {
        return Err(TaError::BadParameters(format!(
            "入力画像の長さが3の倍数ではありません: {} bytes",
            input.len()
        )));
    }

    let bundle_capacity = params.output_capacity(SLOT_BUNDLE)?;
    if bundle_capacity < BUNDLE_SIZE {
        return Err(TaError::BadParameters(format!(
            "Attestation出力の容量が不足しています: {bundle_capacity} bytes (必要: {BUNDLE_SIZE} bytes)"
        )));
    }
    let image_capacity = params.output_capacity(SLOT_IMAGE_OUT)?;
    if image_capacity != input.len() {
        return Err(TaError::BadParameters(format!(
            "画像出力の容量が入力長と一致しません: {image_capacity} bytes (入力: {} bytes)",
            input.len()
        )));
    }

    Ok(input)
}

/// 信頼側コピーを確保する。確保失敗は`OutOfResources`。
fn trusted_copy(input: &[u8]) -> Result<Vec<u8>, TaError> {
    let mut copy = Vec::new();
    copy.try_reserve_exact(input.len()).map_err(|e| {
        TaError::OutOfResources(format!(
            "入力画像のコピー領域を確保できません: {} bytes ({e})",
            input.len()
        ))
    })?;
    copy.extend_from_slice(input);
    Ok(copy)
}

/// 変換・Attestation・出力書き戻しを行う。
///
/// 前提条件は[`check_preconditions`]で検査済みであること。
/// エラー時のハンドル解放と出力の巻き戻しは呼び出し側が行う。
pub(crate) fn process_and_attest(
    ctx: &mut SessionContext,
    policy: KeyPolicy,
    input: &[u8],
    params: &mut Parameters<'_>,
) -> Result<Attested, TaError> {
    let mut image = trusted_copy(input)?;
    grayscale::to_grayscale(&mut image)?;
    pipeline::transition(InvocationState::ParamsValidated, InvocationState::Computed);

    ctx.clear_result();
    let result = pipeline::attest(ctx, &image, policy)?;
    let digest = result.digest;
    let bundle = result.to_bytes();

    params.memref_output(SLOT_BUNDLE)?.write(&bundle)?;
    params.memref_output(SLOT_IMAGE_OUT)?.write(&image)?;

    if policy == KeyPolicy::PerInvocation {
        ctx.release_keypair();
    }

    Ok(Attested {
        digest,
        bundle,
        image_len: image.len(),
    })
}
