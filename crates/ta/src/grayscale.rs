//! # グレースケール変換
//!
//! RGB3バイト組の画素列をその場で輝度に置き換える。
//! 各画素は `round(0.3*r + 0.59*g + 0.11*b)` を3チャネル全てに書き込む。
//! 丸めは整数演算 `(30r + 59g + 11b + 50) / 100` で行い、ちょうど半分の値は切り上げる。

use crate::error::TaError;

/// 1画素のバイト数（R, G, B）
pub const BYTES_PER_PIXEL: usize = 3;

/// 1画素の輝度。
pub fn luminance(r: u8, g: u8, b: u8) -> u8 {
    let weighted = 30 * u32::from(r) + 59 * u32::from(g) + 11 * u32::from(b);
    // 最大値は (25500 + 50) / 100 = 255
    ((weighted + 50) / 100) as u8
}

/// バッファ全体をグレースケールに変換する。
pub fn to_grayscale(pixels: &mut [u8]) -> Result<(), TaError> {
    if pixels.len() % BYTES_PER_PIXEL != 0 {
        return Err(TaError::BadParameters(format!(
            "画素データ長が3の倍数ではありません: {} bytes",
            pixels.len()
        )));
    }

    for pixel in pixels.chunks_exact_mut(BYTES_PER_PIXEL) {
        let gray = luminance(pixel[0], pixel[1], pixel[2]);
        pixel.fill(gray);
    }
    Ok(())
}
