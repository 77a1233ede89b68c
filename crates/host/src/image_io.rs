//! 画像ファイルの読み込みと書き出し

use std::path::Path;

use anyhow::{anyhow, Context};

/// RGB画素列と画像サイズ。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbPixels {
    pub rgb: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// 画像ファイルを読み込み、RGB8の画素列に変換する。
pub fn load(path: &Path) -> anyhow::Result<RgbPixels> {
    let decoded = image::open(path)
        .with_context(|| format!("画像の読み込みに失敗: {}", path.display()))?
        .to_rgb8();
    let (width, height) = decoded.dimensions();
    Ok(RgbPixels {
        rgb: decoded.into_raw(),
        width,
        height,
    })
}

/// RGB8の画素列を画像ファイルに書き出す。形式は拡張子から決まる。
pub fn store(path: &Path, rgb: &[u8], width: u32, height: u32) -> anyhow::Result<()> {
    let buffer = image::RgbImage::from_raw(width, height, rgb.to_vec()).ok_or_else(|| {
        anyhow!(
            "画素数が画像サイズと一致しません: {} bytes ({width}x{height})",
            rgb.len()
        )
    })?;
    buffer
        .save(path)
        .with_context(|| format!("画像の書き出しに失敗: {}", path.display()))?;
    Ok(())
}
