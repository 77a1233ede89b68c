//! Attestation結果の表示

use std::time::Duration;

use serde::Serialize;
use vtee_types::AttestationBundle;

/// 呼び出し結果のレポート。バイト列は全て16進表記。
#[derive(Debug, Serialize)]
pub struct EvidenceReport {
    pub took_ms: u128,
    pub width: u32,
    pub height: u32,
    /// 処理済み画像のSHA-256
    pub digest: String,
    /// r || s
    pub signature: String,
    /// DER形式の署名（OpenSSL等での検証用）
    pub signature_der: String,
    pub pub_key_x: String,
    pub pub_key_y: String,
    /// SEC1非圧縮形式の公開鍵
    pub public_key_sec1: String,
}

impl EvidenceReport {
    pub fn new(
        bundle: &AttestationBundle,
        took: Duration,
        width: u32,
        height: u32,
    ) -> anyhow::Result<Self> {
        let signature_der = vtee_crypto::signature_to_der(&bundle.signature)?;
        let public_key_sec1 = vtee_crypto::bundle_public_key_sec1(bundle)?;
        Ok(Self {
            took_ms: took.as_millis(),
            width,
            height,
            digest: hex::encode(bundle.digest),
            signature: hex::encode(bundle.signature),
            signature_der: hex::encode(signature_der),
            pub_key_x: hex::encode(bundle.pub_key_x.as_bytes()),
            pub_key_y: hex::encode(bundle.pub_key_y.as_bytes()),
            public_key_sec1: hex::encode(public_key_sec1),
        })
    }

    /// 人間向けの表示。
    pub fn render(&self) -> String {
        format!(
            "Took: {} ms\n\
             Image: {}x{}\n\
             Hash of result: {}\n\
             Signed hash: {}\n\
             Signed hash (DER): {}\n\
             Pubkey x component: {}\n\
             Pubkey y component: {}\n\
             Pubkey (SEC1): {}",
            self.took_ms,
            self.width,
            self.height,
            self.digest,
            self.signature,
            self.signature_der,
            self.pub_key_x,
            self.pub_key_y,
            self.public_key_sec1,
        )
    }
}
