//! # Video TEE ホスト
//!
//! 画像ファイルを読み込み、Trusted Applicationに処理とAttestationを依頼する非信頼側のCLI。
//!
//! ## 処理フロー
//! 1. 画像を読み込み、RGB画素列に変換
//! 2. TAを生成してセッションをオープン
//! 3. 入力画像・Attestation出力・画像出力の3スロットでprocess-and-attestを呼び出す
//! 4. セッションをクローズし、所要時間とAttestationを表示
//! 5. `--output` 指定時はグレースケール画像を書き出す

mod image_io;
mod report;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use vtee_ta::{KeyPolicy, MemoryStorage, MockProvider, Param, Parameters, TaConfig, TrustedApp};
use vtee_types::{AttestationBundle, Command, ParamTypes, BUNDLE_SIZE};

use crate::report::EvidenceReport;

#[derive(Parser)]
#[command(name = "vtee-host")]
#[command(
    about = "Attested grayscale processing inside a trusted execution environment",
    long_about = None
)]
struct Cli {
    /// 入力画像のパス（BMP, PNG, JPEG等）
    image: PathBuf,

    /// グレースケール画像の出力先
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// 結果をJSONで出力する
    #[arg(long)]
    json: bool,

    /// 署名鍵の生存期間（per-invocation | per-session）
    #[arg(long)]
    key_policy: Option<KeyPolicy>,

    /// 入力画像の最大サイズ（バイト）
    #[arg(long)]
    max_image_bytes: Option<usize>,

    /// 成功したAttestationをプロセス内のメモリ上ストレージに保存する（終了時に破棄され、ディスクには残らない）
    #[arg(long)]
    persist: bool,
}

impl Cli {
    /// 環境変数の設定にコマンドライン引数を上書きする。
    fn ta_config(&self) -> anyhow::Result<TaConfig> {
        let mut config = TaConfig::from_env().context("TA設定の読み込みに失敗")?;
        if let Some(policy) = self.key_policy {
            config.key_policy = policy;
        }
        if let Some(max) = self.max_image_bytes {
            config.max_image_bytes = max;
        }
        if self.persist {
            config.persist_attestations = true;
        }
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = cli.ta_config()?;

    let image = image_io::load(&cli.image)?;
    tracing::info!(
        path = %cli.image.display(),
        width = image.width,
        height = image.height,
        "画像を読み込みました"
    );

    let started = Instant::now();

    let storage = Arc::new(MemoryStorage::new());
    let app = TrustedApp::new(config, Arc::new(MockProvider::new()));
    let app = app.with_storage(storage.clone());
    let mut session = match app.open_session(ParamTypes::NONE) {
        Ok(session) => session,
        Err(status) => bail!(
            "TAとのセッションをオープンできません: {status} (0x{:08x})",
            status.code()
        ),
    };

    let mut bundle = vec![0u8; BUNDLE_SIZE];
    let mut gray = vec![0u8; image.rgb.len()];
    let status = {
        let mut params = Parameters::new(
            Param::MemrefInput(&image.rgb),
            Param::output(&mut bundle),
            Param::output(&mut gray),
            Param::None,
        );
        app.invoke_command(&mut session, Command::PROCESS_AND_ATTEST_ID, &mut params)
    };
    app.close_session(session);

    if !status.is_ok() {
        bail!("TAの呼び出しに失敗: {status} (0x{:08x})", status.code());
    }
    let took = started.elapsed();

    let bundle = AttestationBundle::from_bytes(&bundle).context("Attestationのデコードに失敗")?;
    let report = EvidenceReport::new(&bundle, took, image.width, image.height)?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.render());
    }

    if !storage.is_empty() {
        tracing::info!(
            stored = storage.len(),
            "Attestationをメモリ上に保存しました（終了時に破棄されます）"
        );
    }

    if let Some(output) = &cli.output {
        image_io::store(output, &gray, image.width, image.height)?;
        tracing::info!(path = %output.display(), "グレースケール画像を書き出しました");
    }

    Ok(())
}
