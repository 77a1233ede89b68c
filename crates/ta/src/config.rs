//! # TA設定
//!
//! 信頼側の処理上限と鍵ポリシー。
//! 環境変数から読み込み、未設定の項目はデフォルト値で補完する。
//!
//! | 環境変数 | 既定値 |
//! |---------|-------|
//! | `VTEE_MAX_IMAGE_BYTES` | 20MB（TAヒープ予算） |
//! | `VTEE_MAX_SESSIONS` | 16 |
//! | `VTEE_KEY_POLICY` | `per-invocation` |
//! | `VTEE_PERSIST_ATTESTATIONS` | `false` |

use std::str::FromStr;

// ---------------------------------------------------------------------------
// デフォルト値
// ---------------------------------------------------------------------------

/// 入力画像の最大サイズ（バイト）: 20MB
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

/// 同時にオープンできるセッション数
pub const DEFAULT_MAX_SESSIONS: usize = 16;

pub const ENV_MAX_IMAGE_BYTES: &str = "VTEE_MAX_IMAGE_BYTES";
pub const ENV_MAX_SESSIONS: &str = "VTEE_MAX_SESSIONS";
pub const ENV_KEY_POLICY: &str = "VTEE_KEY_POLICY";
pub const ENV_PERSIST_ATTESTATIONS: &str = "VTEE_PERSIST_ATTESTATIONS";

/// 設定のエラー型。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 値のパースに失敗
    #[error("設定値が不正です: {key}={value} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// 署名鍵の生存期間ポリシー。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyPolicy {
    /// 呼び出しごとに新しいキーペアを生成し、呼び出し終了時に破棄する
    #[default]
    PerInvocation,
    /// セッション内の最初の呼び出しで生成し、セッションを閉じるまで再利用する
    PerSession,
}

impl FromStr for KeyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "per-invocation" => Ok(KeyPolicy::PerInvocation),
            "per-session" => Ok(KeyPolicy::PerSession),
            other => Err(format!(
                "per-invocation または per-session を指定してください: {other}"
            )),
        }
    }
}

/// TAの設定。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaConfig {
    /// 入力画像の最大サイズ（バイト）。信頼側コピーの確保前に検査する。
    pub max_image_bytes: usize,
    /// 同時にオープンできるセッション数
    pub max_sessions: usize,
    /// 署名鍵の生存期間
    pub key_policy: KeyPolicy,
    /// 成功したAttestationをセキュアストレージに保存するか
    pub persist_attestations: bool,
}

impl Default for TaConfig {
    fn default() -> Self {
        Self {
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            max_sessions: DEFAULT_MAX_SESSIONS,
            key_policy: KeyPolicy::default(),
            persist_attestations: false,
        }
    }
}

impl TaConfig {
    /// プロセスの環境変数から読み込む。
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 任意の参照関数から読み込む。未設定の項目はデフォルト値。
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Ok(Self {
            max_image_bytes: parse_or(&lookup, ENV_MAX_IMAGE_BYTES, defaults.max_image_bytes)?,
            max_sessions: parse_or(&lookup, ENV_MAX_SESSIONS, defaults.max_sessions)?,
            key_policy: parse_or(&lookup, ENV_KEY_POLICY, defaults.key_policy)?,
            persist_attestations: parse_or(
                &lookup,
                ENV_PERSIST_ATTESTATIONS,
                defaults.persist_attestations,
            )?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}
