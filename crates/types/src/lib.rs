//! # Video TEE 共有型定義
//!
//! 非信頼側ホストと信頼側TA（Trusted Application）の間で共有される
//! 呼び出し契約を定義する。
//!
//! ## 構成
//! - TA識別子（UUID）とコマンドID
//! - 戻り値ステータス（GlobalPlatform TEE 互換の数値）
//! - パラメータ種別と4スロット分のパック表現
//! - Attestationバンドルの固定長ワイヤーフォーマット

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// TA識別子
// ---------------------------------------------------------------------------

/// 画像処理TAのUUID。
pub const TA_UUID: &str = "236268e6-a7a4-4bcd-97c6-451ebd802beb";

/// 1回の呼び出しで渡せるパラメータスロット数。
pub const PARAM_SLOTS: usize = 4;

// ---------------------------------------------------------------------------
// ステータス
// ---------------------------------------------------------------------------

/// TA呼び出しの戻り値。数値はGlobalPlatform TEE Internal Core APIに合わせる。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaStatus {
    /// 成功
    Ok,
    /// パラメータの形状・長さが前提条件を満たさない（呼び出し側の誤り）
    BadParameters,
    /// セッション状態や暗号ハンドルの確保に失敗
    OutOfResources,
    /// 暗号プロバイダがエラーを返した、または想定外の長さのデータを返した
    CryptoFailure,
}

impl TaStatus {
    /// `TEE_SUCCESS`
    pub const CODE_OK: u32 = 0x0000_0000;
    /// `TEE_ERROR_GENERIC`
    pub const CODE_CRYPTO_FAILURE: u32 = 0xFFFF_0000;
    /// `TEE_ERROR_BAD_PARAMETERS`
    pub const CODE_BAD_PARAMETERS: u32 = 0xFFFF_0006;
    /// `TEE_ERROR_OUT_OF_MEMORY`
    pub const CODE_OUT_OF_RESOURCES: u32 = 0xFFFF_000C;

    /// ワイヤー上の数値コードを返す。
    pub fn code(self) -> u32 {
        match self {
            TaStatus::Ok => Self::CODE_OK,
            TaStatus::BadParameters => Self::CODE_BAD_PARAMETERS,
            TaStatus::OutOfResources => Self::CODE_OUT_OF_RESOURCES,
            TaStatus::CryptoFailure => Self::CODE_CRYPTO_FAILURE,
        }
    }

    /// 数値コードからステータスを復元する。未知のコードは`None`。
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            Self::CODE_OK => Some(TaStatus::Ok),
            Self::CODE_BAD_PARAMETERS => Some(TaStatus::BadParameters),
            Self::CODE_OUT_OF_RESOURCES => Some(TaStatus::OutOfResources),
            Self::CODE_CRYPTO_FAILURE => Some(TaStatus::CryptoFailure),
            _ => None,
        }
    }

    pub fn is_ok(self) -> bool {
        self == TaStatus::Ok
    }
}

impl std::fmt::Display for TaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaStatus::Ok => "Ok",
            TaStatus::BadParameters => "BadParameters",
            TaStatus::OutOfResources => "OutOfResources",
            TaStatus::CryptoFailure => "CryptoFailure",
        };
        write!(f, "{name} (0x{:08x})", self.code())
    }
}

// ---------------------------------------------------------------------------
// パラメータ種別
// ---------------------------------------------------------------------------

/// 1スロット分のパラメータ種別。
/// 数値は `TEE_PARAM_TYPE_*` と同じ。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    /// 未使用スロット
    None,
    /// スカラー値（入力）
    ValueInput,
    /// スカラー値（出力）
    ValueOutput,
    /// スカラー値（入出力）
    ValueInout,
    /// バッファ（入力）
    MemrefInput,
    /// バッファ（出力、呼び出し側が容量を事前確保）
    MemrefOutput,
    /// バッファ（入出力）
    MemrefInout,
}

impl ParamType {
    /// 4ビットの種別コードを返す。
    pub fn code(self) -> u32 {
        match self {
            ParamType::None => 0,
            ParamType::ValueInput => 1,
            ParamType::ValueOutput => 2,
            ParamType::ValueInout => 3,
            ParamType::MemrefInput => 5,
            ParamType::MemrefOutput => 6,
            ParamType::MemrefInout => 7,
        }
    }

    /// 種別コードから復元する。4と8以上は未定義。
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(ParamType::None),
            1 => Some(ParamType::ValueInput),
            2 => Some(ParamType::ValueOutput),
            3 => Some(ParamType::ValueInout),
            5 => Some(ParamType::MemrefInput),
            6 => Some(ParamType::MemrefOutput),
            7 => Some(ParamType::MemrefInout),
            _ => None,
        }
    }

    pub fn is_memref(self) -> bool {
        matches!(
            self,
            ParamType::MemrefInput | ParamType::MemrefOutput | ParamType::MemrefInout
        )
    }
}

/// 4スロット分のパラメータ種別の組。
///
/// パック表現はスロット0を最下位ニブルとする32ビット値（`TEE_PARAM_TYPES`と同じ）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamTypes(pub [ParamType; PARAM_SLOTS]);

impl ParamTypes {
    /// 全スロット未使用の組（セッションオープン時に要求される）。
    pub const NONE: ParamTypes = ParamTypes([ParamType::None; PARAM_SLOTS]);

    pub const fn new(t0: ParamType, t1: ParamType, t2: ParamType, t3: ParamType) -> Self {
        ParamTypes([t0, t1, t2, t3])
    }

    /// 32ビット値にパックする。
    pub fn pack(&self) -> u32 {
        self.0
            .iter()
            .enumerate()
            .fold(0u32, |acc, (i, t)| acc | (t.code() << (i * 4)))
    }

    /// 32ビット値から復元する。未定義の種別コードや上位16ビットの使用は`None`。
    pub fn unpack(packed: u32) -> Option<Self> {
        if packed >> (PARAM_SLOTS * 4) != 0 {
            return None;
        }
        let mut types = [ParamType::None; PARAM_SLOTS];
        for (i, slot) in types.iter_mut().enumerate() {
            *slot = ParamType::from_code((packed >> (i * 4)) & 0xF)?;
        }
        Some(ParamTypes(types))
    }

    /// 指定スロットの種別。
    pub fn get(&self, index: usize) -> ParamType {
        self.0[index]
    }
}

// ---------------------------------------------------------------------------
// コマンド
// ---------------------------------------------------------------------------

/// TAが受け付けるコマンド。各コマンドは期待するパラメータ種別の組を静的に持つ。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Command {
    /// 画像をグレースケール化し、結果のダイジェストに署名して返す。
    ///
    /// - param\[0\] memref_in: RGB画素列
    /// - param\[1\] memref_out: Attestationバンドル（[`BUNDLE_SIZE`]バイト）
    /// - param\[2\] memref_out: 処理済み画像（入力と同じ長さ）
    /// - param\[3\] none
    ProcessAndAttest,
}

impl Command {
    /// `ProcessAndAttest` のコマンドID
    pub const PROCESS_AND_ATTEST_ID: u32 = 0;

    pub fn id(self) -> u32 {
        match self {
            Command::ProcessAndAttest => Self::PROCESS_AND_ATTEST_ID,
        }
    }

    /// コマンドIDから復元する。未知のIDは`None`。
    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            Self::PROCESS_AND_ATTEST_ID => Some(Command::ProcessAndAttest),
            _ => None,
        }
    }

    /// このコマンドが期待するパラメータ種別の組。
    pub fn expected_param_types(self) -> ParamTypes {
        match self {
            Command::ProcessAndAttest => ParamTypes::new(
                ParamType::MemrefInput,
                ParamType::MemrefOutput,
                ParamType::MemrefOutput,
                ParamType::None,
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Attestationバンドル
// ---------------------------------------------------------------------------

/// ダイジェスト長（SHA-256、1ハッシュブロック）
pub const DIGEST_SIZE: usize = 32;
/// 署名長（ECDSA P-256 の r || s、2ハッシュブロック）
pub const SIGNATURE_SIZE: usize = 2 * DIGEST_SIZE;
/// 公開鍵成分バッファの容量（P-256の座標長）
pub const PUBKEY_COMPONENT_SIZE: usize = 32;

const DIGEST_OFFSET: usize = 0;
const SIGNATURE_OFFSET: usize = DIGEST_OFFSET + DIGEST_SIZE;
const PUBKEY_X_OFFSET: usize = SIGNATURE_OFFSET + SIGNATURE_SIZE;
const PUBKEY_X_LEN_OFFSET: usize = PUBKEY_X_OFFSET + PUBKEY_COMPONENT_SIZE;
const PUBKEY_Y_OFFSET: usize = PUBKEY_X_LEN_OFFSET + 4;
const PUBKEY_Y_LEN_OFFSET: usize = PUBKEY_Y_OFFSET + PUBKEY_COMPONENT_SIZE;

/// Attestationバンドルのワイヤー上の固定長（168バイト）。
///
/// ```text
/// [0..32)    digest
/// [32..96)   signature (r || s)
/// [96..128)  pub_key_x（先頭 x_len バイトが有効）
/// [128..132) x_len (u32 LE)
/// [132..164) pub_key_y（先頭 y_len バイトが有効）
/// [164..168) y_len (u32 LE)
/// ```
pub const BUNDLE_SIZE: usize = PUBKEY_Y_LEN_OFFSET + 4;

/// バンドルのデコードエラー。
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BundleError {
    /// バッファがバンドル長に満たない
    #[error("Attestationバンドルが短すぎます: {actual} bytes (必要: {expected} bytes)")]
    TooShort { actual: usize, expected: usize },
    /// 公開鍵成分の長さが容量を超えている
    #[error("公開鍵成分{component}の長さが不正です: {len}")]
    InvalidComponentLength { component: char, len: u32 },
}

/// 公開鍵の1成分。符号化長は可変（先頭のゼロバイトが省かれる場合がある）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubkeyComponent {
    bytes: [u8; PUBKEY_COMPONENT_SIZE],
    len: usize,
}

impl PubkeyComponent {
    /// 成分を構築する。容量を超える場合は`None`。
    pub fn new(value: &[u8]) -> Option<Self> {
        if value.len() > PUBKEY_COMPONENT_SIZE {
            return None;
        }
        let mut bytes = [0u8; PUBKEY_COMPONENT_SIZE];
        bytes[..value.len()].copy_from_slice(value);
        Some(Self {
            bytes,
            len: value.len(),
        })
    }

    /// 有効なバイト列（報告された長さ分）。
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// 処理結果の証拠一式。ダイジェスト・署名・公開鍵成分を持つ。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationBundle {
    /// 処理済み画像のSHA-256ダイジェスト
    pub digest: [u8; DIGEST_SIZE],
    /// ダイジェストに対するECDSA P-256署名（r || s）
    pub signature: [u8; SIGNATURE_SIZE],
    /// 公開鍵x成分
    pub pub_key_x: PubkeyComponent,
    /// 公開鍵y成分
    pub pub_key_y: PubkeyComponent,
}

impl AttestationBundle {
    /// 固定長のワイヤーフォーマットにエンコードする。
    pub fn to_bytes(&self) -> [u8; BUNDLE_SIZE] {
        let mut out = [0u8; BUNDLE_SIZE];
        out[DIGEST_OFFSET..SIGNATURE_OFFSET].copy_from_slice(&self.digest);
        out[SIGNATURE_OFFSET..PUBKEY_X_OFFSET].copy_from_slice(&self.signature);
        out[PUBKEY_X_OFFSET..PUBKEY_X_LEN_OFFSET].copy_from_slice(&self.pub_key_x.bytes);
        out[PUBKEY_X_LEN_OFFSET..PUBKEY_Y_OFFSET]
            .copy_from_slice(&(self.pub_key_x.len as u32).to_le_bytes());
        out[PUBKEY_Y_OFFSET..PUBKEY_Y_LEN_OFFSET].copy_from_slice(&self.pub_key_y.bytes);
        out[PUBKEY_Y_LEN_OFFSET..BUNDLE_SIZE]
            .copy_from_slice(&(self.pub_key_y.len as u32).to_le_bytes());
        out
    }

    /// ワイヤーフォーマットからデコードする。
    /// バンドル長を超える末尾のバイトは無視する（出力バッファが大きめに確保された場合）。
    pub fn from_bytes(buf: &[u8]) -> Result<Self, BundleError> {
        if buf.len() < BUNDLE_SIZE {
            return Err(BundleError::TooShort {
                actual: buf.len(),
                expected: BUNDLE_SIZE,
            });
        }

        let mut digest = [0u8; DIGEST_SIZE];
        digest.copy_from_slice(&buf[DIGEST_OFFSET..SIGNATURE_OFFSET]);
        let mut signature = [0u8; SIGNATURE_SIZE];
        signature.copy_from_slice(&buf[SIGNATURE_OFFSET..PUBKEY_X_OFFSET]);

        let pub_key_x = read_component(buf, 'x', PUBKEY_X_OFFSET, PUBKEY_X_LEN_OFFSET)?;
        let pub_key_y = read_component(buf, 'y', PUBKEY_Y_OFFSET, PUBKEY_Y_LEN_OFFSET)?;

        Ok(Self {
            digest,
            signature,
            pub_key_x,
            pub_key_y,
        })
    }
}

fn read_component(
    buf: &[u8],
    component: char,
    offset: usize,
    len_offset: usize,
) -> Result<PubkeyComponent, BundleError> {
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&buf[len_offset..len_offset + 4]);
    let len = u32::from_le_bytes(len_bytes);
    if len as usize > PUBKEY_COMPONENT_SIZE {
        return Err(BundleError::InvalidComponentLength { component, len });
    }
    PubkeyComponent::new(&buf[offset..offset + len as usize])
        .ok_or(BundleError::InvalidComponentLength { component, len })
}
