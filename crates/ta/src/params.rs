//! # パラメータチャネル
//!
//! 非信頼側と信頼側の間で1回の呼び出し分のバッファと値を受け渡す4スロットの契約。
//!
//! ## 規則
//! - 呼び出し側が渡した種別の組は、コマンドが期待する組と位置ごとに完全一致しなければならない。
//!   不一致はバッファに触れる前に`BadParameters`で拒否する。
//! - 出力バッファは呼び出し側が容量を事前確保する。信頼側は容量を超えて書き込まず、
//!   書き込んだ実バイト数をスロットのサイズとして報告する。

use vtee_types::{ParamType, ParamTypes, PARAM_SLOTS};

use crate::error::TaError;

/// スカラー値パラメータ（`a`, `b` の2ワード）。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Value {
    pub a: u32,
    pub b: u32,
}

/// 呼び出し側所有の出力バッファ。
#[derive(Debug)]
pub struct OutputBuffer<'a> {
    buffer: &'a mut [u8],
    /// 信頼側が報告するサイズ。呼び出し前は宣言容量と同じ。
    size: usize,
}

impl<'a> OutputBuffer<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        let size = buffer.len();
        Self { buffer, size }
    }

    /// 宣言容量（呼び出し側が確保したバイト数）。
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// 報告されたサイズ。
    pub fn size(&self) -> usize {
        self.size
    }

    /// 現在の内容（入出力バッファの入力側として使う）。
    pub fn contents(&self) -> &[u8] {
        &self.buffer[..]
    }

    /// データを先頭から書き込み、サイズを更新する。容量を超える場合は何も書かない。
    pub fn write(&mut self, data: &[u8]) -> Result<(), TaError> {
        if data.len() > self.buffer.len() {
            return Err(TaError::BadParameters(format!(
                "出力バッファの容量が不足しています: {} bytes (必要: {} bytes)",
                self.buffer.len(),
                data.len()
            )));
        }
        self.buffer[..data.len()].copy_from_slice(data);
        self.size = data.len();
        Ok(())
    }

    /// 報告サイズをゼロにする。バッファの内容には触れない。
    pub fn clear(&mut self) {
        self.size = 0;
    }
}

/// 1スロット分のパラメータ。
#[derive(Debug, Default)]
pub enum Param<'a> {
    #[default]
    None,
    ValueInput(Value),
    ValueOutput(Value),
    ValueInout(Value),
    MemrefInput(&'a [u8]),
    MemrefOutput(OutputBuffer<'a>),
    MemrefInout(OutputBuffer<'a>),
}

impl<'a> Param<'a> {
    pub fn param_type(&self) -> ParamType {
        match self {
            Param::None => ParamType::None,
            Param::ValueInput(_) => ParamType::ValueInput,
            Param::ValueOutput(_) => ParamType::ValueOutput,
            Param::ValueInout(_) => ParamType::ValueInout,
            Param::MemrefInput(_) => ParamType::MemrefInput,
            Param::MemrefOutput(_) => ParamType::MemrefOutput,
            Param::MemrefInout(_) => ParamType::MemrefInout,
        }
    }

    /// 出力バッファを持つスロットを作る。
    pub fn output(buffer: &'a mut [u8]) -> Self {
        Param::MemrefOutput(OutputBuffer::new(buffer))
    }
}

/// 1回の呼び出しに渡す4スロット分のパラメータ。
#[derive(Debug, Default)]
pub struct Parameters<'a>(pub [Param<'a>; PARAM_SLOTS]);

impl<'a> Parameters<'a> {
    pub fn new(p0: Param<'a>, p1: Param<'a>, p2: Param<'a>, p3: Param<'a>) -> Self {
        Parameters([p0, p1, p2, p3])
    }

    /// 呼び出し側が渡した種別の組。
    pub fn param_types(&self) -> ParamTypes {
        ParamTypes(std::array::from_fn(|i| self.0[i].param_type()))
    }

    /// 期待する種別の組と完全一致するか検査する。
    pub fn validate(&self, expected: ParamTypes) -> Result<(), TaError> {
        let actual = self.param_types();
        if actual != expected {
            return Err(TaError::BadParameters(format!(
                "パラメータ種別が一致しません: 0x{:04x} (期待: 0x{:04x})",
                actual.pack(),
                expected.pack()
            )));
        }
        Ok(())
    }

    /// 入力バッファを借用する。
    pub fn memref_input(&self, index: usize) -> Result<&'a [u8], TaError> {
        match self.slot(index)? {
            Param::MemrefInput(buf) => Ok(*buf),
            other => Err(kind_mismatch(index, ParamType::MemrefInput, other)),
        }
    }

    /// 出力バッファ（入出力を含む）を借用する。
    pub fn memref_output(&mut self, index: usize) -> Result<&mut OutputBuffer<'a>, TaError> {
        match self.slot_mut(index)? {
            Param::MemrefOutput(out) | Param::MemrefInout(out) => Ok(out),
            other => Err(kind_mismatch(index, ParamType::MemrefOutput, other)),
        }
    }

    /// 出力バッファの宣言容量。
    pub fn output_capacity(&self, index: usize) -> Result<usize, TaError> {
        match self.slot(index)? {
            Param::MemrefOutput(out) | Param::MemrefInout(out) => Ok(out.capacity()),
            other => Err(kind_mismatch(index, ParamType::MemrefOutput, other)),
        }
    }

    /// 入力スカラー値を読む。
    pub fn value(&self, index: usize) -> Result<Value, TaError> {
        match self.slot(index)? {
            Param::ValueInput(v) | Param::ValueInout(v) => Ok(*v),
            other => Err(kind_mismatch(index, ParamType::ValueInput, other)),
        }
    }

    /// 出力スカラー値を書く。
    pub fn set_value(&mut self, index: usize, value: Value) -> Result<(), TaError> {
        match self.slot_mut(index)? {
            Param::ValueOutput(v) | Param::ValueInout(v) => {
                *v = value;
                Ok(())
            }
            other => Err(kind_mismatch(index, ParamType::ValueOutput, other)),
        }
    }

    /// 出力バッファの報告サイズ。出力スロットでなければ`None`。
    pub fn output_size(&self, index: usize) -> Option<usize> {
        match self.0.get(index)? {
            Param::MemrefOutput(out) | Param::MemrefInout(out) => Some(out.size()),
            _ => None,
        }
    }

    /// 全ての出力バッファの報告サイズをゼロにする（失敗時の規約）。
    pub fn clear_outputs(&mut self) {
        for param in self.0.iter_mut() {
            if let Param::MemrefOutput(out) | Param::MemrefInout(out) = param {
                out.clear();
            }
        }
    }

    fn slot(&self, index: usize) -> Result<&Param<'a>, TaError> {
        self.0
            .get(index)
            .ok_or_else(|| TaError::BadParameters(format!("スロット番号が範囲外です: {index}")))
    }

    fn slot_mut(&mut self, index: usize) -> Result<&mut Param<'a>, TaError> {
        self.0
            .get_mut(index)
            .ok_or_else(|| TaError::BadParameters(format!("スロット番号が範囲外です: {index}")))
    }
}

fn kind_mismatch(index: usize, expected: ParamType, actual: &Param<'_>) -> TaError {
    TaError::BadParameters(format!(
        "スロット{index}の種別が不正です: {:?} (期待: {:?})",
        actual.param_type(),
        expected
    ))
}
