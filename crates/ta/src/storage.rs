//! # セキュアストレージ
//!
//! 成功したAttestationを保存するための抽象インターフェース。
//! TAからの呼び出し箇所は1つだけで、保存の失敗は呼び出し結果に影響しない。
//!
//! 現在の実装:
//! - [`MemoryStorage`]: プロセス内メモリに保持する（開発・テスト用）

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// ストレージのエラー型。
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// 保存可能なオブジェクト数の上限に達した
    #[error("セキュアストレージの容量が不足しています（上限: {limit}）")]
    Full { limit: usize },
    /// バックエンドの処理失敗
    #[error("セキュアストレージの書き込みに失敗: {0}")]
    Backend(String),
}

/// セキュアストレージの抽象インターフェース。
pub trait SecureStorage: Send + Sync {
    /// `id` の下にデータを保存する。同じIDが既にあれば上書きする。
    fn store_secure(&self, id: &str, data: &[u8]) -> Result<(), StorageError>;
}

/// メモリ内ストレージ。
#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    capacity: Option<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// 保存可能なオブジェクト数を指定して初期化する。
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            capacity: Some(capacity),
        }
    }

    /// 保存済みのデータを取得する。
    pub fn get(&self, id: &str) -> Option<Vec<u8>> {
        self.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SecureStorage for MemoryStorage {
    fn store_secure(&self, id: &str, data: &[u8]) -> Result<(), StorageError> {
        let mut objects = self.lock();
        if let Some(limit) = self.capacity {
            if objects.len() >= limit && !objects.contains_key(id) {
                return Err(StorageError::Full { limit });
            }
        }
        objects.insert(id.to_string(), data.to_vec());
        Ok(())
    }
}
