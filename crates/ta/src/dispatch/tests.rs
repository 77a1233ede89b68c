use std::sync::Arc;

use p256::ecdsa::signature::hazmat::PrehashVerifier;
use p256::ecdsa::{Signature, VerifyingKey};
use vtee_types::{AttestationBundle, Command, ParamTypes, TaStatus, BUNDLE_SIZE};

use crate::config::{KeyPolicy, TaConfig};
use crate::params::{Param, Parameters};
use crate::runtime::mock::MockProvider;
use crate::runtime::CryptoProvider;
use crate::session::{Session, SessionManager};
use crate::storage::{MemoryStorage, SecureStorage, StorageError};
use crate::test_helpers::{short_component_key, Fault, FaultInjectingProvider, PinnedKeyProvider};

use super::Dispatcher;

const CMD: u32 = Command::PROCESS_AND_ATTEST_ID;

/// 赤・緑の2画素
const RED_GREEN: [u8; 6] = [255, 0, 0, 0, 255, 0];

fn open(provider: Arc<dyn CryptoProvider>) -> (SessionManager, Session) {
    let manager = SessionManager::new(provider, 4);
    let session = manager.open(ParamTypes::NONE).unwrap();
    (manager, session)
}

fn per_session() -> TaConfig {
    TaConfig {
        key_policy: KeyPolicy::PerSession,
        ..TaConfig::default()
    }
}

/// 正しい形の呼び出しを1回行い、ステータス・出力・報告サイズを返す。
fn invoke_image(
    dispatcher: &Dispatcher,
    session: &mut Session,
    image: &[u8],
) -> (TaStatus, Vec<u8>, Vec<u8>, Option<usize>, Option<usize>) {
    let mut bundle = vec![0u8; BUNDLE_SIZE];
    let mut gray = vec![0u8; image.len()];
    let mut params = Parameters::new(
        Param::MemrefInput(image),
        Param::output(&mut bundle),
        Param::output(&mut gray),
        Param::None,
    );
    let status = dispatcher.invoke(session, CMD, &mut params);
    let bundle_size = params.output_size(1);
    let image_size = params.output_size(2);
    drop(params);
    (status, bundle, gray, bundle_size, image_size)
}

/// 2画素の変換結果と、返却された公開鍵による署名検証
#[test]
fn test_process_and_attest_end_to_end() {
    let provider = Arc::new(MockProvider::new());
    let (manager, mut session) = open(provider.clone());
    let dispatcher = Dispatcher::new(TaConfig::default());

    let (status, bundle, gray, bundle_size, image_size) =
        invoke_image(&dispatcher, &mut session, &RED_GREEN);

    assert_eq!(status, TaStatus::Ok);
    assert_eq!(gray, [77, 77, 77, 150, 150, 150]);
    assert_eq!(image_size, Some(6));
    assert_eq!(bundle_size, Some(168));

    let bundle = AttestationBundle::from_bytes(&bundle).unwrap();
    assert_eq!(bundle.digest, vtee_crypto::sha256(&gray));

    let sec1 = vtee_crypto::bundle_public_key_sec1(&bundle).unwrap();
    let verifying_key = VerifyingKey::from_sec1_bytes(&sec1).unwrap();
    let signature = Signature::from_slice(&bundle.signature).unwrap();
    assert!(verifying_key
        .verify_prehash(&bundle.digest, &signature)
        .is_ok());

    // 呼び出しごとの鍵は呼び出し終了時に破棄される
    assert_eq!(provider.live_handles(), 0);
    manager.close(session);
}

/// 同じ入力に対するダイジェストの決定性と、呼び出しごとの鍵の更新
#[test]
fn test_digest_deterministic_fresh_key() {
    let provider = Arc::new(MockProvider::new());
    let (_manager, mut session) = open(provider);
    let dispatcher = Dispatcher::new(TaConfig::default());

    let (_, first, ..) = invoke_image(&dispatcher, &mut session, &RED_GREEN);
    let (_, second, ..) = invoke_image(&dispatcher, &mut session, &RED_GREEN);
    let first = AttestationBundle::from_bytes(&first).unwrap();
    let second = AttestationBundle::from_bytes(&second).unwrap();

    assert_eq!(first.digest, second.digest);
    assert_ne!(
        (first.pub_key_x, first.pub_key_y),
        (second.pub_key_x, second.pub_key_y)
    );
}

/// 長さ7の入力はBadParametersで、暗号ハンドルを確保せずセッションも変更しないこと
#[test]
fn test_rejects_partial_pixel() {
    let provider = Arc::new(MockProvider::new());
    let (_manager, mut session) = open(provider.clone());
    let dispatcher = Dispatcher::new(TaConfig::default());

    let input = [1u8; 7];
    let (status, bundle, gray, bundle_size, image_size) =
        invoke_image(&dispatcher, &mut session, &input);

    assert_eq!(status, TaStatus::BadParameters);
    assert_eq!(bundle_size, Some(0));
    assert_eq!(image_size, Some(0));
    assert!(bundle.iter().all(|&b| b == 0));
    assert!(gray.iter().all(|&b| b == 0));
    assert_eq!(provider.live_handles(), 0);
    assert_eq!(session.context.completed_invocations(), 0);
    assert!(session.context.result().is_none());
}

/// 種別不一致（出力の欠落・向きの入れ替え）はバッファにもセッションにも触れないこと
#[test]
fn test_kind_mismatch_leaves_session_untouched() {
    let provider = Arc::new(MockProvider::new());
    let (_manager, mut session) = open(provider.clone());
    let dispatcher = Dispatcher::new(per_session());

    // 1回成功させてセッション鍵と結果を持たせる
    let (status, ..) = invoke_image(&dispatcher, &mut session, &RED_GREEN);
    assert_eq!(status, TaStatus::Ok);
    let key = session.context.keypair();
    let result = session.context.result().cloned();
    assert!(key.is_some());

    // 2つ目の出力が欠落
    let mut bundle = [0xAAu8; BUNDLE_SIZE];
    let mut params = Parameters::new(
        Param::MemrefInput(&RED_GREEN),
        Param::output(&mut bundle),
        Param::None,
        Param::None,
    );
    let status = dispatcher.invoke(&mut session, CMD, &mut params);
    assert_eq!(status, TaStatus::BadParameters);
    assert_eq!(params.output_size(1), Some(BUNDLE_SIZE));
    drop(params);
    assert!(bundle.iter().all(|&b| b == 0xAA));

    // 入出力の向きが入れ替わっている
    let input = [9u8; 6];
    let mut gray = [0xBBu8; 6];
    let mut bundle = [0xAAu8; BUNDLE_SIZE];
    let mut params = Parameters::new(
        Param::output(&mut gray),
        Param::output(&mut bundle),
        Param::MemrefInput(&input),
        Param::None,
    );
    let status = dispatcher.invoke(&mut session, CMD, &mut params);
    assert_eq!(status, TaStatus::BadParameters);
    drop(params);
    assert!(gray.iter().all(|&b| b == 0xBB));
    assert!(bundle.iter().all(|&b| b == 0xAA));

    assert_eq!(session.context.keypair(), key);
    assert_eq!(session.context.result().cloned(), result);
    assert_eq!(session.context.completed_invocations(), 1);
    assert_eq!(provider.live_handles(), 1);
}

/// 未知のコマンドIDの拒否
#[test]
fn test_unknown_command() {
    let provider = Arc::new(MockProvider::new());
    let (_manager, mut session) = open(provider.clone());
    let dispatcher = Dispatcher::new(TaConfig::default());

    let mut bundle = [0u8; BUNDLE_SIZE];
    let mut gray = [0u8; 6];
    let mut params = Parameters::new(
        Param::MemrefInput(&RED_GREEN),
        Param::output(&mut bundle),
        Param::output(&mut gray),
        Param::None,
    );
    let status = dispatcher.invoke(&mut session, 7, &mut params);
    assert_eq!(status, TaStatus::BadParameters);
    assert_eq!(params.output_size(1), Some(BUNDLE_SIZE));
    assert_eq!(provider.live_handles(), 0);
}

/// 上限を超える入力はコピー前に拒否されること
#[test]
fn test_rejects_oversize_input() {
    let provider = Arc::new(MockProvider::new());
    let (_manager, mut session) = open(provider.clone());
    let dispatcher = Dispatcher::new(TaConfig {
        max_image_bytes: 6,
        ..TaConfig::default()
    });

    let (status, ..) = invoke_image(&dispatcher, &mut session, &RED_GREEN);
    assert_eq!(status, TaStatus::Ok);

    let (status, _, _, bundle_size, _) = invoke_image(&dispatcher, &mut session, &[0u8; 9]);
    assert_eq!(status, TaStatus::BadParameters);
    assert_eq!(bundle_size, Some(0));
    assert_eq!(provider.live_handles(), 0);
}

/// 空の入力は暗号ハンドルを確保せず、セッションも変更せずに拒否されること
#[test]
fn test_rejects_empty_input() {
    let provider = Arc::new(MockProvider::new());
    let (_manager, mut session) = open(provider.clone());
    let dispatcher = Dispatcher::new(TaConfig::default());

    let (status, bundle, _, bundle_size, image_size) =
        invoke_image(&dispatcher, &mut session, &[]);
    assert_eq!(status, TaStatus::BadParameters);
    assert_eq!(bundle_size, Some(0));
    assert_eq!(image_size, Some(0));
    assert!(bundle.iter().all(|&b| b == 0));
    assert_eq!(provider.live_handles(), 0);
    assert_eq!(session.context.completed_invocations(), 0);
    assert!(session.context.result().is_none());
}

/// 32バイト未満の公開鍵成分でも、パディングしたバンドルから署名が検証できること
#[test]
fn test_short_pubkey_component_verifies() {
    let provider = Arc::new(PinnedKeyProvider::new(short_component_key()));
    let (_manager, mut session) = open(provider.clone());
    let dispatcher = Dispatcher::new(TaConfig::default());

    let (status, bundle, gray, ..) = invoke_image(&dispatcher, &mut session, &RED_GREEN);
    assert_eq!(status, TaStatus::Ok);

    let bundle = AttestationBundle::from_bytes(&bundle).unwrap();
    assert!(bundle.pub_key_x.len() < 32 || bundle.pub_key_y.len() < 32);
    assert_eq!(bundle.digest, vtee_crypto::sha256(&gray));

    let sec1 = vtee_crypto::bundle_public_key_sec1(&bundle).unwrap();
    let verifying_key = VerifyingKey::from_sec1_bytes(&sec1).unwrap();
    let signature = Signature::from_slice(&bundle.signature).unwrap();
    assert!(verifying_key
        .verify_prehash(&bundle.digest, &signature)
        .is_ok());
    assert_eq!(provider.live_handles(), 0);
}

/// 出力容量の不足・不一致は暗号処理の前に拒否されること
#[test]
fn test_rejects_bad_output_capacity() {
    let provider = Arc::new(MockProvider::new());
    let (_manager, mut session) = open(provider.clone());
    let dispatcher = Dispatcher::new(TaConfig::default());

    let cases: [(usize, usize); 3] = [(BUNDLE_SIZE - 1, 6), (BUNDLE_SIZE, 5), (BUNDLE_SIZE, 9)];
    for (bundle_capacity, image_capacity) in cases {
        let mut bundle = vec![0u8; bundle_capacity];
        let mut gray = vec![0u8; image_capacity];
        let mut params = Parameters::new(
            Param::MemrefInput(&RED_GREEN),
            Param::output(&mut bundle),
            Param::output(&mut gray),
            Param::None,
        );
        let status = dispatcher.invoke(&mut session, CMD, &mut params);
        assert_eq!(
            status,
            TaStatus::BadParameters,
            "{bundle_capacity}/{image_capacity}"
        );
        assert_eq!(params.output_size(1), Some(0));
        assert_eq!(params.output_size(2), Some(0));
    }
    assert_eq!(provider.live_handles(), 0);
    assert_eq!(session.context.completed_invocations(), 0);
}

/// 容量に余裕のあるバンドル出力には168バイトだけが書かれること
#[test]
fn test_larger_bundle_buffer() {
    let provider = Arc::new(MockProvider::new());
    let (_manager, mut session) = open(provider);
    let dispatcher = Dispatcher::new(TaConfig::default());

    let mut bundle = vec![0u8; 256];
    let mut gray = vec![0u8; 6];
    let mut params = Parameters::new(
        Param::MemrefInput(&RED_GREEN),
        Param::output(&mut bundle),
        Param::output(&mut gray),
        Param::None,
    );
    let status = dispatcher.invoke(&mut session, CMD, &mut params);
    assert_eq!(status, TaStatus::Ok);
    assert_eq!(params.output_size(1), Some(BUNDLE_SIZE));
}

/// 各ステージの障害で全ハンドルが解放され、出力サイズが0になること
#[test]
fn test_faults_release_every_handle() {
    for fault in Fault::ALL {
        let provider = Arc::new(FaultInjectingProvider::new(fault));
        let manager = SessionManager::new(provider.clone(), 1);
        let mut session = manager.open(ParamTypes::NONE).unwrap();
        let dispatcher = Dispatcher::new(per_session());

        let (status, _, gray, bundle_size, image_size) =
            invoke_image(&dispatcher, &mut session, &RED_GREEN);

        let expected = match fault {
            Fault::SignAlloc => TaStatus::OutOfResources,
            _ => TaStatus::CryptoFailure,
        };
        assert_eq!(status, expected, "{fault:?}");
        assert_eq!(bundle_size, Some(0), "{fault:?}");
        assert_eq!(image_size, Some(0), "{fault:?}");
        assert!(gray.iter().all(|&b| b == 0), "{fault:?}");
        assert_eq!(provider.live_handles(), 0, "{fault:?}");
        assert!(session.context.keypair().is_none(), "{fault:?}");
        assert!(session.context.result().is_none(), "{fault:?}");

        manager.close(session);
        assert_eq!(provider.live_handles(), 0, "{fault:?}");
    }
}

/// プロバイダのスロット枯渇はOutOfResourcesになること
#[test]
fn test_provider_slots_exhausted() {
    let provider = Arc::new(MockProvider::with_handle_limit(1));
    let (_manager, mut session) = open(provider.clone());
    let dispatcher = Dispatcher::new(TaConfig::default());

    // 鍵と署名操作が同時に必要になるため1スロットでは足りない
    let (status, ..) = invoke_image(&dispatcher, &mut session, &RED_GREEN);
    assert_eq!(status, TaStatus::OutOfResources);
    assert_eq!(provider.live_handles(), 0);
}

/// セッション鍵は呼び出し間で再利用され、クローズで破棄されること
#[test]
fn test_per_session_key_reused() {
    let provider = Arc::new(MockProvider::new());
    let (manager, mut session) = open(provider.clone());
    let dispatcher = Dispatcher::new(per_session());

    let (_, first, ..) = invoke_image(&dispatcher, &mut session, &RED_GREEN);
    let (_, second, ..) = invoke_image(&dispatcher, &mut session, &[1, 2, 3]);
    let first = AttestationBundle::from_bytes(&first).unwrap();
    let second = AttestationBundle::from_bytes(&second).unwrap();

    assert_eq!(first.pub_key_x, second.pub_key_x);
    assert_eq!(first.pub_key_y, second.pub_key_y);
    assert_eq!(provider.live_handles(), 1);
    assert_eq!(session.context.completed_invocations(), 2);

    manager.close(session);
    assert_eq!(provider.live_handles(), 0);
}

/// 成功したAttestationがダイジェストの16進表記をIDとして保存されること
#[test]
fn test_persist_attestation() {
    let provider = Arc::new(MockProvider::new());
    let (_manager, mut session) = open(provider);
    let storage = Arc::new(MemoryStorage::new());
    let dispatcher = Dispatcher::new(TaConfig {
        persist_attestations: true,
        ..TaConfig::default()
    })
    .with_storage(storage.clone());

    let (status, bundle, ..) = invoke_image(&dispatcher, &mut session, &RED_GREEN);
    assert_eq!(status, TaStatus::Ok);

    let decoded = AttestationBundle::from_bytes(&bundle).unwrap();
    let stored = storage.get(&hex::encode(decoded.digest)).unwrap();
    assert_eq!(stored, bundle);
}

struct FailingStorage;

impl SecureStorage for FailingStorage {
    fn store_secure(&self, _id: &str, _data: &[u8]) -> Result<(), StorageError> {
        Err(StorageError::Backend("disk full".into()))
    }
}

/// 保存の失敗は呼び出し結果に影響しないこと
#[test]
fn test_persist_failure_is_not_fatal() {
    let provider = Arc::new(MockProvider::new());
    let (_manager, mut session) = open(provider);
    let dispatcher = Dispatcher::new(TaConfig {
        persist_attestations: true,
        ..TaConfig::default()
    })
    .with_storage(Arc::new(FailingStorage));

    let (status, _, _, bundle_size, _) = invoke_image(&dispatcher, &mut session, &RED_GREEN);
    assert_eq!(status, TaStatus::Ok);
    assert_eq!(bundle_size, Some(BUNDLE_SIZE));
}
