#![allow(dead_code)]

use sigrun::config::SignerConfig;
use sigrun::hsm::{HsmPool, SoftHsm};
use sigrun::keys::{KeyList, KeyRole, SigningKey};
use sigrun::pass::ZoneSigner;
use sigrun::records::{RecordData, RrType};
use sigrun::rrset::RrsetStore;
use std::sync::Arc;
use tempfile::TempDir;

pub const ZONE: &str = "example.com";

/// Opt-in log output for debugging a test run (`RUST_LOG=sigrun=trace`)
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Everything a pipeline test needs: a zone signer wired to a software HSM
/// and a throwaway backup directory.
pub struct TestEnv {
    pub signer: ZoneSigner,
    pub store: Arc<RrsetStore>,
    pub hsm: Arc<HsmPool>,
    pub backend: Arc<SoftHsm>,
    pub config: SignerConfig,
    _backup_dir: TempDir,
}

pub async fn test_env() -> TestEnv {
    init_tracing();
    let backup_dir = TempDir::new().expect("tempdir");
    let config = SignerConfig {
        worker_threads: 2,
        queue_size: 16,
        max_sessions: 4,
        backup_dir: backup_dir.path().to_path_buf(),
        ..Default::default()
    };

    let hsm = Arc::new(HsmPool::new(config.max_sessions));
    let backend = Arc::new(SoftHsm::new("default", "1234"));
    hsm.attach("default", "softhsm.so", "1234", backend.clone())
        .await
        .expect("attach soft hsm");

    let store = Arc::new(RrsetStore::new());
    let signer = ZoneSigner::new(ZONE, store.clone(), hsm.clone(), config.clone());

    TestEnv {
        signer,
        store,
        hsm,
        backend,
        config,
        _backup_dir: backup_dir,
    }
}

/// Generate `count` zone-signing keys in the default repository
pub async fn zsk_list(hsm: &HsmPool, count: usize) -> KeyList {
    let mut keys = Vec::new();
    for _ in 0..count {
        let handle = hsm.generate_key("default", 2048).await.expect("generate key");
        keys.push(SigningKey::new(handle.locator, KeyRole::Zsk, "default"));
    }
    KeyList::new(keys)
}

pub fn a_record(owner: &str, last_octet: u8) -> RecordData {
    RecordData::new(owner, RrType::A, 3600, vec![192, 0, 2, last_octet])
}
