mod common;

use common::{ZONE, a_record, test_env, zsk_list};
use sigrun::hsm::HsmError;
use sigrun::keys::KeyList;
use sigrun::pass::{PassError, PassState, ZoneSigner};
use sigrun::records::RrType;
use sigrun::rrset::RrsetKey;

#[tokio::test]
async fn test_first_pass_signs_fresh_rrset() {
    let env = test_env().await;
    let keys = zsk_list(&env.hsm, 1).await;

    let records = vec![a_record("www.example.com", 1), a_record("www.example.com", 2)];
    let report = env.signer.run_pass(records, keys.clone()).await.unwrap();

    assert_eq!(report.signed, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.committed, 1);
    assert_eq!(report.signatures_created, 1);
    assert_eq!(env.signer.state(), PassState::Idle);

    let rrset = env
        .store
        .get(&RrsetKey::new("www.example.com", RrType::A))
        .unwrap();
    let guard = rrset.read();
    assert_eq!(guard.rr_count(), 2);
    assert_eq!(guard.add_count(), 0);
    assert_eq!(guard.del_count(), 0);
    assert_eq!(guard.rrsig_count(), keys.applicable(RrType::A).len());
    assert!(!guard.needs_signing());
}

#[tokio::test]
async fn test_identical_second_pass_is_noop() {
    let env = test_env().await;
    let keys = zsk_list(&env.hsm, 1).await;
    let records = vec![a_record("www.example.com", 1), a_record("www.example.com", 2)];

    env.signer
        .run_pass(records.clone(), keys.clone())
        .await
        .unwrap();
    let report = env.signer.run_pass(records, keys).await.unwrap();

    assert_eq!(report.signed, 0);
    assert_eq!(report.unchanged, 1);
    assert_eq!(report.signatures_created, 0);
    assert_eq!(report.failed, 0);
}

#[tokio::test]
async fn test_key_rollover_resigns_unchanged_content() {
    let env = test_env().await;
    let old_keys = zsk_list(&env.hsm, 1).await;
    let records = vec![a_record("www.example.com", 1)];

    env.signer
        .run_pass(records.clone(), old_keys.clone())
        .await
        .unwrap();

    // same zone content, new key list
    let new_keys = zsk_list(&env.hsm, 1).await;
    let report = env.signer.run_pass(records, new_keys.clone()).await.unwrap();
    assert_eq!(report.signed, 1);
    assert_eq!(report.signatures_created, 1);

    let rrset = env
        .store
        .get(&RrsetKey::new("www.example.com", RrType::A))
        .unwrap();
    let guard = rrset.read();
    let old_locator = old_keys.keys()[0].locator;
    let new_locator = new_keys.keys()[0].locator;
    assert!(guard.signatures().iter().all(|s| s.key_locator != old_locator));
    assert!(guard.signatures().iter().any(|s| s.key_locator == new_locator));
}

#[tokio::test]
async fn test_sign_failure_keeps_previous_signatures() {
    let env = test_env().await;
    let keys = zsk_list(&env.hsm, 1).await;

    // first pass signs both RRsets
    let records = vec![a_record("a.example.com", 1), a_record("b.example.com", 1)];
    env.signer
        .run_pass(records, keys.clone())
        .await
        .unwrap();

    // second pass changes both, but the HSM refuses everything
    env.backend.set_failing(true);
    let changed = vec![a_record("a.example.com", 2), a_record("b.example.com", 2)];
    let report = env.signer.run_pass(changed.clone(), keys.clone()).await.unwrap();

    assert_eq!(report.signed, 0);
    assert_eq!(report.failed, 2);
    assert!(!report.failures.is_empty());
    assert!(matches!(report.failures[0].error, HsmError::Sign { .. }));

    // both RRsets kept their previous content and signature sets
    for owner in ["a.example.com", "b.example.com"] {
        let rrset = env.store.get(&RrsetKey::new(owner, RrType::A)).unwrap();
        let guard = rrset.read();
        assert_eq!(guard.rr_count(), 1);
        assert_eq!(guard.rrsig_count(), 1);
        assert_eq!(
            guard.committed_records().next().unwrap().rdata().as_ref(),
            &[192, 0, 2, 1]
        );
    }

    // HSM recovers: the next pass applies the change and re-signs
    env.backend.set_failing(false);
    let report = env.signer.run_pass(changed, keys).await.unwrap();
    assert_eq!(report.signed, 2);
    assert_eq!(report.failed, 0);
}

#[tokio::test]
async fn test_partial_failure_commits_healthy_rrsets() {
    let env = test_env().await;
    let keys = zsk_list(&env.hsm, 1).await;

    let records = vec![a_record("a.example.com", 1), a_record("b.example.com", 1)];
    env.signer.run_pass(records, keys.clone()).await.unwrap();

    // only b.example.com changes while the HSM is down: a.example.com is
    // unchanged and needs no HSM call, so it sails through
    env.backend.set_failing(true);
    let next = vec![a_record("a.example.com", 1), a_record("b.example.com", 2)];
    let report = env.signer.run_pass(next, keys).await.unwrap();

    assert_eq!(report.unchanged, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].rrset.owner, "b.example.com.");

    let healthy = env.store.get(&RrsetKey::new("a.example.com", RrType::A)).unwrap();
    assert_eq!(healthy.read().rrsig_count(), 1);
    let failed = env.store.get(&RrsetKey::new("b.example.com", RrType::A)).unwrap();
    assert_eq!(
        failed
            .read()
            .committed_records()
            .next()
            .unwrap()
            .rdata()
            .as_ref(),
        &[192, 0, 2, 1]
    );
}

#[tokio::test]
async fn test_aborted_pass_keeps_signatures_matching_content() {
    let env = test_env().await;
    let keys = zsk_list(&env.hsm, 1).await;
    let records = vec![a_record("www.example.com", 1)];
    let key = RrsetKey::new("www.example.com", RrType::A);

    env.signer
        .run_pass(records.clone(), keys.clone())
        .await
        .unwrap();
    let original_sig = env.store.get(&key).unwrap().read().signatures()[0].clone();

    // a signer whose backup directory is a plain file aborts at commit,
    // after the workers have already signed the staged change
    let blocked = tempfile::NamedTempFile::new().unwrap();
    let mut config = env.config.clone();
    config.backup_dir = blocked.path().to_path_buf();
    let broken = ZoneSigner::new(ZONE, env.store.clone(), env.hsm.clone(), config);

    let err = broken
        .run_pass(vec![a_record("www.example.com", 2)], keys.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, PassError::Backup { .. }));

    // the abort restored the committed content and its matching signature
    let rrset = env.store.get(&key).unwrap();
    let guard = rrset.read();
    assert_eq!(
        guard.committed_records().next().unwrap().rdata().as_ref(),
        &[192, 0, 2, 1]
    );
    assert_eq!(guard.rrsig_count(), 1);
    assert_eq!(guard.signatures()[0], original_sig);
    drop(guard);

    // a follow-up pass with the original content has nothing to do
    let report = env.signer.run_pass(records, keys).await.unwrap();
    assert_eq!(report.unchanged, 1);
    assert_eq!(report.signatures_created, 0);
    assert_eq!(env.store.get(&key).unwrap().read().signatures()[0], original_sig);
}

#[tokio::test]
async fn test_withdrawn_rrset_is_purged() {
    let env = test_env().await;
    let keys = zsk_list(&env.hsm, 1).await;

    let records = vec![a_record("www.example.com", 1), a_record("old.example.com", 1)];
    env.signer.run_pass(records, keys.clone()).await.unwrap();
    assert_eq!(env.store.len(), 2);

    // old.example.com disappears from the zone for a full pass
    let report = env
        .signer
        .run_pass(vec![a_record("www.example.com", 1)], keys)
        .await
        .unwrap();

    assert_eq!(report.purged, 1);
    assert!(env.store.get(&RrsetKey::new("old.example.com", RrType::A)).is_none());
    assert!(env.store.get(&RrsetKey::new("www.example.com", RrType::A)).is_some());
}

#[tokio::test]
async fn test_incremental_change_only_resigns_touched_rrset() {
    let env = test_env().await;
    let keys = zsk_list(&env.hsm, 1).await;

    let mut records = Vec::new();
    for octet in 1..=10 {
        records.push(a_record(&format!("host{}.example.com", octet), octet));
    }
    let report = env.signer.run_pass(records.clone(), keys.clone()).await.unwrap();
    assert_eq!(report.signed, 10);

    // one RRset gains a record; the other nine are untouched
    records.push(a_record("host1.example.com", 111));
    let report = env.signer.run_pass(records, keys).await.unwrap();
    assert_eq!(report.signed, 1);
    assert_eq!(report.unchanged, 9);
    assert_eq!(report.signatures_created, 1);
}

#[tokio::test]
async fn test_pass_reports_zone_summary() {
    let env = test_env().await;
    let keys = zsk_list(&env.hsm, 2).await;

    let report = env
        .signer
        .run_pass(vec![a_record("www.example.com", 1)], keys)
        .await
        .unwrap();

    // two ZSKs apply to an A RRset
    assert_eq!(report.signatures_created, 2);
    assert_eq!(report.signed + report.unchanged + report.failed, 1);
    assert_eq!(env.signer.zone(), format!("{}.", ZONE));
}
