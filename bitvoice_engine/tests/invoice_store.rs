use bitvoice_engine::{
    db_types::{BaseState, InvoiceId},
    events::InvoiceEventKind,
    kv::{KvStore, MemoryKv},
    test_utils::sample_invoice,
    CasOutcome, InvoiceStore, StoreError, SCHEMA_VERSION,
};

fn fresh_store() -> InvoiceStore<MemoryKv> {
    let _ = env_logger::try_init();
    InvoiceStore::new(MemoryKv::new())
}

#[tokio::test]
async fn round_trip_preserves_every_field() {
    let store = fresh_store();
    store.open().await.unwrap();
    let mut invoice = sample_invoice(100_000);
    invoice.order_id = Some("order-77".into());
    invoice.pos_data = Some("{\"cart\":3}".into());
    invoice.transactions.insert("tx1".into(), 40_000.into());
    invoice.transactions.insert("tx2".into(), 60_000.into());
    invoice.matched_total = 100_000.into();
    let stored = store.create(invoice).await.unwrap();
    let fetched = store.get_by_id(&stored.id).await.unwrap();
    assert_eq!(stored, fetched);
}

#[tokio::test]
async fn duplicate_ids_are_rejected() {
    let store = fresh_store();
    store.open().await.unwrap();
    store.create(sample_invoice(100_000)).await.unwrap();
    let err = store.create(sample_invoice(50_000)).await.unwrap_err();
    assert!(matches!(err, StoreError::DuplicateId(_)));
}

#[tokio::test]
async fn token_gated_lookup() {
    let store = fresh_store();
    store.open().await.unwrap();
    let invoice = store.create(sample_invoice(100_000)).await.unwrap();

    let fetched = store.get_by_token(&invoice.id, "tok").await.unwrap();
    assert_eq!(fetched.id, invoice.id);

    let err = store.get_by_token(&invoice.id, "not-the-token").await.unwrap_err();
    assert!(matches!(err, StoreError::Unauthorized(_)));

    let missing = InvoiceId("nope".into());
    let err = store.get_by_id(&missing).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn cas_bumps_sequence_and_enqueues_job() {
    let store = fresh_store();
    store.open().await.unwrap();
    let invoice = store.create(sample_invoice(100_000)).await.unwrap();
    assert_eq!(invoice.sequence, 0);

    let outcome = store
        .cas_update(&invoice.id, 0, |inv| {
            let mut updated = inv.clone();
            updated.base_state = BaseState::Paid;
            Some((updated, InvoiceEventKind::Paid))
        })
        .await
        .unwrap();
    let CasOutcome::Updated { invoice: updated, job } = outcome else {
        panic!("expected an update");
    };
    assert_eq!(updated.sequence, 1);
    let job = job.expect("invoice has a notification URL");
    assert_eq!(job.sequence, 1);
    assert_eq!(job.event, InvoiceEventKind::Paid);
    assert_eq!(job.url, "https://merchant.example/hook");
    assert_eq!(store.pending_jobs().await.unwrap().len(), 1);
}

#[tokio::test]
async fn stale_sequence_conflicts() {
    let store = fresh_store();
    store.open().await.unwrap();
    let invoice = store.create(sample_invoice(100_000)).await.unwrap();
    store
        .cas_update(&invoice.id, 0, |inv| {
            let mut updated = inv.clone();
            updated.base_state = BaseState::Paid;
            Some((updated, InvoiceEventKind::Paid))
        })
        .await
        .unwrap();

    // A writer that read the record at sequence 0 lost the race
    let err = store
        .cas_update(&invoice.id, 0, |inv| {
            let mut updated = inv.clone();
            updated.base_state = BaseState::Expired;
            Some((updated, InvoiceEventKind::Expired))
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict { expected: 0, found: 1, .. }));

    // No write, no sequence consumed, no job enqueued
    let current = store.get_by_id(&invoice.id).await.unwrap();
    assert_eq!(current.sequence, 1);
    assert_eq!(current.base_state, BaseState::Paid);
    assert_eq!(store.pending_jobs().await.unwrap().len(), 1);
}

#[tokio::test]
async fn declining_mutator_consumes_nothing() {
    let store = fresh_store();
    store.open().await.unwrap();
    let invoice = store.create(sample_invoice(100_000)).await.unwrap();
    let outcome = store.cas_update(&invoice.id, 0, |_| None).await.unwrap();
    assert!(matches!(outcome, CasOutcome::Unchanged(_)));
    assert_eq!(store.get_by_id(&invoice.id).await.unwrap().sequence, 0);
    assert!(store.pending_jobs().await.unwrap().is_empty());
}

#[tokio::test]
async fn sequences_are_gapless() {
    let store = fresh_store();
    store.open().await.unwrap();
    let invoice = store.create(sample_invoice(100_000)).await.unwrap();
    for (expected, state) in [(0, BaseState::Paid), (1, BaseState::Confirmed), (2, BaseState::Complete)] {
        store
            .cas_update(&invoice.id, expected, move |inv| {
                let mut updated = inv.clone();
                updated.base_state = state;
                Some((updated, InvoiceEventKind::for_base_state(state).unwrap()))
            })
            .await
            .unwrap();
    }
    let jobs = store.pending_jobs().await.unwrap();
    let sequences: Vec<u64> = jobs.iter().map(|j| j.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);
}

#[tokio::test]
async fn chronological_listing_pages_in_creation_order() {
    let store = fresh_store();
    store.open().await.unwrap();
    for i in 0..5 {
        let mut invoice = sample_invoice(100_000);
        invoice.id = InvoiceId(format!("inv{i}"));
        store.create(invoice).await.unwrap();
    }

    let (page, cursor) = store.list_created_after(None, 2).await.unwrap();
    assert_eq!(page.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(), vec!["inv0", "inv1"]);
    let cursor = cursor.expect("full page yields a cursor");

    let (page, cursor) = store.list_created_after(Some(cursor), 2).await.unwrap();
    assert_eq!(page.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(), vec!["inv2", "inv3"]);
    let cursor = cursor.expect("full page yields a cursor");

    let (page, cursor) = store.list_created_after(Some(cursor), 2).await.unwrap();
    assert_eq!(page.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(), vec!["inv4"]);
    assert_eq!(cursor, None);
}

#[tokio::test]
async fn schema_version_mismatch_fails_fast() {
    let _ = env_logger::try_init();
    let kv = MemoryKv::new();
    kv.put(b"meta/schema_version", &99u32.to_be_bytes()).unwrap();
    let store = InvoiceStore::new(kv);
    let err = store.open().await.unwrap_err();
    assert!(matches!(err, StoreError::SchemaVersion { found: 99, expected: SCHEMA_VERSION }));
}

#[tokio::test]
async fn open_is_idempotent_on_matching_version() {
    let store = fresh_store();
    store.open().await.unwrap();
    store.open().await.unwrap();
}
