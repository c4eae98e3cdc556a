//! Ingestion staging/commit: round-trip, atomicity, isolation.

mod common;

use std::sync::Arc;

use common::{harness_with, test_config, FailingVectorStore};
use tether::ingest::{ChunkEdit, DraftStatus, UploadFile};
use tether::llm::{MockChat, MockEmbedder};
use tether::store::{InMemoryKvStore, InMemoryRelationalStore, RelationalStore};
use tether::webhook::{DeliveryPolicy, MockTransport};
use tether::{SearchRequest, TetherService};

fn ten_pair_upload() -> UploadFile {
    let topics = [
        ("How to reset my password?", "Use the reset link on the sign-in page."),
        ("How do I change my email?", "Open account settings and update the email."),
        ("What is the refund policy?", "Refunds are issued within fourteen days."),
        ("How do I cancel my subscription?", "Open billing and choose cancel."),
        ("How long does shipping take?", "Three to five business days."),
        ("Can I change the shipping address?", "Yes, before the parcel is dispatched."),
        ("Where are my invoices?", "Invoices are listed under billing history."),
        ("How do I enable two factor login?", "Open security settings and enable it."),
        ("Do you offer student discounts?", "Yes, with a valid student card."),
        ("How can I delete my account?", "Open account settings and choose delete."),
    ];
    let pairs: Vec<serde_json::Value> = topics
        .iter()
        .map(|(q, a)| serde_json::json!({"question": q, "answer": a}))
        .collect();
    UploadFile {
        name: "faq.json".into(),
        content: serde_json::to_string(&pairs).unwrap(),
    }
}

/// **Scenario**: Ingestion round-trip. Upload ten pairs, review the draft,
/// reassign one chunk, commit, and find a committed question at search top-1.
#[tokio::test]
async fn ingestion_round_trip() {
    let h = harness_with(test_config(), Vec::new(), "support", vec![200]).await;

    let draft = h.service.stage(&[ten_pair_upload()]).await.unwrap();
    assert_eq!(draft.status, DraftStatus::Pending);
    assert_eq!(draft.chunks.len(), 10);
    assert!(draft.chunks.iter().all(|c| !c.category.is_empty()));
    assert!(draft.chunks.iter().all(|c| !c.intent.is_empty()));

    let fetched = h.service.get_draft(&draft.draft_id).await.unwrap();
    assert_eq!(fetched.chunks.len(), 10);

    let reassigned_id = fetched.chunks[2].chunk_id.clone();
    h.service
        .patch_draft(
            &draft.draft_id,
            &[ChunkEdit::Reassign {
                chunk_id: reassigned_id.clone(),
                category: "billing".into(),
                intent: "refund_policy".into(),
            }],
        )
        .await
        .unwrap();

    let outcome = h.service.commit(&draft.draft_id).await.unwrap();
    assert_eq!(outcome.committed_count, 10);
    assert!(outcome.failures.is_empty());

    let committed = h.service.get_draft(&draft.draft_id).await.unwrap();
    assert_eq!(committed.status, DraftStatus::Committed);

    // The reassignment survived the commit verbatim.
    let billing = h
        .relational
        .pairs_by_category("billing", Some("refund_policy"))
        .await
        .unwrap();
    assert!(billing
        .iter()
        .any(|p| p.question == "What is the refund policy?"));

    // A committed question is immediately searchable at top-1.
    let hits = h
        .service
        .search(SearchRequest {
            query: "How do I enable two factor login?".into(),
            top_k: 3,
            category: None,
        })
        .await
        .unwrap();
    assert_eq!(hits[0].pair.question, "How do I enable two factor login?");
}

/// **Invariant**: Ingestion isolation — staged pairs are invisible to search
/// and queries until commit completes.
#[tokio::test]
async fn drafts_invisible_before_commit() {
    let h = harness_with(test_config(), Vec::new(), "support", vec![200]).await;
    let draft = h.service.stage(&[ten_pair_upload()]).await.unwrap();

    let hits = h
        .service
        .search(SearchRequest {
            query: "How to reset my password?".into(),
            top_k: 5,
            category: None,
        })
        .await
        .unwrap();
    assert!(hits.is_empty(), "staged pairs leaked into search");
    assert!(h.relational.list_active_pairs().await.unwrap().is_empty());

    h.service.commit(&draft.draft_id).await.unwrap();
    let hits = h
        .service
        .search(SearchRequest {
            query: "How to reset my password?".into(),
            top_k: 5,
            category: None,
        })
        .await
        .unwrap();
    assert!(!hits.is_empty());
}

/// **Invariant**: Commit atomicity — when the vector step fails, the
/// compensating delete leaves the relational store with none of the draft's
/// pairs, and the draft stays uncommitted.
#[tokio::test]
async fn commit_rolls_back_on_vector_failure() {
    let relational = Arc::new(InMemoryRelationalStore::new());
    let service = TetherService::new(
        test_config(),
        Arc::new(MockChat::new("support")),
        Arc::new(MockEmbedder::new(512)),
        relational.clone(),
        Arc::new(FailingVectorStore),
        Arc::new(InMemoryKvStore::new()),
        Arc::new(MockTransport::new(vec![200])),
    )
    .await
    .unwrap();

    let draft = service.stage(&[ten_pair_upload()]).await.unwrap();
    let err = service.commit(&draft.draft_id).await.unwrap_err();
    assert!(err.retryable() || err.kind() == tether::ErrorKind::Upstream);

    // None of the draft's pairs are visible anywhere.
    assert!(relational.list_active_pairs().await.unwrap().is_empty());
    let after = service.get_draft(&draft.draft_id).await.unwrap();
    assert_ne!(after.status, DraftStatus::Committed);
}

/// **Scenario**: Committing twice conflicts cleanly: the second call reports
/// already-committed, not a double insert.
#[tokio::test]
async fn double_commit_rejected() {
    let h = harness_with(test_config(), Vec::new(), "support", vec![200]).await;
    let draft = h.service.stage(&[ten_pair_upload()]).await.unwrap();
    h.service.commit(&draft.draft_id).await.unwrap();

    let err = h.service.commit(&draft.draft_id).await.unwrap_err();
    assert_eq!(err.kind(), tether::ErrorKind::AlreadyExists);
    assert_eq!(h.relational.list_active_pairs().await.unwrap().len(), 10);
}

/// **Scenario**: Commit emits document.ingested per source document.
#[tokio::test]
async fn commit_emits_document_event() {
    let h = harness_with(test_config(), Vec::new(), "support", vec![200]).await;
    h.service
        .subscribe(
            "https://r.test",
            vec!["document.ingested".into()],
            "s",
            DeliveryPolicy::default(),
        )
        .await
        .unwrap();

    let draft = h.service.stage(&[ten_pair_upload()]).await.unwrap();
    h.service.commit(&draft.draft_id).await.unwrap();

    // One source file, one event, delivered once.
    for _ in 0..1000 {
        if !h.transport.calls().is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    let calls = h.transport.calls();
    assert_eq!(calls.len(), 1);
    let body: serde_json::Value = serde_json::from_str(&calls[0].body).unwrap();
    assert_eq!(body["kind"], "document.ingested");
    assert_eq!(body["data"]["source"], "faq.json");
    assert_eq!(body["data"]["pair_count"], 10);
}

/// **Scenario**: Archiving a document removes its pairs from search
/// atomically.
#[tokio::test]
async fn archive_document_removes_pairs() {
    let h = harness_with(test_config(), Vec::new(), "support", vec![200]).await;
    h.service
        .subscribe(
            "https://r.test",
            vec!["document.ingested".into()],
            "s",
            DeliveryPolicy::default(),
        )
        .await
        .unwrap();

    let draft = h.service.stage(&[ten_pair_upload()]).await.unwrap();
    h.service.commit(&draft.draft_id).await.unwrap();

    // The ingested event carries the new document id.
    for _ in 0..1000 {
        if !h.transport.calls().is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    let body: serde_json::Value =
        serde_json::from_str(&h.transport.calls()[0].body).unwrap();
    let doc_id = body["data"]["document_id"].as_str().unwrap().to_string();

    let search = |query: &str| SearchRequest {
        query: query.into(),
        top_k: 5,
        category: None,
    };
    assert!(!h
        .service
        .search(search("How to reset my password?"))
        .await
        .unwrap()
        .is_empty());

    h.service.archive_document(&doc_id).await.unwrap();

    assert!(h
        .service
        .search(search("How to reset my password?"))
        .await
        .unwrap()
        .is_empty());
    assert!(h.relational.list_active_pairs().await.unwrap().is_empty());
}

/// **Scenario**: Discarded drafts cannot be committed.
#[tokio::test]
async fn discarded_draft_rejected() {
    let h = harness_with(test_config(), Vec::new(), "support", vec![200]).await;
    let draft = h.service.stage(&[ten_pair_upload()]).await.unwrap();
    h.service.discard_draft(&draft.draft_id).await.unwrap();

    let err = h.service.commit(&draft.draft_id).await.unwrap_err();
    assert_eq!(err.kind(), tether::ErrorKind::Validation);
}
