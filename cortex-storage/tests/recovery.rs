//! Crash-recovery integration test: a file-backed store must come back with
//! every envelope that was mid-flight when the process died restored to
//! `pending`.

use std::sync::Arc;

use cortex_core::domain::{Envelope, Sender};
use cortex_core::traits::Store;
use cortex_storage::{ConnectionConfig, ConnectionPool, SurrealStore};

fn sender() -> Sender {
    Sender {
        id: "u1".into(),
        name: "Alice".into(),
        relationship: "owner".into(),
    }
}

#[tokio::test]
async fn stalled_envelope_survives_a_restart_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("cortex.db");

    {
        let config = ConnectionConfig::surrealkv(db_path.clone());
        let pool = Arc::new(ConnectionPool::new(config));
        pool.initialize().await.unwrap();
        let store = SurrealStore::with_schema(pool, false).await.unwrap();

        store
            .enqueue(Envelope::new("webchat", sender(), "are you there?"))
            .await
            .unwrap();
        // Simulate the loop claiming the envelope and then crashing before
        // it reaches complete_envelope/fail_envelope.
        store.claim_next().await.unwrap();
    }

    // Reopen against the same on-disk database, simulating a restart.
    let config = ConnectionConfig::surrealkv(db_path);
    let pool = Arc::new(ConnectionPool::new(config));
    pool.initialize().await.unwrap();
    let store = SurrealStore::with_schema(pool, false).await.unwrap();

    let reset = store.reset_stalled_envelopes().await.unwrap();
    assert_eq!(reset, 1);
    assert_eq!(store.count_pending().await.unwrap(), 1);

    let claimed = store.claim_next().await.unwrap().unwrap();
    assert_eq!(claimed.envelope.content, "are you there?");
}
