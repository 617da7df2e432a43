//! Behaviour tests for the buffer contract.
//! Every test runs against both the SQLite buffer (in-memory database) and the
//! Vec-backed buffer, so the two implementations cannot drift apart.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use waymark_events::{
    BufferError, BufferRecord, BufferStore, DestinationId, Event, MemoryBuffer, SqliteBuffer, Value,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap()
}

fn record(destination: &str, name: &str, secs: i64) -> BufferRecord {
    BufferRecord::new(
        DestinationId::from(destination),
        Event::new(name).with_param("a", 0).with_param("b", "c"),
        at(secs),
    )
}

async fn stores() -> Vec<(&'static str, Arc<dyn BufferStore>)> {
    vec![
        (
            "sqlite",
            Arc::new(SqliteBuffer::in_memory().await.unwrap()) as Arc<dyn BufferStore>,
        ),
        ("memory", Arc::new(MemoryBuffer::new()) as Arc<dyn BufferStore>),
    ]
}

// =========================================================================
// Round trip
// =========================================================================

#[tokio::test]
async fn load_returns_everything_saved_and_empties_the_store() {
    for (kind, store) in stores().await {
        let records = vec![
            BufferRecord::new(DestinationId::from("hoge"), Event::new("a"), at(0)),
            record("fuga", "b", 0),
            record("foo", "c", 0),
        ];

        store.save(records.clone()).await.unwrap();
        let loaded = store.load(None).await.unwrap();

        assert_eq!(loaded, records, "{kind}");
        assert_eq!(store.count().await.unwrap(), 0, "{kind}");
    }
}

#[tokio::test]
async fn every_parameter_type_survives_the_buffer() {
    let captured = Utc::now();
    let event = Event::new("mixed")
        .with_param("text", "hello")
        .with_param("int", i64::MIN)
        .with_param("float", 2.5)
        .with_param("flag", false)
        .with_param("when", captured);

    for (kind, store) in stores().await {
        let original = BufferRecord::new(DestinationId::from("typed"), event.clone(), captured);
        store.save(vec![original.clone()]).await.unwrap();

        let loaded = store.load(None).await.unwrap();

        assert_eq!(loaded, vec![original], "{kind}");
        assert_eq!(
            loaded[0].event.param("when"),
            Some(&Value::Date(captured)),
            "{kind}"
        );
    }
}

#[tokio::test]
async fn non_finite_float_is_rejected_and_the_store_keeps_draining() {
    for (kind, store) in stores().await {
        let good = record("a", "good", 1);
        let bad = BufferRecord::new(
            DestinationId::from("a"),
            Event::new("bad").with_param("ratio", f64::NAN),
            at(0),
        );

        let err = store.save(vec![bad, good.clone()]).await.unwrap_err();
        assert!(
            matches!(&err, BufferError::NonFiniteFloat { key } if key == "ratio"),
            "{kind}: {err}"
        );
        // The whole batch is refused, not half of it.
        assert_eq!(store.count().await.unwrap(), 0, "{kind}");

        store.save(vec![good.clone()]).await.unwrap();
        assert_eq!(store.load(None).await.unwrap(), vec![good], "{kind}");
        assert_eq!(store.count().await.unwrap(), 0, "{kind}");
    }
}

// =========================================================================
// Counting and ordering
// =========================================================================

#[tokio::test]
async fn count_tracks_saves_and_drains() {
    for (kind, store) in stores().await {
        assert_eq!(store.count().await.unwrap(), 0, "{kind}");

        store
            .save(vec![record("hoge", "a", 0), record("fuga", "b", 0), record("foo", "c", 0)])
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 3, "{kind}");

        store.load(None).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0, "{kind}");
    }
}

#[tokio::test]
async fn limited_load_returns_oldest_first() {
    for (kind, store) in stores().await {
        store
            .save(vec![record("hoge", "a", 2), record("fuga", "b", 1), record("foo", "c", 3)])
            .await
            .unwrap();

        let loaded = store.load(Some(2)).await.unwrap();
        let names: Vec<&str> = loaded.iter().map(|r| r.event_name()).collect();

        assert_eq!(names, vec!["b", "a"], "{kind}");
        assert_eq!(store.count().await.unwrap(), 1, "{kind}");

        let rest = store.load(Some(2)).await.unwrap();
        assert_eq!(rest.len(), 1, "{kind}");
        assert_eq!(rest[0].event_name(), "c", "{kind}");
        assert_eq!(store.count().await.unwrap(), 0, "{kind}");
    }
}

#[tokio::test]
async fn loading_an_empty_store_is_not_an_error() {
    for (kind, store) in stores().await {
        assert!(store.load(None).await.unwrap().is_empty(), "{kind}");
        assert!(store.load(Some(5)).await.unwrap().is_empty(), "{kind}");
    }
}

#[tokio::test]
async fn ties_on_timestamp_keep_insertion_order() {
    for (kind, store) in stores().await {
        store.save(vec![record("x", "first", 7)]).await.unwrap();
        store
            .save(vec![record("x", "second", 7), record("x", "third", 7)])
            .await
            .unwrap();

        let loaded = store.load(None).await.unwrap();
        let names: Vec<&str> = loaded.iter().map(|r| r.event_name()).collect();

        assert_eq!(names, vec!["first", "second", "third"], "{kind}");
    }
}

// =========================================================================
// Concurrency
// =========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_saves_and_drains_lose_and_duplicate_nothing() {
    for (kind, store) in stores().await {
        let producers: Vec<_> = (0..8)
            .map(|p| {
                let store = store.clone();
                tokio::spawn(async move {
                    for i in 0..25 {
                        let name = format!("p{p}-{i}");
                        store.save(vec![record("x", &name, i)]).await.unwrap();
                    }
                })
            })
            .collect();

        let drainer = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut seen = Vec::new();
                for _ in 0..50 {
                    seen.extend(store.load(Some(3)).await.unwrap());
                    tokio::task::yield_now().await;
                }
                seen
            })
        };

        for producer in producers {
            producer.await.unwrap();
        }
        let mut seen = drainer.await.unwrap();
        seen.extend(store.load(None).await.unwrap());

        let mut names: Vec<String> = seen.iter().map(|r| r.event_name().to_string()).collect();
        names.sort();
        names.dedup();

        assert_eq!(seen.len(), 200, "{kind}");
        assert_eq!(names.len(), 200, "{kind}");
        assert_eq!(store.count().await.unwrap(), 0, "{kind}");
    }
}

// =========================================================================
// Durability
// =========================================================================

#[tokio::test]
async fn records_survive_reopening_the_file() {
    let dir = std::env::temp_dir().join(format!("waymark-store-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("buffer.sqlite");
    let _ = std::fs::remove_file(&path);

    {
        let store = SqliteBuffer::open(&path).await.unwrap();
        store.clear().await.unwrap();
        store.save(vec![record("later", "pending", 1)]).await.unwrap();
        store.close().await;
    }

    let reopened = SqliteBuffer::open(&path).await.unwrap();
    assert_eq!(reopened.count().await.unwrap(), 1);

    let loaded = reopened.load(None).await.unwrap();
    assert_eq!(loaded[0].destination, DestinationId::from("later"));
    assert_eq!(loaded[0].event_name(), "pending");

    let _ = std::fs::remove_dir_all(&dir);
}
