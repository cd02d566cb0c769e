//! `PostgreSQL` integration tests.
//!
//! Set `ORDERKEEPER_TEST_DSN` to a database the tests may create tables in.
//! Each test uses its own table and drops it afterwards.

use anyhow::{Context, Result};
use orderkeeper::order::{EntityRef, OrderError, Reorderer, RetryPolicy};
use orderkeeper::store::{OrderedTable, PgIndexStore};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use uuid::Uuid;

type Member = EntityRef<Uuid, Uuid>;

struct TestDb {
    pool: PgPool,
    engine: Reorderer<PgIndexStore>,
    table: String,
}

impl TestDb {
    async fn connect() -> Result<Option<Self>> {
        let Ok(dsn) = std::env::var("ORDERKEEPER_TEST_DSN") else {
            eprintln!("Skipping integration test: ORDERKEEPER_TEST_DSN is not set");
            return Ok(None);
        };

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&dsn)
            .await
            .context("failed to connect test pool")?;

        let table = format!("orderkeeper_test_{}", Uuid::new_v4().simple());
        let layout = OrderedTable::new(table.clone())
            .with_container_column("container_id")
            .with_deleted_column("is_deleted");
        let store = PgIndexStore::new(pool.clone(), layout)?
            .with_lock_timeout(Duration::from_secs(2));
        store.apply_schema().await?;

        let engine = Reorderer::new(store).with_retry_policy(
            RetryPolicy::new()
                .with_max_attempts(25)
                .with_backoff_base(Duration::from_millis(5))
                .with_backoff_max(Duration::from_millis(50)),
        );
        Ok(Some(Self {
            pool,
            engine,
            table,
        }))
    }

    async fn drop_table(self) -> Result<()> {
        sqlx::query(&format!("DROP TABLE IF EXISTS \"{}\"", self.table))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

async fn append(engine: &Reorderer<PgIndexStore>, container: Uuid, count: usize) -> Result<Vec<Uuid>> {
    let mut keys = Vec::with_capacity(count);
    for _ in 0..count {
        let key = Uuid::now_v7();
        engine.upsert(&mut Member::new(container, key), None).await?;
        keys.push(key);
    }
    Ok(keys)
}

#[tokio::test]
async fn worked_example_on_postgres() -> Result<()> {
    let Some(db) = TestDb::connect().await? else {
        return Ok(());
    };
    let container = Uuid::now_v7();
    let keys = append(&db.engine, container, 4).await?;
    let [a, b, c, d] = [keys[0], keys[1], keys[2], keys[3]];
    let e = Uuid::now_v7();

    db.engine.upsert(&mut Member::new(container, e), Some(1)).await?;
    assert_eq!(db.engine.list(&container).await?, vec![a, e, b, c, d]);

    db.engine.remove(&Member::new(container, c)).await?;
    assert_eq!(db.engine.list(&container).await?, vec![a, e, b, d]);

    let mut moved = Member::new(container, a);
    assert_eq!(db.engine.upsert(&mut moved, Some(10)).await?, 3);
    assert_eq!(db.engine.list(&container).await?, vec![e, b, d, a]);

    db.engine.reorder_all(&container, &[d, a, e, b]).await?;
    assert_eq!(db.engine.list(&container).await?, vec![d, a, e, b]);
    assert!(db.engine.verify(&container).await?.is_dense());

    // Another container is untouched by all of the above.
    let other = Uuid::now_v7();
    append(&db.engine, other, 2).await?;
    assert_eq!(db.engine.list(&other).await?.len(), 2);

    db.drop_table().await
}

#[tokio::test]
async fn soft_delete_and_compact_on_postgres() -> Result<()> {
    let Some(db) = TestDb::connect().await? else {
        return Ok(());
    };
    let container = Uuid::now_v7();
    let keys = append(&db.engine, container, 4).await?;

    let mut gone = Member::new(container, keys[1]).deleted();
    assert_eq!(db.engine.upsert(&mut gone, None).await?, 1);
    assert!(!db.engine.verify(&container).await?.is_dense());

    assert_eq!(db.engine.compact(&container).await?, 2);
    assert!(db.engine.verify(&container).await?.is_dense());
    assert_eq!(
        db.engine.list(&container).await?,
        vec![keys[0], keys[2], keys[3]]
    );

    let err = db
        .engine
        .reorder_all(&container, &[keys[0], keys[2]])
        .await;
    assert!(matches!(err, Err(OrderError::Validation(_))));

    db.drop_table().await
}

/// A writer blocked behind another transaction's committed move must build on
/// that move, not on the row order it saw before waiting.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocked_append_keeps_a_committed_move() -> Result<()> {
    let Some(db) = TestDb::connect().await? else {
        return Ok(());
    };
    let container = Uuid::now_v7();
    let keys = append(&db.engine, container, 4).await?;
    let [a, b, c, d] = [keys[0], keys[1], keys[2], keys[3]];
    let table = &db.table;

    // Move `a` from 0 to 3 by hand, holding the container locks.
    let mut tx = db.pool.begin().await?;
    sqlx::query(&format!(
        r#"SELECT "id" FROM "{table}" WHERE "container_id" = $1 ORDER BY "order" DESC FOR UPDATE"#
    ))
    .bind(container)
    .execute(&mut *tx)
    .await?;
    sqlx::query(&format!(
        r#"UPDATE "{table}" SET "order" = "order" + 1004 WHERE "container_id" = $1"#
    ))
    .bind(container)
    .execute(&mut *tx)
    .await?;
    sqlx::query(&format!(
        r#"UPDATE "{table}" SET "order" = "order" - 1005 WHERE "container_id" = $1 AND "id" <> $2"#
    ))
    .bind(container)
    .bind(a)
    .execute(&mut *tx)
    .await?;
    sqlx::query(&format!(
        r#"UPDATE "{table}" SET "order" = 3 WHERE "container_id" = $1 AND "id" = $2"#
    ))
    .bind(container)
    .bind(a)
    .execute(&mut *tx)
    .await?;

    let e = Uuid::now_v7();
    let engine = db.engine.clone();
    let blocked = tokio::spawn(async move {
        engine.upsert(&mut Member::new(container, e), None).await
    });
    tokio::time::sleep(Duration::from_millis(500)).await;
    tx.commit().await?;

    assert_eq!(blocked.await??, 4);
    assert_eq!(db.engine.list(&container).await?, vec![b, c, d, a, e]);
    assert!(db.engine.verify(&container).await?.is_dense());

    db.drop_table().await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_on_postgres() -> Result<()> {
    let Some(db) = TestDb::connect().await? else {
        return Ok(());
    };
    let container = Uuid::now_v7();
    let seeded = append(&db.engine, container, 5).await?;

    let mut handles = Vec::new();
    for task in 0..8usize {
        let engine = db.engine.clone();
        let seeded = seeded.clone();
        handles.push(tokio::spawn(async move {
            let mut inserted = Vec::new();
            for step in 0..10usize {
                let mut member = Member::new(container, Uuid::now_v7());
                let desired = i32::try_from((task + step) % 7).ok();
                engine.upsert(&mut member, desired).await?;
                inserted.push(*member.key());
                let shared = seeded[(task + step) % seeded.len()];
                engine
                    .upsert(&mut Member::new(container, shared), Some(0))
                    .await?;
            }
            Ok::<_, OrderError>(inserted)
        }));
    }
    let mut expected = seeded;
    for handle in handles {
        expected.extend(handle.await??);
    }

    let report = db.engine.verify(&container).await?;
    assert!(report.is_dense(), "{report:?}");
    assert_eq!(report.count, 5 + 8 * 10);

    let mut members = db.engine.list(&container).await?;
    members.sort_unstable();
    expected.sort_unstable();
    assert_eq!(members, expected);

    db.drop_table().await
}
