#![cfg(feature = "test-utils")]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use sql_backend_postgres::prelude::*;
use sql_backend_postgres::test_utils::postgres::{setup_postgres_embedded, stop_postgres_embedded};
use tracing::instrument::WithSubscriber;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

const DDL: &str = "
CREATE TABLE parent (
    id BIGSERIAL PRIMARY KEY,
    code TEXT NOT NULL UNIQUE,
    a INT8,
    b INT8,
    label TEXT,
    price FLOAT8,
    created TIMESTAMP,
    UNIQUE (a, b)
);
CREATE INDEX parent_label_idx ON parent (label);
CREATE SEQUENCE ticket_seq;
CREATE TABLE child (
    id BIGINT PRIMARY KEY,
    parent_id INT8 REFERENCES parent (id),
    note VARCHAR(20),
    ticket INT8 DEFAULT nextval('ticket_seq')
);
CREATE TABLE c1 (x INT8 CONSTRAINT fk_parent REFERENCES parent (id));
CREATE TABLE c2 (y TEXT CONSTRAINT fk_parent REFERENCES parent (code));
CREATE TABLE pair (
    p INT8,
    q INT8,
    CONSTRAINT pair_parent_fk FOREIGN KEY (p, q) REFERENCES parent (a, b)
);
";

#[test]
fn test_postgres_describe_table() -> Result<(), Box<dyn std::error::Error>> {
    let pg = setup_postgres_embedded("schema_db")?;
    let cfg = pg.config.clone();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let mut conn = PgConnection::open(&cfg).await?;
        conn.execute_batch(DDL).await?;

        let parent = conn.describe_table("parent").await?;
        assert!(parent.exists());
        let names: Vec<_> = parent.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "code", "a", "b", "label", "price", "created"]);

        let id = parent.column("id").ok_or("id missing")?;
        assert_eq!(id.col_type, Ok(SqlType::RowId));
        assert!(id.is_primary);
        // the catalog reports a bigserial column as bigint
        assert!(!id.is_auto_increment);
        assert!(!id.is_nullable);
        // the primary key index is unique and is an index
        assert!(id.is_unique);
        assert!(id.has_index);

        let code = parent.column("code").ok_or("code missing")?;
        assert_eq!(code.col_type, Ok(SqlType::Text));
        assert!(code.is_unique);
        assert!(code.has_index);
        assert!(!code.is_nullable);

        let a = parent.column("a").ok_or("a missing")?;
        assert_eq!(a.col_type, Ok(SqlType::Int));
        assert!(!a.is_unique);
        assert!(a.has_index);
        assert!(a.is_nullable);
        assert_eq!(parent.unique_groups, vec![vec!["a".to_string(), "b".to_string()]]);

        assert!(parent.column("label").ok_or("label missing")?.has_index);
        assert!(!parent.column("price").ok_or("price missing")?.has_index);
        assert_eq!(parent.column("price").ok_or("price missing")?.col_type, Ok(SqlType::Float));
        assert_eq!(
            parent.column("created").ok_or("created missing")?.col_type,
            Ok(SqlType::DateTime)
        );

        let child = conn.describe_table("child").await?;
        let child_id = child.column("id").ok_or("child id missing")?;
        assert_eq!(child_id.col_type, Ok(SqlType::RowId));
        assert!(!child_id.is_auto_increment);
        let parent_id = child.column("parent_id").ok_or("parent_id missing")?;
        assert_eq!(parent_id.col_type, Ok(SqlType::Int));
        assert_eq!(parent_id.foreign_keys, vec![("parent".to_string(), "id".to_string())]);
        // unmapped types carry the declared type
        assert_eq!(
            child.column("note").ok_or("note missing")?.col_type,
            Err("character varying".to_string())
        );
        assert!(child.unique_groups.is_empty());
        // a sequence default does not make a column auto-increment
        let ticket = child.column("ticket").ok_or("ticket missing")?;
        assert_eq!(ticket.col_type, Ok(SqlType::Int));
        assert!(!ticket.is_auto_increment);

        // constraint names are only unique per table
        let c1 = conn.describe_table("c1").await?;
        assert_eq!(
            c1.column("x").ok_or("x missing")?.foreign_keys,
            vec![("parent".to_string(), "id".to_string())]
        );
        let c2 = conn.describe_table("c2").await?;
        assert_eq!(
            c2.column("y").ok_or("y missing")?.foreign_keys,
            vec![("parent".to_string(), "code".to_string())]
        );

        // composite keys pair up column by column
        let pair = conn.describe_table("pair").await?;
        assert_eq!(
            pair.column("p").ok_or("p missing")?.foreign_keys,
            vec![("parent".to_string(), "a".to_string())]
        );
        assert_eq!(
            pair.column("q").ok_or("q missing")?.foreign_keys,
            vec![("parent".to_string(), "b".to_string())]
        );

        // introspection is not cached but is stable
        assert_eq!(conn.describe_table("parent").await?, parent);

        let missing = conn.describe_table("no_such_table").await?;
        assert!(!missing.exists());
        assert!(missing.unique_groups.is_empty());
        assert!(!conn.table_exists("no_such_table").await?);
        assert!(conn.table_exists("child").await?);
        assert_eq!(conn.list_tables().await?, vec!["c1", "c2", "child", "pair", "parent"]);

        conn.close().await?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;

    stop_postgres_embedded(pg);
    Ok(())
}

#[test]
fn test_postgres_schema_search_path() -> Result<(), Box<dyn std::error::Error>> {
    let pg = setup_postgres_embedded("search_path_db")?;
    let cfg = pg.config.clone();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let mut conn = PgConnection::open(&cfg).await?;
        conn.execute_batch(
            "CREATE SCHEMA staging;
             CREATE TABLE public.shared (id BIGINT PRIMARY KEY);
             CREATE TABLE staging.shared (id BIGINT PRIMARY KEY, extra TEXT);",
        )
        .await?;
        conn.close().await?;

        let staging = cfg.clone().with_schema("staging");
        let info = with_connection(&staging, |conn| {
            Box::pin(async move { conn.describe_table("shared").await })
        })
        .await?;
        assert_eq!(info.columns.len(), 2);

        let info = with_connection(&cfg, |conn| {
            Box::pin(async move { conn.describe_table("shared").await })
        })
        .await?;
        assert_eq!(info.columns.len(), 1);

        Ok::<(), Box<dyn std::error::Error>>(())
    })?;

    stop_postgres_embedded(pg);
    Ok(())
}

/// Counts the statements the executor sends, one `debug!` event per statement.
#[derive(Clone, Default)]
struct StatementCounter(Arc<AtomicUsize>);

impl StatementCounter {
    fn take(&self) -> usize {
        self.0.swap(0, Ordering::SeqCst)
    }
}

impl<S: Subscriber> Layer<S> for StatementCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if *meta.level() == Level::DEBUG && meta.target().ends_with("postgres::executor") {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[test]
fn test_postgres_missing_table_costs_one_query() -> Result<(), Box<dyn std::error::Error>> {
    let pg = setup_postgres_embedded("catalog_count_db")?;
    let cfg = pg.config.clone();
    let counter = StatementCounter::default();
    let subscriber = tracing_subscriber::registry().with(counter.clone());

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(
        async move {
            let mut conn = PgConnection::open(&cfg).await?;
            conn.execute_batch("CREATE TABLE present (id BIGINT PRIMARY KEY, v TEXT);")
                .await?;
            counter.take();

            let missing = conn.describe_table("absent").await?;
            assert!(!missing.exists());
            assert_eq!(counter.take(), 1);

            // an existing table runs every catalog query
            let present = conn.describe_table("present").await?;
            assert!(present.exists());
            assert_eq!(counter.take(), 5);

            conn.close().await?;
            Ok::<(), Box<dyn std::error::Error>>(())
        }
        .with_subscriber(subscriber),
    )?;

    stop_postgres_embedded(pg);
    Ok(())
}
