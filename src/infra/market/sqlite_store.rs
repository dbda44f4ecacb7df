// SQLite implementation of MarketStore.
//
// Tables:
// - players: name and credit balance
// - items: owner, label, price and listing flag
// - purchases: append-only ledger of completed sales
//
// Writes run inside BEGIN IMMEDIATE so the write lock is taken before the
// first read. Two purchases of the same item are therefore evaluated one
// after the other, and the second one sees the item already sold.

use super::seed::SeedStore;
use crate::core::market::{
    Item, ItemRef, MarketStore, Player, PlayerRef, PurchaseEntry, PurchaseOutcome, PurchaseRef,
    StoreError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::{Row, Sqlite};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

/// How many times a write is retried when SQLite reports the database busy.
pub const DEFAULT_WRITE_RETRIES: u32 = 3;

/// How long SQLite itself waits for a lock before reporting busy.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Failure inside a write transaction: either SQLite itself or a domain error
/// such as a missing record.
#[derive(Debug, thiserror::Error)]
enum TxError {
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<TxError> for StoreError {
    fn from(err: TxError) -> Self {
        match err {
            TxError::Sql(e) => StoreError::Storage(e.to_string()),
            TxError::Store(e) => e,
        }
    }
}

type TxFuture<'c, T> = Pin<Box<dyn Future<Output = Result<T, TxError>> + Send + 'c>>;

/// A pooled connection inside `BEGIN IMMEDIATE`.
///
/// It only goes back to the pool after a successful COMMIT or ROLLBACK. If it
/// is dropped with the transaction still open (failed rollback, cancelled
/// caller) it is detached and closed instead, which makes SQLite roll back and
/// release the write lock.
struct ImmediateTx {
    conn: Option<PoolConnection<Sqlite>>,
}

impl ImmediateTx {
    async fn begin(pool: &SqlitePool) -> Result<Self, TxError> {
        let mut conn = pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(Self { conn: Some(conn) })
    }

    fn conn(&mut self) -> Result<&mut SqliteConnection, TxError> {
        match self.conn.as_deref_mut() {
            Some(conn) => Ok(conn),
            None => Err(TxError::Store(StoreError::Storage(
                "transaction already finished".to_string(),
            ))),
        }
    }

    async fn finish(mut self, statement: &'static str) -> Result<(), sqlx::Error> {
        if let Some(conn) = self.conn.as_deref_mut() {
            sqlx::query(statement).execute(conn).await?;
        }
        // Closed cleanly, hand the connection back to the pool.
        self.conn.take();
        Ok(())
    }

    async fn commit(self) -> Result<(), sqlx::Error> {
        self.finish("COMMIT").await
    }

    async fn rollback(self) {
        if let Err(e) = self.finish("ROLLBACK").await {
            tracing::warn!(error = %e, "Rollback failed, closing connection");
        }
    }
}

impl Drop for ImmediateTx {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            drop(conn.detach());
        }
    }
}

pub struct SqliteMarketStore {
    pool: SqlitePool,
    write_retries: u32,
}

impl SqliteMarketStore {
    /// Open (or create) the database at `database_path` and run migrations.
    pub async fn new(database_path: &str) -> anyhow::Result<Self> {
        Self::new_with_busy_timeout(database_path, DEFAULT_BUSY_TIMEOUT).await
    }

    pub async fn new_with_busy_timeout(
        database_path: &str,
        busy_timeout: Duration,
    ) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(database_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", database_path))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            write_retries: DEFAULT_WRITE_RETRIES,
        };
        store.migrate().await?;
        Ok(store)
    }

    /// Override how many busy retries a write gets before it reports a conflict.
    pub fn with_write_retries(mut self, retries: u32) -> Self {
        self.write_retries = retries;
        self
    }

    /// Run database migrations to create tables.
    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS players (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                credits INTEGER NOT NULL DEFAULT 0 CHECK (credits >= 0)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id INTEGER NOT NULL REFERENCES players(id),
                label TEXT NOT NULL,
                price INTEGER NOT NULL DEFAULT 0 CHECK (price >= 0),
                for_sale BOOLEAN NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS purchases (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                item_id INTEGER NOT NULL REFERENCES items(id),
                buyer_id INTEGER NOT NULL REFERENCES players(id),
                seller_id INTEGER NOT NULL REFERENCES players(id),
                price INTEGER NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_for_sale ON items(for_sale)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_owner ON items(owner_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Run `body` inside BEGIN IMMEDIATE, committing on success and rolling
    /// back on any error. Busy errors are retried up to `write_retries` times.
    async fn write_tx<T, F>(&self, operation: &'static str, mut body: F) -> Result<T, StoreError>
    where
        F: for<'c> FnMut(&'c mut SqliteConnection) -> TxFuture<'c, T>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = match ImmediateTx::begin(&self.pool).await {
                Err(e) => Err(e),
                Ok(mut tx) => {
                    let outcome = match tx.conn() {
                        Ok(conn) => body(conn).await,
                        Err(e) => Err(e),
                    };
                    match outcome {
                        Ok(value) => match tx.commit().await {
                            Ok(()) => Ok(value),
                            Err(e) => Err(TxError::from(e)),
                        },
                        Err(e) => {
                            tx.rollback().await;
                            Err(e)
                        }
                    }
                }
            };

            match result {
                Ok(value) => return Ok(value),
                Err(TxError::Sql(e)) if is_busy(&e) => {
                    if attempt > self.write_retries {
                        return Err(StoreError::Conflict(format!("{}: {}", operation, e)));
                    }
                    tracing::warn!(operation, attempt, "Database busy, retrying write");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            // SQLITE_BUSY, SQLITE_LOCKED, SQLITE_BUSY_SNAPSHOT
            matches!(db.code().as_deref(), Some("5") | Some("6") | Some("517"))
                || db.message().contains("database is locked")
        }
        _ => false,
    }
}

fn item_from_row(row: &SqliteRow) -> Result<Item, sqlx::Error> {
    Ok(Item {
        id: ItemRef(row.try_get("id")?),
        owner: PlayerRef(row.try_get("owner_id")?),
        label: row.try_get("label")?,
        price: row.try_get("price")?,
        for_sale: row.try_get("for_sale")?,
    })
}

fn player_from_row(row: &SqliteRow) -> Result<Player, sqlx::Error> {
    Ok(Player {
        id: PlayerRef(row.try_get("id")?),
        name: row.try_get("name")?,
        credits: row.try_get("credits")?,
    })
}

async fn fetch_item(conn: &mut SqliteConnection, id: ItemRef) -> Result<Item, TxError> {
    let row = sqlx::query("SELECT id, owner_id, label, price, for_sale FROM items WHERE id = ?")
        .bind(id.0)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| StoreError::item_not_found(id))?;
    Ok(item_from_row(&row)?)
}

async fn fetch_player(conn: &mut SqliteConnection, id: PlayerRef) -> Result<Player, TxError> {
    let row = sqlx::query("SELECT id, name, credits FROM players WHERE id = ?")
        .bind(id.0)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| StoreError::player_not_found(id))?;
    Ok(player_from_row(&row)?)
}

async fn purchase(
    conn: &mut SqliteConnection,
    item: ItemRef,
    buyer: PlayerRef,
) -> Result<PurchaseOutcome, TxError> {
    let item = fetch_item(conn, item).await?;
    let buyer = fetch_player(conn, buyer).await?;
    let seller = fetch_player(conn, item.owner).await?;

    if !item.for_sale {
        return Ok(PurchaseOutcome::NotForSale);
    }

    if buyer.id == seller.id {
        sqlx::query("UPDATE items SET for_sale = 0 WHERE id = ?")
            .bind(item.id.0)
            .execute(&mut *conn)
            .await?;
        return Ok(PurchaseOutcome::RemovedFromSale);
    }

    if buyer.credits < item.price {
        return Ok(PurchaseOutcome::InsufficientFunds);
    }

    // Guarded on the listing we just read, so a stale read cannot move the item twice.
    let moved = sqlx::query(
        r#"
        UPDATE items
        SET owner_id = ?, for_sale = 0
        WHERE id = ? AND for_sale = 1 AND owner_id = ?
        "#,
    )
    .bind(buyer.id.0)
    .bind(item.id.0)
    .bind(seller.id.0)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if moved != 1 {
        return Ok(PurchaseOutcome::NotForSale);
    }

    sqlx::query(
        r#"
        INSERT INTO purchases (item_id, buyer_id, seller_id, price, created_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(item.id.0)
    .bind(buyer.id.0)
    .bind(seller.id.0)
    .bind(item.price)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    sqlx::query("UPDATE players SET credits = credits - ? WHERE id = ?")
        .bind(item.price)
        .bind(buyer.id.0)
        .execute(&mut *conn)
        .await?;

    sqlx::query("UPDATE players SET credits = credits + ? WHERE id = ?")
        .bind(item.price)
        .bind(seller.id.0)
        .execute(&mut *conn)
        .await?;

    Ok(PurchaseOutcome::Success)
}

async fn overwrite_listing(
    conn: &mut SqliteConnection,
    item: ItemRef,
    price: i64,
    for_sale: bool,
) -> Result<Item, TxError> {
    let updated = sqlx::query("UPDATE items SET price = ?, for_sale = ? WHERE id = ?")
        .bind(price)
        .bind(for_sale)
        .bind(item.0)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    if updated == 0 {
        return Err(StoreError::item_not_found(item).into());
    }

    fetch_item(conn, item).await
}

#[async_trait]
impl MarketStore for SqliteMarketStore {
    async fn sell_item_to_player(
        &self,
        item: ItemRef,
        buyer: PlayerRef,
    ) -> Result<PurchaseOutcome, StoreError> {
        self.write_tx("purchase", |conn| Box::pin(purchase(conn, item, buyer)))
            .await
    }

    async fn update_listing(
        &self,
        item: ItemRef,
        price: i64,
        for_sale: bool,
    ) -> Result<Item, StoreError> {
        self.write_tx("update_listing", |conn| {
            Box::pin(overwrite_listing(conn, item, price, for_sale))
        })
        .await
    }

    async fn items_for_sale(&self) -> Result<Vec<Item>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, owner_id, label, price, for_sale FROM items WHERE for_sale = 1 ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        rows.iter()
            .map(item_from_row)
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| StoreError::Storage(e.to_string()))
    }

    async fn list_players(&self) -> Result<Vec<Player>, StoreError> {
        let rows = sqlx::query("SELECT id, name, credits FROM players ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        rows.iter()
            .map(player_from_row)
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| StoreError::Storage(e.to_string()))
    }

    async fn items_by_owner(&self, owners: &[PlayerRef]) -> Result<Vec<Vec<Item>>, StoreError> {
        // One read transaction so every owner is read from the same snapshot.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        let mut owned = Vec::with_capacity(owners.len());
        for owner in owners {
            let rows = sqlx::query(
                "SELECT id, owner_id, label, price, for_sale FROM items WHERE owner_id = ? ORDER BY id",
            )
            .bind(owner.0)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

            let items = rows
                .iter()
                .map(item_from_row)
                .collect::<Result<Vec<_>, sqlx::Error>>()
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            owned.push(items);
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(owned)
    }

    async fn list_purchases(&self) -> Result<Vec<PurchaseEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT p.id, p.price, p.created_at,
                   b.name AS buyer, s.name AS seller, i.label AS label
            FROM purchases p
            JOIN players b ON b.id = p.buyer_id
            JOIN players s ON s.id = p.seller_id
            JOIN items i ON i.id = p.item_id
            ORDER BY p.id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        rows.iter()
            .map(|row| -> Result<PurchaseEntry, sqlx::Error> {
                Ok(PurchaseEntry {
                    key: PurchaseRef(row.try_get("id")?),
                    buyer: row.try_get("buyer")?,
                    seller: row.try_get("seller")?,
                    price: row.try_get("price")?,
                    label: row.try_get("label")?,
                    created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| StoreError::Storage(e.to_string()))
    }
}

#[async_trait]
impl SeedStore for SqliteMarketStore {
    async fn is_empty(&self) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT (SELECT COUNT(*) FROM players) + (SELECT COUNT(*) FROM items) AS total",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        let total: i64 = row
            .try_get("total")
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(total == 0)
    }

    async fn create_player(&self, name: &str, credits: i64) -> Result<Player, StoreError> {
        let result = sqlx::query("INSERT INTO players (name, credits) VALUES (?, ?)")
            .bind(name)
            .bind(credits)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        Ok(Player {
            id: PlayerRef(result.last_insert_rowid()),
            name: name.to_string(),
            credits,
        })
    }

    async fn create_item(
        &self,
        owner: PlayerRef,
        label: &str,
        price: i64,
        for_sale: bool,
    ) -> Result<Item, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO items (owner_id, label, price, for_sale)
            SELECT id, ?, ?, ? FROM players WHERE id = ?
            "#,
        )
        .bind(label)
        .bind(price)
        .bind(for_sale)
        .bind(owner.0)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::player_not_found(owner));
        }

        Ok(Item {
            id: ItemRef(result.last_insert_rowid()),
            owner,
            label: label.to_string(),
            price,
            for_sale,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Connection;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn open_store(dir: &TempDir) -> SqliteMarketStore {
        let path = dir.path().join("market.db");
        SqliteMarketStore::new(path.to_str().unwrap()).await.unwrap()
    }

    async fn credits(store: &SqliteMarketStore, id: PlayerRef) -> i64 {
        store
            .list_players()
            .await
            .unwrap()
            .into_iter()
            .find(|p| p.id == id)
            .unwrap()
            .credits
    }

    #[tokio::test]
    async fn test_purchase_transfers_item_and_credits() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let seller = store.create_player("seller", 5).await.unwrap();
        let buyer = store.create_player("buyer", 50).await.unwrap();
        let hat = store.create_item(seller.id, "hat", 20, true).await.unwrap();

        let outcome = store.sell_item_to_player(hat.id, buyer.id).await.unwrap();

        assert_eq!(outcome, PurchaseOutcome::Success);
        assert_eq!(credits(&store, buyer.id).await, 30);
        assert_eq!(credits(&store, seller.id).await, 25);

        let owned = store.items_by_owner(&[buyer.id, seller.id]).await.unwrap();
        assert_eq!(owned[0].len(), 1);
        assert_eq!(owned[0][0].owner, buyer.id);
        assert!(!owned[0][0].for_sale);
        assert!(owned[1].is_empty());

        let purchases = store.list_purchases().await.unwrap();
        assert_eq!(purchases.len(), 1);
        assert_eq!(purchases[0].buyer, "buyer");
        assert_eq!(purchases[0].seller, "seller");
        assert_eq!(purchases[0].label, "hat");
        assert_eq!(purchases[0].price, 20);
    }

    #[tokio::test]
    async fn test_declined_purchases_leave_state_alone() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let seller = store.create_player("seller", 5).await.unwrap();
        let buyer = store.create_player("buyer", 10).await.unwrap();
        let hat = store.create_item(seller.id, "hat", 20, true).await.unwrap();
        let cap = store.create_item(seller.id, "cap", 1, false).await.unwrap();

        assert_eq!(
            store.sell_item_to_player(hat.id, buyer.id).await.unwrap(),
            PurchaseOutcome::InsufficientFunds
        );
        assert_eq!(
            store.sell_item_to_player(cap.id, buyer.id).await.unwrap(),
            PurchaseOutcome::NotForSale
        );

        assert_eq!(credits(&store, buyer.id).await, 10);
        assert_eq!(credits(&store, seller.id).await, 5);
        assert_eq!(store.items_for_sale().await.unwrap(), vec![hat]);
        assert!(store.list_purchases().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_self_purchase_withdraws_listing() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let owner = store.create_player("owner", 5).await.unwrap();
        let hat = store.create_item(owner.id, "hat", 20, true).await.unwrap();

        let outcome = store.sell_item_to_player(hat.id, owner.id).await.unwrap();

        assert_eq!(outcome, PurchaseOutcome::RemovedFromSale);
        assert!(store.items_for_sale().await.unwrap().is_empty());
        assert_eq!(credits(&store, owner.id).await, 5);
        assert!(store.list_purchases().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_listing_and_history_price() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let seller = store.create_player("seller", 0).await.unwrap();
        let buyer = store.create_player("buyer", 500).await.unwrap();
        let hat = store.create_item(seller.id, "hat", 20, false).await.unwrap();

        let listed = store.update_listing(hat.id, 150, true).await.unwrap();
        assert_eq!(listed.price, 150);
        assert!(listed.for_sale);

        store.sell_item_to_player(hat.id, buyer.id).await.unwrap();
        store.update_listing(hat.id, 7, false).await.unwrap();

        let purchases = store.list_purchases().await.unwrap();
        assert_eq!(purchases[0].price, 150);
    }

    #[tokio::test]
    async fn test_unknown_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let buyer = store.create_player("buyer", 5).await.unwrap();

        let err = store
            .sell_item_to_player(ItemRef(42), buyer.id)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "item", .. }));

        let err = store.update_listing(ItemRef(42), 1, true).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "item", .. }));

        let err = store
            .create_item(PlayerRef(42), "ghost", 1, true)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { kind: "player", .. }));
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open_store(&dir).await;
            assert!(store.is_empty().await.unwrap());
            let p = store.create_player("keeper", 9).await.unwrap();
            store.create_item(p.id, "stone", 1, true).await.unwrap();
        }

        let store = open_store(&dir).await;
        assert!(!store.is_empty().await.unwrap());
        assert_eq!(store.list_players().await.unwrap()[0].name, "keeper");
        assert_eq!(store.items_for_sale().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_locked_database_reports_conflict_after_retries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("market.db");
        let path = path.to_str().unwrap();
        let store = SqliteMarketStore::new_with_busy_timeout(path, Duration::from_millis(50))
            .await
            .unwrap()
            .with_write_retries(1);
        let seller = store.create_player("seller", 0).await.unwrap();
        let buyer = store.create_player("buyer", 50).await.unwrap();
        let hat = store.create_item(seller.id, "hat", 20, true).await.unwrap();

        let mut other = SqliteConnection::connect(&format!("sqlite://{}", path))
            .await
            .unwrap();
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut other)
            .await
            .unwrap();

        let err = store
            .sell_item_to_player(hat.id, buyer.id)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)), "got {:?}", err);

        sqlx::query("ROLLBACK").execute(&mut other).await.unwrap();
        assert_eq!(credits(&store, buyer.id).await, 50);
        assert_eq!(store.items_for_sale().await.unwrap(), vec![hat.clone()]);
        assert!(store.list_purchases().await.unwrap().is_empty());

        // Once the lock is gone the same purchase goes through.
        assert_eq!(
            store.sell_item_to_player(hat.id, buyer.id).await.unwrap(),
            PurchaseOutcome::Success
        );
    }

    #[tokio::test]
    async fn test_abandoned_write_does_not_keep_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await.with_write_retries(0);
        let seller = store.create_player("seller", 0).await.unwrap();
        let buyer = store.create_player("buyer", 50).await.unwrap();
        let hat = store.create_item(seller.id, "hat", 20, true).await.unwrap();
        let buyer_id = buyer.id.0;

        // Start a write, let it change a row, then drop it before it commits.
        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
        let mut started_tx = Some(started_tx);
        let abandoned = store.write_tx("abandoned", move |conn| {
            let started = started_tx.take();
            Box::pin(async move {
                sqlx::query("UPDATE players SET credits = 0 WHERE id = ?")
                    .bind(buyer_id)
                    .execute(&mut *conn)
                    .await?;
                if let Some(started) = started {
                    let _ = started.send(());
                }
                std::future::pending::<()>().await;
                Ok::<(), TxError>(())
            })
        });
        tokio::select! {
            _ = abandoned => panic!("abandoned write finished"),
            _ = started_rx => {}
        }

        for _ in 0..6 {
            store.update_listing(hat.id, 25, true).await.unwrap();
        }
        assert_eq!(credits(&store, buyer.id).await, 50);
        assert_eq!(
            store.sell_item_to_player(hat.id, buyer.id).await.unwrap(),
            PurchaseOutcome::Success
        );
        assert_eq!(credits(&store, buyer.id).await, 25);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_purchases_have_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(open_store(&dir).await);
        let seller = store.create_player("seller", 0).await.unwrap();
        let a = store.create_player("a", 100).await.unwrap();
        let b = store.create_player("b", 100).await.unwrap();
        let gem = store.create_item(seller.id, "gem", 60, true).await.unwrap();
        let (gem_id, a_id, b_id) = (gem.id, a.id, b.id);

        let (ra, rb) = tokio::join!(
            tokio::spawn({
                let store = Arc::clone(&store);
                async move { store.sell_item_to_player(gem_id, a_id).await }
            }),
            tokio::spawn({
                let store = Arc::clone(&store);
                async move { store.sell_item_to_player(gem_id, b_id).await }
            }),
        );
        let outcomes = [ra.unwrap().unwrap(), rb.unwrap().unwrap()];

        assert_eq!(outcomes.iter().filter(|o| o.is_success()).count(), 1);
        assert!(outcomes.contains(&PurchaseOutcome::NotForSale));

        let total: i64 = store
            .list_players()
            .await
            .unwrap()
            .iter()
            .map(|p| p.credits)
            .sum();
        assert_eq!(total, 200);
        assert_eq!(store.list_purchases().await.unwrap().len(), 1);
    }
}
