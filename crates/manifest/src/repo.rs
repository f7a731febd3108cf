//! Manifest Store: per-collection, per-item records of what is on disk.

use crate::error::{ErrorKind, Result};
use crate::models::ItemRow;
use crate::{CollectionItem, Database, ItemId};
use exn::ResultExt;
use sqlx::SqlitePool;
use tracing::instrument;

/// Repository over the `collection_items` table.
///
/// Keys are `(collection, item_id)`. Every write is a single statement, so
/// each key is updated atomically and independently of every other key;
/// workers applying actions for different items never contend on anything
/// wider than SQLite's own write lock.
#[derive(Debug, Clone)]
pub struct Manifest {
    pool: SqlitePool,
}
impl From<&Database> for Manifest {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl Manifest {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn item_id(item_id: ItemId) -> Result<i64> {
        i64::try_from(item_id).or_raise(|| ErrorKind::InvalidData("item id"))
    }

    /// Look up one item in a collection.
    pub async fn get(&self, collection: &str, item_id: ItemId) -> Result<Option<CollectionItem>> {
        let row: Option<ItemRow> = sqlx::query_as(include_str!("../queries/get_item.sql"))
            .bind(collection)
            .bind(Self::item_id(item_id)?)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(|r| <(ItemId, CollectionItem)>::try_from(r).map(|(_, item)| item)).transpose()
    }

    /// Insert or replace the entry for an item.
    #[instrument(level = "debug", skip(self, item), fields(path = %item.path.display()))]
    pub async fn put(&self, collection: &str, item_id: ItemId, item: &CollectionItem) -> Result<()> {
        let row = ItemRow::from_model(item_id, item)?;
        sqlx::query(include_str!("../queries/upsert_item.sql"))
            .bind(collection)
            .bind(row.item_id)
            .bind(row.path)
            .bind(row.source_mtime)
            .bind(row.art_mtime)
            .bind(row.format)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Delete the entry for an item.
    ///
    /// Returns `true` if an entry was removed, `false` if none existed.
    #[instrument(level = "debug", skip(self))]
    pub async fn remove(&self, collection: &str, item_id: ItemId) -> Result<bool> {
        let result = sqlx::query(include_str!("../queries/delete_item.sql"))
            .bind(collection)
            .bind(Self::item_id(item_id)?)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() > 0)
    }

    /// Every entry of a collection, ordered by item identity.
    pub async fn all(&self, collection: &str) -> Result<Vec<(ItemId, CollectionItem)>> {
        let rows: Vec<ItemRow> = sqlx::query_as(include_str!("../queries/list_items.sql"))
            .bind(collection)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(<(ItemId, CollectionItem)>::try_from).collect()
    }

    /// Names of every collection with at least one entry.
    pub async fn collections(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(include_str!("../queries/list_collections.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use time::UtcDateTime;

    fn t0() -> UtcDateTime {
        UtcDateTime::from_unix_timestamp_nanos(1_709_294_400_000_000_001).unwrap()
    }

    #[fixture]
    async fn manifest() -> Manifest {
        let db = Database::connect_in_memory().await.unwrap();
        Manifest::from(&db)
    }

    fn item(path: &str) -> CollectionItem {
        CollectionItem::new(path, t0(), "MP3")
    }

    #[rstest]
    #[tokio::test]
    async fn test_get_missing(#[future] manifest: Manifest) {
        let manifest = manifest.await;
        assert_eq!(manifest.get("player", 1).await.unwrap(), None);
    }

    #[rstest]
    #[tokio::test]
    async fn test_put_then_get(#[future] manifest: Manifest) {
        let manifest = manifest.await;
        let stored = item("Artist/Album/01 Song.mp3").with_art_mtime(Some(t0()));
        manifest.put("player", 1, &stored).await.unwrap();
        assert_eq!(manifest.get("player", 1).await.unwrap(), Some(stored));
    }

    #[rstest]
    #[tokio::test]
    async fn test_put_replaces(#[future] manifest: Manifest) {
        let manifest = manifest.await;
        manifest.put("player", 1, &item("old.mp3")).await.unwrap();
        manifest.put("player", 1, &item("new.mp3")).await.unwrap();
        let all = manifest.all("player").await.unwrap();
        assert_eq!(all, vec![(1, item("new.mp3"))]);
    }

    #[rstest]
    #[tokio::test]
    async fn test_collections_are_isolated(#[future] manifest: Manifest) {
        let manifest = manifest.await;
        manifest.put("player", 1, &item("a.mp3")).await.unwrap();
        manifest.put("phone", 1, &item("b.mp3")).await.unwrap();
        manifest.put("phone", 2, &item("c.mp3")).await.unwrap();
        assert_eq!(manifest.all("player").await.unwrap().len(), 1);
        assert_eq!(manifest.all("phone").await.unwrap().len(), 2);
        assert!(manifest.remove("phone", 1).await.unwrap());
        assert_eq!(manifest.get("player", 1).await.unwrap(), Some(item("a.mp3")));
        assert_eq!(manifest.collections().await.unwrap(), vec!["phone".to_string(), "player".to_string()]);
    }

    #[rstest]
    #[tokio::test]
    async fn test_remove_missing(#[future] manifest: Manifest) {
        let manifest = manifest.await;
        assert!(!manifest.remove("player", 99).await.unwrap());
    }

    #[rstest]
    #[tokio::test]
    async fn test_all_is_ordered_by_item(#[future] manifest: Manifest) {
        let manifest = manifest.await;
        for id in [5, 3, 9, 1] {
            manifest.put("player", id, &item(&format!("{id}.mp3"))).await.unwrap();
        }
        let ids: Vec<_> = manifest.all("player").await.unwrap().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![1, 3, 5, 9]);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.db");
        let db = Database::connect(&path).await.unwrap();
        Manifest::from(&db).put("player", 1, &item("kept.mp3")).await.unwrap();
        db.close().await;
        let db = Database::connect(&path).await.unwrap();
        assert_eq!(Manifest::from(&db).get("player", 1).await.unwrap(), Some(item("kept.mp3")));
        db.close().await;
    }
}
