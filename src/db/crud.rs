use sqlx::{Executor, Result, Sqlite, SqlitePool};

use super::TenantStats;
use crate::catalog::CatalogRecord;

/// 添加或更新图片记录
///
/// 已存在时只覆盖非空的描述符，避免一次失败的提取清空已有的数据
pub async fn upsert_image<'c, E>(executor: E, record: &CatalogRecord) -> Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO catalog_image
            (entry_id, tenant_id, product_id, image_reference, phash, keypoints, embedding, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (entry_id) DO UPDATE SET
            tenant_id = excluded.tenant_id,
            product_id = excluded.product_id,
            image_reference = excluded.image_reference,
            phash = COALESCE(excluded.phash, phash),
            keypoints = COALESCE(excluded.keypoints, keypoints),
            embedding = COALESCE(excluded.embedding, embedding)
        "#,
    )
    .bind(&record.entry_id)
    .bind(&record.tenant_id)
    .bind(&record.product_id)
    .bind(&record.image_reference)
    .bind(&record.phash)
    .bind(&record.keypoints)
    .bind(&record.embedding)
    .bind(record.created_at)
    .execute(executor)
    .await?;

    Ok(())
}

/// 检查图片是否已添加
pub async fn entry_exists(executor: &SqlitePool, entry_id: &str) -> Result<bool> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM catalog_image WHERE entry_id = ?")
        .bind(entry_id)
        .fetch_one(executor)
        .await?;

    Ok(count > 0)
}

/// 读取租户的目录快照，按创建时间排序
pub async fn load_snapshot(executor: &SqlitePool, tenant_id: &str) -> Result<Vec<CatalogRecord>> {
    sqlx::query_as::<_, CatalogRecord>(
        r#"
        SELECT entry_id, tenant_id, product_id, image_reference, phash, keypoints, embedding, created_at
        FROM catalog_image
        WHERE tenant_id = ?
        ORDER BY created_at ASC, entry_id ASC
        "#,
    )
    .bind(tenant_id)
    .fetch_all(executor)
    .await
}

/// 统计租户的目录
pub async fn tenant_stats(executor: &SqlitePool, tenant_id: &str) -> Result<TenantStats> {
    sqlx::query_as::<_, TenantStats>(
        r#"
        SELECT
            COUNT(*) AS images,
            COUNT(DISTINCT product_id) AS products,
            COUNT(phash) AS with_phash,
            COUNT(keypoints) AS with_keypoints,
            COUNT(embedding) AS with_embedding
        FROM catalog_image
        WHERE tenant_id = ?
        "#,
    )
    .bind(tenant_id)
    .fetch_one(executor)
    .await
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::db::init_db;

    fn record(entry_id: &str, tenant_id: &str, created_at: i64) -> CatalogRecord {
        CatalogRecord {
            entry_id: entry_id.to_string(),
            tenant_id: tenant_id.to_string(),
            product_id: format!("p-{entry_id}"),
            image_reference: format!("{entry_id}.jpg"),
            phash: Some("00000000000000ff".to_string()),
            keypoints: None,
            embedding: None,
            created_at,
        }
    }

    #[tokio::test]
    async fn snapshot_is_scoped_and_ordered() {
        let dir = TempDir::new().unwrap();
        let db = init_db(dir.path().join("catalog.db")).await.unwrap();

        upsert_image(&db, &record("b", "t1", 2)).await.unwrap();
        upsert_image(&db, &record("a", "t1", 2)).await.unwrap();
        upsert_image(&db, &record("c", "t1", 1)).await.unwrap();
        upsert_image(&db, &record("d", "t2", 0)).await.unwrap();

        let snapshot = load_snapshot(&db, "t1").await.unwrap();
        let ids = snapshot.iter().map(|r| r.entry_id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, ["c", "a", "b"]);
        assert!(entry_exists(&db, "d").await.unwrap());
        assert!(!entry_exists(&db, "e").await.unwrap());
    }

    #[tokio::test]
    async fn upsert_keeps_existing_descriptors() {
        let dir = TempDir::new().unwrap();
        let db = init_db(dir.path().join("catalog.db")).await.unwrap();

        upsert_image(&db, &record("a", "t1", 1)).await.unwrap();
        let mut update = record("a", "t1", 5);
        update.phash = None;
        update.embedding = Some(vec![0, 0, 128, 63]);
        upsert_image(&db, &update).await.unwrap();

        let snapshot = load_snapshot(&db, "t1").await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].phash.as_deref(), Some("00000000000000ff"));
        assert_eq!(snapshot[0].embedding.as_deref(), Some(&[0, 0, 128, 63][..]));
        // 创建时间以首次添加为准
        assert_eq!(snapshot[0].created_at, 1);

        let stats = tenant_stats(&db, "t1").await.unwrap();
        assert_eq!(stats, TenantStats {
            images: 1,
            products: 1,
            with_phash: 1,
            with_keypoints: 0,
            with_embedding: 1
        });
    }
}
