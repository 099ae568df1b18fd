//! Postgres metadata layer using SeaORM.
//!
//! The orchestrator talks to metadata through the `MetadataStore` trait so
//! tests can run against an in-memory implementation; `Client` is the
//! Postgres-backed one. Tables are bootstrapped at connect time with
//! idempotent DDL.

pub mod entities;

use std::time::Duration;

use async_trait::async_trait;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection,
    DbErr, EntityTrait, QueryFilter, QueryOrder, Set, Statement,
};
use uuid::Uuid;

use crate::error::{Result, ServiceError};

use entities::{chunk, feature, file, file_chunk};

/// Attributes of a new file record. The fresh id is minted by the store.
pub struct NewFile<'a> {
    pub owner_id: &'a str,
    pub filename: &'a str,
    pub fea_hash: &'a [u8],
    pub dek_shared: &'a [u8],
    pub dek_user: &'a [u8],
    pub pkg2_len: i64,
}

/// Typed metadata operations the DSDE pipeline depends on.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Look up the wrapped shared DEK for a feature.
    async fn get_feature(&self, fea_hash: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Insert-if-absent. Returns false when another writer got there first,
    /// in which case the caller re-reads and adopts the winner's ciphertext.
    async fn create_feature(&self, fea_hash: &[u8], dek_shared: &[u8]) -> Result<bool>;

    /// Insert a file record and return its fresh id.
    async fn create_file(&self, rec: NewFile<'_>) -> Result<Uuid>;

    async fn exists_chunk(&self, chunk_hash: &str) -> Result<bool>;

    /// Insert a chunk record. Common chunks tolerate duplicate hashes
    /// (another upload may have stored the same bytes concurrently); unique
    /// chunk inserts are plain, the fresh file id in the key makes their
    /// hashes collision-free in practice.
    async fn insert_chunk(&self, chunk_hash: &str, s3_key: &str, is_common: bool) -> Result<()>;

    async fn add_file_chunk(&self, file_id: Uuid, chunk_hash: &str, seq: i32) -> Result<()>;

    /// Composite read: the file row for `(file_id, owner_id)` plus its
    /// chunk rows ordered by sequence. An owner mismatch returns `None`,
    /// indistinguishable from an absent file.
    async fn get_file_meta(
        &self,
        owner_id: &str,
        file_id: Uuid,
    ) -> Result<Option<(file::Model, Vec<chunk::Model>)>>;
}

/// Postgres-backed metadata client.
pub struct Client {
    db: DatabaseConnection,
}

impl Client {
    /// Connect to Postgres and bootstrap the schema. Pool tuning stays
    /// modest: at most 10 connections, 5 kept warm, recycled after 30
    /// minutes.
    pub async fn connect(dsn: &str) -> Result<Self> {
        if dsn.is_empty() {
            return Err(ServiceError::Input("DSDE_POSTGRES_DSN must be set".into()));
        }

        let mut opts = ConnectOptions::new(dsn.to_string());
        opts.max_connections(10)
            .min_connections(5)
            .max_lifetime(Duration::from_secs(30 * 60));

        let db = Database::connect(opts).await?;
        create_tables(&db).await?;
        Ok(Self { db })
    }
}

/// Create all tables if they don't exist
async fn create_tables(db: &DatabaseConnection) -> std::result::Result<(), DbErr> {
    db.execute(Statement::from_string(
        db.get_database_backend(),
        r#"
        CREATE TABLE IF NOT EXISTS features (
            fea_hash BYTEA PRIMARY KEY,
            dek_shared BYTEA NOT NULL
        )
        "#
        .to_string(),
    ))
    .await?;

    db.execute(Statement::from_string(
        db.get_database_backend(),
        r#"
        CREATE TABLE IF NOT EXISTS files (
            file_id UUID PRIMARY KEY,
            owner_id TEXT NOT NULL,
            filename TEXT NOT NULL,
            fea_hash BYTEA NOT NULL,
            dek_shared BYTEA NOT NULL,
            dek_user BYTEA NOT NULL,
            pkg2_len BIGINT NOT NULL,
            FOREIGN KEY (fea_hash) REFERENCES features(fea_hash)
        )
        "#
        .to_string(),
    ))
    .await?;

    // Downloads read by (file_id, owner_id); the index covers the owner leg.
    db.execute(Statement::from_string(
        db.get_database_backend(),
        r#"CREATE INDEX IF NOT EXISTS idx_files_owner ON files(owner_id)"#.to_string(),
    ))
    .await?;

    db.execute(Statement::from_string(
        db.get_database_backend(),
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            chunk_hash TEXT PRIMARY KEY,
            s3_key TEXT NOT NULL,
            is_common BOOLEAN NOT NULL
        )
        "#
        .to_string(),
    ))
    .await?;

    db.execute(Statement::from_string(
        db.get_database_backend(),
        r#"
        CREATE TABLE IF NOT EXISTS file_chunks (
            file_id UUID NOT NULL,
            chunk_hash TEXT NOT NULL,
            seq INT NOT NULL,
            PRIMARY KEY (file_id, seq),
            FOREIGN KEY (file_id) REFERENCES files(file_id) ON DELETE CASCADE,
            FOREIGN KEY (chunk_hash) REFERENCES chunks(chunk_hash)
        )
        "#
        .to_string(),
    ))
    .await?;

    db.execute(Statement::from_string(
        db.get_database_backend(),
        r#"CREATE INDEX IF NOT EXISTS idx_file_chunks_chunk ON file_chunks(chunk_hash)"#
            .to_string(),
    ))
    .await?;

    tracing::info!("database tables initialized");
    Ok(())
}

#[async_trait]
impl MetadataStore for Client {
    async fn get_feature(&self, fea_hash: &[u8]) -> Result<Option<Vec<u8>>> {
        let row = feature::Entity::find_by_id(fea_hash.to_vec())
            .one(&self.db)
            .await?;
        Ok(row.map(|r| r.dek_shared))
    }

    async fn create_feature(&self, fea_hash: &[u8], dek_shared: &[u8]) -> Result<bool> {
        let row = feature::ActiveModel {
            fea_hash: Set(fea_hash.to_vec()),
            dek_shared: Set(dek_shared.to_vec()),
        };
        let res = feature::Entity::insert(row)
            .on_conflict(
                OnConflict::column(feature::Column::FeaHash)
                    .do_nothing()
                    .to_owned(),
            )
            .exec(&self.db)
            .await;
        match res {
            Ok(_) => Ok(true),
            Err(DbErr::RecordNotInserted) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_file(&self, rec: NewFile<'_>) -> Result<Uuid> {
        let file_id = Uuid::new_v4();
        let row = file::ActiveModel {
            file_id: Set(file_id),
            owner_id: Set(rec.owner_id.to_string()),
            filename: Set(rec.filename.to_string()),
            fea_hash: Set(rec.fea_hash.to_vec()),
            dek_shared: Set(rec.dek_shared.to_vec()),
            dek_user: Set(rec.dek_user.to_vec()),
            pkg2_len: Set(rec.pkg2_len),
        };
        row.insert(&self.db).await?;
        Ok(file_id)
    }

    async fn exists_chunk(&self, chunk_hash: &str) -> Result<bool> {
        let row = chunk::Entity::find_by_id(chunk_hash.to_string())
            .one(&self.db)
            .await?;
        Ok(row.is_some())
    }

    async fn insert_chunk(&self, chunk_hash: &str, s3_key: &str, is_common: bool) -> Result<()> {
        let row = chunk::ActiveModel {
            chunk_hash: Set(chunk_hash.to_string()),
            s3_key: Set(s3_key.to_string()),
            is_common: Set(is_common),
        };
        let insert = chunk::Entity::insert(row);
        if is_common {
            match insert
                .on_conflict(
                    OnConflict::column(chunk::Column::ChunkHash)
                        .do_nothing()
                        .to_owned(),
                )
                .exec(&self.db)
                .await
            {
                Ok(_) | Err(DbErr::RecordNotInserted) => Ok(()),
                Err(e) => Err(e.into()),
            }
        } else {
            insert.exec(&self.db).await?;
            Ok(())
        }
    }

    async fn add_file_chunk(&self, file_id: Uuid, chunk_hash: &str, seq: i32) -> Result<()> {
        let row = file_chunk::ActiveModel {
            file_id: Set(file_id),
            seq: Set(seq),
            chunk_hash: Set(chunk_hash.to_string()),
        };
        row.insert(&self.db).await?;
        Ok(())
    }

    async fn get_file_meta(
        &self,
        owner_id: &str,
        file_id: Uuid,
    ) -> Result<Option<(file::Model, Vec<chunk::Model>)>> {
        let Some(file_row) = file::Entity::find()
            .filter(file::Column::FileId.eq(file_id))
            .filter(file::Column::OwnerId.eq(owner_id))
            .one(&self.db)
            .await?
        else {
            return Ok(None);
        };

        let rows = file_chunk::Entity::find()
            .filter(file_chunk::Column::FileId.eq(file_id))
            .order_by_asc(file_chunk::Column::Seq)
            .find_also_related(chunk::Entity)
            .all(&self.db)
            .await?;

        let mut chunks = Vec::with_capacity(rows.len());
        for (link, chunk_row) in rows {
            let chunk_row = chunk_row.ok_or_else(|| {
                ServiceError::Integrity(format!(
                    "chunk {} missing for file {}",
                    link.chunk_hash, file_id
                ))
            })?;
            chunks.push(chunk_row);
        }

        Ok(Some((file_row, chunks)))
    }
}
