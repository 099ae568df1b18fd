//! Chunk entity: maps a blob hash to its object-store key. Common chunks
//! are shared across files; unique chunks belong to exactly one file.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "chunks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub chunk_hash: String, // 64-char hex SHA-256
    pub s3_key: String,
    pub is_common: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
