//! File entity: one row per upload, carrying everything the download path
//! needs besides the blobs themselves.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "files")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub file_id: Uuid,
    pub owner_id: String,
    pub filename: String,
    pub fea_hash: Vec<u8>,
    pub dek_shared: Vec<u8>,
    pub dek_user: Vec<u8>,
    // Length of the first split's second package. Without it the download
    // path cannot divide the decrypted combined blob.
    pub pkg2_len: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::feature::Entity",
        from = "Column::FeaHash",
        to = "super::feature::Column::FeaHash"
    )]
    Feature,
}

impl Related<super::feature::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Feature.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
