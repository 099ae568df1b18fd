//! Feature entity: one row per distinct file feature, holding the wrapped
//! shared DEK. Rows are written once by the first uploader of a feature and
//! never change afterwards.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "features")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub fea_hash: Vec<u8>, // 32-byte FG digest
    pub dek_shared: Vec<u8>, // KMS-wrapped shared DEK
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
