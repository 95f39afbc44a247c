use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "channel_enrichment")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub channel_key: String,
    pub channel_name: Option<String>,
    pub status: String,
    pub classification: Json,
    pub schema_version: i32,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
