use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

// (parent_id, port, address_suffix) is unique.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "check_server")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub parent_id: i32,
    pub port: i32,
    pub address_suffix: String,
    pub status_condition_type: String,
    pub status_condition_value: Json,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::systems::Entity",
        from = "Column::ParentId",
        to = "super::systems::Column::Id",
        on_delete = "Cascade"
    )]
    System,
}

impl Related<super::systems::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::System.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
