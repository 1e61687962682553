use async_trait::async_trait;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, ConnectionTrait, DbErr};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "system_info")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub hostname: String,
    pub static_ip: Option<String>,
    pub nickname: Option<String>,
    pub physical_location: Option<String>,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub entry_created_ts: DateTimeUtc,
    pub entry_modified_ts: DateTimeUtc,
    pub entry_retired_ts: Option<DateTimeUtc>,
    pub record_creation_source: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::health_checks::Entity")]
    HealthChecks,
}

impl Related<super::health_checks::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::HealthChecks.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let now = chrono::Utc::now();

        if insert {
            if self.entry_created_ts.is_not_set() {
                self.entry_created_ts = Set(now);
            }
            if self.entry_modified_ts.is_not_set() {
                self.entry_modified_ts = Set(now);
            }
        } else {
            self.entry_modified_ts = Set(now);
        }

        Ok(self)
    }
}
