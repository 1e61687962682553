pub mod entities;
mod load;
pub mod migration;

pub use load::LoadSummary;

use crate::crypto::{CredentialCipher, CryptoError};
use chrono::{DateTime, Utc};
use entities::{health_checks, systems};
use migration::{Migrator, MigratorTrait};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectOptions, Database,
    DatabaseConnection, DbErr, EntityTrait, IntoActiveModel, QueryFilter, QueryOrder, SqlErr,
    TransactionTrait,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

pub const STATUS_CODE_CONDITION: &str = "status_code";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("database error: {0}")]
    Db(#[from] DbErr),
    #[error("credential encryption error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("system {0} not found")]
    NotFound(i32),
    #[error("health check {id} has an invalid port {port}")]
    InvalidPort { id: i32, port: i32 },
}

#[derive(Clone)]
pub struct NewSystem {
    pub hostname: String,
    pub static_ip: Option<String>,
    pub nickname: Option<String>,
    pub physical_location: Option<String>,
    pub username: String,
    pub password: String,
    pub record_creation_source: Option<String>,
}

#[derive(Clone, Serialize)]
pub struct RegisteredSystem {
    pub id: i32,
    pub hostname: String,
    pub static_ip: Option<String>,
    pub nickname: Option<String>,
    pub physical_location: Option<String>,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub entry_created_ts: DateTime<Utc>,
    pub entry_modified_ts: DateTime<Utc>,
    pub entry_retired_ts: Option<DateTime<Utc>>,
    pub record_creation_source: Option<String>,
}

impl std::fmt::Debug for RegisteredSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredSystem")
            .field("id", &self.id)
            .field("hostname", &self.hostname)
            .field("static_ip", &self.static_ip)
            .field("nickname", &self.nickname)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("entry_retired_ts", &self.entry_retired_ts)
            .finish_non_exhaustive()
    }
}

impl RegisteredSystem {
    pub fn address(&self) -> &str {
        match self.static_ip.as_deref() {
            Some(ip) if !ip.trim().is_empty() => ip,
            _ => &self.hostname,
        }
    }

    pub fn display_name(&self) -> &str {
        self.nickname.as_deref().unwrap_or(&self.hostname)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum HealthCondition {
    StatusCode(u16),
    Other { kind: String },
}

impl HealthCondition {
    fn kind(&self) -> &str {
        match self {
            HealthCondition::StatusCode(_) => STATUS_CODE_CONDITION,
            HealthCondition::Other { kind } => kind,
        }
    }

    fn value(&self) -> serde_json::Value {
        match self {
            HealthCondition::StatusCode(code) => serde_json::Value::from(*code),
            HealthCondition::Other { .. } => serde_json::Value::Null,
        }
    }

    fn decode(kind: &str, value: &serde_json::Value) -> Self {
        if kind == STATUS_CODE_CONDITION {
            if let Some(code) = value.as_u64().and_then(|v| u16::try_from(v).ok()) {
                return HealthCondition::StatusCode(code);
            }
        }
        HealthCondition::Other {
            kind: kind.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHealthCheck {
    pub port: u16,
    pub path_suffix: String,
    pub condition: HealthCondition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheckDefinition {
    pub id: i32,
    pub system_id: i32,
    pub port: u16,
    pub path_suffix: String,
    pub condition: HealthCondition,
}

#[derive(Debug)]
pub enum SystemInsert {
    Created(RegisteredSystem),
    Existing(RegisteredSystem),
}

impl SystemInsert {
    pub fn system(&self) -> &RegisteredSystem {
        match self {
            SystemInsert::Created(s) | SystemInsert::Existing(s) => s,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum CheckInsert {
    Inserted(HealthCheckDefinition),
    Duplicate,
}

#[derive(Clone)]
pub struct RegistryStore {
    db: DatabaseConnection,
    cipher: CredentialCipher,
}

impl RegistryStore {
    pub async fn connect(database_url: &str, cipher: CredentialCipher) -> Result<Self, RegistryError> {
        let mut opts = ConnectOptions::new(database_url.to_owned());
        opts.sqlx_logging(false);
        // Every pooled connection to an in-memory SQLite database would see its own empty database.
        if database_url.contains(":memory:") {
            opts.max_connections(1);
        }
        let db = Database::connect(opts).await?;
        Ok(Self { db, cipher })
    }

    pub async fn migrate(&self) -> Result<(), RegistryError> {
        Migrator::up(&self.db, None).await?;
        Ok(())
    }

    pub async fn reset(&self) -> Result<(), RegistryError> {
        Migrator::fresh(&self.db).await?;
        Ok(())
    }

    pub async fn insert_system(&self, new: &NewSystem) -> Result<SystemInsert, RegistryError> {
        let txn = self.db.begin().await?;

        let existing = systems::Entity::find()
            .filter(systems::Column::Hostname.eq(new.hostname.as_str()))
            .order_by_asc(systems::Column::Id)
            .one(&txn)
            .await?;
        if let Some(model) = existing {
            txn.commit().await?;
            warn!(hostname = %new.hostname, "system may already exist");
            return Ok(SystemInsert::Existing(self.decode_system(model)?));
        }

        let active = systems::ActiveModel {
            hostname: Set(new.hostname.clone()),
            static_ip: Set(new.static_ip.clone()),
            nickname: Set(new.nickname.clone()),
            physical_location: Set(new.physical_location.clone()),
            username: Set(new.username.clone()),
            password: Set(self.cipher.encrypt_string(&new.password)?),
            record_creation_source: Set(new.record_creation_source.clone()),
            ..Default::default()
        };
        let model = active.insert(&txn).await?;
        txn.commit().await?;

        debug!(id = model.id, hostname = %model.hostname, "system registered");
        Ok(SystemInsert::Created(self.decode_system(model)?))
    }

    // A duplicate (system, port, suffix) is rolled back and reported, not raised.
    pub async fn add_health_check(
        &self,
        system_id: i32,
        check: &NewHealthCheck,
    ) -> Result<CheckInsert, RegistryError> {
        let txn = self.db.begin().await?;

        let active = health_checks::ActiveModel {
            parent_id: Set(system_id),
            port: Set(i32::from(check.port)),
            address_suffix: Set(check.path_suffix.clone()),
            status_condition_type: Set(check.condition.kind().to_string()),
            status_condition_value: Set(check.condition.value()),
            ..Default::default()
        };

        match active.insert(&txn).await {
            Ok(model) => {
                txn.commit().await?;
                Ok(CheckInsert::Inserted(decode_check(model)?))
            }
            Err(err) if is_unique_violation(&err) => {
                txn.rollback().await?;
                warn!(
                    system_id,
                    port = check.port,
                    suffix = %check.path_suffix,
                    "health check may already exist"
                );
                Ok(CheckInsert::Duplicate)
            }
            Err(err) => {
                txn.rollback().await?;
                Err(err.into())
            }
        }
    }

    pub async fn systems(&self) -> Result<Vec<RegisteredSystem>, RegistryError> {
        let models = systems::Entity::find()
            .order_by_asc(systems::Column::Id)
            .all(&self.db)
            .await?;
        models.into_iter().map(|m| self.decode_system(m)).collect()
    }

    pub async fn active_systems(&self) -> Result<Vec<RegisteredSystem>, RegistryError> {
        let models = systems::Entity::find()
            .filter(systems::Column::EntryRetiredTs.is_null())
            .order_by_asc(systems::Column::Id)
            .all(&self.db)
            .await?;
        models.into_iter().map(|m| self.decode_system(m)).collect()
    }

    pub async fn find_system(&self, id: i32) -> Result<Option<RegisteredSystem>, RegistryError> {
        systems::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .map(|m| self.decode_system(m))
            .transpose()
    }

    pub async fn health_checks(
        &self,
        system_id: i32,
    ) -> Result<Vec<HealthCheckDefinition>, RegistryError> {
        health_checks::Entity::find()
            .filter(health_checks::Column::ParentId.eq(system_id))
            .order_by_asc(health_checks::Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(decode_check)
            .collect()
    }

    pub async fn retire_system(&self, id: i32) -> Result<(), RegistryError> {
        let txn = self.db.begin().await?;
        let model = systems::Entity::find_by_id(id)
            .one(&txn)
            .await?
            .ok_or(RegistryError::NotFound(id))?;

        let mut active = model.into_active_model();
        active.entry_retired_ts = Set(Some(Utc::now()));
        active.update(&txn).await?;
        txn.commit().await?;
        Ok(())
    }

    pub async fn delete_system(&self, id: i32) -> Result<(), RegistryError> {
        let result = systems::Entity::delete_by_id(id).exec(&self.db).await?;
        if result.rows_affected == 0 {
            return Err(RegistryError::NotFound(id));
        }
        Ok(())
    }

    fn decode_system(&self, model: systems::Model) -> Result<RegisteredSystem, RegistryError> {
        let password = self.cipher.decrypt_string(&model.password)?;
        Ok(RegisteredSystem {
            id: model.id,
            hostname: model.hostname,
            static_ip: model.static_ip,
            nickname: model.nickname,
            physical_location: model.physical_location,
            username: model.username,
            password,
            entry_created_ts: model.entry_created_ts,
            entry_modified_ts: model.entry_modified_ts,
            entry_retired_ts: model.entry_retired_ts,
            record_creation_source: model.record_creation_source,
        })
    }
}

fn decode_check(model: health_checks::Model) -> Result<HealthCheckDefinition, RegistryError> {
    let port = u16::try_from(model.port).map_err(|_| RegistryError::InvalidPort {
        id: model.id,
        port: model.port,
    })?;
    Ok(HealthCheckDefinition {
        id: model.id,
        system_id: model.parent_id,
        port,
        path_suffix: model.address_suffix,
        condition: HealthCondition::decode(
            &model.status_condition_type,
            &model.status_condition_value,
        ),
    })
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const TEST_KEY: &str = "12345678901234567890123456789012";

    pub(crate) async fn memory_store() -> RegistryStore {
        let cipher = CredentialCipher::new(TEST_KEY).unwrap();
        let store = RegistryStore::connect("sqlite::memory:", cipher)
            .await
            .expect("in-memory sqlite");
        store.migrate().await.expect("migrations");
        store
    }

    pub(crate) fn new_system(hostname: &str) -> NewSystem {
        NewSystem {
            hostname: hostname.to_string(),
            static_ip: None,
            nickname: Some(format!("{hostname} nick")),
            physical_location: Some("bay 3".to_string()),
            username: "operator".to_string(),
            password: "hunter2".to_string(),
            record_creation_source: Some("test".to_string()),
        }
    }

    fn status_check(port: u16, suffix: &str, code: u16) -> NewHealthCheck {
        NewHealthCheck {
            port,
            path_suffix: suffix.to_string(),
            condition: HealthCondition::StatusCode(code),
        }
    }

    #[test]
    fn static_ip_takes_precedence() {
        let mut system = RegisteredSystem {
            id: 1,
            hostname: "line1-hmi".to_string(),
            static_ip: Some("10.0.0.21".to_string()),
            nickname: None,
            physical_location: None,
            username: "u".to_string(),
            password: "p".to_string(),
            entry_created_ts: Utc::now(),
            entry_modified_ts: Utc::now(),
            entry_retired_ts: None,
            record_creation_source: None,
        };
        assert_eq!(system.address(), "10.0.0.21");
        system.static_ip = None;
        assert_eq!(system.address(), "line1-hmi");
        assert_eq!(system.display_name(), "line1-hmi");
        assert!(!format!("{system:?}").contains("\"p\""));
    }

    #[tokio::test]
    async fn password_is_encrypted_at_rest() {
        let store = memory_store().await;
        let created = store.insert_system(&new_system("hmi-1")).await.unwrap();
        let id = created.system().id;

        let raw = systems::Entity::find_by_id(id)
            .one(&store.db)
            .await
            .unwrap()
            .unwrap();
        assert_ne!(raw.password, "hunter2");

        let decoded = store.find_system(id).await.unwrap().unwrap();
        assert_eq!(decoded.password, "hunter2");
    }

    #[tokio::test]
    async fn duplicate_hostname_returns_existing_row() {
        let store = memory_store().await;
        let first = store.insert_system(&new_system("hmi-1")).await.unwrap();
        let second = store.insert_system(&new_system("hmi-1")).await.unwrap();

        assert!(matches!(first, SystemInsert::Created(_)));
        assert!(matches!(second, SystemInsert::Existing(_)));
        assert_eq!(first.system().id, second.system().id);
        assert_eq!(store.systems().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_health_check_is_rolled_back() {
        let store = memory_store().await;
        let system_id = store
            .insert_system(&new_system("hmi-1"))
            .await
            .unwrap()
            .system()
            .id;

        let check = status_check(5000, "status", 200);
        let first = store.add_health_check(system_id, &check).await.unwrap();
        let second = store.add_health_check(system_id, &check).await.unwrap();

        assert!(matches!(first, CheckInsert::Inserted(_)));
        assert_eq!(second, CheckInsert::Duplicate);

        let checks = store.health_checks(system_id).await.unwrap();
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].condition, HealthCondition::StatusCode(200));
    }

    #[tokio::test]
    async fn health_checks_keep_insertion_order() {
        let store = memory_store().await;
        let system_id = store
            .insert_system(&new_system("hmi-1"))
            .await
            .unwrap()
            .system()
            .id;

        store
            .add_health_check(system_id, &status_check(8080, "b", 200))
            .await
            .unwrap();
        store
            .add_health_check(system_id, &status_check(5000, "a", 204))
            .await
            .unwrap();

        let ports: Vec<u16> = store
            .health_checks(system_id)
            .await
            .unwrap()
            .iter()
            .map(|c| c.port)
            .collect();
        assert_eq!(ports, vec![8080, 5000]);
    }

    #[tokio::test]
    async fn deleting_a_system_cascades_to_checks() {
        let store = memory_store().await;
        let system_id = store
            .insert_system(&new_system("hmi-1"))
            .await
            .unwrap()
            .system()
            .id;
        store
            .add_health_check(system_id, &status_check(5000, "status", 200))
            .await
            .unwrap();

        store.delete_system(system_id).await.unwrap();

        assert!(store.find_system(system_id).await.unwrap().is_none());
        assert!(store.health_checks(system_id).await.unwrap().is_empty());
        assert!(matches!(
            store.delete_system(system_id).await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn retired_systems_are_not_active() {
        let store = memory_store().await;
        let keep = store.insert_system(&new_system("keep")).await.unwrap();
        let retire = store.insert_system(&new_system("retire")).await.unwrap();

        store.retire_system(retire.system().id).await.unwrap();

        let active = store.active_systems().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, keep.system().id);
        assert_eq!(store.systems().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn reset_clears_the_registry() {
        let store = memory_store().await;
        store.insert_system(&new_system("hmi-1")).await.unwrap();
        store.reset().await.unwrap();
        assert!(store.systems().await.unwrap().is_empty());
    }

    #[test]
    fn unknown_condition_kind_is_preserved() {
        let condition = HealthCondition::decode("body_contains", &serde_json::json!("ok"));
        assert_eq!(
            condition,
            HealthCondition::Other {
                kind: "body_contains".to_string()
            }
        );
        assert_eq!(
            HealthCondition::decode(STATUS_CODE_CONDITION, &serde_json::json!(404)),
            HealthCondition::StatusCode(404)
        );
    }
}
