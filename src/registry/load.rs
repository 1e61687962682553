use super::{
    CheckInsert, HealthCondition, NewHealthCheck, NewSystem, RegistryError, RegistryStore,
    SystemInsert,
};
use crate::config::SystemConfig;
use tracing::info;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub systems_created: usize,
    pub systems_existing: usize,
    pub checks_added: usize,
    pub checks_duplicate: usize,
}

impl From<&SystemConfig> for NewSystem {
    fn from(cfg: &SystemConfig) -> Self {
        Self {
            hostname: cfg.hostname.clone(),
            static_ip: cfg.static_ip.clone(),
            nickname: cfg.nickname.clone(),
            physical_location: cfg.physical_location.clone(),
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            record_creation_source: Some(cfg.record_creation_source.clone()),
        }
    }
}

impl RegistryStore {
    pub async fn load(&self, systems: &[SystemConfig]) -> Result<LoadSummary, RegistryError> {
        let mut summary = LoadSummary::default();

        for cfg in systems {
            let inserted = self.insert_system(&NewSystem::from(cfg)).await?;
            match &inserted {
                SystemInsert::Created(_) => summary.systems_created += 1,
                SystemInsert::Existing(_) => summary.systems_existing += 1,
            }
            let system_id = inserted.system().id;

            for check in &cfg.health_checks {
                let new_check = NewHealthCheck {
                    port: check.port,
                    path_suffix: check.path.clone(),
                    condition: HealthCondition::StatusCode(check.expected_status),
                };
                match self.add_health_check(system_id, &new_check).await? {
                    CheckInsert::Inserted(_) => summary.checks_added += 1,
                    CheckInsert::Duplicate => summary.checks_duplicate += 1,
                }
            }
        }

        info!(
            systems_created = summary.systems_created,
            systems_existing = summary.systems_existing,
            checks_added = summary.checks_added,
            checks_duplicate = summary.checks_duplicate,
            "registry load finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DriveCheckPolicy, HealthCheckConfig};
    use crate::registry::tests::memory_store;

    fn system_cfg(hostname: &str, checks: Vec<HealthCheckConfig>) -> SystemConfig {
        SystemConfig {
            hostname: hostname.to_string(),
            static_ip: None,
            nickname: None,
            physical_location: None,
            username: "operator".to_string(),
            password: "secret".to_string(),
            record_creation_source: "config".to_string(),
            drive_check: DriveCheckPolicy::default(),
            health_checks: checks,
            collect_files: vec![],
        }
    }

    fn check(port: u16, path: &str) -> HealthCheckConfig {
        HealthCheckConfig {
            port,
            path: path.to_string(),
            expected_status: 200,
        }
    }

    #[tokio::test]
    async fn loading_twice_is_idempotent() {
        let store = memory_store().await;
        let systems = vec![
            system_cfg("hmi-1", vec![check(5000, "status"), check(5001, "")]),
            system_cfg("hmi-2", vec![]),
        ];

        let first = store.load(&systems).await.unwrap();
        assert_eq!(
            first,
            LoadSummary {
                systems_created: 2,
                systems_existing: 0,
                checks_added: 2,
                checks_duplicate: 0,
            }
        );

        let second = store.load(&systems).await.unwrap();
        assert_eq!(
            second,
            LoadSummary {
                systems_created: 0,
                systems_existing: 2,
                checks_added: 0,
                checks_duplicate: 2,
            }
        );

        let hmi = &store.systems().await.unwrap()[0];
        assert_eq!(hmi.record_creation_source.as_deref(), Some("config"));
        assert_eq!(store.health_checks(hmi.id).await.unwrap().len(), 2);
    }
}
