//! Process-wide configuration
//!
//! Settings load from the environment at startup; once the database is
//! reachable, the single `sync_config` row overrides the mutable scheduling
//! fields. Readers take snapshot copies, the admin update path holds the
//! exclusive lock and restarts the scheduler afterwards.

use std::env;
use std::sync::{PoisonError, RwLock};

use log::info;

use crate::store::db::SyncConfigRow;
use crate::store::{Database, DbSettings};
use crate::trust::LdapSettings;
use crate::utils::PkdError;

#[derive(Debug, Clone)]
pub struct Settings {
    pub daily_sync_enabled: bool,
    pub daily_sync_hour: u8,
    pub daily_sync_minute: u8,
    pub auto_reconcile: bool,
    pub revalidate_certs_on_sync: bool,
    pub max_reconcile_batch_size: usize,
    pub ldap_read: LdapSettings,
    pub ldap_write: LdapSettings,
    pub db: DbSettings,
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T, PkdError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| PkdError::Config(format!("{} has an unparseable value '{}'", name, value))),
        Err(_) => Ok(default),
    }
}

impl Settings {
    /// Load from `PKD_*` environment variables with development defaults.
    pub fn from_env() -> Result<Settings, PkdError> {
        let bind_dn = env_or("PKD_LDAP_BIND_DN", "cn=admin,dc=pkd,dc=local");
        let bind_password = env_or("PKD_LDAP_BIND_PASSWORD", "");
        let base_dn = env_or("PKD_LDAP_BASE_DN", "dc=pkd,dc=local");

        let settings = Settings {
            daily_sync_enabled: env_parse("PKD_DAILY_SYNC_ENABLED", true)?,
            daily_sync_hour: env_parse("PKD_DAILY_SYNC_HOUR", 2u8)?,
            daily_sync_minute: env_parse("PKD_DAILY_SYNC_MINUTE", 0u8)?,
            auto_reconcile: env_parse("PKD_AUTO_RECONCILE", false)?,
            revalidate_certs_on_sync: env_parse("PKD_REVALIDATE_ON_SYNC", true)?,
            max_reconcile_batch_size: env_parse("PKD_MAX_RECONCILE_BATCH", 500usize)?,
            ldap_read: LdapSettings {
                host: env_or("PKD_LDAP_READ_HOST", "localhost"),
                port: env_parse("PKD_LDAP_READ_PORT", 389u16)?,
                bind_dn: bind_dn.clone(),
                bind_password: bind_password.clone(),
                base_dn: base_dn.clone(),
            },
            ldap_write: LdapSettings {
                host: env_or("PKD_LDAP_WRITE_HOST", "localhost"),
                port: env_parse("PKD_LDAP_WRITE_PORT", 389u16)?,
                bind_dn,
                bind_password,
                base_dn,
            },
            db: DbSettings {
                host: env_or("PKD_DB_HOST", "localhost"),
                port: env_parse("PKD_DB_PORT", 5432u16)?,
                name: env_or("PKD_DB_NAME", "pkd"),
                user: env_or("PKD_DB_USER", "pkd"),
                password: env_or("PKD_DB_PASSWORD", ""),
            },
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), PkdError> {
        if self.daily_sync_hour >= 24 {
            return Err(PkdError::Config(format!(
                "daily sync hour {} out of range 0..24",
                self.daily_sync_hour
            )));
        }
        if self.daily_sync_minute >= 60 {
            return Err(PkdError::Config(format!(
                "daily sync minute {} out of range 0..60",
                self.daily_sync_minute
            )));
        }
        if self.max_reconcile_batch_size == 0 {
            return Err(PkdError::Config(
                "reconcile batch size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Overlay the mutable fields from the persisted configuration row.
    pub fn apply_row(&mut self, row: &SyncConfigRow) {
        self.daily_sync_enabled = row.daily_sync_enabled;
        self.daily_sync_hour = row.daily_sync_hour;
        self.daily_sync_minute = row.daily_sync_minute;
        self.auto_reconcile = row.auto_reconcile;
        self.revalidate_certs_on_sync = row.revalidate_certs_on_sync;
        self.max_reconcile_batch_size = row.max_reconcile_batch_size;
    }

    pub fn to_row(&self) -> SyncConfigRow {
        SyncConfigRow {
            daily_sync_enabled: self.daily_sync_enabled,
            daily_sync_hour: self.daily_sync_hour,
            daily_sync_minute: self.daily_sync_minute,
            auto_reconcile: self.auto_reconcile,
            revalidate_certs_on_sync: self.revalidate_certs_on_sync,
            max_reconcile_batch_size: self.max_reconcile_batch_size,
        }
    }
}

/// Process-lifetime configuration holder.
pub struct ConfigStore {
    inner: RwLock<Settings>,
}

impl ConfigStore {
    pub fn new(settings: Settings) -> ConfigStore {
        ConfigStore {
            inner: RwLock::new(settings),
        }
    }

    /// Cheap snapshot copy for readers.
    pub fn snapshot(&self) -> Settings {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Pull the `sync_config` row and overlay it. Returns whether a row was
    /// present.
    pub fn load_db_overrides(&self, database: &mut Database) -> Result<bool, PkdError> {
        match database.load_sync_config_row()? {
            Some(row) => {
                let mut settings = self.inner.write().unwrap_or_else(PoisonError::into_inner);
                settings.apply_row(&row);
                settings.validate()?;
                info!("configuration overridden from sync_config row");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Validated admin update: persists the row, then swaps the in-memory
    /// settings. The caller restarts the scheduler with the new snapshot.
    pub fn update(&self, row: SyncConfigRow, database: &mut Database) -> Result<Settings, PkdError> {
        let mut settings = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let mut updated = settings.clone();
        updated.apply_row(&row);
        updated.validate()?;
        database.save_sync_config_row(&row)?;
        *settings = updated.clone();
        info!(
            "configuration updated: daily sync {} at {:02}:{:02}",
            if updated.daily_sync_enabled { "on" } else { "off" },
            updated.daily_sync_hour,
            updated.daily_sync_minute
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_settings() -> Settings {
        Settings {
            daily_sync_enabled: true,
            daily_sync_hour: 2,
            daily_sync_minute: 0,
            auto_reconcile: false,
            revalidate_certs_on_sync: true,
            max_reconcile_batch_size: 500,
            ldap_read: LdapSettings {
                host: "localhost".to_string(),
                port: 389,
                bind_dn: "cn=admin".to_string(),
                bind_password: String::new(),
                base_dn: "dc=pkd,dc=local".to_string(),
            },
            ldap_write: LdapSettings {
                host: "localhost".to_string(),
                port: 389,
                bind_dn: "cn=admin".to_string(),
                bind_password: String::new(),
                base_dn: "dc=pkd,dc=local".to_string(),
            },
            db: DbSettings {
                host: "localhost".to_string(),
                port: 5432,
                name: "pkd".to_string(),
                user: "pkd".to_string(),
                password: String::new(),
            },
        }
    }

    #[test]
    fn test_validation_bounds() {
        let mut settings = base_settings();
        assert!(settings.validate().is_ok());

        settings.daily_sync_hour = 24;
        assert!(settings.validate().is_err());

        settings.daily_sync_hour = 23;
        settings.daily_sync_minute = 60;
        assert!(settings.validate().is_err());

        settings.daily_sync_minute = 59;
        settings.max_reconcile_batch_size = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_row_round_trip() {
        let mut settings = base_settings();
        let row = SyncConfigRow {
            daily_sync_enabled: false,
            daily_sync_hour: 4,
            daily_sync_minute: 30,
            auto_reconcile: true,
            revalidate_certs_on_sync: false,
            max_reconcile_batch_size: 100,
        };
        settings.apply_row(&row);
        assert_eq!(settings.to_row(), row);
        assert_eq!(settings.daily_sync_hour, 4);
        assert!(settings.auto_reconcile);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let store = ConfigStore::new(base_settings());
        let snapshot = store.snapshot();
        assert_eq!(snapshot.daily_sync_hour, 2);
        assert_eq!(snapshot.max_reconcile_batch_size, 500);
    }
}
