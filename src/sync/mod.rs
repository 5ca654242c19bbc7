//! DB/LDAP synchronisation cluster
//!
//! - `stats`: per-type and per-country counting on both sides, snapshot build
//! - `reconcile`: ordered LDAP addition batches with per-operation logging
//! - `revalidate`: expiry sweep over stored validation results
//! - `service`: glue invoked by the scheduler and the trigger endpoints

pub mod reconcile;
pub mod revalidate;
pub mod service;
pub mod stats;

pub use reconcile::{DirectoryWriter, LdapDirectoryWriter, ReconcileRun, ReconciliationEngine};
pub use revalidate::Revalidator;
pub use service::SyncService;
pub use stats::{build_sync_status, collect_db_stats, DbStats, LdapStats, LdapStatsCollector};
