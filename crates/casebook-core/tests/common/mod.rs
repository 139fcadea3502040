//! Shared fixture for the casebook-core integration tests.

#![allow(dead_code)]

use casebook_core::{AuditContext, Catalog, CoreConfig, Database, NewRecord, Record, Transaction};
use casebook_rbac::EntityKind;

/// Test fixture holding a fresh database and the standard catalog.
pub struct TestFixture {
    pub db: Database,
    pub catalog: Catalog,
}

impl TestFixture {
    /// Fixture with the default configuration.
    pub fn new() -> Self {
        Self::with_config(CoreConfig::default())
    }

    pub fn with_config(config: CoreConfig) -> Self {
        let catalog = Catalog::standard(config).expect("default config is valid");
        Self {
            db: Database::new(),
            catalog,
        }
    }

    pub async fn begin(&self) -> Transaction {
        self.db.begin().await
    }

    /// Create one record per subject and commit.
    pub async fn seed(&self, kind: EntityKind, subjects: &[&str]) -> Vec<Record> {
        let repo = self.catalog.repo(kind).unwrap();
        let mut tx = self.begin().await;
        let mut audit = AuditContext::new("seeder");
        let mut records = Vec::new();
        for subject in subjects {
            let record = repo
                .create(
                    &mut tx,
                    NewRecord::new().field("subject", *subject),
                    Some(&mut audit),
                )
                .unwrap();
            records.push(record);
        }
        audit.flush(&mut tx);
        tx.commit().await.unwrap();
        records
    }
}
