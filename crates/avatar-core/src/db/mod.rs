// ============================================================================
// ClientDb - Embedded Database (redb)
// ============================================================================
// Persistent local storage for the wallet credential record.
// Default path: ~/.avatar-stream/client.redb (override via AVATAR_DB_PATH)
// ============================================================================

use anyhow::{anyhow, Result};
use redb::{Database, TableDefinition};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::auth::{CredentialStore, StoredCredential, CREDENTIAL_RECORD};

const CREDENTIALS: TableDefinition<&str, &[u8]> = TableDefinition::new("credentials");

/// Embedded database for the avatar client
pub struct ClientDb {
    db: Database,
    path: PathBuf,
}

impl ClientDb {
    /// Open (or create) the database at the given path.
    /// If `path` is None, uses AVATAR_DB_PATH env var or ~/.avatar-stream/client.redb
    pub fn open(path: Option<&str>) -> Result<Self> {
        let db_path = if let Some(p) = path {
            PathBuf::from(p)
        } else if let Ok(env_path) = std::env::var("AVATAR_DB_PATH") {
            PathBuf::from(env_path)
        } else {
            let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
            let dir = home.join(".avatar-stream");
            std::fs::create_dir_all(&dir)
                .map_err(|e| anyhow!("Failed to create .avatar-stream directory: {}", e))?;
            dir.join("client.redb")
        };

        info!("Opening database at: {}", db_path.display());

        let db = Database::create(&db_path)
            .map_err(|e| anyhow!("Failed to open database: {}", e))?;

        let write_txn = db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let _ = write_txn
                .open_table(CREDENTIALS)
                .map_err(|e| anyhow!("Failed to create credentials table: {}", e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit init: {}", e))?;

        Ok(Self { db, path: db_path })
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for ClientDb {
    fn load(&self) -> Result<Option<StoredCredential>> {
        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(CREDENTIALS)
            .map_err(|e| anyhow!("Failed to open credentials table: {}", e))?;

        match table.get(CREDENTIAL_RECORD).map_err(|e| anyhow!("Failed to get credential: {}", e))? {
            Some(value) => {
                let credential: StoredCredential = bincode::deserialize(value.value())
                    .map_err(|e| anyhow!("Failed to deserialize credential: {}", e))?;
                Ok(Some(credential))
            }
            None => Ok(None),
        }
    }

    fn save(&self, credential: &StoredCredential) -> Result<()> {
        let value = bincode::serialize(credential)
            .map_err(|e| anyhow!("Failed to serialize credential: {}", e))?;

        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let mut table = write_txn.open_table(CREDENTIALS)
                .map_err(|e| anyhow!("Failed to open credentials table: {}", e))?;
            table.insert(CREDENTIAL_RECORD, value.as_slice())
                .map_err(|e| anyhow!("Failed to insert credential: {}", e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit: {}", e))?;

        debug!("Stored credential for wallet {}", credential.wallet_address);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        let removed;
        {
            let mut table = write_txn.open_table(CREDENTIALS)
                .map_err(|e| anyhow!("Failed to open credentials table: {}", e))?;
            removed = table.remove(CREDENTIAL_RECORD)
                .map_err(|e| anyhow!("Failed to remove credential: {}", e))?
                .is_some();
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit delete: {}", e))?;

        if removed {
            debug!("Cleared stored credential");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> (tempfile::TempDir, ClientDb) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.redb");
        let db = ClientDb::open(Some(path.to_str().unwrap())).unwrap();
        (dir, db)
    }

    #[test]
    fn test_empty_database_has_no_credential() {
        let (_dir, db) = temp_db();
        assert!(db.load().unwrap().is_none());
    }

    #[test]
    fn test_save_load_clear() {
        let (_dir, db) = temp_db();
        let cred = StoredCredential::new("abc", "WalletA");

        db.save(&cred).unwrap();
        assert_eq!(db.load().unwrap(), Some(cred));

        db.clear().unwrap();
        assert!(db.load().unwrap().is_none());
        // Clearing twice is harmless
        db.clear().unwrap();
    }

    #[test]
    fn test_credential_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.redb");
        let path = path.to_str().unwrap();

        {
            let db = ClientDb::open(Some(path)).unwrap();
            db.save(&StoredCredential::new("abc", "WalletA")).unwrap();
        }

        let db = ClientDb::open(Some(path)).unwrap();
        assert_eq!(db.load_for("WalletA").unwrap().unwrap().token, "abc");
    }
}
