use anyhow::Result;
use farm_types::{
    AccountId, AssetBook, EmissionState, FarmMeta, FarmSnapshot, Pool, PoolId, UserStake,
    ACCOUNT_BYTES,
};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError, Transactional};
use sled::{Db, Tree};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Layout version written on first commit.
pub const SCHEMA_VERSION: u32 = 1;

const KEY_EMISSION_STATE: &[u8] = b"emission_state";
const KEY_FARM_META: &[u8] = b"farm_meta";
const KEY_ASSET_BOOK: &[u8] = b"asset_book";
const KEY_SCHEMA_VERSION: &[u8] = b"schema_version";

/// Storage errors
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Corrupt key in {tree}: {key}")]
    CorruptKey { tree: &'static str, key: String },
    #[error("Farm state is not initialized")]
    NotInitialized,
    #[error("Unsupported schema version {found}, expected {expected}")]
    SchemaMismatch { found: u32, expected: u32 },
}

pub fn pool_key(id: PoolId) -> [u8; 4] {
    id.to_be_bytes()
}

/// Pool id (big endian) followed by the account bytes, so one pool's stakes
/// are contiguous.
pub fn stake_key(pool: PoolId, user: &AccountId) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + ACCOUNT_BYTES);
    key.extend_from_slice(&pool.to_be_bytes());
    key.extend_from_slice(user.as_bytes());
    key
}

fn check_pool_key(key: &[u8]) -> Result<(), StorageError> {
    if key.len() != 4 {
        return Err(StorageError::CorruptKey {
            tree: "pools",
            key: hex::encode(key),
        });
    }
    Ok(())
}

fn check_stake_key(key: &[u8]) -> Result<(), StorageError> {
    if key.len() != 4 + ACCOUNT_BYTES {
        return Err(StorageError::CorruptKey {
            tree: "stakes",
            key: hex::encode(key),
        });
    }
    Ok(())
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    Ok(serde_json::from_slice(bytes)?)
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    Ok(serde_json::to_vec(value)?)
}

/// Abstract storage trait
pub trait Storage {
    /// Whether a farm has ever been committed.
    fn is_initialized(&self) -> Result<bool>;

    /// Persist the whole ledger and asset book atomically.
    fn commit(&self, snapshot: &FarmSnapshot, book: &AssetBook) -> Result<()>;

    fn load_snapshot(&self) -> Result<Option<FarmSnapshot>>;
    fn load_asset_book(&self) -> Result<AssetBook>;

    fn get_pool(&self, id: PoolId) -> Result<Option<Pool>>;
    fn get_stake(&self, pool: PoolId, user: &AccountId) -> Result<Option<UserStake>>;
    fn get_emission_state(&self) -> Result<Option<EmissionState>>;
    fn get_farm_meta(&self) -> Result<Option<FarmMeta>>;

    fn flush(&self) -> Result<()>;
}

/// Sled-backed implementation
pub struct SledStorage {
    db: Db,
    pools: Tree,
    stakes: Tree,
    metadata: Tree,
}

impl SledStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        let pools = db.open_tree("pools")?;
        let stakes = db.open_tree("stakes")?;
        let metadata = db.open_tree("metadata")?;

        if let Some(raw) = metadata.get(KEY_SCHEMA_VERSION)? {
            let found: u32 = decode(&raw)?;
            if found != SCHEMA_VERSION {
                return Err(StorageError::SchemaMismatch {
                    found,
                    expected: SCHEMA_VERSION,
                }
                .into());
            }
        }

        Ok(Self {
            db,
            pools,
            stakes,
            metadata,
        })
    }

    fn read<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        self.metadata
            .get(key)?
            .map(|v| decode(&v))
            .transpose()
            .map_err(Into::into)
    }
}

impl Storage for SledStorage {
    fn is_initialized(&self) -> Result<bool> {
        Ok(self.metadata.contains_key(KEY_FARM_META)?)
    }

    fn commit(&self, snapshot: &FarmSnapshot, book: &AssetBook) -> Result<()> {
        // Encode outside the transaction; its closure may run more than once.
        let pool_rows = snapshot
            .pools
            .iter()
            .map(|pool| Ok((pool_key(pool.id).to_vec(), encode(pool)?)))
            .collect::<Result<Vec<_>, StorageError>>()?;
        let stake_rows = snapshot
            .stakes
            .iter()
            .map(|stake| Ok((stake_key(stake.pool, &stake.user), encode(stake)?)))
            .collect::<Result<Vec<_>, StorageError>>()?;
        let meta_rows = vec![
            (KEY_EMISSION_STATE, encode(&snapshot.emission)?),
            (KEY_FARM_META, encode(&snapshot.meta())?),
            (KEY_ASSET_BOOK, encode(book)?),
            (KEY_SCHEMA_VERSION, encode(&SCHEMA_VERSION)?),
        ];

        let outcome: Result<(), TransactionError<StorageError>> = (
            &self.pools,
            &self.stakes,
            &self.metadata,
        )
            .transaction(|(pools, stakes, metadata)| {
                for (key, value) in &pool_rows {
                    pools.insert(key.as_slice(), value.as_slice())?;
                }
                for (key, value) in &stake_rows {
                    stakes.insert(key.as_slice(), value.as_slice())?;
                }
                for (key, value) in &meta_rows {
                    metadata.insert(*key, value.as_slice())?;
                }
                Ok::<(), ConflictableTransactionError<StorageError>>(())
            });
        outcome.map_err(|err| match err {
            TransactionError::Abort(err) => err,
            TransactionError::Storage(err) => StorageError::Database(err),
        })?;

        self.db.flush()?;
        debug!(
            target: "storage",
            "Committed farm {} at block {}: {} pools, {} stakes",
            snapshot.farm_id,
            snapshot.last_block,
            pool_rows.len(),
            stake_rows.len()
        );
        Ok(())
    }

    fn load_snapshot(&self) -> Result<Option<FarmSnapshot>> {
        let Some(meta) = self.get_farm_meta()? else {
            return Ok(None);
        };
        let emission = self
            .get_emission_state()?
            .ok_or(StorageError::NotInitialized)?;

        let mut pools = Vec::with_capacity(self.pools.len());
        for entry in self.pools.iter() {
            let (key, value) = entry?;
            check_pool_key(&key)?;
            pools.push(decode::<Pool>(&value)?);
        }
        let mut stakes = Vec::with_capacity(self.stakes.len());
        for entry in self.stakes.iter() {
            let (key, value) = entry?;
            check_stake_key(&key)?;
            stakes.push(decode::<UserStake>(&value)?);
        }

        info!(
            target: "storage",
            "Loaded farm {} at block {} ({} pools, {} stakes)",
            meta.farm_id,
            meta.last_block,
            pools.len(),
            stakes.len()
        );

        Ok(Some(FarmSnapshot {
            farm_id: meta.farm_id,
            operator: meta.operator,
            custody: meta.custody,
            last_block: meta.last_block,
            emission,
            pools,
            stakes,
        }))
    }

    fn load_asset_book(&self) -> Result<AssetBook> {
        Ok(self.read(KEY_ASSET_BOOK)?.unwrap_or_default())
    }

    fn get_pool(&self, id: PoolId) -> Result<Option<Pool>> {
        self.pools
            .get(pool_key(id))?
            .map(|v| decode(&v))
            .transpose()
            .map_err(Into::into)
    }

    fn get_stake(&self, pool: PoolId, user: &AccountId) -> Result<Option<UserStake>> {
        self.stakes
            .get(stake_key(pool, user))?
            .map(|v| decode(&v))
            .transpose()
            .map_err(Into::into)
    }

    fn get_emission_state(&self) -> Result<Option<EmissionState>> {
        self.read(KEY_EMISSION_STATE)
    }

    fn get_farm_meta(&self) -> Result<Option<FarmMeta>> {
        self.read(KEY_FARM_META)
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

/// In-memory testing backend
#[derive(Default, Clone)]
pub struct MemoryStorage {
    state: Arc<RwLock<Option<(FarmSnapshot, AssetBook)>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn is_initialized(&self) -> Result<bool> {
        Ok(self.state.read().is_some())
    }

    fn commit(&self, snapshot: &FarmSnapshot, book: &AssetBook) -> Result<()> {
        *self.state.write() = Some((snapshot.clone(), book.clone()));
        Ok(())
    }

    fn load_snapshot(&self) -> Result<Option<FarmSnapshot>> {
        Ok(self.state.read().as_ref().map(|(snapshot, _)| snapshot.clone()))
    }

    fn load_asset_book(&self) -> Result<AssetBook> {
        Ok(self
            .state
            .read()
            .as_ref()
            .map(|(_, book)| book.clone())
            .unwrap_or_default())
    }

    fn get_pool(&self, id: PoolId) -> Result<Option<Pool>> {
        Ok(self.state.read().as_ref().and_then(|(snapshot, _)| {
            snapshot.pools.iter().find(|pool| pool.id == id).cloned()
        }))
    }

    fn get_stake(&self, pool: PoolId, user: &AccountId) -> Result<Option<UserStake>> {
        Ok(self.state.read().as_ref().and_then(|(snapshot, _)| {
            snapshot
                .stakes
                .iter()
                .find(|stake| stake.pool == pool && stake.user == *user)
                .cloned()
        }))
    }

    fn get_emission_state(&self) -> Result<Option<EmissionState>> {
        Ok(self
            .state
            .read()
            .as_ref()
            .map(|(snapshot, _)| snapshot.emission.clone()))
    }

    fn get_farm_meta(&self) -> Result<Option<FarmMeta>> {
        Ok(self.state.read().as_ref().map(|(snapshot, _)| snapshot.meta()))
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stake_keys_group_by_pool() {
        let alice = AccountId::from_label("alice");
        let key = stake_key(3, &alice);
        assert_eq!(key.len(), 4 + ACCOUNT_BYTES);
        assert_eq!(&key[..4], &[0, 0, 0, 3]);
        assert!(stake_key(2, &alice) < key);
        assert!(check_stake_key(&key).is_ok());
        assert!(check_stake_key(&key[..10]).is_err());
    }

    #[test]
    fn pool_keys_sort_numerically() {
        assert!(pool_key(2) < pool_key(10));
        assert!(pool_key(255) < pool_key(256));
    }
}
