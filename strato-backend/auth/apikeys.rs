use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use mongodb::Database;
use mongodb::bson::doc;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::spec::BinarySubtype;
use mongodb::{Collection, bson::Binary};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

pub const DEFAULT_HASH_ITERATIONS: u32 = 1000;

/// Stored API key record. The plaintext key is never stored; only the
/// salted, iterated hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub salt: Binary,
    pub hash_iterations: u32,
    pub hash: Binary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_id: Option<ObjectId>,
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("API key does not exist")]
    NotExist,

    #[error("API key is malformed")]
    Invalid,

    #[error("key store error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn get(&self, id: ObjectId) -> Result<Option<ApiKey>, KeyError>;
    async fn insert(&self, key: &ApiKey) -> Result<(), KeyError>;
    async fn delete(&self, id: ObjectId) -> Result<Option<ApiKey>, KeyError>;
}

/// XOR the key with the salt, then run `iterations` rounds of SHA-256.
pub fn hash_key(salt: &[u8; 32], key: &[u8; 32], iterations: u32) -> [u8; 32] {
    let mut state = [0u8; 32];
    for (i, b) in state.iter_mut().enumerate() {
        *b = key[i] ^ salt[i];
    }
    for _ in 0..iterations {
        let digest = Sha256::digest(state);
        state.copy_from_slice(&digest);
    }
    state
}

fn binary(bytes: &[u8]) -> Binary {
    Binary {
        subtype: BinarySubtype::Generic,
        bytes: bytes.to_vec(),
    }
}

/// Generate a new key. Returns the one-time plaintext
/// (`"<id-hex>-<key-hex>"`, 24+1+64 chars) and the record to persist.
pub fn generate_key(
    iterations: u32,
    edge_id: Option<ObjectId>,
) -> Result<(String, ApiKey), KeyError> {
    let mut key = [0u8; 32];
    let mut salt = [0u8; 32];
    getrandom::fill(&mut key).map_err(|e| KeyError::Backend(e.to_string()))?;
    getrandom::fill(&mut salt).map_err(|e| KeyError::Backend(e.to_string()))?;

    let hash = hash_key(&salt, &key, iterations);
    let record = ApiKey {
        id: ObjectId::new(),
        salt: binary(&salt),
        hash_iterations: iterations,
        hash: binary(&hash),
        edge_id,
    };
    let plaintext = format!("{}-{}", record.id.to_hex(), hex::encode(key));
    Ok((plaintext, record))
}

/// Verify a presented `"<24 hex>-<64 hex>"` key: exact-length parse, fetch
/// by id, recompute the iterated hash, constant-time compare.
pub async fn authenticate(
    store: &dyn ApiKeyStore,
    presented: &str,
) -> Result<ApiKey, KeyError> {
    if presented.len() != 89 {
        return Err(KeyError::Invalid);
    }
    let (id_hex, key_hex) = presented.split_once('-').ok_or(KeyError::Invalid)?;
    if id_hex.len() != 24 || key_hex.len() != 64 {
        return Err(KeyError::Invalid);
    }

    let id = ObjectId::parse_str(id_hex).map_err(|_| KeyError::Invalid)?;
    let key_bytes = hex::decode(key_hex).map_err(|_| KeyError::Invalid)?;
    let key: [u8; 32] = key_bytes.try_into().map_err(|_| KeyError::Invalid)?;

    let record = store.get(id).await?.ok_or(KeyError::NotExist)?;
    let salt: [u8; 32] = record
        .salt
        .bytes
        .clone()
        .try_into()
        .map_err(|_| KeyError::Backend("stored salt has wrong length".into()))?;

    let hash = hash_key(&salt, &key, record.hash_iterations);
    if hash.ct_eq(record.hash.bytes.as_slice()).into() {
        Ok(record)
    } else {
        Err(KeyError::NotExist)
    }
}

const KEYS_COLLECTION: &str = "api_keys";

pub struct MongoApiKeyStore {
    col: Collection<ApiKey>,
}

impl MongoApiKeyStore {
    pub fn new(db: &Database) -> Self {
        MongoApiKeyStore {
            col: db.collection(KEYS_COLLECTION),
        }
    }
}

#[async_trait]
impl ApiKeyStore for MongoApiKeyStore {
    async fn get(&self, id: ObjectId) -> Result<Option<ApiKey>, KeyError> {
        self.col
            .find_one(doc! { "_id": id }, None)
            .await
            .map_err(|e| KeyError::Backend(e.to_string()))
    }

    async fn insert(&self, key: &ApiKey) -> Result<(), KeyError> {
        self.col
            .insert_one(key, None)
            .await
            .map(|_| ())
            .map_err(|e| KeyError::Backend(e.to_string()))
    }

    async fn delete(&self, id: ObjectId) -> Result<Option<ApiKey>, KeyError> {
        self.col
            .find_one_and_delete(doc! { "_id": id }, None)
            .await
            .map_err(|e| KeyError::Backend(e.to_string()))
    }
}

/// In-memory key store for tests.
#[derive(Default)]
pub struct MemApiKeyStore {
    keys: Mutex<HashMap<ObjectId, ApiKey>>,
}

impl MemApiKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApiKeyStore for MemApiKeyStore {
    async fn get(&self, id: ObjectId) -> Result<Option<ApiKey>, KeyError> {
        Ok(self.keys.lock().unwrap().get(&id).cloned())
    }

    async fn insert(&self, key: &ApiKey) -> Result<(), KeyError> {
        self.keys.lock().unwrap().insert(key.id, key.clone());
        Ok(())
    }

    async fn delete(&self, id: ObjectId) -> Result<Option<ApiKey>, KeyError> {
        Ok(self.keys.lock().unwrap().remove(&id))
    }
}
