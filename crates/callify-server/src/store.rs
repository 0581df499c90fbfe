//! Room Store collaborator.
//!
//! The coordinator only ever writes chat history and, on the first chat
//! message of a room, creates the room record. Reads exist for the REST layer
//! and for tests.

use crate::error::StoreError;
use async_trait::async_trait;
use callify_common::types::{RoomMetadata, RoomRecord};
use callify_common::ChatMessage;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Persistence contract for room records and chat history.
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Create the room with `defaults` unless a record already exists.
    /// An existing record is left untouched.
    async fn upsert_room_if_absent(
        &self,
        room_id: &str,
        defaults: RoomMetadata,
    ) -> Result<(), StoreError>;

    /// Append one message to the room's chat history.
    async fn append_chat(&self, room_id: &str, message: ChatMessage) -> Result<(), StoreError>;

    /// Fetch the room record with its full chat history.
    async fn get_room(&self, room_id: &str) -> Result<Option<RoomRecord>, StoreError>;
}

/// Process-local store. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rooms: Mutex<HashMap<String, RoomRecord>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoomStore for MemoryStore {
    async fn upsert_room_if_absent(
        &self,
        room_id: &str,
        defaults: RoomMetadata,
    ) -> Result<(), StoreError> {
        let mut rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        rooms
            .entry(room_id.to_string())
            .or_insert_with(|| RoomRecord::new(room_id, defaults));
        Ok(())
    }

    async fn append_chat(&self, room_id: &str, message: ChatMessage) -> Result<(), StoreError> {
        let mut rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        let record = rooms
            .get_mut(room_id)
            .ok_or_else(|| StoreError::MissingRoom(room_id.to_string()))?;
        record.chats.push(message);
        Ok(())
    }

    async fn get_room(&self, room_id: &str) -> Result<Option<RoomRecord>, StoreError> {
        let rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(rooms.get(room_id).cloned())
    }
}

/// Store keeping one pretty-printed JSON document per room in a directory.
///
/// Each read-modify-write runs as one blocking job that holds the store lock
/// from load to rename. A caller that stops waiting (a timeout) does not
/// release the lock early, so the next writer always sees the finished file.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            lock: Arc::new(Mutex::new(())),
        })
    }

    /// Directory the store writes to.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn locked<T, F>(&self, job: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> Result<T, StoreError> + Send + 'static,
    {
        let dir = self.dir.clone();
        let lock = Arc::clone(&self.lock);
        tokio::task::spawn_blocking(move || {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            job(&dir)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("store job failed: {e}")))?
    }
}

fn path_for(dir: &Path, room_id: &str) -> PathBuf {
    dir.join(format!("{}.json", file_stem(room_id)))
}

fn load(dir: &Path, room_id: &str) -> Result<Option<RoomRecord>, StoreError> {
    match std::fs::read(path_for(dir, room_id)) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn save(dir: &Path, record: &RoomRecord) -> Result<(), StoreError> {
    let path = path_for(dir, &record.room_id);
    let tmp = path.with_extension("json.tmp");
    let data = serde_json::to_vec_pretty(record)?;
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}

#[async_trait]
impl RoomStore for FileStore {
    async fn upsert_room_if_absent(
        &self,
        room_id: &str,
        defaults: RoomMetadata,
    ) -> Result<(), StoreError> {
        let room_id = room_id.to_string();
        self.locked(move |dir| {
            if load(dir, &room_id)?.is_none() {
                save(dir, &RoomRecord::new(room_id.as_str(), defaults))?;
                tracing::debug!(room = %room_id, "created room record");
            }
            Ok(())
        })
        .await
    }

    async fn append_chat(&self, room_id: &str, message: ChatMessage) -> Result<(), StoreError> {
        let room_id = room_id.to_string();
        self.locked(move |dir| {
            let mut record =
                load(dir, &room_id)?.ok_or_else(|| StoreError::MissingRoom(room_id.clone()))?;
            record.chats.push(message);
            save(dir, &record)
        })
        .await
    }

    async fn get_room(&self, room_id: &str) -> Result<Option<RoomRecord>, StoreError> {
        let room_id = room_id.to_string();
        self.locked(move |dir| load(dir, &room_id)).await
    }
}

/// Map a room id onto a file name that cannot escape the store directory.
///
/// ASCII alphanumerics and `-` pass through; every other byte becomes `_xx`.
fn file_stem(room_id: &str) -> String {
    let mut stem = String::with_capacity(room_id.len());
    for byte in room_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("_{byte:02x}"));
        }
    }
    stem
}
