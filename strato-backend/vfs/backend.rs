use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;

use super::error::{FsError, FsResult};
use super::types::{AccessMode, EntryRef, FsEntry, PermOp};

/// Document-level operations the store issues against the backing database.
/// Each method is a single atomic document operation; the store composes
/// them and accepts that no transaction spans two entries.
#[async_trait]
pub trait FsBackend: Send + Sync {
    /// The unique root entry, if the tree is initialized.
    async fn root(&self) -> FsResult<Option<FsEntry>>;

    async fn get(&self, id: ObjectId) -> FsResult<Option<FsEntry>>;

    /// Fetch an entry and bump its `accessed_at` in the same operation.
    async fn get_touch_accessed(
        &self,
        id: ObjectId,
        now: DateTime<Utc>,
    ) -> FsResult<Option<FsEntry>>;

    async fn insert(&self, entry: &FsEntry) -> FsResult<()>;

    /// Point a file entry at a new blob (or clear it), bumping
    /// modified/accessed. Returns the updated entry, or None if it does not
    /// exist.
    async fn set_file_ref(
        &self,
        id: ObjectId,
        file_ref: Option<ObjectId>,
        now: DateTime<Utc>,
    ) -> FsResult<Option<FsEntry>>;

    /// Append a `(name, child)` reference to a directory and bump its
    /// timestamps, as one compound update.
    async fn link_child(
        &self,
        parent: ObjectId,
        name: &str,
        child: ObjectId,
        now: DateTime<Utc>,
    ) -> FsResult<()>;

    /// Remove the reference named `name` from a directory and bump its
    /// timestamps. Returns the updated parent, or None if the parent does
    /// not exist. Removing an absent name is not an error here; the store
    /// checks existence first where it matters.
    async fn unlink_child(
        &self,
        parent: ObjectId,
        name: &str,
        now: DateTime<Utc>,
    ) -> FsResult<Option<FsEntry>>;

    async fn delete(&self, id: ObjectId) -> FsResult<()>;

    /// Add or remove one tag on one mode's list (add-to-set / pull
    /// semantics), bumping `modified_at`. Returns the updated entry.
    async fn update_perm_tag(
        &self,
        id: ObjectId,
        mode: AccessMode,
        op: PermOp,
        tag: &str,
        now: DateTime<Utc>,
    ) -> FsResult<Option<FsEntry>>;
}

/// In-memory backend. Mirrors the document semantics of the real store so
/// the whole VFS is exercisable without a database.
#[derive(Default)]
pub struct MemBackend {
    entries: Mutex<HashMap<ObjectId, FsEntry>>,
}

impl MemBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FsBackend for MemBackend {
    async fn root(&self) -> FsResult<Option<FsEntry>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.values().find(|e| e.is_root).cloned())
    }

    async fn get(&self, id: ObjectId) -> FsResult<Option<FsEntry>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.get(&id).cloned())
    }

    async fn get_touch_accessed(
        &self,
        id: ObjectId,
        now: DateTime<Utc>,
    ) -> FsResult<Option<FsEntry>> {
        let mut entries = self.entries.lock().unwrap();
        Ok(entries.get_mut(&id).map(|entry| {
            entry.timestamps.accessed_at = now;
            entry.clone()
        }))
    }

    async fn insert(&self, entry: &FsEntry) -> FsResult<()> {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(&entry.id) {
            return Err(FsError::Backend(format!("duplicate entry id {}", entry.id)));
        }
        entries.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn set_file_ref(
        &self,
        id: ObjectId,
        file_ref: Option<ObjectId>,
        now: DateTime<Utc>,
    ) -> FsResult<Option<FsEntry>> {
        let mut entries = self.entries.lock().unwrap();
        Ok(entries.get_mut(&id).map(|entry| {
            entry.file_ref = file_ref;
            entry.timestamps.modified_at = now;
            entry.timestamps.accessed_at = now;
            entry.clone()
        }))
    }

    async fn link_child(
        &self,
        parent: ObjectId,
        name: &str,
        child: ObjectId,
        now: DateTime<Utc>,
    ) -> FsResult<()> {
        let mut entries = self.entries.lock().unwrap();
        let Some(entry) = entries.get_mut(&parent) else {
            return Err(FsError::NotExist(format!("parent entry {parent}")));
        };
        // add-to-set: an identical (name, id) pair is not duplicated
        if !entry
            .entries
            .iter()
            .any(|r| r.name == name && r.ref_id == child)
        {
            entry.entries.push(EntryRef {
                name: name.to_string(),
                ref_id: child,
            });
        }
        entry.timestamps.modified_at = now;
        entry.timestamps.accessed_at = now;
        Ok(())
    }

    async fn unlink_child(
        &self,
        parent: ObjectId,
        name: &str,
        now: DateTime<Utc>,
    ) -> FsResult<Option<FsEntry>> {
        let mut entries = self.entries.lock().unwrap();
        Ok(entries.get_mut(&parent).map(|entry| {
            entry.entries.retain(|r| r.name != name);
            entry.timestamps.modified_at = now;
            entry.timestamps.accessed_at = now;
            entry.clone()
        }))
    }

    async fn delete(&self, id: ObjectId) -> FsResult<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.remove(&id);
        Ok(())
    }

    async fn update_perm_tag(
        &self,
        id: ObjectId,
        mode: AccessMode,
        op: PermOp,
        tag: &str,
        now: DateTime<Utc>,
    ) -> FsResult<Option<FsEntry>> {
        let mut entries = self.entries.lock().unwrap();
        Ok(entries.get_mut(&id).map(|entry| {
            let list = entry.permissions.tags_for_mut(mode);
            match op {
                PermOp::Add => {
                    if !list.iter().any(|t| t == tag) {
                        list.push(tag.to_string());
                    }
                }
                PermOp::Remove => list.retain(|t| t != tag),
            }
            entry.timestamps.modified_at = now;
            entry.clone()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::types::EntryPermissions;

    #[tokio::test]
    async fn touch_accessed_updates_timestamp() {
        let backend = MemBackend::new();
        let entry = FsEntry::new_file(EntryPermissions::default(), None);
        backend.insert(&entry).await.unwrap();

        let later = Utc::now() + chrono::Duration::seconds(10);
        let touched = backend.get_touch_accessed(entry.id, later).await.unwrap().unwrap();
        assert_eq!(touched.timestamps.accessed_at, later);
        assert_eq!(touched.timestamps.created_at, entry.timestamps.created_at);
    }

    #[tokio::test]
    async fn link_child_is_add_to_set() {
        let backend = MemBackend::new();
        let dir = FsEntry::new_directory(EntryPermissions::default());
        backend.insert(&dir).await.unwrap();

        let child = ObjectId::new();
        let now = Utc::now();
        backend.link_child(dir.id, "a", child, now).await.unwrap();
        backend.link_child(dir.id, "a", child, now).await.unwrap();

        let dir = backend.get(dir.id).await.unwrap().unwrap();
        assert_eq!(dir.entries.len(), 1);
    }

    #[tokio::test]
    async fn unlink_child_removes_reference_and_bumps() {
        let backend = MemBackend::new();
        let mut dir = FsEntry::new_directory(EntryPermissions::default());
        dir.entries.push(EntryRef {
            name: "a".into(),
            ref_id: ObjectId::new(),
        });
        backend.insert(&dir).await.unwrap();

        let later = Utc::now() + chrono::Duration::seconds(1);
        let updated = backend.unlink_child(dir.id, "a", later).await.unwrap().unwrap();
        assert!(updated.entries.is_empty());
        assert_eq!(updated.timestamps.modified_at, later);
    }

    #[tokio::test]
    async fn update_perm_tag_adds_and_removes() {
        let backend = MemBackend::new();
        let entry = FsEntry::new_directory(EntryPermissions::default());
        backend.insert(&entry).await.unwrap();

        let now = Utc::now();
        let updated = backend
            .update_perm_tag(entry.id, AccessMode::Read, PermOp::Add, "pilot", now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.permissions.read_tags, vec!["pilot".to_string()]);

        let updated = backend
            .update_perm_tag(entry.id, AccessMode::Read, PermOp::Remove, "pilot", now)
            .await
            .unwrap()
            .unwrap();
        assert!(updated.permissions.read_tags.is_empty());
    }
}
