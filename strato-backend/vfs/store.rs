use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use mongodb::bson::oid::ObjectId;

use super::backend::FsBackend;
use super::blob::{BlobDownload, BlobId, BlobStore, BufferedDownload};
use super::error::{FsError, FsErrorKind, FsResult};
use super::path;
use super::types::{AccessMode, EntryPermissions, EntryRef, FsEntry, PermOp};

/// The virtual filesystem store. Entries live in a document backend, file
/// contents in a blob store; every operation takes the caller's tag set and
/// enforces the tag algebra. `None` tags bypass checks (trusted internal
/// callers only).
///
/// Operations are atomic at the granularity of single document updates.
/// Two-phase operations (insert entry, then link into parent) can leave an
/// orphaned record if interrupted between the phases; orphans are invisible
/// to lookups and tolerated.
#[derive(Clone)]
pub struct FsStore {
    backend: Arc<dyn FsBackend>,
    blobs: Arc<dyn BlobStore>,
}

impl FsStore {
    pub fn new(backend: Arc<dyn FsBackend>, blobs: Arc<dyn BlobStore>) -> Self {
        FsStore { backend, blobs }
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    /// Fetch an entry by id without permission checks. Callers must have
    /// resolved the id through a permission-checked walk already.
    pub async fn get_entry(&self, id: ObjectId) -> FsResult<Option<FsEntry>> {
        self.backend.get(id).await
    }

    /// Insert the root entry of an empty tree. Bootstrap only.
    pub async fn insert_root(&self, root: &FsEntry) -> FsResult<()> {
        if !root.is_root || !root.is_dir() {
            return Err(FsError::Invalid("root must be a directory flagged is_root".into()));
        }
        if self.backend.root().await?.is_some() {
            return Err(FsError::Exist("/".into()));
        }
        self.backend.insert(root).await
    }

    /// Walk from the root to `abs_path`. Requires execute on every
    /// directory along the way; bumps `accessed_at` on each entry visited.
    /// A missing name fails with a resume-point error (see
    /// [`FsError::LookupStop`]); walking *through* a file fails `invalid`.
    pub async fn lookup(&self, tags: Option<&[String]>, abs_path: &str) -> FsResult<FsEntry> {
        let now = Utc::now();
        let clean = path::cleanup_abs_path(abs_path)?;

        let root = self
            .backend
            .root()
            .await?
            .ok_or_else(|| FsError::NotExist("/".into()))?;
        if clean == "/" {
            return Ok(root);
        }

        let segs = path::segments(&clean);
        let last = segs.len() - 1;
        let mut current = root;
        let mut walked = String::new();

        for (i, seg) in segs.iter().enumerate() {
            if !current.permissions.is_allowed(AccessMode::Execute, tags) {
                let denied = if walked.is_empty() { "/" } else { walked.as_str() };
                return Err(FsError::AccessDenied(denied.to_string()));
            }

            let child_id = current.child(seg).map(|r| r.ref_id);
            let next = match child_id {
                Some(id) => self.backend.get_touch_accessed(id, now).await?,
                None => None,
            };
            let Some(next) = next else {
                let last_path = if walked.is_empty() {
                    "/".to_string()
                } else {
                    walked.clone()
                };
                return Err(FsError::LookupStop {
                    last_successful_path: last_path,
                    last_entry: Box::new(current),
                    source: Box::new(FsError::NotExist(clean.clone())),
                });
            };

            walked.push('/');
            walked.push_str(seg);

            if !next.is_dir() {
                if i == last {
                    return Ok(next);
                }
                return Err(FsError::Invalid(format!("{walked} is not a directory")));
            }
            current = next;
        }

        Ok(current)
    }

    /// Create or overwrite the file `name` under `parent_id`, pointing it at
    /// `file_ref`. Requires write and execute on the parent. A new entry
    /// inherits the parent's permissions; an existing one keeps its own and
    /// only swaps the blob reference.
    pub async fn write_file(
        &self,
        tags: Option<&[String]>,
        parent_id: ObjectId,
        name: &str,
        file_ref: Option<BlobId>,
    ) -> FsResult<FsEntry> {
        let now = Utc::now();
        let parent = self
            .backend
            .get(parent_id)
            .await?
            .ok_or_else(|| FsError::NotExist(format!("parent of {name}")))?;

        if !parent.is_dir() {
            return Err(FsError::Invalid("parent is not a directory".into()));
        }
        if !parent.permissions.is_allowed(AccessMode::Write, tags)
            || !parent.permissions.is_allowed(AccessMode::Execute, tags)
        {
            return Err(FsError::AccessDenied(name.to_string()));
        }

        if let Some(reference) = parent.child(name) {
            let existing = self
                .backend
                .get(reference.ref_id)
                .await?
                .ok_or_else(|| FsError::NotExist(name.to_string()))?;
            if existing.is_dir() {
                return Err(FsError::Invalid(format!("{name} is a directory")));
            }
            return self
                .backend
                .set_file_ref(reference.ref_id, file_ref, now)
                .await?
                .ok_or_else(|| FsError::NotExist(name.to_string()));
        }

        let file = FsEntry::new_file(parent.permissions.clone(), file_ref);
        self.backend.insert(&file).await?;
        self.backend.link_child(parent_id, name, file.id, now).await?;
        Ok(file)
    }

    /// Upload `bytes` as a fresh blob and write it as `name` under the
    /// parent. Convenience for session files, credentials, and profiles.
    pub async fn write_file_contents(
        &self,
        tags: Option<&[String]>,
        parent_id: ObjectId,
        name: &str,
        bytes: &[u8],
    ) -> FsResult<FsEntry> {
        let blob_id = self.write_blob(bytes).await?;
        self.write_file(tags, parent_id, name, Some(blob_id)).await
    }

    /// Upload a complete byte buffer as a new blob.
    pub async fn write_blob(&self, bytes: &[u8]) -> FsResult<BlobId> {
        let mut upload = self.blobs.open_upload().await?;
        upload.write_all(bytes).await?;
        upload.close().await
    }

    /// Create the directory `name` under `parent_id`. Requires write on the
    /// parent. Permissions inherit from the parent unless an override is
    /// given, in which case the update-perm safety rules apply. Returns an
    /// already-existing directory of that name as-is.
    pub async fn write_directory(
        &self,
        tags: Option<&[String]>,
        parent_id: ObjectId,
        name: &str,
        dir_perms: Option<EntryPermissions>,
    ) -> FsResult<FsEntry> {
        let now = Utc::now();
        let parent = self
            .backend
            .get(parent_id)
            .await?
            .ok_or_else(|| FsError::NotExist(format!("parent of {name}")))?;

        if !parent.is_dir() {
            return Err(FsError::Invalid("parent is not a directory".into()));
        }
        if !parent.permissions.is_allowed(AccessMode::Write, tags) {
            return Err(FsError::AccessDenied(name.to_string()));
        }

        let perms = match dir_perms {
            Some(p) => {
                if !parent
                    .permissions
                    .can_update_perm_tags(&p.update_perm_tags, tags)
                {
                    return Err(FsError::AccessDenied(name.to_string()));
                }
                p
            }
            None => parent.permissions.clone(),
        };

        if let Some(reference) = parent.child(name) {
            match self.backend.get(reference.ref_id).await? {
                Some(existing) if existing.is_dir() => return Ok(existing),
                Some(_) => return Err(FsError::Exist(name.to_string())),
                // dangling reference: clear it and recreate below
                None => {
                    self.backend.unlink_child(parent_id, name, now).await?;
                }
            }
        }

        let dir = FsEntry::new_directory(perms);
        self.backend.insert(&dir).await?;
        self.backend.link_child(parent_id, name, dir.id, now).await?;
        Ok(dir)
    }

    /// Drop the reference `name` from a directory without touching the
    /// child record. Requires write on the parent. Returns the updated
    /// parent.
    pub async fn remove_child(
        &self,
        tags: Option<&[String]>,
        parent_id: ObjectId,
        name: &str,
    ) -> FsResult<FsEntry> {
        let now = Utc::now();
        let parent = self
            .backend
            .get(parent_id)
            .await?
            .ok_or_else(|| FsError::NotExist(format!("parent of {name}")))?;

        if !parent.is_dir() {
            return Err(FsError::Invalid("parent is not a directory".into()));
        }
        if !parent.permissions.is_allowed(AccessMode::Write, tags) {
            return Err(FsError::AccessDenied(name.to_string()));
        }
        if parent.child(name).is_none() {
            return Err(FsError::NotExist(name.to_string()));
        }

        self.backend
            .unlink_child(parent_id, name, now)
            .await?
            .ok_or_else(|| FsError::NotExist(name.to_string()))
    }

    /// Remove the entry at `abs_path`: delete its record (and, for a
    /// directory with `rm_directories`, the whole subtree) then unlink it
    /// from the parent. Requires write on the parent, or update-perm as a
    /// fallback when `force` is set.
    pub async fn remove_file(
        &self,
        tags: Option<&[String]>,
        abs_path: &str,
        force: bool,
        rm_directories: bool,
    ) -> FsResult<FsEntry> {
        let now = Utc::now();
        let (parent_path, leaf) = path::dir_up(abs_path)?;
        let parent = self.lookup(tags, &parent_path).await?;

        if !parent.is_dir() {
            return Err(FsError::Invalid(format!("{parent_path} is not a directory")));
        }
        let allowed = parent.permissions.is_allowed(AccessMode::Write, tags)
            || (force && parent.permissions.is_allowed(AccessMode::UpdatePerms, tags));
        if !allowed {
            return Err(FsError::AccessDenied(abs_path.to_string()));
        }

        let child_id = parent
            .child(&leaf)
            .map(|r| r.ref_id)
            .ok_or_else(|| FsError::NotExist(abs_path.to_string()))?;
        let entry = self
            .backend
            .get(child_id)
            .await?
            .ok_or_else(|| FsError::NotExist(abs_path.to_string()))?;

        if entry.is_dir() {
            if !rm_directories {
                return Err(FsError::Invalid(format!("{abs_path} is a directory")));
            }
            self.delete_subtree(tags, entry.clone(), abs_path.to_string())
                .await?;
        } else {
            self.backend.delete(child_id).await?;
        }

        self.backend.unlink_child(parent.id, &leaf, now).await?;
        Ok(entry)
    }

    fn delete_subtree(
        &self,
        tags: Option<&[String]>,
        entry: FsEntry,
        entry_path: String,
    ) -> BoxFuture<'_, FsResult<()>> {
        let tags = tags.map(|t| t.to_vec());
        Box::pin(async move {
            let tags = tags.as_deref();
            if !entry.permissions.is_allowed(AccessMode::Execute, tags)
                || !entry.permissions.is_allowed(AccessMode::Write, tags)
            {
                return Err(FsError::AccessDenied(entry_path));
            }

            for reference in &entry.entries {
                let Some(child) = self.backend.get(reference.ref_id).await? else {
                    continue;
                };
                let child_path = format!("{entry_path}/{}", reference.name);
                if child.is_dir() {
                    self.delete_subtree(tags, child, child_path).await?;
                } else {
                    self.backend.delete(child.id).await?;
                }
            }

            self.backend.delete(entry.id).await
        })
    }

    /// Create a directory at `abs_path`. Fails `exist` if the path already
    /// resolves. With `mk_parents`, creates the entire missing chain in one
    /// batch (children inserted deepest-first, then the head linked into the
    /// deepest existing directory); otherwise only a single missing leaf is
    /// allowed. The terminal directory may take `perms` (safety rules
    /// apply); intermediate ones inherit.
    pub async fn mkdir(
        &self,
        tags: Option<&[String]>,
        abs_path: &str,
        perms: Option<EntryPermissions>,
        mk_parents: bool,
    ) -> FsResult<FsEntry> {
        let now = Utc::now();
        let clean = path::cleanup_abs_path(abs_path)?;

        let err = match self.lookup(tags, &clean).await {
            Ok(_) => return Err(FsError::Exist(clean)),
            Err(err) => err,
        };
        if err.kind() != FsErrorKind::NotExist {
            return Err(err);
        }
        let Some((last_path, last_entry)) = err.lookup_stop() else {
            return Err(err);
        };
        let last_entry = last_entry.clone();
        let walked = path::segments(last_path).len();
        let missing: Vec<String> = path::segments(&clean)[walked..]
            .iter()
            .map(|s| s.to_string())
            .collect();

        if missing.len() == 1 {
            return self
                .write_directory(tags, last_entry.id, &missing[0], perms)
                .await;
        }
        if !mk_parents {
            return Err(FsError::NotExist(clean));
        }

        if !last_entry.permissions.is_allowed(AccessMode::Write, tags) {
            return Err(FsError::AccessDenied(clean));
        }
        let inherit = last_entry.permissions.clone();
        let terminal_perms = match perms {
            Some(p) => {
                if !inherit.can_update_perm_tags(&p.update_perm_tags, tags) {
                    return Err(FsError::AccessDenied(clean));
                }
                p
            }
            None => inherit.clone(),
        };

        let mut chain: Vec<FsEntry> = Vec::with_capacity(missing.len());
        for i in 0..missing.len() {
            let p = if i == missing.len() - 1 {
                terminal_perms.clone()
            } else {
                inherit.clone()
            };
            chain.push(FsEntry::new_directory(p));
        }
        for i in 0..chain.len() - 1 {
            let child = EntryRef {
                name: missing[i + 1].clone(),
                ref_id: chain[i + 1].id,
            };
            chain[i].entries.push(child);
        }

        // deepest-first so a partially created chain is never reachable
        for entry in chain.iter().rev() {
            self.backend.insert(entry).await?;
        }
        self.backend
            .link_child(last_entry.id, &missing[0], chain[0].id, now)
            .await?;

        Ok(chain.pop().expect("chain is non-empty"))
    }

    /// Re-link `src_path` under the destination: into `dest_path` itself
    /// when it resolves to a directory (keeping the source name), otherwise
    /// into the destination's parent under the destination leaf (rename).
    /// A same-named entry at the destination is overwritten. The entry id
    /// is preserved; only links change.
    pub async fn move_entry(
        &self,
        tags: Option<&[String]>,
        dest_path: &str,
        src_path: &str,
    ) -> FsResult<FsEntry> {
        let now = Utc::now();
        let clean_src = path::cleanup_abs_path(src_path)?;
        let clean_dest = path::cleanup_abs_path(dest_path)?;
        let (src_parent_path, src_leaf) = path::dir_up(&clean_src)?;

        let src_parent = self.lookup(tags, &src_parent_path).await?;
        if !src_parent.is_dir() {
            return Err(FsError::Invalid(format!(
                "{src_parent_path} is not a directory"
            )));
        }
        if !src_parent.permissions.is_allowed(AccessMode::Write, tags) {
            return Err(FsError::AccessDenied(clean_src));
        }
        let src_id = src_parent
            .child(&src_leaf)
            .map(|r| r.ref_id)
            .ok_or_else(|| FsError::NotExist(clean_src.clone()))?;
        let src_entry = self
            .backend
            .get(src_id)
            .await?
            .ok_or_else(|| FsError::NotExist(clean_src.clone()))?;

        if src_entry.is_dir()
            && (clean_dest == clean_src || clean_dest.starts_with(&format!("{clean_src}/")))
        {
            return Err(FsError::Invalid(
                "cannot move a directory into itself".into(),
            ));
        }

        let (dest_parent, dest_name) = match self.lookup(tags, &clean_dest).await {
            Ok(entry) if entry.is_dir() => (entry, src_leaf.clone()),
            Ok(_) => {
                let (dp, dleaf) = path::dir_up(&clean_dest)?;
                (self.lookup(tags, &dp).await?, dleaf)
            }
            Err(err) if err.kind() == FsErrorKind::NotExist => {
                let (dp, dleaf) = path::dir_up(&clean_dest)?;
                (self.lookup(tags, &dp).await?, dleaf)
            }
            Err(err) => return Err(err),
        };
        if !dest_parent.is_dir() {
            return Err(FsError::Invalid(format!("{clean_dest} is not a directory")));
        }
        if !dest_parent.permissions.is_allowed(AccessMode::Write, tags) {
            return Err(FsError::AccessDenied(clean_dest.clone()));
        }

        if dest_parent.id == src_parent.id && dest_name == src_leaf {
            return Ok(src_entry);
        }

        // Overwrite any entry already holding the destination name, link the
        // source in, then drop the old link. Link-before-unlink: a crash in
        // between leaves an extra link, never a lost entry.
        self.backend
            .unlink_child(dest_parent.id, &dest_name, now)
            .await?;
        self.backend
            .link_child(dest_parent.id, &dest_name, src_id, now)
            .await?;
        self.backend
            .unlink_child(src_parent.id, &src_leaf, now)
            .await?;

        self.backend
            .get(src_id)
            .await?
            .ok_or_else(|| FsError::NotExist(clean_dest))
    }

    /// Copy `src_path` to the destination (resolution mirrors
    /// [`Self::move_entry`]). Files share the source blob id; directories
    /// require `recursive` and are rebuilt entry by entry.
    pub async fn copy_entry(
        &self,
        tags: Option<&[String]>,
        dest_path: &str,
        src_path: &str,
        recursive: bool,
    ) -> FsResult<FsEntry> {
        let clean_src = path::cleanup_abs_path(src_path)?;
        let clean_dest = path::cleanup_abs_path(dest_path)?;
        if clean_src == "/" {
            return Err(FsError::Invalid("cannot copy /".into()));
        }
        let (_, src_leaf) = path::dir_up(&clean_src)?;
        let src_entry = self.lookup(tags, &clean_src).await?;

        let (dest_parent, dest_name) = match self.lookup(tags, &clean_dest).await {
            Ok(entry) if entry.is_dir() => (entry, src_leaf),
            Ok(_) => {
                let (dp, dleaf) = path::dir_up(&clean_dest)?;
                (self.lookup(tags, &dp).await?, dleaf)
            }
            Err(err) if err.kind() == FsErrorKind::NotExist => {
                let (dp, dleaf) = path::dir_up(&clean_dest)?;
                (self.lookup(tags, &dp).await?, dleaf)
            }
            Err(err) => return Err(err),
        };

        self.copy_into(tags, src_entry, dest_parent.id, dest_name, recursive, clean_src)
            .await
    }

    fn copy_into(
        &self,
        tags: Option<&[String]>,
        src: FsEntry,
        dest_parent: ObjectId,
        name: String,
        recursive: bool,
        src_path: String,
    ) -> BoxFuture<'_, FsResult<FsEntry>> {
        let tags = tags.map(|t| t.to_vec());
        Box::pin(async move {
            let tags = tags.as_deref();
            if !src.is_dir() {
                if !src.permissions.is_allowed(AccessMode::Read, tags) {
                    return Err(FsError::AccessDenied(src_path));
                }
                return self.write_file(tags, dest_parent, &name, src.file_ref).await;
            }

            if !recursive {
                return Err(FsError::Invalid(format!("{src_path} is a directory")));
            }
            if !src.permissions.is_allowed(AccessMode::Read, tags)
                || !src.permissions.is_allowed(AccessMode::Execute, tags)
            {
                return Err(FsError::AccessDenied(src_path));
            }

            let created = self
                .write_directory(tags, dest_parent, &name, None)
                .await?;
            for reference in &src.entries {
                let Some(child) = self.backend.get(reference.ref_id).await? else {
                    continue;
                };
                let child_path = format!("{src_path}/{}", reference.name);
                self.copy_into(
                    tags,
                    child,
                    created.id,
                    reference.name.clone(),
                    true,
                    child_path,
                )
                .await?;
            }
            Ok(created)
        })
    }

    /// Add or remove `tag` on one permission list of the entry at
    /// `abs_path`. Requires update-perm on the entry; changing the
    /// update-perm list itself must pass the safety rules. With
    /// `recursive`, descends after mutating the entry; the first failing
    /// child aborts the walk with its path in the error.
    pub async fn chmod(
        &self,
        tags: Option<&[String]>,
        abs_path: &str,
        tag: &str,
        op: PermOp,
        mode: AccessMode,
        recursive: bool,
    ) -> FsResult<FsEntry> {
        let clean = path::cleanup_abs_path(abs_path)?;
        let entry = self.lookup(tags, &clean).await?;
        self.chmod_entry(tags, entry, tag.to_string(), op, mode, recursive, clean)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    fn chmod_entry(
        &self,
        tags: Option<&[String]>,
        entry: FsEntry,
        tag: String,
        op: PermOp,
        mode: AccessMode,
        recursive: bool,
        entry_path: String,
    ) -> BoxFuture<'_, FsResult<FsEntry>> {
        let tags = tags.map(|t| t.to_vec());
        Box::pin(async move {
            let tags = tags.as_deref();
            if !entry.permissions.is_allowed(AccessMode::UpdatePerms, tags) {
                return Err(FsError::AccessDenied(entry_path));
            }

            if mode == AccessMode::UpdatePerms {
                let mut new_list = entry.permissions.update_perm_tags.clone();
                match op {
                    PermOp::Add => {
                        if !new_list.contains(&tag) {
                            new_list.push(tag.clone());
                        }
                    }
                    PermOp::Remove => new_list.retain(|t| *t != tag),
                }
                if !entry.permissions.can_update_perm_tags(&new_list, tags) {
                    return Err(FsError::AccessDenied(entry_path));
                }
            }

            let updated = self
                .backend
                .update_perm_tag(entry.id, mode, op, &tag, Utc::now())
                .await?
                .ok_or_else(|| FsError::NotExist(entry_path.clone()))?;

            if recursive && entry.is_dir() {
                for reference in &entry.entries {
                    let Some(child) = self.backend.get(reference.ref_id).await? else {
                        continue;
                    };
                    let child_path = format!("{entry_path}/{}", reference.name);
                    self.chmod_entry(tags, child, tag.clone(), op, mode, true, child_path)
                        .await?;
                }
            }

            Ok(updated)
        })
    }

    /// Open a read stream over a file entry. Requires read on the entry.
    pub async fn read_entry(
        &self,
        tags: Option<&[String]>,
        entry: &FsEntry,
    ) -> FsResult<Box<dyn BlobDownload>> {
        if !entry.permissions.is_allowed(AccessMode::Read, tags) {
            return Err(FsError::AccessDenied("read target".into()));
        }
        if entry.is_dir() {
            return Err(FsError::Invalid("read target is not a file".into()));
        }
        match entry.file_ref {
            None => Ok(Box::new(BufferedDownload::empty())),
            Some(id) => self.blobs.open_download(id).await,
        }
    }

    pub async fn lookup_read(
        &self,
        tags: Option<&[String]>,
        abs_path: &str,
    ) -> FsResult<Box<dyn BlobDownload>> {
        let entry = self.lookup(tags, abs_path).await?;
        self.read_entry(tags, &entry)
            .await
            .map_err(|err| match err {
                FsError::AccessDenied(_) => FsError::AccessDenied(abs_path.to_string()),
                other => other,
            })
    }

    pub async fn lookup_read_all(
        &self,
        tags: Option<&[String]>,
        abs_path: &str,
    ) -> FsResult<Vec<u8>> {
        let mut download = self.lookup_read(tags, abs_path).await?;
        download.read_to_end().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::backend::MemBackend;
    use crate::vfs::blob::MemBlobStore;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn open_perms(all: &[&str]) -> EntryPermissions {
        EntryPermissions {
            read_tags: tags(all),
            write_tags: tags(all),
            execute_tags: tags(all),
            update_perm_tags: tags(all),
        }
    }

    async fn store_with_root(perms: EntryPermissions) -> (FsStore, FsEntry) {
        let backend = Arc::new(MemBackend::new());
        let blobs = Arc::new(MemBlobStore::new());
        let mut root = FsEntry::new_directory(perms);
        root.is_root = true;
        backend.insert(&root).await.unwrap();
        (FsStore::new(backend, blobs), root)
    }

    async fn seeded_store() -> (FsStore, FsEntry) {
        store_with_root(open_perms(&["alice", "sysadmin"])).await
    }

    #[tokio::test]
    async fn lookup_root_and_nested() {
        let (store, root) = seeded_store().await;
        let caller = tags(&["alice"]);

        let found = store.lookup(Some(&caller), "/").await.unwrap();
        assert_eq!(found.id, root.id);

        let dir = store
            .write_directory(Some(&caller), root.id, "docs", None)
            .await
            .unwrap();
        let found = store.lookup(Some(&caller), "/docs").await.unwrap();
        assert_eq!(found.id, dir.id);
        // normalization applies before the walk
        let found = store.lookup(Some(&caller), "/docs/../docs/.").await.unwrap();
        assert_eq!(found.id, dir.id);
    }

    #[tokio::test]
    async fn lookup_missing_carries_resume_point() {
        let (store, root) = seeded_store().await;
        let caller = tags(&["alice"]);
        let docs = store
            .write_directory(Some(&caller), root.id, "docs", None)
            .await
            .unwrap();

        let err = store
            .lookup(Some(&caller), "/docs/a/b")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::NotExist);
        let (last_path, last_entry) = err.lookup_stop().unwrap();
        assert_eq!(last_path, "/docs");
        assert_eq!(last_entry.id, docs.id);
    }

    #[tokio::test]
    async fn lookup_through_file_is_invalid() {
        let (store, root) = seeded_store().await;
        let caller = tags(&["alice"]);
        store
            .write_file(Some(&caller), root.id, "notes", None)
            .await
            .unwrap();

        let err = store
            .lookup(Some(&caller), "/notes/deeper")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::Invalid);

        // the file itself as final segment is fine
        assert!(store.lookup(Some(&caller), "/notes").await.is_ok());
    }

    #[tokio::test]
    async fn lookup_requires_execute_on_every_hop() {
        let (store, root) = store_with_root(open_perms(&["sysadmin"])).await;
        let caller = tags(&["alice"]);

        let err = store.lookup(Some(&caller), "/anything").await.unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::AccessDenied);

        // bypass for trusted callers
        store
            .write_directory(None, root.id, "etc", None)
            .await
            .unwrap();
        assert!(store.lookup(None, "/etc").await.is_ok());
    }

    #[tokio::test]
    async fn lookup_is_deterministic_between_mutations() {
        let (store, root) = seeded_store().await;
        let caller = tags(&["alice"]);
        let dir = store
            .write_directory(Some(&caller), root.id, "d", None)
            .await
            .unwrap();

        for _ in 0..3 {
            assert_eq!(store.lookup(Some(&caller), "/d").await.unwrap().id, dir.id);
        }
    }

    #[tokio::test]
    async fn write_file_roundtrip_and_overwrite() {
        let (store, root) = seeded_store().await;
        let caller = tags(&["alice"]);

        let blob = store.write_blob(b"first").await.unwrap();
        let file = store
            .write_file(Some(&caller), root.id, "f", Some(blob))
            .await
            .unwrap();
        assert_eq!(
            store.lookup_read_all(Some(&caller), "/f").await.unwrap(),
            b"first"
        );

        let blob2 = store.write_blob(b"second").await.unwrap();
        let overwritten = store
            .write_file(Some(&caller), root.id, "f", Some(blob2))
            .await
            .unwrap();
        assert_eq!(overwritten.id, file.id, "overwrite keeps the entry id");
        assert_eq!(
            store.lookup_read_all(Some(&caller), "/f").await.unwrap(),
            b"second"
        );
    }

    #[tokio::test]
    async fn empty_file_reads_as_empty() {
        let (store, root) = seeded_store().await;
        let caller = tags(&["alice"]);
        store
            .write_file(Some(&caller), root.id, "empty", None)
            .await
            .unwrap();
        assert_eq!(
            store.lookup_read_all(Some(&caller), "/empty").await.unwrap(),
            Vec::<u8>::new()
        );
    }

    #[tokio::test]
    async fn new_file_inherits_parent_permissions() {
        let (store, root) = seeded_store().await;
        let caller = tags(&["alice"]);
        let file = store
            .write_file(Some(&caller), root.id, "f", None)
            .await
            .unwrap();
        assert_eq!(file.permissions, open_perms(&["alice", "sysadmin"]));
    }

    #[tokio::test]
    async fn write_directory_is_idempotent() {
        let (store, root) = seeded_store().await;
        let caller = tags(&["alice"]);
        let first = store
            .write_directory(Some(&caller), root.id, "d", None)
            .await
            .unwrap();
        let second = store
            .write_directory(Some(&caller), root.id, "d", None)
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn write_directory_override_respects_safety_rules() {
        let (store, root) = seeded_store().await;
        let caller = tags(&["alice"]);

        // granting update-perm to a tag alice doesn't hold is rejected
        let bad = EntryPermissions {
            update_perm_tags: tags(&["bob"]),
            ..open_perms(&["alice"])
        };
        let err = store
            .write_directory(Some(&caller), root.id, "d", Some(bad))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::AccessDenied);

        let good = EntryPermissions {
            update_perm_tags: tags(&["alice"]),
            ..open_perms(&["alice"])
        };
        let dir = store
            .write_directory(Some(&caller), root.id, "d", Some(good.clone()))
            .await
            .unwrap();
        assert_eq!(dir.permissions, good);
    }

    #[tokio::test]
    async fn mkdir_existing_fails_exist() {
        let (store, root) = seeded_store().await;
        let caller = tags(&["alice"]);
        store
            .write_directory(Some(&caller), root.id, "d", None)
            .await
            .unwrap();
        let err = store.mkdir(Some(&caller), "/d", None, false).await.unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::Exist);
    }

    #[tokio::test]
    async fn mkdir_single_leaf_without_parents() {
        let (store, _) = seeded_store().await;
        let caller = tags(&["alice"]);
        store.mkdir(Some(&caller), "/a", None, false).await.unwrap();
        assert!(store.lookup(Some(&caller), "/a").await.is_ok());

        // more than one missing segment needs mk_parents
        let err = store.mkdir(Some(&caller), "/x/y", None, false).await.unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::NotExist);
    }

    #[tokio::test]
    async fn mkdir_parents_creates_chain_with_inherited_perms() {
        let (store, root) = seeded_store().await;
        let caller = tags(&["alice"]);

        let terminal = store
            .mkdir(Some(&caller), "/a/b/c", None, true)
            .await
            .unwrap();
        let b = store.lookup(Some(&caller), "/a/b").await.unwrap();
        assert_eq!(b.entries.len(), 1);
        assert_eq!(b.entries[0].name, "c");
        assert_eq!(b.entries[0].ref_id, terminal.id);
        assert_eq!(b.permissions, root.permissions);
        assert_eq!(terminal.permissions, root.permissions);
    }

    #[tokio::test]
    async fn remove_file_and_force_fallback() {
        let (store, root) = seeded_store().await;
        let caller = tags(&["alice"]);
        store
            .write_file(Some(&caller), root.id, "f", None)
            .await
            .unwrap();
        store
            .remove_file(Some(&caller), "/f", false, false)
            .await
            .unwrap();
        let err = store.lookup(Some(&caller), "/f").await.unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::NotExist);

        // write absent, update-perm present: only -f may remove
        let (store, root) = store_with_root(EntryPermissions {
            read_tags: tags(&["alice"]),
            write_tags: tags(&["sysadmin"]),
            execute_tags: tags(&["alice"]),
            update_perm_tags: tags(&["alice"]),
        })
        .await;
        store.write_file(None, root.id, "g", None).await.unwrap();
        let err = store
            .remove_file(Some(&caller), "/g", false, false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::AccessDenied);
        store
            .remove_file(Some(&caller), "/g", true, false)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn remove_directory_needs_recursive() {
        let (store, root) = seeded_store().await;
        let caller = tags(&["alice"]);
        let d = store
            .write_directory(Some(&caller), root.id, "d", None)
            .await
            .unwrap();
        store
            .write_file(Some(&caller), d.id, "inner", None)
            .await
            .unwrap();

        let err = store
            .remove_file(Some(&caller), "/d", false, false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::Invalid);

        store
            .remove_file(Some(&caller), "/d", false, true)
            .await
            .unwrap();
        assert!(store.lookup(Some(&caller), "/d").await.is_err());
        // the subtree records are gone too
        assert!(store.get_entry(d.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn move_into_existing_directory_keeps_name_and_id() {
        let (store, root) = seeded_store().await;
        let caller = tags(&["alice"]);
        let dir = store
            .write_directory(Some(&caller), root.id, "dir", None)
            .await
            .unwrap();
        let blob = store.write_blob(b"x").await.unwrap();
        let file = store
            .write_file(Some(&caller), root.id, "f", Some(blob))
            .await
            .unwrap();

        let moved = store
            .move_entry(Some(&caller), "/dir", "/f")
            .await
            .unwrap();
        assert_eq!(moved.id, file.id);
        assert!(store.lookup(Some(&caller), "/f").await.is_err());
        assert_eq!(
            store.lookup(Some(&caller), "/dir/f").await.unwrap().id,
            file.id
        );
        let _ = dir;
    }

    #[tokio::test]
    async fn move_rename_to_new_leaf() {
        let (store, root) = seeded_store().await;
        let caller = tags(&["alice"]);
        let file = store
            .write_file(Some(&caller), root.id, "old", None)
            .await
            .unwrap();

        let moved = store
            .move_entry(Some(&caller), "/new", "/old")
            .await
            .unwrap();
        assert_eq!(moved.id, file.id);
        assert!(store.lookup(Some(&caller), "/old").await.is_err());
        assert_eq!(store.lookup(Some(&caller), "/new").await.unwrap().id, file.id);
    }

    #[tokio::test]
    async fn mv_overwrites_existing_name() {
        let (store, root) = seeded_store().await;
        let caller = tags(&["alice"]);
        let blob_a = store.write_blob(b"aaa").await.unwrap();
        let blob_b = store.write_blob(b"bbb").await.unwrap();
        store
            .write_file(Some(&caller), root.id, "a", Some(blob_a))
            .await
            .unwrap();
        let b = store
            .write_file(Some(&caller), root.id, "b", Some(blob_b))
            .await
            .unwrap();

        // rename b onto the existing name a: a's old entry is unlinked
        let moved = store.move_entry(Some(&caller), "/a", "/b").await.unwrap();
        assert_eq!(moved.id, b.id);
        assert!(store.lookup(Some(&caller), "/b").await.is_err());
        assert_eq!(
            store.lookup_read_all(Some(&caller), "/a").await.unwrap(),
            b"bbb"
        );

        let root_now = store.lookup(Some(&caller), "/").await.unwrap();
        assert_eq!(
            root_now.entries.iter().filter(|r| r.name == "a").count(),
            1
        );
    }

    #[tokio::test]
    async fn move_directory_into_itself_is_rejected() {
        let (store, root) = seeded_store().await;
        let caller = tags(&["alice"]);
        let d = store
            .write_directory(Some(&caller), root.id, "d", None)
            .await
            .unwrap();
        store
            .write_directory(Some(&caller), d.id, "sub", None)
            .await
            .unwrap();

        let err = store
            .move_entry(Some(&caller), "/d/sub", "/d")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::Invalid);
    }

    #[tokio::test]
    async fn copy_file_shares_blob_id() {
        let (store, root) = seeded_store().await;
        let caller = tags(&["alice"]);
        let blob = store.write_blob(b"content").await.unwrap();
        let src = store
            .write_file(Some(&caller), root.id, "src", Some(blob))
            .await
            .unwrap();

        let copy = store
            .copy_entry(Some(&caller), "/dst", "/src", false)
            .await
            .unwrap();
        assert_ne!(copy.id, src.id);
        assert_eq!(copy.file_ref, src.file_ref);
        assert_eq!(
            store.lookup_read_all(Some(&caller), "/dst").await.unwrap(),
            b"content"
        );
    }

    #[tokio::test]
    async fn copy_directory_requires_recursive_and_recurses() {
        let (store, root) = seeded_store().await;
        let caller = tags(&["alice"]);
        let d = store
            .write_directory(Some(&caller), root.id, "d", None)
            .await
            .unwrap();
        let blob = store.write_blob(b"inner").await.unwrap();
        store
            .write_file(Some(&caller), d.id, "f", Some(blob))
            .await
            .unwrap();

        let err = store
            .copy_entry(Some(&caller), "/d2", "/d", false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::Invalid);

        store
            .copy_entry(Some(&caller), "/d2", "/d", true)
            .await
            .unwrap();
        assert_eq!(
            store.lookup_read_all(Some(&caller), "/d2/f").await.unwrap(),
            b"inner"
        );
    }

    #[tokio::test]
    async fn chmod_adds_and_removes_tags() {
        let (store, root) = seeded_store().await;
        let caller = tags(&["alice"]);
        store
            .write_file(Some(&caller), root.id, "f", None)
            .await
            .unwrap();

        let updated = store
            .chmod(Some(&caller), "/f", "pilot", PermOp::Add, AccessMode::Read, false)
            .await
            .unwrap();
        assert!(updated.permissions.read_tags.contains(&"pilot".to_string()));

        let updated = store
            .chmod(Some(&caller), "/f", "pilot", PermOp::Remove, AccessMode::Read, false)
            .await
            .unwrap();
        assert!(!updated.permissions.read_tags.contains(&"pilot".to_string()));
    }

    #[tokio::test]
    async fn chmod_p_cannot_lock_caller_out() {
        let (store, root) = seeded_store().await;
        let caller = tags(&["alice"]);
        store
            .write_file(Some(&caller), root.id, "f", None)
            .await
            .unwrap();

        // removing sysadmin's tag is not alice's to do
        let err = store
            .chmod(
                Some(&caller),
                "/f",
                "sysadmin",
                PermOp::Remove,
                AccessMode::UpdatePerms,
                false,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::AccessDenied);

        // removing her own last update-perm tag would lock her out
        let err = store
            .chmod(
                Some(&caller),
                "/f",
                "alice",
                PermOp::Remove,
                AccessMode::UpdatePerms,
                false,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::AccessDenied);
    }

    #[tokio::test]
    async fn chmod_recursive_descends() {
        let (store, root) = seeded_store().await;
        let caller = tags(&["alice"]);
        let d = store
            .write_directory(Some(&caller), root.id, "d", None)
            .await
            .unwrap();
        store
            .write_file(Some(&caller), d.id, "f", None)
            .await
            .unwrap();

        store
            .chmod(Some(&caller), "/d", "pilot", PermOp::Add, AccessMode::Read, true)
            .await
            .unwrap();
        let f = store.lookup(Some(&caller), "/d/f").await.unwrap();
        assert!(f.permissions.read_tags.contains(&"pilot".to_string()));
    }

    #[tokio::test]
    async fn read_requires_read_permission() {
        let (store, root) = store_with_root(EntryPermissions {
            read_tags: tags(&["sysadmin"]),
            write_tags: tags(&["sysadmin"]),
            execute_tags: tags(&["alice", "sysadmin"]),
            update_perm_tags: tags(&["sysadmin"]),
        })
        .await;
        let blob = store.write_blob(b"secret").await.unwrap();
        store
            .write_file(None, root.id, "s", Some(blob))
            .await
            .unwrap();

        let caller = tags(&["alice"]);
        let err = store
            .lookup_read_all(Some(&caller), "/s")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FsErrorKind::AccessDenied);

        assert_eq!(store.lookup_read_all(None, "/s").await.unwrap(), b"secret");
    }
}
