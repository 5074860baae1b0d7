use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{AsyncReadExt, AsyncWriteExt, TryStreamExt};
use mongodb::Database;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{Bson, DateTime as BsonDateTime, doc};
use mongodb::gridfs::{GridFsBucket, GridFsDownloadStream, GridFsUploadStream};
use mongodb::options::{FindOneAndUpdateOptions, ReturnDocument};
use mongodb::{Collection, error::Error as MongoError};
use serde::{Deserialize, Serialize};

use super::backend::FsBackend;
use super::blob::{BlobDownload, BlobStore, BlobUpload};
use super::error::{FsError, FsResult};
use super::types::{
    AccessMode, EntryKind, EntryPermissions, EntryRef, EntryTimestamps, FsEntry, PermOp,
};

const ENTRIES_COLLECTION: &str = "fs_entries";

fn backend_err(err: MongoError) -> FsError {
    FsError::Backend(err.to_string())
}

/// Persisted shape of an [`FsEntry`]. Kept separate from the domain struct
/// so BSON field names and datetime encoding never leak into YAML/JSON
/// serialization elsewhere.
#[derive(Debug, Serialize, Deserialize)]
struct FsEntryDoc {
    #[serde(rename = "_id")]
    id: ObjectId,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    is_root: bool,
    #[serde(rename = "type")]
    kind: i32,
    permissions: PermissionsDoc,
    timestamps: TimestampsDoc,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    entries: Vec<EntryRefDoc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    file_ref: Option<ObjectId>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PermissionsDoc {
    #[serde(default)]
    read_tags: Vec<String>,
    #[serde(default)]
    write_tags: Vec<String>,
    #[serde(default)]
    execute_tags: Vec<String>,
    #[serde(default)]
    update_perm_tags: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TimestampsDoc {
    created_at: BsonDateTime,
    modified_at: BsonDateTime,
    accessed_at: BsonDateTime,
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryRefDoc {
    name: String,
    ref_id: ObjectId,
}

const KIND_FILE: i32 = 0;
const KIND_DIRECTORY: i32 = 1;

impl From<&FsEntry> for FsEntryDoc {
    fn from(entry: &FsEntry) -> Self {
        FsEntryDoc {
            id: entry.id,
            is_root: entry.is_root,
            kind: match entry.kind {
                EntryKind::File => KIND_FILE,
                EntryKind::Directory => KIND_DIRECTORY,
            },
            permissions: PermissionsDoc {
                read_tags: entry.permissions.read_tags.clone(),
                write_tags: entry.permissions.write_tags.clone(),
                execute_tags: entry.permissions.execute_tags.clone(),
                update_perm_tags: entry.permissions.update_perm_tags.clone(),
            },
            timestamps: TimestampsDoc {
                created_at: BsonDateTime::from_chrono(entry.timestamps.created_at),
                modified_at: BsonDateTime::from_chrono(entry.timestamps.modified_at),
                accessed_at: BsonDateTime::from_chrono(entry.timestamps.accessed_at),
            },
            entries: entry
                .entries
                .iter()
                .map(|r| EntryRefDoc {
                    name: r.name.clone(),
                    ref_id: r.ref_id,
                })
                .collect(),
            file_ref: entry.file_ref,
        }
    }
}

impl TryFrom<FsEntryDoc> for FsEntry {
    type Error = FsError;

    fn try_from(doc: FsEntryDoc) -> FsResult<FsEntry> {
        let kind = match doc.kind {
            KIND_FILE => EntryKind::File,
            KIND_DIRECTORY => EntryKind::Directory,
            other => {
                return Err(FsError::Backend(format!("invalid entry type {other}")));
            }
        };
        Ok(FsEntry {
            id: doc.id,
            is_root: doc.is_root,
            kind,
            permissions: EntryPermissions {
                read_tags: doc.permissions.read_tags,
                write_tags: doc.permissions.write_tags,
                execute_tags: doc.permissions.execute_tags,
                update_perm_tags: doc.permissions.update_perm_tags,
            },
            timestamps: EntryTimestamps {
                created_at: doc.timestamps.created_at.to_chrono(),
                modified_at: doc.timestamps.modified_at.to_chrono(),
                accessed_at: doc.timestamps.accessed_at.to_chrono(),
            },
            entries: doc
                .entries
                .into_iter()
                .map(|r| EntryRef {
                    name: r.name,
                    ref_id: r.ref_id,
                })
                .collect(),
            file_ref: doc.file_ref,
        })
    }
}

fn perm_field(mode: AccessMode) -> &'static str {
    match mode {
        AccessMode::Read => "permissions.read_tags",
        AccessMode::Write => "permissions.write_tags",
        AccessMode::Execute => "permissions.execute_tags",
        AccessMode::UpdatePerms => "permissions.update_perm_tags",
    }
}

/// Entry documents in a MongoDB collection, one document per VFS node.
/// Every mutation is a single-document update, matching the atomicity
/// contract of [`FsBackend`].
pub struct MongoFsBackend {
    col: Collection<FsEntryDoc>,
}

impl MongoFsBackend {
    pub fn new(db: &Database) -> Self {
        MongoFsBackend {
            col: db.collection(ENTRIES_COLLECTION),
        }
    }

    fn return_after() -> FindOneAndUpdateOptions {
        FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build()
    }
}

#[async_trait]
impl FsBackend for MongoFsBackend {
    async fn root(&self) -> FsResult<Option<FsEntry>> {
        let doc = self
            .col
            .find_one(doc! { "type": KIND_DIRECTORY, "is_root": true }, None)
            .await
            .map_err(backend_err)?;
        doc.map(FsEntry::try_from).transpose()
    }

    async fn get(&self, id: ObjectId) -> FsResult<Option<FsEntry>> {
        let doc = self
            .col
            .find_one(doc! { "_id": id }, None)
            .await
            .map_err(backend_err)?;
        doc.map(FsEntry::try_from).transpose()
    }

    async fn get_touch_accessed(
        &self,
        id: ObjectId,
        now: DateTime<Utc>,
    ) -> FsResult<Option<FsEntry>> {
        let doc = self
            .col
            .find_one_and_update(
                doc! { "_id": id },
                doc! { "$set": { "timestamps.accessed_at": BsonDateTime::from_chrono(now) } },
                Self::return_after(),
            )
            .await
            .map_err(backend_err)?;
        doc.map(FsEntry::try_from).transpose()
    }

    async fn insert(&self, entry: &FsEntry) -> FsResult<()> {
        self.col
            .insert_one(FsEntryDoc::from(entry), None)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn set_file_ref(
        &self,
        id: ObjectId,
        file_ref: Option<ObjectId>,
        now: DateTime<Utc>,
    ) -> FsResult<Option<FsEntry>> {
        let now = BsonDateTime::from_chrono(now);
        let update = match file_ref {
            Some(file_ref) => doc! { "$set": {
                "file_ref": file_ref,
                "timestamps.modified_at": now,
                "timestamps.accessed_at": now,
            }},
            None => doc! {
                "$unset": { "file_ref": "" },
                "$set": {
                    "timestamps.modified_at": now,
                    "timestamps.accessed_at": now,
                },
            },
        };
        let doc = self
            .col
            .find_one_and_update(doc! { "_id": id }, update, Self::return_after())
            .await
            .map_err(backend_err)?;
        doc.map(FsEntry::try_from).transpose()
    }

    async fn link_child(
        &self,
        parent: ObjectId,
        name: &str,
        child: ObjectId,
        now: DateTime<Utc>,
    ) -> FsResult<()> {
        let now = BsonDateTime::from_chrono(now);
        let result = self
            .col
            .update_one(
                doc! { "_id": parent },
                doc! {
                    "$addToSet": { "entries": { "name": name, "ref_id": child } },
                    "$set": {
                        "timestamps.modified_at": now,
                        "timestamps.accessed_at": now,
                    },
                },
                None,
            )
            .await
            .map_err(backend_err)?;
        if result.matched_count == 0 {
            return Err(FsError::NotExist(format!("parent entry {parent}")));
        }
        Ok(())
    }

    async fn unlink_child(
        &self,
        parent: ObjectId,
        name: &str,
        now: DateTime<Utc>,
    ) -> FsResult<Option<FsEntry>> {
        let now = BsonDateTime::from_chrono(now);
        let doc = self
            .col
            .find_one_and_update(
                doc! { "_id": parent },
                doc! {
                    "$pull": { "entries": { "name": name } },
                    "$set": {
                        "timestamps.modified_at": now,
                        "timestamps.accessed_at": now,
                    },
                },
                Self::return_after(),
            )
            .await
            .map_err(backend_err)?;
        doc.map(FsEntry::try_from).transpose()
    }

    async fn delete(&self, id: ObjectId) -> FsResult<()> {
        self.col
            .delete_one(doc! { "_id": id }, None)
            .await
            .map_err(backend_err)?;
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
        let now = BsonDateTime::from_chrono(now);
        // the permission list is picked at runtime, so build the update
        // document by hand instead of with doc! literals
        let mut list_update = mongodb::bson::Document::new();
        list_update.insert(perm_field(mode), tag);
        let mut update = mongodb::bson::Document::new();
        let op_key = match op {
            PermOp::Add => "$addToSet",
            PermOp::Remove => "$pull",
        };
        update.insert(op_key, list_update);
        update.insert("$set", doc! { "timestamps.modified_at": now });
        let doc = self
            .col
            .find_one_and_update(doc! { "_id": id }, update, Self::return_after())
            .await
            .map_err(backend_err)?;
        doc.map(FsEntry::try_from).transpose()
    }
}

/// Blob content in a GridFS bucket. Uploads become visible only once the
/// stream is closed; the bucket allocates a fresh ObjectId per upload.
pub struct GridFsBlobStore {
    bucket: GridFsBucket,
}

impl GridFsBlobStore {
    pub fn new(db: &Database) -> Self {
        GridFsBlobStore {
            bucket: db.gridfs_bucket(None),
        }
    }
}

struct GridFsUpload {
    id: ObjectId,
    stream: GridFsUploadStream,
}

#[async_trait]
impl BlobUpload for GridFsUpload {
    fn id(&self) -> ObjectId {
        self.id
    }

    async fn write_all(&mut self, chunk: &[u8]) -> FsResult<()> {
        self.stream
            .write_all(chunk)
            .await
            .map_err(|e| FsError::Backend(e.to_string()))
    }

    async fn close(mut self: Box<Self>) -> FsResult<ObjectId> {
        self.stream
            .close()
            .await
            .map_err(|e| FsError::Backend(e.to_string()))?;
        Ok(self.id)
    }

    async fn abort(mut self: Box<Self>) -> FsResult<()> {
        self.stream.abort().await.map_err(backend_err)
    }
}

struct GridFsDownload {
    stream: GridFsDownloadStream,
}

#[async_trait]
impl BlobDownload for GridFsDownload {
    async fn read_chunk(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        self.stream
            .read(buf)
            .await
            .map_err(|e| FsError::Backend(e.to_string()))
    }
}

#[async_trait]
impl BlobStore for GridFsBlobStore {
    async fn open_upload(&self) -> FsResult<Box<dyn BlobUpload>> {
        let stream = self.bucket.open_upload_stream("", None);
        let id = stream
            .id()
            .as_object_id()
            .ok_or_else(|| FsError::Backend("gridfs allocated a non-ObjectId id".into()))?;
        Ok(Box::new(GridFsUpload { id, stream }))
    }

    async fn open_download(&self, id: ObjectId) -> FsResult<Box<dyn BlobDownload>> {
        let stream = self
            .bucket
            .open_download_stream(Bson::ObjectId(id))
            .await
            .map_err(backend_err)?;
        Ok(Box::new(GridFsDownload { stream }))
    }

    async fn size(&self, id: ObjectId) -> FsResult<u64> {
        let mut cursor = self
            .bucket
            .find(doc! { "_id": id }, None)
            .await
            .map_err(backend_err)?;
        let file = cursor
            .try_next()
            .await
            .map_err(backend_err)?
            .ok_or_else(|| FsError::NotExist(format!("blob {id}")))?;
        Ok(file.length)
    }
}
