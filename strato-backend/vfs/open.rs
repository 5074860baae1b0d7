use mongodb::bson::oid::ObjectId;

use super::blob::{BlobDownload, BlobUpload, BufferedDownload};
use super::error::{FsError, FsResult};
use super::path;
use super::store::FsStore;
use super::types::{AccessMode, FsEntry};

/// Open flags for the VFS facade. Write streams always upload a fresh blob;
/// without `append` the previous content is replaced on close (truncate
/// semantics), with `append` it is copied into the new blob first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub excl: bool,
    pub append: bool,
}

impl OpenFlags {
    pub fn read_only() -> Self {
        OpenFlags {
            read: true,
            ..Default::default()
        }
    }

    pub fn write_only() -> Self {
        OpenFlags {
            write: true,
            ..Default::default()
        }
    }

    pub fn create(mut self) -> Self {
        self.create = true;
        self
    }

    pub fn excl(mut self) -> Self {
        self.excl = true;
        self
    }

    pub fn append(mut self) -> Self {
        self.append = true;
        self
    }
}

pub struct ReadHandle {
    download: Box<dyn BlobDownload>,
}

impl ReadHandle {
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        self.download.read_chunk(buf).await
    }

    pub async fn read_to_end(&mut self) -> FsResult<Vec<u8>> {
        self.download.read_to_end().await
    }
}

/// A pending write. Bytes stream into a fresh blob; on `close` the blob is
/// finalized and linked into the destination parent in one `write_file`
/// call, so a half-written file never becomes visible.
pub struct WriteHandle {
    upload: Box<dyn BlobUpload>,
    store: FsStore,
    tags: Option<Vec<String>>,
    parent_id: ObjectId,
    name: String,
}

impl WriteHandle {
    pub async fn write_all(&mut self, chunk: &[u8]) -> FsResult<()> {
        self.upload.write_all(chunk).await
    }

    pub async fn close(self) -> FsResult<FsEntry> {
        let blob_id = self.upload.close().await?;
        self.store
            .write_file(self.tags.as_deref(), self.parent_id, &self.name, Some(blob_id))
            .await
    }

    pub async fn abort(self) -> FsResult<()> {
        self.upload.abort().await
    }
}

pub enum FileHandle {
    Read(ReadHandle),
    Write(WriteHandle),
    ReadWrite(ReadHandle, WriteHandle),
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileHandle::Read(_) => f.write_str("FileHandle::Read(..)"),
            FileHandle::Write(_) => f.write_str("FileHandle::Write(..)"),
            FileHandle::ReadWrite(_, _) => f.write_str("FileHandle::ReadWrite(..)"),
        }
    }
}

impl FileHandle {
    pub fn into_read(self) -> Option<ReadHandle> {
        match self {
            FileHandle::Read(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_write(self) -> Option<WriteHandle> {
        match self {
            FileHandle::Write(w) => Some(w),
            _ => None,
        }
    }
}

/// Resolve `file_path` against `cwd` and open it under the caller's tags.
pub async fn open(
    store: &FsStore,
    tags: Option<&[String]>,
    cwd: &str,
    file_path: &str,
    flags: OpenFlags,
) -> FsResult<FileHandle> {
    let abs = path::abs_path(cwd, file_path)?;
    let (folder_path, name) = path::dir_up(&abs)?;

    let parent = store.lookup(tags, &folder_path).await?;
    if !parent.is_dir() {
        return Err(FsError::Invalid(format!("{folder_path} is not a directory")));
    }
    if !parent.permissions.is_allowed(AccessMode::Execute, tags) {
        return Err(FsError::AccessDenied(folder_path.clone()));
    }

    match (flags.read, flags.write) {
        (true, false) => Ok(FileHandle::Read(
            open_read(store, tags, &parent, &name, &abs).await?,
        )),
        (false, true) => Ok(FileHandle::Write(
            open_write(store, tags, &parent, &name, &abs, flags).await?,
        )),
        (true, true) => {
            let read = open_read(store, tags, &parent, &name, &abs).await?;
            let write = open_write(store, tags, &parent, &name, &abs, flags).await?;
            Ok(FileHandle::ReadWrite(read, write))
        }
        (false, false) => Err(FsError::Invalid(
            "open requires read or write access".into(),
        )),
    }
}

async fn open_read(
    store: &FsStore,
    tags: Option<&[String]>,
    parent: &FsEntry,
    name: &str,
    abs: &str,
) -> FsResult<ReadHandle> {
    let child_id = parent
        .child(name)
        .map(|r| r.ref_id)
        .ok_or_else(|| FsError::NotExist(abs.to_string()))?;
    let entry = store
        .get_entry(child_id)
        .await?
        .ok_or_else(|| FsError::NotExist(abs.to_string()))?;
    if entry.is_dir() {
        return Err(FsError::Invalid(format!("{abs} is a directory")));
    }
    if !entry.permissions.is_allowed(AccessMode::Read, tags) {
        return Err(FsError::AccessDenied(abs.to_string()));
    }

    let download: Box<dyn BlobDownload> = match entry.file_ref {
        None => Box::new(BufferedDownload::empty()),
        Some(id) => store.blobs().open_download(id).await?,
    };
    Ok(ReadHandle { download })
}

async fn open_write(
    store: &FsStore,
    tags: Option<&[String]>,
    parent: &FsEntry,
    name: &str,
    abs: &str,
    flags: OpenFlags,
) -> FsResult<WriteHandle> {
    let existing = parent.child(name).map(|r| r.ref_id);
    if existing.is_none() && !flags.create {
        return Err(FsError::NotExist(abs.to_string()));
    }
    if existing.is_some() && flags.excl {
        return Err(FsError::Exist(abs.to_string()));
    }

    let mut upload = store.blobs().open_upload().await?;

    if flags.append {
        if let Some(id) = existing {
            let entry = store
                .get_entry(id)
                .await?
                .ok_or_else(|| FsError::NotExist(abs.to_string()))?;
            if entry.is_dir() {
                return Err(FsError::Invalid(format!("{abs} is a directory")));
            }
            if let Some(blob_id) = entry.file_ref {
                let mut download = store.blobs().open_download(blob_id).await?;
                let mut buf = [0u8; 4096];
                loop {
                    let n = download.read_chunk(&mut buf).await?;
                    if n == 0 {
                        break;
                    }
                    upload.write_all(&buf[..n]).await?;
                }
            }
        }
    }

    Ok(WriteHandle {
        upload,
        store: store.clone(),
        tags: tags.map(|t| t.to_vec()),
        parent_id: parent.id,
        name: name.to_string(),
    })
}
