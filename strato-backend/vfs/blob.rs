use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mongodb::bson::oid::ObjectId;

use super::error::{FsError, FsResult};

pub type BlobId = ObjectId;

/// An in-flight upload. The blob becomes readable only once `close`
/// succeeds; ids are never reused, so content under a given id is fixed
/// forever. Overwriting a file means uploading a fresh blob and swapping
/// the file's reference.
#[async_trait]
pub trait BlobUpload: Send {
    fn id(&self) -> BlobId;

    async fn write_all(&mut self, chunk: &[u8]) -> FsResult<()>;

    /// Finalize the upload and return the blob id.
    async fn close(self: Box<Self>) -> FsResult<BlobId>;

    /// Discard the upload; the id is wasted, nothing becomes readable.
    async fn abort(self: Box<Self>) -> FsResult<()>;
}

#[async_trait]
pub trait BlobDownload: Send {
    /// Read the next chunk into `buf`. Returns 0 at end of stream.
    async fn read_chunk(&mut self, buf: &mut [u8]) -> FsResult<usize>;

    async fn read_to_end(&mut self) -> FsResult<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = self.read_chunk(&mut buf).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }
}

/// Content-addressed blob storage: open-for-write allocating a fresh id,
/// open-for-read by id.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn open_upload(&self) -> FsResult<Box<dyn BlobUpload>>;

    async fn open_download(&self, id: BlobId) -> FsResult<Box<dyn BlobDownload>>;

    /// Stored size in bytes of a finalized blob.
    async fn size(&self, id: BlobId) -> FsResult<u64>;
}

/// A download over bytes already in memory. Doubles as the "empty file"
/// stream for entries with no blob reference.
pub struct BufferedDownload {
    data: Vec<u8>,
    pos: usize,
}

impl BufferedDownload {
    pub fn new(data: Vec<u8>) -> Self {
        BufferedDownload { data, pos: 0 }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl BlobDownload for BufferedDownload {
    async fn read_chunk(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        if self.pos >= self.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// In-memory blob store for tests and local development.
#[derive(Default, Clone)]
pub struct MemBlobStore {
    blobs: Arc<Mutex<HashMap<BlobId, Vec<u8>>>>,
}

impl MemBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

struct MemUpload {
    id: BlobId,
    buffer: Vec<u8>,
    blobs: Arc<Mutex<HashMap<BlobId, Vec<u8>>>>,
}

#[async_trait]
impl BlobUpload for MemUpload {
    fn id(&self) -> BlobId {
        self.id
    }

    async fn write_all(&mut self, chunk: &[u8]) -> FsResult<()> {
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }

    async fn close(self: Box<Self>) -> FsResult<BlobId> {
        let mut blobs = self.blobs.lock().unwrap();
        blobs.insert(self.id, self.buffer);
        Ok(self.id)
    }

    async fn abort(self: Box<Self>) -> FsResult<()> {
        Ok(())
    }
}

#[async_trait]
impl BlobStore for MemBlobStore {
    async fn open_upload(&self) -> FsResult<Box<dyn BlobUpload>> {
        Ok(Box::new(MemUpload {
            id: ObjectId::new(),
            buffer: Vec::new(),
            blobs: self.blobs.clone(),
        }))
    }

    async fn open_download(&self, id: BlobId) -> FsResult<Box<dyn BlobDownload>> {
        let blobs = self.blobs.lock().unwrap();
        let data = blobs
            .get(&id)
            .cloned()
            .ok_or_else(|| FsError::NotExist(format!("blob {id}")))?;
        Ok(Box::new(BufferedDownload::new(data)))
    }

    async fn size(&self, id: BlobId) -> FsResult<u64> {
        let blobs = self.blobs.lock().unwrap();
        blobs
            .get(&id)
            .map(|b| b.len() as u64)
            .ok_or_else(|| FsError::NotExist(format!("blob {id}")))
    }
}
