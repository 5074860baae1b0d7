use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;

use crate::session::events::Broadcaster;
use crate::session::mailbox::{Mailbox, MailboxReceiver};
use crate::vfs::error::FsResult;
use crate::vfs::open::{ReadHandle, WriteHandle};

pub type Chunk = Vec<u8>;

/// Which client-facing stream a chunk belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Stdout,
    Stderr,
}

/// One chunk of command output, broadcast to whoever taps the command
/// (the frame writer, the session tracker).
#[derive(Debug, Clone)]
pub struct OutputEvent {
    pub kind: OutputKind,
    pub chunk: Chunk,
}

/// The shared environment of one client, mutable by builtins (`cd` updates
/// `PWD`). The client runtime diffs it after each command to propagate
/// `set_env` frames.
#[derive(Clone, Default)]
pub struct EnvMap {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

impl EnvMap {
    pub fn from_map(map: HashMap<String, String>) -> Self {
        EnvMap {
            inner: Arc::new(Mutex::new(map)),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.lock().unwrap().get(key).cloned()
    }

    pub fn set(&self, key: &str, value: &str) {
        self.inner
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    pub fn merge(&self, other: &HashMap<String, String>) {
        let mut inner = self.inner.lock().unwrap();
        for (k, v) in other {
            inner.insert(k.clone(), v.clone());
        }
    }

    pub fn snapshot(&self) -> HashMap<String, String> {
        self.inner.lock().unwrap().clone()
    }
}

enum InputSource {
    Closed,
    Pipe(MailboxReceiver<Chunk>),
    File(ReadHandle),
}

/// A builtin's stdin: chunks from the client, from an upstream pipeline
/// stage, or from a `<` redirection.
pub struct InputStream {
    source: InputSource,
}

impl InputStream {
    pub fn closed() -> Self {
        InputStream {
            source: InputSource::Closed,
        }
    }

    pub fn from_pipe(rx: MailboxReceiver<Chunk>) -> Self {
        InputStream {
            source: InputSource::Pipe(rx),
        }
    }

    pub fn from_file(handle: ReadHandle) -> Self {
        InputStream {
            source: InputSource::File(handle),
        }
    }

    /// Next chunk, or None at end of stream.
    pub async fn read_chunk(&mut self) -> FsResult<Option<Chunk>> {
        match &mut self.source {
            InputSource::Closed => Ok(None),
            InputSource::Pipe(rx) => Ok(rx.recv().await),
            InputSource::File(handle) => {
                let mut buf = vec![0u8; 4096];
                let n = handle.read_chunk(&mut buf).await?;
                if n == 0 {
                    return Ok(None);
                }
                buf.truncate(n);
                Ok(Some(buf))
            }
        }
    }

    pub async fn read_to_end(&mut self) -> FsResult<Chunk> {
        let mut out = Vec::new();
        while let Some(chunk) = self.read_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }
}

enum OutputTarget {
    Discard,
    Pipe(Mailbox<Chunk>),
    Tap {
        events: Broadcaster<OutputEvent>,
        kind: OutputKind,
    },
    File(Arc<AsyncMutex<Option<WriteHandle>>>),
}

/// A builtin's stdout or stderr: into the next pipeline stage, out to the
/// client as framed chunks, or into a `>`/`>>` redirection target.
pub struct OutputStream {
    target: OutputTarget,
}

impl OutputStream {
    pub fn discard() -> Self {
        OutputStream {
            target: OutputTarget::Discard,
        }
    }

    pub fn to_pipe(tx: Mailbox<Chunk>) -> Self {
        OutputStream {
            target: OutputTarget::Pipe(tx),
        }
    }

    pub fn to_tap(events: Broadcaster<OutputEvent>, kind: OutputKind) -> Self {
        OutputStream {
            target: OutputTarget::Tap { events, kind },
        }
    }

    pub fn to_file(handle: WriteHandle) -> Self {
        OutputStream {
            target: OutputTarget::File(Arc::new(AsyncMutex::new(Some(handle)))),
        }
    }

    pub async fn write(&self, chunk: &[u8]) -> FsResult<()> {
        match &self.target {
            OutputTarget::Discard => Ok(()),
            OutputTarget::Pipe(tx) => {
                // a dropped downstream consumer just swallows the bytes
                tx.send(chunk.to_vec());
                Ok(())
            }
            OutputTarget::Tap { events, kind } => {
                events.emit(OutputEvent {
                    kind: *kind,
                    chunk: chunk.to_vec(),
                });
                Ok(())
            }
            OutputTarget::File(handle) => {
                let mut guard = handle.lock().await;
                match guard.as_mut() {
                    Some(writer) => writer.write_all(chunk).await,
                    None => Ok(()),
                }
            }
        }
    }

    pub async fn write_str(&self, s: &str) -> FsResult<()> {
        self.write(s.as_bytes()).await
    }

    /// Flush and seal the stream: closes a pipe so downstream sees EOF, and
    /// finalizes a file redirection (upload close + directory link).
    pub async fn finish(&mut self) -> FsResult<()> {
        let target = std::mem::replace(&mut self.target, OutputTarget::Discard);
        match target {
            OutputTarget::Discard | OutputTarget::Tap { .. } => Ok(()),
            OutputTarget::Pipe(tx) => {
                tx.close();
                Ok(())
            }
            OutputTarget::File(handle) => {
                let writer = handle.lock().await.take();
                if let Some(writer) = writer {
                    writer.close().await?;
                }
                Ok(())
            }
        }
    }
}
