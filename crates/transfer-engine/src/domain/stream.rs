//! Shared body streams for requests and responses.
//!
//! A [`Stream`] is a cheap-clone handle: every clone reads and writes the same
//! underlying buffer, file or reader. Responses hand their body around this
//! way so a listener that keeps a response sees the bytes the mediator writes.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

enum Backend {
    Memory(Cursor<Vec<u8>>),
    File(File),
    /// Opened (truncating) on first write.
    Lazy { path: PathBuf, file: Option<File> },
    Reader {
        reader: Box<dyn Read + Send>,
        size: Option<u64>,
    },
}

/// A readable, writable body stream.
#[derive(Clone)]
pub struct Stream {
    inner: Arc<Mutex<Backend>>,
}

impl Stream {
    fn from_backend(backend: Backend) -> Self {
        Self {
            inner: Arc::new(Mutex::new(backend)),
        }
    }

    /// An empty in-memory buffer.
    pub fn empty() -> Self {
        Self::from_bytes(Vec::new())
    }

    /// An in-memory buffer positioned at its start.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::from_backend(Backend::Memory(Cursor::new(bytes.into())))
    }

    pub fn from_file(file: File) -> Self {
        Self::from_backend(Backend::File(file))
    }

    /// Open an existing file for reading.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        File::open(path).map(Self::from_file)
    }

    /// A file destination created and truncated on the first write.
    pub fn lazy_file(path: impl Into<PathBuf>) -> Self {
        Self::from_backend(Backend::Lazy {
            path: path.into(),
            file: None,
        })
    }

    /// A forward-only stream over `reader`. `size` is the length when known.
    pub fn from_reader(reader: impl Read + Send + 'static, size: Option<u64>) -> Self {
        Self::from_backend(Backend::Reader {
            reader: Box::new(reader),
            size,
        })
    }

    /// Total size in bytes, when it can be determined.
    pub fn size(&self) -> Option<u64> {
        match &*self.inner.lock() {
            Backend::Memory(c) => Some(c.get_ref().len() as u64),
            Backend::File(f) => f.metadata().ok().map(|m| m.len()),
            Backend::Lazy { file, .. } => file.as_ref().and_then(|f| f.metadata().ok()).map(|m| m.len()),
            Backend::Reader { size, .. } => *size,
        }
    }

    pub fn is_seekable(&self) -> bool {
        !matches!(&*self.inner.lock(), Backend::Reader { .. })
    }

    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut *self.inner.lock() {
            Backend::Memory(c) => c.read(buf),
            Backend::File(f) => f.read(buf),
            Backend::Lazy { file, .. } => match file {
                Some(f) => f.read(buf),
                None => Ok(0),
            },
            Backend::Reader { reader, .. } => reader.read(buf),
        }
    }

    /// Write all of `data`, returning its length.
    pub fn write(&self, data: &[u8]) -> io::Result<usize> {
        match &mut *self.inner.lock() {
            Backend::Memory(c) => c.write_all(data)?,
            Backend::File(f) => f.write_all(data)?,
            Backend::Lazy { path, file } => {
                if file.is_none() {
                    *file = Some(
                        OpenOptions::new()
                            .read(true)
                            .write(true)
                            .create(true)
                            .truncate(true)
                            .open(&*path)?,
                    );
                }
                if let Some(f) = file {
                    f.write_all(data)?;
                }
            }
            Backend::Reader { .. } => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "stream is read-only",
                ))
            }
        }
        Ok(data.len())
    }

    pub fn rewind(&self) -> io::Result<()> {
        match &mut *self.inner.lock() {
            Backend::Memory(c) => c.seek(SeekFrom::Start(0)).map(drop),
            Backend::File(f) => f.seek(SeekFrom::Start(0)).map(drop),
            Backend::Lazy { file, .. } => match file {
                Some(f) => f.seek(SeekFrom::Start(0)).map(drop),
                None => Ok(()),
            },
            Backend::Reader { .. } => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "stream is not seekable",
            )),
        }
    }

    /// Read the whole stream. Seekable streams are rewound first; forward-only
    /// streams yield whatever has not been consumed yet.
    pub fn contents(&self) -> io::Result<Vec<u8>> {
        if self.is_seekable() {
            self.rewind()?;
        }
        let mut out = Vec::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = self.read(&mut buf)?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        Ok(out)
    }

    /// [`contents`](Self::contents) decoded as UTF-8, lossily.
    pub fn text(&self) -> io::Result<String> {
        self.contents()
            .map(|b| String::from_utf8_lossy(&b).into_owned())
    }

    /// Whether both handles refer to the same underlying stream.
    pub fn ptr_eq(&self, other: &Stream) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Stream {
    fn default() -> Self {
        Self::empty()
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Stream::read(self, buf)
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Stream::write(self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut *self.inner.lock() {
            Backend::File(f) => f.flush(),
            Backend::Lazy { file: Some(f), .. } => f.flush(),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &*self.inner.lock() {
            Backend::Memory(_) => "memory",
            Backend::File(_) => "file",
            Backend::Lazy { .. } => "lazy-file",
            Backend::Reader { .. } => "reader",
        };
        f.debug_struct("Stream")
            .field("kind", &kind)
            .field("size", &self.size())
            .finish()
    }
}

impl From<&str> for Stream {
    fn from(s: &str) -> Self {
        Stream::from_bytes(s.as_bytes().to_vec())
    }
}

impl From<String> for Stream {
    fn from(s: String) -> Self {
        Stream::from_bytes(s.into_bytes())
    }
}

impl From<Vec<u8>> for Stream {
    fn from(b: Vec<u8>) -> Self {
        Stream::from_bytes(b)
    }
}
