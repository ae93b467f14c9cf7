//! Owned module buffers
//!
//! The bytes a module was loaded from are held in one reference-counted
//! allocation. The loader hands the handle to the reconstructed module, so
//! the buffer lives exactly as long as the module that references it.

use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::sync::{Arc, Weak};

/// Immutable, shared byte buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedBuffer(Arc<[u8]>);

/// Non-owning handle to an [`OwnedBuffer`]
#[derive(Debug, Clone)]
pub struct WeakBuffer(Weak<[u8]>);

impl OwnedBuffer {
    /// Take ownership of `bytes`
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self(Arc::from(bytes))
    }

    /// Read a whole file
    pub fn read_file(path: &Path) -> io::Result<Self> {
        let bytes = fs::read(path)?;
        tracing::debug!(
            target: "kiln::serialize",
            path = %path.display(),
            bytes = bytes.len(),
            "Read module file"
        );
        Ok(Self::from_vec(bytes))
    }

    /// Read a reader to end of stream
    pub fn read_from(mut reader: impl Read) -> io::Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Ok(Self::from_vec(bytes))
    }

    /// The bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Weak handle that does not keep the bytes alive
    pub fn downgrade(&self) -> WeakBuffer {
        WeakBuffer(Arc::downgrade(&self.0))
    }
}

impl From<Vec<u8>> for OwnedBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_vec(bytes)
    }
}

impl AsRef<[u8]> for OwnedBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl WeakBuffer {
    /// Whether some owner still holds the bytes
    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_file_and_stream() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"kiln bytes").unwrap();
        let from_file = OwnedBuffer::read_file(file.path()).unwrap();
        let from_stream = OwnedBuffer::read_from(&b"kiln bytes"[..]).unwrap();
        assert_eq!(from_file, from_stream);
        assert_eq!(from_file.len(), 10);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = OwnedBuffer::read_file(&dir.path().join("absent.kmb")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_freed_with_last_owner() {
        let buffer = OwnedBuffer::from_vec(vec![1, 2, 3]);
        let weak = buffer.downgrade();
        let clone = buffer.clone();
        drop(buffer);
        assert!(weak.is_alive());
        drop(clone);
        assert!(!weak.is_alive());
    }
}
