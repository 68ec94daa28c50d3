//! Snippet store and document resolution.
//!
//! The store is a generic string→string key-value collaborator: ingestion
//! writes one tab-separated snippet record per document, the resolver reads
//! them back by document hash. The store synchronises internally
//! (single-writer, multi-reader), so handles are shared freely.

use std::path::Path;

/// Key for a document's snippet record.
pub fn doc_key(doc_hash: u64) -> String {
    format!("{:016x}", doc_hash)
}

/// String→string store contract.
pub trait SnippetStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, sled::Error>;
    fn put(&self, key: &str, value: &str) -> Result<(), sled::Error>;
}

/// Embedded store backed by sled.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open(path: &Path) -> Result<Self, sled::Error> {
        Ok(Self {
            db: sled::open(path)?,
        })
    }

    pub fn flush(&self) -> Result<(), sled::Error> {
        self.db.flush()?;
        Ok(())
    }
}

impl SnippetStore for SledStore {
    fn get(&self, key: &str) -> Result<Option<String>, sled::Error> {
        let value = self.db.get(key.as_bytes())?;
        Ok(value.map(|v| String::from_utf8_lossy(&v).into_owned()))
    }

    fn put(&self, key: &str, value: &str) -> Result<(), sled::Error> {
        self.db.insert(key.as_bytes(), value.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_round_trip() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(&dir.path().join("snippets")).unwrap();
        store
            .put(&doc_key(42), "http://a.com/\ttitle\t\t\tbody\tC-01")
            .unwrap();
        assert_eq!(
            store.get(&doc_key(42)).unwrap().as_deref(),
            Some("http://a.com/\ttitle\t\t\tbody\tC-01")
        );
        assert_eq!(store.get(&doc_key(43)).unwrap(), None);
    }

    #[test]
    fn test_key_format() {
        assert_eq!(doc_key(0xff), "00000000000000ff");
    }
}
