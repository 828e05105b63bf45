// src/store.rs
//! In-memory document store
//!
//! Named collections of documents, handed to the pipeline runner
//! explicitly (no ambient database handle). Loading mutates through
//! `&mut self`; runs only ever take `&self`, so concurrent readers are
//! safe as long as no writer runs at the same time.

use crate::document::Document;
use ahash::AHashMap;

/// Named, ordered sets of documents
#[derive(Debug, Default)]
pub struct DocumentStore {
    collections: AHashMap<String, Vec<Document>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        DocumentStore {
            collections: AHashMap::new(),
        }
    }

    /// Insert or replace a named collection
    pub fn insert_collection(&mut self, name: impl Into<String>, docs: Vec<Document>) {
        self.collections.insert(name.into(), docs);
    }

    /// Documents of a collection, in load order
    pub fn collection(&self, name: &str) -> Option<&[Document]> {
        self.collections.get(name).map(|docs| docs.as_slice())
    }

    /// Names of all held collections
    pub fn collection_names(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(|s| s.as_str())
    }
}
