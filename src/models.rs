//! The record types stored by the dashboard.
//!
//! Serialized field names are camelCase because the JSON `data` column,
//! the database dump, and the pack interchange format all share one
//! shape. XML documents, schemas, and metadata each reference exactly one
//! chunk as their payload; packs reference a schema chunk and optionally
//! a metadata chunk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::records::Record;

pub const XML_FILE_RECORD_VERSION: i64 = 1;
pub const SCHEMA_RECORD_VERSION: i64 = 1;
pub const METADATA_RECORD_VERSION: i64 = 1;
/// Version 1 packs predate the match rule and are migrated away by the
/// upgrade pass.
pub const PACK_RECORD_VERSION: i64 = 2;

/// How a pack matches an XML document's top element.
///
/// Empty `local_name` and `namespace_uri` mean the pack's applicability
/// is derived from its schema's grammar instead of a literal pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSpecification {
    pub method: MatchMethod,
    #[serde(rename = "localName")]
    pub local_name: String,
    #[serde(rename = "namespaceURI")]
    pub namespace_uri: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchMethod {
    #[serde(rename = "top-element")]
    TopElement,
}

impl Default for MatchSpecification {
    fn default() -> Self {
        Self {
            method: MatchMethod::TopElement,
            local_name: String::new(),
            namespace_uri: String::new(),
        }
    }
}

impl MatchSpecification {
    /// An automatic rule derives its keys from the schema grammar.
    pub fn is_automatic(&self) -> bool {
        self.local_name.is_empty()
    }
}

/// A stored XML document. The payload lives in the referenced chunk; the
/// optional `pack` field is the manual pack association.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XmlFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
    pub record_version: i64,
    /// Content digest of the backing chunk.
    pub chunk: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pack: Option<i64>,
    /// `None` means "never".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloaded: Option<DateTime<Utc>>,
}

impl XmlFile {
    pub fn new(name: impl Into<String>, chunk: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            record_version: XML_FILE_RECORD_VERSION,
            chunk: chunk.into(),
            pack: None,
            uploaded: None,
            downloaded: None,
        }
    }
}

impl Record for XmlFile {
    const TABLE: &'static str = "xmlfiles";
    const INDEXED: &'static [&'static str] = &["pack"];

    fn id(&self) -> Option<i64> {
        self.id
    }
    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn set_name(&mut self, name: String) {
        self.name = name;
    }
    fn record_version(&self) -> i64 {
        self.record_version
    }
    fn indexed_value(&self, column: &str) -> Option<i64> {
        match column {
            "pack" => self.pack,
            _ => None,
        }
    }
}

/// A stored validation schema; the grammar text lives in the chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
    pub record_version: i64,
    pub chunk: String,
}

impl Schema {
    pub fn new(name: impl Into<String>, chunk: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            record_version: SCHEMA_RECORD_VERSION,
            chunk: chunk.into(),
        }
    }
}

impl Record for Schema {
    const TABLE: &'static str = "schemas";

    fn id(&self) -> Option<i64> {
        self.id
    }
    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn set_name(&mut self, name: String) {
        self.name = name;
    }
    fn record_version(&self) -> i64 {
        self.record_version
    }
}

/// Stored editing-mode metadata; the serialized form lives in the chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
    pub record_version: i64,
    pub chunk: String,
}

impl Metadata {
    pub fn new(name: impl Into<String>, chunk: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            record_version: METADATA_RECORD_VERSION,
            chunk: chunk.into(),
        }
    }
}

impl Record for Metadata {
    const TABLE: &'static str = "metadata";

    fn id(&self) -> Option<i64> {
        self.id
    }
    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn set_name(&mut self, name: String) {
        self.name = name;
    }
    fn record_version(&self) -> i64 {
        self.record_version
    }
}

/// A bundle tying a schema, optional metadata, an editing mode, and a
/// match rule together. `schema` and `metadata` hold chunk ids in the
/// database; the interchange form inlines their text instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pack {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
    pub record_version: i64,
    pub schema: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    pub mode: String,
    #[serde(rename = "match")]
    pub match_spec: MatchSpecification,
}

impl Pack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            record_version: PACK_RECORD_VERSION,
            schema: String::new(),
            metadata: None,
            mode: String::new(),
            match_spec: MatchSpecification::default(),
        }
    }
}

impl Record for Pack {
    const TABLE: &'static str = "packs";

    fn id(&self) -> Option<i64> {
        self.id
    }
    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn set_name(&mut self, name: String) {
        self.name = name;
    }
    fn record_version(&self) -> i64 {
        self.record_version
    }
}
