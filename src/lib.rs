//! # Packstore
//!
//! A local-first store for XML documents, validation schemas, and the
//! schema packs that tie them to an editing mode.
//!
//! Packstore keeps every payload in a content-addressed chunk table and
//! every record as a named, versioned row over SQLite. Its centerpiece is
//! the pack matcher: given the top element of an XML document, it finds
//! the pack that should handle it, either from an explicit match rule or
//! by introspecting the pack's schema grammar for its possible root
//! elements.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐   ┌───────────────┐   ┌──────────┐
//! │ Typed services │──▶│ Record store   │──▶│  SQLite   │
//! │ xml/schema/   │   │ + chunk store  │   │   WAL    │
//! │ metadata/pack │   └───────┬───────┘   └──────────┘
//! └───────┬───────┘           │ change events
//!         ▼                   ▼
//! ┌───────────────┐   ┌───────────────┐
//! │ Pack matcher  │◀──│ Derived cache  │
//! │ (top element) │   │ (invalidated)  │
//! └───────────────┘   └───────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! packstore init                        # create database
//! packstore import schema tei.rng       # store a schema
//! packstore import pack tei-pack.json   # store a pack
//! packstore match TEI --ns http://www.tei-c.org/ns/1.0
//! packstore dump --out snapshot.json    # full database export
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`chunk`] | Content-addressed chunk storage |
//! | [`records`] | Generic CRUD over record tables |
//! | [`models`] | Stored record types |
//! | [`xml_files`] | XML document service |
//! | [`schemas`] | Schema service |
//! | [`metadata`] | Mode-metadata service |
//! | [`packs`] | Pack service and matching engine |
//! | [`grammar`] | Schema-grammar root introspection |
//! | [`dump`] | Whole-database dump and load |
//! | [`upgrade`] | Record-version upgrades |
//! | [`confirm`] | User-decision strategies |
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod confirm;
pub mod db;
pub mod dump;
pub mod error;
pub mod grammar;
pub mod metadata;
pub mod migrate;
pub mod models;
pub mod packs;
pub mod records;
pub mod schemas;
pub mod upgrade;
pub mod xml_files;
