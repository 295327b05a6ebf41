//! # What is Ordo?
//!
//! Ordo keeps the taxonomy that trading strategies and strategy templates are filed under. A
//! category has a name, an optional parent, tags, a visibility and two flags: `isSystem` for
//! categories the platform seeded (these can be archived but never deleted) and `archived` for
//! categories hidden from default listings. The hierarchy is stored flat, each record pointing at
//! its parent, and trees are assembled on read.
//!
//! # Implementation
//!
//! - A store, [Store](crate::store::Store), with an in-memory and a postgres adapter. The store
//! applies the rules that only need one record: names, parents that exist, the delete policy.
//! - The service, [CategoryService](crate::service::CategoryService), which adds the rules that
//! need a view over many records (sibling name uniqueness, re-parenting cycles) and builds the
//! tree and statistics projections.
//! - The migration, [Migration](crate::migration::Migration), a one-shot job that moves templates
//! off the legacy template category collection onto categories, matching by name.
//! - The JSON server in [http](crate::http) and the client in
//! [CategoryClient](crate::client::category::CategoryClient), which documents how the server is
//! called as much as anything else.
//!
//! The store handle is built once at startup and passed to the service and the migration. There
//! is no module-level state.
//!
//! ``
//! cargo run --bin category_server [ipv4_address] [port]
//! cargo run --bin migrate_categories [--verify]
//! ``
//!
//! Both binaries read `config/ordo.toml` if present and `ORDO__*` environment variables, see
//! [Settings](crate::config::Settings).
pub mod catalog;
pub mod category;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod migration;
pub mod seed;
pub mod service;
pub mod store;
