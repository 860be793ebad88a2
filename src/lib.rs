//! uspark-sync - Project Document Synchronization Engine
//!
//! Connects hosted projects to GitHub repositories using:
//! - Automerge CRDTs as the durable project snapshot format
//! - Sled embedded database for project records and sync history
//! - The GitHub Git Data API for one-way content pushes
//! - A local pull mirror shared by CLI-style and MCP consumers

pub mod blob;
pub mod github;
pub mod mirror;
pub mod storage;
pub mod sync;
