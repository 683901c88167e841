//! PostgreSQL database integration
//!
//! This module provides the production backend: visits and the collaborator
//! tables in one PostgreSQL database, with every write batch committed as a
//! single transaction.

pub mod adapter;
pub mod client;
pub mod models;

pub use adapter::PostgreSQLAdapter;
pub use client::PostgreSQLClient;
pub use models::PostgreSQLVisit;
