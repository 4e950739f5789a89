//! # farmgate-database
//!
//! Persistence for Farmgate: the store traits the engine is written
//! against, an in-memory implementation used by tests and embedded
//! deployments, and the PostgreSQL implementation with its migrations.

pub mod connection;
pub mod memory;
pub mod migration;
pub mod repositories;
pub mod retry;
pub mod store;

pub use connection::DatabasePool;
pub use memory::{MemoryStore, MemoryUserDirectory};
pub use repositories::{PgStore, PgUserDirectory};
pub use retry::retry_read;
pub use store::{
    AcceptInvitation, AnalyticsStore, AuditStore, BulkInvitationStore, GrantChange, GrantStore,
    GrantWrite, InvitationStore, InvitationWrite, PermissionRequestStore, RequestWrite, Stores,
};
