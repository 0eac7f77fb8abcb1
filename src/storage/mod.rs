//! Embedded storage engine.
//!
//! Tenant isolation is enforced here, below every application call: each
//! authenticated connection carries trusted settings (`app.user_id`,
//! `app.workspace_id`) and every statement against a protected table is
//! filtered and checked by the installed row-level policies. Service
//! connections bypass the policies and are handed out only through
//! [`crate::session::ServiceSession`].

pub mod connection;
pub mod engine;
pub mod mutation;
pub mod policy;
pub mod pool;
pub mod schema;
pub mod settings;

pub use connection::{Connection, ConnectionRole};
pub use engine::Engine;
pub use mutation::Mutation;
pub use policy::{PolicyExpr, PolicySet, SETTING_USER_ID, SETTING_WORKSPACE_ID, TablePolicy};
pub use pool::{ConnectionPool, PoolKind, PoolStatus, PooledConnection};
pub use schema::{Mutability, Record, RowView, TableName, TableRow, Tables};
pub use settings::SessionSettings;

use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
