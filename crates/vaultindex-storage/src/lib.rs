//! vaultindex-storage: storage backends for VaultIndex.
//!
//! Both backends implement [`vaultindex_core::Storage`] with the same upsert
//! semantics, driven by each row type's [`vaultindex_core::Record`] policy.
//!
//! | Backend | Feature | Use |
//! |---------|---------|-----|
//! | [`InMemoryStorage`] | `memory` (default) | tests, dry runs |
//! | [`PostgresStorage`] | `postgres` | production |

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::{InMemoryStorage, MemorySnapshot};
#[cfg(feature = "postgres")]
pub use postgres::{PostgresOptions, PostgresStorage};
