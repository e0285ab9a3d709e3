//! # Tessera Core
//!
//! The reactive synchronization pipeline of the Tessera control plane.
//!
//! ## Architecture
//!
//! ```text
//!  admin writes (REST / CLI)
//!           │
//!           ▼
//! ┌──────────────────────┐  watch(/tessera/edges/)  ┌──────────────┐
//! │ store (KvStore)      │ ───────────────────────▶ │ EdgeManager  │──┐
//! │  Postgres | Memory   │  watch(/tessera/routes/) ├──────────────┤  │ Change<T>
//! │                      │ ───────────────────────▶ │ RouteManager │──┤
//! └──────────────────────┘                          └──────────────┘  ▼
//!                                                   ┌──────────────────────┐
//!                                                   │ RegistryServer       │
//!                                                   │  TopologyCache       │
//!                                                   │  sessions ──▶ agents │
//!                                                   └──────────────────────┘
//! ```
//!
//! - [`store`] - consistent store client with prefix watch and compare-and-write
//! - [`watch`] - raw watch messages to typed `Upsert`/`Delete` changes
//! - [`edges`] / [`routes`] - validated writes and change subscriptions
//! - [`registry`] - agent sessions, snapshot replay and incremental push

pub mod cidr;
pub mod config;
pub mod edges;
pub mod error;
pub mod logger;
pub mod namespaces;
pub mod registry;
pub mod routes;
pub mod store;
pub mod watch;

// Re-export commonly used types
pub use edges::EdgeManager;
pub use error::{TopologyError, TopologyResult};
pub use registry::RegistryServer;
pub use routes::RouteManager;
pub use store::{KvStore, MemoryStore, PostgresStore, StoreError, StoreResult};
pub use watch::{Change, ChangeKind, ChangeSubscription};
