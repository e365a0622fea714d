//! # Roost Core
//!
//! Foundation types for the Roost room orchestration layer.
//!
//! This crate holds everything the framework needs that is not itself
//! orchestration logic:
//!
//! - **Events**: the normalized inbound [`RoomEvent`] stream ([`EventKind`], [`TextMessage`])
//! - **Transport**: the outbound chat surface ([`Transport`], [`CreateRoomOptions`])
//! - **Persistence**: the [`Store`] contract and its backends
//! - **Permissions**: the per-room [`RoomAcl`]
//! - **Modes**: room classification ([`RoomMode`])
//!
//! ## Data Flow
//!
//! ```text
//! ┌─────────────┐   RoomEvent   ┌─────────────┐   send_text   ┌─────────────┐
//! │  Transport  │──────────────▶│  Framework  │──────────────▶│  Transport  │
//! │   (sync)    │               │   (rooms)   │               │  (outbound) │
//! └─────────────┘               └──────┬──────┘               └─────────────┘
//!                                      │
//!                                      ▼
//!                                ┌───────────┐
//!                                │   Store   │
//!                                └───────────┘
//! ```

pub mod acl;
pub mod error;
pub mod event;
pub mod mode;
pub mod store;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod transport;

pub use acl::{AclScope, AclSnapshot, CONFIG_ROLE, RoomAcl};
pub use error::{
    AclError, AclResult, StoreError, StoreResult, TransportError, TransportResult,
};
pub use event::{EventKind, Membership, RoomEvent, TextKind, TextMessage};
pub use futures::future::BoxFuture;
pub use mode::RoomMode;
pub use store::{AclRecord, BoxedStore, MemoryStore, Scope, Store};
#[cfg(feature = "sqlite")]
pub use store::SqliteStore;
pub use transport::{
    BoxedTransport, CreateRoomOptions, HistoryVisibility, RoomPreset, Transport,
};
