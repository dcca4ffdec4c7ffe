//! # collab-presence: client-side collaboration presence
//!
//! Keeps a consistent view of who else is in a shared session and what
//! they are doing, driven by the event stream of a collaboration server.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  commands   ┌──────────────┐   open    ┌──────────────┐
//! │ SessionStore │ ──────────► │ SessionTask  │ ────────► │ Connector    │
//! │ (handle)     │             │ (one writer) │           │ (WebSocket)  │
//! └──────▲───────┘             └──────┬───────┘           └──────┬───────┘
//!        │ watch<SessionState>        │ ◄──── signals ───────────┘
//!        └────────────────────────────┤
//!                                     ▼
//!                         decode ──► registry::apply
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON wire format and the inbound event decoder
//! - [`registry`]: collaborator registry and reconciliation rules
//! - [`connection`]: channel lifecycle, WebSocket and mock connectors
//! - [`session`]: the observable session store
//! - [`config`]: client configuration
//! - [`menu`]: context-menu contract for collaborator actions

pub mod config;
pub mod connection;
pub mod menu;
pub mod protocol;
pub mod registry;
pub mod session;

// Re-exports for convenience
pub use config::{ClientConfig, StalePolicy};
pub use connection::{
    Channel, ChannelAddress, ChannelSink, Connector, Inbound, MockConnector, MockPeer,
    TransportError, WebSocketConnector,
};
pub use menu::{ContextMenu, MenuItem};
pub use protocol::{
    CollaborationEvent, CursorPosition, DecodeError, EventKind, EventPayload,
    OutboundMessage, PresenceData, PresenceEntry,
};
pub use registry::{Collaborator, CollaboratorRegistry};
pub use session::{
    ChannelId, ConnectionPhase, RemoteEdit, SessionEvent, SessionState, SessionStore,
};
