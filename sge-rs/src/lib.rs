//! Client engine for SGE game servers: login handshake, game session and
//! script editor.
//!
//! The pieces build on each other:
//!
//! ```text
//! auth::AuthClient ──login──► sal::SessionDescriptor
//!                                   │
//!                    session::GameSession (transport::Transport)
//!                                   │
//!                      editor::ScriptEditEngine (dedup)
//! ```

pub mod auth;
pub mod cli;
pub mod config;
pub mod dedup;
pub mod editor;
pub mod profile;
pub mod sal;
pub mod session;
pub mod settings;
pub mod tls;
pub mod transport;
