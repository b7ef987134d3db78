//! Offline-resilient POS terminal core
//!
//! Keeps a point-of-sale or kitchen-display terminal usable when the
//! network is not: reads are served from a memoizing cache or the
//! local store, writes apply optimistically and reconcile with the
//! backend when it answers, and everything queued while offline is
//! replayed once connectivity returns.
//!
//! [`terminal::Terminal`] assembles the runtime; the domain entry
//! points are the hooks in [`hooks`].

pub mod bus;
pub mod cache;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod hooks;
pub mod logging;
pub mod notify;
pub mod replay;
pub mod services;
pub mod store;
pub mod sync_listener;
pub mod terminal;

pub use config::TerminalConfig;
pub use error::{MutationError, MutationResult};
pub use terminal::Terminal;
