//! Vigil kernel : supervision temps réel d'un parc d'hyperviseurs.
//!
//! Polling des API de gestion → réconciliation de l'inventaire → débits
//! lissés et historique borné → diffusion WebSocket par rooms.

pub mod api;
pub mod bus;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod identity;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod poller;
pub mod realtime;
pub mod reconciler;
pub mod state;
pub mod watcher;

pub use error::{KernelError, RealtimeError, Result};
pub use pipeline::Pipeline;
