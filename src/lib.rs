//! Session persistence, recovery and node selection for a multi-tenant
//! audio bot.

pub mod config;
pub mod env;
pub mod error;
pub mod events;
pub mod manager;
pub mod metrics;
pub mod model;
pub mod node;
pub mod queue;
pub mod recovery;
pub mod session_store;
pub mod storage;
pub mod sweeper;
pub mod web;

pub use config::Config;
pub use error::{ConfigError, NodeError, QueueError, RecoveryError, SessionError, StorageError};
pub use events::{EventBus, ManagerEvent, QueueAction, QueueChange};
pub use manager::{SaveReport, SessionManager, ShutdownReport};
pub use queue::QueueStore;
pub use recovery::{ReconnectTracker, RecoveryCoordinator, RecoveryReport};
pub use session_store::SessionStore;
pub use storage::StorageHandle;
pub use sweeper::LifecycleSweeper;
