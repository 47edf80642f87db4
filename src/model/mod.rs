pub mod filters;
pub mod session;
pub mod track;

// Re-export all models for convenience
pub use filters::{Filter, FilterKind, FilterSet, NodeFilters};
pub use session::{
    AutoplayState, ConnectionOptions, QueueSnapshot, RepeatState, Session, SessionSnapshot,
    VoiceState,
};
pub use track::{RawRequester, Requester, Track};
