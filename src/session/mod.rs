//! Session identity, labeling, and the container start flow.
//!
//! A [`Session`] stamps every resource it creates with a unique session
//! identifier and provenance labels, registers the session with the
//! reaper before the first resource exists, and drives the start flow:
//! create and start the container, resolve its port bindings, poll the
//! requested wait strategy, and hand back a [`ContainerHandle`].

pub mod container;
pub mod error;
pub mod labels;
pub mod manager;

pub use container::{ContainerHandle, ContainerRequest};
pub use error::{Result, SessionError};
pub use labels::{
    LABEL_MARKER, LABEL_REAP, LABEL_SESSION, SessionId, build_labels, session_filter,
    session_label_pairs,
};
pub use manager::Session;
