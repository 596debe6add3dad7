//! Image composition
//!
//! [`Compositor`] turns an artifact plus a base image into a runnable image:
//! the artifact's layers are appended to the base layers, the base config is
//! rewritten to launch the artifact's entrypoint, and a new manifest (or a
//! new index, for multi-platform bases) is written. Source documents are
//! never modified.

pub mod compositor;
pub mod eject;

pub use compositor::{Compositor, EjectOptions, EjectRequest};
pub use eject::{EjectStores, EjectedImage, eject_artifact, provenance_annotations};
