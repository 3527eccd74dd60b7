//! Domain logic for WebDAV locking and request admission

pub mod access;
pub mod conditions;
pub mod locking;
pub mod resource_path;

pub use resource_path::ResourcePath;
