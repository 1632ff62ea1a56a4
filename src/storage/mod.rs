// src/storage/mod.rs
mod backend;
mod secret_store;

pub use backend::{StorageBackend, StorageConfig};
pub use secret_store::{remote_path, FileMapping, SecretStore};
