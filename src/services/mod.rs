//! Storage core (paths, metadata, backups, definitions, replacement,
//! validation), the remote client, and the service that orchestrates them.

pub mod artifact_locks;
pub mod backup_manager;
pub mod definition_codec;
pub mod error;
pub mod fabric_client;
pub mod folder_validator;
pub mod keyword_replacer;
pub mod metadata_store;
pub mod path_resolver;
pub mod storage_service;
pub mod tree;

#[cfg(test)]
pub mod test_support;
