//! The seam between a parsed `StorageDescriptor` and a concrete
//! `storage::Storage` implementation (spec §4.8 `Init`, "create storage
//! via factory"). This crate depends only on the `storage` trait, never
//! on a specific backend crate such as `storage-postgres`, so the
//! binary wiring a provider together picks its own factory.

use std::sync::Arc;

use async_trait::async_trait;
use diagnostics::Diagnostics;
use storage::Storage;

use crate::config::StorageDescriptor;

#[async_trait]
pub trait StorageFactory: Send + Sync {
    async fn create(&self, descriptor: &StorageDescriptor) -> Result<Arc<dyn Storage>, Diagnostics>;
}
