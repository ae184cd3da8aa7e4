//! Per-session schema memoization.

use super::{RecordSchema, SchemaRef, SchemaResolver};
use crate::capabilities::TypeCapability;
use crate::error::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

/// Resolved schemas keyed by type name.
///
/// Concurrent misses on one type share a single resolver call. The map lock
/// is only held to fetch or insert a cell; a failed resolve leaves the cell
/// empty, so the next caller retries.
#[derive(Debug)]
pub struct SchemaCache {
    resolver: Arc<dyn SchemaResolver>,
    cells: Mutex<HashMap<String, Arc<OnceCell<SchemaRef>>>>,
}

impl SchemaCache {
    pub fn new(resolver: Arc<dyn SchemaResolver>) -> Self {
        Self {
            resolver,
            cells: Mutex::new(HashMap::new()),
        }
    }

    /// Resolved schema for `capability`, fetching it on first use.
    pub async fn get(&self, capability: &TypeCapability) -> Result<SchemaRef> {
        let cell = self.cell(&capability.name);
        let schema = cell
            .get_or_try_init(|| async {
                let schema: RecordSchema = self.resolver.resolve(capability).await?;
                Ok::<_, crate::error::WfsError>(Arc::new(schema))
            })
            .await?;
        Ok(Arc::clone(schema))
    }

    /// Already-resolved schema, without triggering a fetch.
    pub fn cached(&self, type_name: &str) -> Option<SchemaRef> {
        self.cells
            .lock()
            .ok()
            .and_then(|cells| cells.get(type_name).and_then(|c| c.get().cloned()))
    }

    fn cell(&self, type_name: &str) -> Arc<OnceCell<SchemaRef>> {
        match self.cells.lock() {
            Ok(mut cells) => Arc::clone(
                cells
                    .entry(type_name.to_string())
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            ),
            // Poisoned map: resolve uncached rather than fail the query
            Err(_) => Arc::new(OnceCell::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::tests::CAPABILITIES;
    use crate::capabilities::CapabilitiesIndex;
    use crate::error::WfsError;
    use crate::schema::{AttributeDescriptor, AttributeType};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct CountingResolver {
        calls: AtomicUsize,
        fail_first: bool,
    }

    #[async_trait]
    impl SchemaResolver for CountingResolver {
        async fn resolve(&self, capability: &TypeCapability) -> Result<RecordSchema> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail_first && n == 0 {
                return Err(WfsError::transport("first attempt fails"));
            }
            Ok(RecordSchema::new(
                capability.name.clone(),
                vec![AttributeDescriptor::new("name", AttributeType::String)],
            ))
        }
    }

    fn roads() -> TypeCapability {
        CapabilitiesIndex::build(CAPABILITIES.as_bytes())
            .unwrap()
            .type_capability("topp:roads")
            .unwrap()
            .clone()
    }

    #[tokio::test]
    async fn test_concurrent_misses_resolve_once() {
        let resolver = Arc::new(CountingResolver::default());
        let cache = Arc::new(SchemaCache::new(resolver.clone()));
        let capability = roads();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let capability = capability.clone();
            handles.push(tokio::spawn(async move { cache.get(&capability).await }));
        }
        for handle in handles {
            let schema = handle.await.unwrap().unwrap();
            assert_eq!(schema.type_name, "topp:roads");
        }
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
        assert!(cache.cached("topp:roads").is_some());
    }

    #[tokio::test]
    async fn test_failed_resolve_is_retried() {
        let resolver = Arc::new(CountingResolver {
            fail_first: true,
            ..Default::default()
        });
        let cache = SchemaCache::new(resolver.clone());
        let capability = roads();

        assert!(cache.get(&capability).await.is_err());
        assert!(cache.cached("topp:roads").is_none());
        assert!(cache.get(&capability).await.is_ok());
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
    }
}
