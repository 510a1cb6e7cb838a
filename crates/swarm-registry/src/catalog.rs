//! Tool-catalog cache: immutable snapshots refreshed by a background
//! reader on a bounded interval. Readers always see a consistent map.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::Result;
use crate::types::ToolSpec;

/// Source of tool definitions. The production impl is HTTP against the
/// tools service; tests plug in an in-memory one.
#[async_trait]
pub trait ToolCatalog: Send + Sync {
    /// Names of every available tool.
    async fn list(&self) -> Result<Vec<String>>;
    /// Full specs for the named tools.
    async fn info(&self, names: &[String]) -> Result<HashMap<String, ToolSpec>>;
}

/// HTTP tool catalog against the tools service.
pub struct HttpToolCatalog {
    http: reqwest::Client,
    base_url: String,
}

impl HttpToolCatalog {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: api_url.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl ToolCatalog for HttpToolCatalog {
    async fn list(&self) -> Result<Vec<String>> {
        #[derive(serde::Deserialize)]
        struct Row {
            tool_name: String,
        }
        let rows: Vec<Row> = self
            .http
            .get(self.endpoint("/api/tools"))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(rows.into_iter().map(|r| r.tool_name).collect())
    }

    async fn info(&self, names: &[String]) -> Result<HashMap<String, ToolSpec>> {
        let specs: HashMap<String, ToolSpec> = self
            .http
            .post(self.endpoint("/api/tools/info"))
            .json(&serde_json::json!({ "tool_names": names }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(specs)
    }
}

/// Hot-reloading cache over a [`ToolCatalog`].
///
/// `snapshot()` hands out the current immutable map, performing an
/// initial refresh on first use; `start_background_refresh` keeps it
/// current on a bounded interval (idempotent).
pub struct ToolCatalogCache {
    source: Arc<dyn ToolCatalog>,
    current: RwLock<Option<Arc<HashMap<String, ToolSpec>>>>,
    refresher: Mutex<Option<(JoinHandle<()>, watch::Sender<bool>)>>,
}

impl ToolCatalogCache {
    pub fn new(source: Arc<dyn ToolCatalog>) -> Arc<Self> {
        Arc::new(Self {
            source,
            current: RwLock::new(None),
            refresher: Mutex::new(None),
        })
    }

    /// Refresh the cache immediately. Returns the entry count.
    pub async fn refresh(&self) -> Result<usize> {
        let names = self.source.list().await?;
        let specs = self.source.info(&names).await?;
        let count = specs.len();
        *self.current.write().unwrap() = Some(Arc::new(specs));
        info!(entries = count, "tool catalog refreshed");
        Ok(count)
    }

    /// The current snapshot, loading it on first use.
    pub async fn snapshot(&self) -> Result<Arc<HashMap<String, ToolSpec>>> {
        if let Some(current) = self.current.read().unwrap().as_ref() {
            return Ok(Arc::clone(current));
        }
        self.refresh().await?;
        Ok(self
            .current
            .read()
            .unwrap()
            .as_ref()
            .map(Arc::clone)
            .unwrap_or_default())
    }

    /// Start the background refresh task (idempotent).
    pub fn start_background_refresh(self: &Arc<Self>, interval: Duration) {
        let mut guard = self.refresher.lock().unwrap();
        if guard.as_ref().is_some_and(|(h, _)| !h.is_finished()) {
            return;
        }
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let cache = Arc::clone(self);
        let handle = tokio::spawn(async move {
            info!("tool catalog refresh task started");
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = stop_rx.changed() => {
                        info!("tool catalog refresh task stopping");
                        return;
                    }
                }
                if let Err(e) = cache.refresh().await {
                    warn!(error = %e, "tool catalog refresh failed");
                }
            }
        });
        *guard = Some((handle, stop_tx));
    }

    /// Stop the background refresh task and wait for it.
    pub async fn stop_background_refresh(&self) {
        let entry = self.refresher.lock().unwrap().take();
        if let Some((handle, stop_tx)) = entry {
            let _ = stop_tx.send(true);
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use swarm_core::{PreservationPolicy, ToolKind};

    struct FakeCatalog {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ToolCatalog for FakeCatalog {
        async fn list(&self) -> Result<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec!["echo".into(), "read_file".into()])
        }

        async fn info(&self, names: &[String]) -> Result<HashMap<String, ToolSpec>> {
            Ok(names
                .iter()
                .map(|n| {
                    (
                        n.clone(),
                        ToolSpec {
                            name: n.clone(),
                            description: format!("{n} tool"),
                            schema: serde_json::json!({"type": "object"}),
                            kind: ToolKind::ReadOnly,
                            preservation_policy: PreservationPolicy::Always,
                        },
                    )
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn snapshot_loads_lazily_and_reuses() {
        let source = Arc::new(FakeCatalog {
            calls: AtomicUsize::new(0),
        });
        let cache = ToolCatalogCache::new(Arc::clone(&source) as Arc<dyn ToolCatalog>);

        let snap = cache.snapshot().await.unwrap();
        assert_eq!(snap.len(), 2);
        assert!(snap.contains_key("echo"));

        // A second snapshot must not refetch.
        let _ = cache.snapshot().await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn background_refresh_start_is_idempotent() {
        let source = Arc::new(FakeCatalog {
            calls: AtomicUsize::new(0),
        });
        let cache = ToolCatalogCache::new(Arc::clone(&source) as Arc<dyn ToolCatalog>);

        cache.start_background_refresh(Duration::from_millis(10));
        cache.start_background_refresh(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(60)).await;
        cache.stop_background_refresh().await;

        let calls = source.calls.load(Ordering::SeqCst);
        assert!(calls >= 2, "expected periodic refreshes, got {calls}");
    }
}
