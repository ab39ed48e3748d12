//! Holds the single live adapter

use std::{sync::Arc, time::Duration};

use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::{
    config::BackendConfig,
    data::AdapterError,
    traits::{AdapterResult, GraphAdapter},
};

/// Bound for probes against adapters installed without a config.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

struct Live {
    adapter: Arc<dyn GraphAdapter>,
    probe_timeout: Duration,
}

/// Owns at most one initialized adapter at a time.
///
/// Switching to a backend with a different identity closes the previous
/// adapter before the next one is built, so two are never live together.
#[derive(Default)]
pub struct AdapterRegistry {
    live: RwLock<Option<Live>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects to the configured backend, reusing the live adapter when the
    /// identity is unchanged.
    #[instrument(skip(self, config), fields(backend = %config.kind()))]
    pub async fn connect(&self, config: BackendConfig) -> AdapterResult<Arc<dyn GraphAdapter>> {
        let mut live = self.live.write().await;
        if let Some(current) = live.as_ref() {
            if current.adapter.identity() == config.identity() {
                return Ok(current.adapter.clone());
            }
        }
        Self::retire(&mut live).await;

        let adapter = build_adapter(&config)?;
        adapter.initialize().await?;
        info!("Connected adapter {}", adapter.identity());
        *live = Some(Live {
            adapter: adapter.clone(),
            probe_timeout: config.probe_timeout(),
        });
        Ok(adapter)
    }

    /// Installs an already constructed adapter, e.g. a test double.
    pub async fn install(&self, adapter: Arc<dyn GraphAdapter>) -> AdapterResult<()> {
        let mut live = self.live.write().await;
        if let Some(current) = live.as_ref() {
            if current.adapter.identity() == adapter.identity() {
                return Ok(());
            }
        }
        Self::retire(&mut live).await;

        adapter.initialize().await?;
        *live = Some(Live {
            adapter,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        });
        Ok(())
    }

    async fn retire(live: &mut Option<Live>) {
        if let Some(previous) = live.take() {
            let identity = previous.adapter.identity();
            if let Err(e) = previous.adapter.close().await {
                warn!("Closing adapter {} failed: {}", identity, e);
            }
            info!("Closed adapter {}", identity);
        }
    }

    /// Closes and forgets the live adapter.
    pub async fn disconnect(&self) {
        let mut live = self.live.write().await;
        Self::retire(&mut live).await;
    }

    pub async fn current(&self) -> Option<Arc<dyn GraphAdapter>> {
        self.live.read().await.as_ref().map(|l| l.adapter.clone())
    }

    /// Non-blocking view of the live adapter. `None` while a connect is in progress.
    pub fn try_current(&self) -> Option<Arc<dyn GraphAdapter>> {
        self.live
            .try_read()
            .ok()
            .and_then(|live| live.as_ref().map(|l| l.adapter.clone()))
    }

    pub fn is_connected(&self) -> bool {
        self.try_current().is_some()
    }

    async fn probe_target(&self) -> Option<(Arc<dyn GraphAdapter>, Duration)> {
        self.live
            .read()
            .await
            .as_ref()
            .map(|l| (l.adapter.clone(), l.probe_timeout))
    }

    /// End-to-end probe bounded by the backend's probe timeout.
    pub async fn test_connection(&self) -> Result<(), String> {
        let Some((adapter, bound)) = self.probe_target().await else {
            return Err(AdapterError::NotConnected.to_string());
        };
        match tokio::time::timeout(bound, adapter.test_connection()).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::timeout("connection test", bound).to_string()),
        }
    }

    /// Health probe. A timeout counts as unhealthy.
    pub async fn check_connection(&self) -> AdapterResult<bool> {
        let Some((adapter, bound)) = self.probe_target().await else {
            return Err(AdapterError::NotConnected);
        };
        tokio::time::timeout(bound, adapter.check_connection())
            .await
            .map_err(|_| AdapterError::timeout("health check", bound))
    }
}

fn build_adapter(config: &BackendConfig) -> AdapterResult<Arc<dyn GraphAdapter>> {
    match config {
        #[cfg(feature = "bolt")]
        BackendConfig::Bolt(c) => Ok(Arc::new(crate::adapters::BoltAdapter::new(c.clone()))),
        #[cfg(feature = "streaming")]
        BackendConfig::Streaming(c) => Ok(Arc::new(crate::adapters::StreamingAdapter::new(c.clone())?)),
        #[allow(unreachable_patterns)]
        other => Err(AdapterError::InvalidInput(format!(
            "built without {} support",
            other.kind()
        ))),
    }
}
