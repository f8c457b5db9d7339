//! Keyed pool of Kernels, one per unit of work.
//!
//! Each key owns a single-flight cell, so concurrent `get` calls for an
//! unset key create and start exactly one Kernel. The authenticator and
//! transport are built lazily on first use and shared by every Kernel.

use crate::adapters::{AuthenticatorRegistry, HttpTransport, WebSocketConnector};
use crate::domain::{BridgeConfig, BridgeError, BridgeResult, ManagerError, ServerConfig};
use crate::kernel::{Kernel, KernelPorts};
use crate::ports::{
    Authenticator, ChannelConnector, ContextTransport, DiagnosticSink, FunctionRegistrar, LogRegistrar,
    StdDiagnostics,
};
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Builds the network-facing ports for the manager's Kernels.
pub trait KernelFactory: Send + Sync {
    fn transport(&self, auth: Arc<dyn Authenticator>) -> BridgeResult<Arc<dyn ContextTransport>>;

    fn connector(&self) -> Arc<dyn ChannelConnector>;

    fn diagnostics(&self) -> Arc<dyn DiagnosticSink> {
        Arc::new(StdDiagnostics)
    }

    fn registrar(&self) -> Arc<dyn FunctionRegistrar> {
        Arc::new(LogRegistrar)
    }
}

/// HTTP transport plus WebSocket channels.
pub struct NetworkFactory {
    server: ServerConfig,
}

impl NetworkFactory {
    pub fn new(server: ServerConfig) -> Self {
        Self { server }
    }
}

impl KernelFactory for NetworkFactory {
    fn transport(&self, auth: Arc<dyn Authenticator>) -> BridgeResult<Arc<dyn ContextTransport>> {
        Ok(Arc::new(HttpTransport::new(self.server.clone(), auth)?))
    }

    fn connector(&self) -> Arc<dyn ChannelConnector> {
        Arc::new(WebSocketConnector)
    }
}

type KernelCell = Arc<OnceCell<Kernel>>;

pub struct KernelManager {
    config: BridgeConfig,
    authenticators: AuthenticatorRegistry,
    factory: Arc<dyn KernelFactory>,
    ports: Mutex<Option<KernelPorts>>,
    kernels: Mutex<HashMap<String, KernelCell>>,
}

impl KernelManager {
    /// Manager talking to the configured notebook server.
    pub fn new(config: BridgeConfig) -> Self {
        let factory = Arc::new(NetworkFactory::new(config.server.clone()));
        Self::with_factory(config, AuthenticatorRegistry::with_builtins(), factory)
    }

    pub fn with_factory(
        config: BridgeConfig,
        authenticators: AuthenticatorRegistry,
        factory: Arc<dyn KernelFactory>,
    ) -> Self {
        Self {
            config,
            authenticators,
            factory,
            ports: Mutex::new(None),
            kernels: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    fn ports(&self) -> BridgeResult<KernelPorts> {
        let mut ports = self.ports.lock();
        if let Some(ports) = ports.as_ref() {
            return Ok(ports.clone());
        }

        let auth = self.authenticators.create(&self.config.auth)?;
        debug!(kind = %self.config.auth.kind, "Authenticator created");
        let created = KernelPorts {
            transport: self.factory.transport(Arc::clone(&auth))?,
            connector: self.factory.connector(),
            diagnostics: self.factory.diagnostics(),
            registrar: self.factory.registrar(),
            auth,
        };
        *ports = Some(created.clone());
        Ok(created)
    }

    /// The live Kernel for `key`, created and started on first use.
    ///
    /// A registered Kernel whose channel died is started again.
    pub async fn get(&self, key: &str) -> BridgeResult<Kernel> {
        let cell = Arc::clone(self.kernels.lock().entry(key.to_string()).or_default());

        let result = cell
            .get_or_try_init(|| async {
                let kernel = Kernel::new(self.ports()?, self.config.kernel.clone());
                kernel.start().await?;
                info!(key, session = %kernel.session(), "Kernel registered");
                Ok::<_, BridgeError>(kernel)
            })
            .await;

        match result {
            Ok(kernel) => {
                if !kernel.is_running() {
                    info!(key, session = %kernel.session(), "Kernel channel lost; restarting");
                    kernel.start().await?;
                }
                Ok(kernel.clone())
            }
            Err(e) => {
                let mut kernels = self.kernels.lock();
                if kernels
                    .get(key)
                    .is_some_and(|c| Arc::ptr_eq(c, &cell) && !c.initialized())
                {
                    kernels.remove(key);
                }
                Err(e)
            }
        }
    }

    /// Fetch `unit` and run it on the Kernel keyed by its path.
    pub async fn run_unit(&self, unit: &str) -> BridgeResult<()> {
        let kernel = self.get(unit).await?;
        kernel.run_unit(unit).await
    }

    /// Reset, then run every configured unit.
    ///
    /// Units sharing a key run in order; distinct keys run concurrently.
    pub async fn start_all(&self) -> Result<(), ManagerError> {
        self.stop_all().await?;

        let mut groups: Vec<(&str, Vec<&str>)> = Vec::new();
        for unit in self.config.units.iter().map(String::as_str) {
            match groups.iter().position(|(key, _)| *key == unit) {
                Some(index) => groups[index].1.push(unit),
                None => groups.push((unit, vec![unit])),
            }
        }
        info!(units = self.config.units.len(), keys = groups.len(), "Starting all units");

        let runs = groups.into_iter().map(|(key, units)| async move {
            for unit in units {
                if let Err(e) = self.run_unit(unit).await {
                    warn!(key, unit, error = %e, "Unit failed");
                    return Some((unit.to_string(), e));
                }
            }
            None
        });
        let failures: Vec<_> = join_all(runs).await.into_iter().flatten().collect();
        ManagerError::into_result(failures)
    }

    /// Shut down every Kernel concurrently and empty the registry.
    pub async fn stop_all(&self) -> Result<(), ManagerError> {
        let drained: Vec<(String, KernelCell)> = self.kernels.lock().drain().collect();
        if drained.is_empty() {
            return Ok(());
        }
        info!(kernels = drained.len(), "Stopping all kernels");

        // cells still starting are awaited, a failed start leaves nothing to stop
        let shutdowns = drained.into_iter().map(|(key, cell)| async move {
            let kernel = cell
                .get_or_try_init(|| async { Err(BridgeError::NotStarted) })
                .await
                .ok()?
                .clone();
            kernel.shutdown().await.err().map(|e| (key, e))
        });
        let failures: Vec<_> = join_all(shutdowns).await.into_iter().flatten().collect();
        for (key, e) in &failures {
            warn!(key, error = %e, "Kernel shutdown failed");
        }
        ManagerError::into_result(failures)
    }

    /// True when any Kernel is registered.
    pub fn is_running(&self) -> bool {
        self.kernels.lock().values().any(|cell| cell.initialized())
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .kernels
            .lock()
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Every runnable unit on the server.
    pub async fn list_units(&self) -> BridgeResult<Vec<String>> {
        let ports = self.ports()?;
        if !ports.auth.is_authenticated() {
            ports.auth.authenticate().await?;
        }
        match ports.transport.list_units().await {
            Ok(units) => Ok(units),
            Err(e) => {
                ports.auth.reset();
                Err(e)
            }
        }
    }
}
