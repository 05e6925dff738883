use std::fmt;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::event::EventDispatcher;
use crate::kernel::config::HostConfig;
use crate::kernel::constants::{APP_NAME, HOST_PERMISSIONS};
use crate::kernel::error::Result;
use crate::plugin_system::loader::{LibraryLoader, ModuleLoader};
use crate::plugin_system::manager::LifecycleManager;
use crate::plugin_system::messaging::MessageBus;
use crate::plugin_system::permissions::PermissionRegistry;

/// Owns the host services and brackets their usable lifetime.
///
/// Construction wires the event dispatcher, permission registry, message
/// bus and lifecycle engine together. [`start`](Host::start) opens the
/// engine, registers the permission catalogue, applies configured grants,
/// discovers descriptors and activates the `autostart` plugins.
/// [`stop`](Host::stop) unloads everything.
pub struct Host {
    config: HostConfig,
    events: Arc<EventDispatcher>,
    permissions: Arc<PermissionRegistry>,
    bus: Arc<MessageBus>,
    engine: Arc<LifecycleManager>,
    started: bool,
}

impl Host {
    pub fn new(config: HostConfig, loader: Box<dyn ModuleLoader>) -> Self {
        let events = Arc::new(EventDispatcher::new());
        let permissions = Arc::new(PermissionRegistry::with_builtin(Arc::clone(&events)));
        let bus = Arc::new(MessageBus::new(Arc::clone(&permissions), Arc::clone(&events)));
        let engine = Arc::new(LifecycleManager::new(
            config.engine_options(),
            loader,
            Arc::clone(&permissions),
            Arc::clone(&bus),
            Arc::clone(&events),
        ));
        Self {
            config,
            events,
            permissions,
            bus,
            engine,
            started: false,
        }
    }

    /// Host loading plugins as dynamic libraries from `config.plugin_dir`.
    pub fn with_library_loader(config: HostConfig) -> Self {
        Self::new(config, Box::new(LibraryLoader::new()))
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventDispatcher> {
        &self.events
    }

    pub fn permissions(&self) -> &Arc<PermissionRegistry> {
        &self.permissions
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn engine(&self) -> &Arc<LifecycleManager> {
        &self.engine
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn start(&mut self) -> Result<()> {
        if self.started {
            warn!("{} host already started", APP_NAME);
            return Ok(());
        }
        info!("Starting {} host (framework {})", APP_NAME, self.config.framework_version);
        self.engine.initialize()?;

        self.permissions.register_builtin();
        let mut catalogue: Vec<(&str, &str)> = HOST_PERMISSIONS.to_vec();
        catalogue.extend(
            self.config
                .permissions
                .catalogue
                .iter()
                .map(|(n, d)| (n.as_str(), d.as_str())),
        );
        for (name, description) in catalogue {
            if self.permissions.is_registered(name) {
                debug!("Permission {} already registered", name);
                continue;
            }
            self.permissions.register(name, description)?;
        }

        for (plugin_id, names) in &self.config.permissions.grants {
            for name in names {
                if let Err(e) = self.permissions.grant(plugin_id, name) {
                    warn!("Skipping configured grant of {} to {}: {}", name, plugin_id, e);
                }
            }
        }

        match self.engine.scan_for_plugins() {
            Ok(ids) => debug!("Discovered plugins: {:?}", ids),
            Err(e) => warn!("Plugin discovery failed: {}", e),
        }

        for plugin_id in &self.config.autostart {
            if let Err(e) = self.engine.activate(plugin_id) {
                warn!("Autostart of {} failed: {}", plugin_id, e);
            }
        }

        self.started = true;
        info!("{} host started", APP_NAME);
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }
        info!("Stopping {} host", APP_NAME);
        self.engine.shutdown()?;
        self.bus.clear();
        self.permissions.clear();
        self.started = false;
        info!("{} host stopped", APP_NAME);
        Ok(())
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Host stop on drop failed: {}", e);
        }
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("config", &self.config)
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}
