//! Lifecycle contract shared by configuration modules, and a runner driving a
//! set of them.

use std::sync::Arc;

use tracing::{error, info};

use crate::config::Configuration;

// ---------------------------------------------------------------------------
// ModuleConfiguration
// ---------------------------------------------------------------------------

/// A configuration module with a managed lifecycle.
///
/// Modules are initialized and started in ascending [`phase`](Self::phase)
/// order and shut down in descending order. Modules sharing a phase keep
/// their registration order.
pub trait ModuleConfiguration: Send + Sync {
    /// Captures `configuration` and prepares the module's components.
    fn initialize(&mut self, configuration: Arc<Configuration>);

    /// # Errors
    ///
    /// Returns an error if the module cannot start.
    fn start(&self) -> anyhow::Result<()>;

    /// # Errors
    ///
    /// Returns an error if the module fails to stop cleanly.
    fn shutdown(&self) -> anyhow::Result<()>;

    fn phase(&self) -> i32 {
        0
    }
}

// ---------------------------------------------------------------------------
// ModuleLifecycle
// ---------------------------------------------------------------------------

/// Owns a set of modules and drives them through their lifecycle.
#[derive(Default)]
pub struct ModuleLifecycle {
    modules: Vec<Box<dyn ModuleConfiguration>>,
}

impl ModuleLifecycle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: impl ModuleConfiguration + 'static) -> &mut Self {
        self.modules.push(Box::new(module));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Orders the modules by phase and initializes each one.
    pub fn initialize(&mut self, configuration: &Arc<Configuration>) {
        self.modules.sort_by_key(|module| module.phase());
        for module in &mut self.modules {
            module.initialize(configuration.clone());
        }
    }

    /// Starts the modules in phase order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first start failure.
    pub fn start(&self) -> anyhow::Result<()> {
        for module in &self.modules {
            module.start()?;
        }
        info!(modules = self.modules.len(), "modules started");
        Ok(())
    }

    /// Shuts the modules down in reverse phase order. Every module is asked to
    /// shut down even when an earlier one fails.
    ///
    /// # Errors
    ///
    /// Returns the first shutdown failure.
    pub fn shutdown(&self) -> anyhow::Result<()> {
        let mut first_error = None;
        for module in self.modules.iter().rev() {
            if let Err(e) = module.shutdown() {
                error!(phase = module.phase(), error = %e, "module failed to shut down");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for ModuleLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLifecycle")
            .field("modules", &self.modules.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    struct Recording {
        name: &'static str,
        phase: i32,
        fail_shutdown: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Recording {
        fn new(name: &'static str, phase: i32, log: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name,
                phase,
                fail_shutdown: false,
                log: log.clone(),
            }
        }
    }

    impl ModuleConfiguration for Recording {
        fn initialize(&mut self, _configuration: Arc<Configuration>) {
            self.log.lock().push(format!("init:{}", self.name));
        }

        fn start(&self) -> anyhow::Result<()> {
            self.log.lock().push(format!("start:{}", self.name));
            Ok(())
        }

        fn shutdown(&self) -> anyhow::Result<()> {
            self.log.lock().push(format!("shutdown:{}", self.name));
            if self.fail_shutdown {
                anyhow::bail!("{} refused to stop", self.name);
            }
            Ok(())
        }

        fn phase(&self) -> i32 {
            self.phase
        }
    }

    #[test]
    fn phases_order_the_lifecycle() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut lifecycle = ModuleLifecycle::new();
        lifecycle
            .register(Recording::new("late", 10, &log))
            .register(Recording::new("early", -5, &log))
            .register(Recording::new("default", 0, &log));

        lifecycle.initialize(&Arc::new(Configuration::default()));
        lifecycle.start().unwrap();
        lifecycle.shutdown().unwrap();

        assert_eq!(
            *log.lock(),
            vec![
                "init:early",
                "init:default",
                "init:late",
                "start:early",
                "start:default",
                "start:late",
                "shutdown:late",
                "shutdown:default",
                "shutdown:early",
            ]
        );
    }

    #[test]
    fn shutdown_continues_past_failures() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut failing = Recording::new("failing", 1, &log);
        failing.fail_shutdown = true;
        let mut lifecycle = ModuleLifecycle::new();
        lifecycle
            .register(Recording::new("first", 0, &log))
            .register(failing);
        lifecycle.initialize(&Arc::new(Configuration::default()));

        let err = lifecycle.shutdown().unwrap_err();
        assert_eq!(err.to_string(), "failing refused to stop");
        assert_eq!(
            *log.lock(),
            vec!["init:first", "init:failing", "shutdown:failing", "shutdown:first"]
        );
    }
}
