use std::sync::Arc;

use tracing::info;

use crate::error::QueueModuleResult;
use crate::explorer::{QueueExplorer, RegistrationState};
use crate::registration::QueueExtraOptions;

/// Entry point of queue registration.
///
/// Runs [`QueueExplorer::register`] from the module-init hook, unless
/// manual registration is enabled. Then the application calls
/// [`register`](Self::register) itself, typically after `init()`.
pub struct QueueRegistrar {
    explorer: Arc<QueueExplorer>,
    extra: QueueExtraOptions,
}

impl QueueRegistrar {
    /// Create a registrar driving `explorer`.
    pub fn new(explorer: Arc<QueueExplorer>, extra: QueueExtraOptions) -> Self {
        Self { explorer, extra }
    }

    /// Module-init hook: registers unless manual registration is enabled.
    pub async fn on_module_init(&self) -> QueueModuleResult<()> {
        if self.extra.manual_registration {
            info!("manual queue registration enabled, waiting for QueueRegistrar::register()");
            return Ok(());
        }
        self.register().await
    }

    /// Run registration now, see [`QueueExplorer::register`].
    pub async fn register(&self) -> QueueModuleResult<()> {
        self.explorer.register().await
    }

    pub fn state(&self) -> RegistrationState {
        self.explorer.state()
    }

    /// The explorer this registrar drives.
    pub fn explorer(&self) -> &Arc<QueueExplorer> {
        &self.explorer
    }
}
