use std::sync::Arc;

use halyard_core::SchemaRegistry;

use crate::cancel::CancelToken;
use crate::error::ProvisionerError;
use crate::persistence::StatePersistence;
use crate::remote::RemoteClient;
use crate::settings::EngineSettings;
use crate::state::StateStore;

/// Everything one run needs, scoped to that run.
#[derive(Clone)]
pub struct RunContext {
    pub client: Arc<dyn RemoteClient>,
    pub schemas: Arc<SchemaRegistry>,
    pub store: Arc<StateStore>,
    pub settings: EngineSettings,
    pub cancel: CancelToken,
    pub persistence: Option<Arc<StatePersistence>>,
}

impl RunContext {
    pub fn new(client: Arc<dyn RemoteClient>, schemas: SchemaRegistry) -> Self {
        Self {
            client,
            schemas: Arc::new(schemas),
            store: Arc::new(StateStore::new()),
            settings: EngineSettings::default(),
            cancel: CancelToken::new(),
            persistence: None,
        }
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Share a store between runs (e.g. apply, then destroy).
    pub fn with_store(mut self, store: Arc<StateStore>) -> Self {
        self.store = store;
        self
    }

    /// Load state from `persistence` and flush back to it as instances
    /// converge.
    pub async fn with_persistence(
        mut self,
        persistence: StatePersistence,
    ) -> Result<Self, ProvisionerError> {
        let snapshot = persistence.load().await?;
        self.store = Arc::new(StateStore::from_snapshot(snapshot));
        self.persistence = Some(Arc::new(persistence));
        Ok(self)
    }

    /// [`with_persistence`](Self::with_persistence) at
    /// `settings.state_path`, if one is configured.
    pub async fn with_configured_persistence(self) -> Result<Self, ProvisionerError> {
        match self.settings.state_path.clone() {
            Some(path) => self.with_persistence(StatePersistence::new(path)).await,
            None => Ok(self),
        }
    }

    /// Handle for cancelling the run from outside.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub(crate) async fn flush(&self) -> Result<(), ProvisionerError> {
        match &self.persistence {
            Some(persistence) => persistence.flush(&self.store).await,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("settings", &self.settings)
            .field("resources", &self.store.len())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}
