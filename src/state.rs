//! Shared handler state: every external collaborator behind a trait seam.

use std::sync::Arc;

use crate::cache::Cache;
use crate::identity::IdentityVerifier;
use crate::provider::MachineProvider;
use crate::storage::ObjectStore;
use crate::store::Store;
use crate::tasks::TaskQueue;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub cache: Arc<dyn Cache>,
    pub tasks: Arc<dyn TaskQueue>,
    pub provider: Arc<dyn MachineProvider>,
    pub identity: Arc<dyn IdentityVerifier>,
    pub storage: Arc<dyn ObjectStore>,
}
