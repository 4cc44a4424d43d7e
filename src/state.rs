use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::config::ServerConfig;
use crate::datasource::DataSourceRegistry;
use crate::query::NamedQueryRegistry;
use crate::resolver::NameResolver;

/// Application state shared by all handlers.
pub struct AppState {
    pub datasources: DataSourceRegistry,
    pub queries: NamedQueryRegistry,
    pub settings: ServerConfig,
    /// Bounds how many backend queries run at once so slow backends cannot
    /// occupy every connection of the HTTP server.
    pub query_permits: Arc<Semaphore>,
}

impl AppState {
    pub fn new(settings: ServerConfig, resolver: Arc<dyn NameResolver>) -> Self {
        let permits = settings.worker_pool_size.max(1);
        let datasources = DataSourceRegistry::new(resolver);
        datasources.register_types(settings.datasources.as_ref());

        AppState {
            datasources,
            queries: NamedQueryRegistry::new(),
            settings,
            query_permits: Arc::new(Semaphore::new(permits)),
        }
    }
}
