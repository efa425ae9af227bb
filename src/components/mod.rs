use crate::config::{Config, ConfigStore};
use crate::error::BotResult;
use crate::utils::time::Clock;
use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::info;

// Export components
pub mod calendar;

// Re-export the refresh handle
pub use calendar::RefreshHandle;

/// Shared services handed to every component on init
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub preferences: ConfigStore,
    pub clock: Arc<dyn Clock>,
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("config", &self.config)
            .field("preferences", &self.preferences.preferences())
            .finish()
    }
}

/// Component trait that all components must implement
#[async_trait]
pub trait Component: Send + Sync + Any {
    /// Get the name of the component
    fn name(&self) -> &'static str;

    /// Initialize the component
    async fn init(&self, ctx: &AppContext) -> BotResult<()>;

    /// Shutdown the component
    async fn shutdown(&self) -> BotResult<()>;

    /// Convert to Any for downcasting
    fn as_any(&self) -> &dyn Any;
}

/// Manager for all components
pub struct ComponentManager {
    components: Vec<Box<dyn Component>>,
    ctx: AppContext,
}

impl fmt::Debug for ComponentManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentManager")
            .field("component_count", &self.components.len())
            .field("ctx", &self.ctx)
            .finish()
    }
}

impl ComponentManager {
    /// Create a new component manager
    pub fn new(ctx: AppContext) -> Self {
        Self {
            components: Vec::new(),
            ctx,
        }
    }

    /// Get the shared context
    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    /// Register a component
    pub fn register<T: Component + 'static>(&mut self, component: T) {
        info!("Registering component: {}", component.name());
        self.components.push(Box::new(component));
    }

    /// Initialize all registered components
    pub async fn init_all(&self) -> BotResult<()> {
        for component in &self.components {
            info!("Initializing component: {}", component.name());

            if let Err(e) = component.init(&self.ctx).await {
                // Log error but continue with other components
                tracing::error!("Error initializing component {}: {:?}", component.name(), e);
            }
        }

        Ok(())
    }

    /// Shutdown all components
    pub async fn shutdown_all(&self) -> BotResult<()> {
        info!("Shutting down all components");

        for component in &self.components {
            info!("Shutting down component: {}", component.name());

            if let Err(e) = component.shutdown().await {
                // Log error but continue with other components
                tracing::error!(
                    "Error shutting down component {}: {:?}",
                    component.name(),
                    e
                );
            }
        }

        Ok(())
    }

    /// Get a component by name
    pub fn get_component_by_name(&self, name: &str) -> Option<&dyn Component> {
        self.components
            .iter()
            .find(|c| c.name() == name)
            .map(|c| c.as_ref())
    }

    /// Get a registered component by its concrete type
    pub fn get<T: Component + 'static>(&self, name: &str) -> Option<&T> {
        self.get_component_by_name(name)
            .and_then(|component| component.as_any().downcast_ref::<T>())
    }
}
