use super::models::Event;
use crate::error::BotResult;
use async_trait::async_trait;

/// Producer of upcoming calendar events
///
/// Each call returns a complete, freshly decoded list; results are never
/// merged with earlier fetches.
#[async_trait]
pub trait EventSource: Send + Sync + 'static {
    async fn fetch(&self) -> BotResult<Vec<Event>>;
}
