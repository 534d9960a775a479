//! SQLite source.

use std::sync::Arc;

use async_trait::async_trait;

use crate::Result;
use crate::database::SubscriberRepository;
use crate::domain::Subscriber;

use super::SubscriberSource;

/// Reads subscribers through a [`SubscriberRepository`].
pub struct SqliteSource {
    repository: Arc<dyn SubscriberRepository>,
}

impl SqliteSource {
    pub fn new(repository: Arc<dyn SubscriberRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl SubscriberSource for SqliteSource {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn load(&self) -> Result<Vec<Subscriber>> {
        self.repository.load_all().await
    }
}
