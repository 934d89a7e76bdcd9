//! Cache-through session loading.

use tracing::{debug, info};

use super::{Session, SessionId, SessionSource};
use crate::error::Result;
use crate::storage::Storage;

/// Loads sessions from a source, caching them in storage.
pub struct SessionLoader<'a> {
    source: &'a dyn SessionSource,
    storage: &'a Storage,
    refresh: bool,
}

impl<'a> SessionLoader<'a> {
    /// Create a loader over `source` that caches into `storage`.
    #[must_use]
    pub fn new(source: &'a dyn SessionSource, storage: &'a Storage) -> Self {
        Self {
            source,
            storage,
            refresh: false,
        }
    }

    /// Always fetch from the source, replacing any cached copy.
    #[must_use]
    pub fn refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    /// Load a session.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache cannot be read or written, or the
    /// source fails.
    pub async fn load(&self, id: &SessionId) -> Result<Session> {
        if !self.refresh {
            if let Some(session) = self.storage.get_session(id)? {
                debug!("Using cached session {}", id);
                return Ok(session);
            }
        }

        info!("Fetching session {} from {}", id, self.source.name());
        let session = self.source.fetch(id).await?;
        self.storage.put_session(&session)?;
        info!(
            laps = session.laps.len(),
            drivers = session.drivers().len(),
            "Loaded {}",
            session.describe()
        );
        Ok(session)
    }
}

impl std::fmt::Debug for SessionLoader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLoader")
            .field("source", &self.source.name())
            .field("storage", &self.storage.path())
            .field("refresh", &self.refresh)
            .finish()
    }
}
