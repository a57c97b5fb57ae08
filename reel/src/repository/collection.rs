use crate::domain::{Collection, SetRecord};
use crate::ports::SetStore;
use crate::stream::Snapshots;
use crate::telemetry::record_outcome;
use shared::Result;
use std::sync::Arc;
use tracing::{Instrument, field, info_span};

/// Repository for a purely local collection. There is no remote fallback.
pub struct CollectionRepository<C: Collection> {
    store: Arc<dyn SetStore<C>>,
}

impl<C: Collection> Clone for CollectionRepository<C> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<C: Collection> CollectionRepository<C> {
    pub fn new(store: Arc<dyn SetStore<C>>) -> Self {
        Self { store }
    }

    /// Members, most recently added first
    pub async fn all(&self) -> Result<Vec<SetRecord<C::Id>>> {
        Ok(self.store.all().await?)
    }

    pub async fn contains(&self, id: &C::Id) -> Result<bool> {
        Ok(self.store.contains(id).await?)
    }

    pub async fn add(&self, id: C::Id) -> Result<bool> {
        let span = info_span!(
            "repository.add",
            entity_type = C::NAME,
            entity_id = %id,
            error = field::Empty,
            otel.status_code = field::Empty
        );

        let result: Result<bool> = self
            .store
            .add(id)
            .instrument(span.clone())
            .await
            .map_err(Into::into);
        record_outcome(&span, &result);
        result
    }

    pub async fn remove(&self, id: &C::Id) -> Result<bool> {
        let span = info_span!(
            "repository.remove",
            entity_type = C::NAME,
            entity_id = %id,
            error = field::Empty,
            otel.status_code = field::Empty
        );

        let result: Result<bool> = self
            .store
            .remove(id)
            .instrument(span.clone())
            .await
            .map_err(Into::into);
        record_outcome(&span, &result);
        result
    }

    pub async fn watch(&self) -> Result<Snapshots<Vec<SetRecord<C::Id>>>> {
        Ok(self.store.watch().await?)
    }
}
