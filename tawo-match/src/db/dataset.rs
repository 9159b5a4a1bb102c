//! Persisted dataset blob

use tawo_common::{Dataset, Result};

use super::scoped_storage::{ScopedStore, DATASET_KEY};

/// Write the dataset (replacing any previous upload)
pub async fn save_dataset(store: &ScopedStore, dataset: &Dataset) -> Result<()> {
    let encoded = serde_json::to_string(dataset)?;
    store.set(DATASET_KEY, &encoded).await
}

/// Read the dataset back
///
/// A corrupt blob reads as "no dataset" rather than an error.
pub async fn load_dataset(store: &ScopedStore) -> Result<Option<Dataset>> {
    let Some(text) = store.get(DATASET_KEY).await? else {
        return Ok(None);
    };

    match serde_json::from_str(&text) {
        Ok(dataset) => Ok(Some(dataset)),
        Err(e) => {
            tracing::warn!(error = %e, "Persisted dataset is corrupt, ignoring");
            Ok(None)
        }
    }
}
