//! Dealership reconciliation
//!
//! Pushes dealerships listed in a local JSON file to the dealership API, skipping those the
//! API already knows.

use crate::api::DealershipSource;
use crate::error::log_absorbed;
use crate::models::DealershipApiRecord;
use crate::CrawlError;
use std::collections::HashSet;
use std::path::Path;
use tracing::{error, info};

/// Reads a JSON array of dealership payloads.
pub async fn load_dealerships_file(path: &Path) -> Result<Vec<DealershipApiRecord>, CrawlError> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        CrawlError::Io(format!("failed to read {}: {e}", path.display()))
    })?;
    let records: Vec<DealershipApiRecord> = serde_json::from_str(&content)?;
    info!(path = %path.display(), count = records.len(), "Loaded dealerships from file");
    Ok(records)
}

/// Ids of the dealerships already stored remotely.
pub fn existing_dealership_ids(records: &[DealershipApiRecord]) -> HashSet<String> {
    records
        .iter()
        .filter_map(|record| record.id.clone())
        .filter(|id| !id.is_empty())
        .collect()
}

/// Posts every dealership whose id is not in `existing_ids`, one request each.
///
/// Returns one flag per input record: `true` when it was posted, `false` when it was skipped
/// as existing or its post failed.
pub async fn post_new_dealerships(
    source: &dyn DealershipSource,
    dealerships: &[DealershipApiRecord],
    existing_ids: &HashSet<String>,
) -> Vec<bool> {
    let mut results = Vec::with_capacity(dealerships.len());

    for dealership in dealerships {
        let name = dealership.name.as_deref().unwrap_or("<unnamed>");
        let id = dealership.id.as_deref().unwrap_or_default();

        if existing_ids.contains(id) {
            error!("Skipped {} (ID: {}) as it already exists", name, id);
            results.push(false);
            continue;
        }

        match source.create_dealership(dealership).await {
            Ok(()) => {
                info!("Posted {} (ID: {})", name, id);
                results.push(true);
            }
            Err(e) => {
                log_absorbed(&format!("Failed to post {name} (ID: {id})"), &e);
                results.push(false);
            }
        }
    }

    results
}

/// Loads `path`, compares it against the API and posts what is missing.
pub async fn reconcile_file(source: &dyn DealershipSource, path: &Path) -> Result<Vec<bool>, CrawlError> {
    let to_post = load_dealerships_file(path).await?;
    let existing = source.fetch_dealerships().await?;
    let existing_ids = existing_dealership_ids(&existing);
    let results = post_new_dealerships(source, &to_post, &existing_ids).await;

    info!(
        posted = results.iter().filter(|posted| **posted).count(),
        total = results.len(),
        "Reconciliation finished"
    );
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::fakes::FakeDealershipSource;
    use std::io::Write;

    fn record(id: &str) -> DealershipApiRecord {
        DealershipApiRecord {
            id: Some(id.to_string()),
            name: Some(format!("Dealer {id}")),
            ..Default::default()
        }
    }

    #[test]
    fn test_existing_ids_ignore_missing_ids() {
        let ids = existing_dealership_ids(&[record("a"), DealershipApiRecord::default(), record("")]);
        assert_eq!(ids, HashSet::from(["a".to_string()]));
    }

    #[tokio::test]
    async fn test_only_new_dealerships_are_posted() {
        let source = FakeDealershipSource::new(vec![]).rejecting("c");
        let existing = HashSet::from(["a".to_string()]);

        let results =
            post_new_dealerships(&source, &[record("a"), record("b"), record("c")], &existing).await;

        assert_eq!(results, vec![false, true, false]);
        assert_eq!(source.created_ids(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_reconcile_file_against_api() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"id":"a","name":"Known"}},{{"id":"b","name":"New","inventory_source":{{"url":"https://cars.test/dealer/b"}}}}]"#
        )
        .unwrap();
        let source = FakeDealershipSource::new(vec![record("a")]);

        let results = reconcile_file(&source, file.path()).await.unwrap();

        assert_eq!(results, vec![false, true]);
        assert_eq!(source.created_ids(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_unreadable_file_is_io_error() {
        let source = FakeDealershipSource::new(vec![]);
        let err = reconcile_file(&source, Path::new("/nonexistent/dealerships.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::Io(_)));
    }

    #[tokio::test]
    async fn test_unavailable_api_posts_nothing() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"id":"b"}}]"#).unwrap();
        let source = FakeDealershipSource::new(vec![]).unavailable();

        assert!(reconcile_file(&source, file.path()).await.is_err());
        assert!(source.created_ids().is_empty());
    }
}
