//! Enumerates candidate body documents across one or more source folders.
//!
//! A folder that fails to list is a warning and the remaining folders are
//! still consulted; only when every folder fails is the run aborted.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::contract::{DocumentDescriptor, SourceClient};
use crate::error::{Result, SongbookError};
use crate::filter::FilterExpression;

/// Lists, deduplicates, orders, filters and truncates the body-document set.
///
/// The limit applies after the filter, so `limit=N` always yields
/// `min(N, matching)` documents. Ordering is deterministic for a fixed input
/// set: case-insensitive title, ties broken by remote ID.
pub async fn list_body_documents<C>(
    client: &C,
    source_folders: &[String],
    filter: Option<&FilterExpression>,
    limit: Option<usize>,
) -> Result<Vec<DocumentDescriptor>>
where
    C: SourceClient + ?Sized,
{
    let mut documents: Vec<DocumentDescriptor> = Vec::new();
    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut failures: Vec<String> = Vec::new();

    for folder_id in source_folders {
        match client.list_documents(folder_id).await {
            Ok(listed) => {
                debug!(folder_id = %folder_id, count = listed.len(), "Listed source folder");
                for doc in listed {
                    // A document appearing in two folders counts once.
                    if seen_ids.insert(doc.id.clone()) {
                        documents.push(doc);
                    }
                }
            }
            Err(e) => {
                warn!(folder_id = %folder_id, error = %e, "Failed to list source folder, continuing with the rest");
                failures.push(format!("{folder_id}: {e}"));
            }
        }
    }

    if !source_folders.is_empty() && failures.len() == source_folders.len() {
        return Err(SongbookError::SourceUnavailable {
            detail: failures.join("; "),
        });
    }

    documents.sort_by(|a, b| {
        (a.title.to_lowercase(), &a.id).cmp(&(b.title.to_lowercase(), &b.id))
    });

    if let Some(filter) = filter {
        let before = documents.len();
        let mut matching = Vec::with_capacity(documents.len());
        for doc in documents {
            if filter.matches(&doc)? {
                matching.push(doc);
            }
        }
        documents = matching;
        info!(
            before,
            after = documents.len(),
            field = %filter.field,
            "Applied client-side filter"
        );
    }

    if let Some(limit) = limit {
        if documents.len() > limit {
            documents.truncate(limit);
        }
        debug!(limit, count = documents.len(), "Applied document limit");
    }

    info!(count = documents.len(), "Collected body documents");
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::MockSourceClient;

    fn descriptor(id: &str, title: &str) -> DocumentDescriptor {
        DocumentDescriptor::new(id, title)
    }

    #[tokio::test]
    async fn merges_and_deduplicates_across_folders() {
        let mut client = MockSourceClient::new();
        client
            .expect_list_documents()
            .withf(|folder| folder == "folder-a")
            .returning(|_| Ok(vec![descriptor("1", "Alpha"), descriptor("2", "Bravo")]));
        client
            .expect_list_documents()
            .withf(|folder| folder == "folder-b")
            .returning(|_| Ok(vec![descriptor("2", "Bravo"), descriptor("3", "Charlie")]));

        let docs = list_body_documents(
            &client,
            &["folder-a".to_string(), "folder-b".to_string()],
            None,
            None,
        )
        .await
        .unwrap();

        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn orders_by_title_case_insensitively() {
        let mut client = MockSourceClient::new();
        client.expect_list_documents().returning(|_| {
            Ok(vec![
                descriptor("1", "zebra"),
                descriptor("2", "Apple"),
                descriptor("3", "mango"),
            ])
        });

        let docs = list_body_documents(&client, &["f".to_string()], None, None)
            .await
            .unwrap();
        let titles: Vec<&str> = docs.iter().map(|d| d.title.as_str()).collect();
        assert_eq!(titles, vec!["Apple", "mango", "zebra"]);
    }

    #[tokio::test]
    async fn limit_applies_after_filter() {
        use crate::filter::FieldValue;

        let mut client = MockSourceClient::new();
        client.expect_list_documents().returning(|_| {
            Ok(vec![
                descriptor("a", "A").with_metadata("year", FieldValue::Number(1990.0)),
                descriptor("b", "B").with_metadata("year", FieldValue::Number(2005.0)),
                descriptor("c", "C").with_metadata("year", FieldValue::Number(2010.0)),
            ])
        });

        let filter = FilterExpression::parse("year:gte:2000").unwrap();
        let docs = list_body_documents(&client, &["f".to_string()], Some(&filter), Some(1))
            .await
            .unwrap();

        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "b");
    }

    #[tokio::test]
    async fn one_failing_folder_yields_partial_results() {
        let mut client = MockSourceClient::new();
        client
            .expect_list_documents()
            .withf(|folder| folder == "good")
            .returning(|_| Ok(vec![descriptor("1", "Alpha")]));
        client
            .expect_list_documents()
            .withf(|folder| folder == "bad")
            .returning(|_| Err("503 backend unavailable".into()));

        let docs = list_body_documents(
            &client,
            &["good".to_string(), "bad".to_string()],
            None,
            None,
        )
        .await
        .unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[tokio::test]
    async fn all_folders_failing_is_fatal() {
        let mut client = MockSourceClient::new();
        client
            .expect_list_documents()
            .returning(|_| Err("403 forbidden".into()));

        let err = list_body_documents(&client, &["a".to_string(), "b".to_string()], None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SongbookError::SourceUnavailable { .. }));
    }
}
