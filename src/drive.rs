//! Drive/Docs REST implementation of [`SourceClient`].
//!
//! Credentials come from the environment (`DRIVE_ACCESS_TOKEN`); the
//! pipeline itself never sees authentication. Folder listings surface
//! `appProperties` as filterable metadata.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, error, info};

use crate::contract::{DocumentDescriptor, SourceClient, SourceError};
use crate::filter::FieldValue;

const DRIVE_API: &str = "https://www.googleapis.com/drive/v3";
const DOCS_API: &str = "https://docs.googleapis.com/v1";

pub struct DriveClient {
    http: Client,
    token: String,
    drive_base: String,
    docs_base: String,
}

impl DriveClient {
    /// Builds a client from the `DRIVE_ACCESS_TOKEN` environment variable.
    pub fn new_from_env() -> Result<Self, SourceError> {
        dotenvy::dotenv().ok();
        let token = std::env::var("DRIVE_ACCESS_TOKEN")
            .map_err(|_| "DRIVE_ACCESS_TOKEN environment variable not set")?;
        Ok(Self::new(token))
    }

    pub fn new(token: String) -> Self {
        Self {
            http: Client::new(),
            token,
            drive_base: DRIVE_API.to_string(),
            docs_base: DOCS_API.to_string(),
        }
    }

    /// Points the client at a different API host (tests).
    pub fn with_base_urls(mut self, drive_base: String, docs_base: String) -> Self {
        self.drive_base = drive_base;
        self.docs_base = docs_base;
        self
    }

    async fn get_json(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<serde_json::Value, SourceError> {
        let response = self
            .http
            .get(url)
            .query(query)
            .bearer_auth(&self.token)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let url = response.url().clone();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<failed to decode response body>"));
            error!(status = %status, url = %url, "Drive API returned error. Response body: {body}");
            return Err(format!("{url}: HTTP {status}").into());
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl SourceClient for DriveClient {
    async fn list_documents(
        &self,
        folder_id: &str,
    ) -> Result<Vec<DocumentDescriptor>, SourceError> {
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let url = format!("{}/files", self.drive_base);
            let query = listing_query(folder_id, page_token.as_deref());
            let body = self.get_json(&url, &query).await?;

            for file in body
                .get("files")
                .and_then(|v| v.as_array())
                .into_iter()
                .flatten()
            {
                let id = file.get("id").and_then(|v| v.as_str()).unwrap_or_default();
                if id.is_empty() {
                    continue;
                }
                let title = file
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("untitled");
                let mut metadata = BTreeMap::new();
                if let Some(props) = file.get("appProperties").and_then(|v| v.as_object()) {
                    for (key, value) in props {
                        if let Some(raw) = value.as_str() {
                            metadata.insert(key.clone(), FieldValue::from_property(raw));
                        }
                    }
                }
                documents.push(DocumentDescriptor {
                    id: id.to_string(),
                    title: title.to_string(),
                    metadata,
                });
            }

            page_token = body
                .get("nextPageToken")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            if page_token.is_none() {
                break;
            }
        }

        debug!(folder_id = %folder_id, count = documents.len(), "Listed Drive folder");
        Ok(documents)
    }

    async fn export_pdf(&self, file_id: &str) -> Result<Vec<u8>, SourceError> {
        let url = format!(
            "{}/files/{file_id}/export?mimeType=application/pdf",
            self.drive_base
        );
        let response = self.http.get(&url).bearer_auth(&self.token).send().await?;
        let status = response.status();
        if !status.is_success() {
            error!(status = %status, file_id = %file_id, "PDF export failed");
            return Err(format!("export of {file_id}: HTTP {status}").into());
        }
        let bytes = response.bytes().await?;
        debug!(file_id = %file_id, size = bytes.len(), "Exported PDF");
        Ok(bytes.to_vec())
    }

    async fn copy_document(&self, file_id: &str, title: &str) -> Result<String, SourceError> {
        let url = format!("{}/files/{file_id}/copy", self.drive_base);
        let body = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&json!({ "name": title }))
            .send()
            .await?
            .error_for_status()?
            .json::<serde_json::Value>()
            .await?;
        let copy_id = body
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or("copy response had no file id")?;
        info!(file_id = %file_id, copy_id = %copy_id, "Copied document");
        Ok(copy_id.to_string())
    }

    async fn batch_replace_text(
        &self,
        file_id: &str,
        replacements: &BTreeMap<String, String>,
    ) -> Result<usize, SourceError> {
        let requests: Vec<serde_json::Value> = replacements
            .iter()
            .map(|(placeholder, text)| {
                json!({
                    "replaceAllText": {
                        "containsText": { "text": placeholder, "matchCase": true },
                        "replaceText": text,
                    }
                })
            })
            .collect();

        let url = format!("{}/documents/{file_id}:batchUpdate", self.docs_base);
        let body = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&json!({ "requests": requests }))
            .send()
            .await?
            .error_for_status()?
            .json::<serde_json::Value>()
            .await?;

        // Sum occurrencesChanged over the replies; replies for untouched
        // placeholders are empty objects.
        let total = body
            .get("replies")
            .and_then(|v| v.as_array())
            .into_iter()
            .flatten()
            .filter_map(|reply| {
                reply
                    .get("replaceAllText")
                    .and_then(|r| r.get("occurrencesChanged"))
                    .and_then(|n| n.as_u64())
            })
            .sum::<u64>() as usize;
        Ok(total)
    }

    async fn delete_document(&self, file_id: &str) -> Result<(), SourceError> {
        let url = format!("{}/files/{file_id}", self.drive_base);
        self.http
            .delete(&url)
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Query parameters for one page of a folder listing.
fn listing_query(folder_id: &str, page_token: Option<&str>) -> Vec<(&'static str, String)> {
    let mut query = vec![
        (
            "q",
            format!("'{folder_id}' in parents and trashed = false"),
        ),
        (
            "fields",
            "nextPageToken,files(id,name,appProperties)".to_string(),
        ),
        ("orderBy", "name".to_string()),
        ("pageSize", "100".to_string()),
    ];
    if let Some(token) = page_token {
        query.push(("pageToken", token.to_string()));
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_query_is_percent_encoded_by_reqwest() {
        let request = Client::new()
            .get("https://drive.invalid/files")
            .query(&listing_query("abc", None))
            .build()
            .unwrap();
        let query = request.url().query().unwrap();
        assert!(query.contains("q=%27abc%27+in+parents+and+trashed+%3D+false"));
        assert!(!query.contains(' '));
    }

    #[test]
    fn listing_query_carries_the_page_token() {
        let query = listing_query("abc", Some("tok-2"));
        assert!(query.contains(&("pageToken", "tok-2".to_string())));
    }
}
