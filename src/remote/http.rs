//! A thin `reqwest`-backed implementation of `DriveApi`, modeled on a
//! Google Drive–style REST surface. This is the out-of-scope HTTP client
//! the rest of the engine assumes exists; it is shipped so the binary can
//! run against a real account, but none of the retry/paging logic lives
//! here — that belongs to `RemoteClient`.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::EngineError;
use crate::model::{Change, ChangesPage, FileInfo, FileListPage};
use crate::remote::DriveApi;

const FIELDS: &str = "id,name,mimeType,md5Checksum,size,modifiedTime,parents,trashed";

pub struct HttpDriveApi {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl HttpDriveApi {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        HttpDriveApi {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn ensure_ok(resp: reqwest::Response) -> Result<reqwest::Response, EngineError> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        let msg = format!("drive API error ({status}): {body}");
        if status.is_server_error() || status.as_u16() == 429 {
            Err(EngineError::TransientRemote(msg))
        } else {
            Err(EngineError::PermanentRemote(msg))
        }
    }

    fn map_transport_err(err: reqwest::Error) -> EngineError {
        if err.is_connect() || err.is_timeout() {
            EngineError::TransientRemote(err.to_string())
        } else {
            EngineError::PermanentRemote(err.to_string())
        }
    }
}

#[derive(Deserialize)]
struct RawFileList {
    files: Vec<FileInfo>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct RawStartToken {
    #[serde(rename = "startPageToken")]
    start_page_token: String,
}

#[derive(Deserialize)]
struct RawChangeList {
    changes: Vec<RawChange>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
    #[serde(rename = "newStartPageToken")]
    new_start_page_token: Option<String>,
}

#[derive(Deserialize)]
struct RawChange {
    #[serde(rename = "fileId")]
    file_id: String,
    removed: bool,
    file: Option<FileInfo>,
}

#[async_trait]
impl DriveApi for HttpDriveApi {
    async fn files_list(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
    ) -> Result<FileListPage, EngineError> {
        let mut req = self
            .client
            .get(format!("{}/files", self.base_url))
            .bearer_auth(&self.token)
            .query(&[
                ("q", format!("'{folder_id}' in parents and trashed = false")),
                ("corpora", "user".to_string()),
                ("spaces", "drive".to_string()),
                ("fields", format!("nextPageToken,files({FIELDS})")),
            ]);
        if let Some(tok) = page_token {
            req = req.query(&[("pageToken", tok)]);
        }
        let resp = req.send().await.map_err(Self::map_transport_err)?;
        let raw: RawFileList = Self::ensure_ok(resp)
            .await?
            .json()
            .await
            .map_err(Self::map_transport_err)?;
        Ok(FileListPage {
            files: raw.files,
            next_page_token: raw.next_page_token,
        })
    }

    async fn files_get(&self, id: &str) -> Result<FileInfo, EngineError> {
        let resp = self
            .client
            .get(format!("{}/files/{}", self.base_url, id))
            .bearer_auth(&self.token)
            .query(&[("fields", FIELDS)])
            .send()
            .await
            .map_err(Self::map_transport_err)?;
        Self::ensure_ok(resp)
            .await?
            .json()
            .await
            .map_err(Self::map_transport_err)
    }

    async fn files_get_content(&self, id: &str) -> Result<Vec<u8>, EngineError> {
        let resp = self
            .client
            .get(format!("{}/files/{}", self.base_url, id))
            .bearer_auth(&self.token)
            .query(&[("alt", "media")])
            .send()
            .await
            .map_err(Self::map_transport_err)?;
        let bytes = Self::ensure_ok(resp)
            .await?
            .bytes()
            .await
            .map_err(Self::map_transport_err)?;
        Ok(bytes.to_vec())
    }

    async fn files_create(
        &self,
        parent_id: &str,
        name: &str,
        is_folder: bool,
        content: Option<Vec<u8>>,
    ) -> Result<FileInfo, EngineError> {
        let mime = if is_folder {
            "application/vnd.google-apps.folder"
        } else {
            "application/octet-stream"
        };
        let metadata = serde_json::json!({ "name": name, "parents": [parent_id], "mimeType": mime });

        let resp = match content {
            Some(bytes) => {
                let form = reqwest::multipart::Form::new()
                    .text("metadata", metadata.to_string())
                    .part("media", reqwest::multipart::Part::bytes(bytes));
                self.client
                    .post(format!("{}/files", self.base_url))
                    .bearer_auth(&self.token)
                    .query(&[("uploadType", "multipart"), ("fields", FIELDS)])
                    .multipart(form)
                    .send()
                    .await
            }
            None => {
                self.client
                    .post(format!("{}/files", self.base_url))
                    .bearer_auth(&self.token)
                    .query(&[("fields", FIELDS)])
                    .json(&metadata)
                    .send()
                    .await
            }
        }
        .map_err(Self::map_transport_err)?;

        Self::ensure_ok(resp)
            .await?
            .json()
            .await
            .map_err(Self::map_transport_err)
    }

    async fn files_update(&self, id: &str, content: Vec<u8>) -> Result<FileInfo, EngineError> {
        let resp = self
            .client
            .patch(format!("{}/files/{}", self.base_url, id))
            .bearer_auth(&self.token)
            .query(&[("uploadType", "media"), ("fields", FIELDS)])
            .body(content)
            .send()
            .await
            .map_err(Self::map_transport_err)?;
        Self::ensure_ok(resp)
            .await?
            .json()
            .await
            .map_err(Self::map_transport_err)
    }

    async fn files_delete(&self, id: &str) -> Result<(), EngineError> {
        let resp = self
            .client
            .delete(format!("{}/files/{}", self.base_url, id))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(Self::map_transport_err)?;
        Self::ensure_ok(resp).await?;
        Ok(())
    }

    async fn changes_start_token(&self) -> Result<String, EngineError> {
        let resp = self
            .client
            .get(format!("{}/changes/startPageToken", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(Self::map_transport_err)?;
        let raw: RawStartToken = Self::ensure_ok(resp)
            .await?
            .json()
            .await
            .map_err(Self::map_transport_err)?;
        Ok(raw.start_page_token)
    }

    async fn changes_list(&self, page_token: &str) -> Result<ChangesPage, EngineError> {
        let resp = self
            .client
            .get(format!("{}/changes", self.base_url))
            .bearer_auth(&self.token)
            .query(&[
                ("pageToken", page_token),
                ("corpora", "user"),
                ("spaces", "drive"),
                ("restrictToMyDrive", "true"),
                (
                    "fields",
                    "nextPageToken,newStartPageToken,changes(fileId,removed,file(id,name,mimeType,md5Checksum,size,modifiedTime,parents,trashed))",
                ),
            ])
            .send()
            .await
            .map_err(Self::map_transport_err)?;
        let raw: RawChangeList = Self::ensure_ok(resp)
            .await?
            .json()
            .await
            .map_err(Self::map_transport_err)?;
        Ok(ChangesPage {
            changes: raw
                .changes
                .into_iter()
                .map(|c| Change {
                    file_id: c.file_id,
                    removed: c.removed,
                    file: c.file,
                })
                .collect(),
            next_page_token: raw.next_page_token,
            new_start_page_token: raw.new_start_page_token,
        })
    }
}
