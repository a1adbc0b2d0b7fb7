use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use parking_lot::Mutex;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use uuid::Uuid;

use super::error::RemoteError;
use super::query::{Field, Filter, Order, Query};
use super::traits::{RemoteResult, TrackingService};
use super::types::*;
use crate::config::{Settings, REQUEST_TIMEOUT_SECONDS};

/// Location id the server uses for its own managed storage.
const SERVER_LOCATION_ID: &str = "3a372bde-05bc-11e4-8908-20c9d081909b";

pub const VERSION_FIELDS: [Field; 7] = [
    Field::Id,
    Field::AssetName,
    Field::VersionNumber,
    Field::ThumbnailId,
    Field::StatusId,
    Field::StatusName,
    Field::ProjectId,
];

/// JSON operations API client for the tracking server.
pub struct HttpTracker {
    client: Client,
    api_url: String,
    server_url: String,
    user: String,
    api_key: String,
    user_id: Mutex<Option<String>>,
}

impl HttpTracker {
    pub fn new(settings: &Settings) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .user_agent(concat!("dailies/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            api_url: settings.api_url(),
            server_url: settings.server_url.trim().trim_end_matches('/').to_string(),
            user: settings.user.clone(),
            api_key: settings.credential.clone(),
            user_id: Mutex::new(None),
        })
    }

    async fn call(&self, operations: Vec<Value>) -> RemoteResult<Vec<Value>> {
        let expected = operations.len();
        let response = self
            .client
            .post(&self.api_url)
            .header("ftrack-user", &self.user)
            .header("ftrack-api-key", &self.api_key)
            .header("Accept", "application/json")
            .json(&operations)
            .send()
            .await?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        match status.as_u16() {
            401 | 403 => {
                log::error!("Server rejected credentials for user '{}'", self.user);
                return Err(RemoteError::Auth(format!("HTTP {}", status)));
            }
            404 => return Err(RemoteError::NotFound(format!("HTTP 404 at {}", self.api_url))),
            _ if !status.is_success() => {
                log::warn!("Request failed ({}) at {}: {}", status, self.api_url, text);
                return Err(RemoteError::Network(format!("HTTP {} - {}", status, text)));
            }
            _ => {}
        }

        let data: Value = serde_json::from_str(&text)
            .map_err(|e| RemoteError::InvalidResponse(format!("JSON error: {}", e)))?;
        unwrap_results(data, expected)
    }

    async fn query_rows(&self, query: &Query) -> RemoteResult<Vec<Value>> {
        let expression = query.render();
        log::debug!("Query: {}", expression);

        let mut results = self
            .call(vec![json!({ "action": "query", "expression": expression })])
            .await?;
        let result = results
            .pop()
            .ok_or_else(|| RemoteError::InvalidResponse("Empty result set".to_string()))?;

        match result.get("data") {
            Some(Value::Array(rows)) => Ok(rows.clone()),
            _ => Err(RemoteError::InvalidResponse(
                "Query result without data array".to_string(),
            )),
        }
    }

    async fn create(&self, entity: EntityType, data: Value) -> RemoteResult<Value> {
        let mut results = self
            .call(vec![json!({
                "action": "create",
                "entity_type": entity.as_str(),
                "entity_data": data,
            })])
            .await?;
        let result = results
            .pop()
            .ok_or_else(|| RemoteError::InvalidResponse("Empty create result".to_string()))?;
        result
            .get("data")
            .cloned()
            .ok_or_else(|| RemoteError::InvalidResponse(format!("Create {} returned no data", entity)))
    }

    async fn current_user_id(&self) -> RemoteResult<String> {
        if let Some(id) = self.user_id.lock().clone() {
            return Ok(id);
        }

        let query = Query::select(EntityType::User)
            .fields([Field::Id])
            .filter(Filter::eq(Field::Username, &self.user))
            .limit(1);
        let rows = self.query_rows(&query).await?;
        let id = rows
            .first()
            .and_then(|row| str_field(row, "id"))
            .ok_or_else(|| RemoteError::Auth(format!("Unknown user '{}'", self.user)))?;

        *self.user_id.lock() = Some(id.clone());
        Ok(id)
    }

    fn thumbnail_url(&self, thumbnail_id: &str) -> String {
        format!(
            "{}/component/thumbnail?id={}",
            self.server_url,
            urlencoding::encode(thumbnail_id)
        )
    }
}

#[async_trait]
impl TrackingService for HttpTracker {
    fn name(&self) -> &str {
        "ftrack"
    }

    async fn fetch_playlists(&self, project_id: Option<&str>) -> RemoteResult<Vec<RemotePlaylist>> {
        let project_filter = project_id.map(|p| Filter::eq(Field::ProjectId, p));

        let sessions = Query::select(EntityType::ReviewSession)
            .fields([Field::Id, Field::Name, Field::Description, Field::ProjectId, Field::CreatedAt])
            .filter_opt(project_filter.clone());
        let lists = Query::select(EntityType::AssetVersionList)
            .fields([Field::Id, Field::Name, Field::CategoryName, Field::ProjectId, Field::CreatedAt])
            .filter_opt(project_filter);

        let mut playlists = Vec::new();
        for row in self.query_rows(&sessions).await? {
            playlists.extend(parse_playlist(&row, PlaylistKind::Session));
        }
        for row in self.query_rows(&lists).await? {
            playlists.extend(parse_playlist(&row, PlaylistKind::List));
        }

        log::debug!("Fetched {} playlists", playlists.len());
        Ok(playlists)
    }

    async fn fetch_playlist_versions(
        &self,
        playlist: &RemotePlaylist,
    ) -> RemoteResult<Vec<RemoteVersion>> {
        let membership = match playlist.kind {
            PlaylistKind::Session => Filter::eq(Field::InReviewSession, &playlist.id),
            PlaylistKind::List => Filter::eq(Field::InList, &playlist.id),
        };
        let query = Query::select(EntityType::AssetVersion)
            .fields(VERSION_FIELDS)
            .filter(membership);
        self.search_versions(&query).await
    }

    async fn search_versions(&self, query: &Query) -> RemoteResult<Vec<RemoteVersion>> {
        let rows = self.query_rows(query).await?;
        Ok(rows
            .iter()
            .filter_map(|row| parse_version(row, |id| self.thumbnail_url(id)))
            .collect())
    }

    async fn get_version(&self, version_id: &str) -> RemoteResult<Option<RemoteVersion>> {
        let query = Query::select(EntityType::AssetVersion)
            .fields(VERSION_FIELDS)
            .filter(Filter::eq(Field::Id, version_id))
            .limit(1);
        Ok(self.search_versions(&query).await?.into_iter().next())
    }

    async fn create_note(&self, request: &NoteRequest) -> RemoteResult<RemoteNote> {
        let user_id = self.current_user_id().await?;
        let note_id = Uuid::new_v4().to_string();

        self.create(
            EntityType::Note,
            json!({
                "id": note_id,
                "content": request.content,
                "parent_id": request.version_id,
                "parent_type": EntityType::AssetVersion.as_str(),
                "user_id": user_id,
            }),
        )
        .await?;

        if let Some(label_id) = &request.label_id {
            self.create(
                EntityType::NoteLabelLink,
                json!({ "note_id": note_id, "label_id": label_id }),
            )
            .await?;
        }

        Ok(RemoteNote {
            id: note_id,
            version_id: request.version_id.clone(),
            content: request.content.clone(),
            label_id: request.label_id.clone(),
        })
    }

    async fn create_playlist(
        &self,
        name: &str,
        project_id: Option<&str>,
        kind: PlaylistKind,
    ) -> RemoteResult<RemotePlaylist> {
        let id = Uuid::new_v4().to_string();
        self.create(
            EntityType::for_playlist(kind),
            json!({ "id": id, "name": name, "project_id": project_id }),
        )
        .await?;

        Ok(RemotePlaylist {
            id,
            name: name.to_string(),
            description: None,
            kind,
            category: None,
            project_id: project_id.map(str::to_string),
            created_at: Some(chrono::Utc::now().timestamp()),
        })
    }

    async fn add_version_to_playlist(
        &self,
        playlist: &RemotePlaylist,
        version_id: &str,
    ) -> RemoteResult<()> {
        match playlist.kind {
            PlaylistKind::Session => {
                self.create(
                    EntityType::ReviewSessionObject,
                    json!({ "review_session_id": playlist.id, "asset_version_id": version_id }),
                )
                .await?;
            }
            PlaylistKind::List => {
                self.create(
                    EntityType::ListObject,
                    json!({ "list_id": playlist.id, "entity_id": version_id }),
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn update_status(&self, entity: &EntityRef, status_id: &str) -> RemoteResult<()> {
        self.call(vec![json!({
            "action": "update",
            "entity_type": entity.entity_type.as_str(),
            "entity_key": [entity.id],
            "entity_data": { "status_id": status_id },
        })])
        .await?;
        Ok(())
    }

    async fn upload_component(
        &self,
        name: &str,
        media_type: &str,
        bytes: Vec<u8>,
    ) -> RemoteResult<String> {
        let component_id = Uuid::new_v4().to_string();
        let (stem, extension) = split_file_name(name);
        let size = bytes.len();
        let digest = md5::compute(&bytes);
        let content_md5 = general_purpose::STANDARD.encode(digest.0);

        self.create(
            EntityType::FileComponent,
            json!({ "id": component_id, "name": stem, "file_type": extension, "size": size }),
        )
        .await?;

        let mut results = self
            .call(vec![json!({
                "action": "get_upload_metadata",
                "component_id": component_id,
                "file_name": name,
                "file_size": size,
                "checksum": content_md5,
            })])
            .await?;
        let metadata = results
            .pop()
            .ok_or_else(|| RemoteError::Upload("No upload metadata returned".to_string()))?;
        let url = metadata
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| RemoteError::Upload("Upload metadata missing url".to_string()))?;

        let mut request = self
            .client
            .put(url)
            .header("Content-Type", media_type)
            .header("Content-MD5", &content_md5);
        if let Some(headers) = metadata.get("headers").and_then(Value::as_object) {
            for (key, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(key.as_str(), value);
                }
            }
        }

        let response = request
            .body(bytes)
            .send()
            .await
            .map_err(|e| RemoteError::Upload(e.to_string()))?;
        if !response.status().is_success() {
            return Err(RemoteError::Upload(format!(
                "HTTP {} uploading {}",
                response.status(),
                name
            )));
        }

        self.create(
            EntityType::ComponentLocation,
            json!({
                "component_id": component_id,
                "location_id": SERVER_LOCATION_ID,
                "resource_identifier": component_id,
            }),
        )
        .await?;

        log::info!(
            "Uploaded component '{}' ({} bytes, md5 {})",
            name,
            size,
            hex::encode(digest.0)
        );
        Ok(component_id)
    }

    async fn link_component(&self, note_id: &str, component_id: &str) -> RemoteResult<()> {
        self.create(
            EntityType::NoteComponent,
            json!({ "note_id": note_id, "component_id": component_id }),
        )
        .await?;
        Ok(())
    }

    async fn resolve_statuses(
        &self,
        entity_type: EntityType,
        project_id: &str,
    ) -> RemoteResult<Vec<StatusOption>> {
        let project = Query::select(EntityType::Project)
            .fields([Field::Id, Field::ProjectSchemaId])
            .filter(Filter::eq(Field::Id, project_id))
            .limit(1);
        let rows = self.query_rows(&project).await?;
        let row = rows
            .first()
            .ok_or_else(|| RemoteError::NotFound(format!("Project {}", project_id)))?;
        let schema_id = str_field(row, "project_schema_id").ok_or_else(|| {
            RemoteError::Schema(format!("Project {} has no workflow schema", project_id))
        })?;

        let statuses = Query::select(EntityType::Status)
            .fields([Field::Id, Field::Name, Field::Color])
            .filter(Filter::eq(Field::SchemaId, schema_id))
            .filter(Filter::eq(Field::WorkflowObjectType, entity_type.as_str()));
        let rows = self.query_rows(&statuses).await?;
        Ok(rows.iter().filter_map(parse_status).collect())
    }

    async fn fetch_note_labels(&self) -> RemoteResult<Vec<NoteLabel>> {
        let query = Query::select(EntityType::NoteLabel)
            .fields([Field::Id, Field::Name, Field::Color])
            .order_by(Field::Name, Order::Ascending);
        let rows = self.query_rows(&query).await?;
        Ok(rows.iter().filter_map(parse_label).collect())
    }
}

/// Validate a batch response: either an exception object or one result per operation.
fn unwrap_results(data: Value, expected: usize) -> RemoteResult<Vec<Value>> {
    if let Some(exception) = data.get("exception").and_then(Value::as_str) {
        let content = data
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return Err(RemoteError::from_exception(exception, content));
    }

    match data {
        Value::Array(items) if items.len() == expected => Ok(items),
        Value::Array(items) => Err(RemoteError::InvalidResponse(format!(
            "Expected {} results, got {}",
            expected,
            items.len()
        ))),
        other => Err(RemoteError::InvalidResponse(format!(
            "Expected result array, got {}",
            other
        ))),
    }
}

/// Read a possibly nested attribute (`"status.name"`) as a string.
fn str_field(row: &Value, path: &str) -> Option<String> {
    let mut current = row;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    match current {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Datetimes arrive either as plain strings or as `{"__type__": "datetime", "value": ...}`.
fn timestamp_field(row: &Value, key: &str) -> Option<i64> {
    let raw = row.get(key)?;
    let text = raw
        .get("value")
        .and_then(Value::as_str)
        .or_else(|| raw.as_str())?;
    chrono::DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.timestamp())
}

fn parse_playlist(row: &Value, kind: PlaylistKind) -> Option<RemotePlaylist> {
    Some(RemotePlaylist {
        id: str_field(row, "id")?,
        name: str_field(row, "name").unwrap_or_default(),
        description: str_field(row, "description"),
        kind,
        category: str_field(row, "category.name"),
        project_id: str_field(row, "project_id"),
        created_at: timestamp_field(row, "created_at"),
    })
}

fn parse_version(row: &Value, thumbnail_url: impl Fn(&str) -> String) -> Option<RemoteVersion> {
    Some(RemoteVersion {
        id: str_field(row, "id")?,
        name: str_field(row, "asset.name").unwrap_or_default(),
        version_number: row.get("version").and_then(Value::as_i64).unwrap_or(0),
        thumbnail_url: str_field(row, "thumbnail_id").map(|id| thumbnail_url(&id)),
        status_id: str_field(row, "status_id"),
        status_name: str_field(row, "status.name"),
        project_id: str_field(row, "project_id"),
    })
}

fn parse_status(row: &Value) -> Option<StatusOption> {
    Some(StatusOption {
        id: str_field(row, "id")?,
        name: str_field(row, "name")?,
        color: str_field(row, "color"),
    })
}

fn parse_label(row: &Value) -> Option<NoteLabel> {
    Some(NoteLabel {
        id: str_field(row, "id")?,
        name: str_field(row, "name")?,
        color: str_field(row, "color"),
    })
}

fn split_file_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    }
}
