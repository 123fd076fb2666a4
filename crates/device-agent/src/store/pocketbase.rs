use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use protocol::records::LocationRecord;
use protocol::{
    pending_commands_filter, CommandEvent, CommandRecord, CommandStatus, CAPTURES_COLLECTION,
    COMMANDS_COLLECTION, LOCATIONS_COLLECTION,
};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::sse::SseParser;
use super::{CaptureUpload, RecordStore, StoreError};

const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const HTTP_IO_TIMEOUT: Duration = Duration::from_secs(15);
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);
const REALTIME_CONNECT_EVENT: &str = "PB_CONNECT";
const EVENT_BUFFER: usize = 64;

#[derive(Deserialize)]
struct AuthResponse {
    token: String,
    record: AuthRecord,
}

#[derive(Deserialize)]
struct AuthRecord {
    id: String,
}

#[derive(Deserialize)]
struct ListResponse {
    items: Vec<CommandRecord>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeConnect {
    client_id: String,
}

/// PocketBase-compatible REST and realtime client.
pub(crate) struct PocketBaseStore {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl PocketBaseStore {
    pub(crate) fn new(base_url: &str) -> Result<Self, StoreError> {
        let client = Client::builder()
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    /// Password login; returns the authenticated record id.
    pub(crate) async fn authenticate(
        &mut self,
        email: &str,
        password: &str,
    ) -> Result<String, StoreError> {
        let response = self
            .client
            .post(self.url("/api/collections/users/auth-with-password"))
            .timeout(HTTP_IO_TIMEOUT)
            .json(&json!({ "identity": email, "password": password }))
            .send()
            .await?;
        let auth: AuthResponse = check(response).await?.json().await?;
        self.token = Some(auth.token);
        Ok(auth.record.id)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn records_url(&self, collection: &str) -> String {
        self.url(&format!("/api/collections/{collection}/records"))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, token),
            None => request,
        }
    }

    async fn await_client_id(
        stream: &mut (impl futures_util::Stream<Item = reqwest::Result<bytes::Bytes>> + Unpin),
        parser: &mut SseParser,
    ) -> Result<String, StoreError> {
        while let Some(chunk) = stream.next().await {
            for event in parser.push(&chunk?) {
                if event.event == REALTIME_CONNECT_EVENT {
                    let connect: RealtimeConnect = serde_json::from_str(&event.data)
                        .map_err(|err| StoreError::Decode(err.to_string()))?;
                    return Ok(connect.client_id);
                }
            }
        }
        Err(StoreError::Disconnected)
    }
}

async fn check(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl RecordStore for PocketBaseStore {
    async fn subscribe_commands(&self) -> Result<mpsc::Receiver<CommandEvent>, StoreError> {
        let response = self
            .authorized(self.client.get(self.url("/api/realtime")))
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        let mut stream = Box::pin(check(response).await?.bytes_stream());
        let mut parser = SseParser::default();
        let client_id = Self::await_client_id(&mut stream, &mut parser).await?;

        let response = self
            .authorized(self.client.post(self.url("/api/realtime")))
            .timeout(HTTP_IO_TIMEOUT)
            .json(&json!({ "clientId": client_id, "subscriptions": [COMMANDS_COLLECTION] }))
            .send()
            .await?;
        check(response).await?;
        info!(client_id = %client_id, "realtime subscription registered");

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(async move {
            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        warn!(error = %err, "realtime stream failed");
                        return;
                    }
                };
                for event in parser.push(&chunk) {
                    if event.event != COMMANDS_COLLECTION {
                        debug!(event = %event.event, "ignoring realtime event");
                        continue;
                    }
                    match serde_json::from_str::<CommandEvent>(&event.data) {
                        Ok(command_event) => {
                            if tx.send(command_event).await.is_err() {
                                return;
                            }
                        }
                        Err(err) => warn!(error = %err, "undecodable realtime payload"),
                    }
                }
            }
            warn!("realtime stream ended");
        });
        Ok(rx)
    }

    async fn list_pending_commands(
        &self,
        user_id: &str,
        page_size: u32,
    ) -> Result<Vec<CommandRecord>, StoreError> {
        let filter = pending_commands_filter(user_id);
        let page_size = page_size.to_string();
        let response = self
            .authorized(self.client.get(self.records_url(COMMANDS_COLLECTION)))
            .timeout(HTTP_IO_TIMEOUT)
            .query(&[
                ("filter", filter.as_str()),
                ("sort", "-created"),
                ("page", "1"),
                ("perPage", page_size.as_str()),
            ])
            .send()
            .await?;
        let list: ListResponse = check(response).await?.json().await?;
        Ok(list.items)
    }

    async fn update_command_status(
        &self,
        command_id: &str,
        status: CommandStatus,
    ) -> Result<(), StoreError> {
        let url = format!("{}/{}", self.records_url(COMMANDS_COLLECTION), command_id);
        let response = self
            .authorized(self.client.patch(url))
            .timeout(HTTP_IO_TIMEOUT)
            .json(&json!({ "status": status.as_str() }))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn create_location(&self, record: &LocationRecord) -> Result<(), StoreError> {
        let response = self
            .authorized(self.client.post(self.records_url(LOCATIONS_COLLECTION)))
            .timeout(HTTP_IO_TIMEOUT)
            .json(record)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn upload_capture(&self, upload: &CaptureUpload) -> Result<(), StoreError> {
        let bytes = tokio::fs::read(&upload.path).await?;
        let file_name = upload
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.bin", upload.kind.as_str()));
        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(&upload.mime)?;
        let form = Form::new()
            .text("type", upload.kind.as_str())
            .text("user_id", upload.user_id.clone())
            .part("file", part);
        let response = self
            .authorized(self.client.post(self.records_url(CAPTURES_COLLECTION)))
            .timeout(UPLOAD_TIMEOUT)
            .multipart(form)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}
