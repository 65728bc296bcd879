use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use parley_core::config::DatabaseConfig;
use parley_core::domain::conversation::{
    Conversation, ConversationKey, ConversationRecord, Message,
};

use super::{duplicate, ConversationRepository, RepositoryError};

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
const MAX_APPEND_ATTEMPTS: usize = 5;
const LIST_PAGE_SIZE: &str = "300";
const TIMESTAMP_FIELDS: &[&str] = &["ts", "created_at", "updated_at"];

/// How requests to Firestore are authorized.
pub enum FirestoreAuth {
    /// The local emulator accepts unauthenticated requests.
    Emulator,
    Static(SecretString),
    /// Token from the GCE / Cloud Run metadata server, cached until shortly
    /// before it expires.
    Metadata { endpoint: String, cached: Mutex<Option<CachedToken>> },
}

pub struct CachedToken {
    value: SecretString,
    refresh_at: Instant,
}

impl FirestoreAuth {
    pub fn metadata() -> Self {
        Self::metadata_at(METADATA_TOKEN_URL)
    }

    pub fn metadata_at(endpoint: impl Into<String>) -> Self {
        Self::Metadata { endpoint: endpoint.into(), cached: Mutex::new(None) }
    }
}

pub struct FirestoreConversationRepository {
    http: reqwest::Client,
    base_url: String,
    database_path: String,
    collection: String,
    auth: FirestoreAuth,
}

#[derive(Debug, Deserialize)]
struct FirestoreDocument {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
    #[serde(rename = "updateTime")]
    update_time: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ListDocumentsResponse {
    #[serde(default)]
    documents: Vec<FirestoreDocument>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

struct Failure {
    http_status: StatusCode,
    status: String,
    message: String,
}

impl Failure {
    async fn read(response: Response) -> Self {
        let http_status = response.status();
        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorEnvelope>(&body) {
            Ok(envelope) => Self {
                http_status,
                status: envelope.error.status,
                message: envelope.error.message,
            },
            Err(_) => Self { http_status, status: String::new(), message: body },
        }
    }

    fn is_precondition_conflict(&self) -> bool {
        self.status == "FAILED_PRECONDITION"
            || self.status == "ABORTED"
            || (self.http_status == StatusCode::CONFLICT && self.status != "ALREADY_EXISTS")
    }

    fn into_error(self, operation: &str) -> RepositoryError {
        RepositoryError::Firestore(format!(
            "{operation} failed with HTTP {}: {} {}",
            self.http_status.as_u16(),
            self.status,
            self.message
        ))
    }
}

impl FirestoreConversationRepository {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        project_id: &str,
        database_id: &str,
        collection: &str,
        auth: FirestoreAuth,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            database_path: format!("projects/{project_id}/databases/{database_id}"),
            collection: collection.to_owned(),
            auth,
        }
    }

    pub fn from_config(config: &DatabaseConfig) -> Result<Self, RepositoryError> {
        let firestore = &config.firestore;
        let project_id = firestore
            .project_id
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| RepositoryError::Firestore("firestore project id is not set".into()))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| RepositoryError::Firestore(format!("http client: {e}")))?;

        let (base_url, auth) = match firestore.emulator_host.as_deref() {
            Some(host) => (format!("http://{}/v1", host.trim_end_matches('/')), FirestoreAuth::Emulator),
            None => {
                let auth = match firestore.access_token.clone() {
                    Some(token) => FirestoreAuth::Static(token),
                    None => FirestoreAuth::metadata(),
                };
                (firestore.base_url.clone(), auth)
            }
        };

        Ok(Self::new(
            http,
            &base_url,
            project_id,
            &firestore.database_id,
            &config.collection,
            auth,
        ))
    }

    fn collection_url(&self) -> String {
        format!("{}/{}/documents/{}", self.base_url, self.database_path, self.collection)
    }

    fn document_url(&self, key: &ConversationKey) -> String {
        format!("{}/{}", self.collection_url(), key.document_id())
    }

    fn commit_url(&self) -> String {
        format!("{}/{}/documents:commit", self.base_url, self.database_path)
    }

    async fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, RepositoryError> {
        let token = match &self.auth {
            FirestoreAuth::Emulator => return Ok(request),
            FirestoreAuth::Static(token) => token.expose_secret().to_owned(),
            FirestoreAuth::Metadata { endpoint, cached } => {
                self.metadata_token(endpoint, cached).await?
            }
        };
        Ok(request.bearer_auth(token))
    }

    async fn metadata_token(
        &self,
        endpoint: &str,
        cached: &Mutex<Option<CachedToken>>,
    ) -> Result<String, RepositoryError> {
        let mut guard = cached.lock().await;
        if let Some(token) = guard.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.expose_secret().to_owned());
            }
        }

        let response = self
            .http
            .get(endpoint)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| RepositoryError::Firestore(format!("metadata token request: {e}")))?;
        if !response.status().is_success() {
            return Err(Failure::read(response).await.into_error("metadata token"));
        }
        let token: MetadataToken = response
            .json()
            .await
            .map_err(|e| RepositoryError::Decode(format!("metadata token: {e}")))?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        debug!(
            event_name = "db.firestore.token_refreshed",
            expires_in = token.expires_in,
            "fetched firestore access token from metadata server"
        );
        *guard = Some(CachedToken {
            value: SecretString::from(token.access_token.clone()),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    async fn send(&self, request: RequestBuilder, operation: &str) -> Result<Response, RepositoryError> {
        self.authorize(request)
            .await?
            .send()
            .await
            .map_err(|e| RepositoryError::Firestore(format!("{operation} request: {e}")))
    }

    async fn get_document(
        &self,
        key: &ConversationKey,
    ) -> Result<Option<FirestoreDocument>, RepositoryError> {
        let response = self.send(self.http.get(self.document_url(key)), "get document").await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Failure::read(response).await.into_error("get document"));
        }
        let document = response
            .json::<FirestoreDocument>()
            .await
            .map_err(|e| RepositoryError::Decode(format!("firestore document: {e}")))?;
        Ok(Some(document))
    }

    async fn list_page(
        &self,
        page_size: &str,
        page_token: Option<&str>,
    ) -> Result<ListDocumentsResponse, RepositoryError> {
        let mut request = self.http.get(self.collection_url()).query(&[("pageSize", page_size)]);
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response = self.send(request, "list documents").await?;
        if !response.status().is_success() {
            return Err(Failure::read(response).await.into_error("list documents"));
        }
        response
            .json::<ListDocumentsResponse>()
            .await
            .map_err(|e| RepositoryError::Decode(format!("firestore document list: {e}")))
    }
}

#[async_trait::async_trait]
impl ConversationRepository for FirestoreConversationRepository {
    async fn find(&self, key: &ConversationKey) -> Result<Option<Conversation>, RepositoryError> {
        self.get_document(key).await?.map(|document| decode_document(&document)).transpose()
    }

    async fn initialize(
        &self,
        key: &ConversationKey,
        seed: &[Message],
    ) -> Result<Conversation, RepositoryError> {
        if let Some(document) = self.get_document(key).await? {
            return decode_document(&document);
        }

        let conversation = Conversation::new(key.clone(), seed.to_vec(), Utc::now());
        let fields = encode_record(&ConversationRecord::from(conversation.clone()))?;
        let request = self
            .http
            .post(self.collection_url())
            .query(&[("documentId", key.document_id())])
            .json(&json!({ "fields": fields }));

        let response = self.send(request, "create document").await?;
        if response.status().is_success() {
            return Ok(conversation);
        }

        let failure = Failure::read(response).await;
        if failure.http_status == StatusCode::CONFLICT {
            // Another delivery created it first; use the stored copy.
            return self
                .get_document(key)
                .await?
                .map(|document| decode_document(&document))
                .transpose()?
                .ok_or_else(|| RepositoryError::NotFound(key.document_id()));
        }
        Err(failure.into_error("create document"))
    }

    async fn append_message(
        &self,
        key: &ConversationKey,
        message: Message,
    ) -> Result<(), RepositoryError> {
        let encoded_message = encode_value(&to_json(&message)?, None);

        for attempt in 1..=MAX_APPEND_ATTEMPTS {
            let document = self
                .get_document(key)
                .await?
                .ok_or_else(|| RepositoryError::NotFound(key.document_id()))?;
            let conversation = decode_document(&document)?;

            if let Some(message_id) = message.message_id.as_deref() {
                if conversation.contains_message_id(message_id) {
                    return Err(duplicate(key, message_id));
                }
            }

            let update_time = document.update_time.as_deref().ok_or_else(|| {
                RepositoryError::Decode(format!("document `{}` has no updateTime", document.name))
            })?;
            let updated_at = conversation.updated_at.max(message.ts);
            let body = json!({
                "writes": [{
                    "update": {
                        "name": document.name,
                        "fields": { "updated_at": { "timestampValue": format_timestamp(&updated_at) } },
                    },
                    "updateMask": { "fieldPaths": ["updated_at"] },
                    "updateTransforms": [{
                        "fieldPath": "messages",
                        "appendMissingElements": { "values": [encoded_message.clone()] },
                    }],
                    "currentDocument": { "updateTime": update_time },
                }]
            });

            let response = self.send(self.http.post(self.commit_url()).json(&body), "commit").await?;
            if response.status().is_success() {
                return Ok(());
            }

            let failure = Failure::read(response).await;
            if !failure.is_precondition_conflict() {
                return Err(failure.into_error("commit"));
            }
            warn!(
                event_name = "db.firestore.append_conflict",
                conversation_id = %key.document_id(),
                attempt,
                "conversation changed during append; retrying"
            );
        }

        Err(RepositoryError::Conflict(key.document_id()))
    }

    async fn list(&self) -> Result<Vec<Conversation>, RepositoryError> {
        let mut conversations = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self.list_page(LIST_PAGE_SIZE, page_token.as_deref()).await?;
            for document in &page.documents {
                conversations.push(decode_document(document)?);
            }
            match page.next_page_token.filter(|token| !token.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        conversations.sort_by(|left, right| left.created_at.cmp(&right.created_at));
        Ok(conversations)
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        self.list_page("1", None).await.map(|_| ())
    }

    fn backend(&self) -> &'static str {
        "firestore"
    }
}

fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, RepositoryError> {
    serde_json::to_value(value).map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn encode_record(record: &ConversationRecord) -> Result<Map<String, Value>, RepositoryError> {
    match encode_value(&to_json(record)?, None) {
        Value::Object(mut wrapper) => match wrapper.remove("mapValue") {
            Some(Value::Object(mut map_value)) => match map_value.remove("fields") {
                Some(Value::Object(fields)) => Ok(fields),
                _ => Ok(Map::new()),
            },
            _ => Err(RepositoryError::Decode("conversation record is not a map".into())),
        },
        _ => Err(RepositoryError::Decode("conversation record is not a map".into())),
    }
}

/// Converts plain JSON into Firestore's typed value representation.
fn encode_value(value: &Value, field: Option<&str>) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(flag) => json!({ "booleanValue": flag }),
        Value::Number(number) => match number.as_i64() {
            Some(integer) => json!({ "integerValue": integer.to_string() }),
            None => json!({ "doubleValue": number.as_f64() }),
        },
        Value::String(text) if field.is_some_and(|name| TIMESTAMP_FIELDS.contains(&name)) => {
            json!({ "timestampValue": text })
        }
        Value::String(text) => json!({ "stringValue": text }),
        Value::Array(items) => {
            let values: Vec<Value> = items.iter().map(|item| encode_value(item, None)).collect();
            json!({ "arrayValue": { "values": values } })
        }
        Value::Object(entries) => {
            let fields: Map<String, Value> = entries
                .iter()
                .map(|(name, entry)| (name.clone(), encode_value(entry, Some(name))))
                .collect();
            json!({ "mapValue": { "fields": fields } })
        }
    }
}

fn decode_value(value: &Value) -> Result<Value, RepositoryError> {
    let Some((kind, inner)) = value.as_object().and_then(|typed| typed.iter().next()) else {
        return Err(RepositoryError::Decode(format!("untyped firestore value: {value}")));
    };

    match kind.as_str() {
        "nullValue" => Ok(Value::Null),
        "booleanValue" | "stringValue" | "timestampValue" | "doubleValue" => Ok(inner.clone()),
        "integerValue" => {
            let raw = inner.as_str().map(str::to_owned).unwrap_or_else(|| inner.to_string());
            raw.parse::<i64>()
                .map(Value::from)
                .map_err(|e| RepositoryError::Decode(format!("integerValue `{raw}`: {e}")))
        }
        "arrayValue" => {
            let items = inner.get("values").and_then(Value::as_array);
            let decoded = items
                .map(|values| values.iter().map(decode_value).collect::<Result<Vec<_>, _>>())
                .transpose()?
                .unwrap_or_default();
            Ok(Value::Array(decoded))
        }
        "mapValue" => {
            let fields = inner.get("fields").and_then(Value::as_object);
            Ok(Value::Object(decode_fields(fields)?))
        }
        other => Err(RepositoryError::Decode(format!("unsupported firestore value `{other}`"))),
    }
}

fn decode_fields(fields: Option<&Map<String, Value>>) -> Result<Map<String, Value>, RepositoryError> {
    let mut decoded = Map::new();
    for (name, value) in fields.into_iter().flatten() {
        decoded.insert(name.clone(), decode_value(value)?);
    }
    Ok(decoded)
}

fn decode_document(document: &FirestoreDocument) -> Result<Conversation, RepositoryError> {
    let plain = Value::Object(decode_fields(Some(&document.fields))?);
    let record: ConversationRecord = serde_json::from_value(plain)
        .map_err(|e| RepositoryError::Decode(format!("document `{}`: {e}", document.name)))?;
    Ok(record.into())
}
