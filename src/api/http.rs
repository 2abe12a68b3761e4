use super::{ApiError, ApiResult, Backend, ChatRequest, ChatResponse};
use crate::commands::settings::ClientConfig;
use crate::db::models::{Document, DocumentId, HistoryRecord};
use crate::upload::FileUpload;
use futures::future::{BoxFuture, FutureExt};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;

#[derive(Deserialize)]
struct ErrorBody {
    detail: Option<String>,
}

#[derive(Deserialize)]
struct HealthResponse {
    status: String,
}

/// REST client for the document Q&A backend.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(config: &ClientConfig) -> ApiResult<Self> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path)
    }

    pub async fn health(&self) -> ApiResult<String> {
        let resp = self.client.get(self.url("health/")).send().await?;
        let body: HealthResponse = decode(check(resp).await?).await?;
        Ok(body.status)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        let resp = self.client.get(self.url(path)).send().await?;
        decode(check(resp).await?).await
    }
}

/// Turns a non-success status into `ApiError::Api`, keeping the backend's
/// `detail` field when the body carries one.
async fn check(resp: Response) -> ApiResult<Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let text = resp.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ErrorBody>(&text)
        .ok()
        .and_then(|body| body.detail);
    Err(ApiError::Api { status, detail })
}

async fn decode<T: DeserializeOwned>(resp: Response) -> ApiResult<T> {
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Parse(e.to_string()))
}

impl Backend for HttpBackend {
    fn list_documents(&self) -> BoxFuture<'_, ApiResult<Vec<Document>>> {
        self.get_json("documents/").boxed()
    }

    fn upload_document(&self, upload: FileUpload) -> BoxFuture<'_, ApiResult<Document>> {
        async move {
            let content_type = upload.content_type();
            let part = Part::bytes(upload.bytes)
                .file_name(upload.file_name)
                .mime_str(content_type)?;
            let form = Form::new().part("file", part).text("title", upload.title);

            let resp = self
                .client
                .post(self.url("documents/"))
                .multipart(form)
                .send()
                .await?;
            decode(check(resp).await?).await
        }
        .boxed()
    }

    fn delete_document(&self, id: DocumentId) -> BoxFuture<'_, ApiResult<()>> {
        async move {
            let resp = self
                .client
                .delete(self.url(&format!("documents/{id}/")))
                .send()
                .await?;
            check(resp).await?;
            Ok(())
        }
        .boxed()
    }

    fn fetch_history(&self, id: DocumentId) -> BoxFuture<'_, ApiResult<Vec<HistoryRecord>>> {
        async move { self.get_json(&format!("documents/{id}/messages/")).await }.boxed()
    }

    fn ask(&self, request: ChatRequest) -> BoxFuture<'_, ApiResult<ChatResponse>> {
        async move {
            let resp = self
                .client
                .post(self.url("chat/"))
                .json(&request)
                .send()
                .await?;
            decode(check(resp).await?).await
        }
        .boxed()
    }
}
