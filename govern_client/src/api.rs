use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::classify::RiskLevel;
use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::models::Resource;
use crate::{Job, JobId, JobKind, JobStatus};

/// HTTP status plus the decoded `data` payload of a response.
#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub status: u16,
    pub data: T,
}

/// Body shape every endpoint answers with.
#[derive(Deserialize)]
struct Body<T> {
    data: T,
}

/// One observation of a job's status.
#[derive(Debug, Clone)]
pub struct StatusReply {
    pub http_status: u16,
    pub job: Job,
}

impl StatusReply {
    /// `202 Accepted` means the service is still working on it.
    pub fn is_processing(&self) -> bool {
        self.http_status == StatusCode::ACCEPTED.as_u16()
    }
}

/// Status body; `202` replies may omit it entirely.
#[derive(Deserialize, Default)]
struct StatusBody {
    #[serde(default)]
    id: Option<JobId>,
    #[serde(default)]
    status: Option<JobStatus>,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    created_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskClassificationUpdate {
    pub ai_risk_classification: RiskLevel,
}

/// The remote collections, as seen by client-side views.
#[async_trait]
pub trait Repository<R: Resource>: Send + Sync {
    async fn list(&self) -> Result<Vec<R>, ApiError>;
    async fn get(&self, id: &str) -> Result<R, ApiError>;
    async fn create(&self, draft: &R::Draft) -> Result<R, ApiError>;
    async fn update(&self, id: &str, draft: &R::Draft) -> Result<R, ApiError>;
    async fn delete(&self, id: &str) -> Result<(), ApiError>;
}

/// Source of job status observations, polled by [`crate::poll::PollSession`].
#[async_trait]
pub trait JobSource: Send + Sync {
    async fn fetch_status(&self, kind: JobKind, id: &JobId) -> Result<StatusReply, ApiError>;
}

pub struct ApiClient {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        Ok(Self {
            client: Client::builder().timeout(config.request_timeout).build()?,
            base_url: config.base_url.clone(),
            token: config.token.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn headers(&self) -> Result<HeaderMap, ApiError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &self.token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token))?,
            );
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        let url = self.base_url.join(path.trim_start_matches('/'))?;
        tracing::debug!("{} {}", method, url);
        Ok(self.client.request(method, url).headers(self.headers()?))
    }

    /// Sends the request and returns the raw body of a success response.
    async fn send_raw(&self, request: RequestBuilder) -> Result<(StatusCode, Vec<u8>), ApiError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::from_response(response).await);
        }
        Ok((status, response.bytes().await?.to_vec()))
    }

    /// Sends the request and decodes the `data` field of a success body.
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Envelope<T>, ApiError> {
        let (status, bytes) = self.send_raw(request).await?;
        let body: Body<T> = serde_json::from_slice(&bytes)?;
        Ok(Envelope {
            status: status.as_u16(),
            data: body.data,
        })
    }

    /// Sends the request and only checks the status.
    async fn send_empty(&self, request: RequestBuilder) -> Result<u16, ApiError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::from_response(response).await);
        }
        Ok(status.as_u16())
    }

    pub async fn list<R: Resource>(&self) -> Result<Vec<R>, ApiError> {
        let envelope = self.send(self.request(Method::GET, R::PATH)?).await?;
        Ok(envelope.data)
    }

    pub async fn get<R: Resource>(&self, id: &str) -> Result<R, ApiError> {
        let path = format!("{}/{}", R::PATH, id);
        Ok(self.send(self.request(Method::GET, &path)?).await?.data)
    }

    pub async fn create<R: Resource>(&self, draft: &R::Draft) -> Result<R, ApiError> {
        let request = self.request(Method::POST, R::PATH)?.json(draft);
        Ok(self.send(request).await?.data)
    }

    pub async fn update<R: Resource>(&self, id: &str, draft: &R::Draft) -> Result<R, ApiError> {
        let path = format!("{}/{}", R::PATH, id);
        let request = self.request(Method::PUT, &path)?.json(draft);
        Ok(self.send(request).await?.data)
    }

    pub async fn delete<R: Resource>(&self, id: &str) -> Result<(), ApiError> {
        let path = format!("{}/{}", R::PATH, id);
        self.send_empty(self.request(Method::DELETE, &path)?).await?;
        Ok(())
    }

    pub async fn fetch_job_status(&self, kind: JobKind, id: &JobId) -> Result<StatusReply, ApiError> {
        let (http_status, bytes) = self
            .send_raw(self.request(Method::GET, &kind.status_path(id))?)
            .await?;
        let processing = http_status == StatusCode::ACCEPTED;

        // A 202 means "still working" whatever its body looks like.
        let body = if processing {
            serde_json::from_slice::<Body<StatusBody>>(&bytes)
                .map(|b| b.data)
                .unwrap_or_default()
        } else {
            serde_json::from_slice::<Body<StatusBody>>(&bytes)?.data
        };

        let status = match body.status {
            Some(status) => status,
            None if processing => JobStatus::Running,
            None => return Err(ApiError::Decode("status reply without a status".to_string())),
        };

        Ok(StatusReply {
            http_status: http_status.as_u16(),
            job: Job {
                id: body.id.unwrap_or_else(|| id.clone()),
                kind: Some(kind),
                status,
                result: body.result,
                error: body.error,
                created_at: body.created_at,
            },
        })
    }

    pub async fn delete_job(&self, kind: JobKind, id: &JobId) -> Result<(), ApiError> {
        let path = format!("{}/{}", kind.collection_path(), id);
        self.send_empty(self.request(Method::DELETE, &path)?).await?;
        Ok(())
    }

    pub async fn save_risk_classification(&self, project_id: &str, level: RiskLevel) -> Result<(), ApiError> {
        let path = format!("projects/{}", project_id);
        let request = self
            .request(Method::PATCH, &path)?
            .json(&RiskClassificationUpdate {
                ai_risk_classification: level,
            });
        self.send_empty(request).await?;
        Ok(())
    }
}

#[async_trait]
impl<R: Resource> Repository<R> for ApiClient {
    async fn list(&self) -> Result<Vec<R>, ApiError> {
        ApiClient::list::<R>(self).await
    }

    async fn get(&self, id: &str) -> Result<R, ApiError> {
        ApiClient::get::<R>(self, id).await
    }

    async fn create(&self, draft: &R::Draft) -> Result<R, ApiError> {
        ApiClient::create::<R>(self, draft).await
    }

    async fn update(&self, id: &str, draft: &R::Draft) -> Result<R, ApiError> {
        ApiClient::update::<R>(self, id, draft).await
    }

    async fn delete(&self, id: &str) -> Result<(), ApiError> {
        ApiClient::delete::<R>(self, id).await
    }
}

#[async_trait]
impl JobSource for ApiClient {
    async fn fetch_status(&self, kind: JobKind, id: &JobId) -> Result<StatusReply, ApiError> {
        self.fetch_job_status(kind, id).await
    }
}
