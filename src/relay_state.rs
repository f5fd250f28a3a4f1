use crate::io_struct::{
    ChatSuccessBody, ChatTurn, InferenceSettings, ProviderRequest, ProviderResponse, Role,
    append_user_turn, decode_chat_request,
};
use thiserror::Error;
use tokio::sync::OnceCell;

pub const DEFAULT_REGION: &str = "us-east-1";

/// Pulls the region out of a Lambda-style ARN
/// (`arn:aws:lambda:<region>:<account>:function:<name>`).
pub fn extract_region_from_arn(arn: &str) -> Option<&str> {
    let rest = arn.strip_prefix("arn:aws:lambda:")?;
    let (region, _) = rest.split_once(':')?;
    if region.is_empty() { None } else { Some(region) }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    #[error("provider error ({code}): {message}")]
    Provider { code: String, message: String },
    #[error("invalid provider response: {0}")]
    InvalidProviderResponse(String),
    #[error("{0}")]
    Unclassified(String),
}

impl RelayError {
    pub fn error_code(&self) -> Option<&str> {
        match self {
            RelayError::Provider { code, .. } => Some(code),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    pub model_id: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub function_arn: Option<String>,
    pub provider_endpoint: Option<String>,
    pub timeout: u64,
}

impl RelayConfig {
    pub fn inference_settings(&self) -> InferenceSettings {
        InferenceSettings {
            max_tokens: self.max_tokens,
            stop_sequences: Vec::new(),
            temperature: self.temperature,
            top_p: self.top_p,
        }
    }
}

#[derive(Debug)]
pub struct ProviderClient {
    pub http: reqwest::Client,
    pub endpoint: String,
}

/// Shared per-process state. The provider client is created on first use and
/// reused by every later request; `OnceCell` serializes the check-and-create
/// step so concurrent first requests see exactly one client.
#[derive(Debug)]
pub struct RelayState {
    pub config: RelayConfig,
    client: OnceCell<ProviderClient>,
}

impl RelayState {
    pub fn new(config: RelayConfig) -> Self {
        RelayState {
            config,
            client: OnceCell::new(),
        }
    }

    pub fn resolve_region(&self) -> &str {
        self.config
            .function_arn
            .as_deref()
            .and_then(extract_region_from_arn)
            .unwrap_or(DEFAULT_REGION)
    }

    pub async fn provider(&self) -> Result<&ProviderClient, RelayError> {
        self.client
            .get_or_try_init(|| async {
                let region = self.resolve_region();
                let endpoint = match &self.config.provider_endpoint {
                    Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
                    None => format!("https://bedrock-runtime.{}.amazonaws.com", region),
                };
                let http = reqwest::Client::builder()
                    .timeout(std::time::Duration::from_secs(self.config.timeout))
                    .build()
                    .map_err(|e| RelayError::Unclassified(e.to_string()))?;
                log::info!(
                    "Initialized provider client in region {} ({})",
                    region,
                    endpoint
                );
                Ok(ProviderClient { http, endpoint })
            })
            .await
    }

    pub async fn invoke_model(
        &self,
        request: &ProviderRequest,
    ) -> Result<ProviderResponse, RelayError> {
        let client = self.provider().await?;
        let url = format!("{}/model/{}/invoke", client.endpoint, self.config.model_id);
        let resp = client
            .http
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| RelayError::Provider {
                code: "TransportError".to_string(),
                message: e.to_string(),
            })?;
        let status = resp.status();
        let body = resp.bytes().await.map_err(|e| RelayError::Provider {
            code: "TransportError".to_string(),
            message: e.to_string(),
        })?;
        log::info!(
            "Provider response ({}): {}",
            status,
            String::from_utf8_lossy(&body)
        );
        if !status.is_success() {
            return Err(provider_error_from_body(status, &body));
        }
        serde_json::from_slice(&body).map_err(|e| RelayError::InvalidProviderResponse(e.to_string()))
    }

    /// The whole per-request pipeline: decode, assemble, translate, invoke,
    /// normalize. Every failure bubbles out as a `RelayError` for uniform
    /// enveloping by the handler.
    pub async fn handle_chat(&self, raw: &[u8]) -> Result<ChatSuccessBody, RelayError> {
        log::info!("Received event: {}", String::from_utf8_lossy(raw));
        let req = decode_chat_request(raw)?;
        if let Some(user) = req.user_identifier() {
            log::info!("Authenticated user: {}", user);
        }
        log::info!("Processing message: {}", req.message);
        log::info!("Using model: {}", self.config.model_id);

        let mut transcript = append_user_turn(req.conversation_history, &req.message);
        let provider_req =
            ProviderRequest::from_transcript(&transcript, self.config.inference_settings());
        log::info!(
            "Calling provider with payload: {}",
            serde_json::to_string(&provider_req)
                .unwrap_or_else(|_| "<unserializable>".to_string())
        );

        let response = self.invoke_model(&provider_req).await?;
        let text = response.extract_text()?;
        transcript.push(ChatTurn {
            role: Role::Assistant,
            content: text.clone(),
        });

        Ok(ChatSuccessBody {
            success: true,
            response: text,
            conversation_history: transcript,
            model_id: self.config.model_id.clone(),
        })
    }
}

fn provider_error_from_body(status: reqwest::StatusCode, body: &[u8]) -> RelayError {
    let parsed: Option<serde_json::Value> = serde_json::from_slice(body).ok();
    let code = parsed
        .as_ref()
        .and_then(|v| v.get("__type"))
        .and_then(|v| v.as_str())
        // the error type may be namespace-qualified
        .map(|t| t.rsplit('#').next().unwrap_or(t).to_string())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Unknown")
                .replace(' ', "")
        });
    let message = parsed
        .as_ref()
        .and_then(|v| v.get("message"))
        .and_then(|v| v.as_str())
        .map(|m| m.to_string())
        .unwrap_or_else(|| String::from_utf8_lossy(body).to_string());
    RelayError::Provider { code, message }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RelayConfig {
        RelayConfig {
            host: "localhost".to_string(),
            port: 8080,
            model_id: "us.amazon.nova-lite-v1:0".to_string(),
            max_tokens: 512,
            temperature: 0.7,
            top_p: 0.9,
            function_arn: None,
            provider_endpoint: None,
            timeout: 600,
        }
    }

    #[test]
    fn region_is_extracted_from_well_formed_arn() {
        assert_eq!(
            extract_region_from_arn("arn:aws:lambda:eu-west-1:123456789012:function:chat"),
            Some("eu-west-1")
        );
    }

    #[test]
    fn region_extraction_rejects_malformed_arns() {
        assert_eq!(extract_region_from_arn(""), None);
        assert_eq!(extract_region_from_arn("arn:aws:s3:::bucket"), None);
        assert_eq!(extract_region_from_arn("arn:aws:lambda:"), None);
        assert_eq!(extract_region_from_arn("arn:aws:lambda::123:function:f"), None);
        assert_eq!(extract_region_from_arn("arn:aws:lambda:us-east-1"), None);
    }

    #[test]
    fn resolve_region_falls_back_to_default() {
        let state = RelayState::new(config());
        assert_eq!(state.resolve_region(), DEFAULT_REGION);

        let mut cfg = config();
        cfg.function_arn = Some("garbage".to_string());
        assert_eq!(RelayState::new(cfg).resolve_region(), DEFAULT_REGION);

        let mut cfg = config();
        cfg.function_arn = Some("arn:aws:lambda:eu-west-1:123456789012:function:chat".to_string());
        assert_eq!(RelayState::new(cfg).resolve_region(), "eu-west-1");
    }

    #[tokio::test]
    async fn provider_endpoint_is_derived_from_region() {
        let mut cfg = config();
        cfg.function_arn =
            Some("arn:aws:lambda:ap-northeast-1:123456789012:function:chat".to_string());
        let state = RelayState::new(cfg);
        let client = state.provider().await.unwrap();
        assert_eq!(
            client.endpoint,
            "https://bedrock-runtime.ap-northeast-1.amazonaws.com"
        );
    }

    #[tokio::test]
    async fn provider_client_is_created_once() {
        let mut cfg = config();
        cfg.provider_endpoint = Some("http://localhost:9000/".to_string());
        let state = RelayState::new(cfg);
        let first = state.provider().await.unwrap();
        assert_eq!(first.endpoint, "http://localhost:9000");
        let second = state.provider().await.unwrap();
        assert!(std::ptr::eq(first, second));
    }

    #[test]
    fn provider_error_carries_code_from_body() {
        let err = provider_error_from_body(
            reqwest::StatusCode::BAD_REQUEST,
            br#"{"__type": "com.amazon.coral.validate#ValidationException", "message": "bad model id"}"#,
        );
        match err {
            RelayError::Provider { code, message } => {
                assert_eq!(code, "ValidationException");
                assert_eq!(message, "bad model id");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn provider_error_falls_back_to_status_reason() {
        let err = provider_error_from_body(reqwest::StatusCode::TOO_MANY_REQUESTS, b"slow down");
        match err {
            RelayError::Provider { code, message } => {
                assert_eq!(code, "TooManyRequests");
                assert_eq!(message, "slow down");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn only_provider_errors_expose_an_error_code() {
        let err = RelayError::Provider {
            code: "ThrottlingException".to_string(),
            message: "slow down".to_string(),
        };
        assert_eq!(err.error_code(), Some("ThrottlingException"));
        assert_eq!(
            RelayError::MalformedRequest("x".to_string()).error_code(),
            None
        );
        assert_eq!(
            RelayError::InvalidProviderResponse("x".to_string()).error_code(),
            None
        );
    }
}
