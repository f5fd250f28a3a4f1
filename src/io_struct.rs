use crate::relay_state::RelayError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Speaker tag for one transcript turn. Roles other than `user`/`assistant`
/// are carried through the transcript verbatim but never forwarded to the
/// provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    #[serde(untagged)]
    Unrecognized(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReqInput {
    pub message: String,
    #[serde(default)]
    pub conversation_history: Vec<ChatTurn>,
    pub request_context: Option<RequestContext>,
}

#[derive(Debug, Deserialize)]
pub struct RequestContext {
    pub authorizer: Option<AuthorizerContext>,
}

#[derive(Debug, Deserialize)]
pub struct AuthorizerContext {
    #[serde(default)]
    pub claims: Map<String, Value>,
}

impl ChatReqInput {
    /// Identity claim from the upstream authorizer, used only for logging.
    pub fn user_identifier(&self) -> Option<&str> {
        let claims = &self.request_context.as_ref()?.authorizer.as_ref()?.claims;
        claims
            .get("email")
            .or_else(|| claims.get("cognito:username"))
            .and_then(Value::as_str)
    }
}

pub fn decode_chat_request(raw: &[u8]) -> Result<ChatReqInput, RelayError> {
    if raw.is_empty() {
        return Err(RelayError::MalformedRequest(
            "request body is missing".to_string(),
        ));
    }
    let req: ChatReqInput =
        serde_json::from_slice(raw).map_err(|e| RelayError::MalformedRequest(e.to_string()))?;
    if req.message.is_empty() {
        return Err(RelayError::MalformedRequest(
            "message must be a non-empty string".to_string(),
        ));
    }
    Ok(req)
}

pub fn append_user_turn(mut history: Vec<ChatTurn>, message: &str) -> Vec<ChatTurn> {
    history.push(ChatTurn {
        role: Role::User,
        content: message.to_string(),
    });
    history
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceSettings {
    pub max_tokens: u32,
    pub stop_sequences: Vec<String>,
    pub temperature: f32,
    pub top_p: f32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ContentBlock {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProviderMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRequest {
    pub messages: Vec<ProviderMessage>,
    pub inference_config: InferenceSettings,
}

impl ProviderRequest {
    /// Translates the working transcript into the provider's message schema.
    /// Turns with an unrecognized role are dropped here, not rejected.
    pub fn from_transcript(transcript: &[ChatTurn], inference_config: InferenceSettings) -> Self {
        let messages = transcript
            .iter()
            .filter(|turn| matches!(turn.role, Role::User | Role::Assistant))
            .map(|turn| ProviderMessage {
                role: turn.role.clone(),
                content: vec![ContentBlock {
                    text: turn.content.clone(),
                }],
            })
            .collect();
        ProviderRequest {
            messages,
            inference_config,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ProviderResponse {
    pub output: Option<ProviderOutput>,
}

#[derive(Debug, Deserialize)]
pub struct ProviderOutput {
    pub message: Option<ProviderOutputMessage>,
}

#[derive(Debug, Deserialize)]
pub struct ProviderOutputMessage {
    #[serde(default)]
    pub content: Vec<OutputBlock>,
}

#[derive(Debug, Deserialize)]
pub struct OutputBlock {
    pub text: Option<String>,
}

impl ProviderResponse {
    /// Strict structural check: `output.message.content[0].text` must exist at
    /// every level.
    pub fn extract_text(self) -> Result<String, RelayError> {
        self.output
            .and_then(|output| output.message)
            .and_then(|message| message.content.into_iter().next())
            .and_then(|block| block.text)
            .ok_or_else(|| {
                RelayError::InvalidProviderResponse(
                    "no response content from the model".to_string(),
                )
            })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSuccessBody {
    pub success: bool,
    pub response: String,
    pub conversation_history: Vec<ChatTurn>,
    pub model_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatFailureBody {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}
