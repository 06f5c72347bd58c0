use std::time::Duration;

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{self, HeaderValue};
use serde::{Deserialize, Serialize};

use poem_core::config::{Config, LlmConfig};
use poem_core::{CancelScope, CompletionRequest, Credential, LanguageModel, LanguageModelError};

use crate::base_url::resolve_base_url;
use crate::error::AdapterError;

pub fn create_chat_model(
    config: &Config,
    profile_name: &str,
    credential: Option<Credential>,
) -> Result<Box<dyn LanguageModel>, AdapterError> {
    let profile = config.get_llm_profile(profile_name).ok_or_else(|| {
        AdapterError::InvalidConfig(format!("unknown LLM profile `{}`", profile_name))
    })?;
    create_chat_model_from_profile(profile, credential)
}

/// Builds the client for one submission. The credential is owned by the
/// returned model and dropped with it.
pub fn create_chat_model_from_profile(
    profile: &LlmConfig,
    credential: Option<Credential>,
) -> Result<Box<dyn LanguageModel>, AdapterError> {
    let fmt = profile.interface_format.trim().to_lowercase();
    let timeout = Duration::from_secs(profile.timeout.max(1));

    let default_url = match fmt.as_str() {
        "openai" => "https://api.openai.com/v1",
        "deepseek" => "https://api.deepseek.com/v1",
        "grok" => "https://api.x.ai/v1",
        "ollama" => "http://localhost:11434/v1",
        "lm studio" => "http://localhost:1234/v1",
        "azure openai" => {
            let credential = require_credential(&fmt, credential)?;
            return Ok(Box::new(AzureOpenAiChatModel::new(
                credential,
                &profile.base_url,
                timeout,
            )?));
        }
        other => {
            return Err(AdapterError::InvalidConfig(format!(
                "unknown interface_format: {}",
                other
            )))
        }
    };

    let credential = if matches!(fmt.as_str(), "ollama" | "lm studio") {
        credential
    } else {
        Some(require_credential(&fmt, credential)?)
    };

    Ok(Box::new(OpenAiChatModel::new(
        resolve_base_url(&profile.base_url, default_url),
        credential,
        timeout,
    )?))
}

fn require_credential(
    interface: &str,
    credential: Option<Credential>,
) -> Result<Credential, AdapterError> {
    credential.ok_or_else(|| AdapterError::MissingCredential {
        interface: interface.to_string(),
    })
}

/// OpenAI-compatible `POST {base_url}/chat/completions`.
pub struct OpenAiChatModel {
    client: Client,
    url: String,
    credential: Option<Credential>,
    timeout: Duration,
}

impl OpenAiChatModel {
    pub fn new(
        base_url: String,
        credential: Option<Credential>,
        timeout: Duration,
    ) -> Result<Self, AdapterError> {
        if base_url.trim().is_empty() {
            return Err(AdapterError::InvalidConfig(
                "base_url must not be empty".to_string(),
            ));
        }

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            credential,
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn complete_once(
        &self,
        request: &CompletionRequest<'_>,
        scope: &CancelScope,
    ) -> Result<String, AdapterError> {
        let body = ChatCompletionRequest::from_request(Some(request.model), request);

        let mut builder = self.client.post(&self.url).header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        if let Some(credential) = &self.credential {
            builder = builder.bearer_auth(credential.expose());
        }

        debug!("POST {} (model `{}`)", self.url, request.model);
        send_chat_request(builder.json(&body), self.timeout, scope)
    }
}

impl LanguageModel for OpenAiChatModel {
    fn complete(
        &self,
        request: &CompletionRequest<'_>,
        scope: &CancelScope,
    ) -> Result<String, LanguageModelError> {
        self.complete_once(request, scope).map_err(Into::into)
    }
}

/// Azure OpenAI deployment endpoint. The deployment in the URL decides the
/// model, so the request's model name is not sent.
pub struct AzureOpenAiChatModel {
    client: Client,
    url: String,
    credential: Credential,
    timeout: Duration,
}

impl AzureOpenAiChatModel {
    pub fn new(
        credential: Credential,
        base_url: &str,
        timeout: Duration,
    ) -> Result<Self, AdapterError> {
        static AZURE_RE: Lazy<Regex> = Lazy::new(|| {
            Regex::new(
                r"^(https?://[^/]+)/openai/deployments/([^/]+)/chat/completions\?api-version=([^/?&]+)",
            )
            .expect("valid Azure OpenAI url regex")
        });

        let base = base_url.trim();
        let captures = AZURE_RE.captures(base).ok_or_else(|| {
            AdapterError::InvalidConfig(
                "Invalid Azure OpenAI base_url format. Expected https://<resource>.openai.azure.com/openai/deployments/<deployment>/chat/completions?api-version=<version>"
                    .to_string(),
            )
        })?;

        let endpoint = &captures[1];
        let deployment = &captures[2];
        let api_version = &captures[3];

        HeaderValue::from_str(credential.expose()).map_err(|err| {
            AdapterError::InvalidConfig(format!("invalid api key header: {}", err))
        })?;

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            url: format!(
                "{endpoint}/openai/deployments/{deployment}/chat/completions?api-version={api_version}"
            ),
            credential,
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn complete_once(
        &self,
        request: &CompletionRequest<'_>,
        scope: &CancelScope,
    ) -> Result<String, AdapterError> {
        let body = ChatCompletionRequest::from_request(None, request);
        let api_key = HeaderValue::from_str(self.credential.expose()).map_err(|err| {
            AdapterError::InvalidConfig(format!("invalid api key header: {}", err))
        })?;

        let builder = self
            .client
            .post(&self.url)
            .header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            )
            .header("api-key", api_key);

        debug!("POST {}", self.url);
        send_chat_request(builder.json(&body), self.timeout, scope)
    }
}

impl LanguageModel for AzureOpenAiChatModel {
    fn complete(
        &self,
        request: &CompletionRequest<'_>,
        scope: &CancelScope,
    ) -> Result<String, LanguageModelError> {
        self.complete_once(request, scope).map_err(Into::into)
    }
}

/// Checks the scope, bounds the request timeout by the scope's remaining
/// time and decodes the first usable choice.
fn send_chat_request(
    builder: RequestBuilder,
    timeout: Duration,
    scope: &CancelScope,
) -> Result<String, AdapterError> {
    if scope.is_cancelled() {
        return Err(AdapterError::Cancelled);
    }

    let response = match builder.timeout(scope.bound(timeout)).send() {
        Ok(response) => response,
        Err(_) if scope.is_cancelled() => return Err(AdapterError::Cancelled),
        Err(err) => return Err(err.into()),
    };
    handle_chat_response(response)
}

fn handle_chat_response(response: reqwest::blocking::Response) -> Result<String, AdapterError> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().unwrap_or_default();
        return Err(AdapterError::HttpStatus { status, body });
    }

    let text = response.text()?;
    let parsed: ChatCompletionResponse = serde_json::from_str(&text)?;
    extract_choice_content(parsed).ok_or(AdapterError::EmptyResponse)
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: Vec<ChatMessageRequest<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    temperature: f32,
    top_p: f32,
    frequency_penalty: f32,
    presence_penalty: f32,
}

impl<'a> ChatCompletionRequest<'a> {
    fn from_request(model: Option<&'a str>, request: &CompletionRequest<'a>) -> Self {
        Self {
            model,
            messages: vec![
                ChatMessageRequest {
                    role: "system",
                    content: request.system,
                },
                ChatMessageRequest {
                    role: "user",
                    content: request.user,
                },
            ],
            max_tokens: if request.max_tokens == 0 {
                None
            } else {
                Some(request.max_tokens)
            },
            temperature: request.temperature,
            top_p: request.top_p,
            frequency_penalty: request.frequency_penalty,
            presence_penalty: request.presence_penalty,
        }
    }
}

#[derive(Serialize)]
struct ChatMessageRequest<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

fn extract_choice_content(response: ChatCompletionResponse) -> Option<String> {
    response.choices.into_iter().find_map(|choice| {
        choice
            .message
            .and_then(|message| message.content)
            .filter(|content| !content.trim().is_empty())
            .or_else(|| choice.text.filter(|text| !text.trim().is_empty()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(format: &str, base_url: &str) -> LlmConfig {
        LlmConfig {
            base_url: base_url.to_string(),
            interface_format: format.to_string(),
            timeout: 30,
        }
    }

    fn key() -> Option<Credential> {
        Credential::from_input("sk-test")
    }

    #[test]
    fn extracts_first_non_empty_choice() {
        let parsed: ChatCompletionResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"content":"  "}},{"message":{"content":"Rest."}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_choice_content(parsed).as_deref(), Some("Rest."));

        let legacy: ChatCompletionResponse =
            serde_json::from_str(r#"{"choices":[{"text":"Calm."}]}"#).unwrap();
        assert_eq!(extract_choice_content(legacy).as_deref(), Some("Calm."));

        let empty: ChatCompletionResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert_eq!(extract_choice_content(empty), None);
    }

    #[test]
    fn request_body_carries_sampling_parameters() {
        let request = CompletionRequest::new("gpt-4-1106-preview", "be a poet", "verse")
            .with_temperature(0.25);
        let body = serde_json::to_value(ChatCompletionRequest::from_request(
            Some(request.model),
            &request,
        ))
        .unwrap();

        assert_eq!(body["model"], "gpt-4-1106-preview");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "be a poet");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "verse");
        assert_eq!(body["max_tokens"], 1000);
        assert_eq!(body["top_p"], 1.0);
        assert_eq!(body["frequency_penalty"], 0.0);
        assert_eq!(body["presence_penalty"], 0.0);
        assert_eq!(body["temperature"], 0.25);
    }

    #[test]
    fn hosted_formats_require_a_credential() {
        for format in ["OpenAI", "deepseek", "grok", "Azure OpenAI"] {
            let err = create_chat_model_from_profile(&profile(format, ""), None)
                .err()
                .expect("missing credential must fail");
            assert!(
                matches!(err, AdapterError::MissingCredential { .. }),
                "{format}: {err}"
            );
        }
    }

    #[test]
    fn local_formats_work_without_a_credential() {
        for format in ["ollama", "LM Studio"] {
            assert!(create_chat_model_from_profile(&profile(format, ""), None).is_ok());
        }
    }

    #[test]
    fn unknown_format_is_rejected() {
        let err = create_chat_model_from_profile(&profile("carrier pigeon", ""), key())
            .err()
            .expect("unknown format must fail");
        assert!(matches!(err, AdapterError::InvalidConfig(_)));
    }

    #[test]
    fn unknown_profile_is_rejected() {
        let config = Config::with_default_profile();
        assert!(create_chat_model(&config, "openai", key()).is_ok());
        assert!(matches!(
            create_chat_model(&config, "missing", key()),
            Err(AdapterError::InvalidConfig(_))
        ));
    }

    #[test]
    fn azure_url_is_validated() {
        let credential = Credential::from_input("azure-key").unwrap();
        let model = AzureOpenAiChatModel::new(
            credential.clone(),
            "https://res.openai.azure.com/openai/deployments/poet/chat/completions?api-version=2024-02-01",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            model.url(),
            "https://res.openai.azure.com/openai/deployments/poet/chat/completions?api-version=2024-02-01"
        );

        assert!(matches!(
            AzureOpenAiChatModel::new(credential, "https://res.openai.azure.com", Duration::from_secs(5)),
            Err(AdapterError::InvalidConfig(_))
        ));
    }

    #[test]
    fn openai_url_gets_version_suffix() {
        let model =
            OpenAiChatModel::new(resolve_base_url("http://localhost:8080", ""), key(), Duration::from_secs(5))
                .unwrap();
        assert_eq!(model.url(), "http://localhost:8080/v1/chat/completions");
    }
}
