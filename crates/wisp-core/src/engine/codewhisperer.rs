//! Amazon CodeWhisperer backend (`-e codewhisperer`).
//!
//! Authentication uses the SSO OIDC device-code flow. The client
//! registration and the token are cached in the config repository, so the
//! browser round-trip happens once; expired tokens are refreshed
//! transparently with the refresh grant.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::Repository;
use crate::engine::{Suggestion, SuggestionEngine, UserPrompt, single_line};
use crate::{Error, Result};

const OIDC_BASE: &str = "https://oidc.us-east-1.amazonaws.com";
const ENDPOINT: &str = "https://codewhisperer.us-east-1.amazonaws.com";
const START_URL: &str = "https://view.awsapps.com/start";

const CLIENT_TYPE: &str = "public";
const DEVICE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
const REFRESH_GRANT: &str = "refresh_token";
const SCOPES: &[&str] = &["codewhisperer:completions", "codewhisperer:analysis"];

const COMPLETIONS_TARGET: &str = "AWSCodeWhispererService.GenerateCompletions";
const AMZ_JSON: &str = "application/x-amz-json-1.0";

const CLIENT_KEY: &str = "codewhisperer-client";
const TOKEN_KEY: &str = "codewhisperer-token";

// The prompt is presented to the service as a shell script being edited.
const FILE_NAME: &str = "script.sh";
const LANGUAGE_NAME: &str = "shell";
const MAX_RESULTS: u32 = 5;

// =============================================================================
// OIDC wire types
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientRegistration {
    client_id: String,
    client_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenSet {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterClientRequest<'a> {
    client_name: String,
    client_type: &'a str,
    scopes: &'a [&'a str],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceAuthorizationRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    start_url: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceAuthorization {
    device_code: String,
    verification_uri_complete: String,
    #[serde(default)]
    interval: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    grant_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_code: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<&'a str>,
}

// =============================================================================
// Completion wire types
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateCompletionsRequest<'a> {
    file_context: FileContext<'a>,
    max_results: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileContext<'a> {
    filename: &'a str,
    left_file_content: &'a str,
    right_file_content: &'a str,
    programming_language: ProgrammingLanguage<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProgrammingLanguage<'a> {
    language_name: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateCompletionsOutput {
    #[serde(default)]
    completions: Vec<CompletionItem>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct CompletionItem {
    content: String,
}

// =============================================================================
// Suggestion type
// =============================================================================

/// One CodeWhisperer completion, carrying its batch so the overlay can
/// unroll the siblings without another request.
#[derive(Debug, Clone)]
pub struct CodeWhispererSuggestion {
    text: String,
    siblings: Vec<String>,
    next_token: Option<String>,
}

impl CodeWhispererSuggestion {
    fn from_output(output: &GenerateCompletionsOutput, index: usize) -> Self {
        // Multi-line completions make no sense in a shell input stream; keep
        // the first line only.
        let text = output
            .completions
            .get(index)
            .map(|c| single_line(&c.content).to_string())
            .unwrap_or_default();
        Self {
            text,
            siblings: output.completions.iter().map(|c| c.content.clone()).collect(),
            next_token: output.next_token.clone(),
        }
    }
}

impl Suggestion for CodeWhispererSuggestion {
    fn text(&self) -> &str {
        &self.text
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

// =============================================================================
// Engine
// =============================================================================

enum CallError {
    /// The bearer token was rejected; refresh and retry.
    TokenRejected,
    Other(Error),
}

/// Suggestion engine backed by Amazon CodeWhisperer.
pub struct CodeWhispererEngine {
    client: reqwest::Client,
    repository: Repository,
    registration: ClientRegistration,
    token: Mutex<TokenSet>,
}

impl CodeWhispererEngine {
    /// Create the engine, running the device-code flow if no cached token
    /// exists. Authorization messages go through `display`.
    pub async fn new(repository: Repository, display: Arc<dyn UserPrompt>) -> Result<Self> {
        let client = reqwest::Client::new();

        let registration = match repository.load::<ClientRegistration>(CLIENT_KEY) {
            Ok(registration) => registration,
            Err(_) => {
                let registration = register_client(&client).await?;
                repository.store(CLIENT_KEY, &registration)?;
                registration
            }
        };
        debug!(client_id = %registration.client_id, "CodeWhisperer client ready");

        let token = match repository.load::<TokenSet>(TOKEN_KEY) {
            Ok(token) => token,
            Err(_) => {
                let token = authorize(&client, &registration, display.as_ref()).await?;
                repository.store(TOKEN_KEY, &token)?;
                token
            }
        };

        Ok(Self {
            client,
            repository,
            registration,
            token: Mutex::new(token),
        })
    }

    #[cfg(test)]
    fn with_cached_credentials(repository: Repository, token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            repository,
            registration: ClientRegistration {
                client_id: "test-client".to_string(),
                client_secret: "test-secret".to_string(),
            },
            token: Mutex::new(TokenSet {
                access_token: token.to_string(),
                refresh_token: None,
            }),
        }
    }

    async fn generate(
        &self,
        prompt: &str,
        next_token: Option<&str>,
    ) -> Result<GenerateCompletionsOutput> {
        match self.generate_once(prompt, next_token).await {
            Ok(output) => Ok(output),
            Err(CallError::TokenRejected) => {
                debug!("access token rejected, refreshing");
                self.refresh_token().await?;
                match self.generate_once(prompt, next_token).await {
                    Ok(output) => Ok(output),
                    Err(CallError::TokenRejected) => Err(Error::Engine {
                        message: "access token rejected after refresh".to_string(),
                    }),
                    Err(CallError::Other(e)) => Err(e),
                }
            }
            Err(CallError::Other(e)) => Err(e),
        }
    }

    async fn generate_once(
        &self,
        prompt: &str,
        next_token: Option<&str>,
    ) -> std::result::Result<GenerateCompletionsOutput, CallError> {
        let access_token = self.token.lock().await.access_token.clone();

        let request = GenerateCompletionsRequest {
            file_context: FileContext {
                filename: FILE_NAME,
                left_file_content: prompt,
                right_file_content: "",
                programming_language: ProgrammingLanguage {
                    language_name: LANGUAGE_NAME,
                },
            },
            max_results: MAX_RESULTS,
            next_token,
        };

        let response = self
            .client
            .post(ENDPOINT)
            .header("x-amz-target", COMPLETIONS_TARGET)
            .header(reqwest::header::CONTENT_TYPE, AMZ_JSON)
            .bearer_auth(&access_token)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                CallError::Other(Error::Engine {
                    message: format!("completion request failed: {}", e),
                })
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            CallError::Other(Error::Engine {
                message: format!("failed to read completion response: {}", e),
            })
        })?;

        if !status.is_success() {
            if token_rejected(&body) {
                return Err(CallError::TokenRejected);
            }
            return Err(CallError::Other(Error::Engine {
                message: format!("completion request failed ({}): {}", status, body),
            }));
        }

        serde_json::from_str(&body).map_err(|e| {
            CallError::Other(Error::Engine {
                message: format!("malformed completion response: {}", e),
            })
        })
    }

    async fn refresh_token(&self) -> Result<()> {
        let mut current = self.token.lock().await;
        let Some(refresh_token) = current.refresh_token.clone() else {
            return Err(Error::Engine {
                message: "token expired and no refresh token is cached".to_string(),
            });
        };

        let request = CreateTokenRequest {
            client_id: &self.registration.client_id,
            client_secret: &self.registration.client_secret,
            grant_type: REFRESH_GRANT,
            device_code: None,
            refresh_token: Some(&refresh_token),
        };

        let token = create_token(&self.client, &request).await?.ok_or_else(|| {
            Error::Engine {
                message: "token refresh returned no access token".to_string(),
            }
        })?;

        self.repository.store(TOKEN_KEY, &token)?;
        *current = token;
        Ok(())
    }
}

#[async_trait]
impl SuggestionEngine for CodeWhispererEngine {
    async fn suggest(&self, prompt: &str) -> Result<Option<Box<dyn Suggestion>>> {
        debug!("fetching suggestions from CodeWhisperer");
        let output = self.generate(prompt, None).await?;
        debug!(
            count = output.completions.len(),
            next_token = ?output.next_token,
            "fetched suggestions"
        );
        if output.completions.is_empty() {
            return Ok(None);
        }
        Ok(Some(Box::new(CodeWhispererSuggestion::from_output(
            &output, 0,
        ))))
    }

    async fn top_suggestions(
        &self,
        prompt: &str,
        current: &dyn Suggestion,
    ) -> Result<Vec<Box<dyn Suggestion>>> {
        let Some(current) = current.as_any().downcast_ref::<CodeWhispererSuggestion>() else {
            return Ok(Vec::new());
        };

        // Unroll the siblings already fetched with the current suggestion.
        let mut suggestions: Vec<Box<dyn Suggestion>> = current
            .siblings
            .iter()
            .map(|content| {
                Box::new(CodeWhispererSuggestion {
                    text: single_line(content).to_string(),
                    siblings: current.siblings.clone(),
                    next_token: current.next_token.clone(),
                }) as Box<dyn Suggestion>
            })
            .collect();

        // One more page when the service reported one.
        if let Some(next_token) = &current.next_token {
            let output = self.generate(prompt, Some(next_token)).await?;
            debug!(count = output.completions.len(), "fetched additional suggestions");
            for index in 0..output.completions.len() {
                suggestions.push(Box::new(CodeWhispererSuggestion::from_output(&output, index)));
            }
        }

        Ok(suggestions)
    }
}

// =============================================================================
// OIDC flow
// =============================================================================

async fn register_client(client: &reqwest::Client) -> Result<ClientRegistration> {
    let unix_time = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let request = RegisterClientRequest {
        client_name: format!("wisp-{}", unix_time),
        client_type: CLIENT_TYPE,
        scopes: SCOPES,
    };

    post_oidc(client, "client/register", &request).await
}

async fn authorize(
    client: &reqwest::Client,
    registration: &ClientRegistration,
    display: &dyn UserPrompt,
) -> Result<TokenSet> {
    let request = DeviceAuthorizationRequest {
        client_id: &registration.client_id,
        client_secret: &registration.client_secret,
        start_url: START_URL,
    };
    let authorization: DeviceAuthorization =
        post_oidc(client, "device_authorization", &request).await?;

    display.show_message(&format!(
        "Please visit the following URL to authorize this application to use CodeWhisperer:\n {}\n",
        authorization.verification_uri_complete
    ));

    poll_for_token(client, registration, &authorization).await
}

async fn poll_for_token(
    client: &reqwest::Client,
    registration: &ClientRegistration,
    authorization: &DeviceAuthorization,
) -> Result<TokenSet> {
    let mut poll_interval = Duration::from_secs(authorization.interval.unwrap_or(5));

    loop {
        let request = CreateTokenRequest {
            client_id: &registration.client_id,
            client_secret: &registration.client_secret,
            grant_type: DEVICE_GRANT,
            device_code: Some(&authorization.device_code),
            refresh_token: None,
        };

        match try_create_token(client, &request).await? {
            TokenAttempt::Granted(token) => return Ok(token),
            TokenAttempt::Pending => {}
            TokenAttempt::SlowDown => {
                poll_interval *= 2;
            }
        }

        tokio::time::sleep(poll_interval).await;
    }
}

enum TokenAttempt {
    Granted(TokenSet),
    Pending,
    SlowDown,
}

async fn try_create_token(
    client: &reqwest::Client,
    request: &CreateTokenRequest<'_>,
) -> Result<TokenAttempt> {
    let response = client
        .post(format!("{}/token", OIDC_BASE))
        .json(request)
        .send()
        .await
        .map_err(|e| Error::Engine {
            message: format!("token request failed: {}", e),
        })?;

    let status = response.status();
    let body = response.text().await.map_err(|e| Error::Engine {
        message: format!("failed to read token response: {}", e),
    })?;

    if status.is_success() {
        let token: TokenSet = serde_json::from_str(&body).map_err(|e| Error::Engine {
            message: format!("malformed token response: {}", e),
        })?;
        return Ok(TokenAttempt::Granted(token));
    }

    match oidc_error_code(&body).as_deref() {
        Some("authorization_pending") => Ok(TokenAttempt::Pending),
        Some("slow_down") => Ok(TokenAttempt::SlowDown),
        _ => Err(Error::Engine {
            message: format!("token request failed ({}): {}", status, body),
        }),
    }
}

async fn create_token(
    client: &reqwest::Client,
    request: &CreateTokenRequest<'_>,
) -> Result<Option<TokenSet>> {
    match try_create_token(client, request).await? {
        TokenAttempt::Granted(token) => Ok(Some(token)),
        TokenAttempt::Pending | TokenAttempt::SlowDown => Ok(None),
    }
}

async fn post_oidc<Req: Serialize, Resp: serde::de::DeserializeOwned>(
    client: &reqwest::Client,
    path: &str,
    request: &Req,
) -> Result<Resp> {
    let response = client
        .post(format!("{}/{}", OIDC_BASE, path))
        .json(request)
        .send()
        .await
        .map_err(|e| Error::Engine {
            message: format!("{} request failed: {}", path, e),
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Engine {
            message: format!("{} request failed ({}): {}", path, status, body),
        });
    }

    response.json().await.map_err(|e| Error::Engine {
        message: format!("malformed {} response: {}", path, e),
    })
}

/// Extract the OIDC error code from an error body, which arrives either as
/// an OAuth `error` field or an AWS `__type` exception name.
fn oidc_error_code(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        error: Option<String>,
        #[serde(default, rename = "__type")]
        kind: Option<String>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    if let Some(error) = parsed.error {
        return Some(error);
    }
    let kind = parsed.kind?;
    if kind.contains("AuthorizationPending") {
        Some("authorization_pending".to_string())
    } else if kind.contains("SlowDown") {
        Some("slow_down".to_string())
    } else {
        Some(kind)
    }
}

fn token_rejected(body: &str) -> bool {
    body.contains("ExpiredTokenException") || body.contains("AccessDeniedException")
}

// =============================================================================
// Tests
// =============================================================================
