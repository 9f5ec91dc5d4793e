//! OpenAI completions backend (`-e gpt3.5`).
//!
//! Parameters are persisted in the config repository; on first run the API
//! key is read interactively and stored. Requests go to the legacy
//! completions API because it is the one that returns per-token logprobs,
//! which power the alternatives list in the completions overlay.

use std::collections::HashMap;
use std::io::{BufRead, Write};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Repository;
use crate::engine::{Suggestion, SuggestionEngine, single_line};
use crate::{Error, Result};

const API_BASE: &str = "https://api.openai.com/v1";

/// Primary model, tried first: fast and cheap.
const PRIMARY_MODEL: &str = "gpt-3.5-turbo-instruct";
/// Fallback when the primary errors or returns nothing.
const FALLBACK_MODEL: &str = "davinci-002";

const PARAMS_KEY: &str = "openai-completion-parameters";

/// Completion request parameters, persisted across runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionParameters {
    pub api_key: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub frequency_penalty: f64,
    pub presence_penalty: f64,
    pub stop: Vec<String>,
    pub logprobs: u32,
}

impl Default for CompletionParameters {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            max_tokens: 64,
            temperature: 0.0,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            // Suggestions are injected into a shell; stop at end of line.
            stop: vec!["\n".to_string()],
            // API maximum; ranks the overlay's alternatives.
            logprobs: 5,
        }
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: u32,
    temperature: f64,
    top_p: f64,
    frequency_penalty: f64,
    presence_penalty: f64,
    logprobs: u32,
    stop: &'a [String],
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// One completion choice, kept with its logprobs so the overlay can ask for
/// alternatives later.
#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    text: String,
    #[serde(default)]
    logprobs: Option<Logprobs>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Logprobs {
    #[serde(default)]
    tokens: Vec<String>,
    #[serde(default)]
    token_logprobs: Vec<f64>,
    #[serde(default)]
    top_logprobs: Vec<HashMap<String, f64>>,
}

impl Choice {
    /// Alternatives for the first token, most probable first.
    fn first_token_alternatives(&self) -> Vec<String> {
        let Some(logprobs) = &self.logprobs else {
            return Vec::new();
        };
        let Some(top) = logprobs.top_logprobs.first() else {
            return Vec::new();
        };
        let mut ranked: Vec<(&String, f64)> = top.iter().map(|(t, p)| (t, *p)).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.into_iter().map(|(t, _)| t.clone()).collect()
    }
}

impl Suggestion for Choice {
    fn text(&self) -> &str {
        &self.text
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Suggestion engine backed by the OpenAI completions API.
pub struct OpenAiEngine {
    client: reqwest::Client,
    params: CompletionParameters,
}

impl OpenAiEngine {
    /// Create the engine, loading parameters from the repository.
    ///
    /// On first run the API key is read from stdin and the defaults are
    /// persisted.
    pub fn new(repository: &Repository) -> Result<Self> {
        let params = match repository.load::<CompletionParameters>(PARAMS_KEY) {
            Ok(params) => params,
            Err(_) => {
                let mut params = CompletionParameters::default();
                params.api_key = read_api_key()?;
                repository.store(PARAMS_KEY, &params)?;
                params
            }
        };
        Ok(Self {
            client: reqwest::Client::new(),
            params,
        })
    }

    #[cfg(test)]
    fn with_params(params: CompletionParameters) -> Self {
        Self {
            client: reqwest::Client::new(),
            params,
        }
    }

    async fn complete(&self, model: &str, prompt: &str) -> Result<Option<Choice>> {
        debug!(model, prompt, "requesting completion");

        let request = CompletionRequest {
            model,
            prompt,
            max_tokens: self.params.max_tokens,
            temperature: self.params.temperature,
            top_p: self.params.top_p,
            frequency_penalty: self.params.frequency_penalty,
            presence_penalty: self.params.presence_penalty,
            logprobs: self.params.logprobs,
            stop: &self.params.stop,
        };

        let response = self
            .client
            .post(format!("{}/completions", API_BASE))
            .bearer_auth(&self.params.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Engine {
                message: format!("completion request failed: {}", e),
            })?;

        let completion: CompletionResponse =
            response.json().await.map_err(|e| Error::Engine {
                message: format!("malformed completion response: {}", e),
            })?;

        if let Some(err) = completion.error {
            return Err(Error::Engine {
                message: format!("completion rejected: {}", err.message),
            });
        }

        if let Some(choice) = completion.choices.first() {
            if let Some(logprobs) = &choice.logprobs {
                for (token, logprob) in logprobs.tokens.iter().zip(&logprobs.token_logprobs) {
                    debug!(token, probability = logprob.exp(), "completion token");
                }
            }
        }

        Ok(completion.choices.into_iter().next())
    }

    async fn complete_with_fallback(&self, prompt: &str) -> Result<Option<Choice>> {
        match self.complete(PRIMARY_MODEL, prompt).await {
            Ok(Some(choice)) if !choice.text.is_empty() => Ok(Some(choice)),
            Ok(_) => self.complete(FALLBACK_MODEL, prompt).await,
            Err(e) => {
                debug!(error = %e, "primary model failed, trying fallback");
                self.complete(FALLBACK_MODEL, prompt).await
            }
        }
    }
}

#[async_trait]
impl SuggestionEngine for OpenAiEngine {
    async fn suggest(&self, prompt: &str) -> Result<Option<Box<dyn Suggestion>>> {
        let choice = self.complete_with_fallback(prompt).await?;
        Ok(choice.map(|c| Box::new(c) as Box<dyn Suggestion>))
    }

    async fn top_suggestions(
        &self,
        prompt: &str,
        current: &dyn Suggestion,
    ) -> Result<Vec<Box<dyn Suggestion>>> {
        let Some(choice) = current.as_any().downcast_ref::<Choice>() else {
            return Ok(Vec::new());
        };

        // Each first-token alternative is extended into a full continuation
        // by re-completing from prompt + alternative.
        let mut suggestions: Vec<Box<dyn Suggestion>> = Vec::new();
        for alternative in choice.first_token_alternatives() {
            let extended = self
                .complete_with_fallback(&format!("{}{}", prompt, alternative))
                .await?;
            let (tail, logprobs) = match extended {
                Some(choice) => (single_line(&choice.text).to_string(), choice.logprobs),
                None => (String::new(), None),
            };
            suggestions.push(Box::new(Choice {
                text: format!("{}{}", alternative, tail),
                logprobs,
            }));
        }
        Ok(suggestions)
    }
}

fn read_api_key() -> Result<String> {
    print!("Enter OpenAI API key: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let key = line.trim().to_string();
    if key.is_empty() {
        return Err(Error::Engine {
            message: "no API key provided".to_string(),
        });
    }
    Ok(key)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn choice_with_top_logprobs(pairs: &[(&str, f64)]) -> Choice {
        let top: HashMap<String, f64> =
            pairs.iter().map(|(t, p)| (t.to_string(), *p)).collect();
        Choice {
            text: "ls".to_string(),
            logprobs: Some(Logprobs {
                tokens: vec!["ls".to_string()],
                token_logprobs: vec![-0.1],
                top_logprobs: vec![top],
            }),
        }
    }

    #[test]
    fn default_parameters_stop_at_newline() {
        let params = CompletionParameters::default();
        assert_eq!(params.stop, vec!["\n".to_string()]);
        assert_eq!(params.max_tokens, 64);
        assert_eq!(params.temperature, 0.0);
    }

    #[test]
    fn alternatives_ranked_by_probability() {
        let choice = choice_with_top_logprobs(&[("ls", -0.1), ("cat", -2.0), ("cd", -0.5)]);
        assert_eq!(choice.first_token_alternatives(), vec!["ls", "cd", "cat"]);
    }

    #[test]
    fn alternatives_empty_without_logprobs() {
        let choice = Choice {
            text: "ls".to_string(),
            logprobs: None,
        };
        assert!(choice.first_token_alternatives().is_empty());
    }

    #[test]
    fn parameters_survive_repository_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::new(dir.path());

        let mut params = CompletionParameters::default();
        params.api_key = "sk-test".to_string();
        repo.store(PARAMS_KEY, &params).unwrap();

        let engine = OpenAiEngine::new(&repo).unwrap();
        assert_eq!(engine.params.api_key, "sk-test");
        assert_eq!(engine.params.logprobs, 5);
    }

    #[tokio::test]
    async fn top_suggestions_ignores_foreign_suggestion_type() {
        struct Foreign;
        impl Suggestion for Foreign {
            fn text(&self) -> &str {
                "x"
            }
            fn as_any(&self) -> &dyn std::any::Any {
                self
            }
        }

        let engine = OpenAiEngine::with_params(CompletionParameters::default());
        let result = engine.top_suggestions("$ ", &Foreign).await.unwrap();
        assert!(result.is_empty());
    }
}
