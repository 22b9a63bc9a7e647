//! Configuration helpers for the completion endpoint.
//!
//! Convenience utilities for pointing the runtime at different
//! OpenAI-compatible servers. All listed providers speak the same chat
//! completions API, so they are interchangeable from the runtime's
//! perspective.
//!
//! ## Environment Variables
//!
//! - `TOOLSCRIPT_BASE_URL`: override the base URL for any provider
//! - `TOOLSCRIPT_MODEL`: override the model name (when `prefer_env` is true)

use std::env;
use std::str::FromStr;

/// Supported local LLM server providers.
///
/// | Provider | Default URL |
/// |----------|-------------|
/// | LMStudio | http://localhost:1234/v1 |
/// | Ollama | http://localhost:11434/v1 |
/// | LlamaCpp | http://localhost:8080/v1 |
/// | VLLM | http://localhost:8000/v1 |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// LM Studio (default port 1234)
    LMStudio,

    /// Ollama (default port 11434)
    Ollama,

    /// llama.cpp server mode (default port 8080)
    LlamaCpp,

    /// vLLM (default port 8000)
    VLLM,
}

impl Provider {
    /// Get the default base URL for this provider.
    pub fn default_url(&self) -> &'static str {
        match self {
            Provider::LMStudio => "http://localhost:1234/v1",
            Provider::Ollama => "http://localhost:11434/v1",
            Provider::LlamaCpp => "http://localhost:8080/v1",
            Provider::VLLM => "http://localhost:8000/v1",
        }
    }
}

impl FromStr for Provider {
    type Err = String;

    /// Parse a provider name, case-insensitively, accepting the common
    /// dash/underscore/dot variations.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lmstudio" | "lm-studio" | "lm_studio" => Ok(Provider::LMStudio),
            "ollama" => Ok(Provider::Ollama),
            "llamacpp" | "llama-cpp" | "llama_cpp" | "llama.cpp" => Ok(Provider::LlamaCpp),
            "vllm" => Ok(Provider::VLLM),
            _ => Err(format!("Unknown provider: {}", s)),
        }
    }
}

/// Resolve the base URL for API requests.
///
/// Priority: `TOOLSCRIPT_BASE_URL` environment variable, then the
/// provider's default, then the explicit fallback, then LM Studio's
/// default.
pub fn get_base_url(provider: Option<Provider>, fallback: Option<&str>) -> String {
    if let Ok(url) = env::var("TOOLSCRIPT_BASE_URL") {
        return url;
    }

    if let Some(p) = provider {
        return p.default_url().to_string();
    }

    fallback
        .unwrap_or(Provider::LMStudio.default_url())
        .to_string()
}

/// Resolve the model name.
///
/// When `prefer_env` is true, `TOOLSCRIPT_MODEL` wins over the fallback;
/// otherwise only the fallback is consulted.
pub fn get_model(fallback: Option<&str>, prefer_env: bool) -> Option<String> {
    if prefer_env {
        if let Ok(model) = env::var("TOOLSCRIPT_MODEL") {
            return Some(model);
        }
    }

    fallback.map(|s| s.to_string())
}
