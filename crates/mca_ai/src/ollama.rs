use std::time::Duration;

use mca_core::error::AppError;

const LOCAL_PREFIX: &str = "http://127.0.0.1";

#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
}

fn remote_not_allowed(base_url: &str) -> AppError {
    AppError::new(
        "AI_REMOTE_NOT_ALLOWED",
        "Ollama base URL must be localhost (127.0.0.1)",
    )
    .with_details(format!("base_url={base_url}"))
}

impl OllamaClient {
    /// Create a client for Ollama. This is strictly limited to `127.0.0.1`.
    ///
    /// Accepted: `http://127.0.0.1` or `http://127.0.0.1:<port>` with port 1..=65535,
    /// optionally followed by one trailing slash. Paths, userinfo and other hosts are rejected.
    pub fn new(base_url: &str) -> Result<Self, AppError> {
        let base_url = base_url.trim();
        let trimmed = base_url.strip_suffix('/').unwrap_or(base_url);

        let Some(rest) = trimmed.strip_prefix(LOCAL_PREFIX) else {
            return Err(remote_not_allowed(base_url));
        };
        if !rest.is_empty() {
            let Some(port) = rest.strip_prefix(':') else {
                return Err(remote_not_allowed(base_url));
            };
            let valid_port = !port.is_empty()
                && port.bytes().all(|b| b.is_ascii_digit())
                && matches!(port.parse::<u32>(), Ok(p) if (1..=65_535).contains(&p));
            if !valid_port {
                return Err(remote_not_allowed(base_url));
            }
        }

        Ok(Self {
            base_url: trimmed.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn health_check(&self) -> Result<(), AppError> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = ureq::get(&url).timeout(Duration::from_millis(800)).call();

        match resp {
            Ok(r) if r.status() == 200 => Ok(()),
            Ok(r) => Err(
                AppError::new("AI_OLLAMA_UNHEALTHY", "Ollama health check failed")
                    .with_details(format!("status={}", r.status())),
            ),
            Err(ureq::Error::Status(code, _)) => Err(
                AppError::new("AI_OLLAMA_UNHEALTHY", "Ollama health check failed")
                    .with_details(format!("status={code}")),
            ),
            Err(e) => Err(AppError::new(
                "AI_OLLAMA_UNREACHABLE",
                "Failed to reach Ollama on 127.0.0.1",
            )
            .with_details(e.to_string())
            .with_retryable(true)),
        }
    }
}
