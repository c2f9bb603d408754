//! HTTP collaborators for the streaming voice backend

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use url::Url;

use super::backend::{
    AudioChunk, AudioClip, SessionHandle, SessionStats, StreamingBackend, Synthesizer,
    Transcriber, Transcription,
};
use crate::config::BackendConfig;
use crate::{Error, Result};

/// Reply to `POST /sessions`
#[derive(Deserialize)]
struct CreateResponse {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(flatten)]
    handle: SessionHandle,
}

/// Reply to `GET /sessions/{id}/stats`
#[derive(Deserialize)]
struct StatsResponse {
    #[serde(default = "default_success")]
    success: bool,
    stats: SessionStats,
}

const fn default_success() -> bool {
    true
}

/// Streaming backend, transcriber and synthesizer over HTTP
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: Url,
    api_token: Option<SecretString>,
}

impl HttpBackend {
    /// Create a client for the configured backend
    ///
    /// # Errors
    ///
    /// Returns error if the base URL is invalid or the HTTP client cannot be
    /// built
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        let base_url = Url::parse(&config.base_url)
            .map_err(|e| Error::Config(format!("invalid backend url {}: {e}", config.base_url)))?;

        Ok(Self {
            client,
            base_url,
            api_token: config.api_token.clone(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::Config(format!("invalid backend url: {}", self.base_url)))?
            .pop_if_empty()
            .extend(["api", "v1"])
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    async fn error_body(response: reqwest::Response) -> String {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        format!("{status}: {body}")
    }
}

#[async_trait]
impl StreamingBackend for HttpBackend {
    async fn create(&self, language: &str) -> Result<SessionHandle> {
        let mut url = self.endpoint(&["audio-streaming", "sessions"])?;
        url.query_pairs_mut().append_pair("language", language);

        let response = self.authorize(self.client.post(url)).send().await?;
        if !response.status().is_success() {
            let detail = Self::error_body(response).await;
            tracing::error!(detail = %detail, "session create failed");
            return Err(Error::Session(format!("create failed {detail}")));
        }

        let reply: CreateResponse = response.json().await?;
        if !reply.success {
            return Err(Error::Session("backend refused to create session".to_string()));
        }

        tracing::debug!(session_id = %reply.handle.session_id, "session created");
        Ok(reply.handle)
    }

    async fn stats(&self, session_id: &str) -> Result<Option<SessionStats>> {
        let url = self.endpoint(&["audio-streaming", "sessions", session_id, "stats"])?;

        let response = self.authorize(self.client.get(url)).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let detail = Self::error_body(response).await;
            return Err(Error::Session(format!("stats failed {detail}")));
        }

        let reply: StatsResponse = response.json().await?;
        Ok(reply.success.then_some(reply.stats))
    }

    async fn destroy(&self, session_id: &str) -> Result<()> {
        let url = self.endpoint(&["audio-streaming", "sessions", session_id])?;

        let response = self.authorize(self.client.delete(url)).send().await?;
        if !response.status().is_success() {
            let detail = Self::error_body(response).await;
            return Err(Error::Session(format!("close failed {detail}")));
        }

        tracing::debug!(session_id, "session closed");
        Ok(())
    }
}

#[async_trait]
impl Transcriber for HttpBackend {
    async fn transcribe(&self, chunk: &AudioChunk, language: &str) -> Result<Transcription> {
        tracing::debug!(
            chunk_id = %chunk.chunk_id,
            audio_bytes = chunk.data.len(),
            "starting transcription"
        );

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(chunk.data.clone())
                    .file_name(format!("{}.wav", chunk.chunk_id))
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Transcription(e.to_string()))?,
            )
            .text("language", language.to_string());

        let url = self.endpoint(&["transcribe"])?;
        let response = self
            .authorize(self.client.post(url))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let detail = Self::error_body(response).await;
            tracing::error!(detail = %detail, "transcription API error");
            return Err(Error::Transcription(detail));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl Synthesizer for HttpBackend {
    async fn synthesize(&self, text: &str, language: &str) -> Result<AudioClip> {
        #[derive(serde::Serialize)]
        struct SynthesizeRequest<'a> {
            text: &'a str,
            language: &'a str,
        }

        let url = self.endpoint(&["synthesize"])?;
        let response = self
            .authorize(self.client.post(url))
            .json(&SynthesizeRequest { text, language })
            .send()
            .await?;

        if !response.status().is_success() {
            let detail = Self::error_body(response).await;
            tracing::error!(detail = %detail, "synthesis API error");
            return Err(Error::Synthesis(detail));
        }

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map_or_else(|| "audio/mpeg".to_string(), |v| {
                v.split(';').next().unwrap_or(v).trim().to_string()
            });
        let data = response.bytes().await?.to_vec();

        tracing::debug!(bytes = data.len(), mime_type = %mime_type, "speech synthesized");
        Ok(AudioClip { data, mime_type })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(base: &str) -> HttpBackend {
        let config = BackendConfig {
            base_url: base.to_string(),
            ..BackendConfig::default()
        };
        HttpBackend::new(&config).unwrap()
    }

    #[test]
    fn endpoints_are_joined_under_base_path() {
        let http = backend("http://localhost:8000/");
        let url = http
            .endpoint(&["audio-streaming", "sessions", "abc", "stats"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8000/api/v1/audio-streaming/sessions/abc/stats"
        );

        let prefixed = backend("https://voice.example.com/proxy");
        assert_eq!(
            prefixed.endpoint(&["transcribe"]).unwrap().as_str(),
            "https://voice.example.com/proxy/api/v1/transcribe"
        );
    }

    #[test]
    fn session_ids_are_path_escaped() {
        let http = backend("http://localhost:8000");
        let url = http
            .endpoint(&["audio-streaming", "sessions", "a/b"])
            .unwrap();
        assert!(url.as_str().ends_with("/sessions/a%2Fb"));
    }

    #[test]
    fn create_reply_parses_original_shape() {
        let reply: CreateResponse = serde_json::from_str(
            r#"{"success":true,"session_id":"s1","language":"en",
                "websocket_url":"/api/v1/audio-streaming/ws/s1","message":"ok"}"#,
        )
        .unwrap();
        assert!(reply.success);
        assert_eq!(reply.handle.session_id, "s1");
        assert_eq!(reply.handle.language.as_deref(), Some("en"));
    }
}
