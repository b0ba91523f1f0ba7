use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE};
use reqwest::Client;
use std::time::Duration;

use crate::error::FetchError;

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// A stateful browsing session. Each concurrent fetch slot owns exactly one.
#[async_trait]
pub trait PageSession: Send {
    /// Navigates to `url`; the loaded document becomes the session's current content.
    async fn goto(&mut self, url: &str) -> Result<(), FetchError>;

    /// Markup of the current document.
    async fn content(&mut self) -> Result<String, FetchError>;
}

/// Cookie-carrying HTTP session. The portal ties listing pages to the session cookie it
/// hands out on the landing page, so every session keeps its own cookie jar.
pub struct HttpSession {
    client: Client,
    timeout: Duration,
    current: Option<String>,
}

impl HttpSession {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .build()
            .map_err(|e| FetchError::Session(e.to_string()))?;

        Ok(Self { client, timeout, current: None })
    }

    /// Opens `count` independent sessions, one per concurrency slot.
    pub fn pool(count: usize, timeout: Duration) -> Result<Vec<Self>, FetchError> {
        (0..count).map(|_| Self::new(timeout)).collect()
    }
}

#[async_trait]
impl PageSession for HttpSession {
    async fn goto(&mut self, url: &str) -> Result<(), FetchError> {
        self.current = None;
        let resp = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout { url: url.to_string(), timeout: self.timeout }
            } else {
                FetchError::Navigation { url: url.to_string(), reason: e.to_string() }
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus { url: url.to_string(), status: status.as_u16() });
        }

        let body = resp
            .text_with_charset("utf-8")
            .await
            .map_err(|e| FetchError::Navigation { url: url.to_string(), reason: e.to_string() })?;
        debug!("[SESSION] Loaded {} ({} bytes)", url, body.len());
        self.current = Some(body);
        Ok(())
    }

    async fn content(&mut self) -> Result<String, FetchError> {
        self.current
            .clone()
            .ok_or_else(|| FetchError::Session("no document loaded".to_string()))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    pub(crate) enum Scripted {
        Page(String),
        Fail,
        Hang,
    }

    #[derive(Default)]
    pub(crate) struct Script {
        queued: HashMap<String, VecDeque<Scripted>>,
        sticky: HashMap<String, Scripted>,
        pub(crate) visited: Vec<String>,
    }

    impl Script {
        /// Answers every visit to `url` with `response`.
        pub(crate) fn always(&mut self, url: &str, response: Scripted) {
            self.sticky.insert(url.to_string(), response);
        }

        /// Answers the next visit to `url` with `response`, ahead of any sticky answer.
        pub(crate) fn once(&mut self, url: &str, response: Scripted) {
            self.queued.entry(url.to_string()).or_default().push_back(response);
        }

        pub(crate) fn visits(&self, url: &str) -> usize {
            self.visited.iter().filter(|v| *v == url).count()
        }
    }

    /// In-memory session that replays scripted answers per URL.
    pub(crate) struct ScriptedSession {
        script: Arc<Mutex<Script>>,
        current: Option<String>,
    }

    impl ScriptedSession {
        pub(crate) fn pool(script: &Arc<Mutex<Script>>, count: usize) -> Vec<Self> {
            (0..count)
                .map(|_| Self { script: Arc::clone(script), current: None })
                .collect()
        }
    }

    #[async_trait]
    impl PageSession for ScriptedSession {
        async fn goto(&mut self, url: &str) -> Result<(), FetchError> {
            self.current = None;
            let response = {
                let mut script = self.script.lock().unwrap();
                script.visited.push(url.to_string());
                let queued = script.queued.get_mut(url).and_then(|q| q.pop_front());
                queued.or_else(|| script.sticky.get(url).cloned())
            };
            match response {
                Some(Scripted::Page(markup)) => {
                    self.current = Some(markup);
                    Ok(())
                }
                Some(Scripted::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
                Some(Scripted::Fail) | None => Err(FetchError::Navigation {
                    url: url.to_string(),
                    reason: "scripted failure".to_string(),
                }),
            }
        }

        async fn content(&mut self) -> Result<String, FetchError> {
            self.current
                .clone()
                .ok_or_else(|| FetchError::Session("no document loaded".to_string()))
        }
    }
}
