#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use meteofrance::{Client, ClientConfig, HttpRequest, HttpTransport, RawResponse, Result};

/// Replays canned responses and records what was sent.
#[derive(Default)]
pub struct Replay {
    responses: Mutex<VecDeque<RawResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl Replay {
    pub fn new(responses: impl IntoIterator<Item = RawResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl HttpTransport for Replay {
    fn send(&self, request: &HttpRequest) -> Result<RawResponse> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| RawResponse::new(599, "no more responses")))
    }
}

pub fn client(cfg: ClientConfig, replay: &Arc<Replay>) -> Arc<Client> {
    Arc::new(
        Client::from_config(cfg)
            .unwrap()
            .with_transport(Arc::clone(replay))
            .with_backoff(Duration::ZERO),
    )
}

pub fn json(status: u16, body: &str) -> RawResponse {
    RawResponse::new(status, body).with_content_type("application/json")
}
