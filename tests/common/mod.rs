#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::anyhow;
use async_trait::async_trait;
use graphreq::{GraphClient, Sleeper, StaticTokenProvider, TokenProvider};
use url::Url;
use wiremock::MockServer;

pub const TOKEN: &str = "test-token";

/// Records requested delays instead of sleeping.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn slept(&self) -> Vec<Duration> {
        self.slept.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}

pub struct FailingTokenProvider;

impl TokenProvider for FailingTokenProvider {
    fn token(&self, _account_id: Option<&str>) -> anyhow::Result<String> {
        Err(anyhow!("account is signed out"))
    }
}

pub fn client_with(
    server: &MockServer,
    tokens: Arc<dyn TokenProvider>,
) -> (GraphClient, Arc<RecordingSleeper>) {
    let sleeper = Arc::new(RecordingSleeper::default());
    let base = Url::parse(&server.uri()).unwrap();
    let client = GraphClient::new(&base, tokens)
        .unwrap()
        .with_sleeper(sleeper.clone());
    (client, sleeper)
}

pub fn client(server: &MockServer) -> (GraphClient, Arc<RecordingSleeper>) {
    client_with(server, Arc::new(StaticTokenProvider::new(TOKEN)))
}

pub fn secs(values: &[u64]) -> Vec<Duration> {
    values.iter().copied().map(Duration::from_secs).collect()
}
