use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::driver::{Backend, HostMetrics, LbDriver};
use crate::error::LbError;

/// In-memory driver for tests and for endpoints with no configured load
/// balancer. Records the last `change` call per URL but performs no I/O.
#[derive(Default)]
pub struct NullLb {
    installed: Mutex<HashMap<String, Vec<Backend>>>,
}

impl NullLb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn installed_backends(&self, url: &str) -> Vec<Backend> {
        self.installed.lock().unwrap().get(url).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl LbDriver for NullLb {
    fn name(&self) -> &'static str {
        "null"
    }

    async fn clear(&self) -> Result<(), LbError> {
        self.installed.lock().unwrap().clear();
        Ok(())
    }

    async fn change(
        &self,
        url: &str,
        _port: u16,
        _endpoint_names: &[String],
        backends: &[Backend],
    ) -> Result<(), LbError> {
        if backends.is_empty() {
            self.installed.lock().unwrap().remove(url);
        } else {
            self.installed.lock().unwrap().insert(url.to_string(), backends.to_vec());
        }
        Ok(())
    }

    async fn save(&self) -> Result<(), LbError> {
        Ok(())
    }

    async fn metrics(&self) -> Result<HashMap<String, HostMetrics>, LbError> {
        Ok(HashMap::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn change_then_installed_backends_round_trips() {
        let lb = NullLb::new();
        let backends = vec![Backend { ip: "10.0.0.1".into(), port: 80, weight: 1 }];
        lb.change("http://x/", 80, &["x".to_string()], &backends).await.unwrap();
        assert_eq!(lb.installed_backends("http://x/"), backends);
    }

    #[tokio::test]
    async fn empty_backends_clears_the_url() {
        let lb = NullLb::new();
        lb.change("http://x/", 80, &["x".to_string()], &[Backend { ip: "1".into(), port: 1, weight: 1 }])
            .await
            .unwrap();
        lb.change("http://x/", 80, &["x".to_string()], &[]).await.unwrap();
        assert!(lb.installed_backends("http://x/").is_empty());
    }
}
