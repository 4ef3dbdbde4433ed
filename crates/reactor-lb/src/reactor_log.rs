use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::driver::{Backend, HostMetrics, LbDriver};
use crate::error::LbError;
use crate::nginx_log::NginxLogWatcher;

/// File-backed reference load-balancer driver. Writes one JSON backend-map
/// file per URL under `config_dir`; `save()` is the in-process analog of
/// writing the nginx site config and sending SIGHUP — here it's just an
/// fsync, since there's no external process to reload. Metrics are read
/// back from an access log tagged in the same `reactor> [...] <host><bytes>
/// <response>` format the nginx driver emits.
pub struct ReactorLogLb {
    config_dir: PathBuf,
    log: NginxLogWatcher,
    tracked: Mutex<HashMap<String, Vec<(String, u16)>>>,
}

fn config_file_name(url: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(url.as_bytes());
    format!("reactor.{:x}.json", digest)
}

impl ReactorLogLb {
    pub fn new(config_dir: impl Into<PathBuf>, access_log_path: impl Into<String>) -> Self {
        Self {
            config_dir: config_dir.into(),
            log: NginxLogWatcher::new(access_log_path),
            tracked: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl LbDriver for ReactorLogLb {
    fn name(&self) -> &'static str {
        "reactor-log"
    }

    async fn clear(&self) -> Result<(), LbError> {
        self.tracked.lock().unwrap().clear();
        let mut entries = std::fs::read_dir(&self.config_dir)
            .map_err(|e| LbError::Internal(format!("read_dir {}: {}", self.config_dir.display(), e)))?;
        while let Some(Ok(entry)) = entries.next() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json")
                && path.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.starts_with("reactor."))
            {
                std::fs::remove_file(&path)
                    .map_err(|e| LbError::WriteFailed(format!("remove {}: {}", path.display(), e)))?;
            }
        }
        Ok(())
    }

    async fn change(
        &self,
        url: &str,
        port: u16,
        endpoint_names: &[String],
        backends: &[Backend],
    ) -> Result<(), LbError> {
        let file_name = config_file_name(url);
        let path = self.config_dir.join(&file_name);

        if backends.is_empty() {
            self.tracked.lock().unwrap().remove(url);
            if path.exists() {
                std::fs::remove_file(&path)
                    .map_err(|e| LbError::WriteFailed(format!("remove {}: {}", path.display(), e)))?;
            }
            return Ok(());
        }

        let ipspecs: Vec<(String, u16)> = backends.iter().map(|b| (b.ip.clone(), b.port)).collect();
        self.tracked.lock().unwrap().insert(url.to_string(), ipspecs);

        let doc = serde_json::json!({
            "url": url,
            "port": port,
            "endpoints": endpoint_names,
            "backends": backends.iter().map(|b| serde_json::json!({
                "ip": b.ip, "port": b.port, "weight": b.weight,
            })).collect::<Vec<_>>(),
        });

        let contents = serde_json::to_vec_pretty(&doc)
            .map_err(|e| LbError::Internal(format!("serialize config: {}", e)))?;
        std::fs::write(&path, contents)
            .map_err(|e| LbError::WriteFailed(format!("write {}: {}", path.display(), e)))?;
        debug!(url, backends = backends.len(), "reactor-log: change");
        Ok(())
    }

    async fn save(&self) -> Result<(), LbError> {
        // No external process to reload in this reference backend; the
        // config directory itself is the source of truth for `change`.
        Ok(())
    }

    async fn metrics(&self) -> Result<HashMap<String, HostMetrics>, LbError> {
        let mut records = self.log.pull();

        let tracked = self.tracked.lock().unwrap();
        for backends in tracked.values() {
            for (ip, port) in backends {
                let hostinfo = format!("{}:{}", ip, port);
                records.entry(hostinfo).or_default();
            }
        }
        Ok(records)
    }

    async fn drop_session(&self, client: &str, backend: &Backend) -> Result<(), LbError> {
        warn!(client, backend = %backend.ip, "reactor-log: drop_session is a no-op (no sticky-session state kept)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn change_with_backends_writes_a_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("access.log");
        std::fs::write(&log, "").unwrap();
        let lb = ReactorLogLb::new(dir.path(), log.to_str().unwrap());

        lb.change(
            "http://svc.example.com/",
            80,
            &["web".to_string()],
            &[Backend { ip: "10.0.0.1".into(), port: 8080, weight: 1 }],
        )
        .await
        .unwrap();

        let file = dir.path().join(config_file_name("http://svc.example.com/"));
        assert!(file.exists());
    }

    #[tokio::test]
    async fn change_with_no_backends_removes_the_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("access.log");
        std::fs::write(&log, "").unwrap();
        let lb = ReactorLogLb::new(dir.path(), log.to_str().unwrap());
        let url = "http://svc.example.com/";

        lb.change(url, 80, &["web".to_string()], &[Backend { ip: "10.0.0.1".into(), port: 8080, weight: 1 }])
            .await
            .unwrap();
        lb.change(url, 80, &["web".to_string()], &[]).await.unwrap();

        let file = dir.path().join(config_file_name(url));
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn clear_removes_all_tracked_configs() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("access.log");
        std::fs::write(&log, "").unwrap();
        let lb = ReactorLogLb::new(dir.path(), log.to_str().unwrap());

        lb.change(
            "http://a/",
            80,
            &["a".to_string()],
            &[Backend { ip: "10.0.0.1".into(), port: 8080, weight: 1 }],
        )
        .await
        .unwrap();
        lb.clear().await.unwrap();

        assert!(std::fs::read_dir(dir.path()).unwrap().filter_map(|e| e.ok()).count() == 1); // only access.log remains
    }
}
