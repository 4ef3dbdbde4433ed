use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Mutex;
use std::time::Instant;

use regex::Regex;

use crate::driver::HostMetrics;

/// Matches access-log lines of the form
/// `reactor> [<timestamp>] ... <host> ... <body-size> ... <response-time> ...`
/// — one line per request, emitted by a `log_format` directive that tags
/// backend host, response body size, and response time.
fn log_filter() -> Regex {
    Regex::new(r"reactor>\s*\[([^\]]*)\][^<]*<([^>]*?)>[^<]*<([^>]*?)>[^<]*<([^>]*?)>")
        .expect("log filter regex is valid")
}

#[derive(Debug, Default, Clone)]
struct HostAccumulator {
    hits: u64,
    bytes: u64,
    response_total: f64,
}

/// Tails an nginx-style access log file, accumulating per-host hit counts,
/// byte counts, and response-time totals between calls to [`pull`].
/// Reopens the file on rotation (detected by a failed read returning no new
/// data followed by the file shrinking).
pub struct NginxLogWatcher {
    filter: Regex,
    state: Mutex<WatcherState>,
}

struct WatcherState {
    path: String,
    file: Option<std::fs::File>,
    offset: u64,
    last_pull: Instant,
    records: HashMap<String, HostAccumulator>,
}

impl NginxLogWatcher {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            filter: log_filter(),
            state: Mutex::new(WatcherState {
                path: path.into(),
                file: None,
                offset: 0,
                last_pull: Instant::now(),
                records: HashMap::new(),
            }),
        }
    }

    /// Read any new lines written since the last call and fold them into the
    /// running accumulators. Safe to call repeatedly; never blocks on I/O
    /// beyond a single read.
    pub fn poll(&self) {
        let mut state = self.state.lock().unwrap();

        if state.file.is_none() {
            match std::fs::File::open(&state.path) {
                Ok(mut f) => {
                    // Seek to end on first open — only new lines count.
                    let end = f.seek(SeekFrom::End(0)).unwrap_or(0);
                    state.offset = end;
                    state.file = Some(f);
                }
                Err(_) => return,
            }
        }

        let mut new_data = String::new();
        let read_result = {
            let file = state.file.as_mut().unwrap();
            let metadata_len = file.metadata().map(|m| m.len()).unwrap_or(0);
            if metadata_len < state.offset {
                // File was rotated/truncated; start over from the top.
                state.offset = 0;
            }
            file.seek(SeekFrom::Start(state.offset)).ok();
            file.read_to_string(&mut new_data)
        };

        let Ok(n) = read_result else { return };
        state.offset += n as u64;

        for line in new_data.lines() {
            let Some(caps) = self.filter.captures(line) else { continue };
            let host = caps[2].to_string();
            let Ok(body) = caps[3].parse::<u64>() else { continue };
            let Ok(response) = caps[4].parse::<f64>() else { continue };

            let entry = state.records.entry(host).or_default();
            entry.hits += 1;
            entry.bytes += body;
            entry.response_total += response;
        }
    }

    /// Drain the accumulated records since the last pull, converting raw
    /// counts into `rate` (hits/sec), `response` (avg seconds), and `bytes`
    /// (bytes/sec) samples, each weighted by hit count.
    pub fn pull(&self) -> HashMap<String, HostMetrics> {
        self.poll();
        let mut state = self.state.lock().unwrap();

        let now = Instant::now();
        let delta = now.duration_since(state.last_pull).as_secs_f64().max(0.001);
        state.last_pull = now;

        let records = std::mem::take(&mut state.records);
        records
            .into_iter()
            .map(|(host, acc)| {
                let hits = acc.hits as f64;
                let mut metrics = HostMetrics::new();
                metrics.insert("rate".into(), (hits, hits / delta));
                metrics.insert("bytes".into(), (hits, acc.bytes as f64 / delta));
                if hits > 0.0 {
                    metrics.insert("response".into(), (hits, acc.response_total / hits));
                }
                (host, metrics)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_tagged_log_lines() {
        let filter = log_filter();
        let line = r#"reactor> [10/Oct/2024:13:55:36] "GET / HTTP/1.1" 200 <10.0.0.5:8080><512><0.042>"#;
        let caps = filter.captures(line).unwrap();
        assert_eq!(&caps[2], "10.0.0.5:8080");
        assert_eq!(&caps[3], "512");
        assert_eq!(&caps[4], "0.042");
    }

    #[test]
    fn pull_aggregates_hits_bytes_and_response_time() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let watcher = NginxLogWatcher::new(file.path().to_str().unwrap());
        // Prime the watcher so it seeks to end-of-file-so-far (empty).
        watcher.poll();

        writeln!(
            file,
            "reactor> [t] <host-a><100><0.1>"
        )
        .unwrap();
        writeln!(
            file,
            "reactor> [t] <host-a><300><0.3>"
        )
        .unwrap();
        file.flush().unwrap();

        let pulled = watcher.pull();
        let host_a = &pulled["host-a"];
        assert_eq!(host_a["rate"].0, 2.0);
        let (_, bytes_rate) = host_a["bytes"];
        assert!(bytes_rate > 0.0);
        let (_, response_avg) = host_a["response"];
        assert!((response_avg - 0.2).abs() < 1e-9);
    }

    #[test]
    fn second_pull_after_no_new_lines_is_empty() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let watcher = NginxLogWatcher::new(file.path().to_str().unwrap());
        watcher.poll();
        let first = watcher.pull();
        assert!(first.is_empty());
    }
}
