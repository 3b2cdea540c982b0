//! Health probing and log access.
//!
//! A probe walks the candidate endpoints `/health`, `/mcp`, `/` over HTTPS
//! with a per-attempt share of the caller's total budget. The first
//! candidate that satisfies the classification rules wins; a negative
//! conclusion is reported as a value, never an error.
//!
//! Log access reads the last N lines of the configured file from the tail
//! in fixed-size chunks, so large logs are never loaded whole.
use std::{
    io::SeekFrom,
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::{
    fs,
    io::{AsyncReadExt, AsyncSeekExt},
    sync::OnceCell,
};
use tokio_util::sync::CancellationToken;

use crate::{
    adapters::HttpProbeAdapter,
    config::Settings,
    core::{
        error::{OpError, OpResult, ensure_live},
        requests::{HealthRequest, HealthResult, LogsRequest},
        validate,
    },
    ports::http_client::HttpProbe,
};

/// Candidate paths, probed in order.
const PROBE_ENDPOINTS: &[&str] = &["/health", "/mcp", "/"];
/// Redirect hops followed within one attempt.
const MAX_REDIRECT_HOPS: usize = 5;
/// Tail-read step size for log files.
const TAIL_CHUNK: u64 = 8 * 1024;

/// Owns the pooled probe client and the log-reading surface.
pub struct HealthMonitor {
    settings: Arc<Settings>,
    probe: OnceCell<Arc<dyn HttpProbe>>,
}

enum Attempt {
    Success(HealthResult),
    Failure(HealthResult),
}

impl HealthMonitor {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self {
            settings,
            probe: OnceCell::new(),
        }
    }

    /// Construct with a pre-built probe; the seam tests use to script
    /// responses.
    pub fn with_probe(settings: Arc<Settings>, probe: Arc<dyn HttpProbe>) -> Self {
        let cell = OnceCell::new();
        cell.set(probe).ok();
        Self {
            settings,
            probe: cell,
        }
    }

    /// Drop the pooled client. The next probe would lazily rebuild it, but
    /// teardown is expected to be final.
    pub fn shutdown(&mut self) {
        self.probe = OnceCell::new();
    }

    async fn client(&self) -> OpResult<Arc<dyn HttpProbe>> {
        self.probe
            .get_or_try_init(|| async {
                HttpProbeAdapter::new()
                    .map(|adapter| Arc::new(adapter) as Arc<dyn HttpProbe>)
                    .map_err(|e| {
                        OpError::io(
                            "initializing probe client",
                            std::io::Error::other(format!("{e:#}")),
                        )
                    })
            })
            .await
            .map(Arc::clone)
    }

    /// Probe a domain. The per-candidate deadline is the total budget split
    /// evenly across candidates, rounded up.
    pub async fn health_check(
        &self,
        request: &HealthRequest,
        cancel: &CancellationToken,
    ) -> OpResult<HealthResult> {
        ensure_live(cancel)?;

        let domain = validate::validate_domain(&request.domain)?;
        if !(1..=300).contains(&request.timeout_secs) {
            return Err(OpError::invalid(
                "timeout",
                format!("must be 1-300 seconds, got {}", request.timeout_secs),
            ));
        }

        let per_attempt = Duration::from_secs(
            request
                .timeout_secs
                .div_ceil(PROBE_ENDPOINTS.len() as u64),
        );
        let probe = self.client().await?;

        tracing::info!(domain = %domain, timeout = request.timeout_secs, "health check");

        let mut last_failure: Option<HealthResult> = None;
        for endpoint in PROBE_ENDPOINTS {
            ensure_live(cancel)?;
            let url = format!("https://{domain}{endpoint}");
            match self
                .attempt(
                    &probe,
                    &domain,
                    url,
                    endpoint,
                    per_attempt,
                    request.follow_redirects,
                    cancel,
                )
                .await?
            {
                Attempt::Success(result) => {
                    tracing::info!(url = %result.url, status = ?result.status_code, "health check succeeded");
                    return Ok(result);
                }
                Attempt::Failure(result) => last_failure = Some(result),
            }
        }

        tracing::warn!(domain = %domain, "all health check endpoints failed");
        Ok(last_failure.unwrap_or_else(|| HealthResult {
            domain: domain.clone(),
            url: format!("https://{domain}{}", PROBE_ENDPOINTS[0]),
            status_code: None,
            response_time_ms: None,
            response_body: None,
            success: false,
            error: Some("all health check endpoints failed".to_string()),
            redirect_chain: Vec::new(),
        }))
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt(
        &self,
        probe: &Arc<dyn HttpProbe>,
        domain: &str,
        url: String,
        endpoint: &str,
        budget: Duration,
        follow_redirects: bool,
        cancel: &CancellationToken,
    ) -> OpResult<Attempt> {
        let start = Instant::now();
        let deadline = start + budget;
        let mut current = url;
        let mut chain: Vec<String> = Vec::new();

        loop {
            ensure_live(cancel)?;

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Attempt::Failure(self.failure(
                    domain,
                    &current,
                    chain,
                    format!("timeout after {}s", budget.as_secs()),
                )));
            }

            let response = match probe.get(&current, remaining).await {
                Ok(response) => response,
                Err(err) => {
                    tracing::debug!(url = %current, error = %err, "probe attempt failed");
                    return Ok(Attempt::Failure(self.failure(
                        domain,
                        &current,
                        chain,
                        err.to_string(),
                    )));
                }
            };

            if response.is_redirect() && follow_redirects {
                if chain.len() >= MAX_REDIRECT_HOPS {
                    return Ok(Attempt::Failure(self.failure(
                        domain,
                        &current,
                        chain,
                        format!("more than {MAX_REDIRECT_HOPS} redirect hops"),
                    )));
                }
                if let Some(next) = redirect_target(&current, response.location.as_deref()) {
                    tracing::debug!(from = %current, to = %next, "following redirect");
                    chain.push(std::mem::replace(&mut current, next));
                    continue;
                }
            }

            let elapsed_ms = start.elapsed().as_millis() as u64;
            let result = HealthResult {
                domain: domain.to_string(),
                url: current.clone(),
                status_code: Some(response.status),
                response_time_ms: Some(elapsed_ms),
                response_body: Some(response.body_prefix.clone()),
                success: classify(endpoint, response.status),
                error: None,
                redirect_chain: chain,
            };
            return Ok(if result.success {
                Attempt::Success(result)
            } else {
                Attempt::Failure(HealthResult {
                    error: Some(format!("status {} at {endpoint}", response.status)),
                    ..result
                })
            });
        }
    }

    fn failure(
        &self,
        domain: &str,
        url: &str,
        chain: Vec<String>,
        error: String,
    ) -> HealthResult {
        HealthResult {
            domain: domain.to_string(),
            url: url.to_string(),
            status_code: None,
            response_time_ms: None,
            response_body: None,
            success: false,
            error: Some(error),
            redirect_chain: chain,
        }
    }

    /// Read the last `lines` lines of the requested log.
    pub async fn get_logs(
        &self,
        request: &LogsRequest,
        cancel: &CancellationToken,
    ) -> OpResult<String> {
        ensure_live(cancel)?;

        if !(1..=1000).contains(&request.lines) {
            return Err(OpError::invalid(
                "lines",
                format!("must be 1-1000, got {}", request.lines),
            ));
        }

        let path = self.settings.log_file_for(request.kind);
        tracing::info!(kind = request.kind.as_str(), lines = request.lines, "reading log");
        tail_lines(&path, request.kind.as_str(), request.lines, cancel).await
    }
}

/// Success rules: any 2xx wins; 401/403/406 win only on the `/mcp`
/// candidate (the auth gate or MCP content negotiation reached the target).
/// Everything else, including uncollapsed redirects, fails the candidate.
fn classify(endpoint: &str, status: u16) -> bool {
    matches!(status, 200..=299) || (endpoint == "/mcp" && matches!(status, 401 | 403 | 406))
}

/// Resolve a `Location` header against the current URL.
fn redirect_target(current: &str, location: Option<&str>) -> Option<String> {
    let location = location?;
    let base = url::Url::parse(current).ok()?;
    base.join(location).ok().map(String::from)
}

/// Chunked tail read: walk backwards from EOF until enough newlines have
/// been seen, then split out the trailing lines.
async fn tail_lines(
    path: &Path,
    kind: &str,
    lines: usize,
    cancel: &CancellationToken,
) -> OpResult<String> {
    let mut file = fs::File::open(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            OpError::NotFound(format!("{kind} log ({})", path.display()))
        } else {
            OpError::io("opening log file", e)
        }
    })?;

    let len = file
        .metadata()
        .await
        .map_err(|e| OpError::io("reading log metadata", e))?
        .len();

    let mut pos = len;
    let mut buffer: Vec<u8> = Vec::new();
    let mut newlines = 0usize;

    while pos > 0 {
        ensure_live(cancel)?;
        let step = TAIL_CHUNK.min(pos);
        pos -= step;
        file.seek(SeekFrom::Start(pos))
            .await
            .map_err(|e| OpError::io("seeking log file", e))?;

        let mut chunk = vec![0u8; step as usize];
        file.read_exact(&mut chunk)
            .await
            .map_err(|e| OpError::io("reading log file", e))?;

        newlines += chunk.iter().filter(|&&b| b == b'\n').count();
        chunk.extend_from_slice(&buffer);
        buffer = chunk;

        // One newline more than requested guarantees `lines` complete lines
        // are inside the buffer.
        if newlines > lines {
            break;
        }
    }

    let text = String::from_utf8_lossy(&buffer);
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    let mut out = all[start..].join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::{
        config::LogFiles,
        core::requests::{AuthMethod, BaseType, LogKind},
        ports::http_client::{ProbeError, ProbeResponse, ProbeResult},
    };

    fn test_settings(log_dir: &Path) -> Arc<Settings> {
        Arc::new(Settings {
            config_dir: log_dir.join("confs"),
            template_dir: log_dir.join("templates"),
            log_dir: log_dir.to_path_buf(),
            default_auth_method: AuthMethod::Authelia,
            default_config_base: BaseType::Subdomain,
            default_quic_enabled: false,
            backup_retention_days: 30,
            health_timeout_default_s: 30,
            max_file_bytes: 2 * 1024 * 1024,
            log_files: LogFiles::default(),
        })
    }

    /// Probe scripted per URL; unknown URLs report a connection error.
    struct ScriptedProbe {
        responses: HashMap<String, ProbeResponse>,
    }

    impl ScriptedProbe {
        fn new(entries: &[(&str, u16, Option<&str>)]) -> Arc<Self> {
            let responses = entries
                .iter()
                .map(|(url, status, location)| {
                    (
                        url.to_string(),
                        ProbeResponse {
                            status: *status,
                            location: location.map(str::to_string),
                            body_prefix: "ok".to_string(),
                        },
                    )
                })
                .collect();
            Arc::new(Self { responses })
        }
    }

    #[async_trait]
    impl HttpProbe for ScriptedProbe {
        async fn get(&self, url: &str, _timeout: Duration) -> ProbeResult<ProbeResponse> {
            self.responses
                .get(url)
                .cloned()
                .ok_or_else(|| ProbeError::Connection(format!("no route to {url}")))
        }
    }

    fn monitor(dir: &TempDir, probe: Arc<ScriptedProbe>) -> HealthMonitor {
        HealthMonitor::with_probe(test_settings(dir.path()), probe)
    }

    fn request(domain: &str, follow: bool) -> HealthRequest {
        HealthRequest {
            domain: domain.to_string(),
            timeout_secs: 15,
            follow_redirects: follow,
        }
    }

    #[tokio::test]
    async fn healthy_endpoint_wins_first() {
        let dir = TempDir::new().unwrap();
        let probe = ScriptedProbe::new(&[("https://ai.example.com/health", 200, None)]);
        let monitor = monitor(&dir, probe);

        let result = monitor
            .health_check(&request("ai.example.com", true), &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.url, "https://ai.example.com/health");
        assert_eq!(result.status_code, Some(200));
        assert!(result.response_time_ms.unwrap() <= 15_000);
    }

    #[tokio::test]
    async fn auth_gated_mcp_counts_as_success() {
        let dir = TempDir::new().unwrap();
        // 404 at /health, 401 at /mcp: the auth gate reached the target.
        let probe = ScriptedProbe::new(&[
            ("https://ai.example.com/health", 404, None),
            ("https://ai.example.com/mcp", 401, None),
        ]);
        let monitor = monitor(&dir, probe);

        let result = monitor
            .health_check(&request("ai.example.com", true), &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.url, "https://ai.example.com/mcp");
        assert_eq!(result.status_code, Some(401));
    }

    #[tokio::test]
    async fn gated_root_does_not_count() {
        let dir = TempDir::new().unwrap();
        // 401 everywhere: only /mcp may treat that as reachable.
        let probe = ScriptedProbe::new(&[
            ("https://app.example.com/health", 401, None),
            ("https://app.example.com/mcp", 404, None),
            ("https://app.example.com/", 401, None),
        ]);
        let monitor = monitor(&dir, probe);

        let result = monitor
            .health_check(&request("app.example.com", true), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn redirects_are_followed_to_success() {
        let dir = TempDir::new().unwrap();
        let probe = ScriptedProbe::new(&[
            (
                "https://app.example.com/health",
                301,
                Some("https://app.example.com/status"),
            ),
            ("https://app.example.com/status", 200, None),
        ]);
        let monitor = monitor(&dir, probe);

        let result = monitor
            .health_check(&request("app.example.com", true), &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.url, "https://app.example.com/status");
        assert_eq!(result.redirect_chain, vec!["https://app.example.com/health"]);
    }

    #[tokio::test]
    async fn redirect_without_follow_fails_the_candidate() {
        let dir = TempDir::new().unwrap();
        let probe = ScriptedProbe::new(&[
            (
                "https://app.example.com/health",
                301,
                Some("https://elsewhere.example.com/"),
            ),
            ("https://app.example.com/mcp", 404, None),
            ("https://app.example.com/", 200, None),
        ]);
        let monitor = monitor(&dir, probe);

        let result = monitor
            .health_check(&request("app.example.com", false), &CancellationToken::new())
            .await
            .unwrap();
        // The 301 is not success; the later 200 at / is.
        assert!(result.success);
        assert_eq!(result.url, "https://app.example.com/");
    }

    #[tokio::test]
    async fn redirect_loops_are_capped() {
        let dir = TempDir::new().unwrap();
        let probe = ScriptedProbe::new(&[
            (
                "https://a.example.com/health",
                302,
                Some("https://a.example.com/health"),
            ),
            ("https://a.example.com/mcp", 500, None),
            ("https://a.example.com/", 502, None),
        ]);
        let monitor = monitor(&dir, probe);

        let result = monitor
            .health_check(&request("a.example.com", true), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn invalid_timeout_is_rejected() {
        let dir = TempDir::new().unwrap();
        let probe = ScriptedProbe::new(&[]);
        let monitor = monitor(&dir, probe);

        let mut req = request("a.example.com", true);
        req.timeout_secs = 0;
        assert!(monitor
            .health_check(&req, &CancellationToken::new())
            .await
            .is_err());
        req.timeout_secs = 301;
        assert!(monitor
            .health_check(&req, &CancellationToken::new())
            .await
            .is_err());
    }

    #[test]
    fn classification_table() {
        assert!(classify("/health", 200));
        assert!(classify("/", 204));
        assert!(classify("/mcp", 401));
        assert!(classify("/mcp", 403));
        assert!(classify("/mcp", 406));
        assert!(!classify("/health", 401));
        assert!(!classify("/", 403));
        assert!(!classify("/mcp", 404));
        assert!(!classify("/mcp", 500));
        assert!(!classify("/health", 301));
    }

    #[tokio::test]
    async fn tail_returns_last_lines() {
        let dir = TempDir::new().unwrap();
        let log_path = dir.path().join("nginx");
        std::fs::create_dir_all(&log_path).unwrap();
        let file = log_path.join("error.log");
        let body: String = (1..=50).map(|i| format!("line {i}\n")).collect();
        std::fs::write(&file, body).unwrap();

        let monitor = monitor(&dir, ScriptedProbe::new(&[]));
        let out = monitor
            .get_logs(
                &LogsRequest {
                    kind: LogKind::NginxError,
                    lines: 3,
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(out, "line 48\nline 49\nline 50\n");
    }

    #[tokio::test]
    async fn tail_handles_short_files_and_missing_logs() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("nginx")).unwrap();
        std::fs::write(dir.path().join("nginx/error.log"), "only line\n").unwrap();

        let monitor = monitor(&dir, ScriptedProbe::new(&[]));
        let cancel = CancellationToken::new();

        let out = monitor
            .get_logs(
                &LogsRequest {
                    kind: LogKind::NginxError,
                    lines: 100,
                },
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(out, "only line\n");

        let missing = monitor
            .get_logs(
                &LogsRequest {
                    kind: LogKind::Fail2ban,
                    lines: 10,
                },
                &cancel,
            )
            .await;
        assert!(matches!(missing, Err(OpError::NotFound(_))));
    }
}
