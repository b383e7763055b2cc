//! Exploit librarian: strategic hints for discovered services
//!
//! Hints come from a static catalog modelled on Exploit-DB entries, or from an
//! installed `searchsploit` when enabled. Any failure of the external tool
//! (missing binary, timeout, bad output) falls back to the static catalog and is
//! never reported to the caller.

use crate::attack::AttackAction;
use crate::config::KnowledgeConfig;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;

/// Confidence given to hints parsed from searchsploit results
const TOOL_HINT_CONFIDENCE: f64 = 0.80;
/// Maximum number of searchsploit results turned into hints
const TOOL_RESULT_LIMIT: usize = 5;
const WEB_SERVICE_MARKERS: [&str; 4] = ["http", "https", "web", "www"];
const GENERIC_WEB_KEY: &str = "http";

static CVE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"CVE-\d{4}-\d+").unwrap());

/// A suggested action for a service, weighted by confidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategicHint {
    pub action: AttackAction,
    pub service_name: String,
    pub exploit_ref: Option<String>,
    pub description: String,
    pub confidence: f64,
    pub cve_ref: Option<String>,
    pub exploit_path: Option<String>,
}

struct CatalogEntry {
    service: &'static str,
    exploit_id: &'static str,
    cve: Option<&'static str>,
    description: &'static str,
    action: AttackAction,
    confidence: f64,
    version_pattern: Regex,
}

impl CatalogEntry {
    fn new(
        service: &'static str,
        exploit_id: &'static str,
        cve: Option<&'static str>,
        description: &'static str,
        action: AttackAction,
        confidence: f64,
        version_pattern: &'static str,
    ) -> Self {
        Self {
            service,
            exploit_id,
            cve,
            description,
            action,
            confidence,
            version_pattern: Regex::new(version_pattern).unwrap(),
        }
    }

    fn to_hint(&self, service_name: &str, with_path: bool) -> StrategicHint {
        StrategicHint {
            action: self.action,
            service_name: service_name.to_string(),
            exploit_ref: Some(self.exploit_id.to_string()),
            description: self.description.to_string(),
            confidence: self.confidence,
            cve_ref: self.cve.map(str::to_string),
            exploit_path: with_path.then(|| format!("exploits/{}", self.exploit_id)),
        }
    }
}

static CATALOG: Lazy<Vec<CatalogEntry>> = Lazy::new(|| {
    use AttackAction::*;

    vec![
        CatalogEntry::new("apache", "50437", Some("CVE-2021-41773"), "Apache 2.4.49 Path Traversal", PathTraversalAttempt, 0.95, r"2\.4\.(49|50)"),
        CatalogEntry::new("apache", "50438", Some("CVE-2021-42013"), "Apache 2.4.50 Path Traversal RCE", PathTraversalAttempt, 0.95, r"2\.4\.50"),
        CatalogEntry::new("mysql", "23081", Some("CVE-2012-2122"), "MySQL Authentication Bypass", AuthenticationBypassAttempt, 0.85, r"5\.(1|5|6|7)"),
        CatalogEntry::new("mysql", "17491", Some("CVE-2010-1850"), "MySQL SQL Injection", SqlInjectionAttempt, 0.80, r"5\.[0-5]"),
        CatalogEntry::new("postgresql", "45517", Some("CVE-2019-9193"), "PostgreSQL COPY Command RCE", CommandInjectionAttempt, 0.90, r"9\.3|10\.[0-1]|11\.[0-1]"),
        CatalogEntry::new("postgresql", "28545", Some("CVE-2007-6600"), "PostgreSQL SQL Injection", SqlInjectionAttempt, 0.75, r"8\.[0-2]"),
        CatalogEntry::new("nginx", "37977", Some("CVE-2013-2028"), "Nginx Stack Buffer Overflow", PrivilegeEscalationAttempt, 0.70, r"1\.[0-3]\.[0-9]"),
        CatalogEntry::new("php", "49933", Some("CVE-2021-21708"), "PHP Deserialization RCE", DeserializationAttempt, 0.85, r"7\.[0-3]|8\.[0-1]"),
        CatalogEntry::new("php", "31192", Some("CVE-2012-1823"), "PHP CGI Argument Injection", CommandInjectionAttempt, 0.80, r"5\.[3-4]"),
        CatalogEntry::new("redis", "47195", Some("CVE-2022-0543"), "Redis Lua Sandbox Escape RCE", CommandInjectionAttempt, 0.90, r"5\.[0-9]|6\.[0-2]|7\.[0-1]"),
        CatalogEntry::new("elasticsearch", "36337", Some("CVE-2014-3120"), "Elasticsearch Remote Code Execution", CommandInjectionAttempt, 0.95, r"1\.[0-1]\.[0-9]"),
        CatalogEntry::new("ssh", "45210", Some("CVE-2018-15473"), "OpenSSH Username Enumeration", AuthenticationBypassAttempt, 0.60, r"7\.[0-7]"),
        CatalogEntry::new("ftp", "17491", Some("CVE-2015-3306"), "ProFTPD Mod_Copy Command Execution", CommandInjectionAttempt, 0.75, r"1\.3\.[0-5]"),
        CatalogEntry::new(GENERIC_WEB_KEY, "generic_001", None, "Web applications commonly vulnerable to XSS", XssAttempt, 0.50, r".*"),
        CatalogEntry::new(GENERIC_WEB_KEY, "generic_002", None, "Web applications commonly vulnerable to SQL Injection", SqlInjectionAttempt, 0.50, r".*"),
    ]
});

/// Errors from an external exploit search; only ever logged
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("search tool unavailable: {0}")]
    Unavailable(#[from] std::io::Error),
    #[error("search timed out after {0:?}")]
    Timeout(Duration),
    #[error("search tool exited with {0}")]
    Failed(String),
    #[error("unparsable search output: {0}")]
    Parse(#[from] serde_json::Error),
}

/// External exploit database query
#[async_trait]
pub trait ExploitSearch: Send + Sync {
    async fn search(
        &self,
        service: &str,
        version: Option<&str>,
    ) -> Result<Vec<StrategicHint>, SearchError>;
}

/// `searchsploit -j` backend
#[derive(Debug, Clone)]
pub struct Searchsploit {
    bin: String,
    probe_timeout: Duration,
}

impl Searchsploit {
    pub fn new(bin: impl Into<String>, probe_timeout: Duration) -> Self {
        Self {
            bin: bin.into(),
            probe_timeout,
        }
    }

    /// Whether the binary runs at all
    pub async fn probe(&self) -> bool {
        let mut cmd = Command::new(&self.bin);
        cmd.arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(self.probe_timeout, cmd.status()).await {
            Ok(Ok(status)) => status.success(),
            _ => false,
        }
    }
}

#[async_trait]
impl ExploitSearch for Searchsploit {
    async fn search(
        &self,
        service: &str,
        version: Option<&str>,
    ) -> Result<Vec<StrategicHint>, SearchError> {
        let query = match version {
            Some(v) => format!("{} {}", service, v),
            None => service.to_string(),
        };

        let output = Command::new(&self.bin)
            .arg("-j")
            .arg(&query)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(SearchError::Failed(output.status.to_string()));
        }

        parse_searchsploit_output(&output.stdout, service)
    }
}

#[derive(Debug, Deserialize)]
struct SearchsploitOutput {
    #[serde(rename = "RESULTS_EXPLOIT", default)]
    results_exploit: Vec<SearchsploitEntry>,
}

#[derive(Debug, Deserialize)]
struct SearchsploitEntry {
    #[serde(rename = "Title", default)]
    title: String,
    #[serde(rename = "EDB-ID", default)]
    edb_id: String,
    #[serde(rename = "Path", default)]
    path: String,
}

/// Turn `searchsploit -j` output into hints, skipping titles with no recognisable action
pub fn parse_searchsploit_output(
    stdout: &[u8],
    service: &str,
) -> Result<Vec<StrategicHint>, SearchError> {
    let parsed: SearchsploitOutput = serde_json::from_slice(stdout)?;

    Ok(parsed
        .results_exploit
        .into_iter()
        .take(TOOL_RESULT_LIMIT)
        .filter_map(|entry| {
            let action = infer_action_from_title(&entry.title, service)?;
            let cve_ref = CVE_PATTERN.find(&entry.title).map(|m| m.as_str().to_string());
            Some(StrategicHint {
                action,
                service_name: service.to_string(),
                exploit_ref: (!entry.edb_id.is_empty()).then_some(entry.edb_id),
                description: entry.title,
                confidence: TOOL_HINT_CONFIDENCE,
                cve_ref,
                exploit_path: (!entry.path.is_empty()).then_some(entry.path),
            })
        })
        .collect())
}

/// Guess the attack action an exploit title describes
pub fn infer_action_from_title(title: &str, service: &str) -> Option<AttackAction> {
    let title = title.to_lowercase();
    let service = service.to_lowercase();
    let has = |terms: &[&str]| terms.iter().any(|t| title.contains(t));

    if has(&["sql injection", "sqli"]) {
        Some(AttackAction::SqlInjectionAttempt)
    } else if has(&["path traversal", "directory traversal", "lfi", "local file inclusion"]) {
        Some(AttackAction::PathTraversalAttempt)
    } else if has(&["command injection", "rce", "remote code execution", "code execution"]) {
        Some(AttackAction::CommandInjectionAttempt)
    } else if has(&["authentication bypass", "auth bypass", "login bypass"]) {
        Some(AttackAction::AuthenticationBypassAttempt)
    } else if has(&["xss", "cross-site scripting"]) {
        Some(AttackAction::XssAttempt)
    } else if has(&["privilege escalation", "privilege", "escalation"]) {
        Some(AttackAction::PrivilegeEscalationAttempt)
    } else if has(&["ssrf", "server-side request forgery"]) {
        Some(AttackAction::SsrfAttempt)
    } else if has(&["xxe", "xml external entity"]) {
        Some(AttackAction::XxeAttempt)
    } else if has(&["deserialization", "unserialize"]) {
        Some(AttackAction::DeserializationAttempt)
    } else if ["mysql", "postgresql", "sql"].iter().any(|s| service.contains(s)) {
        Some(AttackAction::SqlInjectionAttempt)
    } else if ["apache", "nginx", "web"].iter().any(|s| service.contains(s)) {
        Some(AttackAction::PathTraversalAttempt)
    } else {
        None
    }
}

/// Empty or blank versions mean "any version"
fn normalize_version(version: Option<&str>) -> Option<&str> {
    version.map(str::trim).filter(|v| !v.is_empty())
}

/// Catalog lookup: case-insensitive containment in either direction, then the
/// optional version filter. Falls back to generic web hints for web-looking
/// services with no specific match.
pub fn lookup_static(service: &str, version: Option<&str>) -> Vec<StrategicHint> {
    let version = normalize_version(version);
    let service_lower = service.to_lowercase();

    let mut hints: Vec<StrategicHint> = CATALOG
        .iter()
        .filter(|entry| {
            entry.service.contains(service_lower.as_str()) || service_lower.contains(entry.service)
        })
        .filter(|entry| version.map_or(true, |v| entry.version_pattern.is_match(v)))
        .map(|entry| entry.to_hint(service, true))
        .collect();

    if hints.is_empty() && WEB_SERVICE_MARKERS.iter().any(|m| service_lower.contains(m)) {
        hints = CATALOG
            .iter()
            .filter(|entry| entry.service == GENERIC_WEB_KEY)
            .map(|entry| entry.to_hint(service, false))
            .collect();
    }

    hints
}

/// Highest-confidence hint in `hints`; the first of equals wins
pub fn strongest(hints: &[StrategicHint]) -> Option<&StrategicHint> {
    hints.iter().fold(None, |best: Option<&StrategicHint>, hint| match best {
        Some(b) if b.confidence >= hint.confidence => Some(b),
        _ => Some(hint),
    })
}

type CacheKey = (String, Option<String>);

/// Knowledge source consulted at episode reset
pub struct ExploitLibrarian {
    search: Option<Arc<dyn ExploitSearch>>,
    query_timeout: Duration,
    cache: Mutex<HashMap<CacheKey, Vec<StrategicHint>>>,
}

impl ExploitLibrarian {
    /// Static catalog only
    pub fn new() -> Self {
        Self {
            search: None,
            query_timeout: KnowledgeConfig::default().query_timeout(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Query `search` first, bounded by `query_timeout`
    pub fn with_search(search: Arc<dyn ExploitSearch>, query_timeout: Duration) -> Self {
        Self {
            search: Some(search),
            query_timeout,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Build from config, enabling searchsploit only when it is requested and responds
    pub async fn from_config(config: &KnowledgeConfig) -> Self {
        if !config.use_searchsploit {
            return Self::new();
        }

        let tool = Searchsploit::new(config.searchsploit_bin.clone(), config.probe_timeout());
        if tool.probe().await {
            tracing::info!(bin = %config.searchsploit_bin, "using searchsploit for strategic hints");
            Self::with_search(Arc::new(tool), config.query_timeout())
        } else {
            tracing::warn!(
                bin = %config.searchsploit_bin,
                "searchsploit not available, using the static exploit catalog"
            );
            Self::new()
        }
    }

    pub fn uses_external_search(&self) -> bool {
        self.search.is_some()
    }

    /// All hints for a service, cached per `(service, version)`
    pub async fn lookup(&self, service: &str, version: Option<&str>) -> Vec<StrategicHint> {
        let version = normalize_version(version);
        let key = (service.to_string(), version.map(str::to_string));

        // held across the query so each key reaches the tool at most once
        let mut cache = self.cache.lock().await;
        if let Some(hints) = cache.get(&key) {
            tracing::debug!(service = service, "hint cache hit");
            return hints.clone();
        }

        let hints = match &self.search {
            Some(search) => self.query_tool(search.as_ref(), service, version).await,
            None => lookup_static(service, version),
        };

        cache.insert(key, hints.clone());
        hints
    }

    async fn query_tool(
        &self,
        search: &dyn ExploitSearch,
        service: &str,
        version: Option<&str>,
    ) -> Vec<StrategicHint> {
        let outcome = match tokio::time::timeout(self.query_timeout, search.search(service, version)).await {
            Ok(result) => result,
            Err(_) => Err(SearchError::Timeout(self.query_timeout)),
        };

        match outcome {
            Ok(hints) => hints,
            Err(e) => {
                tracing::warn!(service = service, error = %e, "exploit search failed, falling back to static catalog");
                lookup_static(service, version)
            }
        }
    }

    /// Highest-confidence hint; the first of equals wins
    pub async fn best_hint(&self, service: &str, version: Option<&str>) -> Option<StrategicHint> {
        strongest(&self.lookup(service, version).await).cloned()
    }

    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }

    pub async fn cached_entries(&self) -> usize {
        self.cache.lock().await.len()
    }
}

impl Default for ExploitLibrarian {
    fn default() -> Self {
        Self::new()
    }
}
