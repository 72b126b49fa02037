//! Watcher settings: built-in defaults, an optional prefer-discovered config
//! file, and command-line overrides.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::fetch::DownloadPolicy;
use crate::forum::Selectors;
use crate::http::USER_AGENT;
use crate::pacing::PacingConfig;
use crate::resolver::{HostsConfig, SymbolAlphabet};
use crate::scanner::ContentRules;
use crate::scheduler::SessionConfig;
use crate::tracker::DEFAULT_FINISHED_SENTINEL;

/// Default watermark retention in days.
pub const DEFAULT_RETENTION_DAYS: u64 = 14;

/// Where the board lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub root_url: String,
    pub login_path: String,
    pub board_path: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            root_url: "http://localhost".to_string(),
            login_path: "/login".to_string(),
            board_path: "/caution".to_string(),
        }
    }
}

impl SiteConfig {
    fn join(&self, path: &str) -> String {
        format!("{}{}", self.root_url.trim_end_matches('/'), path)
    }

    pub fn login_url(&self) -> String {
        self.join(&self.login_path)
    }

    pub fn board_url(&self) -> String {
        self.join(&self.board_path)
    }

    pub fn thread_url(&self, thread_id: u64) -> String {
        format!("{}/{}", self.board_url().trim_end_matches('/'), thread_id)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"***")
            .finish()
    }
}

/// Resolved runtime settings: directories, site, credentials and tuning.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root for the tracker database and the default sub-directories.
    pub data_dir: PathBuf,
    /// Tracker database, relative to `data_dir`.
    pub database_filename: String,
    /// Where downloaded files end up.
    pub destination_dir: PathBuf,
    /// Browser download directory, emptied before each browser download.
    pub scratch_dir: PathBuf,
    /// Archived copies used to restore deleted assets.
    pub backup_dir: PathBuf,
    /// Audit records and page dumps.
    pub log_dir: PathBuf,
    /// Sent by the HTTP client and the browser.
    pub user_agent: String,
    /// HTTP timeout in seconds.
    pub request_timeout: u64,
    /// How long to wait for a page's ready marker, in seconds.
    pub page_timeout_secs: u64,
    pub headless: bool,
    pub site: SiteConfig,
    pub credentials: Option<Credentials>,
    pub pacing: PacingConfig,
    pub session: SessionConfig,
    pub selectors: Selectors,
    pub hosts: HostsConfig,
    pub download: DownloadPolicy,
    pub content: ContentRules,
    pub retention_days: u64,
    /// Count stored for threads whose badge is no longer a number.
    pub finished_sentinel: u32,
    pub password_candidates: Arc<Vec<String>>,
    pub symbol_alphabet: Arc<SymbolAlphabet>,
}

impl Default for Settings {
    fn default() -> Self {
        // ~/Documents/boardwatch, else ~/boardwatch, else ./boardwatch
        let data_dir = dirs::document_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("boardwatch");
        Self::with_data_dir(data_dir)
    }
}

impl Settings {
    /// Defaults with every directory placed under `data_dir`.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            destination_dir: data_dir.join("downloads"),
            scratch_dir: data_dir.join("scratch"),
            backup_dir: data_dir.join("backup"),
            log_dir: data_dir.join("logs"),
            data_dir,
            database_filename: "boardwatch.db".to_string(),
            user_agent: USER_AGENT.to_string(),
            request_timeout: 30,
            page_timeout_secs: 5,
            headless: true,
            site: SiteConfig::default(),
            credentials: None,
            pacing: PacingConfig::default(),
            session: SessionConfig::default(),
            selectors: Selectors::default(),
            hosts: HostsConfig::default(),
            download: DownloadPolicy::default(),
            content: ContentRules::default(),
            retention_days: DEFAULT_RETENTION_DAYS,
            finished_sentinel: DEFAULT_FINISHED_SENTINEL,
            password_candidates: Arc::new(Vec::new()),
            symbol_alphabet: Arc::new(SymbolAlphabet::default()),
        }
    }

    /// The watermark store lives next to the downloads under `data_dir`.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    pub fn retention(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.retention_days * 24 * 60 * 60)
    }

    /// Check values that would otherwise fail deep inside a session.
    pub fn validate(&self) -> Result<(), String> {
        self.pacing.validate()?;
        self.session.validate()?;
        self.selectors.compile()?;
        if self.download.max_stalls == 0 {
            return Err("download.max_stalls must be at least 1".to_string());
        }
        regex::RegexSet::new(&self.content.ignore)
            .and_then(|_| regex::RegexSet::new(&self.content.notable))
            .map_err(|e| format!("invalid content pattern: {}", e))?;
        Ok(())
    }

    /// Create the download, scratch, backup and log directories. The scratch
    /// directory must exist before the browser is told to download into it.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        fs::create_dir_all(&self.destination_dir)?;
        fs::create_dir_all(&self.scratch_dir)?;
        fs::create_dir_all(&self.backup_dir)?;
        fs::create_dir_all(&self.log_dir)?;
        Ok(())
    }
}

/// Read a password or alphabet list: one entry per line, trimmed, blank
/// lines skipped.
pub fn read_list(path: &Path) -> Result<Vec<String>, String> {
    let text = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// The on-disk config. Every key is optional; unset keys keep their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data directory, relative to the config file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Tracker database filename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scratch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
    /// Overrides the browser-like default user agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// HTTP timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headless: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Password candidates for gated downloads, one per line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passwords_file: Option<String>,
    /// Symbol alphabet for asset indices, one symbol per line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alphabet_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_days: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_sentinel: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<SiteConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pacing: Option<PacingConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selectors: Option<Selectors>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosts: Option<HostsConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download: Option<DownloadPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<ContentRules>,

    /// Where the config came from; relative paths resolve against its directory.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Discover `boardwatch.{toml,json,...}` through prefer. A missing file
    /// yields an empty config so every setting keeps its default.
    pub async fn load() -> Self {
        match prefer::load("boardwatch").await {
            Ok(pref_config) => Config {
                target: pref_config.get("target").await.ok(),
                database: pref_config.get("database").await.ok(),
                destination: pref_config.get("destination").await.ok(),
                scratch: pref_config.get("scratch").await.ok(),
                backup: pref_config.get("backup").await.ok(),
                logs: pref_config.get("logs").await.ok(),
                user_agent: pref_config.get("user_agent").await.ok(),
                request_timeout: pref_config.get("request_timeout").await.ok(),
                page_timeout: pref_config.get("page_timeout").await.ok(),
                headless: pref_config.get("headless").await.ok(),
                email: pref_config.get("email").await.ok(),
                password: pref_config.get("password").await.ok(),
                passwords_file: pref_config.get("passwords_file").await.ok(),
                alphabet_file: pref_config.get("alphabet_file").await.ok(),
                retention_days: pref_config.get("retention_days").await.ok(),
                finished_sentinel: pref_config.get("finished_sentinel").await.ok(),
                site: pref_config.get("site").await.ok(),
                pacing: pref_config.get("pacing").await.ok(),
                session: pref_config.get("session").await.ok(),
                selectors: pref_config.get("selectors").await.ok(),
                hosts: pref_config.get("hosts").await.ok(),
                download: pref_config.get("download").await.ok(),
                content: pref_config.get("content").await.ok(),
                source_path: pref_config.source_path().cloned(),
            },
            // nothing discovered
            Err(_) => Self::default(),
        }
    }

    /// Read the file given with `--config`; `.json` parses as JSON, anything
    /// else as TOML.
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let mut config = Self::parse(path, &contents)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    fn parse(path: &Path, contents: &str) -> Result<Self, String> {
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            serde_json::from_str(contents).map_err(|e| format!("Failed to parse config file: {}", e))
        } else {
            toml::from_str(contents).map_err(|e| format!("Failed to parse config file: {}", e))
        }
    }

    /// Directory that relative data, backup and list-file paths are anchored to.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
    }

    /// Expand `~`, then anchor relative entries such as `passwords_file =
    /// "passwords.txt"` at `base_dir`.
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = PathBuf::from(shellexpand::tilde(path_str).into_owned());
        if expanded.is_absolute() {
            expanded
        } else {
            base_dir.join(expanded)
        }
    }

    /// Overlay the file's values on `settings`. Credentials survive a `target`
    /// change, and list files are read here so a missing file fails at startup.
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) -> Result<(), String> {
        if let Some(ref target) = self.target {
            let data_dir = self.resolve_path(target, base_dir);
            let previous = std::mem::replace(settings, Settings::with_data_dir(data_dir));
            settings.credentials = previous.credentials;
        }
        if let Some(ref dir) = self.destination {
            settings.destination_dir = self.resolve_path(dir, base_dir);
        }
        if let Some(ref dir) = self.scratch {
            settings.scratch_dir = self.resolve_path(dir, base_dir);
        }
        if let Some(ref dir) = self.backup {
            settings.backup_dir = self.resolve_path(dir, base_dir);
        }
        if let Some(ref dir) = self.logs {
            settings.log_dir = self.resolve_path(dir, base_dir);
        }
        if let Some(ref database) = self.database {
            settings.database_filename = database.clone();
        }
        if let Some(ref user_agent) = self.user_agent {
            settings.user_agent = user_agent.clone();
        }
        if let Some(timeout) = self.request_timeout {
            settings.request_timeout = timeout;
        }
        if let Some(timeout) = self.page_timeout {
            settings.page_timeout_secs = timeout;
        }
        if let Some(headless) = self.headless {
            settings.headless = headless;
        }
        if let (Some(email), Some(password)) = (&self.email, &self.password) {
            settings.credentials = Some(Credentials {
                email: email.clone(),
                password: password.clone(),
            });
        }
        if let Some(days) = self.retention_days {
            settings.retention_days = days;
        }
        if let Some(sentinel) = self.finished_sentinel {
            settings.finished_sentinel = sentinel;
        }
        if let Some(ref site) = self.site {
            settings.site = site.clone();
        }
        if let Some(ref pacing) = self.pacing {
            settings.pacing = pacing.clone();
        }
        if let Some(ref session) = self.session {
            settings.session = session.clone();
        }
        if let Some(ref selectors) = self.selectors {
            settings.selectors = selectors.clone();
        }
        if let Some(ref hosts) = self.hosts {
            settings.hosts = hosts.clone();
        }
        if let Some(ref download) = self.download {
            settings.download = download.clone();
        }
        if let Some(ref content) = self.content {
            settings.content = content.clone();
        }
        if let Some(ref file) = self.passwords_file {
            let list = read_list(&self.resolve_path(file, base_dir))?;
            settings.password_candidates = Arc::new(list);
        }
        if let Some(ref file) = self.alphabet_file {
            let symbols = read_list(&self.resolve_path(file, base_dir))?;
            settings.symbol_alphabet = Arc::new(SymbolAlphabet::new(symbols));
        }
        Ok(())
    }
}

/// Command-line and environment overrides applied on top of the config file.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// `--config`; skips prefer discovery.
    pub config_path: Option<PathBuf>,
    /// `--data-dir`; wins over `target`.
    pub data_dir: Option<PathBuf>,
    /// Credentials from the command line or environment.
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Build validated settings from the config file and command-line overrides.
pub async fn load_settings_with_options(options: LoadOptions) -> Result<Settings, String> {
    let mut config = match &options.config_path {
        Some(path) => Config::load_from_path(path).await?,
        None => Config::load().await,
    };

    let mut settings = match options.data_dir {
        Some(ref data_dir) => {
            // --data-dir takes precedence over `target`
            config.target = None;
            Settings::with_data_dir(data_dir.clone())
        }
        None => Settings::default(),
    };

    // Relative paths resolve against the config file's directory, falling back to CWD
    let base_dir = config
        .base_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    config.apply_to_settings(&mut settings, &base_dir)?;

    if let (Some(email), Some(password)) = (options.email, options.password) {
        settings.credentials = Some(Credentials { email, password });
    }

    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_urls() {
        let site = SiteConfig {
            root_url: "https://board.test/".to_string(),
            ..SiteConfig::default()
        };
        assert_eq!(site.login_url(), "https://board.test/login");
        assert_eq!(site.board_url(), "https://board.test/caution");
        assert_eq!(site.thread_url(42), "https://board.test/caution/42");
    }

    #[test]
    fn test_parse_toml_and_json() {
        let toml_config = Config::parse(
            Path::new("boardwatch.toml"),
            r#"
                target = "data"
                retention_days = 7
                [site]
                root_url = "https://board.test"
                [pacing]
                idle_base = 300.0
            "#,
        )
        .unwrap();
        assert_eq!(toml_config.retention_days, Some(7));
        let pacing = toml_config.pacing.unwrap();
        assert_eq!(pacing.idle_base, 300.0);
        assert_eq!(pacing.decay_power, PacingConfig::default().decay_power);

        let json_config = Config::parse(
            Path::new("boardwatch.json"),
            r#"{"headless": false, "hosts": {"unsupported": ["example.org"]}}"#,
        )
        .unwrap();
        assert_eq!(json_config.headless, Some(false));
        let hosts = json_config.hosts.unwrap();
        assert_eq!(hosts.unsupported, vec!["example.org".to_string()]);
        assert_eq!(hosts.redirector, HostsConfig::default().redirector);
    }

    #[test]
    fn test_apply_resolves_relative_paths_and_lists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("passwords.txt"), "one\n\n two \nthree\n").unwrap();
        std::fs::write(dir.path().join("alphabet.txt"), "x\ny\n").unwrap();

        let config = Config {
            target: Some("state".to_string()),
            backup: Some("/srv/backup".to_string()),
            passwords_file: Some("passwords.txt".to_string()),
            alphabet_file: Some("alphabet.txt".to_string()),
            email: Some("me@example.org".to_string()),
            password: Some("pw".to_string()),
            ..Config::default()
        };
        let mut settings = Settings::with_data_dir(PathBuf::from("/unused"));
        config.apply_to_settings(&mut settings, dir.path()).unwrap();

        assert_eq!(settings.data_dir, dir.path().join("state"));
        assert_eq!(settings.destination_dir, dir.path().join("state/downloads"));
        assert_eq!(settings.backup_dir, PathBuf::from("/srv/backup"));
        assert_eq!(
            settings.password_candidates.as_slice(),
            ["one", "two", "three"]
        );
        assert_eq!(settings.symbol_alphabet.len(), 2);
        assert_eq!(settings.credentials.unwrap().email, "me@example.org");
    }

    #[test]
    fn test_read_list_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alphabet.txt");
        std::fs::write(&path, "x\n\ny\n z \n").unwrap();

        let symbols = read_list(&path).unwrap();
        assert_eq!(symbols, ["x", "y", "z"]);
        let alphabet = SymbolAlphabet::new(symbols);
        assert_eq!(alphabet.encode("zyxq"), "020100");
    }

    #[test]
    fn test_missing_list_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            passwords_file: Some("nope.txt".to_string()),
            ..Config::default()
        };
        let mut settings = Settings::with_data_dir(dir.path().to_path_buf());
        assert!(config.apply_to_settings(&mut settings, dir.path()).is_err());
    }

    #[tokio::test]
    async fn test_load_with_explicit_path_and_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boardwatch.toml");
        std::fs::write(&path, "target = \"ignored\"\nretention_days = 3\n").unwrap();

        let settings = load_settings_with_options(LoadOptions {
            config_path: Some(path),
            data_dir: Some(dir.path().join("override")),
            email: Some("a@b.c".to_string()),
            password: Some("secret".to_string()),
        })
        .await
        .unwrap();

        assert_eq!(settings.data_dir, dir.path().join("override"));
        assert_eq!(settings.retention_days, 3);
        assert_eq!(settings.retention(), std::time::Duration::from_secs(3 * 86_400));
        assert!(format!("{:?}", settings.credentials).contains("***"));
    }

    #[test]
    fn test_ensure_directories() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::with_data_dir(dir.path().join("bw"));
        settings.ensure_directories().unwrap();
        assert!(settings.scratch_dir.is_dir());
        assert!(settings.log_dir.is_dir());
    }
}
