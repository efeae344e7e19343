//! Configuration composition for generated CLIs.
//!
//! A binary ships with an embedded configuration document. At startup it
//! is merged with the user's preference file and environment overrides
//! under a strict priority chain (highest wins):
//!
//!   1. environment variables
//!   2. command-line flags
//!   3. user preferences (`preferences.*` in the user file)
//!   4. debug override (only when the embedded config enables debug)
//!   5. embedded configuration
//!   6. built-in defaults
//!
//! Locked paths (metadata, branding, api, behaviors.*) always come from
//! the embedded document; user preferences against them are ignored.

use crate::error::{ConfigError, FieldViolation};
use crate::utils::{is_truthy, parse_duration};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::Path;

pub const OUTPUT_FORMATS: &[&str] = &["json", "yaml", "table", "raw"];
pub const COLOR_MODES: &[&str] = &["auto", "always", "never"];
pub const SEVERITIES: &[&str] = &["info", "warning", "critical"];
pub const BACKOFF_KINDS: &[&str] = &["fixed", "linear", "exponential"];

/// Path prefixes that only the embedded configuration may set
const LOCKED_PREFIXES: &[&str] = &[
    "metadata.",
    "branding.",
    "api.",
    "behaviors.auth.",
    "behaviors.retry.",
    "behaviors.caching.",
    "behaviors.pagination.",
    "behaviors.secrets.",
    "behaviors.builtin_commands.",
    "behaviors.global_flags.",
];

/// Paths user preferences may change
const OVERRIDABLE_PREFIXES: &[&str] = &["defaults."];
const OVERRIDABLE_EXACT: &[&str] = &[
    "preferences.http.proxy",
    "preferences.http.ca_bundle",
    "preferences.telemetry.enabled",
];

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub metadata: Metadata,
    pub api: ApiConfig,
    #[serde(default)]
    pub branding: Branding,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub behaviors: Behaviors,
    #[serde(default)]
    pub updates: Updates,
    #[serde(default)]
    pub features: Features,
    #[serde(default)]
    pub preferences: Preferences,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Metadata {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub debug: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default)]
    pub openapi_url: Option<String>,
    #[serde(default)]
    pub environments: Vec<Environment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Branding {
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub banner: Option<String>,
    #[serde(default)]
    pub support_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Defaults {
    #[serde(default)]
    pub output: OutputDefaults,
    #[serde(default)]
    pub http: HttpDefaults,
    #[serde(default)]
    pub pagination: PaginationDefaults,
    #[serde(default)]
    pub retry: RetryDefaults,
    #[serde(default)]
    pub caching: CachingDefaults,
    #[serde(default)]
    pub deprecations: DeprecationDefaults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputDefaults {
    pub format: String,
    pub color: String,
    pub pretty_print: bool,
    pub paging: bool,
}

impl Default for OutputDefaults {
    fn default() -> Self {
        Self {
            format: "json".to_string(),
            color: "auto".to_string(),
            pretty_print: true,
            paging: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpDefaults {
    pub timeout: String,
}

impl Default for HttpDefaults {
    fn default() -> Self {
        Self { timeout: "30s".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationDefaults {
    pub limit: u32,
}

impl Default for PaginationDefaults {
    fn default() -> Self {
        Self { limit: 50 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryDefaults {
    pub max_attempts: u32,
}

impl Default for RetryDefaults {
    fn default() -> Self {
        Self { max_attempts: 2 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachingDefaults {
    pub enabled: bool,
    pub ttl: String,
}

impl Default for CachingDefaults {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: "24h".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeprecationDefaults {
    pub always_show: bool,
    pub min_severity: String,
}

impl Default for DeprecationDefaults {
    fn default() -> Self {
        Self {
            always_show: false,
            min_severity: "warning".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Behaviors {
    #[serde(default)]
    pub auth: AuthBehavior,
    #[serde(default)]
    pub retry: RetryBehavior,
    #[serde(default)]
    pub caching: CachingBehavior,
    #[serde(default)]
    pub pagination: PaginationBehavior,
    #[serde(default)]
    pub secrets: SecretsBehavior,
    #[serde(default)]
    pub builtin_commands: BuiltinCommands,
    #[serde(default)]
    pub global_flags: GlobalFlags,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthBehavior {
    /// "none", "api_key" or "oauth2"
    pub kind: String,
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default)]
    pub header: Option<String>,
}

impl Default for AuthBehavior {
    fn default() -> Self {
        Self {
            kind: "none".to_string(),
            token_env: None,
            header: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryBehavior {
    pub enabled: bool,
    pub max_attempts: u32,
    pub backoff: String,
}

impl Default for RetryBehavior {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 2,
            backoff: "exponential".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachingBehavior {
    pub enabled: bool,
    pub ttl: String,
}

impl Default for CachingBehavior {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: "24h".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationBehavior {
    pub style: String,
    pub limit_param: String,
}

impl Default for PaginationBehavior {
    fn default() -> Self {
        Self {
            style: "offset".to_string(),
            limit_param: "limit".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsBehavior {
    pub mask_output: bool,
    pub partial_show_chars: u32,
}

impl Default for SecretsBehavior {
    fn default() -> Self {
        Self {
            mask_output: true,
            partial_show_chars: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinCommands {
    pub config: bool,
    pub cache: bool,
    pub workflow: bool,
}

impl Default for BuiltinCommands {
    fn default() -> Self {
        Self {
            config: true,
            cache: true,
            workflow: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalFlags {
    pub output: bool,
    pub verbose: bool,
    pub debug: bool,
    pub no_color: bool,
    pub config: bool,
    pub profile: bool,
}

impl Default for GlobalFlags {
    fn default() -> Self {
        Self {
            output: true,
            verbose: true,
            debug: true,
            no_color: true,
            config: true,
            profile: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Updates {
    pub enabled: bool,
    pub check_interval: String,
}

impl Default for Updates {
    fn default() -> Self {
        Self {
            enabled: false,
            check_interval: "24h".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Features {
    pub workflows: bool,
    pub watch: bool,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            workflows: true,
            watch: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Preferences {
    #[serde(default)]
    pub http: HttpPreferences,
    #[serde(default)]
    pub telemetry: TelemetryPreferences,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HttpPreferences {
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub ca_bundle: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryPreferences {
    pub enabled: bool,
}

impl Default for TelemetryPreferences {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Shape of the on-disk user configuration file
#[derive(Debug, Clone, Deserialize, Default)]
pub struct UserFile {
    #[serde(default)]
    pub preferences: Value,
    #[serde(default)]
    pub debug_override: Value,
}

/// The fully merged configuration plus merge diagnostics
#[derive(Debug, Clone)]
pub struct ComposedConfig {
    pub config: AppConfig,
    /// Dotted paths changed by the debug override, for the warning banner
    pub active_overrides: Vec<String>,
    /// Non-fatal merge warnings (printed to the error stream)
    pub warnings: Vec<String>,
}

impl ComposedConfig {
    /// Resolve the base URL for the requested profile
    pub fn base_url_for_profile(&self, profile: Option<&str>) -> Result<String, ConfigError> {
        match profile {
            None => Ok(self.config.api.base_url.clone()),
            Some(name) => self
                .config
                .api
                .environments
                .iter()
                .find(|env| env.name == name)
                .map(|env| env.base_url.clone())
                .ok_or_else(|| ConfigError::UnknownProfile(name.to_string())),
        }
    }
}

/// Composes embedded config, user file, flag overrides and environment
pub struct ConfigComposer {
    env_prefix: String,
}

impl ConfigComposer {
    pub fn new(env_prefix: impl Into<String>) -> Self {
        Self {
            env_prefix: env_prefix.into(),
        }
    }

    /// Full composition pipeline per the priority chain
    pub fn compose(
        &self,
        embedded_bytes: &[u8],
        user_path: &Path,
        flag_overrides: &HashMap<String, Value>,
        env_vars: &[(String, String)],
    ) -> Result<ComposedConfig, ConfigError> {
        let embedded: Value = parse_yaml(embedded_bytes, "<embedded>")?;
        let embedded_config: AppConfig = typed(&embedded, "<embedded>")?;

        let violations = validate_app_config(&embedded_config);
        if !violations.is_empty() {
            return Err(ConfigError::Validation(violations));
        }

        let user_file = self.read_user_file(user_path)?;

        let mut warnings = Vec::new();
        let mut merged = embedded.clone();

        // Debug override first so real preferences still win over it.
        let mut active_overrides = Vec::new();
        if !user_file.debug_override.is_null() {
            if embedded_config.metadata.debug {
                for (path, value) in flatten(&user_file.debug_override) {
                    if get_path(&merged, &path) != Some(value.clone()) {
                        debug!("debug override: {} = {}", path, value);
                        active_overrides.push(path.clone());
                        set_path(&mut merged, &path, value);
                    }
                }
            } else {
                warnings.push(
                    "debug_override present in user configuration but this build does not enable debug mode; ignoring".to_string(),
                );
            }
        }

        // User preferences, restricted to the overridable paths.
        if !user_file.preferences.is_null() {
            let violations = validate_preferences(&user_file.preferences);
            if !violations.is_empty() {
                return Err(ConfigError::Validation(violations));
            }
            for (path, value) in flatten(&user_file.preferences) {
                if let Some(target) = overridable_target(&path) {
                    set_path(&mut merged, &target, value);
                } else {
                    debug!("ignoring locked or unknown preference path: {}", path);
                }
            }
        }

        // Command-line flag overrides.
        for (path, value) in flag_overrides {
            set_path(&mut merged, path, value.clone());
        }

        // Environment variables are the last word.
        for (path, value) in self.env_overrides(env_vars) {
            set_path(&mut merged, &path, value);
        }

        let config: AppConfig = typed(&merged, "<merged>")?;
        Ok(ComposedConfig {
            config,
            active_overrides,
            warnings,
        })
    }

    fn read_user_file(&self, path: &Path) -> Result<UserFile, ConfigError> {
        if !path.exists() {
            debug!("no user configuration at {}", path.display());
            return Ok(UserFile::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        if raw.trim().is_empty() {
            return Ok(UserFile::default());
        }
        serde_yaml::from_str(&raw).map_err(|e| ConfigError::ParseFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Fixed environment-variable mapping table
    fn env_overrides(&self, env_vars: &[(String, String)]) -> Vec<(String, Value)> {
        let mut overrides = Vec::new();
        let prefix = &self.env_prefix;

        for (name, raw) in env_vars {
            let value = match name.strip_prefix(&format!("{}_", prefix)) {
                Some("OUTPUT_FORMAT") => ("defaults.output.format", json!(raw)),
                Some("TIMEOUT") => ("defaults.http.timeout", json!(raw)),
                Some("NO_COLOR") if is_truthy(raw) => ("defaults.output.color", json!("never")),
                Some("PRETTY_PRINT") => ("defaults.output.pretty_print", json!(is_truthy(raw))),
                Some("PAGING") => ("defaults.output.paging", json!(is_truthy(raw))),
                Some("PAGE_LIMIT") => match raw.parse::<u32>() {
                    Ok(limit) => ("defaults.pagination.limit", json!(limit)),
                    Err(_) => {
                        warn!("ignoring non-numeric {}_PAGE_LIMIT: {}", prefix, raw);
                        continue;
                    }
                },
                Some("RETRY") => match raw.parse::<u32>() {
                    Ok(count) => ("defaults.retry.max_attempts", json!(count)),
                    Err(_) => {
                        warn!("ignoring non-numeric {}_RETRY: {}", prefix, raw);
                        continue;
                    }
                },
                Some("NO_CACHE") if is_truthy(raw) => ("defaults.caching.enabled", json!(false)),
                Some("DEPRECATIONS_ALWAYS_SHOW") => {
                    ("defaults.deprecations.always_show", json!(is_truthy(raw)))
                }
                Some("DEPRECATIONS_MIN_SEVERITY") => {
                    ("defaults.deprecations.min_severity", json!(raw))
                }
                _ => {
                    if name == "NO_COLOR" && !raw.is_empty() {
                        ("defaults.output.color", json!("never"))
                    } else {
                        continue;
                    }
                }
            };
            overrides.push((value.0.to_string(), value.1));
        }
        overrides
    }
}

/// Capture the process environment as pairs for `compose`
pub fn capture_env(env_prefix: &str) -> Vec<(String, String)> {
    std::env::vars()
        .filter(|(name, _)| name == "NO_COLOR" || name.starts_with(&format!("{}_", env_prefix)))
        .collect()
}

fn parse_yaml(bytes: &[u8], origin: &str) -> Result<Value, ConfigError> {
    let yaml: serde_yaml::Value =
        serde_yaml::from_slice(bytes).map_err(|e| ConfigError::ParseFailed {
            path: origin.to_string(),
            reason: e.to_string(),
        })?;
    serde_json::to_value(yaml).map_err(|e| ConfigError::ParseFailed {
        path: origin.to_string(),
        reason: e.to_string(),
    })
}

fn typed(tree: &Value, origin: &str) -> Result<AppConfig, ConfigError> {
    serde_json::from_value(tree.clone()).map_err(|e| ConfigError::ParseFailed {
        path: origin.to_string(),
        reason: e.to_string(),
    })
}

/// Map a user-file path onto the merged tree, or None if locked
fn overridable_target(path: &str) -> Option<String> {
    // Paths inside the preferences section arrive without the prefix.
    let qualified = format!("preferences.{}", path);
    if OVERRIDABLE_EXACT.contains(&qualified.as_str()) {
        return Some(qualified);
    }
    if LOCKED_PREFIXES.iter().any(|p| path.starts_with(p)) {
        return None;
    }
    if OVERRIDABLE_PREFIXES.iter().any(|p| path.starts_with(p)) {
        return Some(path.to_string());
    }
    None
}

/// Flatten a tree into (dotted path, leaf value) pairs
pub fn flatten(tree: &Value) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    flatten_into(tree, String::new(), &mut out);
    out
}

fn flatten_into(value: &Value, prefix: String, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_into(child, path, out);
            }
        }
        leaf => {
            if !prefix.is_empty() {
                out.push((prefix, leaf.clone()));
            }
        }
    }
}

/// Read a dotted path out of a tree
pub fn get_path(tree: &Value, path: &str) -> Option<Value> {
    let mut current = tree;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current.clone())
}

/// Write a dotted path into a tree, creating intermediate mappings
pub fn set_path(tree: &mut Value, path: &str, value: Value) {
    let parts: Vec<&str> = path.split('.').collect();
    let mut current = tree;
    for (i, part) in parts.iter().enumerate() {
        if i == parts.len() - 1 {
            if let Value::Object(map) = current {
                map.insert(part.to_string(), value);
            }
            return;
        }
        if !current.get(*part).is_some_and(|v| v.is_object()) {
            if let Value::Object(map) = current {
                map.insert(part.to_string(), Value::Object(Map::new()));
            } else {
                return;
            }
        }
        current = current.get_mut(*part).expect("intermediate node just inserted");
    }
}

/// Field-level validation catalogue for the embedded configuration
pub fn validate_app_config(config: &AppConfig) -> Vec<FieldViolation> {
    let mut violations = Vec::new();
    let mut fail = |path: &str, message: String| {
        violations.push(FieldViolation {
            path: path.to_string(),
            message,
        })
    };

    let name_pattern = regex::Regex::new(r"^[a-z][a-z0-9_-]*$").expect("static pattern");
    if config.metadata.name.is_empty() {
        fail("metadata.name", "must not be empty".to_string());
    } else if !name_pattern.is_match(&config.metadata.name) {
        fail(
            "metadata.name",
            format!("'{}' must match {}", config.metadata.name, name_pattern.as_str()),
        );
    }

    let semver_pattern = regex::Regex::new(r"^\d+\.\d+\.\d+").expect("static pattern");
    if !semver_pattern.is_match(&config.metadata.version) {
        fail(
            "metadata.version",
            format!("'{}' is not a semantic version", config.metadata.version),
        );
    }

    if url::Url::parse(&config.api.base_url).is_err() {
        fail("api.base_url", format!("'{}' is not a valid URL", config.api.base_url));
    }
    if let Some(openapi_url) = &config.api.openapi_url {
        if url::Url::parse(openapi_url).is_err() {
            fail("api.openapi_url", format!("'{}' is not a valid URL", openapi_url));
        }
    }
    if !config.api.environments.is_empty() {
        let default_count = config.api.environments.iter().filter(|e| e.default).count();
        if default_count != 1 {
            fail(
                "api.environments",
                format!("exactly one default environment required, found {}", default_count),
            );
        }
        for (i, environment) in config.api.environments.iter().enumerate() {
            if url::Url::parse(&environment.base_url).is_err() {
                fail(
                    &format!("api.environments[{}].base_url", i),
                    format!("'{}' is not a valid URL", environment.base_url),
                );
            }
        }
    }

    validate_enum(&mut violations, "defaults.output.format", &config.defaults.output.format, OUTPUT_FORMATS);
    validate_enum(&mut violations, "defaults.output.color", &config.defaults.output.color, COLOR_MODES);
    validate_enum(
        &mut violations,
        "defaults.deprecations.min_severity",
        &config.defaults.deprecations.min_severity,
        SEVERITIES,
    );
    validate_enum(&mut violations, "behaviors.retry.backoff", &config.behaviors.retry.backoff, BACKOFF_KINDS);

    validate_duration(&mut violations, "defaults.http.timeout", &config.defaults.http.timeout);
    validate_duration(&mut violations, "defaults.caching.ttl", &config.defaults.caching.ttl);
    validate_duration(&mut violations, "behaviors.caching.ttl", &config.behaviors.caching.ttl);
    validate_duration(&mut violations, "updates.check_interval", &config.updates.check_interval);

    validate_range(&mut violations, "defaults.retry.max_attempts", config.defaults.retry.max_attempts, 0, 10);
    validate_range(&mut violations, "behaviors.retry.max_attempts", config.behaviors.retry.max_attempts, 0, 10);
    validate_range(&mut violations, "defaults.pagination.limit", config.defaults.pagination.limit, 1, 1000);
    validate_range(
        &mut violations,
        "behaviors.secrets.partial_show_chars",
        config.behaviors.secrets.partial_show_chars,
        0,
        16,
    );

    violations
}

/// Validation applied to user preferences before they are merged
pub fn validate_preferences(preferences: &Value) -> Vec<FieldViolation> {
    let mut violations = Vec::new();
    let mut fail = |path: &str, message: String| {
        violations.push(FieldViolation {
            path: format!("preferences.{}", path),
            message,
        })
    };

    for (path, value) in flatten(preferences) {
        match path.as_str() {
            "defaults.output.format" => {
                if !value.as_str().is_some_and(|s| OUTPUT_FORMATS.contains(&s)) {
                    fail(&path, format!("must be one of {:?}", OUTPUT_FORMATS));
                }
            }
            "defaults.output.color" => {
                if !value.as_str().is_some_and(|s| COLOR_MODES.contains(&s)) {
                    fail(&path, format!("must be one of {:?}", COLOR_MODES));
                }
            }
            "defaults.deprecations.min_severity" => {
                if !value.as_str().is_some_and(|s| SEVERITIES.contains(&s)) {
                    fail(&path, format!("must be one of {:?}", SEVERITIES));
                }
            }
            "defaults.http.timeout" | "defaults.caching.ttl" => {
                if !value.as_str().is_some_and(|s| parse_duration(s).is_ok()) {
                    fail(&path, "not a parseable duration".to_string());
                }
            }
            "defaults.retry.max_attempts" => {
                if !value.as_u64().is_some_and(|n| n <= 10) {
                    fail(&path, "must be an integer between 0 and 10".to_string());
                }
            }
            "defaults.pagination.limit" => {
                if !value.as_u64().is_some_and(|n| (1..=1000).contains(&n)) {
                    fail(&path, "must be an integer between 1 and 1000".to_string());
                }
            }
            "http.proxy" => {
                if !value.as_str().is_some_and(|s| url::Url::parse(s).is_ok()) {
                    fail(&path, "must be a valid proxy URL".to_string());
                }
            }
            "telemetry.enabled" => {
                if !value.is_boolean() {
                    fail(&path, "must be a boolean".to_string());
                }
            }
            _ => {}
        }
    }

    violations
}

fn validate_enum(violations: &mut Vec<FieldViolation>, path: &str, value: &str, allowed: &[&str]) {
    if !allowed.contains(&value) {
        violations.push(FieldViolation {
            path: path.to_string(),
            message: format!("'{}' must be one of {:?}", value, allowed),
        });
    }
}

fn validate_duration(violations: &mut Vec<FieldViolation>, path: &str, value: &str) {
    if parse_duration(value).is_err() {
        violations.push(FieldViolation {
            path: path.to_string(),
            message: format!("'{}' is not a parseable duration", value),
        });
    }
}

fn validate_range(violations: &mut Vec<FieldViolation>, path: &str, value: u32, min: u32, max: u32) {
    if value < min || value > max {
        violations.push(FieldViolation {
            path: path.to_string(),
            message: format!("{} is outside the range {}..={}", value, min, max),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const EMBEDDED: &str = r##"
metadata:
  name: acme
  version: 1.2.3
  debug: false
api:
  base_url: https://api.acme.dev
  openapi_url: https://api.acme.dev/openapi.json
  environments:
    - name: production
      base_url: https://api.acme.dev
      default: true
    - name: staging
      base_url: https://staging.acme.dev
branding:
  color: "#ff6600"
defaults:
  output:
    format: json
    color: auto
    pretty_print: true
    paging: false
  http:
    timeout: 30s
  pagination:
    limit: 50
  retry:
    max_attempts: 2
  caching:
    enabled: true
    ttl: 24h
  deprecations:
    always_show: false
    min_severity: warning
behaviors:
  auth:
    kind: api_key
    header: X-Api-Key
  retry:
    enabled: true
    max_attempts: 2
    backoff: exponential
  caching:
    enabled: true
    ttl: 24h
  pagination:
    style: offset
    limit_param: limit
  secrets:
    mask_output: true
    partial_show_chars: 4
  builtin_commands:
    config: true
    cache: true
    workflow: true
  global_flags:
    output: true
    verbose: true
    debug: true
    no_color: true
    config: true
    profile: true
updates:
  enabled: false
  check_interval: 24h
features:
  workflows: true
  watch: true
"##;

    fn compose_with(user_yaml: &str, env: &[(&str, &str)]) -> ComposedConfig {
        let mut user = NamedTempFile::new().unwrap();
        write!(user, "{}", user_yaml).unwrap();
        let env: Vec<(String, String)> = env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ConfigComposer::new("ACME")
            .compose(EMBEDDED.as_bytes(), user.path(), &HashMap::new(), &env)
            .unwrap()
    }

    #[test]
    fn embedded_alone_composes() {
        let composed = compose_with("", &[]);
        assert_eq!(composed.config.metadata.name, "acme");
        assert_eq!(composed.config.defaults.output.format, "json");
        assert!(composed.warnings.is_empty());
    }

    #[test]
    fn preferences_override_defaults_only() {
        let composed = compose_with(
            r#"
preferences:
  defaults:
    output:
      format: yaml
  api:
    base_url: https://evil.example
  metadata:
    name: hacked
"#,
            &[],
        );
        assert_eq!(composed.config.defaults.output.format, "yaml");
        // Locked paths keep the embedded value regardless of preferences.
        assert_eq!(composed.config.api.base_url, "https://api.acme.dev");
        assert_eq!(composed.config.metadata.name, "acme");
    }

    #[test]
    fn user_only_preference_paths_apply() {
        let composed = compose_with(
            r#"
preferences:
  http:
    proxy: http://localhost:3128
  telemetry:
    enabled: false
"#,
            &[],
        );
        assert_eq!(
            composed.config.preferences.http.proxy.as_deref(),
            Some("http://localhost:3128")
        );
        assert!(!composed.config.preferences.telemetry.enabled);
    }

    #[test]
    fn env_beats_preferences() {
        let composed = compose_with(
            r#"
preferences:
  defaults:
    output:
      format: yaml
"#,
            &[("ACME_OUTPUT_FORMAT", "table")],
        );
        assert_eq!(composed.config.defaults.output.format, "table");
    }

    #[test]
    fn env_mapping_table() {
        let composed = compose_with(
            "",
            &[
                ("ACME_TIMEOUT", "5s"),
                ("ACME_NO_COLOR", "1"),
                ("ACME_PRETTY_PRINT", "false"),
                ("ACME_PAGE_LIMIT", "200"),
                ("ACME_RETRY", "4"),
                ("ACME_NO_CACHE", "true"),
                ("ACME_DEPRECATIONS_MIN_SEVERITY", "critical"),
            ],
        );
        assert_eq!(composed.config.defaults.http.timeout, "5s");
        assert_eq!(composed.config.defaults.output.color, "never");
        assert!(!composed.config.defaults.output.pretty_print);
        assert_eq!(composed.config.defaults.pagination.limit, 200);
        assert_eq!(composed.config.defaults.retry.max_attempts, 4);
        assert!(!composed.config.defaults.caching.enabled);
        assert_eq!(composed.config.defaults.deprecations.min_severity, "critical");
    }

    #[test]
    fn bare_no_color_forces_never() {
        let composed = compose_with("", &[("NO_COLOR", "1")]);
        assert_eq!(composed.config.defaults.output.color, "never");
    }

    #[test]
    fn debug_override_warns_when_debug_disabled() {
        let composed = compose_with(
            r#"
debug_override:
  api:
    base_url: https://localhost:8080
"#,
            &[],
        );
        assert_eq!(composed.config.api.base_url, "https://api.acme.dev");
        assert_eq!(composed.warnings.len(), 1);
        assert!(composed.active_overrides.is_empty());
    }

    #[test]
    fn debug_override_applies_when_debug_enabled() {
        let embedded = EMBEDDED.replace("debug: false", "debug: true");
        let mut user = NamedTempFile::new().unwrap();
        write!(
            user,
            r#"
debug_override:
  api:
    base_url: https://localhost:8080
"#
        )
        .unwrap();
        let composed = ConfigComposer::new("ACME")
            .compose(embedded.as_bytes(), user.path(), &HashMap::new(), &[])
            .unwrap();
        assert_eq!(composed.config.api.base_url, "https://localhost:8080");
        assert_eq!(composed.active_overrides, vec!["api.base_url".to_string()]);
    }

    #[test]
    fn invalid_embedded_config_accumulates_violations() {
        let broken = EMBEDDED
            .replace("name: acme", "name: Not Valid")
            .replace("format: json", "format: csv")
            .replace("timeout: 30s", "timeout: soon");
        let user = NamedTempFile::new().unwrap();
        let err = ConfigComposer::new("ACME")
            .compose(broken.as_bytes(), user.path(), &HashMap::new(), &[])
            .unwrap_err();
        match err {
            ConfigError::Validation(violations) => {
                let paths: Vec<_> = violations.iter().map(|v| v.path.as_str()).collect();
                assert!(paths.contains(&"metadata.name"));
                assert!(paths.contains(&"defaults.output.format"));
                assert!(paths.contains(&"defaults.http.timeout"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn invalid_preferences_are_rejected() {
        let mut user = NamedTempFile::new().unwrap();
        write!(
            user,
            r#"
preferences:
  defaults:
    output:
      format: csv
"#
        )
        .unwrap();
        let err = ConfigComposer::new("ACME")
            .compose(EMBEDDED.as_bytes(), user.path(), &HashMap::new(), &[])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn config_roundtrip_preserves_structure() {
        let composed = compose_with("", &[]);
        let serialized = serde_yaml::to_string(&composed.config).unwrap();
        let reparsed: AppConfig = serde_yaml::from_str(&serialized).unwrap();
        assert!(validate_app_config(&reparsed).is_empty());
        assert_eq!(reparsed.api.base_url, composed.config.api.base_url);
        assert_eq!(reparsed.defaults.pagination.limit, composed.config.defaults.pagination.limit);
    }

    #[test]
    fn profile_resolution() {
        let composed = compose_with("", &[]);
        assert_eq!(
            composed.base_url_for_profile(Some("staging")).unwrap(),
            "https://staging.acme.dev"
        );
        assert!(composed.base_url_for_profile(Some("qa")).is_err());
    }

    #[test]
    fn missing_user_file_is_empty() {
        let composed = ConfigComposer::new("ACME")
            .compose(
                EMBEDDED.as_bytes(),
                Path::new("/definitely/not/here.yaml"),
                &HashMap::new(),
                &[],
            )
            .unwrap();
        assert_eq!(composed.config.metadata.name, "acme");
    }

    #[test]
    fn set_and_get_path_helpers() {
        let mut tree = json!({"a": {"b": 1}});
        set_path(&mut tree, "a.c.d", json!(true));
        assert_eq!(get_path(&tree, "a.c.d"), Some(json!(true)));
        assert_eq!(get_path(&tree, "a.b"), Some(json!(1)));
        assert_eq!(get_path(&tree, "a.x"), None);
    }
}
