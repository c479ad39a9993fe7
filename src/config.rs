use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub fallback: FallbackConfig,
  #[serde(default)]
  pub provider: ProviderConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub rate_limit: RateLimitConfig,
  #[serde(default)]
  pub probe: ProbeConfig,
}

/// Primary delivery channel: a transactional email provider reached over HTTP.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
  pub endpoint: String,
  pub service_id: String,
  pub template_id: String,
  pub public_key: String,
  /// Retries after the first attempt, per submit/reconcile call.
  pub retry_attempts: u32,
  pub retry_delay_ms: u64,
  /// Per-attempt timeout; an expired attempt counts as a failure.
  pub timeout_secs: u64,
}

impl Default for ProviderConfig {
  fn default() -> Self {
    Self {
      endpoint: "https://api.emailjs.com/api/v1.0/email/send".to_string(),
      service_id: String::new(),
      template_id: String::new(),
      public_key: String::new(),
      retry_attempts: 2,
      retry_delay_ms: 800,
      timeout_secs: 10,
    }
  }
}

impl ProviderConfig {
  /// Placeholder or missing credentials mean the primary channel can never
  /// succeed; the queue then operates in fallback-only mode from the start
  /// instead of failing on every submission.
  pub fn is_configured(&self) -> bool {
    [&self.service_id, &self.template_id, &self.public_key]
      .iter()
      .all(|v| !v.is_empty() && !is_placeholder(v))
  }

  pub fn timeout(&self) -> std::time::Duration {
    std::time::Duration::from_secs(self.timeout_secs)
  }

  pub fn retry_delay(&self) -> std::time::Duration {
    std::time::Duration::from_millis(self.retry_delay_ms)
  }
}

fn is_placeholder(value: &str) -> bool {
  let v = value.to_lowercase();
  v.starts_with("your_") || v.ends_with("_here") || v == "changeme"
}

/// Fallback channel: a mailto hand-off to the platform's mail composer.
#[derive(Debug, Clone, Deserialize)]
pub struct FallbackConfig {
  /// Destination mailbox for the rendered message.
  pub email: String,
  #[serde(default = "default_fallback_subject")]
  pub subject: String,
  #[serde(default = "default_fallback_body")]
  pub body: String,
}

fn default_fallback_subject() -> String {
  "{prestation} - {nom} {prenom} - Nouveau message client".to_string()
}

fn default_fallback_body() -> String {
  "NOUVEAU MESSAGE CLIENT\n\
   \n\
   Nom: {nom}\n\
   Prénom: {prenom}\n\
   Email: {email}\n\
   Téléphone: {telephone}\n\
   \n\
   Prestation: {prestation}\n\
   Objet: {objet}\n\
   \n\
   Message:\n\
   {message}\n\
   \n\
   ---\n\
   Envoyé depuis le site web, le {date}"
    .to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Cache generation id; bumping it evicts every previous generation on
  /// the next activation.
  pub generation: String,
  /// Site origin the precache paths are resolved against.
  pub base_url: String,
  /// Static resources fetched into the cache on install.
  pub precache: Vec<String>,
  /// Last-resort page served when a document request fails offline.
  pub root_document: String,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      generation: "v1".to_string(),
      base_url: String::new(),
      precache: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/styles.css".to_string(),
        "/script.js".to_string(),
        "/mentions-legales.html".to_string(),
      ],
      root_document: "/index.html".to_string(),
    }
  }
}

impl CacheConfig {
  /// Resolve a precache path against the configured origin.
  pub fn resolve(&self, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
      path.to_string()
    } else {
      format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
  }
}

/// Anti-spam limit on submissions.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
  pub max_requests: usize,
  pub window_secs: u64,
}

impl Default for RateLimitConfig {
  fn default() -> Self {
    Self {
      max_requests: 5,
      window_secs: 60,
    }
  }
}

/// Connectivity probe settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
  pub url: String,
  pub interval_secs: u64,
}

impl Default for ProbeConfig {
  fn default() -> Self {
    Self {
      url: "https://www.google.com/favicon.ico".to_string(),
      interval_secs: 30,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./relais.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/relais/config.yaml
  /// 4. ~/.config/relais/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/relais/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("relais.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("relais").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Provider key, with the environment taking precedence over the file.
  ///
  /// Checks RELAIS_PROVIDER_KEY first, then the configured public_key.
  pub fn provider_key(&self) -> String {
    std::env::var("RELAIS_PROVIDER_KEY").unwrap_or_else(|_| self.provider.public_key.clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn minimal_yaml() -> &'static str {
    "fallback:\n  email: contact@example.com\n"
  }

  #[test]
  fn test_minimal_config_gets_defaults() {
    let config: Config = serde_yaml::from_str(minimal_yaml()).unwrap();

    assert_eq!(config.fallback.email, "contact@example.com");
    assert!(config.fallback.body.contains("{message}"));
    assert_eq!(config.provider.retry_attempts, 2);
    assert_eq!(config.provider.timeout_secs, 10);
    assert_eq!(config.rate_limit.max_requests, 5);
    assert_eq!(config.cache.generation, "v1");
    assert_eq!(config.cache.root_document, "/index.html");
  }

  #[test]
  fn test_missing_credentials_are_not_configured() {
    let config: Config = serde_yaml::from_str(minimal_yaml()).unwrap();
    assert!(!config.provider.is_configured());
  }

  #[test]
  fn test_placeholder_credentials_are_not_configured() {
    let yaml = "fallback:\n  email: contact@example.com\n\
                provider:\n  service_id: YOUR_SERVICE_ID\n  template_id: template_x\n  public_key: key_x\n";
    let config: Config = serde_yaml::from_str(yaml).unwrap();
    assert!(!config.provider.is_configured());
  }

  #[test]
  fn test_real_credentials_are_configured() {
    let yaml = "fallback:\n  email: contact@example.com\n\
                provider:\n  service_id: service_tck\n  template_id: template_abc\n  public_key: jQk6uZum\n";
    let config: Config = serde_yaml::from_str(yaml).unwrap();
    assert!(config.provider.is_configured());
  }

  #[test]
  fn test_precache_path_resolution() {
    let cache = CacheConfig {
      base_url: "https://example.netlify.app/".to_string(),
      ..CacheConfig::default()
    };

    assert_eq!(
      cache.resolve("/styles.css"),
      "https://example.netlify.app/styles.css"
    );
    assert_eq!(
      cache.resolve("https://fonts.googleapis.com/css2"),
      "https://fonts.googleapis.com/css2"
    );
  }
}
