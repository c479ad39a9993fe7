//! Request classification.
//!
//! Two interception policies exist: cache-first for static page assets and
//! network-first for API traffic. Anything else is left alone.

use url::Url;

/// How an intercepted request should be routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Cache-first. `document` requests get the root-page fallback when both
  /// cache and network fail.
  Static { document: bool },
  /// Network-first with stale-cache fallback.
  Api,
  /// Not intercepted.
  PassThrough,
}

/// Classify a request by method, URL shape, and the provider host.
pub fn classify(method: &str, url: &str, provider_host: &str) -> RequestClass {
  let parsed = match Url::parse(url) {
    Ok(parsed) => parsed,
    Err(_) => return RequestClass::PassThrough,
  };

  let host = parsed.host_str().unwrap_or_default();
  if parsed.path().starts_with("/api/") || host.eq_ignore_ascii_case(provider_host) {
    return RequestClass::Api;
  }

  if !method.eq_ignore_ascii_case("GET") {
    return RequestClass::PassThrough;
  }

  match destination(parsed.path()) {
    Some(Destination::Document) => RequestClass::Static { document: true },
    Some(_) => RequestClass::Static { document: false },
    None => RequestClass::PassThrough,
  }
}

enum Destination {
  Document,
  Style,
  Script,
  Font,
}

/// Infer the browser "destination" of a GET from its path extension.
fn destination(path: &str) -> Option<Destination> {
  if path.ends_with('/') {
    return Some(Destination::Document);
  }

  let last_segment = path.rsplit('/').next().unwrap_or(path);
  let extension = match last_segment.rsplit_once('.') {
    Some((_, ext)) => ext.to_lowercase(),
    // Extensionless paths are routed pages
    None => return Some(Destination::Document),
  };

  match extension.as_str() {
    "html" | "htm" => Some(Destination::Document),
    "css" => Some(Destination::Style),
    "js" | "mjs" => Some(Destination::Script),
    "woff" | "woff2" | "ttf" | "otf" => Some(Destination::Font),
    _ => None,
  }
}
