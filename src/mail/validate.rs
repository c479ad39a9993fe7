//! Submission validation at the queue boundary.
//!
//! Failures here are reported synchronously to the caller and never reach
//! the queue or the network.

use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

use super::Submission;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
  #[error("champ requis manquant: {0}")]
  MissingField(&'static str),
  #[error("champ trop long: {field} (max {max})")]
  TooLong { field: &'static str, max: usize },
  #[error("adresse email invalide")]
  InvalidEmail,
}

/// RFC-light: something, an @, something, a dot, something. Real address
/// verification happens when the provider bounces.
const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";

fn email_regex() -> &'static Regex {
  static EMAIL_RE: OnceLock<Regex> = OnceLock::new();
  EMAIL_RE.get_or_init(|| Regex::new(EMAIL_PATTERN).expect("valid email pattern"))
}

const MAX_NOM: usize = 50;
const MAX_PRENOM: usize = 50;
const MAX_EMAIL: usize = 100;
const MAX_TELEPHONE: usize = 20;
const MAX_OBJET: usize = 200;
const MAX_MESSAGE: usize = 2000;

pub fn validate(submission: &Submission) -> Result<(), ValidationError> {
  require("nom", &submission.nom)?;
  require("email", &submission.email)?;
  require("message", &submission.message)?;

  check_len("nom", &submission.nom, MAX_NOM)?;
  check_len("email", &submission.email, MAX_EMAIL)?;
  check_len("message", &submission.message, MAX_MESSAGE)?;
  check_opt_len("prenom", submission.prenom.as_deref(), MAX_PRENOM)?;
  check_opt_len("telephone", submission.telephone.as_deref(), MAX_TELEPHONE)?;
  check_opt_len("objet", submission.objet.as_deref(), MAX_OBJET)?;

  if !email_regex().is_match(submission.email.trim()) {
    return Err(ValidationError::InvalidEmail);
  }

  Ok(())
}

fn require(field: &'static str, value: &str) -> Result<(), ValidationError> {
  if value.trim().is_empty() {
    return Err(ValidationError::MissingField(field));
  }
  Ok(())
}

fn check_len(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
  if value.chars().count() > max {
    return Err(ValidationError::TooLong { field, max });
  }
  Ok(())
}

fn check_opt_len(
  field: &'static str,
  value: Option<&str>,
  max: usize,
) -> Result<(), ValidationError> {
  match value {
    Some(value) => check_len(field, value, max),
    None => Ok(()),
  }
}
