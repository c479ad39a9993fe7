//! Fallback delivery channel: render the submission into a plain-text
//! template and hand the resulting mailto URL to the platform's default
//! mail composer. Terminal hand-off: delivery is not tracked past this
//! point, a human presses "send".

use chrono::Local;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use tracing::info;

use crate::config::FallbackConfig;

use super::Submission;

/// Seam for the actual hand-off so tests can capture the URL.
pub trait MailComposer: Send + Sync {
  fn compose(&self, mailto_url: &str) -> Result<(), String>;
}

/// Opens the URL with the platform's default mail client.
pub struct SystemComposer;

impl MailComposer for SystemComposer {
  fn compose(&self, mailto_url: &str) -> Result<(), String> {
    open::that(mailto_url).map_err(|e| e.to_string())
  }
}

pub struct MailtoChannel {
  config: FallbackConfig,
  composer: Box<dyn MailComposer>,
}

impl MailtoChannel {
  pub fn new(config: FallbackConfig, composer: Box<dyn MailComposer>) -> Self {
    Self { config, composer }
  }

  /// Render the templates and hand the message off.
  pub fn hand_off(&self, submission: &Submission) -> Result<(), String> {
    let url = self.render_url(submission);
    info!("Handing message off to the system mail composer");
    self.composer.compose(&url)
  }

  pub fn render_url(&self, submission: &Submission) -> String {
    let subject = render_template(&self.config.subject, submission);
    let body = render_template(&self.config.body, submission);

    format!(
      "mailto:{}?subject={}&body={}",
      self.config.email,
      utf8_percent_encode(&subject, NON_ALPHANUMERIC),
      utf8_percent_encode(&body, NON_ALPHANUMERIC),
    )
  }
}

/// Substitute `{field}` placeholders. Unknown placeholders are left as-is.
fn render_template(template: &str, submission: &Submission) -> String {
  let date = Local::now().format("%d/%m/%Y %H:%M").to_string();

  template
    .replace("{nom}", &submission.nom)
    .replace("{prenom}", submission.prenom.as_deref().unwrap_or(""))
    .replace("{email}", &submission.email)
    .replace("{telephone}", submission.telephone.as_deref().unwrap_or(""))
    .replace("{prestation}", submission.prestation.as_deref().unwrap_or(""))
    .replace("{objet}", submission.objet.as_deref().unwrap_or(""))
    .replace("{message}", &submission.message)
    .replace("{date}", &date)
}


#[cfg(test)]
mod tests {
  use super::testing::CapturingComposer;
  use super::*;
  use std::sync::Mutex;

  fn submission() -> Submission {
    Submission {
      nom: "Dupont".to_string(),
      email: "client@example.fr".to_string(),
      message: "Mon PC ne démarre plus".to_string(),
      prenom: Some("Marie".to_string()),
      prestation: Some("Maintenance".to_string()),
      ..Submission::default()
    }
  }

  fn config() -> FallbackConfig {
    FallbackConfig {
      email: "pro@example.fr".to_string(),
      subject: "{prestation} - {nom} {prenom}".to_string(),
      body: "De: {nom}\nEmail: {email}\n\n{message}".to_string(),
    }
  }

  #[test]
  fn test_template_substitution() {
    let rendered = render_template("De: {prenom} {nom} <{email}>", &submission());
    assert_eq!(rendered, "De: Marie Dupont <client@example.fr>");
  }

  #[test]
  fn test_missing_optional_fields_render_empty() {
    let mut s = submission();
    s.telephone = None;
    let rendered = render_template("Tel: {telephone}.", &s);
    assert_eq!(rendered, "Tel: .");
  }

  #[test]
  fn test_mailto_url_is_percent_encoded() {
    let channel = MailtoChannel::new(config(), Box::new(SystemComposer));
    let url = channel.render_url(&submission());

    assert!(url.starts_with("mailto:pro@example.fr?subject="));
    // Spaces must be %20, not '+': mail clients take the URL literally.
    assert!(url.contains("Maintenance%20%2D%20Dupont%20Marie"));
    assert!(!url.contains(' '));
    assert!(url.contains("&body="));
  }

  #[test]
  fn test_hand_off_reaches_the_composer() {
    let urls = std::sync::Arc::new(Mutex::new(Vec::new()));
    let channel = MailtoChannel::new(
      config(),
      Box::new(CapturingComposer { urls: urls.clone() }),
    );

    channel.hand_off(&submission()).unwrap();

    let captured = urls.lock().unwrap();
    assert_eq!(captured.len(), 1);
    assert!(captured[0].contains("body=De%3A%20Dupont"));
  }
}
