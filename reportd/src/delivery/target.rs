use report_render::TemplateEngine;

use super::Chat;
use crate::domain::{EmailRecipient, Recipient, Report};
use crate::export::NameContext;
use crate::{Error, Result};

/// A recipient with its templates evaluated.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Telegram(Chat),
    FileServer {
        remote_dir: String,
    },
    Email {
        to: Vec<String>,
        cc: Vec<String>,
        subject: String,
        /// `None` when the recipient has no body template.
        body: Option<String>,
    },
}

impl Target {
    pub fn sink(&self) -> &'static str {
        match self {
            Target::Telegram(_) => "telegram",
            Target::FileServer { .. } => "smb",
            Target::Email { .. } => "smtp",
        }
    }
}

/// Resolve every recipient of `report`, in declared order.
///
/// A recipient that cannot be resolved is skipped and its error joined into
/// the second element; the others are still returned.
pub fn resolve_targets(templates: &TemplateEngine, report: &Report) -> (Vec<Target>, Option<Error>) {
    let mut targets = Vec::with_capacity(report.recipients.len());
    let mut errors = Vec::new();

    for recipient in &report.recipients {
        match resolve(templates, report, recipient) {
            Ok(target) => targets.push(target),
            Err(err) => errors.push(err),
        }
    }

    (targets, Error::join(errors))
}

fn resolve(templates: &TemplateEngine, report: &Report, recipient: &Recipient) -> Result<Target> {
    match recipient {
        Recipient::TelegramChat { chat_id, thread_id } => {
            if *chat_id == 0 {
                return Err(Error::malformed(&report.name, "telegram recipient with chat id 0"));
            }
            Ok(Target::Telegram(Chat {
                chat_id: *chat_id,
                thread_id: *thread_id,
            }))
        }
        Recipient::FileServer { remote_path } => {
            let remote_dir = remote_path.trim();
            if remote_dir.is_empty() {
                return Err(Error::malformed(&report.name, "file server recipient without path"));
            }
            Ok(Target::FileServer {
                remote_dir: remote_dir.to_string(),
            })
        }
        Recipient::Email(email) => resolve_email(templates, report, email),
    }
}

fn resolve_email(
    templates: &TemplateEngine,
    report: &Report,
    email: &EmailRecipient,
) -> Result<Target> {
    let to: Vec<String> = clean_addresses(&email.to);
    if to.is_empty() {
        return Err(Error::malformed(&report.name, "email recipient without addresses"));
    }

    let render = |source: &str| {
        templates
            .render(source, NameContext::of(report))
            .map(|text| text.trim().to_string())
            .map_err(|e| Error::Template(e.to_string()))
    };

    let subject = match email.subject_template.trim() {
        "" => report.title.clone(),
        source => render(source)?,
    };
    let body = email
        .body_template
        .as_deref()
        .filter(|b| !b.trim().is_empty())
        .map(render)
        .transpose()?;

    Ok(Target::Email {
        to,
        cc: clean_addresses(&email.cc),
        subject,
        body,
    })
}

fn clean_addresses(addresses: &[String]) -> Vec<String> {
    addresses
        .iter()
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Local};

    fn report(recipients: Vec<Recipient>) -> Report {
        Report {
            name: "daily".into(),
            title: "Daily sales".into(),
            group_id: None,
            queries: Vec::new(),
            evaluation: "[*]".into(),
            exports: Vec::new(),
            recipients,
            active: true,
        }
    }

    #[test]
    fn test_resolve_keeps_order_and_accumulates_errors() {
        let report = report(vec![
            Recipient::telegram(42, Some(7)),
            Recipient::file_server("  "),
            Recipient::file_server("/reports"),
            Recipient::Email(EmailRecipient {
                to: vec![" ".into()],
                cc: Vec::new(),
                subject_template: "x".into(),
                body_template: None,
            }),
        ]);

        let (targets, error) = resolve_targets(&TemplateEngine::new(), &report);
        assert_eq!(
            targets,
            vec![
                Target::Telegram(Chat {
                    chat_id: 42,
                    thread_id: Some(7)
                }),
                Target::FileServer {
                    remote_dir: "/reports".into()
                },
            ]
        );
        assert_eq!(error.unwrap().leaves().len(), 2);
    }

    #[test]
    fn test_email_subject_template() {
        let report = report(vec![Recipient::Email(EmailRecipient {
            to: vec!["u@x".into()],
            cc: vec!["c@x".into()],
            subject_template: r#"R {{ now() | subDays(1) | date("2006-01-02") }}"#.into(),
            body_template: Some("{{ title }}".into()),
        })]);

        let (targets, error) = resolve_targets(&TemplateEngine::new(), &report);
        assert!(error.is_none());
        let yesterday = (Local::now() - Duration::days(1)).format("%Y-%m-%d").to_string();
        match &targets[0] {
            Target::Email {
                subject, body, cc, ..
            } => {
                assert_eq!(subject, &format!("R {yesterday}"));
                assert_eq!(body.as_deref(), Some("Daily sales"));
                assert_eq!(cc, &vec!["c@x".to_string()]);
            }
            other => panic!("unexpected target {other:?}"),
        }
    }
}
