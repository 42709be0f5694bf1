//! Family invitation email composition

use kinlore_common::models::{Invitation, Role};

use super::email_client::EmailMessage;

/// Values interpolated into the invitation email
#[derive(Debug, Clone)]
pub struct InvitationEmail<'a> {
    pub invitation: &'a Invitation,
    pub family_name: &'a str,
    pub inviter_name: &'a str,
    pub app_base_url: &'a str,
    pub from: &'a str,
}

/// Link the invitee follows to accept
pub fn invite_url(app_base_url: &str, token: &str) -> String {
    format!("{}/invite/{}", app_base_url.trim_end_matches('/'), token)
}

fn role_phrase(role: Role) -> &'static str {
    match role {
        Role::Owner => "an owner",
        Role::Editor => "an editor, able to record and add stories",
        Role::Viewer => "a viewer, able to read and listen to stories",
    }
}

impl InvitationEmail<'_> {
    pub fn url(&self) -> String {
        invite_url(self.app_base_url, &self.invitation.token)
    }

    pub fn subject(&self) -> String {
        format!("{} invited you to the {} family on Kinlore", self.inviter_name, self.family_name)
    }

    pub fn to_message(&self) -> EmailMessage {
        let url = self.url();
        let expires = self.invitation.expires_at.format("%B %-d, %Y");
        let role = role_phrase(self.invitation.role);

        let text = format!(
            "{inviter} invited you to join the {family} family on Kinlore as {role}.\n\n\
             Accept the invitation: {url}\n\n\
             This link expires on {expires}. If you weren't expecting this email you can ignore it.\n",
            inviter = self.inviter_name,
            family = self.family_name,
        );

        let html = format!(
            "<p><strong>{inviter}</strong> invited you to join the <strong>{family}</strong> \
             family on Kinlore as {role}.</p>\
             <p><a href=\"{url}\">Accept the invitation</a></p>\
             <p style=\"color:#666;font-size:13px\">This link expires on {expires}. \
             If you weren't expecting this email you can ignore it.</p>",
            inviter = escape_html(self.inviter_name),
            family = escape_html(self.family_name),
            url = escape_html(&url),
        );

        EmailMessage {
            from: self.from.to_string(),
            to: vec![self.invitation.email.clone()],
            subject: self.subject(),
            html,
            text,
            idempotency_key: Some(format!("invitation-{}", self.invitation.id)),
        }
    }
}

/// Escape text for interpolation into HTML
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Loose address check: one `@`, non-empty local part, dotted domain
pub fn is_plausible_email(email: &str) -> bool {
    let email = email.trim();
    if email.len() > 254 || email.chars().any(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}
