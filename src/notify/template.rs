//! New-lead email rendering.

use html_escape::{encode_double_quoted_attribute, encode_text};

use super::group::Notification;
use crate::mailer::OutgoingEmail;

pub fn subject(state: &str, count: usize) -> String {
    let noun = if count == 1 { "lead" } else { "leads" };
    format!("{count} new {noun} in {state}")
}

fn lead_url(site_url: &str, lead_id: &str) -> String {
    format!("{}/leads/{}", site_url.trim_end_matches('/'), lead_id)
}

/// Build the email for one notification. Every listed lead links back to
/// its page on `site_url`.
pub fn render(notification: &Notification, site_url: &str) -> OutgoingEmail {
    let state = encode_text(&notification.state);
    let mut items = String::new();
    for lead in &notification.leads {
        let place = lead.city.as_deref().unwrap_or(&lead.location);
        let lead_state = lead.state.as_deref().unwrap_or(&notification.state);
        items.push_str(&format!(
            "<li><a href=\"{}\">{}</a> &middot; {}, {} &middot; {}</li>\n",
            encode_double_quoted_attribute(&lead_url(site_url, &lead.id)),
            encode_text(&lead.title),
            encode_text(place),
            encode_text(lead_state.trim()),
            encode_text(&lead.facility_type),
        ));
    }

    let html = format!(
        "<h2>New leads in {state}</h2>\n\
         <p>Hi {company},</p>\n\
         <p>{count} new lead(s) in your service area were just added.</p>\n\
         <ul>\n{items}</ul>\n\
         <p><a href=\"{all}\">View all leads</a></p>\n",
        company = encode_text(&notification.recipient.company_name),
        count = notification.leads.len(),
        all = encode_double_quoted_attribute(&format!(
            "{}/leads",
            site_url.trim_end_matches('/')
        )),
    );

    OutgoingEmail {
        to: notification.recipient.email.clone(),
        subject: subject(&notification.state, notification.leads.len()),
        html,
    }
}
