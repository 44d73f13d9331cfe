use crate::domain::ports::TemplateRenderer;
use crate::domain::template::{TemplateVars, substitute};
use crate::error::{NotifyError, Result};
use std::collections::HashMap;

const DEFAULTS: &[(&str, &str)] = &[
    (
        "reminder.subject",
        "Reminder: installment {{installment_number}} of {{installment_total}} is due {{due_date}}",
    ),
    (
        "reminder.body",
        "Hi {{payer_name}}, your payment of {{amount}} {{currency}} to {{counterparty_name}} \
         is due on {{due_date}} ({{days_until}} days from now). \
         This is installment {{installment_number}} of {{installment_total}}.",
    ),
    (
        "overdue.subject",
        "Overdue: installment {{installment_number}} of {{installment_total}}",
    ),
    (
        "overdue.body",
        "Hi {{payer_name}}, your payment of {{amount}} {{currency}} to {{counterparty_name}} \
         was due on {{due_date}} and is {{days_overdue}} days overdue.",
    ),
    ("payment_made.payer.subject", "Payment recorded"),
    (
        "payment_made.payer.body",
        "Your payment of {{amount}} {{currency}} to {{counterparty_name}} has been recorded, \
         pending verification.",
    ),
    ("payment_made.counterparty.subject", "Payment received"),
    (
        "payment_made.counterparty.body",
        "{{payer_name}} sent you {{amount}} {{currency}}. The payment has been received, \
         pending verification.",
    ),
    ("payment_verified.subject", "Payment verified"),
    (
        "payment_verified.body",
        "Your payment of {{amount}} {{currency}} to {{counterparty_name}} has been verified \
         and accepted.",
    ),
    ("payment_rejected.subject", "Payment rejected"),
    (
        "payment_rejected.body",
        "Your payment of {{amount}} {{currency}} to {{counterparty_name}} was rejected: {{reason}}",
    ),
];

/// Built-in message texts, overridable key by key.
#[derive(Debug, Clone)]
pub struct DefaultTemplates {
    templates: HashMap<String, String>,
}

impl Default for DefaultTemplates {
    fn default() -> Self {
        Self {
            templates: DEFAULTS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

impl DefaultTemplates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_template(mut self, key: &str, template: &str) -> Self {
        self.templates.insert(key.to_string(), template.to_string());
        self
    }
}

impl TemplateRenderer for DefaultTemplates {
    fn render(&self, template_key: &str, vars: &TemplateVars) -> Result<String> {
        let template = self
            .templates
            .get(template_key)
            .ok_or_else(|| NotifyError::Template(format!("unknown template '{template_key}'")))?;
        substitute(template, vars)
    }

    fn contains(&self, template_key: &str) -> bool {
        self.templates.contains_key(template_key)
    }
}
