//! Merchant configuration ("feed") attached to a form.

use crate::gateway::MerchantCredential;
use serde::{Deserialize, Serialize};

/// A named confirmation configured on the form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub name: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedConfig {
    pub feed_id: String,
    pub form_id: String,
    pub company_token: String,
    pub service_type: String,
    #[serde(default = "default_service_description")]
    pub service_description: String,
    #[serde(default)]
    pub test_mode: bool,
    #[serde(default)]
    pub success_page_url: Option<String>,
    #[serde(default)]
    pub confirmations: Vec<Confirmation>,
}

fn default_service_description() -> String {
    "Form payment".to_string()
}

impl FeedConfig {
    /// Credential for gateway calls against the sandbox or live endpoint.
    pub fn credential(&self, test_mode: bool) -> MerchantCredential {
        MerchantCredential::new(self.company_token.clone(), test_mode)
    }

    /// Confirmation whose name, lower-cased with spaces removed, equals
    /// `keyword`. Later entries win, matching the hosting system's loop.
    pub fn confirmation_for(&self, keyword: &str) -> Option<&Confirmation> {
        self.confirmations.iter().rev().find(|c| {
            c.name
                .chars()
                .filter(|ch| *ch != ' ')
                .collect::<String>()
                .to_lowercase()
                == keyword
        })
    }
}
