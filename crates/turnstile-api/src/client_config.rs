//! Client configuration returned by the server

use serde::{Deserialize, Serialize};

/// Client side conditions to trigger the display of the auto prompt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientDisplayTrigger {
    pub display_delay_seconds: Option<f64>,
    pub num_impressions_between_prompts: Option<u32>,
}

/// Explicit dismissal behavior and its effects
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExplicitDismissalConfig {
    pub back_off_seconds: Option<f64>,
    pub max_dismissals_per_week: Option<u32>,
    pub max_dismissals_resulting_hide_seconds: Option<f64>,
}

/// Impression behavior and its effects
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImpressionConfig {
    pub back_off_seconds: Option<f64>,
    pub max_impressions: Option<u32>,
    pub max_impressions_resulting_hide_seconds: Option<f64>,
}

/// Frequency caps for the auto prompt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AutoPromptConfig {
    pub client_display_trigger: ClientDisplayTrigger,
    pub explicit_dismissal_config: ExplicitDismissalConfig,
    pub impression_config: ImpressionConfig,
}

impl AutoPromptConfig {
    /// Display delay in milliseconds, zero when unset
    pub fn display_delay_ms(&self) -> u64 {
        self.client_display_trigger
            .display_delay_seconds
            .filter(|s| s.is_finite() && *s > 0.0)
            .map(|s| (s * 1000.0) as u64)
            .unwrap_or(0)
    }
}

/// Predicates controlling UI elements
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UiPredicates {
    pub can_display_auto_prompt: Option<bool>,
    pub can_display_button: Option<bool>,
    pub purchase_unavailable_region: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttributionParams {
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

/// Client configuration as sent by the server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfigJson {
    pub auto_prompt_config: Option<AutoPromptConfig>,
    pub pay_swg_version: Option<String>,
    pub ui_predicates: Option<UiPredicates>,
    pub use_updated_offer_flows: Option<bool>,
    pub attribution_params: Option<AttributionParams>,
}

/// Parsed client configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientConfig {
    pub auto_prompt_config: Option<AutoPromptConfig>,
    pub pay_swg_version: Option<String>,
    pub ui_predicates: Option<UiPredicates>,
    pub use_updated_offer_flows: bool,
    pub skip_account_creation_screen: bool,
    pub attribution_params: Option<AttributionParams>,
}

impl ClientConfig {
    pub fn from_json(json: ClientConfigJson, skip_account_creation_screen: bool) -> Self {
        Self {
            auto_prompt_config: json.auto_prompt_config,
            pay_swg_version: json.pay_swg_version,
            ui_predicates: json.ui_predicates,
            use_updated_offer_flows: json.use_updated_offer_flows.unwrap_or(false),
            skip_account_creation_screen,
            attribution_params: json.attribution_params,
        }
    }

    /// Server kill switch: only an explicit `false` disables monetization prompts
    pub fn can_display_monetization_prompt(&self) -> bool {
        self.ui_predicates
            .as_ref()
            .and_then(|p| p.can_display_auto_prompt)
            != Some(false)
    }
}
