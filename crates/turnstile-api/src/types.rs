//! Article envelope and intervention types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ClientConfigJson;

/// Kind of prompt the publisher asked the auto prompt to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoPromptType {
    None,
    Contribution,
    ContributionLarge,
    Subscription,
    SubscriptionLarge,
}

impl AutoPromptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutoPromptType::None => "none",
            AutoPromptType::Contribution => "contribution",
            AutoPromptType::ContributionLarge => "contribution_large",
            AutoPromptType::Subscription => "subscription",
            AutoPromptType::SubscriptionLarge => "subscription_large",
        }
    }

    pub fn is_subscription(&self) -> bool {
        matches!(
            self,
            AutoPromptType::Subscription | AutoPromptType::SubscriptionLarge
        )
    }

    pub fn is_contribution(&self) -> bool {
        matches!(
            self,
            AutoPromptType::Contribution | AutoPromptType::ContributionLarge
        )
    }

    /// Small banner variants that expand into the large prompt on click
    pub fn is_mini(&self) -> bool {
        matches!(self, AutoPromptType::Subscription | AutoPromptType::Contribution)
    }

    pub fn large_variant(&self) -> Self {
        match self {
            AutoPromptType::Subscription => AutoPromptType::SubscriptionLarge,
            AutoPromptType::Contribution => AutoPromptType::ContributionLarge,
            other => *other,
        }
    }
}

impl fmt::Display for AutoPromptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audience action type as sent by the server (`TYPE_*`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InterventionType {
    RegistrationWall,
    NewsletterSignup,
    RewardedSurvey,
    RewardedAd,
    Contribution,
    Subscription,
    ByoCta,
    /// Types this client does not know about are carried verbatim
    Other(String),
}

impl InterventionType {
    pub fn as_str(&self) -> &str {
        match self {
            InterventionType::RegistrationWall => "TYPE_REGISTRATION_WALL",
            InterventionType::NewsletterSignup => "TYPE_NEWSLETTER_SIGNUP",
            InterventionType::RewardedSurvey => "TYPE_REWARDED_SURVEY",
            InterventionType::RewardedAd => "TYPE_REWARDED_AD",
            InterventionType::Contribution => "TYPE_CONTRIBUTION",
            InterventionType::Subscription => "TYPE_SUBSCRIPTION",
            InterventionType::ByoCta => "TYPE_BYO_CTA",
            InterventionType::Other(raw) => raw,
        }
    }

    /// Contribution and subscription actions are monetization prompts
    pub fn is_monetization(&self) -> bool {
        matches!(
            self,
            InterventionType::Contribution | InterventionType::Subscription
        )
    }

    /// Types exposed through the available-interventions API
    pub fn is_publicly_available(&self) -> bool {
        matches!(
            self,
            InterventionType::NewsletterSignup
                | InterventionType::RewardedSurvey
                | InterventionType::RewardedAd
                | InterventionType::ByoCta
        )
    }
}

impl From<String> for InterventionType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "TYPE_REGISTRATION_WALL" => InterventionType::RegistrationWall,
            "TYPE_NEWSLETTER_SIGNUP" => InterventionType::NewsletterSignup,
            "TYPE_REWARDED_SURVEY" => InterventionType::RewardedSurvey,
            "TYPE_REWARDED_AD" => InterventionType::RewardedAd,
            "TYPE_CONTRIBUTION" => InterventionType::Contribution,
            "TYPE_SUBSCRIPTION" => InterventionType::Subscription,
            "TYPE_BYO_CTA" => InterventionType::ByoCta,
            _ => InterventionType::Other(s),
        }
    }
}

impl From<&str> for InterventionType {
    fn from(s: &str) -> Self {
        InterventionType::from(s.to_string())
    }
}

impl From<InterventionType> for String {
    fn from(t: InterventionType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for InterventionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audience action the server deems eligible for this page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intervention {
    #[serde(rename = "type")]
    pub kind: InterventionType,
    #[serde(default)]
    pub configuration_id: Option<String>,
    #[serde(default)]
    pub preference: Option<String>,
    #[serde(default)]
    pub number_of_completions: Option<u32>,
}

impl Intervention {
    pub fn new(kind: impl Into<InterventionType>) -> Self {
        Self {
            kind: kind.into(),
            configuration_id: None,
            preference: None,
            number_of_completions: None,
        }
    }

    pub fn with_configuration_id(mut self, id: impl Into<String>) -> Self {
        self.configuration_id = Some(id.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudienceActions {
    pub actions: Vec<Intervention>,
    pub engine_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExperimentConfig {
    pub experiment_flags: Vec<String>,
}

/// The `entitlements` member of an article response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntitlementsResponse {
    /// Signed JWT whose `entitlements` claim holds the grants
    pub signed_entitlements: Option<String>,
    /// Plain grants, a single object or an array
    pub entitlements: Option<serde_json::Value>,
    pub is_ready_to_pay: Option<bool>,
    pub swg_user_token: Option<String>,
    pub decrypted_document_key: Option<String>,
}

/// Per-page envelope returned by the article endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Article {
    pub entitlements: Option<EntitlementsResponse>,
    pub client_config: Option<ClientConfigJson>,
    pub audience_actions: Option<AudienceActions>,
    pub experiment_config: Option<ExperimentConfig>,
    pub error_messages: Vec<String>,
    pub preview_enabled: bool,
}

impl Article {
    pub fn actions(&self) -> &[Intervention] {
        self.audience_actions
            .as_ref()
            .map(|a| a.actions.as_slice())
            .unwrap_or(&[])
    }

    pub fn experiment_flags(&self) -> &[String] {
        self.experiment_config
            .as_ref()
            .map(|c| c.experiment_flags.as_slice())
            .unwrap_or(&[])
    }

    pub fn has_experiment_flag(&self, flag: &str) -> bool {
        self.experiment_flags().iter().any(|f| f == flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_prompt_type_serde_names() {
        let json = serde_json::to_string(&AutoPromptType::ContributionLarge).unwrap();
        assert_eq!(json, "\"contribution_large\"");
        let parsed: AutoPromptType = serde_json::from_str("\"subscription\"").unwrap();
        assert_eq!(parsed, AutoPromptType::Subscription);
        assert_eq!(AutoPromptType::Contribution.large_variant(), AutoPromptType::ContributionLarge);
        assert!(AutoPromptType::Subscription.is_mini());
        assert!(!AutoPromptType::SubscriptionLarge.is_mini());
    }

    #[test]
    fn intervention_type_keeps_unknown_values() {
        let parsed: InterventionType = serde_json::from_str("\"TYPE_REWARDED_SURVEY\"").unwrap();
        assert_eq!(parsed, InterventionType::RewardedSurvey);

        let parsed: InterventionType = serde_json::from_str("\"TYPE_SOMETHING_NEW\"").unwrap();
        assert_eq!(parsed, InterventionType::Other("TYPE_SOMETHING_NEW".into()));
        assert_eq!(serde_json::to_string(&parsed).unwrap(), "\"TYPE_SOMETHING_NEW\"");
    }

    #[test]
    fn article_parses_full_payload() {
        let json = serde_json::json!({
            "entitlements": {
                "signedEntitlements": "a.b.c",
                "isReadyToPay": true,
                "swgUserToken": "sut"
            },
            "audienceActions": {
                "actions": [
                    {"type": "TYPE_REGISTRATION_WALL", "configurationId": "regwall"},
                    {"type": "TYPE_CONTRIBUTION", "configurationId": "contrib", "numberOfCompletions": 2}
                ],
                "engineId": "engine"
            },
            "experimentConfig": {"experimentFlags": ["flag_a"]},
            "errorMessages": ["soft error"]
        });

        let article: Article = serde_json::from_value(json).unwrap();
        let ents = article.entitlements.as_ref().unwrap();
        assert_eq!(ents.signed_entitlements.as_deref(), Some("a.b.c"));
        assert_eq!(ents.is_ready_to_pay, Some(true));
        assert_eq!(article.actions().len(), 2);
        assert_eq!(article.actions()[0].kind, InterventionType::RegistrationWall);
        assert_eq!(article.actions()[1].number_of_completions, Some(2));
        assert!(article.has_experiment_flag("flag_a"));
        assert_eq!(article.error_messages, vec!["soft error".to_string()]);
    }

    #[test]
    fn empty_article_defaults() {
        let article: Article = serde_json::from_str("{}").unwrap();
        assert!(article.entitlements.is_none());
        assert!(article.actions().is_empty());
        assert!(article.experiment_flags().is_empty());
    }
}
