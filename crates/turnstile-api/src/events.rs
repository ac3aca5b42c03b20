//! Client analytics events
//!
//! Only the events the entitlement and auto prompt logic produce or react to
//! are modelled here.

use serde::{Deserialize, Serialize};

use crate::Timestamp;

/// Analytics event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalyticsEvent {
    Unknown,
    ImpressionPaywall,
    ImpressionOffers,
    ImpressionRegwall,
    ImpressionSwgSubscriptionMiniPrompt,
    ImpressionSwgContributionMiniPrompt,
    ImpressionContributionOffers,
    ActionGetEntitlements,
    ActionSwgSubscriptionMiniPromptClose,
    ActionSwgContributionMiniPromptClose,
    ActionSubscriptionOffersClosed,
    ActionContributionOffersClosed,
    ActionSurveyDataTransfer,
    EventSurveyDataTransferFailed,
    EventUnlockedBySubscription,
    EventUnlockedByMeter,
    EventNoEntitlements,
    EventHasMeteringEntitlements,
    EventUnlockedFreePage,
    EventIneligiblePaywall,
    EventUnlockedForCrawler,
    EventDisableMinipromptDesktop,
}

impl AnalyticsEvent {
    /// Numeric code used on the analytics wire
    pub fn code(&self) -> u32 {
        match self {
            AnalyticsEvent::Unknown => 0,
            AnalyticsEvent::ImpressionPaywall => 1,
            AnalyticsEvent::ImpressionOffers => 3,
            AnalyticsEvent::ImpressionRegwall => 22,
            AnalyticsEvent::ImpressionSwgSubscriptionMiniPrompt => 24,
            AnalyticsEvent::ImpressionSwgContributionMiniPrompt => 25,
            AnalyticsEvent::ImpressionContributionOffers => 26,
            AnalyticsEvent::ActionGetEntitlements => 1024,
            AnalyticsEvent::ActionSwgSubscriptionMiniPromptClose => 1032,
            AnalyticsEvent::ActionSwgContributionMiniPromptClose => 1033,
            AnalyticsEvent::ActionSubscriptionOffersClosed => 1037,
            AnalyticsEvent::ActionContributionOffersClosed => 1038,
            AnalyticsEvent::ActionSurveyDataTransfer => 1070,
            AnalyticsEvent::EventSurveyDataTransferFailed => 2008,
            AnalyticsEvent::EventUnlockedBySubscription => 3007,
            AnalyticsEvent::EventUnlockedByMeter => 3008,
            AnalyticsEvent::EventNoEntitlements => 3009,
            AnalyticsEvent::EventHasMeteringEntitlements => 3010,
            AnalyticsEvent::EventUnlockedFreePage => 3012,
            AnalyticsEvent::EventIneligiblePaywall => 3013,
            AnalyticsEvent::EventUnlockedForCrawler => 3014,
            AnalyticsEvent::EventDisableMinipromptDesktop => 3026,
        }
    }

    /// Monetization prompt impressions counted toward the auto prompt cap
    pub fn is_prompt_impression(&self) -> bool {
        matches!(
            self,
            AnalyticsEvent::ImpressionSwgContributionMiniPrompt
                | AnalyticsEvent::ImpressionSwgSubscriptionMiniPrompt
                | AnalyticsEvent::ImpressionOffers
                | AnalyticsEvent::ImpressionContributionOffers
        )
    }

    /// Monetization prompt closes counted as explicit dismissals
    pub fn is_prompt_dismissal(&self) -> bool {
        matches!(
            self,
            AnalyticsEvent::ActionSwgContributionMiniPromptClose
                | AnalyticsEvent::ActionSwgSubscriptionMiniPromptClose
                | AnalyticsEvent::ActionContributionOffersClosed
                | AnalyticsEvent::ActionSubscriptionOffersClosed
        )
    }
}

/// Who logged an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventOriginator {
    UnknownClient,
    SwgClient,
    AmpClient,
    PropensityClient,
    SwgServer,
    PublisherClient,
    ShowcaseClient,
}

/// Extra parameters attached to an event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventParams {
    pub is_user_registered: Option<bool>,
    pub subscription_timestamp: Option<Timestamp>,
}

/// An event on the client event bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientEvent {
    pub event_type: AnalyticsEvent,
    pub event_originator: EventOriginator,
    pub is_from_user_action: bool,
    #[serde(default)]
    pub additional_parameters: Option<EventParams>,
}

impl ClientEvent {
    /// Event logged by this library
    pub fn swg(event_type: AnalyticsEvent) -> Self {
        Self {
            event_type,
            event_originator: EventOriginator::SwgClient,
            is_from_user_action: false,
            additional_parameters: None,
        }
    }

    /// Event logged by publisher showcase code
    pub fn showcase(event_type: AnalyticsEvent) -> Self {
        Self {
            event_originator: EventOriginator::ShowcaseClient,
            ..Self::swg(event_type)
        }
    }

    pub fn with_params(mut self, params: EventParams) -> Self {
        self.additional_parameters = Some(params);
        self
    }

    pub fn from_user_action(mut self) -> Self {
        self.is_from_user_action = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impression_and_dismissal_sets() {
        assert!(AnalyticsEvent::ImpressionOffers.is_prompt_impression());
        assert!(!AnalyticsEvent::ImpressionPaywall.is_prompt_impression());
        assert!(AnalyticsEvent::ActionSubscriptionOffersClosed.is_prompt_dismissal());
        assert!(!AnalyticsEvent::ActionSurveyDataTransfer.is_prompt_dismissal());
    }

    #[test]
    fn client_event_builders() {
        let event = ClientEvent::showcase(AnalyticsEvent::ImpressionRegwall).with_params(EventParams {
            is_user_registered: Some(true),
            subscription_timestamp: None,
        });
        assert_eq!(event.event_originator, EventOriginator::ShowcaseClient);
        assert!(!event.is_from_user_action);
        assert_eq!(
            event.additional_parameters.and_then(|p| p.is_user_registered),
            Some(true)
        );
    }

    #[test]
    fn event_codes() {
        assert_eq!(AnalyticsEvent::ActionGetEntitlements.code(), 1024);
        assert_eq!(AnalyticsEvent::EventUnlockedByMeter.code(), 3008);
    }
}
