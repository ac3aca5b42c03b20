//! Frequency-capped auto prompt decisions
//!
//! At most one prompt is chosen per page view, either a monetization prompt
//! shown as a soft paywall (subject to impression and dismissal caps) or a
//! blocking prompt for locked pages and audience actions.

use async_trait::async_trait;
use futures_util::future::try_join4;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use turnstile_api::{
    AnalyticsEvent, Article, AutoPromptConfig, AutoPromptType, ClientConfig, ClientEvent,
    Intervention, InterventionType,
};
use turnstile_host_api::{PromptRequest, PromptTarget};
use turnstile_store::{StorageKey, StorageTier};

use crate::events::{ClientEventListener, lock};
use crate::{ClientConfigManager, CoreError, CoreResult, Deps, EntitlementsManager};

/// Experiment flags read from the article
pub mod experiment_flags {
    pub const DISABLE_DESKTOP_MINIPROMPT: &str = "disable_desktop_miniprompt";
    pub const SURVEY_TRIGGERING_PRIORITY: &str = "survey_triggering_priority";
    pub const SECOND_PROMPT_DELAY: &str = "second_prompt_delay";
}

/// Page views between the first contribution prompt and the next
pub const DEFAULT_IMPRESSIONS_BETWEEN_PROMPTS: u32 = 2;

/// Caller options for [`AutoPromptManager::show_auto_prompt`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShowAutoPromptParams {
    /// Prompt type; defaults to the first monetization action of the article
    pub auto_prompt_type: Option<AutoPromptType>,
    /// Display immediately, skipping every rule. Meant for demos.
    pub always_show: bool,
    /// Closability override
    pub is_closable: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    /// Frequency-capped monetization prompt
    SoftPaywall,
    /// Prompt required by a locked page or a selected audience action
    Blocking,
    /// Requested with `always_show`
    Forced,
}

/// What the manager decided to display
#[derive(Debug, Clone, PartialEq)]
pub struct PromptDecision {
    pub mode: DisplayMode,
    pub request: PromptRequest,
    pub delay: Duration,
}

/// The intervention on screen, recorded on dismissal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayedIntervention {
    Monetization(AutoPromptType),
    Action(InterventionType),
}

impl DisplayedIntervention {
    /// Intervention type as stored in the dismissed-prompt list
    pub fn as_str(&self) -> &str {
        match self {
            DisplayedIntervention::Monetization(t) if t.is_contribution() => "TYPE_CONTRIBUTION",
            DisplayedIntervention::Monetization(_) => "TYPE_SUBSCRIPTION",
            DisplayedIntervention::Action(kind) => kind.as_str(),
        }
    }
}

/// Prompt type implied by the article's first monetization action
pub fn default_prompt_type(actions: &[Intervention]) -> Option<AutoPromptType> {
    actions.iter().find_map(|action| match action.kind {
        InterventionType::Contribution => Some(AutoPromptType::ContributionLarge),
        InterventionType::Subscription => Some(AutoPromptType::SubscriptionLarge),
        _ => None,
    })
}

/// Frequency-cap rules for a monetization prompt.
///
/// `impressions` and `dismissals` are oldest-first and already pruned. Each
/// window is measured from the last entry. Zero or absent caps and backoffs
/// disable their rule.
pub fn should_show_as_soft_paywall(
    prompt_type: Option<AutoPromptType>,
    locked: bool,
    config: Option<&AutoPromptConfig>,
    impressions: &[i64],
    dismissals: &[i64],
    now_ms: i64,
) -> bool {
    let Some(prompt_type) = prompt_type.filter(|t| *t != AutoPromptType::None) else {
        return false;
    };
    if locked {
        return false;
    }
    if prompt_type.is_subscription() {
        return true;
    }
    let Some(config) = config else {
        return false;
    };
    let impression_config = &config.impression_config;
    if impression_config.max_impressions.is_none() {
        return true;
    }

    let within = |events: &[i64], seconds: Option<f64>| match (events.last(), seconds) {
        (Some(&last), Some(seconds)) if seconds > 0.0 => {
            (now_ms.saturating_sub(last) as f64) < seconds * 1000.0
        }
        _ => false,
    };
    let reached = |events: &[i64], cap: Option<u32>| {
        cap.is_some_and(|cap| cap > 0 && events.len() >= cap as usize)
    };

    let dismissal_config = &config.explicit_dismissal_config;
    if reached(dismissals, dismissal_config.max_dismissals_per_week)
        && within(dismissals, dismissal_config.max_dismissals_resulting_hide_seconds)
    {
        return false;
    }
    if within(dismissals, dismissal_config.back_off_seconds) {
        return false;
    }

    if reached(impressions, impression_config.max_impressions)
        && within(impressions, impression_config.max_impressions_resulting_hide_seconds)
    {
        return false;
    }
    if within(impressions, impression_config.back_off_seconds) {
        return false;
    }

    true
}

/// Inputs for choosing an audience action
#[derive(Debug, Clone, Default)]
pub struct ActionSelection<'a> {
    pub actions: &'a [Intervention],
    pub prompt_type: Option<AutoPromptType>,
    pub dismissed: &'a [String],
    pub soft_paywall: bool,
    pub can_display_monetization: bool,
    /// Analytics present and no survey completed or failed this week
    pub survey_eligible: bool,
    pub survey_priority: bool,
}

impl ActionSelection<'_> {
    fn is_eligible(&self, action: &Intervention) -> bool {
        match action.kind {
            InterventionType::RewardedSurvey => self.survey_eligible,
            ref kind if kind.is_monetization() => self.can_display_monetization,
            _ => true,
        }
    }

    /// The action to show, plus what counts as displayed for dismissal
    /// tracking
    pub fn select(&self) -> (Option<Intervention>, Option<DisplayedIntervention>) {
        let eligible: Vec<&Intervention> =
            self.actions.iter().filter(|a| self.is_eligible(a)).collect();
        let Some(first) = eligible.first() else {
            return (None, None);
        };

        if self.prompt_type.is_some_and(|t| t.is_subscription()) {
            return (Some((*first).clone()), None);
        }

        let mut candidates: Vec<&Intervention> = eligible
            .into_iter()
            .filter(|a| !self.dismissed.iter().any(|d| d == a.kind.as_str()))
            .collect();

        if self.survey_priority
            && let Some(survey) = candidates
                .iter()
                .find(|a| a.kind == InterventionType::RewardedSurvey)
        {
            return (
                Some((*survey).clone()),
                Some(DisplayedIntervention::Action(survey.kind.clone())),
            );
        }

        if let Some(prompt_type) = self.prompt_type.filter(AutoPromptType::is_contribution) {
            let contribution_index = candidates
                .iter()
                .position(|a| a.kind == InterventionType::Contribution);
            if contribution_index.is_none_or(|idx| idx == 0) && self.soft_paywall {
                return (None, Some(DisplayedIntervention::Monetization(prompt_type)));
            }
            candidates.retain(|a| a.kind != InterventionType::Contribution);
        }

        match candidates.first() {
            Some(action) => (
                Some((*action).clone()),
                Some(DisplayedIntervention::Action(action.kind.clone())),
            ),
            None => (None, None),
        }
    }
}

/// Decides whether and which prompt to show, and tracks prompt events
pub struct AutoPromptManager {
    deps: Deps,
    entitlements: Arc<EntitlementsManager>,
    client_config: Arc<ClientConfigManager>,
    /// Set once a soft paywall prompt rendered
    soft_paywall_displayed: Arc<AtomicBool>,
    impression_stored: AtomicBool,
    displayed: Mutex<Option<DisplayedIntervention>>,
    display_task: Mutex<Option<JoinHandle<()>>>,
}

impl AutoPromptManager {
    /// Create a manager and subscribe it to the client event bus
    pub fn new(
        deps: Deps,
        entitlements: Arc<EntitlementsManager>,
        client_config: Arc<ClientConfigManager>,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            deps,
            entitlements,
            client_config,
            soft_paywall_displayed: Arc::new(AtomicBool::new(false)),
            impression_stored: AtomicBool::new(false),
            displayed: Mutex::new(None),
            display_task: Mutex::new(None),
        });

        let listener: Arc<dyn ClientEventListener> = manager.clone();
        manager.deps.events.register(&listener);
        manager
    }

    pub fn displayed_intervention(&self) -> Option<DisplayedIntervention> {
        lock(&self.displayed).clone()
    }

    pub fn was_soft_paywall_displayed(&self) -> bool {
        self.soft_paywall_displayed.load(Ordering::SeqCst)
    }

    /// Decide on a prompt and schedule its display.
    ///
    /// Returns the scheduled decision, or `None` when nothing will be shown.
    /// Any failed input aborts the decision.
    pub async fn show_auto_prompt(
        &self,
        params: ShowAutoPromptParams,
    ) -> CoreResult<Option<PromptDecision>> {
        if params.always_show {
            return self.show_forced(params).await;
        }

        let em = &self.entitlements;
        let (config, entitlements, article, dismissed) = try_join4(
            async {
                em.get_entitlements(None).await?;
                let article = em.get_article().await?;
                self.client_config.fetch_client_config(article.as_ref()).await
            },
            em.get_entitlements(None),
            async {
                em.get_entitlements(None).await?;
                em.get_article().await
            },
            async {
                self.deps
                    .storage
                    .get(StorageKey::DismissedPrompts, StorageTier::Local)
                    .await
                    .map_err(CoreError::from)
            },
        )
        .await?;

        if entitlements.enables_this(None) {
            info!("Reader is entitled, no prompt");
            return Ok(None);
        }

        let article = article.unwrap_or_default();
        let dismissed: Vec<String> = dismissed
            .as_deref()
            .map(|value| value.split(',').map(str::to_string).collect())
            .unwrap_or_default();
        self.decide(params, &config, &article, &dismissed).await
    }

    async fn decide(
        &self,
        params: ShowAutoPromptParams,
        config: &ClientConfig,
        article: &Article,
        dismissed: &[String],
    ) -> CoreResult<Option<PromptDecision>> {
        let page = &self.deps.page;
        let storage = &self.deps.storage;
        let now = self.deps.now_ms();

        let prompt_type = params
            .auto_prompt_type
            .or_else(|| default_prompt_type(article.actions()));
        let is_closable = params
            .is_closable
            .unwrap_or_else(|| !prompt_type.is_some_and(|t| t.is_subscription()));
        let can_display_monetization = config.can_display_monetization_prompt();
        let auto_prompt_config = config.auto_prompt_config.as_ref();

        let impressions = storage.get_event(StorageKey::Impressions, now).await?;
        let dismissals = storage.get_event(StorageKey::Dismissals, now).await?;
        let soft_paywall = can_display_monetization
            && should_show_as_soft_paywall(
                prompt_type,
                page.locked,
                auto_prompt_config,
                &impressions,
                &dismissals,
                now,
            );

        let survey_eligible = self.deps.analytics.is_available().await
            && storage
                .get_event(StorageKey::SurveyCompleted, now)
                .await?
                .is_empty()
            && storage
                .get_event(StorageKey::SurveyDataTransferFailed, now)
                .await?
                .is_empty();

        let selection = ActionSelection {
            actions: article.actions(),
            prompt_type,
            dismissed,
            soft_paywall,
            can_display_monetization,
            survey_eligible,
            survey_priority: article
                .has_experiment_flag(experiment_flags::SURVEY_TRIGGERING_PRIORITY),
        };
        let (action, displayed) = selection.select();
        *lock(&self.displayed) = displayed;

        let monetization_target = prompt_type
            .filter(|t| *t != AutoPromptType::None && can_display_monetization)
            .map(|t| PromptTarget::Monetization {
                prompt_type: t.large_variant(),
            });
        let blocking_target = match &action {
            Some(action) => Some(PromptTarget::AudienceAction {
                intervention: action.clone(),
            }),
            None => monetization_target,
        };
        let blocking = (page.locked || action.is_some()) && blocking_target.is_some();

        debug!(
            ?prompt_type,
            soft_paywall,
            blocking,
            action = ?action.as_ref().map(|a| a.kind.as_str()),
            "Auto prompt inputs evaluated"
        );
        if !soft_paywall && !blocking {
            return Ok(None);
        }

        if prompt_type.is_some_and(|t| t.is_contribution())
            && article.has_experiment_flag(experiment_flags::SECOND_PROMPT_DELAY)
        {
            let between = auto_prompt_config
                .and_then(|c| c.client_display_trigger.num_impressions_between_prompts);
            if self.second_prompt_delay_suppresses(between).await? {
                info!("Contribution prompt held back by second prompt delay");
                *lock(&self.displayed) = None;
                return Ok(None);
            }
        }

        let display_delay = Duration::from_millis(
            auto_prompt_config
                .map(AutoPromptConfig::display_delay_ms)
                .unwrap_or(0),
        );

        // A selected audience action is always a blocking prompt
        let decision = if soft_paywall && action.is_none() {
            let flags = article.experiment_flags();
            PromptDecision {
                mode: DisplayMode::SoftPaywall,
                request: PromptRequest {
                    target: PromptTarget::Monetization {
                        prompt_type: self.prompt_type_to_display(prompt_type, flags).await,
                    },
                    is_closable,
                    soft_paywall: true,
                },
                delay: display_delay,
            }
        } else {
            let Some(target) = blocking_target else {
                return Ok(None);
            };
            let survey_on_open_page = !page.locked
                && action
                    .as_ref()
                    .is_some_and(|a| a.kind == InterventionType::RewardedSurvey);
            PromptDecision {
                mode: DisplayMode::Blocking,
                request: PromptRequest {
                    target,
                    is_closable,
                    soft_paywall: false,
                },
                delay: if survey_on_open_page {
                    display_delay
                } else {
                    Duration::ZERO
                },
            }
        };

        self.schedule(decision.clone());
        Ok(Some(decision))
    }

    async fn show_forced(&self, params: ShowAutoPromptParams) -> CoreResult<Option<PromptDecision>> {
        let Some(prompt_type) = params
            .auto_prompt_type
            .filter(|t| *t != AutoPromptType::None)
        else {
            return Ok(None);
        };

        let flags = self.entitlements.get_experiment_config_flags().await?;
        let decision = PromptDecision {
            mode: DisplayMode::Forced,
            request: PromptRequest {
                target: PromptTarget::Monetization {
                    prompt_type: self.prompt_type_to_display(Some(prompt_type), &flags).await,
                },
                is_closable: params
                    .is_closable
                    .unwrap_or(!prompt_type.is_subscription()),
                soft_paywall: false,
            },
            delay: Duration::ZERO,
        };
        self.schedule(decision.clone());
        Ok(Some(decision))
    }

    /// Promote mini prompts to the large variant on desktop when the
    /// experiment asks for it
    async fn prompt_type_to_display(
        &self,
        prompt_type: Option<AutoPromptType>,
        flags: &[String],
    ) -> AutoPromptType {
        let prompt_type = prompt_type.unwrap_or(AutoPromptType::None);
        let disabled = flags
            .iter()
            .any(|f| f == experiment_flags::DISABLE_DESKTOP_MINIPROMPT);

        if disabled && self.deps.page.is_desktop() && prompt_type.is_mini() {
            self.deps
                .events
                .log_swg_event(AnalyticsEvent::EventDisableMinipromptDesktop, false, None)
                .await;
            return prompt_type.large_variant();
        }
        prompt_type
    }

    async fn second_prompt_delay_suppresses(&self, between: Option<u32>) -> CoreResult<bool> {
        let between = between.unwrap_or(DEFAULT_IMPRESSIONS_BETWEEN_PROMPTS) as usize;
        let now = self.deps.now_ms();
        let storage = &self.deps.storage;

        let count = storage
            .get_event(StorageKey::SecondPromptDelayCounter, now)
            .await?
            .len();
        if count <= between {
            storage
                .store_event(StorageKey::SecondPromptDelayCounter, now)
                .await?;
        }
        Ok(count > 0 && count <= between)
    }

    fn schedule(&self, decision: PromptDecision) {
        let presenter = self.deps.presenter.clone();
        let latch = self.soft_paywall_displayed.clone();
        info!(
            mode = ?decision.mode,
            delay_ms = decision.delay.as_millis() as u64,
            prompt = ?decision.request.target,
            "Auto prompt scheduled"
        );

        let task = tokio::spawn(async move {
            if !decision.delay.is_zero() {
                tokio::time::sleep(decision.delay).await;
            }
            if decision.mode == DisplayMode::SoftPaywall {
                latch.store(true, Ordering::SeqCst);
            }
            if let Err(e) = presenter.show_prompt(&decision.request).await {
                warn!(error = %e, "Failed to show prompt");
            }
        });

        if let Some(previous) = lock(&self.display_task).replace(task) {
            previous.abort();
        }
    }

    /// Wait for the scheduled display, if any
    pub async fn display_settled(&self) {
        let task = lock(&self.display_task).take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(error = %e, "Display task failed");
        }
    }

    /// Append the displayed intervention to the dismissed list.
    ///
    /// Called for dismissal events, and by hosts when an audience action is
    /// cancelled.
    pub async fn store_last_dismissal(&self) -> CoreResult<()> {
        let Some(displayed) = self.displayed_intervention() else {
            return Ok(());
        };

        let storage = &self.deps.storage;
        let previous = storage
            .get(StorageKey::DismissedPrompts, StorageTier::Local)
            .await?;
        let value = match previous.filter(|v| !v.is_empty()) {
            Some(previous) => format!("{},{}", previous, displayed.as_str()),
            None => displayed.as_str().to_string(),
        };
        storage
            .set(StorageKey::DismissedPrompts, &value, StorageTier::Local)
            .await?;
        debug!(dismissed = %value, "Dismissal recorded");
        Ok(())
    }

    async fn handle_client_event(&self, event: &ClientEvent) -> CoreResult<()> {
        let storage = &self.deps.storage;
        let now = self.deps.now_ms();

        match event.event_type {
            AnalyticsEvent::ActionSurveyDataTransfer => {
                return storage
                    .store_event(StorageKey::SurveyCompleted, now)
                    .await
                    .map_err(Into::into);
            }
            AnalyticsEvent::EventSurveyDataTransferFailed => {
                return storage
                    .store_event(StorageKey::SurveyDataTransferFailed, now)
                    .await
                    .map_err(Into::into);
            }
            _ => {}
        }

        // Only prompts shown as a soft paywall count toward the caps
        if !self.was_soft_paywall_displayed() || self.deps.page.locked {
            return Ok(());
        }

        if event.event_type.is_prompt_impression()
            && !self.impression_stored.swap(true, Ordering::SeqCst)
        {
            storage.store_event(StorageKey::Impressions, now).await?;
        } else if event.event_type.is_prompt_dismissal() {
            storage.store_event(StorageKey::Dismissals, now).await?;
            self.store_last_dismissal().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ClientEventListener for AutoPromptManager {
    async fn on_client_event(&self, event: &ClientEvent) {
        if let Err(e) = self.handle_client_event(event).await {
            warn!(error = %e, event = ?event.event_type, "Failed to record prompt event");
        }
    }
}
