//! Router - the per-turn supervisor.
//!
//! One call to [`Router::process_turn`] is one turn: append the patient
//! message, extract slots, classify, consult the loop guard, dispatch to a
//! capability handler, append the reply. The router owns no session state;
//! the state goes in by value and comes back out.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::conversation_state::{ConversationState, RoutingDecision};
use super::loop_guard::LoopGuard;
use crate::backend::SchedulingBackend;
use crate::collaborators::{CollaboratorError, IntentClassifier, SlotExtractor};
use crate::config::RouterConfig;
use crate::handlers::{HandlerContext, dispatch};
use crate::models::{Intent, TurnInput};

/// Reply to any message sent to a finished session.
pub const SESSION_ENDED_REPLY: &str = "This conversation has ended. \
Please start a new session if you need anything else.";

/// Reply when the intent classifier fails or times out.
pub const CLASSIFIER_FAILURE_REPLY: &str = "I'm sorry, I couldn't process that just now. \
Could you please say it again?";

/// Reply when a handler's backend call fails.
pub const HANDLER_FAILURE_REPLY: &str = "I'm sorry, something went wrong while handling your \
request. Nothing was changed; please try again in a moment.";

pub struct Router<E, C, B> {
    extractor: E,
    classifier: C,
    backend: B,
    loop_guard: LoopGuard,
    collaborator_timeout: Duration,
    single_shot_booking: bool,
}

impl<E, C, B> Router<E, C, B>
where
    E: SlotExtractor,
    C: IntentClassifier,
    B: SchedulingBackend,
{
    /// Router with default loop guard and timeouts.
    pub fn new(extractor: E, classifier: C, backend: B) -> Self {
        Self {
            extractor,
            classifier,
            backend,
            loop_guard: LoopGuard::default(),
            collaborator_timeout: Duration::from_secs(10),
            single_shot_booking: false,
        }
    }

    pub fn from_config(extractor: E, classifier: C, backend: B, config: &RouterConfig) -> Self {
        Self::new(extractor, classifier, backend)
            .with_loop_guard(LoopGuard::from_config(&config.loop_guard))
            .with_timeout(Duration::from_secs(config.router.collaborator_timeout_secs))
            .with_single_shot_booking(config.router.single_shot_booking)
    }

    pub fn with_loop_guard(mut self, loop_guard: LoopGuard) -> Self {
        self.loop_guard = loop_guard;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.collaborator_timeout = timeout;
        self
    }

    pub fn with_single_shot_booking(mut self, enabled: bool) -> Self {
        self.single_shot_booking = enabled;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Process one turn.
    ///
    /// Never fails: collaborator and backend failures become apologetic
    /// replies with the session left active. A finished session is returned
    /// untouched.
    pub async fn process_turn(
        &self,
        mut state: ConversationState,
        input: TurnInput,
    ) -> (ConversationState, String) {
        if state.is_finished() {
            debug!("Session {} is finished, rejecting turn", state.session_key);
            return (state, SESSION_ENDED_REPLY.to_string());
        }

        state.begin_turn(&input.message);
        info!(
            patient = %state.patient_id,
            session = %state.session_key,
            step = state.step_count,
            "Processing turn"
        );

        // Slot extraction
        let update = match input.explicit_slots {
            Some(slots) => Some(slots),
            None => match self
                .call(self.extractor.extract(&state.messages, &state.slots))
                .await
            {
                Ok(slots) => Some(slots),
                Err(e) => {
                    warn!("Slot extraction failed, keeping previous slots: {}", e);
                    None
                }
            },
        };
        if let Some(update) = update {
            let changed = state.slots.merge(&update.normalized());
            if !changed.is_empty() {
                debug!("Slots changed: {:?}", changed);
            }
        }

        // Classification
        let (tag, rationale) = match input.explicit_intent {
            Some(tag) => (tag, "intent supplied by caller".to_string()),
            None => match self
                .call(self.classifier.classify(&state.messages, &state.slots))
                .await
            {
                Ok(classification) => (classification.intent, classification.rationale),
                Err(e) => {
                    warn!("Intent classification failed: {}", e);
                    state.last_reasoning = Some(format!("classification failed: {}", e));
                    return Self::complete(state, CLASSIFIER_FAILURE_REPLY.to_string());
                }
            },
        };

        let intent = Intent::from_tag(&tag).unwrap_or_else(|| {
            debug!("Unknown intent tag '{}', routing to general info", tag);
            Intent::GeneralInfo
        });
        let target = intent.capability();
        state.intent = Some(intent);
        state.last_reasoning = Some(rationale);

        // Loop guard
        if let Err(stop) = self.loop_guard.check(&state, target, &state.slots) {
            info!(
                patient = %state.patient_id,
                session = %state.session_key,
                "Session terminated: {}",
                stop
            );
            state.finish(stop.finish_reason());
            state.last_reasoning = Some(stop.to_string());
            return Self::complete(state, stop.reply());
        }

        let decision = RoutingDecision {
            intent,
            target,
            step: state.step_count,
            slots: state.slots.clone(),
        };
        state.record_decision(decision, self.loop_guard.history_capacity);
        debug!("Routing {} to {}", intent, target);

        let ctx = HandlerContext {
            backend: &self.backend,
            single_shot_booking: self.single_shot_booking,
        };
        match dispatch(target, &state, &ctx).await {
            Ok(outcome) => Self::complete(outcome.state, outcome.reply),
            Err(e) => {
                warn!("{} handler failed: {}", target, e);
                Self::complete(state, HANDLER_FAILURE_REPLY.to_string())
            }
        }
    }

    fn complete(mut state: ConversationState, reply: String) -> (ConversationState, String) {
        state.push_reply(&reply);
        state.touch();
        (state, reply)
    }

    /// Bound a collaborator call by the configured timeout.
    async fn call<T>(
        &self,
        future: impl Future<Output = Result<T, CollaboratorError>>,
    ) -> Result<T, CollaboratorError> {
        match tokio::time::timeout(self.collaborator_timeout, future).await {
            Ok(result) => result,
            Err(_) => Err(CollaboratorError::Timeout(
                self.collaborator_timeout.as_secs(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemorySchedule;
    use crate::collaborators::{Classification, KeywordIntentClassifier, KeywordSlotExtractor};
    use crate::models::{Capability, Message, PatientId, SlotField, Slots};
    use crate::orchestrator::{FinishReason, SessionStatus};
    use async_trait::async_trait;
    use chrono::NaiveDate;

    struct NoSlots;

    #[async_trait]
    impl SlotExtractor for NoSlots {
        async fn extract(&self, _: &[Message], _: &Slots) -> Result<Slots, CollaboratorError> {
            Ok(Slots::default())
        }
    }

    struct DownSlots;

    #[async_trait]
    impl SlotExtractor for DownSlots {
        async fn extract(&self, _: &[Message], _: &Slots) -> Result<Slots, CollaboratorError> {
            Err(CollaboratorError::Unavailable("extractor offline".to_string()))
        }
    }

    struct SlowSlots;

    #[async_trait]
    impl SlotExtractor for SlowSlots {
        async fn extract(&self, _: &[Message], _: &Slots) -> Result<Slots, CollaboratorError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Slots::default().with(SlotField::Doctor, "john doe"))
        }
    }

    struct FixedIntent(&'static str);

    #[async_trait]
    impl IntentClassifier for FixedIntent {
        async fn classify(
            &self,
            _: &[Message],
            _: &Slots,
        ) -> Result<Classification, CollaboratorError> {
            Ok(Classification::new(self.0, "fixed"))
        }
    }

    fn schedule() -> InMemorySchedule {
        InMemorySchedule::demo(NaiveDate::from_ymd_opt(2025, 10, 13).unwrap(), 3)
    }

    fn fresh() -> ConversationState {
        ConversationState::new(PatientId(1234567), "default")
    }

    #[tokio::test]
    async fn test_unknown_intent_routes_to_general_info() {
        let router = Router::new(NoSlots, FixedIntent("order_pizza"), schedule());
        let (state, reply) = router.process_turn(fresh(), TurnInput::message("hi")).await;

        assert_eq!(state.intent, Some(Intent::GeneralInfo));
        assert_eq!(state.routing_history.back().map(|d| d.target), Some(Capability::GeneralInfo));
        assert!(reply.starts_with("Hello!"));
    }

    #[tokio::test]
    async fn test_explicit_intent_and_slots_bypass_collaborators() {
        let router = Router::new(NoSlots, FixedIntent("general_info"), schedule());
        let input = TurnInput::message("")
            .with_intent("check_availability")
            .with_slots(
                Slots::default()
                    .with(SlotField::Doctor, "Dr. Lisa Brown")
                    .with(SlotField::Date, "2025-10-14"),
            );
        let (state, reply) = router.process_turn(fresh(), input).await;

        assert_eq!(state.intent, Some(Intent::CheckAvailability));
        assert_eq!(state.slots.doctor.as_deref(), Some("lisa brown"));
        assert_eq!(state.slots.date.as_deref(), Some("14-10-2025"));
        assert!(reply.contains("Dr. Lisa Brown has free time on 14-10-2025"));
    }

    #[tokio::test]
    async fn test_messages_alternate_and_steps_count() {
        let backend = schedule();
        let extractor = KeywordSlotExtractor::new(&backend.directory().await.unwrap());
        let router = Router::new(extractor, KeywordIntentClassifier::new(), backend);

        let (state, _) = router.process_turn(fresh(), TurnInput::message("hello")).await;
        let (state, reply) = router
            .process_turn(state, TurnInput::message("I'd like to book an appointment"))
            .await;

        assert!(reply.contains("the doctor"));

        assert_eq!(state.step_count, 2);
        assert_eq!(state.messages.len(), 4);
        assert_eq!(state.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn test_repeat_terminates_on_second_identical_turn() {
        let router = Router::new(NoSlots, FixedIntent("check_availability"), schedule());
        let (state, _) = router.process_turn(fresh(), TurnInput::message("free?")).await;
        assert_eq!(state.status, SessionStatus::Active);

        let (state, reply) = router.process_turn(state, TurnInput::message("free?")).await;
        assert_eq!(state.status, SessionStatus::Finished);
        assert_eq!(state.finish_reason, Some(FinishReason::RoutingExhausted));
        assert!(reply.contains("going in circles"));
        // the terminating turn is not recorded as a decision
        assert_eq!(state.routing_history.len(), 1);
    }

    #[tokio::test]
    async fn test_finished_session_is_untouched() {
        let router = Router::new(NoSlots, FixedIntent("book"), schedule());
        let mut state = fresh();
        state.finish(FinishReason::Completed);

        let (after, reply) = router
            .process_turn(state.clone(), TurnInput::message("book again"))
            .await;
        assert_eq!(after, state);
        assert_eq!(reply, SESSION_ENDED_REPLY);
    }

    fn prefilled() -> ConversationState {
        let mut state = fresh();
        state.slots = Slots::default()
            .with(SlotField::Doctor, "lisa brown")
            .with(SlotField::Date, "14-10-2025");
        state
    }

    #[tokio::test]
    async fn test_extractor_failure_keeps_slots_and_dispatches() {
        let router = Router::new(DownSlots, FixedIntent("check_availability"), schedule());
        let before = prefilled();

        let (state, reply) = router
            .process_turn(before.clone(), TurnInput::message("is she free?"))
            .await;

        assert_eq!(state.slots, before.slots);
        assert_eq!(state.step_count, before.step_count + 1);
        assert_eq!(state.routing_history.len(), 1);
        assert_eq!(state.status, SessionStatus::Active);
        assert_ne!(reply, CLASSIFIER_FAILURE_REPLY);
        assert!(reply.contains("Dr. Lisa Brown has free time on 14-10-2025"));
    }

    #[tokio::test]
    async fn test_extractor_timeout_keeps_slots_and_dispatches() {
        let router = Router::new(SlowSlots, FixedIntent("check_availability"), schedule())
            .with_timeout(Duration::from_millis(50));
        let before = prefilled();

        let (state, reply) = router
            .process_turn(before.clone(), TurnInput::message("is she free?"))
            .await;

        assert_eq!(state.slots, before.slots);
        assert_eq!(state.step_count, 1);
        assert_eq!(state.routing_history.back().map(|d| d.target), Some(Capability::Availability));
        assert!(reply.contains("Dr. Lisa Brown"));
    }
}
