//! Conversation state machine
//!
//! [`decide`] maps the current state and the user's text to a [`Decision`]
//! without side effects. [`ConversationMachine`] carries the decision out:
//! it runs workflows, moves the browser session in and out of the registry
//! and sends replies.

pub mod replies;

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::capture::Artifact;
use crate::error::{PortalError, PortalResult};
use crate::gateway::{Attachment, MessagingGateway, Outbound, StagedFile};
use crate::session::{ConversationSession, ConversationState, SessionRegistry, SessionSlot};
use crate::utils::duration_ms;
use crate::workflow::{WorkflowEngine, WorkflowKind, WorkflowSet};

pub const RESET_KEYWORD: &str = "reset";

/// What to do with one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    SendMenu,
    PromptPropertyCode,
    PromptTaxpayerId,
    InvalidCategory,
    PropertyLogin(String),
    TaxpayerLogin(String),
    InvalidTaxId(String),
    DebtsLookup,
    CertificateCapture,
    InvalidTaxpayerAction,
    Reset,
    Help,
}

/// Whether `text` asks for a reset
pub fn is_reset(text: &str) -> bool {
    text.trim().eq_ignore_ascii_case(RESET_KEYWORD)
}

/// A CPF is exactly eleven ASCII digits
pub fn is_tax_id(text: &str) -> bool {
    text.len() == 11 && text.bytes().all(|b| b.is_ascii_digit())
}

pub fn decide(state: ConversationState, text: &str) -> Decision {
    let raw = text.trim();
    let normalized = raw.to_lowercase();

    if state != ConversationState::Idle && normalized == RESET_KEYWORD {
        return Decision::Reset;
    }

    match state {
        ConversationState::Idle => Decision::SendMenu,
        ConversationState::AwaitingCategoryChoice => {
            if normalized == "1" || normalized.contains("iptu") || normalized.contains("cadastro") {
                Decision::PromptPropertyCode
            } else if normalized == "2"
                || normalized.contains("cpf")
                || normalized.contains("contribuinte")
            {
                Decision::PromptTaxpayerId
            } else {
                Decision::InvalidCategory
            }
        }
        ConversationState::AwaitingPropertyCode => Decision::PropertyLogin(raw.to_string()),
        ConversationState::AwaitingTaxpayerId => {
            if is_tax_id(raw) {
                Decision::TaxpayerLogin(raw.to_string())
            } else {
                Decision::InvalidTaxId(raw.to_string())
            }
        }
        ConversationState::AwaitingTaxpayerAction => match normalized.as_str() {
            "1" => Decision::DebtsLookup,
            "2" => Decision::CertificateCapture,
            _ => Decision::InvalidTaxpayerAction,
        },
        ConversationState::LoggedInProperty => Decision::Help,
    }
}

/// Executes decisions for every conversation
pub struct ConversationMachine {
    registry: Arc<SessionRegistry>,
    engine: Arc<WorkflowEngine>,
    gateway: Arc<dyn MessagingGateway>,
    workflows: Arc<WorkflowSet>,
}

impl ConversationMachine {
    pub fn new(
        registry: Arc<SessionRegistry>,
        engine: Arc<WorkflowEngine>,
        gateway: Arc<dyn MessagingGateway>,
        workflows: Arc<WorkflowSet>,
    ) -> Self {
        Self {
            registry,
            engine,
            gateway,
            workflows,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Process one inbound message to completion
    pub async fn handle(&self, conversation_id: &str, text: &str) {
        let slot = self.registry.create_if_absent(conversation_id);
        let idle = {
            let mut session = slot.lock().await;
            session.touch();
            // A reset that cancelled a running workflow stays a reset even
            // though the cancelled workflow already left the chat idle
            let decision = if is_reset(text) && slot.take_reset() {
                Decision::Reset
            } else {
                decide(session.state(), text)
            };
            info!(
                conversation = %conversation_id,
                state = %session.state(),
                ?decision,
                "Handling message"
            );
            self.apply(&slot, &mut session, decision).await;
            debug_assert!(session.is_consistent());
            session.state() == ConversationState::Idle
        };
        drop(slot);

        if idle {
            self.registry.remove_if_idle(conversation_id);
        }
    }

    async fn apply(&self, slot: &SessionSlot, session: &mut ConversationSession, decision: Decision) {
        let id = session.conversation_id().to_string();
        match decision {
            Decision::SendMenu => {
                self.reply(&id, replies::CATEGORY_MENU).await;
                session.set_state(ConversationState::AwaitingCategoryChoice);
            }
            Decision::PromptPropertyCode => {
                self.reply(&id, replies::PROPERTY_CODE_PROMPT).await;
                session.set_state(ConversationState::AwaitingPropertyCode);
            }
            Decision::PromptTaxpayerId => {
                self.reply(&id, replies::TAX_ID_PROMPT).await;
                session.set_state(ConversationState::AwaitingTaxpayerId);
            }
            Decision::InvalidCategory => self.reply(&id, replies::INVALID_CATEGORY).await,
            Decision::InvalidTaxId(value) => {
                session.set_last_input_echo(value);
                let reply = replies::invalid_tax_id(session.last_input_echo());
                self.reply(&id, &reply).await;
            }
            Decision::InvalidTaxpayerAction => {
                self.reply(&id, replies::INVALID_TAXPAYER_ACTION).await
            }
            Decision::Help => self.reply(&id, replies::HELP).await,
            Decision::Reset => {
                session.release().await;
                self.reply(&id, replies::RESET_DONE).await;
            }
            Decision::PropertyLogin(code) => {
                self.reply(&id, &replies::property_code_ack(&code)).await;
                session.set_last_input_echo(code.as_str());
                match self.login(slot, session, WorkflowKind::PropertyLogin, &code).await {
                    Ok(()) => {
                        session.set_state(ConversationState::LoggedInProperty);
                        self.reply(&id, replies::PROPERTY_LOGIN_OK).await;
                    }
                    Err(e) => {
                        warn!(
                            conversation = %id,
                            input = session.last_input_echo().unwrap_or_default(),
                            "Login failed: {}",
                            e
                        );
                        session.release().await;
                        self.reply(&id, failure_reply(&e, replies::PROPERTY_LOGIN_FAILED))
                            .await;
                    }
                }
            }
            Decision::TaxpayerLogin(tax_id) => {
                self.reply(&id, &replies::tax_id_ack(&tax_id)).await;
                session.set_last_input_echo(tax_id.as_str());
                match self.login(slot, session, WorkflowKind::TaxpayerLogin, &tax_id).await {
                    Ok(()) => {
                        session.set_state(ConversationState::AwaitingTaxpayerAction);
                        self.reply(&id, replies::TAXPAYER_MENU).await;
                    }
                    Err(e) => {
                        warn!(
                            conversation = %id,
                            input = session.last_input_echo().unwrap_or_default(),
                            "Login failed: {}",
                            e
                        );
                        session.release().await;
                        self.reply(&id, failure_reply(&e, replies::TAXPAYER_LOGIN_FAILED))
                            .await;
                    }
                }
            }
            Decision::DebtsLookup => {
                let result = self.run_post_login(slot, session, WorkflowKind::DebtsLookup).await;
                session.release().await;
                match result {
                    Ok(outcome) => {
                        let reply = replies::debts_opened(outcome.landing_url.as_deref());
                        self.reply(&id, &reply).await;
                    }
                    Err(e) => self.reply(&id, failure_reply(&e, replies::ACTION_FAILED)).await,
                }
            }
            Decision::CertificateCapture => {
                let window_ms = duration_ms(self.engine.capture_window());
                let result = self
                    .run_post_login(slot, session, WorkflowKind::Certificate)
                    .await
                    .and_then(|outcome| {
                        outcome
                            .artifact
                            .ok_or(PortalError::ArtifactTimeout { window_ms })
                    });
                session.release().await;

                let reply = match result {
                    Ok(artifact) => match self.deliver(&id, artifact).await {
                        Ok(()) => replies::CERTIFICATE_SENT,
                        Err(e) => {
                            error!(conversation = %id, "Certificate delivery failed: {}", e);
                            replies::DELIVERY_FAILED
                        }
                    },
                    Err(e) => failure_reply(&e, replies::ACTION_FAILED),
                };
                self.reply(&id, reply).await;
            }
        }
    }

    async fn login(
        &self,
        slot: &SessionSlot,
        session: &mut ConversationSession,
        kind: WorkflowKind,
        input: &str,
    ) -> PortalResult<()> {
        let cancel = slot.begin_workflow();
        let result = self
            .engine
            .login(kind, self.workflows.get(kind), input, &cancel)
            .await;
        slot.end_workflow();
        session.attach_handle(result?).await
    }

    async fn run_post_login(
        &self,
        slot: &SessionSlot,
        session: &mut ConversationSession,
        kind: WorkflowKind,
    ) -> PortalResult<crate::workflow::WorkflowOutcome> {
        let Some(lease) = session.handle_mut() else {
            warn!(conversation = %session.conversation_id(), workflow = %kind, "No browser session");
            return Err(PortalError::SessionLost);
        };
        let cancel = slot.begin_workflow();
        let result = self
            .engine
            .run(kind, self.workflows.get(kind), lease, &cancel)
            .await;
        slot.end_workflow();
        result
    }

    /// Hand the artifact to the gateway; the staged copy is removed afterwards
    async fn deliver(&self, conversation_id: &str, artifact: Artifact) -> PortalResult<()> {
        let file_name = artifact.file_name();
        let staged = StagedFile::write(&file_name, &artifact.bytes)
            .await
            .map_err(|e| PortalError::DeliveryFailure(e.to_string()))?;

        let document = Outbound::Document(Attachment {
            path: staged.path().to_path_buf(),
            file_name,
            mime_type: artifact.content_type,
            caption: Some(replies::CERTIFICATE_CAPTION.to_string()),
        });
        let result = self.gateway.send(conversation_id, document).await;
        drop(staged);

        result.map_err(|e| PortalError::DeliveryFailure(e.to_string()))
    }

    async fn reply(&self, conversation_id: &str, text: &str) {
        if let Err(e) = self
            .gateway
            .send(conversation_id, Outbound::Text(text.to_string()))
            .await
        {
            warn!(conversation = %conversation_id, "Failed to send reply: {}", e);
        }
    }
}

fn failure_reply(err: &PortalError, fallback: &'static str) -> &'static str {
    match err {
        PortalError::SessionLost => replies::SESSION_LOST,
        PortalError::PoolExhausted { .. } => replies::POOL_EXHAUSTED,
        PortalError::BrowserUnavailable(_) => replies::BROWSER_UNAVAILABLE,
        PortalError::Cancelled => replies::CANCELLED,
        PortalError::ArtifactTimeout { .. } => replies::CERTIFICATE_NOT_GENERATED,
        PortalError::DeliveryFailure(_) => replies::DELIVERY_FAILED,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConversationState::*;

    #[test]
    fn idle_always_gets_menu() {
        assert_eq!(decide(Idle, "oi"), Decision::SendMenu);
        assert_eq!(decide(Idle, "reset"), Decision::SendMenu);
        assert_eq!(decide(Idle, ""), Decision::SendMenu);
    }

    #[test]
    fn category_keywords() {
        assert_eq!(decide(AwaitingCategoryChoice, " 1 "), Decision::PromptPropertyCode);
        assert_eq!(decide(AwaitingCategoryChoice, "Quero IPTU"), Decision::PromptPropertyCode);
        assert_eq!(decide(AwaitingCategoryChoice, "cadastro"), Decision::PromptPropertyCode);
        assert_eq!(decide(AwaitingCategoryChoice, "2"), Decision::PromptTaxpayerId);
        assert_eq!(decide(AwaitingCategoryChoice, "meu CPF"), Decision::PromptTaxpayerId);
        assert_eq!(decide(AwaitingCategoryChoice, "Contribuinte"), Decision::PromptTaxpayerId);
        assert_eq!(decide(AwaitingCategoryChoice, "3"), Decision::InvalidCategory);
    }

    #[test]
    fn property_code_is_trimmed_raw_text() {
        assert_eq!(
            decide(AwaitingPropertyCode, "  AB-123 "),
            Decision::PropertyLogin("AB-123".into())
        );
    }

    #[test]
    fn tax_id_needs_exactly_eleven_digits() {
        assert_eq!(
            decide(AwaitingTaxpayerId, " 12345678901 "),
            Decision::TaxpayerLogin("12345678901".into())
        );
        for bad in ["1234567890", "123456789012", "123.456.789-01", "1234567890a", "１２３４５６７８９０１"] {
            assert!(
                matches!(decide(AwaitingTaxpayerId, bad), Decision::InvalidTaxId(_)),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn taxpayer_actions() {
        assert_eq!(decide(AwaitingTaxpayerAction, "1"), Decision::DebtsLookup);
        assert_eq!(decide(AwaitingTaxpayerAction, "2"), Decision::CertificateCapture);
        assert_eq!(decide(AwaitingTaxpayerAction, "3"), Decision::InvalidTaxpayerAction);
    }

    #[test]
    fn reset_beats_every_other_rule() {
        for state in [
            AwaitingCategoryChoice,
            AwaitingPropertyCode,
            AwaitingTaxpayerId,
            LoggedInProperty,
            AwaitingTaxpayerAction,
        ] {
            assert_eq!(decide(state, " RESET "), Decision::Reset, "{state}");
        }
    }

    #[test]
    fn logged_in_property_gets_help() {
        assert_eq!(decide(LoggedInProperty, "e agora?"), Decision::Help);
    }

    #[test]
    fn failure_replies_distinguish_delivery() {
        assert_eq!(
            failure_reply(&PortalError::DeliveryFailure("x".into()), replies::ACTION_FAILED),
            replies::DELIVERY_FAILED
        );
        assert_eq!(
            failure_reply(&PortalError::ArtifactTimeout { window_ms: 1 }, replies::ACTION_FAILED),
            replies::CERTIFICATE_NOT_GENERATED
        );
        assert_eq!(
            failure_reply(
                &PortalError::ElementNotFound {
                    selector: "#x".into()
                },
                replies::ACTION_FAILED
            ),
            replies::ACTION_FAILED
        );
    }
}
