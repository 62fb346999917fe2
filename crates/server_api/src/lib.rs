use std::sync::Arc;

use session_core::ControllerHandle;
use shared::{
    domain::{ChatSummary, GatewayStatus, SendOutcome},
    error::{ApiError, GatewayError},
};
use tracing::{info, warn};

pub mod phone;

pub use phone::{CountryCodePrefix, DigitsOnly, PhoneNormalizer, DEFAULT_COUNTRY_CODE};

#[derive(Clone)]
pub struct ApiContext {
    pub controller: ControllerHandle,
    pub phone: Arc<dyn PhoneNormalizer>,
}

impl ApiContext {
    pub fn new(controller: ControllerHandle, phone: Arc<dyn PhoneNormalizer>) -> Self {
        Self { controller, phone }
    }
}

pub async fn send_message(
    ctx: &ApiContext,
    phone: Option<&str>,
    message: Option<&str>,
) -> Result<SendOutcome, ApiError> {
    let (Some(phone), Some(message)) = (non_empty(phone), non_empty(message)) else {
        return Err(GatewayError::Validation("phone and message are required".into()).into());
    };

    let session = ctx.controller.ready_session().await?;
    let number = ctx.phone.normalize(phone);
    if number.is_empty() {
        return Err(GatewayError::Validation(format!("{phone} contains no digits")).into());
    }

    let chat_id = session
        .get_number_id(&number)
        .await
        .map_err(|err| transport("number lookup", phone, err))?
        .ok_or_else(|| GatewayError::UnregisteredRecipient(phone.to_string()))?;

    let sent = session
        .send_message(&chat_id, message)
        .await
        .map_err(|err| transport("send", phone, err))?;
    info!(recipient = %phone, chat = %chat_id, message_id = %sent.id, "message sent");

    Ok(SendOutcome {
        message_id: sent.id,
        timestamp: sent.timestamp,
        recipient: phone.to_string(),
    })
}

pub async fn get_chats(ctx: &ApiContext) -> Result<Vec<ChatSummary>, ApiError> {
    let session = ctx.controller.ready_session().await?;
    let chats = session.get_chats().await.map_err(|err| {
        warn!(error = %format!("{err:#}"), "listing chats failed");
        GatewayError::transport(err)
    })?;
    Ok(chats)
}

pub fn get_status(ctx: &ApiContext) -> GatewayStatus {
    ctx.controller.status()
}

/// Resets the attempt counter and starts a session attempt right away.
/// Resolves once that attempt's initialize has resolved; readiness follows
/// asynchronously through the session's events.
pub async fn manual_reconnect(ctx: &ApiContext) -> Result<(), ApiError> {
    ctx.controller.manual_reconnect().await.map_err(|err| {
        warn!(error = %err, "manual reconnect failed");
        ApiError::from(err)
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.trim().is_empty())
}

fn transport(operation: &str, phone: &str, err: anyhow::Error) -> GatewayError {
    warn!(%operation, recipient = %phone, error = %format!("{err:#}"), "session call failed");
    GatewayError::transport(err)
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
