use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::{
    clients::{
        smtp::MailTransport, specification::SpecificationResolver, template::TemplateRenderer,
    },
    error::DeliveryError,
    models::{
        message::{Attachment, DeliveryOutcome, MailAddress, RenderedMessage},
        specification::NotificationSpecification,
    },
};

/// Resolves, renders and delivers notifications.
///
/// `send` never returns an error: every failure is logged here and reported
/// as `false`. Use [`NotificationService::try_send`] for the typed outcome.
pub struct NotificationService {
    resolver: Arc<dyn SpecificationResolver>,
    renderer: Arc<TemplateRenderer>,
    transport: Arc<dyn MailTransport>,
}

impl NotificationService {
    pub fn new(
        resolver: Arc<dyn SpecificationResolver>,
        renderer: Arc<TemplateRenderer>,
        transport: Arc<dyn MailTransport>,
    ) -> Self {
        Self {
            resolver,
            renderer,
            transport,
        }
    }

    pub async fn send<T>(
        &self,
        notification_type: &str,
        data: &T,
        attachments: Vec<Attachment>,
    ) -> bool
    where
        T: Serialize + Sync + ?Sized,
    {
        let cancel = CancellationToken::new();
        self.send_with_cancellation(notification_type, data, attachments, &cancel)
            .await
    }

    pub async fn send_with_cancellation<T>(
        &self,
        notification_type: &str,
        data: &T,
        attachments: Vec<Attachment>,
        cancel: &CancellationToken,
    ) -> bool
    where
        T: Serialize + Sync + ?Sized,
    {
        let span = info_span!(
            "notification_send",
            notification_type,
            send_id = %Uuid::new_v4()
        );

        async move {
            match self
                .try_send(notification_type, data, attachments, cancel)
                .await
            {
                Ok(DeliveryOutcome::Delivered(receipt)) => {
                    info!(
                        recipient_count = receipt.recipient_count,
                        attempts = receipt.attempts,
                        "Notification sent successfully"
                    );
                    true
                }
                Ok(DeliveryOutcome::NoRecipients) => {
                    warn!("Notification has no recipients, nothing sent");
                    false
                }
                Err(DeliveryError::Transport(e)) => {
                    error!(
                        attempts = e.attempts(),
                        error = %e,
                        "Notification delivery failed"
                    );
                    false
                }
                Err(e) => {
                    error!(error = %e, "Notification could not be prepared");
                    false
                }
            }
        }
        .instrument(span)
        .await
    }

    pub async fn try_send<T>(
        &self,
        notification_type: &str,
        data: &T,
        attachments: Vec<Attachment>,
        cancel: &CancellationToken,
    ) -> Result<DeliveryOutcome, DeliveryError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let specification = self
            .resolver
            .get_by_notification_type(notification_type)
            .await?
            .ok_or_else(|| DeliveryError::SpecificationNotFound(notification_type.to_owned()))?;

        if !specification.is_active() {
            warn!(notification_type, "Specification is inactive, sending anyway");
        }

        let html_body = self.renderer.render(specification.html_body(), data)?;
        if html_body.trim().is_empty() {
            warn!(notification_type, "Template rendered an empty body");
        }

        let message = build_message(&specification, html_body, attachments);

        if !message.has_recipients() {
            return Ok(DeliveryOutcome::NoRecipients);
        }

        debug!(
            to = message.to.len(),
            cc = message.cc.len(),
            bcc = message.bcc.len(),
            attachments = message.attachments.len(),
            "Message built, handing off to transport"
        );

        let receipt = self
            .transport
            .deliver(&message, cancel)
            .await
            .inspect_err(|e| {
                warn!(
                    recipient_count = message.recipient_count(),
                    attempts = e.attempts(),
                    "Transport reported failure"
                )
            })?;

        Ok(DeliveryOutcome::Delivered(receipt))
    }
}

/// Builds the per-send message and expands every recipient group by role.
/// Duplicate recipients are kept.
pub fn build_message(
    specification: &NotificationSpecification,
    html_body: String,
    attachments: Vec<Attachment>,
) -> RenderedMessage {
    let from = MailAddress::new(specification.from_address())
        .with_display_name(specification.from_name().map(str::to_owned));

    let mut message = RenderedMessage::new(
        specification.subject().to_owned(),
        html_body,
        from,
        specification.priority(),
    );
    message.text_body = specification.text_body().map(str::to_owned);
    message.reply_to = specification.reply_to().map(MailAddress::new);
    message.attachments = attachments;

    for recipient in specification.recipients() {
        message.add_recipient(recipient);
    }

    message
}
