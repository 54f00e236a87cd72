//! Notification records. Delivery happens elsewhere; this only keeps the log.

use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::Deserialize;
use tracing::info;

use crate::{
    db::{Database, Error, FieldError},
    entity::{
        member,
        notification::{self, NotificationKind},
    },
};

#[derive(Clone, Debug, Deserialize)]
pub struct NotificationInput {
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub recipient_ids: Vec<i64>,
}

impl NotificationInput {
    fn validate(&self) -> Result<(), Error> {
        let mut errors = Vec::new();
        if self.title.trim().is_empty() {
            errors.push(FieldError::new("title", "Title is required."));
        }
        if self.message.trim().is_empty() {
            errors.push(FieldError::new("message", "Message is required."));
        }
        if self.recipient_ids.is_empty() {
            errors.push(FieldError::new(
                "recipient_ids",
                "At least one recipient is required.",
            ));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(errors))
        }
    }
}

impl Database {
    pub async fn create_notification(
        &self,
        mut input: NotificationInput,
        creator_id: i64,
    ) -> Result<notification::Model, Error> {
        input.validate()?;
        input.recipient_ids.sort_unstable();
        input.recipient_ids.dedup();

        let known = member::Entity::find()
            .filter(member::Column::Id.is_in(input.recipient_ids.clone()))
            .count(&self.pool)
            .await?;
        if known != input.recipient_ids.len() as u64 {
            return Err(Error::invalid(
                "recipient_ids",
                "Every recipient must be an existing member.",
            ));
        }
        self.get_user(creator_id).await?;

        let now = self.now();
        let notification = notification::ActiveModel {
            id: NotSet,
            title: Set(input.title.trim().to_owned()),
            message: Set(input.message.trim().to_owned()),
            kind: Set(input.kind),
            recipient_ids: Set(serde_json::json!(input.recipient_ids)),
            sent_at: Set(None),
            user_id: Set(creator_id),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&self.pool)
        .await?;

        info!(
            notification_id = notification.id,
            kind = ?notification.kind,
            recipients = input.recipient_ids.len(),
            "Notification created"
        );
        Ok(notification)
    }

    /// Newest first.
    pub async fn list_notifications(&self) -> Result<Vec<notification::Model>, Error> {
        Ok(notification::Entity::find()
            .order_by_desc(notification::Column::CreatedAt)
            .order_by_desc(notification::Column::Id)
            .all(&self.pool)
            .await?)
    }

    pub async fn mark_notification_sent(
        &self,
        notification_id: i64,
    ) -> Result<notification::Model, Error> {
        let existing = notification::Entity::find_by_id(notification_id)
            .one(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("notification", notification_id))?;
        if let Some(sent_at) = existing.sent_at {
            return Err(Error::InvalidState(format!(
                "notification {} was already sent at {}",
                notification_id, sent_at
            )));
        }

        let now = self.now();
        let mut notification: notification::ActiveModel = existing.into();
        notification.sent_at = Set(Some(now));
        notification.updated_at = Set(now);
        Ok(notification.update(&self.pool).await?)
    }
}
