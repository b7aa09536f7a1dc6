//! Notificações ao paciente (confirmação, lembrete, mensagem livre)
//!
//! O nome do paciente é copiado no momento da criação. O status só avança
//! de `pending` para `sent` ou `failed`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use super::{fetch_all, fetch_first, now, require};
use crate::database::Database;
use crate::error::{DbError, DbResult};
use crate::schema::Table;
use crate::statement::{Delete, Insert, Order, Select, Statement, Update};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Confirmation,
    Reminder,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub patient_id: i64,
    pub patient_name: String,
    pub appointment_id: Option<i64>,
    pub message: String,
    pub status: NotificationStatus,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNotification {
    pub patient_id: i64,
    pub appointment_id: Option<i64>,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationType,
}

#[derive(Serialize)]
struct NotificationRecord<'a> {
    #[serde(flatten)]
    notification: &'a NewNotification,
    patient_name: String,
    status: NotificationStatus,
}

pub struct NotificationModel {
    db: Arc<Database>,
}

impl NotificationModel {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    async fn ensure_table(&self) -> DbResult<()> {
        self.db.ensure_table(Table::Notifications).await
    }

    /// Cria a notificação como `pending`, com o nome atual do paciente
    pub async fn create(&self, notification: NewNotification) -> DbResult<Notification> {
        require("message", &notification.message)?;
        self.ensure_table().await?;

        let patient = self
            .db
            .execute(Statement::Select(
                Select::from(Table::Patients)
                    .eq("id", notification.patient_id)
                    .limit(1),
            ))
            .await?;
        let patient_name = patient
            .rows
            .first()
            .and_then(|row| row.get("name"))
            .and_then(|name| name.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                DbError::Validation(format!("paciente inexistente: {}", notification.patient_id))
            })?;

        let record = NotificationRecord {
            notification: &notification,
            patient_name,
            status: NotificationStatus::Pending,
        };
        let insert = Insert::record(Table::Notifications, &record, now())?;
        let created: Notification = fetch_first(&self.db, Statement::Insert(insert))
            .await?
            .ok_or_else(|| DbError::InternalError("INSERT sem linha de retorno".into()))?;

        info!(
            "Notificação criada: id={} paciente={} tipo={:?}",
            created.id, created.patient_id, created.kind
        );
        Ok(created)
    }

    pub async fn find_by_id(&self, id: i64) -> DbResult<Option<Notification>> {
        self.ensure_table().await?;
        fetch_first(
            &self.db,
            Statement::Select(Select::from(Table::Notifications).eq("id", id)),
        )
        .await
    }

    pub async fn find_by_patient(&self, patient_id: i64) -> DbResult<Vec<Notification>> {
        self.ensure_table().await?;
        fetch_all(
            &self.db,
            Statement::Select(
                Select::from(Table::Notifications)
                    .eq("patient_id", patient_id)
                    .order_by("id", Order::Desc),
            ),
        )
        .await
    }

    /// Fila de envio, da mais antiga à mais nova
    pub async fn find_pending_notifications(&self) -> DbResult<Vec<Notification>> {
        self.ensure_table().await?;
        fetch_all(
            &self.db,
            Statement::Select(
                Select::from(Table::Notifications)
                    .eq("status", NotificationStatus::Pending.to_string())
                    .order_by("id", Order::Asc),
            ),
        )
        .await
    }

    pub async fn mark_sent(&self, id: i64) -> DbResult<Option<Notification>> {
        self.transition(id, NotificationStatus::Sent).await
    }

    pub async fn mark_failed(&self, id: i64) -> DbResult<Option<Notification>> {
        self.transition(id, NotificationStatus::Failed).await
    }

    async fn transition(&self, id: i64, to: NotificationStatus) -> DbResult<Option<Notification>> {
        let Some(current) = self.find_by_id(id).await? else {
            return Ok(None);
        };
        if current.status != NotificationStatus::Pending {
            warn!("Notificação {} já está em {}", id, current.status);
            return Err(DbError::InvalidTransition {
                from: current.status.to_string(),
                to: to.to_string(),
            });
        }

        let mut update = Update::partial(Table::Notifications, id, &serde_json::Map::new(), now())?
            .set("status", to.to_string());
        if to == NotificationStatus::Sent {
            update = update.set("sent_at", serde_json::to_value(now())?);
        }

        let updated = fetch_first(&self.db, Statement::Update(update)).await?;
        info!("Notificação {}: {} -> {}", id, current.status, to);
        Ok(updated)
    }

    pub async fn delete(&self, id: i64) -> DbResult<bool> {
        self.ensure_table().await?;
        let outcome = self
            .db
            .execute(Statement::Delete(Delete::by_id(Table::Notifications, id)))
            .await?;
        Ok(!outcome.rows.is_empty())
    }
}
