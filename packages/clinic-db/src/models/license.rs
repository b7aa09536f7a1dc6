//! Licença de uso e recursos habilitados (Google Calendar, WhatsApp)
//!
//! A licença vigente é a instalada por último. Ela fica em cache na memória
//! e espelhada nas configurações locais, que servem de reserva quando o
//! banco não tem nenhuma licença.

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{fetch_first, flexible_bool, now, require};
use crate::database::Database;
use crate::error::{DbError, DbResult};
use crate::schema::Table;
use crate::settings::keys;
use crate::statement::{Insert, Order, Select, Statement};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseType {
    Basic,
    Google,
    Whatsapp,
    Full,
}

impl LicenseType {
    pub fn includes_google_calendar(&self) -> bool {
        matches!(self, LicenseType::Google | LicenseType::Full)
    }

    pub fn includes_whatsapp(&self) -> bool {
        matches!(self, LicenseType::Whatsapp | LicenseType::Full)
    }
}

impl fmt::Display for LicenseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LicenseType::Basic => "basic",
            LicenseType::Google => "google",
            LicenseType::Whatsapp => "whatsapp",
            LicenseType::Full => "full",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct License {
    pub id: i64,
    pub license_key: String,
    pub license_type: LicenseType,
    pub expiry_date: NaiveDate,
    #[serde(default, deserialize_with = "flexible_bool")]
    pub google_calendar_enabled: bool,
    #[serde(default, deserialize_with = "flexible_bool")]
    pub whatsapp_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl License {
    /// Válida até o fim do dia de vencimento
    pub fn is_valid_on(&self, today: NaiveDate) -> bool {
        self.expiry_date >= today
    }

    /// Dias até o vencimento; negativo se já venceu
    pub fn days_until_expiry(&self, today: NaiveDate) -> i64 {
        (self.expiry_date - today).num_days()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLicense {
    pub license_key: String,
    pub license_type: LicenseType,
    pub expiry_date: NaiveDate,
    pub google_calendar_enabled: bool,
    pub whatsapp_enabled: bool,
}

impl NewLicense {
    /// Licença com os recursos derivados do tipo
    pub fn for_type(license_key: impl Into<String>, license_type: LicenseType, expiry_date: NaiveDate) -> Self {
        Self {
            license_key: license_key.into(),
            license_type,
            expiry_date,
            google_calendar_enabled: license_type.includes_google_calendar(),
            whatsapp_enabled: license_type.includes_whatsapp(),
        }
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

pub struct LicenseModel {
    db: Arc<Database>,
    cache: RwLock<Option<License>>,
}

impl LicenseModel {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            cache: RwLock::new(None),
        }
    }

    pub async fn install_license(&self, license: NewLicense) -> DbResult<License> {
        require("license_key", &license.license_key)?;

        let insert = Insert::record(Table::License, &license, now())?;
        let installed: License = fetch_first(&self.db, Statement::Insert(insert))
            .await?
            .ok_or_else(|| DbError::InternalError("INSERT sem linha de retorno".into()))?;

        self.db.settings().set(keys::LICENSE, &installed)?;
        *self.cache.write().await = Some(installed.clone());

        info!(
            "Licença {} instalada ({}), vence em {}",
            installed.license_key, installed.license_type, installed.expiry_date
        );
        Ok(installed)
    }

    pub async fn find_by_key(&self, license_key: &str) -> DbResult<Option<License>> {
        fetch_first(
            &self.db,
            Statement::Select(Select::from(Table::License).eq("license_key", license_key.trim())),
        )
        .await
    }

    /// Licença vigente (cache, depois banco, depois configurações locais)
    pub async fn current_license(&self) -> DbResult<Option<License>> {
        if let Some(cached) = self.cache.read().await.as_ref() {
            return Ok(Some(cached.clone()));
        }
        self.refresh().await
    }

    /// Descarta o cache e relê a licença vigente
    pub async fn refresh(&self) -> DbResult<Option<License>> {
        let mut cache = self.cache.write().await;

        // id crescente segue a ordem de instalação
        let latest: Option<License> = fetch_first(
            &self.db,
            Statement::Select(
                Select::from(Table::License)
                    .order_by("id", Order::Desc)
                    .limit(1),
            ),
        )
        .await?;

        let license = match latest {
            Some(license) => Some(license),
            None => match self.db.settings().get::<License>(keys::LICENSE) {
                Ok(mirror) => {
                    if mirror.is_some() {
                        debug!("Licença lida do espelho nas configurações locais");
                    }
                    mirror
                }
                Err(e) => {
                    warn!("Espelho da licença ilegível: {}", e);
                    None
                }
            },
        };

        *cache = license.clone();
        Ok(license)
    }

    pub async fn is_license_valid(&self) -> DbResult<bool> {
        Ok(self
            .current_license()
            .await?
            .is_some_and(|license| license.is_valid_on(today())))
    }

    pub async fn get_days_until_expiry(&self) -> DbResult<Option<i64>> {
        Ok(self
            .current_license()
            .await?
            .map(|license| license.days_until_expiry(today())))
    }

    pub async fn is_google_calendar_enabled(&self) -> DbResult<bool> {
        Ok(self
            .current_license()
            .await?
            .is_some_and(|license| license.google_calendar_enabled && license.is_valid_on(today())))
    }

    pub async fn is_whatsapp_enabled(&self) -> DbResult<bool> {
        Ok(self
            .current_license()
            .await?
            .is_some_and(|license| license.whatsapp_enabled && license.is_valid_on(today())))
    }
}
