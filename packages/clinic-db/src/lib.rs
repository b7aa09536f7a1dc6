//! Clinic DB - Camada de acesso a dados do gestionale do studio medico
//!
//! Esta biblioteca fornece:
//! - Fachada única de banco de dados (PostgreSQL/SQLite, ponte do host ou simulador)
//! - Simulador em memória persistido nas configurações locais
//! - Resolução da configuração de conexão
//! - Modelos de usuários, pacientes, agendamentos, prontuários, notificações e licença

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub mod bridge;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod schema;
pub mod settings;
pub mod simulator;
pub mod statement;

pub use bridge::{BridgeCommand, BridgeResponse, HostBridge};
pub use config::{BackendKind, DbConfig, SqlDriver};
pub use database::{Client, ConnectionStatus, Database, QueryOutcome};
pub use error::{DbError, DbResult};
pub use models::Models;
pub use settings::SettingsStore;

/// Abre as configurações locais, conecta ao backend configurado e garante
/// o schema principal
pub async fn init_database(settings_path: impl AsRef<Path>) -> Result<Arc<Database>> {
    let settings_path = settings_path.as_ref();
    let settings = SettingsStore::open(settings_path)
        .with_context(|| format!("Falha ao abrir configurações em {}", settings_path.display()))?;
    let config = DbConfig::load(&settings).context("Configuração de banco de dados inválida")?;

    let db = Database::new(config, Arc::new(settings)).context("Falha ao criar a fachada de banco de dados")?;
    let status = db.connect().await.context("Falha ao conectar ao banco de dados")?;
    db.initialize_database()
        .await
        .context("Falha ao inicializar o schema")?;

    info!("Banco de dados inicializado com sucesso: {:?}", status);
    Ok(Arc::new(db))
}
