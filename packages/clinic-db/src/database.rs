//! Fachada de banco de dados
//!
//! Ponto único que decide qual backend atende cada chamada: pool relacional
//! direto, ponte do host desktop ou simulador em memória. A escolha vem da
//! configuração; falhas de conectividade degradam para o simulador (quando
//! permitido) e o resultado informa sempre quem atendeu.

use chrono::Utc;
use serde_json::Value;
use sqlx::any::{Any, AnyArguments, AnyPoolOptions, AnyRow};
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::{AnyPool, Column, Row as _, TypeInfo, ValueRef};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::bridge::{BridgeCommand, BridgeResponse, HostBridge};
use crate::config::{BackendKind, DbConfig, SqlDriver};
use crate::error::{DbError, DbResult};
use crate::schema::{self, Table};
use crate::settings::{keys, SettingsStore};
use crate::simulator::MemoryStore;
use crate::statement::{Row, Statement};

/// Resultado da tentativa de conexão
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// O backend pedido está atendendo
    Connected(BackendKind),
    /// O backend pedido falhou; o simulador assumiu
    Degraded { requested: BackendKind, reason: String },
    /// Nenhum backend disponível
    Failed { reason: String },
}

impl ConnectionStatus {
    pub fn is_usable(&self) -> bool {
        !matches!(self, ConnectionStatus::Failed { .. })
    }
}

/// Linhas devolvidas e o backend que efetivamente as produziu
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutcome {
    pub rows: Vec<Row>,
    pub served_by: BackendKind,
    /// Motivo da degradação, quando o simulador atendeu no lugar de outro backend
    pub degraded: Option<String>,
}

#[derive(Clone)]
enum Route {
    Real(AnyPool),
    Bridge(Arc<dyn HostBridge>),
    Simulated { reason: Option<String> },
}

#[derive(Default)]
struct ConnectionState {
    route: Option<Route>,
    status: Option<ConnectionStatus>,
}

/// Fachada única de acesso a dados, compartilhada como `Arc<Database>`
pub struct Database {
    config: DbConfig,
    settings: Arc<SettingsStore>,
    bridge: Option<Arc<dyn HostBridge>>,
    simulator: MemoryStore,
    state: RwLock<ConnectionState>,
    ensured: Mutex<HashSet<Table>>,
}

impl Database {
    /// Cria a fachada; a configuração é validada aqui, antes de qualquer I/O
    pub fn new(config: DbConfig, settings: Arc<SettingsStore>) -> DbResult<Self> {
        config.validate()?;
        if config.backend == BackendKind::Bridge {
            return Err(DbError::Configuration(
                "backend 'bridge' exige uma ponte do host (use Database::with_bridge)".into(),
            ));
        }
        Ok(Self::build(config, settings, None))
    }

    /// Cria a fachada com a ponte do host disponível
    pub fn with_bridge(
        config: DbConfig,
        settings: Arc<SettingsStore>,
        bridge: Arc<dyn HostBridge>,
    ) -> DbResult<Self> {
        config.validate()?;
        Ok(Self::build(config, settings, Some(bridge)))
    }

    fn build(config: DbConfig, settings: Arc<SettingsStore>, bridge: Option<Arc<dyn HostBridge>>) -> Self {
        Self {
            simulator: MemoryStore::new(settings.clone()),
            config,
            settings,
            bridge,
            state: RwLock::new(ConnectionState::default()),
            ensured: Mutex::new(HashSet::new()),
        }
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    /// Status atual, sem tentar conectar
    pub async fn status(&self) -> Option<ConnectionStatus> {
        self.state.read().await.status.clone()
    }

    /// Conecta ao backend configurado. Idempotente: chamadas seguintes
    /// devolvem o mesmo status até `close()`.
    pub async fn connect(&self) -> DbResult<ConnectionStatus> {
        if let Some(status) = &self.state.read().await.status {
            return Ok(status.clone());
        }

        let mut state = self.state.write().await;
        if let Some(status) = &state.status {
            return Ok(status.clone());
        }

        let requested = self.config.backend;
        let attempt = match requested {
            BackendKind::Real => self.open_pool().await.map(Route::Real),
            BackendKind::Bridge => self.connect_bridge().await.map(Route::Bridge),
            BackendKind::Simulated => Ok(Route::Simulated { reason: None }),
        };

        let (route, status) = match attempt {
            Ok(route) => {
                info!("Banco de dados conectado via backend {}", requested);
                (Some(route), ConnectionStatus::Connected(requested))
            }
            Err(e) if self.config.fallback_to_simulator => {
                warn!(
                    "Falha ao conectar ao backend {}: {}. Usando o simulador",
                    requested, e
                );
                let reason = e.to_string();
                (
                    Some(Route::Simulated {
                        reason: Some(reason.clone()),
                    }),
                    ConnectionStatus::Degraded { requested, reason },
                )
            }
            Err(e) => {
                error!("Falha ao conectar ao backend {}: {}", requested, e);
                (None, ConnectionStatus::Failed { reason: e.to_string() })
            }
        };

        state.route = route;
        state.status = Some(status.clone());
        Ok(status)
    }

    async fn open_pool(&self) -> DbResult<AnyPool> {
        sqlx::any::install_default_drivers();

        if self.config.driver == SqlDriver::Sqlite {
            if let Some(parent) = Path::new(&self.config.database).parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }

        let pool = AnyPoolOptions::new()
            .max_connections(self.config.max_connections)
            .acquire_timeout(Duration::from_secs(self.config.connect_timeout_secs))
            .connect(&self.config.connection_url())
            .await?;

        // Sonda de conectividade
        sqlx::query("SELECT 1").execute(&pool).await?;
        Ok(pool)
    }

    async fn connect_bridge(&self) -> DbResult<Arc<dyn HostBridge>> {
        let bridge = self
            .bridge
            .clone()
            .ok_or_else(|| DbError::Configuration("nenhuma ponte do host disponível".into()))?;
        bridge
            .connect_database(&self.config)
            .await
            .into_result()
            .map_err(DbError::Bridge)?;
        Ok(bridge)
    }

    async fn route(&self) -> DbResult<Route> {
        let status = self.connect().await?;
        match &self.state.read().await.route {
            Some(route) => Ok(route.clone()),
            None => Err(DbError::ConnectionError(match status {
                ConnectionStatus::Failed { reason } => reason,
                _ => "banco de dados não conectado".to_string(),
            })),
        }
    }

    /// Executa um comando tipado no backend ativo
    pub async fn execute(&self, statement: Statement) -> DbResult<QueryOutcome> {
        match self.route().await? {
            Route::Real(pool) => {
                let query = statement.to_sql();
                match fetch_rows(&pool, &query.sql, &query.params).await {
                    Ok(rows) => Ok(QueryOutcome {
                        rows,
                        served_by: BackendKind::Real,
                        degraded: None,
                    }),
                    Err(e) if e.is_connectivity() && self.config.fallback_to_simulator => {
                        warn!("Consulta em {} falhou ({}). Usando o simulador", statement.table(), e);
                        self.simulate(&statement, Some(e.to_string())).await
                    }
                    Err(e) => {
                        error!("Consulta em {} falhou: {}", statement.table(), e);
                        Err(e)
                    }
                }
            }
            Route::Bridge(bridge) => {
                let query = statement.to_sql();
                match bridge.execute_query(&query.sql, &query.params).await.into_rows() {
                    Ok(rows) => Ok(QueryOutcome {
                        rows,
                        served_by: BackendKind::Bridge,
                        degraded: None,
                    }),
                    Err(reason) if self.config.fallback_to_simulator => {
                        warn!("Ponte falhou em {} ({}). Usando o simulador", statement.table(), reason);
                        self.simulate(&statement, Some(reason)).await
                    }
                    Err(reason) => {
                        error!("Ponte falhou em {}: {}", statement.table(), reason);
                        Err(DbError::Bridge(reason))
                    }
                }
            }
            Route::Simulated { reason } => self.simulate(&statement, reason).await,
        }
    }

    async fn simulate(&self, statement: &Statement, reason: Option<String>) -> DbResult<QueryOutcome> {
        let rows = self.simulator.execute(statement).await?;
        Ok(QueryOutcome {
            rows,
            served_by: BackendKind::Simulated,
            degraded: reason,
        })
    }

    /// Executa SQL livre com parâmetros `$1, $2, ...`. O simulador não
    /// interpreta SQL, então esta chamada exige o pool ou a ponte.
    pub async fn query(&self, sql: &str, params: &[Value]) -> DbResult<Vec<Row>> {
        match self.route().await? {
            Route::Real(pool) => fetch_rows(&pool, sql, params).await,
            Route::Bridge(bridge) => bridge
                .execute_query(sql, params)
                .await
                .into_rows()
                .map_err(DbError::Bridge),
            Route::Simulated { .. } => Err(DbError::Unsupported(
                "SQL livre não está disponível no simulador".into(),
            )),
        }
    }

    /// Cliente dedicado: no backend real reserva uma conexão do pool
    pub async fn get_client(&self) -> DbResult<Client<'_>> {
        let conn = match self.route().await? {
            Route::Real(pool) => Some(pool.acquire().await?),
            _ => None,
        };
        Ok(Client { db: self, conn })
    }

    /// Fecha o pool e zera o estado; a próxima chamada reconecta
    pub async fn close(&self) {
        let route = {
            let mut state = self.state.write().await;
            state.status = None;
            state.route.take()
        };
        // O estado é liberado antes de esperar o pool e antes de `ensured`
        if let Some(Route::Real(pool)) = route {
            pool.close().await;
        }
        self.ensured.lock().await.clear();
        info!("Conexão com o banco de dados encerrada");
    }

    /// Cria as tabelas principais (idempotente)
    pub async fn initialize_database(&self) -> DbResult<()> {
        info!("Inicializando schema do banco de dados...");

        match self.route().await? {
            Route::Real(pool) => {
                let mut transaction = pool.begin().await?;
                for ddl in schema::core_ddl(self.config.driver) {
                    if let Err(e) = sqlx::query(&ddl).execute(&mut *transaction).await {
                        error!("Falha ao criar schema, desfazendo transação: {}", e);
                        transaction.rollback().await?;
                        return Err(DbError::MigrationError(e.to_string()));
                    }
                }
                transaction.commit().await?;
            }
            Route::Bridge(bridge) => {
                // Sem transação compartilhada: cada comando é uma chamada da ponte
                for ddl in schema::core_ddl(SqlDriver::Postgres) {
                    bridge
                        .execute_query(&ddl, &[])
                        .await
                        .into_result()
                        .map_err(DbError::MigrationError)?;
                }
            }
            Route::Simulated { .. } => self.simulator.ensure_tables(&Table::CORE).await?,
        }

        self.ensured.lock().await.extend(Table::CORE);
        info!("Schema inicializado com sucesso");
        Ok(())
    }

    /// Cria sob demanda uma tabela fora do conjunto principal
    pub async fn ensure_table(&self, table: Table) -> DbResult<()> {
        if self.ensured.lock().await.contains(&table) {
            return Ok(());
        }

        // DDL idempotente: duas chamadas concorrentes no máximo repetem o CREATE
        match self.route().await? {
            Route::Real(pool) => {
                for ddl in table.ddl(self.config.driver) {
                    sqlx::query(&ddl)
                        .execute(&pool)
                        .await
                        .map_err(|e| DbError::MigrationError(e.to_string()))?;
                }
            }
            Route::Bridge(bridge) => {
                let response = match table {
                    Table::MedicalRecords => bridge.ensure_medical_records_table().await,
                    Table::Notifications => bridge.ensure_notifications_table().await,
                    other => {
                        let mut last = BridgeResponse::ok();
                        for ddl in other.ddl(SqlDriver::Postgres) {
                            last = bridge.execute_query(&ddl, &[]).await;
                            if !last.success {
                                break;
                            }
                        }
                        last
                    }
                };
                response.into_result().map_err(DbError::MigrationError)?;
            }
            Route::Simulated { .. } => self.simulator.ensure_tables(&[table]).await?,
        }

        debug!("Tabela {} garantida", table);
        self.ensured.lock().await.insert(table);
        Ok(())
    }

    fn require_bridge(&self) -> DbResult<&Arc<dyn HostBridge>> {
        self.bridge
            .as_ref()
            .ok_or_else(|| DbError::Unsupported("operação disponível apenas no host desktop".into()))
    }

    /// Encaminha um comando de sistema de arquivos para a ponte
    pub async fn run_command(&self, command: &BridgeCommand) -> DbResult<BridgeResponse> {
        self.require_bridge()?
            .run_command(command)
            .await
            .into_result()
            .map_err(DbError::Bridge)
    }

    /// Backup via ponte; registra caminho e data no armazenamento local
    pub async fn backup(&self, path: &str) -> DbResult<String> {
        let response = self
            .require_bridge()?
            .backup_database(path)
            .await
            .into_result()
            .map_err(DbError::Bridge)?;

        let written = response.path.unwrap_or_else(|| path.to_string());
        self.settings.set(keys::LAST_BACKUP_PATH, &written)?;
        self.settings.set(keys::LAST_BACKUP_DATE, &Utc::now())?;
        info!("Backup concluído em {}", written);
        Ok(written)
    }

    pub async fn restore(&self, path: &str) -> DbResult<()> {
        self.require_bridge()?
            .restore_database(path)
            .await
            .into_result()
            .map_err(DbError::Bridge)?;
        info!("Banco restaurado a partir de {}", path);
        Ok(())
    }
}

/// Cliente obtido por `get_client`; `release` devolve a conexão ao pool
pub struct Client<'a> {
    db: &'a Database,
    conn: Option<PoolConnection<Any>>,
}

impl Client<'_> {
    pub async fn query(&mut self, sql: &str, params: &[Value]) -> DbResult<Vec<Row>> {
        match self.conn.as_mut() {
            Some(conn) => {
                let rows = bind_all(sqlx::query(sql), params)
                    .fetch_all(&mut **conn)
                    .await?;
                rows.iter().map(row_to_json).collect()
            }
            None => self.db.query(sql, params).await,
        }
    }

    pub fn release(self) {
        if self.conn.is_some() {
            debug!("Conexão devolvida ao pool");
        }
    }
}

async fn fetch_rows(pool: &AnyPool, sql: &str, params: &[Value]) -> DbResult<Vec<Row>> {
    debug!("Executando consulta: {}", sql);
    let rows = bind_all(sqlx::query(sql), params).fetch_all(pool).await?;
    rows.iter().map(row_to_json).collect()
}

fn bind_all<'q>(
    mut query: Query<'q, Any, AnyArguments<'q>>,
    params: &[Value],
) -> Query<'q, Any, AnyArguments<'q>> {
    for param in params {
        query = match param {
            // NULL tipado como inteiro: aceito por colunas numéricas e de texto
            Value::Null => query.bind(None::<i64>),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => query.bind(i),
                None => query.bind(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => query.bind(s.clone()),
            other => query.bind(other.to_string()),
        };
    }
    query
}

fn row_to_json(row: &AnyRow) -> DbResult<Row> {
    let mut out = Row::new();
    for column in row.columns() {
        let index = column.ordinal();
        let raw = row.try_get_raw(index)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            match raw.type_info().name() {
                "BOOLEAN" => Value::from(row.try_get::<bool, _>(index)?),
                "SMALLINT" | "INTEGER" | "BIGINT" => Value::from(row.try_get::<i64, _>(index)?),
                "REAL" | "DOUBLE" => Value::from(row.try_get::<f64, _>(index)?),
                "BLOB" => Value::from(row.try_get::<Vec<u8>, _>(index)?),
                "TEXT" => Value::from(row.try_get::<String, _>(index)?),
                _ => decode_untyped(row, index)?,
            }
        };
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

fn decode_untyped(row: &AnyRow, index: usize) -> DbResult<Value> {
    if let Ok(text) = row.try_get::<String, _>(index) {
        return Ok(Value::from(text));
    }
    if let Ok(number) = row.try_get::<i64, _>(index) {
        return Ok(Value::from(number));
    }
    if let Ok(number) = row.try_get::<f64, _>(index) {
        return Ok(Value::from(number));
    }
    Ok(Value::from(row.try_get::<bool, _>(index)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::{Delete, Insert, Select, Update};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;

    fn values(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => Row::new(),
        }
    }

    fn patient_insert(cf: &str) -> Statement {
        let mut row = values(json!({
            "name": "Mario Rossi",
            "codice_fiscale": cf,
            "date_of_birth": "1980-01-01",
            "gender": "M",
            "phone": "+393331234567",
            "privacy_consent": true,
            "marketing_consent": false,
        }));
        let now = json!(Utc::now());
        row.insert("created_at".into(), now.clone());
        row.insert("updated_at".into(), now);
        Statement::Insert(Insert {
            table: Table::Patients,
            values: row,
        })
    }

    /// Ponte de teste: registra as consultas e responde com o que foi programado
    #[derive(Default)]
    struct RecordingBridge {
        fail_connect: bool,
        fail_queries: bool,
        queries: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl HostBridge for RecordingBridge {
        async fn connect_database(&self, _config: &DbConfig) -> BridgeResponse {
            if self.fail_connect {
                BridgeResponse::failure("ECONNREFUSED")
            } else {
                BridgeResponse::ok()
            }
        }

        async fn execute_query(&self, query: &str, _params: &[Value]) -> BridgeResponse {
            self.queries.lock().unwrap().push(query.to_string());
            if self.fail_queries {
                BridgeResponse::failure("bridge offline")
            } else {
                BridgeResponse::with_rows(vec![values(json!({ "id": 1 }))])
            }
        }

        async fn backup_database(&self, path: &str) -> BridgeResponse {
            BridgeResponse {
                success: true,
                path: Some(format!("{path}/backup.sql")),
                ..BridgeResponse::default()
            }
        }

        async fn restore_database(&self, _path: &str) -> BridgeResponse {
            BridgeResponse::failure("arquivo corrompido")
        }
    }

    #[tokio::test]
    async fn test_sqlite_backend_crud() -> DbResult<()> {
        let temp_dir = tempdir()?;
        let path = temp_dir.path().join("data").join("studio.db");
        let config = DbConfig::sqlite(path.to_string_lossy());
        let db = Database::new(config, Arc::new(SettingsStore::in_memory()))?;

        assert_eq!(db.connect().await?, ConnectionStatus::Connected(BackendKind::Real));
        db.initialize_database().await?;

        let inserted = db.execute(patient_insert("RSSMRA80A01H501U")).await?;
        assert_eq!(inserted.served_by, BackendKind::Real);
        let id = inserted.rows[0]["id"].as_i64().unwrap();

        let update = Update {
            table: Table::Patients,
            id,
            changes: values(json!({ "phone": "+390612345678" })),
        };
        let updated = db.execute(Statement::Update(update)).await?;
        assert_eq!(updated.rows[0]["phone"], json!("+390612345678"));

        let found = db
            .execute(Statement::Select(Select::from(Table::Patients).eq("id", id)))
            .await?;
        assert_eq!(found.rows.len(), 1);

        let deleted = db.execute(Statement::Delete(Delete::by_id(Table::Patients, id))).await?;
        assert_eq!(deleted.rows.len(), 1);
        let deleted_again = db.execute(Statement::Delete(Delete::by_id(Table::Patients, id))).await?;
        assert!(deleted_again.rows.is_empty());

        db.close().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_initialize_twice_is_idempotent() -> DbResult<()> {
        let temp_dir = tempdir()?;
        let path = temp_dir.path().join("studio.db");
        let db = Database::new(DbConfig::sqlite(path.to_string_lossy()), Arc::new(SettingsStore::in_memory()))?;

        db.initialize_database().await?;
        db.initialize_database().await?;

        let tables = db
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
                &[],
            )
            .await?;
        let names: Vec<&str> = tables.iter().filter_map(|r| r["name"].as_str()).collect();
        assert_eq!(
            names,
            vec!["appointments", "configurations", "license", "patients", "users"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_sqlite_unique_violation_propagates() -> DbResult<()> {
        let temp_dir = tempdir()?;
        let path = temp_dir.path().join("studio.db");
        let db = Database::new(DbConfig::sqlite(path.to_string_lossy()), Arc::new(SettingsStore::in_memory()))?;
        db.initialize_database().await?;

        db.execute(patient_insert("RSSMRA80A01H501U")).await?;
        let duplicate = db.execute(patient_insert("RSSMRA80A01H501U")).await;
        assert!(matches!(duplicate, Err(DbError::ConstraintViolation(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_unreachable_server_degrades_to_simulator() -> DbResult<()> {
        let config = DbConfig {
            host: "127.0.0.1".into(),
            port: 1,
            connect_timeout_secs: 1,
            ..DbConfig::default()
        };
        let db = Database::new(config, Arc::new(SettingsStore::in_memory()))?;

        let status = db.connect().await?;
        assert!(matches!(
            status,
            ConnectionStatus::Degraded { requested: BackendKind::Real, .. }
        ));
        // Idempotente
        assert_eq!(db.connect().await?, status);

        db.initialize_database().await?;
        let outcome = db.execute(patient_insert("RSSMRA80A01H501U")).await?;
        assert_eq!(outcome.served_by, BackendKind::Simulated);
        assert!(outcome.degraded.is_some());

        // SQL livre não é interpretado pelo simulador
        assert!(matches!(db.query("SELECT 1", &[]).await, Err(DbError::Unsupported(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_without_fallback() -> DbResult<()> {
        let config = DbConfig {
            host: "127.0.0.1".into(),
            port: 1,
            connect_timeout_secs: 1,
            fallback_to_simulator: false,
            ..DbConfig::default()
        };
        let db = Database::new(config, Arc::new(SettingsStore::in_memory()))?;

        let status = db.connect().await?;
        assert!(!status.is_usable());
        let result = db.execute(patient_insert("RSSMRA80A01H501U")).await;
        assert!(matches!(result, Err(DbError::ConnectionError(_))));
        Ok(())
    }

    #[test]
    fn test_configuration_errors_before_io() {
        let mut config = DbConfig::default();
        config.username = String::new();
        let result = Database::new(config, Arc::new(SettingsStore::in_memory()));
        assert!(matches!(result, Err(DbError::Configuration(_))));

        let config = DbConfig {
            backend: BackendKind::Bridge,
            ..DbConfig::default()
        };
        let result = Database::new(config, Arc::new(SettingsStore::in_memory()));
        assert!(matches!(result, Err(DbError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_bridge_initialization_issues_one_call_per_statement() -> DbResult<()> {
        let bridge = Arc::new(RecordingBridge::default());
        let config = DbConfig {
            backend: BackendKind::Bridge,
            ..DbConfig::default()
        };
        let db = Database::with_bridge(config, Arc::new(SettingsStore::in_memory()), bridge.clone())?;

        assert_eq!(db.connect().await?, ConnectionStatus::Connected(BackendKind::Bridge));
        db.initialize_database().await?;

        let issued = bridge.queries.lock().unwrap().clone();
        assert_eq!(issued.len(), schema::core_ddl(SqlDriver::Postgres).len());
        assert!(issued.iter().all(|q| q.starts_with("CREATE")));
        assert!(!issued.iter().any(|q| q.contains("BEGIN")));

        let outcome = db.execute(patient_insert("RSSMRA80A01H501U")).await?;
        assert_eq!(outcome.served_by, BackendKind::Bridge);

        // Tabelas sob demanda passam pelas chamadas dedicadas (uma vez só)
        db.ensure_table(Table::Notifications).await?;
        db.ensure_table(Table::Notifications).await?;
        let notifications_ddl = bridge
            .queries
            .lock()
            .unwrap()
            .iter()
            .filter(|q| q.contains("TABLE IF NOT EXISTS notifications"))
            .count();
        assert_eq!(notifications_ddl, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_bridge_failures_degrade_per_call() -> DbResult<()> {
        let bridge = Arc::new(RecordingBridge {
            fail_queries: true,
            ..RecordingBridge::default()
        });
        let config = DbConfig {
            backend: BackendKind::Bridge,
            ..DbConfig::default()
        };
        let db = Database::with_bridge(config, Arc::new(SettingsStore::in_memory()), bridge)?;

        let outcome = db.execute(patient_insert("RSSMRA80A01H501U")).await?;
        assert_eq!(outcome.served_by, BackendKind::Simulated);
        assert_eq!(outcome.degraded.as_deref(), Some("bridge offline"));
        assert_eq!(outcome.rows[0]["name"], json!("Mario Rossi"));
        Ok(())
    }

    #[tokio::test]
    async fn test_bridge_connect_failure_degrades() -> DbResult<()> {
        let bridge = Arc::new(RecordingBridge {
            fail_connect: true,
            ..RecordingBridge::default()
        });
        let config = DbConfig {
            backend: BackendKind::Bridge,
            ..DbConfig::default()
        };
        let db = Database::with_bridge(config, Arc::new(SettingsStore::in_memory()), bridge)?;

        match db.connect().await? {
            ConnectionStatus::Degraded { requested, reason } => {
                assert_eq!(requested, BackendKind::Bridge);
                assert!(reason.contains("ECONNREFUSED"));
            }
            other => panic!("status inesperado: {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_backup_and_restore_through_bridge() -> DbResult<()> {
        let settings = Arc::new(SettingsStore::in_memory());
        let bridge = Arc::new(RecordingBridge::default());
        let db = Database::with_bridge(DbConfig::simulated(), settings.clone(), bridge)?;

        let written = db.backup("/backups").await?;
        assert_eq!(written, "/backups/backup.sql");
        assert_eq!(
            settings.get::<String>(keys::LAST_BACKUP_PATH)?.as_deref(),
            Some("/backups/backup.sql")
        );
        assert!(settings.contains(keys::LAST_BACKUP_DATE));

        let restored = db.restore("/backups/backup.sql").await;
        assert!(matches!(restored, Err(DbError::Bridge(_))));

        // Sem ponte, operações do host não estão disponíveis
        let plain = Database::new(DbConfig::simulated(), Arc::new(SettingsStore::in_memory()))?;
        assert!(matches!(plain.backup("/x").await, Err(DbError::Unsupported(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_client_on_sqlite_and_simulator() -> DbResult<()> {
        let temp_dir = tempdir()?;
        let path = temp_dir.path().join("studio.db");
        let db = Database::new(DbConfig::sqlite(path.to_string_lossy()), Arc::new(SettingsStore::in_memory()))?;
        db.initialize_database().await?;

        let mut client = db.get_client().await?;
        let rows = client
            .query("SELECT COUNT(*) AS total FROM patients WHERE gender = $1", &[json!("M")])
            .await?;
        assert_eq!(rows[0]["total"], json!(0));
        client.release();

        let simulated = Database::new(DbConfig::simulated(), Arc::new(SettingsStore::in_memory()))?;
        let mut client = simulated.get_client().await?;
        assert!(matches!(client.query("SELECT 1", &[]).await, Err(DbError::Unsupported(_))));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_and_ensure_table_run_concurrently() -> DbResult<()> {
        let temp_dir = tempdir()?;
        let path = temp_dir.path().join("studio.db");
        let db = Database::new(DbConfig::sqlite(path.to_string_lossy()), Arc::new(SettingsStore::in_memory()))?;
        db.initialize_database().await?;

        for _ in 0..20 {
            let joined = tokio::time::timeout(Duration::from_secs(5), async {
                tokio::join!(db.close(), db.ensure_table(Table::Notifications))
            })
            .await;
            // O DDL pode perder a corrida para o pool fechado; o que importa é terminar
            let ((), _ensured) = joined.expect("close e ensure_table não podem travar");
        }

        // A fachada continua utilizável depois das disputas
        db.ensure_table(Table::Notifications).await?;
        let tables = db
            .query("SELECT name FROM sqlite_master WHERE name = 'notifications'", &[])
            .await?;
        assert_eq!(tables.len(), 1);
        Ok(())
    }
}
