//! Usuários do sistema (login)

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{fetch_all, fetch_first, now, require};
use crate::database::Database;
use crate::error::{DbError, DbResult};
use crate::schema::Table;
use crate::statement::{Delete, Insert, Order, Select, Statement, Update};

/// Perfil de acesso
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Medico,
    Assistente,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Medico => write!(f, "Medico"),
            Role::Assistente => write!(f, "Assistente"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    /// Hash Argon2 em formato PHC; nunca é serializado para fora
    #[serde(skip_serializing)]
    pub password: String,
    pub full_name: String,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_medico(&self) -> bool {
        self.role == Role::Medico
    }
}

/// Dados de cadastro; `password` é a senha em texto claro
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub full_name: String,
    pub email: String,
    pub role: Role,
}

#[derive(Serialize)]
struct UserRecord<'a> {
    username: &'a str,
    password: String,
    full_name: &'a str,
    email: &'a str,
    role: Role,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    /// Nova senha em texto claro; gravada como hash
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

fn hash_password(password: &str) -> DbResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| DbError::InternalError(format!("falha ao gerar hash da senha: {e}")))
}

fn verify_password(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            warn!("Hash de senha ilegível: {}", e);
            false
        }
    }
}

fn validate_email(email: &str) -> DbResult<()> {
    require("email", email)?;
    if !email.contains('@') {
        return Err(DbError::Validation(format!("email inválido: {email}")));
    }
    Ok(())
}

pub struct UserModel {
    db: Arc<Database>,
}

impl UserModel {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn create(&self, user: NewUser) -> DbResult<User> {
        require("username", &user.username)?;
        require("password", &user.password)?;
        require("full_name", &user.full_name)?;
        validate_email(&user.email)?;

        let record = UserRecord {
            username: user.username.trim(),
            password: hash_password(&user.password)?,
            full_name: &user.full_name,
            email: user.email.trim(),
            role: user.role,
        };
        let insert = Insert::record(Table::Users, &record, now())?;
        let created: User = fetch_first(&self.db, Statement::Insert(insert))
            .await
            .map_err(|e| {
                error!("Erro ao criar usuário {}: {}", user.username, e);
                e
            })?
            .ok_or_else(|| DbError::InternalError("INSERT sem linha de retorno".into()))?;

        info!("Usuário criado: {} ({})", created.username, created.role);
        Ok(created)
    }

    pub async fn find_by_id(&self, id: i64) -> DbResult<Option<User>> {
        fetch_first(&self.db, Statement::Select(Select::from(Table::Users).eq("id", id))).await
    }

    pub async fn find_by_username(&self, username: &str) -> DbResult<Option<User>> {
        fetch_first(
            &self.db,
            Statement::Select(Select::from(Table::Users).eq("username", username.trim())),
        )
        .await
    }

    pub async fn find_all(&self) -> DbResult<Vec<User>> {
        fetch_all(
            &self.db,
            Statement::Select(Select::from(Table::Users).order_by("username", Order::Asc)),
        )
        .await
    }

    /// Login: devolve o usuário se a senha confere
    pub async fn authenticate(&self, username: &str, password: &str) -> DbResult<Option<User>> {
        let Some(user) = self.find_by_username(username).await? else {
            return Ok(None);
        };
        if verify_password(password, &user.password) {
            info!("Login efetuado: {}", user.username);
            Ok(Some(user))
        } else {
            warn!("Senha incorreta para {}", username);
            Ok(None)
        }
    }

    pub async fn update(&self, id: i64, mut changes: UserUpdate) -> DbResult<Option<User>> {
        if self.find_by_id(id).await?.is_none() {
            return Ok(None);
        }

        if let Some(email) = &changes.email {
            validate_email(email)?;
        }
        if let Some(password) = changes.password.take() {
            require("password", &password)?;
            changes.password = Some(hash_password(&password)?);
        }

        let update = Update::partial(Table::Users, id, &changes, now())?;
        fetch_first(&self.db, Statement::Update(update)).await
    }

    pub async fn delete(&self, id: i64) -> DbResult<bool> {
        let outcome = self
            .db
            .execute(Statement::Delete(Delete::by_id(Table::Users, id)))
            .await?;
        Ok(!outcome.rows.is_empty())
    }
}
