//! Comandos tipados e sua renderização em SQL parametrizado
//!
//! Os modelos descrevem o que querem com `Insert`, `Select`, `Update` e
//! `Delete`. Os backends SQL recebem o texto com placeholders `$1, $2, ...`;
//! o simulador executa a estrutura diretamente, sem interpretar SQL.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{DbError, DbResult};
use crate::schema::Table;

/// Linha de resultado: nome da coluna -> valor
pub type Row = Map<String, Value>;

/// Texto SQL e parâmetros posicionais
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Gte,
    Lte,
}

impl Comparison {
    fn operator(&self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Gte => ">=",
            Comparison::Lte => "<=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: &'static str,
    pub comparison: Comparison,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// LEFT JOIN pela coluna `id` da tabela unida
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub table: Table,
    pub foreign_key: &'static str,
    /// (coluna da tabela unida, alias no resultado)
    pub columns: Vec<(&'static str, &'static str)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub table: Table,
    pub values: Row,
}

impl Insert {
    /// Monta o INSERT a partir de um registro serializável, carimbando
    /// `created_at` e `updated_at`
    pub fn record<T: Serialize>(table: Table, record: &T, now: DateTime<Utc>) -> DbResult<Self> {
        let mut values = to_columns(record)?;
        let stamp = serde_json::to_value(now)?;
        values.insert("created_at".to_string(), stamp.clone());
        values.insert("updated_at".to_string(), stamp);
        Ok(Self { table, values })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub table: Table,
    pub filters: Vec<Filter>,
    pub join: Option<Join>,
    pub order_by: Vec<(&'static str, Order)>,
    pub limit: Option<u32>,
}

impl Select {
    pub fn from(table: Table) -> Self {
        Self {
            table,
            filters: Vec::new(),
            join: None,
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn filter(mut self, column: &'static str, comparison: Comparison, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            column,
            comparison,
            value: value.into(),
        });
        self
    }

    pub fn eq(self, column: &'static str, value: impl Into<Value>) -> Self {
        self.filter(column, Comparison::Eq, value)
    }

    pub fn gte(self, column: &'static str, value: impl Into<Value>) -> Self {
        self.filter(column, Comparison::Gte, value)
    }

    pub fn lte(self, column: &'static str, value: impl Into<Value>) -> Self {
        self.filter(column, Comparison::Lte, value)
    }

    pub fn join(mut self, join: Join) -> Self {
        self.join = Some(join);
        self
    }

    pub fn order_by(mut self, column: &'static str, order: Order) -> Self {
        self.order_by.push((column, order));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// UPDATE parcial: só as colunas informadas mudam, mais `updated_at`
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub table: Table,
    pub id: i64,
    pub changes: Row,
}

impl Update {
    /// Gera as atribuições a partir de uma estrutura parcial cujos campos
    /// `None` são omitidos na serialização
    pub fn partial<T: Serialize>(table: Table, id: i64, partial: &T, now: DateTime<Utc>) -> DbResult<Self> {
        let mut changes = to_columns(partial)?;
        changes.remove("id");
        changes.remove("created_at");
        changes.insert("updated_at".to_string(), serde_json::to_value(now)?);
        Ok(Self { table, id, changes })
    }

    pub fn set(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.changes.insert(column.to_string(), normalize(value.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub table: Table,
    pub id: i64,
}

impl Delete {
    pub fn by_id(table: Table, id: i64) -> Self {
        Self { table, id }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Insert(Insert),
    Select(Select),
    Update(Update),
    Delete(Delete),
}

impl Statement {
    pub fn table(&self) -> Table {
        match self {
            Statement::Insert(s) => s.table,
            Statement::Select(s) => s.table,
            Statement::Update(s) => s.table,
            Statement::Delete(s) => s.table,
        }
    }

    /// Renderiza o comando com placeholders posicionais
    pub fn to_sql(&self) -> SqlQuery {
        match self {
            Statement::Insert(insert) => {
                let table = insert.table.name();
                let columns: Vec<&str> = insert.values.keys().map(String::as_str).collect();
                let placeholders: Vec<String> =
                    (1..=columns.len()).map(|n| format!("${n}")).collect();
                SqlQuery {
                    sql: format!(
                        "INSERT INTO {table} ({}) VALUES ({}) RETURNING *",
                        columns.join(", "),
                        placeholders.join(", ")
                    ),
                    params: insert.values.values().cloned().collect(),
                }
            }
            Statement::Select(select) => render_select(select),
            Statement::Update(update) => {
                let table = update.table.name();
                let mut params = Vec::with_capacity(update.changes.len() + 1);
                let assignments: Vec<String> = update
                    .changes
                    .iter()
                    .map(|(column, value)| {
                        params.push(value.clone());
                        format!("{column} = ${}", params.len())
                    })
                    .collect();
                params.push(Value::from(update.id));
                SqlQuery {
                    sql: format!(
                        "UPDATE {table} SET {} WHERE id = ${} RETURNING *",
                        assignments.join(", "),
                        params.len()
                    ),
                    params,
                }
            }
            Statement::Delete(delete) => SqlQuery {
                sql: format!("DELETE FROM {} WHERE id = $1 RETURNING id", delete.table.name()),
                params: vec![Value::from(delete.id)],
            },
        }
    }
}

fn render_select(select: &Select) -> SqlQuery {
    let table = select.table.name();
    let mut sql = format!("SELECT {table}.*");

    if let Some(join) = &select.join {
        for (column, alias) in &join.columns {
            sql.push_str(&format!(", {}.{column} AS {alias}", join.table.name()));
        }
    }
    sql.push_str(&format!(" FROM {table}"));
    if let Some(join) = &select.join {
        let joined = join.table.name();
        sql.push_str(&format!(
            " LEFT JOIN {joined} ON {joined}.id = {table}.{}",
            join.foreign_key
        ));
    }

    let mut params = Vec::with_capacity(select.filters.len());
    if !select.filters.is_empty() {
        let conditions: Vec<String> = select
            .filters
            .iter()
            .map(|filter| {
                params.push(filter.value.clone());
                format!(
                    "{table}.{} {} ${}",
                    filter.column,
                    filter.comparison.operator(),
                    params.len()
                )
            })
            .collect();
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }

    if !select.order_by.is_empty() {
        let order: Vec<String> = select
            .order_by
            .iter()
            .map(|(column, order)| match order {
                Order::Asc => format!("{table}.{column} ASC"),
                Order::Desc => format!("{table}.{column} DESC"),
            })
            .collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&order.join(", "));
    }

    if let Some(limit) = select.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }

    SqlQuery { sql, params }
}

/// Serializa um registro em colunas; listas e objetos viram texto JSON
fn to_columns<T: Serialize>(record: &T) -> DbResult<Row> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map.into_iter().map(|(k, v)| (k, normalize(v))).collect()),
        other => Err(DbError::InternalError(format!(
            "registro deveria ser um objeto, recebido {other}"
        ))),
    }
}

fn normalize(value: Value) -> Value {
    match value {
        Value::Array(_) | Value::Object(_) => Value::String(value.to_string()),
        other => other,
    }
}
