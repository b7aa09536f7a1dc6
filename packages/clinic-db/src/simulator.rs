//! Simulador de banco de dados em memória
//!
//! Substitui o backend relacional quando nenhum está acessível. Executa os
//! comandos tipados de `statement` diretamente sobre tabelas em memória e
//! persiste o snapshot no armazenamento local a cada operação.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::schema::Table;
use crate::settings::{keys, SettingsStore};
use crate::statement::{Comparison, Delete, Insert, Order, Row, Select, Statement, Update};

/// Conteúdo persistido do simulador
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub tables: BTreeMap<String, Vec<Row>>,
    /// Último id emitido por tabela; ids nunca são reutilizados
    pub sequences: BTreeMap<String, i64>,
}

impl Snapshot {
    pub fn rows(&self, table: Table) -> &[Row] {
        self.tables.get(table.name()).map(Vec::as_slice).unwrap_or(&[])
    }

    fn rows_mut(&mut self, table: Table) -> &mut Vec<Row> {
        self.tables.entry(table.name().to_string()).or_default()
    }

    fn next_id(&mut self, table: Table) -> i64 {
        let seq = self.sequences.entry(table.name().to_string()).or_insert(0);
        *seq += 1;
        *seq
    }
}

/// Armazenamento tipado em memória com persistência local
#[derive(Debug)]
pub struct MemoryStore {
    settings: Arc<SettingsStore>,
    snapshot: Mutex<Snapshot>,
}

impl MemoryStore {
    pub fn new(settings: Arc<SettingsStore>) -> Self {
        Self {
            settings,
            snapshot: Mutex::new(Snapshot::default()),
        }
    }

    /// Executa um comando tipado e devolve as linhas resultantes
    pub async fn execute(&self, statement: &Statement) -> DbResult<Vec<Row>> {
        match statement {
            Statement::Insert(insert) => self.insert(insert).await.map(|row| vec![row]),
            Statement::Select(select) => self.select(select).await,
            Statement::Update(update) => self.update(update).await.map(|row| row.into_iter().collect()),
            Statement::Delete(delete) => {
                let removed = self.delete(delete).await?;
                Ok(if removed {
                    let mut row = Row::new();
                    row.insert("id".to_string(), Value::from(delete.id));
                    vec![row]
                } else {
                    Vec::new()
                })
            }
        }
    }

    /// Garante que as tabelas existam no snapshot (idempotente)
    pub async fn ensure_tables(&self, tables: &[Table]) -> DbResult<()> {
        let mut snapshot = self.snapshot.lock().await;
        self.reload(&mut snapshot)?;
        let mut created = false;
        for table in tables {
            if !snapshot.tables.contains_key(table.name()) {
                snapshot.tables.insert(table.name().to_string(), Vec::new());
                created = true;
            }
        }
        if created {
            self.persist(&snapshot)?;
        }
        Ok(())
    }

    pub async fn insert(&self, insert: &Insert) -> DbResult<Row> {
        let mut snapshot = self.snapshot.lock().await;
        self.reload(&mut snapshot)?;

        check_unique(snapshot.rows(insert.table), insert.table, &insert.values, None)?;
        if let Some((parent, foreign_key)) = insert.table.parent() {
            check_parent(&snapshot, parent, insert.values.get(foreign_key))?;
        }

        let id = snapshot.next_id(insert.table);
        let mut row = Row::new();
        row.insert("id".to_string(), Value::from(id));
        for (column, value) in &insert.values {
            row.insert(column.clone(), value.clone());
        }
        snapshot.rows_mut(insert.table).push(row.clone());

        self.persist(&snapshot)?;
        debug!("Simulador: inserido {} id={}", insert.table, id);
        Ok(row)
    }

    pub async fn select(&self, select: &Select) -> DbResult<Vec<Row>> {
        let mut snapshot = self.snapshot.lock().await;
        self.reload(&mut snapshot)?;

        let mut rows: Vec<Row> = snapshot
            .rows(select.table)
            .iter()
            .filter(|row| {
                select.filters.iter().all(|filter| {
                    let value = row.get(filter.column).unwrap_or(&Value::Null);
                    let ordering = compare(value, &filter.value);
                    match filter.comparison {
                        Comparison::Eq => ordering == Ordering::Equal,
                        Comparison::Gte => ordering != Ordering::Less,
                        Comparison::Lte => ordering != Ordering::Greater,
                    }
                })
            })
            .cloned()
            .collect();

        rows.sort_by(|a, b| {
            for (column, order) in &select.order_by {
                let left = a.get(*column).unwrap_or(&Value::Null);
                let right = b.get(*column).unwrap_or(&Value::Null);
                let ordering = match order {
                    Order::Asc => compare(left, right),
                    Order::Desc => compare(right, left),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });

        if let Some(limit) = select.limit {
            rows.truncate(limit as usize);
        }

        if let Some(join) = &select.join {
            let joined = snapshot.rows(join.table);
            for row in rows.iter_mut() {
                let key = row.get(join.foreign_key).cloned().unwrap_or(Value::Null);
                let matched = joined.iter().find(|candidate| {
                    candidate
                        .get("id")
                        .is_some_and(|id| compare(id, &key) == Ordering::Equal)
                });
                for (column, alias) in &join.columns {
                    let value = matched
                        .and_then(|m| m.get(*column))
                        .cloned()
                        .unwrap_or(Value::Null);
                    row.insert(alias.to_string(), value);
                }
            }
        }

        Ok(rows)
    }

    pub async fn update(&self, update: &Update) -> DbResult<Option<Row>> {
        let mut snapshot = self.snapshot.lock().await;
        self.reload(&mut snapshot)?;

        let Some(position) = position_of(snapshot.rows(update.table), update.id) else {
            return Ok(None);
        };
        check_unique(snapshot.rows(update.table), update.table, &update.changes, Some(update.id))?;

        let rows = snapshot.rows_mut(update.table);
        let row = &mut rows[position];
        for (column, value) in &update.changes {
            row.insert(column.clone(), value.clone());
        }
        let updated = row.clone();

        self.persist(&snapshot)?;
        Ok(Some(updated))
    }

    /// Remove a linha e, em cascata, as linhas filhas (mesma regra do schema)
    pub async fn delete(&self, delete: &Delete) -> DbResult<bool> {
        let mut snapshot = self.snapshot.lock().await;
        self.reload(&mut snapshot)?;

        let Some(position) = position_of(snapshot.rows(delete.table), delete.id) else {
            return Ok(false);
        };
        snapshot.rows_mut(delete.table).remove(position);

        let key = Value::from(delete.id);
        for child in Table::CORE.iter().chain(Table::ON_DEMAND.iter()) {
            if let Some((parent, foreign_key)) = child.parent() {
                if parent == delete.table {
                    if let Some(rows) = snapshot.tables.get_mut(child.name()) {
                        rows.retain(|row| {
                            row.get(foreign_key)
                                .map_or(true, |fk| compare(fk, &key) != Ordering::Equal)
                        });
                    }
                }
            }
        }

        self.persist(&snapshot)?;
        debug!("Simulador: removido {} id={}", delete.table, delete.id);
        Ok(true)
    }

    /// Cópia do estado atual (após recarregar do armazenamento local)
    pub async fn snapshot(&self) -> DbResult<Snapshot> {
        let mut snapshot = self.snapshot.lock().await;
        self.reload(&mut snapshot)?;
        Ok(snapshot.clone())
    }

    fn reload(&self, snapshot: &mut Snapshot) -> DbResult<()> {
        if let Some(saved) = self.settings.get::<Snapshot>(keys::SIMULATED_DATABASE)? {
            *snapshot = saved;
        }
        Ok(())
    }

    fn persist(&self, snapshot: &Snapshot) -> DbResult<()> {
        self.settings.set(keys::SIMULATED_DATABASE, snapshot)
    }
}

fn position_of(rows: &[Row], id: i64) -> Option<usize> {
    rows.iter()
        .position(|row| row.get("id").and_then(Value::as_i64) == Some(id))
}

fn check_unique(rows: &[Row], table: Table, candidate: &Row, skip_id: Option<i64>) -> DbResult<()> {
    for column in table.unique_columns() {
        let Some(value) = candidate.get(*column) else {
            continue;
        };
        let clash = rows.iter().any(|row| {
            let same_row = skip_id.is_some() && row.get("id").and_then(Value::as_i64) == skip_id;
            !same_row
                && row
                    .get(*column)
                    .is_some_and(|existing| compare(existing, value) == Ordering::Equal)
        });
        if clash {
            return Err(DbError::ConstraintViolation(format!(
                "{}.{} duplicado: {}",
                table, column, value
            )));
        }
    }
    Ok(())
}

fn check_parent(snapshot: &Snapshot, parent: Table, key: Option<&Value>) -> DbResult<()> {
    let key = key.unwrap_or(&Value::Null);
    let exists = snapshot.rows(parent).iter().any(|row| {
        row.get("id")
            .is_some_and(|id| compare(id, key) == Ordering::Equal)
    });
    if exists {
        Ok(())
    } else {
        Err(DbError::ConstraintViolation(format!(
            "referência inexistente em {}: {}",
            parent, key
        )))
    }
}

/// Ordenação total entre valores JSON (nulos primeiro, números pelo valor)
fn compare(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
