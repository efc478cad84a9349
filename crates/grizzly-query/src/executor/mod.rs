//! Fixed-pipeline query execution
//!
//! Stages run in a fixed order: scan, join, filter, group/aggregate, order,
//! limit, project. Rows flow between stages as tuples of row positions (one
//! per source table) so joins never copy column data until projection.

mod aggregate;
mod filter;
mod join;
mod sort;

use grizzly_common::error::QueryError;
use grizzly_common::types::RowId;
use grizzly_storage::{Column, DataType, Field, Schema, Table, Value};
use tracing::debug;

use crate::engine::Catalog;
use crate::parser::{ColumnRef, Expr, Projection, Query};

/// Execution knobs taken from query configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecOptions {
    pub use_indexes: bool,
    pub max_rows: Option<usize>,
}

/// A table taking part in the query, under its qualifier
pub(crate) struct Source<'a> {
    pub qualifier: String,
    pub table: &'a Table,
}

/// Position of a resolved column: which source, which column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Slot {
    pub source: usize,
    pub column: usize,
}

/// Intermediate result: source tables plus surviving row tuples
pub(crate) struct Relation<'a> {
    pub sources: Vec<Source<'a>>,
    pub rows: Vec<Vec<RowId>>,
}

impl<'a> Relation<'a> {
    /// Every row of one table
    pub fn scan(qualifier: &str, table: &'a Table) -> Self {
        Self {
            sources: vec![Source {
                qualifier: qualifier.to_string(),
                table,
            }],
            rows: (0..table.num_rows()).map(|r| vec![r]).collect(),
        }
    }

    pub fn is_joined(&self) -> bool {
        self.sources.len() > 1
    }

    /// Find a column; unqualified names must match exactly one source
    pub fn resolve(&self, column: &ColumnRef) -> Result<Slot, QueryError> {
        let mut found = None;
        for (i, source) in self.sources.iter().enumerate() {
            if column
                .qualifier
                .as_deref()
                .is_some_and(|q| q != source.qualifier)
            {
                continue;
            }
            if let Ok(c) = source.table.schema().index_of(&column.name) {
                if found.is_some() {
                    return Err(QueryError::AmbiguousColumn(column.to_string()));
                }
                found = Some(Slot {
                    source: i,
                    column: c,
                });
            }
        }
        found.ok_or_else(|| QueryError::ColumnNotFound(column.to_string()))
    }

    pub fn column(&self, slot: Slot) -> &'a Column {
        &self.sources[slot.source].table.columns()[slot.column]
    }

    pub fn field(&self, slot: Slot) -> &'a Field {
        &self.sources[slot.source].table.schema().fields()[slot.column]
    }

    pub fn data_type(&self, slot: Slot) -> DataType {
        self.field(slot).data_type
    }

    /// Logical value of `slot` in one tuple
    pub fn value(&self, slot: Slot, tuple: &[RowId]) -> Value {
        self.column(slot)
            .get(tuple[slot.source])
            .unwrap_or(Value::Null)
    }

    /// Output name of a column under `SELECT *`
    fn star_name(&self, slot: Slot) -> String {
        let name = &self.field(slot).name;
        if self.is_joined() {
            format!("{}.{}", self.sources[slot.source].qualifier, name)
        } else {
            name.clone()
        }
    }

    fn all_slots(&self) -> Vec<Slot> {
        self.sources
            .iter()
            .enumerate()
            .flat_map(|(source, s)| {
                (0..s.table.num_columns()).map(move |column| Slot { source, column })
            })
            .collect()
    }
}

/// Run a parsed query against `catalog`
pub fn execute<C: Catalog + ?Sized>(
    query: &Query,
    catalog: &C,
    options: ExecOptions,
) -> Result<Table, QueryError> {
    let base = catalog
        .table(&query.from.name)
        .ok_or_else(|| QueryError::TableNotFound(query.from.name.clone()))?;
    let mut relation = Relation::scan(query.from.qualifier(), base);

    for clause in &query.joins {
        let right = catalog
            .table(&clause.table.name)
            .ok_or_else(|| QueryError::TableNotFound(clause.table.name.clone()))?;
        relation = join::nested_loop(relation, clause, right)?;
        debug!("Join with {} produced {} rows", clause.table.name, relation.rows.len());
    }

    if let Some(predicate) = &query.filter {
        relation.rows = filter::apply(&relation, predicate, options.use_indexes)?;
    }

    let mut output = if query.is_aggregate() {
        let grouped = aggregate::group(&relation, query)?;
        let mut grouped = sort::order_output(grouped, query)?;
        if let Some(n) = query.limit {
            grouped = truncate(&grouped, n)?;
        }
        grouped
    } else {
        sort::order_rows(&mut relation, query)?;
        if let Some(n) = query.limit {
            relation.rows.truncate(n);
        }
        project(&relation, &query.projection)?
    };

    if let Some(max) = options.max_rows {
        if output.num_rows() > max {
            debug!("Capping result at {} rows", max);
            output = truncate(&output, max)?;
        }
    }
    Ok(output)
}

fn truncate(table: &Table, n: usize) -> Result<Table, QueryError> {
    if table.num_rows() <= n {
        return Ok(table.clone());
    }
    let rows: Vec<RowId> = (0..n).collect();
    table.take(&rows).map_err(execution_error)
}

/// Materialize the selected columns of every tuple
fn project(relation: &Relation<'_>, projection: &Projection) -> Result<Table, QueryError> {
    let columns: Vec<(String, Slot)> = match projection {
        Projection::Star => relation
            .all_slots()
            .into_iter()
            .map(|slot| (relation.star_name(slot), slot))
            .collect(),
        Projection::Items(items) => {
            let mut columns = Vec::with_capacity(items.len());
            for item in items {
                let Expr::Column(column) = &item.expr else {
                    return Err(QueryError::InvalidGrouping(format!(
                        "{} outside an aggregate query",
                        item.expr
                    )));
                };
                columns.push((item.output_name(), relation.resolve(column)?));
            }
            columns
        }
    };

    let mut fields = Vec::with_capacity(columns.len());
    let mut data = Vec::with_capacity(columns.len());
    for (name, slot) in columns {
        let source = relation.column(slot);
        let mut column = Column::new(source.data_type());
        for tuple in &relation.rows {
            column
                .push(relation.value(slot, tuple))
                .map_err(|e| QueryError::ExecutionError(e.to_string()))?;
        }
        fields.push(Field::new(name, source.data_type()));
        data.push(column);
    }
    build_table(fields, data)
}

pub(crate) fn build_table(fields: Vec<Field>, columns: Vec<Column>) -> Result<Table, QueryError> {
    let schema = Schema::new(fields)
        .map_err(|e| QueryError::ExecutionError(format!("output columns: {}", e)))?;
    Table::from_columns(schema, columns).map_err(execution_error)
}

pub(crate) fn execution_error(e: grizzly_common::Error) -> QueryError {
    match e {
        grizzly_common::Error::Query(q) => q,
        other => QueryError::ExecutionError(other.to_string()),
    }
}
