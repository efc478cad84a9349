//! Query engine implementation

use std::collections::HashMap;
use std::time::Instant;

use tracing::{debug, warn};

use grizzly_common::config::QueryConfig;
use grizzly_common::error::QueryError;
use grizzly_storage::Table;

use crate::executor::{self, ExecOptions};
use crate::parser::{self, Query};
use crate::QueryResult;

/// Name-to-table lookup the executor reads from
pub trait Catalog {
    fn table(&self, name: &str) -> Option<&Table>;
}

impl Catalog for HashMap<String, Table> {
    fn table(&self, name: &str) -> Option<&Table> {
        self.get(name)
    }
}

/// A lone table answers to any name
impl Catalog for Table {
    fn table(&self, _name: &str) -> Option<&Table> {
        Some(self)
    }
}

/// Main query engine
#[derive(Debug, Clone, Default)]
pub struct QueryEngine {
    /// Configuration
    config: QueryConfig,
}

impl QueryEngine {
    /// Create a new query engine
    pub fn new(config: &QueryConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Execute query text.
    ///
    /// Never fails outright: parse and execution errors come back inside the
    /// result, which the caller must inspect with [`QueryResult::is_ok`].
    pub fn execute<C: Catalog + ?Sized>(&self, catalog: &C, text: &str) -> QueryResult {
        debug!("Executing query: {}", text);
        let started = Instant::now();

        let outcome = parser::parse(text).and_then(|query| self.run(catalog, &query));
        self.finish(outcome, started)
    }

    /// Execute an already parsed query
    pub fn execute_parsed<C: Catalog + ?Sized>(&self, catalog: &C, query: &Query) -> QueryResult {
        let started = Instant::now();
        let outcome = self.run(catalog, query);
        self.finish(outcome, started)
    }

    fn run<C: Catalog + ?Sized>(&self, catalog: &C, query: &Query) -> Result<Table, QueryError> {
        let options = ExecOptions {
            use_indexes: self.config.use_indexes,
            max_rows: self.config.max_rows,
        };
        executor::execute(query, catalog, options)
    }

    #[allow(clippy::unused_self)]
    fn finish(&self, outcome: Result<Table, QueryError>, started: Instant) -> QueryResult {
        let elapsed = started.elapsed();
        let mut result = match outcome {
            Ok(table) => {
                debug!("Query returned {} rows", table.num_rows());
                QueryResult::new(table)
            }
            Err(e) => {
                warn!("Query failed: {}", e);
                QueryResult::failed(e)
            }
        };
        result.execution_time_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        grizzly_common::metrics::record_query(elapsed.as_secs_f64() * 1000.0, !result.is_ok());
        result
    }
}
