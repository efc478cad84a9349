//! Query parser
//!
//! The grammar lives in `query.pest`. Parse failures are reported against the
//! clause they occur in, or against the unsupported clause keyword itself.

mod ast;

pub use ast::*;

use pest::error::InputLocation;
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;

use grizzly_common::error::QueryError;
use grizzly_storage::Value;

#[derive(Parser)]
#[grammar = "parser/query.pest"]
struct QueryGrammar;

/// SQL keywords that start clauses this language does not support
const UNSUPPORTED_CLAUSES: &[&str] = &[
    "HAVING", "UNION", "INTERSECT", "EXCEPT", "OFFSET", "INSERT", "UPDATE", "DELETE", "CREATE",
    "DROP", "WITH", "LEFT", "RIGHT", "FULL", "OUTER", "CROSS",
];

/// Parse query text into a [`Query`]
pub fn parse(text: &str) -> Result<Query, QueryError> {
    let mut pairs =
        QueryGrammar::parse(Rule::query, text).map_err(|e| syntax_error(text, &e))?;
    let query = pairs
        .next()
        .ok_or_else(|| QueryError::parse("SELECT", "empty query"))?;
    build_query(query)
}

fn build_query(pair: Pair<'_, Rule>) -> Result<Query, QueryError> {
    let mut projection = Projection::Star;
    let mut from = None;
    let mut joins = Vec::new();
    let mut filter = None;
    let mut group_by = Vec::new();
    let mut order_by = Vec::new();
    let mut limit = None;

    for clause in pair.into_inner() {
        match clause.as_rule() {
            Rule::select_clause => projection = build_projection(clause),
            Rule::from_clause => {
                from = clause
                    .into_inner()
                    .find(|p| p.as_rule() == Rule::table_ref)
                    .map(build_table_ref);
            }
            Rule::join_clause => joins.push(build_join(clause)?),
            Rule::where_clause => {
                if let Some(expr) = clause.into_inner().find(|p| p.as_rule() == Rule::or_expr) {
                    filter = Some(build_or(expr)?);
                }
            }
            Rule::group_clause => {
                group_by = clause
                    .into_inner()
                    .filter(|p| p.as_rule() == Rule::column_ref)
                    .map(build_column_ref)
                    .collect();
            }
            Rule::order_clause => {
                order_by = clause
                    .into_inner()
                    .filter(|p| p.as_rule() == Rule::order_item)
                    .map(build_order_item)
                    .collect();
            }
            Rule::limit_clause => {
                let text = clause
                    .into_inner()
                    .find(|p| p.as_rule() == Rule::integer)
                    .map(|p| p.as_str())
                    .unwrap_or_default();
                limit = Some(text.parse::<usize>().map_err(|_| {
                    QueryError::parse("LIMIT", format!("`{}` is not a row count", text))
                })?);
            }
            _ => {}
        }
    }

    Ok(Query {
        projection,
        from: from.ok_or_else(|| QueryError::parse("FROM", "missing table"))?,
        joins,
        filter,
        group_by,
        order_by,
        limit,
    })
}

fn build_projection(pair: Pair<'_, Rule>) -> Projection {
    let mut items = Vec::new();
    for item in pair.into_inner() {
        match item.as_rule() {
            Rule::star => return Projection::Star,
            Rule::select_item => items.push(build_select_item(item)),
            _ => {}
        }
    }
    Projection::Items(items)
}

fn build_select_item(pair: Pair<'_, Rule>) -> SelectItem {
    let mut expr = None;
    let mut alias = None;
    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::column_ref | Rule::aggregate => expr = Some(build_expr(part)),
            Rule::identifier => alias = Some(part.as_str().to_string()),
            _ => {}
        }
    }
    SelectItem {
        expr: expr.unwrap_or(Expr::Aggregate {
            func: AggFunc::Count,
            arg: AggArg::Star,
        }),
        alias,
    }
}

fn build_expr(pair: Pair<'_, Rule>) -> Expr {
    if pair.as_rule() == Rule::column_ref {
        return Expr::Column(build_column_ref(pair));
    }
    let mut func = AggFunc::Count;
    let mut arg = AggArg::Star;
    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::agg_func => {
                func = match part.as_str().to_ascii_uppercase().as_str() {
                    "SUM" => AggFunc::Sum,
                    "AVG" => AggFunc::Avg,
                    "MIN" => AggFunc::Min,
                    "MAX" => AggFunc::Max,
                    _ => AggFunc::Count,
                };
            }
            Rule::column_ref => arg = AggArg::Column(build_column_ref(part)),
            _ => {}
        }
    }
    Expr::Aggregate { func, arg }
}

fn build_column_ref(pair: Pair<'_, Rule>) -> ColumnRef {
    let parts: Vec<&str> = pair.into_inner().map(|p| p.as_str()).collect();
    match parts.as_slice() {
        [qualifier, name] => ColumnRef::qualified(*qualifier, *name),
        [name] => ColumnRef::new(*name),
        _ => ColumnRef::new(""),
    }
}

fn build_table_ref(pair: Pair<'_, Rule>) -> TableRef {
    let mut names = pair
        .into_inner()
        .filter(|p| p.as_rule() == Rule::identifier)
        .map(|p| p.as_str().to_string());
    TableRef {
        name: names.next().unwrap_or_default(),
        alias: names.next(),
    }
}

fn build_join(pair: Pair<'_, Rule>) -> Result<Join, QueryError> {
    let mut table = None;
    let mut columns = Vec::with_capacity(2);
    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::table_ref => table = Some(build_table_ref(part)),
            Rule::column_ref => columns.push(build_column_ref(part)),
            _ => {}
        }
    }
    let right = columns.pop();
    let left = columns.pop();
    match (table, left, right) {
        (Some(table), Some(left), Some(right)) => Ok(Join { table, left, right }),
        _ => Err(QueryError::parse("JOIN", "expected JOIN <table> ON <column> = <column>")),
    }
}

fn build_order_item(pair: Pair<'_, Rule>) -> OrderBy {
    let mut expr = None;
    let mut descending = false;
    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::column_ref | Rule::aggregate => expr = Some(build_expr(part)),
            Rule::desc => descending = true,
            _ => {}
        }
    }
    OrderBy {
        expr: expr.unwrap_or(Expr::Column(ColumnRef::new(""))),
        descending,
    }
}

fn build_or(pair: Pair<'_, Rule>) -> Result<Predicate, QueryError> {
    let mut result: Option<Predicate> = None;
    for part in pair.into_inner().filter(|p| p.as_rule() == Rule::and_expr) {
        let rhs = build_and(part)?;
        result = Some(match result {
            Some(lhs) => Predicate::Or(Box::new(lhs), Box::new(rhs)),
            None => rhs,
        });
    }
    result.ok_or_else(|| QueryError::parse("WHERE", "empty condition"))
}

fn build_and(pair: Pair<'_, Rule>) -> Result<Predicate, QueryError> {
    let mut result: Option<Predicate> = None;
    for part in pair.into_inner() {
        let rhs = match part.as_rule() {
            Rule::comparison => build_comparison(part)?,
            Rule::between => build_between(part)?,
            Rule::or_expr => build_or(part)?,
            _ => continue,
        };
        result = Some(match result {
            Some(lhs) => Predicate::And(Box::new(lhs), Box::new(rhs)),
            None => rhs,
        });
    }
    result.ok_or_else(|| QueryError::parse("WHERE", "empty condition"))
}

fn build_comparison(pair: Pair<'_, Rule>) -> Result<Predicate, QueryError> {
    let mut column = None;
    let mut op = CompareOp::Eq;
    let mut value = None;
    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::column_ref => column = Some(build_column_ref(part)),
            Rule::comp_op => {
                op = match part.as_str() {
                    "!=" | "<>" => CompareOp::NotEq,
                    "<" => CompareOp::Lt,
                    "<=" => CompareOp::LtEq,
                    ">" => CompareOp::Gt,
                    ">=" => CompareOp::GtEq,
                    _ => CompareOp::Eq,
                };
            }
            _ => value = Some(build_literal(part)?),
        }
    }
    match (column, value) {
        (Some(column), Some(value)) => Ok(Predicate::Compare { column, op, value }),
        _ => Err(QueryError::parse("WHERE", "expected <column> <op> <literal>")),
    }
}

fn build_between(pair: Pair<'_, Rule>) -> Result<Predicate, QueryError> {
    let mut column = None;
    let mut bounds = Vec::with_capacity(2);
    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::column_ref => column = Some(build_column_ref(part)),
            Rule::kw_between | Rule::kw_and => {}
            _ => bounds.push(build_literal(part)?),
        }
    }
    let high = bounds.pop();
    let low = bounds.pop();
    match (column, low, high) {
        (Some(column), Some(low), Some(high)) => Ok(Predicate::Between { column, low, high }),
        _ => Err(QueryError::parse("WHERE", "expected <column> BETWEEN <low> AND <high>")),
    }
}

fn build_literal(pair: Pair<'_, Rule>) -> Result<Value, QueryError> {
    let text = pair.as_str();
    match pair.as_rule() {
        Rule::integer => text
            .parse::<i64>()
            .map(Value::Int64)
            .map_err(|_| QueryError::parse("WHERE", format!("integer `{}` out of range", text))),
        Rule::float => text
            .parse::<f64>()
            .map(Value::Float64)
            .map_err(|_| QueryError::parse("WHERE", format!("invalid number `{}`", text))),
        Rule::string => Ok(Value::Utf8(
            pair.into_inner()
                .next()
                .map(|inner| inner.as_str().replace("''", "'"))
                .unwrap_or_default(),
        )),
        Rule::kw_null => Ok(Value::Null),
        _ => Err(QueryError::parse("WHERE", format!("unexpected literal `{}`", text))),
    }
}

/// Map a pest failure to the clause it happened in
fn syntax_error(text: &str, err: &pest::error::Error<Rule>) -> QueryError {
    let pos = match err.location {
        InputLocation::Pos(p) | InputLocation::Span((p, _)) => p,
    };
    let word = word_at(text, pos);
    let upper = word.to_ascii_uppercase();
    if UNSUPPORTED_CLAUSES.contains(&upper.as_str()) {
        return QueryError::parse(upper, "clause is not supported");
    }
    let message = if word.is_empty() {
        "unexpected end of query".to_string()
    } else {
        format!("unexpected `{}`", word)
    };
    QueryError::parse(clause_at(text, pos), message)
}

/// The token starting at `pos`: a word, or a single other character
fn word_at(text: &str, pos: usize) -> &str {
    let rest = text.get(pos..).unwrap_or_default().trim_start();
    let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    if end > 0 {
        &rest[..end]
    } else {
        rest.chars().next().map_or("", |c| &rest[..c.len_utf8()])
    }
}

/// Last clause keyword before `pos`, ignoring string literals
fn clause_at(text: &str, pos: usize) -> &'static str {
    let mut clause = "SELECT";
    let mut in_string = false;
    let mut word = String::new();
    for c in text.get(..pos).unwrap_or(text).chars().chain(std::iter::once(' ')) {
        if c == '\'' {
            in_string = !in_string;
        }
        if !in_string && (c.is_ascii_alphanumeric() || c == '_') {
            word.push(c.to_ascii_uppercase());
            continue;
        }
        clause = match word.as_str() {
            "SELECT" => "SELECT",
            "FROM" => "FROM",
            "JOIN" | "ON" => "JOIN",
            "WHERE" => "WHERE",
            "GROUP" => "GROUP BY",
            "ORDER" => "ORDER BY",
            "LIMIT" => "LIMIT",
            _ => clause,
        };
        word.clear();
    }
    clause
}
