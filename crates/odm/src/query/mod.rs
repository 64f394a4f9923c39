//! Query Builder Module - fluent predicate/projection builder compiled into
//! aggregation pipelines

pub mod builder;
pub mod execution;
pub mod pagination;
pub mod stage;
pub mod types;
pub mod where_clause;

pub use builder::QueryBuilder;
pub use execution::Aggregate;
pub use pagination::{ForPage, Paginated};
pub use stage::{pipeline_to_value, Lookup, Stage};
pub use types::{Connector, OrderByClause, QueryOperator, SortDirection, WhereCondition, WhereTerm};
