//! Parsed SQL shapes. The parser produces these; the binder consumes them.
//! Subqueries own their inner SELECT node and are deep-cloned when an
//! expression tree is copied.

use crate::expr::{CompOp, Expr};
use crate::table::{ColumnSpec, StorageFormat};
use crate::value::Value;

/// One parsed SQL command.
#[derive(Clone, Debug)]
pub enum SqlCommand {
    CreateTable(CreateTableNode),
    DropTable { table: String },
    CreateIndex(CreateIndexNode),
    DropIndex { table: String, index: String },
    ShowTables,
    ShowIndex { table: String },
    Desc { table: String },
    Insert(InsertNode),
    Select(SelectSqlNode),
    Update(UpdateNode),
    Delete(DeleteNode),
    Explain(Box<SqlCommand>),
    Set { name: String, value: Value },
    Calc { expressions: Vec<Expr> },
    Begin,
    Commit,
    Rollback,
    LoadData { file: String, table: String },
    Analyze { table: String },
    Help,
    Exit,
}

#[derive(Clone, Debug)]
pub struct CreateTableNode {
    pub table: String,
    pub columns: Vec<ColumnSpec>,
    pub storage_format: StorageFormat,
}

#[derive(Clone, Debug)]
pub struct CreateIndexNode {
    pub index: String,
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

#[derive(Clone, Debug)]
pub struct InsertNode {
    pub table: String,
    pub rows: Vec<Vec<Value>>,
}

/// A SELECT, also reused as the inner node of subqueries.
#[derive(Clone, Debug, Default)]
pub struct SelectSqlNode {
    pub expressions: Vec<Expr>,
    pub relations: Vec<String>,
    pub joins: Vec<JoinSqlNode>,
    pub conditions: Vec<ConditionSqlNode>,
    pub group_by: Vec<Expr>,
    pub having: Vec<ConditionSqlNode>,
}

#[derive(Clone, Debug)]
pub struct JoinSqlNode {
    pub relation: String,
    pub conditions: Vec<ConditionSqlNode>,
}

/// The operator of one WHERE/ON/HAVING condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CondOp {
    Comp(CompOp),
    In { not: bool },
    Exists { not: bool },
    IsNull { not: bool },
}

/// Right-hand side of a condition.
#[derive(Clone, Debug)]
pub enum CondRhs {
    Expr(Expr),
    ValueList(Vec<Value>),
    Subquery(Box<SelectSqlNode>),
    None,
}

/// One conjunct of a WHERE/ON/HAVING clause. `left` is absent only for
/// EXISTS conditions.
#[derive(Clone, Debug)]
pub struct ConditionSqlNode {
    pub left: Option<Expr>,
    pub op: CondOp,
    pub rhs: CondRhs,
}

#[derive(Clone, Debug)]
pub struct UpdateNode {
    pub table: String,
    pub assignments: Vec<(String, Expr)>,
    pub conditions: Vec<ConditionSqlNode>,
}

#[derive(Clone, Debug)]
pub struct DeleteNode {
    pub table: String,
    pub conditions: Vec<ConditionSqlNode>,
}
