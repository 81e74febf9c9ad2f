//! One client session: settings, the current transaction, the subquery
//! executor, and the driver that takes SQL text through
//! parse → bind → logical plan → rewrite → physical plan → execution.
//! DDL and utility statements are executed here directly.

use crate::ast::SqlCommand;
use crate::db::{Db, DbPtr};
use crate::operator::{BoxedOperator, TrxRef};
use crate::parse::parse_sql;
use crate::physical::{create_physical_plan, create_physical_plan_vec, PlannerContext};
use crate::plan::{create_logical_plan, set_session_context_recursive};
use crate::rc::{DbError, Result};
use crate::rewrite::rewrite;
use crate::stmt::Stmt;
use crate::subquery::{SubqueryContext, SubqueryExecutor};
use crate::trx::VanillaTrx;
use crate::types;
use crate::value::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

/// Result of one executed command.
#[derive(Debug, Default)]
pub struct ResultSet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    fn empty() -> ResultSet {
        ResultSet::default()
    }

    fn message(text: &str) -> ResultSet {
        ResultSet {
            headers: vec!["Message".to_string()],
            rows: vec![vec![Value::from_str(text)]],
        }
    }

    /// Rows rendered to display strings.
    pub fn display_rows(&self) -> Vec<Vec<String>> {
        self.rows
            .iter()
            .map(|r| r.iter().map(|v| v.get_string()).collect())
            .collect()
    }
}

/// A single-threaded client session over one database.
pub struct Session {
    db: DbPtr,
    trx: TrxRef,
    hash_join_on: Cell<bool>,
    variables: RefCell<HashMap<String, Value>>,
    subqueries: Rc<RefCell<SubqueryExecutor>>,
    in_transaction: Cell<bool>,
}

impl Session {
    pub fn new(db: DbPtr) -> Session {
        Session {
            db,
            trx: Rc::new(VanillaTrx),
            hash_join_on: Cell::new(false),
            variables: RefCell::new(HashMap::new()),
            subqueries: Rc::new(RefCell::new(SubqueryExecutor::default())),
            in_transaction: Cell::new(false),
        }
    }

    /// Open (or create) a database directory and start a session on it.
    pub fn open(dir: &Path) -> Result<Session> {
        Ok(Session::new(Db::open(dir)?))
    }

    pub fn db(&self) -> &DbPtr {
        &self.db
    }

    /// Whether the session plans hash joins for equi-joins.
    pub fn hash_join_on(&self) -> bool {
        self.hash_join_on.get()
    }

    fn subquery_context(&self) -> SubqueryContext {
        SubqueryContext {
            db: self.db.clone(),
            executor: self.subqueries.clone(),
            trx: self.trx.clone(),
        }
    }

    /// Run a batch of SQL; one result set per command.
    pub fn execute_sql(&self, sql: &str) -> Result<Vec<ResultSet>> {
        let commands = parse_sql(sql)?;
        let mut results = Vec::with_capacity(commands.len());
        for cmd in &commands {
            results.push(self.execute_command(cmd)?);
        }
        Ok(results)
    }

    /// Run a batch and keep only the last result (convenient in tests).
    pub fn execute_one(&self, sql: &str) -> Result<ResultSet> {
        let mut results = self.execute_sql(sql)?;
        results.pop().ok_or_else(|| DbError::InvalidArgument("empty statement".into()))
    }

    fn execute_command(&self, cmd: &SqlCommand) -> Result<ResultSet> {
        match cmd {
            SqlCommand::CreateTable(node) => {
                self.db.create_table(&node.table, &node.columns, node.storage_format)?;
                Ok(ResultSet::empty())
            }
            SqlCommand::DropTable { table } => {
                self.db.drop_table(table)?;
                self.subqueries.borrow_mut().clear_cache();
                Ok(ResultSet::empty())
            }
            SqlCommand::CreateIndex(node) => {
                let table = self
                    .db
                    .find_table(&node.table)
                    .ok_or_else(|| DbError::TableNotExist(node.table.clone()))?;
                table.create_index(&node.index, &node.columns, node.unique)?;
                Ok(ResultSet::empty())
            }
            SqlCommand::DropIndex { table, index } => {
                let table = self
                    .db
                    .find_table(table)
                    .ok_or_else(|| DbError::TableNotExist(table.clone()))?;
                table.drop_index(index)?;
                Ok(ResultSet::empty())
            }
            SqlCommand::ShowTables => {
                let rows = self
                    .db
                    .table_names()
                    .into_iter()
                    .map(|n| vec![Value::from_str(&n)])
                    .collect();
                Ok(ResultSet { headers: vec!["Tables".to_string()], rows })
            }
            SqlCommand::ShowIndex { table } => self.show_index(table),
            SqlCommand::Desc { table } => self.desc_table(table),
            SqlCommand::Set { name, value } => {
                if name.eq_ignore_ascii_case("hash_join_on") {
                    self.hash_join_on.set(value.get_int() != 0);
                } else {
                    self.variables.borrow_mut().insert(name.to_lowercase(), value.clone());
                }
                Ok(ResultSet::empty())
            }
            SqlCommand::Begin => {
                self.in_transaction.set(true);
                Ok(ResultSet::empty())
            }
            SqlCommand::Commit => {
                self.in_transaction.set(false);
                self.db.sync()?;
                Ok(ResultSet::empty())
            }
            SqlCommand::Rollback => {
                if self.in_transaction.replace(false) {
                    log::warn!("rollback requested, but the vanilla transaction cannot undo");
                }
                Ok(ResultSet::empty())
            }
            SqlCommand::LoadData { file, table } => self.load_data(file, table),
            SqlCommand::Analyze { table } => {
                // Statistics collection is out of scope; accept the statement.
                self.db
                    .find_table(table)
                    .ok_or_else(|| DbError::TableNotExist(table.clone()))?;
                Ok(ResultSet::message(&format!("analyzed table {table}")))
            }
            SqlCommand::Help => Ok(ResultSet::message(
                "commands: CREATE/DROP TABLE, CREATE/DROP INDEX, SHOW TABLES, SHOW INDEX FROM, \
                 DESC, INSERT, SELECT, UPDATE, DELETE, EXPLAIN, SET, CALC, BEGIN/COMMIT/ROLLBACK, \
                 LOAD DATA INFILE, ANALYZE TABLE, HELP, EXIT",
            )),
            SqlCommand::Exit => Ok(ResultSet::empty()),
            _ => self.execute_planned(cmd),
        }
    }

    /// Bind, plan and run a statement through the operator pipeline.
    fn execute_planned(&self, cmd: &SqlCommand) -> Result<ResultSet> {
        let stmt = Stmt::from_command(&self.db, cmd)?;
        let headers = statement_headers(&stmt);
        let is_dml = matches!(stmt, Stmt::Insert(_) | Stmt::Update(_) | Stmt::Delete(_));

        let mut logical = create_logical_plan(&stmt)?;
        rewrite(&mut logical)?;
        set_session_context_recursive(&mut logical, &self.subquery_context());
        let ctx = PlannerContext { hash_join_on: self.hash_join_on.get() };
        let oper = create_physical_plan(logical, &ctx)?;
        let rows = self.drain(oper)?;

        if is_dml {
            // Cached subquery results may now be stale.
            self.subqueries.borrow_mut().clear_cache();
            if !self.in_transaction.get() {
                self.db.sync()?;
            }
        }
        Ok(ResultSet { headers, rows })
    }

    /// Run a SELECT through the vectorised engine.
    pub fn execute_sql_vec(&self, sql: &str) -> Result<ResultSet> {
        let cmd = crate::parse::parse_one(sql)?;
        let stmt = Stmt::from_command(&self.db, &cmd)?;
        let headers = statement_headers(&stmt);
        let mut logical = create_logical_plan(&stmt)?;
        rewrite(&mut logical)?;
        set_session_context_recursive(&mut logical, &self.subquery_context());
        let ctx = PlannerContext { hash_join_on: self.hash_join_on.get() };
        let mut oper = create_physical_plan_vec(logical, &ctx)?;

        oper.open(&self.trx)?;
        let mut rows = Vec::new();
        let drain = (|| -> Result<()> {
            while let Some(chunk) = oper.next_chunk()? {
                for i in 0..chunk.rows() {
                    rows.push(chunk.row(i));
                }
            }
            Ok(())
        })();
        oper.close()?;
        drain?;
        Ok(ResultSet { headers, rows })
    }

    fn drain(&self, mut oper: BoxedOperator) -> Result<Vec<Vec<Value>>> {
        oper.open(&self.trx)?;
        let mut rows = Vec::new();
        let result = (|| -> Result<()> {
            while oper.next()? {
                let tuple = oper
                    .current_tuple()
                    .ok_or_else(|| DbError::internal("operator yielded no tuple"))?;
                let mut row = Vec::with_capacity(tuple.cell_num());
                for i in 0..tuple.cell_num() {
                    row.push(tuple.cell_at(i)?);
                }
                rows.push(row);
            }
            Ok(())
        })();
        // Close regardless: cancellation and errors both propagate close
        // down the tree so scanners and latches are released.
        oper.close()?;
        result?;
        Ok(rows)
    }

    fn show_index(&self, table_name: &str) -> Result<ResultSet> {
        let table = self
            .db
            .find_table(table_name)
            .ok_or_else(|| DbError::TableNotExist(table_name.to_string()))?;
        let meta = table.meta();
        let headers = ["Table", "Non_unique", "Key_name", "Seq_in_index", "Column_name"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut rows = Vec::new();
        for im in &meta.indexes {
            for (seq, field) in im.field_names.iter().enumerate() {
                rows.push(vec![
                    Value::from_str(&meta.name),
                    Value::Int(if im.is_unique { 0 } else { 1 }),
                    Value::from_str(&im.name),
                    Value::Int(seq as i32 + 1),
                    Value::from_str(field),
                ]);
            }
        }
        Ok(ResultSet { headers, rows })
    }

    fn desc_table(&self, table_name: &str) -> Result<ResultSet> {
        let table = self
            .db
            .find_table(table_name)
            .ok_or_else(|| DbError::TableNotExist(table_name.to_string()))?;
        let meta = table.meta();
        let headers = ["Field", "Type", "Length", "Nullable"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let rows = meta
            .visible_fields()
            .map(|f| {
                vec![
                    Value::from_str(&f.name),
                    Value::from_str(f.attr_type.name()),
                    Value::Int(f.len as i32),
                    Value::from_str(if f.nullable { "yes" } else { "no" }),
                ]
            })
            .collect();
        Ok(ResultSet { headers, rows })
    }

    /// `LOAD DATA INFILE`: one `|`-separated row per line.
    fn load_data(&self, file: &str, table_name: &str) -> Result<ResultSet> {
        let table = self
            .db
            .find_table(table_name)
            .ok_or_else(|| DbError::TableNotExist(table_name.to_string()))?;
        let meta = table.meta();
        let fields: Vec<_> = meta.visible_fields().cloned().collect();
        let content = std::fs::read_to_string(file).map_err(|e| DbError::IoOpen {
            path: file.to_string(),
            source: e,
        })?;
        let mut inserted = 0usize;
        for (lineno, line) in content.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            let parts: Vec<&str> = line.split('|').collect();
            if parts.len() != fields.len() {
                return Err(DbError::InvalidArgument(format!(
                    "line {}: expected {} fields, got {}",
                    lineno + 1,
                    fields.len(),
                    parts.len()
                )));
            }
            let mut values = Vec::with_capacity(parts.len());
            for (field, part) in fields.iter().zip(parts) {
                let v = if part.eq_ignore_ascii_case("null") {
                    Value::null()
                } else {
                    types::value_from_str(field.attr_type, part)?
                };
                values.push(v);
            }
            let data = crate::table::make_record(&meta, &values)?;
            self.trx.insert_record(&table, &data)?;
            inserted += 1;
        }
        self.subqueries.borrow_mut().clear_cache();
        self.db.sync()?;
        Ok(ResultSet::message(&format!("loaded {inserted} rows into {table_name}")))
    }
}

fn statement_headers(stmt: &Stmt) -> Vec<String> {
    match stmt {
        Stmt::Select(s) => s.query_expressions.iter().map(|e| e.name()).collect(),
        Stmt::Calc(s) => s.expressions.iter().map(|e| e.name()).collect(),
        Stmt::Explain(_) => vec!["Query Plan".to_string()],
        _ => Vec::new(),
    }
}
