//! Hand-written SQL lexer and recursive-descent parser for the
//! MySQL-flavoured dialect. Produces the [`crate::ast`] nodes; every error
//! carries the line and column it was raised at.

use crate::ast::*;
use crate::expr::{AggType, CompOp, DistanceFunc, Expr};
use crate::rc::{DbError, Result};
use crate::table::{ColumnSpec, StorageFormat};
use crate::types::AttrType;
use crate::value::Value;

#[derive(Clone, Debug, PartialEq)]
enum Tok {
    Id(String),
    IntLit(i32),
    FloatLit(f32),
    StrLit(String),
    Comma,
    Dot,
    Semi,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Eof,
}

struct Lexed {
    tok: Tok,
    line: usize,
    column: usize,
}

/// Parse a batch of SQL text into commands (separated by `;`).
pub fn parse_sql(input: &str) -> Result<Vec<SqlCommand>> {
    let mut p = Parser::new(input)?;
    let mut commands = Vec::new();
    loop {
        while p.peek() == &Tok::Semi {
            p.advance();
        }
        if p.peek() == &Tok::Eof {
            break;
        }
        commands.push(p.command()?);
        match p.peek() {
            Tok::Semi => {
                p.advance();
            }
            Tok::Eof => break,
            _ => return Err(p.error("expected ';' or end of input")),
        }
    }
    Ok(commands)
}

/// Parse exactly one command.
pub fn parse_one(input: &str) -> Result<SqlCommand> {
    let mut commands = parse_sql(input)?;
    match commands.len() {
        1 => Ok(commands.pop().unwrap()),
        0 => Err(DbError::SqlSyntax { line: 1, column: 1, msg: "empty statement".into() }),
        _ => Err(DbError::SqlSyntax { line: 1, column: 1, msg: "expected one statement".into() }),
    }
}

fn lex(input: &str) -> Result<Vec<Lexed>> {
    let bytes = input.as_bytes();
    let mut out = Vec::new();
    let (mut i, mut line, mut col) = (0usize, 1usize, 1usize);
    macro_rules! push {
        ($tok:expr, $line:expr, $col:expr) => {
            out.push(Lexed { tok: $tok, line: $line, column: $col })
        };
    }
    while i < bytes.len() {
        let (tl, tc) = (line, col);
        let c = bytes[i];
        let mut step = |i: &mut usize, col: &mut usize, n: usize| {
            *i += n;
            *col += n;
        };
        match c {
            b'\n' => {
                i += 1;
                line += 1;
                col = 1;
            }
            b' ' | b'\t' | b'\r' => step(&mut i, &mut col, 1),
            b'-' if i + 1 < bytes.len() && bytes[i + 1] == b'-' => {
                // Line comment.
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b',' => {
                push!(Tok::Comma, tl, tc);
                step(&mut i, &mut col, 1);
            }
            b'.' => {
                push!(Tok::Dot, tl, tc);
                step(&mut i, &mut col, 1);
            }
            b';' => {
                push!(Tok::Semi, tl, tc);
                step(&mut i, &mut col, 1);
            }
            b'(' => {
                push!(Tok::LParen, tl, tc);
                step(&mut i, &mut col, 1);
            }
            b')' => {
                push!(Tok::RParen, tl, tc);
                step(&mut i, &mut col, 1);
            }
            b'[' => {
                push!(Tok::LBracket, tl, tc);
                step(&mut i, &mut col, 1);
            }
            b']' => {
                push!(Tok::RBracket, tl, tc);
                step(&mut i, &mut col, 1);
            }
            b'+' => {
                push!(Tok::Plus, tl, tc);
                step(&mut i, &mut col, 1);
            }
            b'-' => {
                push!(Tok::Minus, tl, tc);
                step(&mut i, &mut col, 1);
            }
            b'*' => {
                push!(Tok::Star, tl, tc);
                step(&mut i, &mut col, 1);
            }
            b'/' => {
                push!(Tok::Slash, tl, tc);
                step(&mut i, &mut col, 1);
            }
            b'=' => {
                push!(Tok::Eq, tl, tc);
                step(&mut i, &mut col, 1);
            }
            b'!' if i + 1 < bytes.len() && bytes[i + 1] == b'=' => {
                push!(Tok::Neq, tl, tc);
                step(&mut i, &mut col, 2);
            }
            b'<' => {
                if i + 1 < bytes.len() && bytes[i + 1] == b'=' {
                    push!(Tok::Le, tl, tc);
                    step(&mut i, &mut col, 2);
                } else if i + 1 < bytes.len() && bytes[i + 1] == b'>' {
                    push!(Tok::Neq, tl, tc);
                    step(&mut i, &mut col, 2);
                } else {
                    push!(Tok::Lt, tl, tc);
                    step(&mut i, &mut col, 1);
                }
            }
            b'>' => {
                if i + 1 < bytes.len() && bytes[i + 1] == b'=' {
                    push!(Tok::Ge, tl, tc);
                    step(&mut i, &mut col, 2);
                } else {
                    push!(Tok::Gt, tl, tc);
                    step(&mut i, &mut col, 1);
                }
            }
            b'\'' | b'"' => {
                let quote = c;
                let start = i + 1;
                let mut j = start;
                while j < bytes.len() && bytes[j] != quote {
                    j += 1;
                }
                if j >= bytes.len() {
                    return Err(DbError::SqlSyntax {
                        line: tl,
                        column: tc,
                        msg: "unterminated string literal".into(),
                    });
                }
                let s = String::from_utf8_lossy(&bytes[start..j]).into_owned();
                push!(Tok::StrLit(s), tl, tc);
                let n = j + 1 - i;
                step(&mut i, &mut col, n);
            }
            b'0'..=b'9' => {
                let start = i;
                let mut j = i;
                let mut is_float = false;
                while j < bytes.len() && bytes[j].is_ascii_digit() {
                    j += 1;
                }
                if j + 1 < bytes.len() && bytes[j] == b'.' && bytes[j + 1].is_ascii_digit() {
                    is_float = true;
                    j += 1;
                    while j < bytes.len() && bytes[j].is_ascii_digit() {
                        j += 1;
                    }
                }
                let text = std::str::from_utf8(&bytes[start..j]).unwrap();
                let tok = if is_float {
                    Tok::FloatLit(text.parse().map_err(|_| DbError::SqlSyntax {
                        line: tl,
                        column: tc,
                        msg: format!("bad float literal {text}"),
                    })?)
                } else {
                    Tok::IntLit(text.parse().map_err(|_| DbError::SqlSyntax {
                        line: tl,
                        column: tc,
                        msg: format!("bad integer literal {text}"),
                    })?)
                };
                push!(tok, tl, tc);
                let n = j - i;
                step(&mut i, &mut col, n);
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let start = i;
                let mut j = i;
                while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
                    j += 1;
                }
                let id = std::str::from_utf8(&bytes[start..j]).unwrap().to_string();
                push!(Tok::Id(id), tl, tc);
                let n = j - i;
                step(&mut i, &mut col, n);
            }
            _ => {
                return Err(DbError::SqlSyntax {
                    line: tl,
                    column: tc,
                    msg: format!("unexpected character '{}'", c as char),
                });
            }
        }
    }
    out.push(Lexed { tok: Tok::Eof, line, column: col });
    Ok(out)
}

struct Parser {
    toks: Vec<Lexed>,
    pos: usize,
}

impl Parser {
    fn new(input: &str) -> Result<Parser> {
        Ok(Parser { toks: lex(input)?, pos: 0 })
    }

    fn peek(&self) -> &Tok {
        &self.toks[self.pos].tok
    }

    fn peek2(&self) -> &Tok {
        &self.toks[(self.pos + 1).min(self.toks.len() - 1)].tok
    }

    fn advance(&mut self) -> Tok {
        let t = self.toks[self.pos].tok.clone();
        if self.pos + 1 < self.toks.len() {
            self.pos += 1;
        }
        t
    }

    fn error(&self, msg: &str) -> DbError {
        let l = &self.toks[self.pos];
        DbError::SqlSyntax { line: l.line, column: l.column, msg: msg.to_string() }
    }

    /// Is the current token the given keyword (case-insensitive)?
    fn at_kw(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Id(id) if id.eq_ignore_ascii_case(kw))
    }

    fn at_kw2(&self, kw: &str) -> bool {
        matches!(self.peek2(), Tok::Id(id) if id.eq_ignore_ascii_case(kw))
    }

    /// Consume the keyword if present.
    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.at_kw(kw) {
            self.advance();
            return true;
        }
        false
    }

    fn expect_kw(&mut self, kw: &str) -> Result<()> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {}", kw.to_uppercase())))
        }
    }

    fn expect(&mut self, tok: Tok, what: &str) -> Result<()> {
        if self.peek() == &tok {
            self.advance();
            Ok(())
        } else {
            Err(self.error(&format!("expected {what}")))
        }
    }

    fn identifier(&mut self, what: &str) -> Result<String> {
        match self.peek().clone() {
            Tok::Id(id) => {
                self.advance();
                Ok(id)
            }
            _ => Err(self.error(&format!("expected {what}"))),
        }
    }

    fn command(&mut self) -> Result<SqlCommand> {
        if self.at_kw("select") {
            return Ok(SqlCommand::Select(self.select()?));
        }
        if self.at_kw("insert") {
            return self.insert();
        }
        if self.at_kw("update") {
            return self.update();
        }
        if self.at_kw("delete") {
            return self.delete();
        }
        if self.at_kw("create") {
            return self.create();
        }
        if self.at_kw("drop") {
            return self.drop();
        }
        if self.at_kw("show") {
            self.advance();
            if self.eat_kw("tables") {
                return Ok(SqlCommand::ShowTables);
            }
            self.expect_kw("index")?;
            self.expect_kw("from")?;
            let table = self.identifier("table name")?;
            return Ok(SqlCommand::ShowIndex { table });
        }
        if self.eat_kw("desc") {
            let table = self.identifier("table name")?;
            return Ok(SqlCommand::Desc { table });
        }
        if self.eat_kw("explain") {
            let inner = self.command()?;
            return Ok(SqlCommand::Explain(Box::new(inner)));
        }
        if self.eat_kw("set") {
            let name = self.identifier("variable name")?;
            self.expect(Tok::Eq, "'='")?;
            let value = self.literal()?;
            return Ok(SqlCommand::Set { name, value });
        }
        if self.eat_kw("calc") {
            let expressions = self.expression_list()?;
            return Ok(SqlCommand::Calc { expressions });
        }
        if self.eat_kw("begin") {
            return Ok(SqlCommand::Begin);
        }
        if self.eat_kw("commit") {
            return Ok(SqlCommand::Commit);
        }
        if self.eat_kw("rollback") {
            return Ok(SqlCommand::Rollback);
        }
        if self.eat_kw("load") {
            self.expect_kw("data")?;
            self.expect_kw("infile")?;
            let file = match self.advance() {
                Tok::StrLit(s) => s,
                _ => return Err(self.error("expected file path string")),
            };
            self.expect_kw("into")?;
            self.expect_kw("table")?;
            let table = self.identifier("table name")?;
            return Ok(SqlCommand::LoadData { file, table });
        }
        if self.eat_kw("analyze") {
            self.expect_kw("table")?;
            let table = self.identifier("table name")?;
            return Ok(SqlCommand::Analyze { table });
        }
        if self.eat_kw("help") {
            return Ok(SqlCommand::Help);
        }
        if self.eat_kw("exit") || self.eat_kw("bye") {
            return Ok(SqlCommand::Exit);
        }
        Err(self.error("unknown statement"))
    }

    fn select(&mut self) -> Result<SelectSqlNode> {
        self.expect_kw("select")?;
        let expressions = self.expression_list()?;
        let mut node = SelectSqlNode { expressions, ..Default::default() };
        if self.eat_kw("from") {
            node.relations.push(self.identifier("relation name")?);
            while self.peek() == &Tok::Comma {
                self.advance();
                node.relations.push(self.identifier("relation name")?);
            }
            while self.at_kw("inner") || self.at_kw("join") {
                self.eat_kw("inner");
                self.expect_kw("join")?;
                let relation = self.identifier("relation name")?;
                let mut conditions = Vec::new();
                if self.eat_kw("on") {
                    conditions = self.condition_list()?;
                }
                node.joins.push(JoinSqlNode { relation, conditions });
            }
        }
        if self.eat_kw("where") {
            node.conditions = self.condition_list()?;
        }
        if self.at_kw("group") {
            self.advance();
            self.expect_kw("by")?;
            node.group_by = self.expression_list()?;
        }
        if self.eat_kw("having") {
            node.having = self.condition_list()?;
        }
        Ok(node)
    }

    fn insert(&mut self) -> Result<SqlCommand> {
        self.expect_kw("insert")?;
        self.expect_kw("into")?;
        let table = self.identifier("table name")?;
        self.expect_kw("values")?;
        let mut rows = Vec::new();
        loop {
            self.expect(Tok::LParen, "'('")?;
            let mut row = vec![self.literal()?];
            while self.peek() == &Tok::Comma {
                self.advance();
                row.push(self.literal()?);
            }
            self.expect(Tok::RParen, "')'")?;
            rows.push(row);
            if self.peek() == &Tok::Comma {
                self.advance();
                continue;
            }
            break;
        }
        Ok(SqlCommand::Insert(InsertNode { table, rows }))
    }

    fn update(&mut self) -> Result<SqlCommand> {
        self.expect_kw("update")?;
        let table = self.identifier("table name")?;
        self.expect_kw("set")?;
        let mut assignments = Vec::new();
        loop {
            let col = self.identifier("column name")?;
            self.expect(Tok::Eq, "'='")?;
            let expr = self.expression()?;
            assignments.push((col, expr));
            if self.peek() == &Tok::Comma {
                self.advance();
                continue;
            }
            break;
        }
        let mut conditions = Vec::new();
        if self.eat_kw("where") {
            conditions = self.condition_list()?;
        }
        Ok(SqlCommand::Update(UpdateNode { table, assignments, conditions }))
    }

    fn delete(&mut self) -> Result<SqlCommand> {
        self.expect_kw("delete")?;
        self.expect_kw("from")?;
        let table = self.identifier("table name")?;
        let mut conditions = Vec::new();
        if self.eat_kw("where") {
            conditions = self.condition_list()?;
        }
        Ok(SqlCommand::Delete(DeleteNode { table, conditions }))
    }

    fn create(&mut self) -> Result<SqlCommand> {
        self.expect_kw("create")?;
        if self.eat_kw("table") {
            let table = self.identifier("table name")?;
            self.expect(Tok::LParen, "'('")?;
            let mut columns = vec![self.column_def()?];
            while self.peek() == &Tok::Comma {
                self.advance();
                columns.push(self.column_def()?);
            }
            self.expect(Tok::RParen, "')'")?;
            let mut storage_format = StorageFormat::Row;
            if self.eat_kw("storage") {
                self.expect_kw("format")?;
                self.expect(Tok::Eq, "'='")?;
                let fmt = self.identifier("storage format")?;
                storage_format = match fmt.to_ascii_lowercase().as_str() {
                    "row" => StorageFormat::Row,
                    "pax" => StorageFormat::Pax,
                    _ => return Err(self.error("storage format must be ROW or PAX")),
                };
            }
            return Ok(SqlCommand::CreateTable(CreateTableNode { table, columns, storage_format }));
        }
        let unique = self.eat_kw("unique");
        self.expect_kw("index")?;
        let index = self.identifier("index name")?;
        self.expect_kw("on")?;
        let table = self.identifier("table name")?;
        self.expect(Tok::LParen, "'('")?;
        let mut columns = vec![self.identifier("column name")?];
        while self.peek() == &Tok::Comma {
            self.advance();
            columns.push(self.identifier("column name")?);
        }
        self.expect(Tok::RParen, "')'")?;
        Ok(SqlCommand::CreateIndex(CreateIndexNode { index, table, columns, unique }))
    }

    fn drop(&mut self) -> Result<SqlCommand> {
        self.expect_kw("drop")?;
        if self.eat_kw("table") {
            let table = self.identifier("table name")?;
            return Ok(SqlCommand::DropTable { table });
        }
        self.expect_kw("index")?;
        let index = self.identifier("index name")?;
        self.expect_kw("on")?;
        let table = self.identifier("table name")?;
        Ok(SqlCommand::DropIndex { table, index })
    }

    fn column_def(&mut self) -> Result<ColumnSpec> {
        let name = self.identifier("column name")?;
        let type_name = self.identifier("column type")?;
        let (attr_type, needs_arg) = match type_name.to_ascii_lowercase().as_str() {
            "int" => (AttrType::Ints, false),
            "float" => (AttrType::Floats, false),
            "date" => (AttrType::Dates, false),
            "text" => (AttrType::Texts, false),
            "char" => (AttrType::Chars, true),
            "vector" => (AttrType::Vectors, true),
            _ => return Err(self.error(&format!("unknown column type {type_name}"))),
        };
        let mut arg = 0;
        if needs_arg {
            self.expect(Tok::LParen, "'('")?;
            arg = match self.advance() {
                Tok::IntLit(n) if n > 0 => n as usize,
                _ => return Err(self.error("expected a positive length")),
            };
            self.expect(Tok::RParen, "')'")?;
        }
        // Default is nullable, MySQL style.
        let mut nullable = true;
        if self.eat_kw("not") {
            self.expect_kw("null")?;
            nullable = false;
        } else {
            self.eat_kw("null");
        }
        Ok(ColumnSpec { name, attr_type, arg, nullable })
    }

    /// A literal value as used in INSERT / SET.
    fn literal(&mut self) -> Result<Value> {
        let save = self.pos;
        match self.advance() {
            Tok::IntLit(n) => Ok(Value::Int(n)),
            Tok::FloatLit(f) => Ok(Value::Float(f)),
            Tok::StrLit(s) => Ok(Value::Chars(s.into_bytes())),
            Tok::Minus => match self.advance() {
                Tok::IntLit(n) => Ok(Value::Int(-n)),
                Tok::FloatLit(f) => Ok(Value::Float(-f)),
                _ => Err(self.error("expected a number after '-'")),
            },
            Tok::LBracket => {
                let mut v = Vec::new();
                if self.peek() != &Tok::RBracket {
                    loop {
                        let x = match self.advance() {
                            Tok::IntLit(n) => n as f32,
                            Tok::FloatLit(f) => f,
                            Tok::Minus => match self.advance() {
                                Tok::IntLit(n) => -(n as f32),
                                Tok::FloatLit(f) => -f,
                                _ => return Err(self.error("expected a number")),
                            },
                            _ => return Err(self.error("expected a number")),
                        };
                        v.push(x);
                        if self.peek() == &Tok::Comma {
                            self.advance();
                            continue;
                        }
                        break;
                    }
                }
                self.expect(Tok::RBracket, "']'")?;
                Ok(Value::Vector(v))
            }
            Tok::Id(id) if id.eq_ignore_ascii_case("null") => Ok(Value::null()),
            _ => {
                self.pos = save;
                Err(self.error("expected a literal value"))
            }
        }
    }

    fn expression_list(&mut self) -> Result<Vec<Expr>> {
        let mut exprs = vec![self.expression()?];
        while self.peek() == &Tok::Comma {
            self.advance();
            exprs.push(self.expression()?);
        }
        Ok(exprs)
    }

    /// expr := term (('+'|'-') term)*
    fn expression(&mut self) -> Result<Expr> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => crate::expr::ArithOp::Add,
                Tok::Minus => crate::expr::ArithOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.term()?;
            left = Expr::Arithmetic { op, left: Box::new(left), right: Some(Box::new(right)) };
        }
        Ok(left)
    }

    /// term := unary (('*'|'/') unary)*
    fn term(&mut self) -> Result<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Tok::Star => crate::expr::ArithOp::Mul,
                Tok::Slash => crate::expr::ArithOp::Div,
                _ => break,
            };
            self.advance();
            let right = self.unary()?;
            left = Expr::Arithmetic { op, left: Box::new(left), right: Some(Box::new(right)) };
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.peek() == &Tok::Minus {
            self.advance();
            let child = self.unary()?;
            // Fold a negated literal immediately.
            if let Expr::Value(v) = &child {
                match v {
                    Value::Int(n) => return Ok(Expr::Value(Value::Int(-n))),
                    Value::Float(f) => return Ok(Expr::Value(Value::Float(-f))),
                    _ => {}
                }
            }
            return Ok(Expr::Arithmetic {
                op: crate::expr::ArithOp::Negative,
                left: Box::new(child),
                right: None,
            });
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr> {
        match self.peek().clone() {
            Tok::IntLit(_) | Tok::FloatLit(_) | Tok::StrLit(_) | Tok::LBracket => {
                Ok(Expr::Value(self.literal()?))
            }
            Tok::Star => {
                self.advance();
                Ok(Expr::Star { table: None })
            }
            Tok::LParen => {
                self.advance();
                let e = self.expression()?;
                self.expect(Tok::RParen, "')'")?;
                Ok(e)
            }
            Tok::Id(id) if id.eq_ignore_ascii_case("null") => {
                self.advance();
                Ok(Expr::Value(Value::null()))
            }
            Tok::Id(id) => {
                self.advance();
                // Function call: aggregate or distance builtin.
                if self.peek() == &Tok::LParen {
                    self.advance();
                    if let Some(func) = DistanceFunc::from_name(&id) {
                        let left = self.expression()?;
                        self.expect(Tok::Comma, "','")?;
                        let right = self.expression()?;
                        self.expect(Tok::RParen, "')'")?;
                        return Ok(Expr::Distance {
                            func,
                            left: Box::new(left),
                            right: Box::new(right),
                        });
                    }
                    if AggType::from_name(&id).is_err() {
                        return Err(self.error(&format!("unknown function {id}")));
                    }
                    let child = if self.peek() == &Tok::Star {
                        self.advance();
                        Expr::Star { table: None }
                    } else {
                        self.expression()?
                    };
                    self.expect(Tok::RParen, "')'")?;
                    return Ok(Expr::UnboundAggregate { func: id.to_ascii_lowercase(), child: Box::new(child) });
                }
                // Qualified name: t.f or t.*
                if self.peek() == &Tok::Dot {
                    self.advance();
                    if self.peek() == &Tok::Star {
                        self.advance();
                        return Ok(Expr::Star { table: Some(id) });
                    }
                    let field = self.identifier("field name")?;
                    return Ok(Expr::UnboundField { table: Some(id), field });
                }
                Ok(Expr::UnboundField { table: None, field: id })
            }
            _ => Err(self.error("expected an expression")),
        }
    }

    fn condition_list(&mut self) -> Result<Vec<ConditionSqlNode>> {
        let mut conds = vec![self.condition()?];
        while self.eat_kw("and") {
            conds.push(self.condition()?);
        }
        Ok(conds)
    }

    fn condition(&mut self) -> Result<ConditionSqlNode> {
        // [NOT] EXISTS (subquery)
        if self.at_kw("exists") || (self.at_kw("not") && self.at_kw2("exists")) {
            let not = self.eat_kw("not");
            self.expect_kw("exists")?;
            self.expect(Tok::LParen, "'('")?;
            let select = self.select()?;
            self.expect(Tok::RParen, "')'")?;
            return Ok(ConditionSqlNode {
                left: None,
                op: CondOp::Exists { not },
                rhs: CondRhs::Subquery(Box::new(select)),
            });
        }

        let left = self.expression()?;

        if self.eat_kw("is") {
            let not = self.eat_kw("not");
            self.expect_kw("null")?;
            return Ok(ConditionSqlNode {
                left: Some(left),
                op: CondOp::IsNull { not },
                rhs: CondRhs::None,
            });
        }

        if self.at_kw("in") || (self.at_kw("not") && self.at_kw2("in")) {
            let not = self.eat_kw("not");
            self.expect_kw("in")?;
            self.expect(Tok::LParen, "'('")?;
            if self.at_kw("select") {
                let select = self.select()?;
                self.expect(Tok::RParen, "')'")?;
                return Ok(ConditionSqlNode {
                    left: Some(left),
                    op: CondOp::In { not },
                    rhs: CondRhs::Subquery(Box::new(select)),
                });
            }
            let mut values = vec![self.const_value()?];
            while self.peek() == &Tok::Comma {
                self.advance();
                values.push(self.const_value()?);
            }
            self.expect(Tok::RParen, "')'")?;
            return Ok(ConditionSqlNode {
                left: Some(left),
                op: CondOp::In { not },
                rhs: CondRhs::ValueList(values),
            });
        }

        let save = self.pos;
        let comp = match self.advance() {
            Tok::Eq => CompOp::EqualTo,
            Tok::Neq => CompOp::NotEqual,
            Tok::Lt => CompOp::LessThan,
            Tok::Le => CompOp::LessEqual,
            Tok::Gt => CompOp::GreatThan,
            Tok::Ge => CompOp::GreatEqual,
            _ => {
                self.pos = save;
                return Err(self.error("expected a comparison operator"));
            }
        };

        if self.peek() == &Tok::LParen && self.at_kw2("select") {
            self.advance();
            let select = self.select()?;
            self.expect(Tok::RParen, "')'")?;
            return Ok(ConditionSqlNode {
                left: Some(left),
                op: CondOp::Comp(comp),
                rhs: CondRhs::Subquery(Box::new(select)),
            });
        }

        let right = self.expression()?;
        Ok(ConditionSqlNode { left: Some(left), op: CondOp::Comp(comp), rhs: CondRhs::Expr(right) })
    }

    /// A constant inside an IN list; folds simple constant expressions.
    fn const_value(&mut self) -> Result<Value> {
        let e = self.expression()?;
        e.try_get_value()
            .map_err(|_| self.error("IN list elements must be constants"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_shapes() {
        let cmd = parse_one("SELECT a.x, b.y FROM a JOIN b ON a.k = b.k WHERE a.x > 1;").unwrap();
        let SqlCommand::Select(node) = cmd else { panic!("not a select") };
        assert_eq!(node.relations, vec!["a"]);
        assert_eq!(node.joins.len(), 1);
        assert_eq!(node.joins[0].relation, "b");
        assert_eq!(node.joins[0].conditions.len(), 1);
        assert_eq!(node.conditions.len(), 1);
        assert_eq!(node.expressions.len(), 2);
    }

    #[test]
    fn group_by_and_having() {
        let cmd =
            parse_one("select id, sum(v) from t group by id having sum(v) > 10").unwrap();
        let SqlCommand::Select(node) = cmd else { panic!() };
        assert_eq!(node.group_by.len(), 1);
        assert_eq!(node.having.len(), 1);
        assert!(matches!(node.expressions[1], Expr::UnboundAggregate { .. }));
    }

    #[test]
    fn insert_rows_and_literals() {
        let cmd = parse_one(
            "INSERT INTO t VALUES (1, -2.5, 'abc', '2024-01-02', [1,2,3], NULL)",
        )
        .unwrap();
        let SqlCommand::Insert(node) = cmd else { panic!() };
        assert_eq!(node.rows.len(), 1);
        let row = &node.rows[0];
        assert_eq!(row[0], Value::Int(1));
        assert_eq!(row[1], Value::Float(-2.5));
        assert_eq!(row[2], Value::Chars(b"abc".to_vec()));
        assert_eq!(row[4], Value::Vector(vec![1.0, 2.0, 3.0]));
        assert!(row[5].is_null());
    }

    #[test]
    fn create_table_defs() {
        let cmd = parse_one(
            "CREATE TABLE t(id INT NOT NULL, name CHAR(20), w FLOAT, d DATE, body TEXT, e VECTOR(3))",
        )
        .unwrap();
        let SqlCommand::CreateTable(node) = cmd else { panic!() };
        assert_eq!(node.columns.len(), 6);
        assert!(!node.columns[0].nullable);
        assert!(node.columns[1].nullable);
        assert_eq!(node.columns[1].arg, 20);
        assert_eq!(node.columns[5].attr_type, AttrType::Vectors);
    }

    #[test]
    fn conditions_in_exists_null() {
        let cmd = parse_one(
            "select * from t where a in (1,2,3) and b is not null and exists (select * from u) and c not in (select x from u)",
        )
        .unwrap();
        let SqlCommand::Select(node) = cmd else { panic!() };
        assert_eq!(node.conditions.len(), 4);
        assert!(matches!(node.conditions[0].op, CondOp::In { not: false }));
        assert!(matches!(node.conditions[0].rhs, CondRhs::ValueList(_)));
        assert!(matches!(node.conditions[1].op, CondOp::IsNull { not: true }));
        assert!(matches!(node.conditions[2].op, CondOp::Exists { not: false }));
        assert!(matches!(node.conditions[3].op, CondOp::In { not: true }));
        assert!(matches!(node.conditions[3].rhs, CondRhs::Subquery(_)));
    }

    #[test]
    fn misc_commands() {
        assert!(matches!(parse_one("SHOW TABLES").unwrap(), SqlCommand::ShowTables));
        assert!(matches!(parse_one("desc t;").unwrap(), SqlCommand::Desc { .. }));
        assert!(matches!(
            parse_one("SET hash_join_on = 1").unwrap(),
            SqlCommand::Set { .. }
        ));
        assert!(matches!(parse_one("begin").unwrap(), SqlCommand::Begin));
        assert!(matches!(
            parse_one("CREATE UNIQUE INDEX i ON u(a)").unwrap(),
            SqlCommand::CreateIndex(CreateIndexNode { unique: true, .. })
        ));
        assert!(matches!(
            parse_one("explain select * from t").unwrap(),
            SqlCommand::Explain(_)
        ));
        assert!(matches!(
            parse_one("LOAD DATA INFILE '/tmp/x' INTO TABLE t").unwrap(),
            SqlCommand::LoadData { .. }
        ));
        let err = parse_one("select from").unwrap_err();
        assert!(matches!(err, DbError::SqlSyntax { .. }));
    }

    #[test]
    fn error_carries_position() {
        let err = parse_one("select *\nfrom t where ?").unwrap_err();
        let DbError::SqlSyntax { line, column, .. } = err else { panic!() };
        assert_eq!(line, 2);
        assert!(column > 1);
    }
}
