//! Deterministic in-memory engine used by the handle tests.
//!
//! Recognizes exactly the statement shapes this crate renders: ATTACH/DETACH,
//! temp-view DDL, the one-row migrate/delete pair, table DDL and the two
//! catalog listings. Connection state is shared behind `Rc<RefCell<..>>` so
//! statements stay usable while the handle is borrowed, matching the
//! single-threaded cooperative model the traits assume.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::rc::Rc;

use bytes::Bytes;

use super::{EngineError, EngineHandle, EngineResult, ErrorCode, StatementHandle};
use crate::core::schema::Schema;

#[derive(Debug, Clone, Default)]
struct Table {
    columns: Vec<String>,
    rows: Vec<i64>,
}

#[derive(Debug, Clone, Default)]
struct SourceFile {
    tables: BTreeMap<String, Table>,
    cipher: Option<Vec<u8>>,
    raw_key: Vec<u8>,
}

#[derive(Debug, Clone)]
struct Snapshot {
    main: BTreeMap<String, Table>,
    views: BTreeMap<String, Vec<String>>,
    files: BTreeMap<PathBuf, SourceFile>,
    attached: BTreeMap<String, PathBuf>,
}

#[derive(Debug, Default)]
struct State {
    main: BTreeMap<String, Table>,
    views: BTreeMap<String, Vec<String>>,
    files: BTreeMap<PathBuf, SourceFile>,
    attached: BTreeMap<String, PathBuf>,
    txn_depth: usize,
    snapshot: Option<Snapshot>,
    changes: u64,
    ignorable: Vec<ErrorCode>,
    fail_matching: Vec<String>,
    executed: Vec<String>,
}

impl State {
    fn error(&self, code: ErrorCode, message: impl Into<String>) -> EngineError {
        EngineError {
            code,
            message: message.into(),
            ignorable: self.ignorable.contains(&code),
        }
    }

    fn check_failure(&self, sql: &str) -> EngineResult<()> {
        for pattern in &self.fail_matching {
            if sql.contains(pattern.as_str()) {
                return Err(self.error(ErrorCode::Error, format!("injected failure: {}", sql)));
            }
        }
        Ok(())
    }

    fn table_mut(&mut self, schema: &str, table: &str) -> EngineResult<&mut Table> {
        if schema == "main" {
            return match self.main.get_mut(table) {
                Some(t) => Ok(t),
                None => Err(EngineError::new(
                    ErrorCode::Error,
                    format!("no such table: main.{}", table),
                )),
            };
        }
        let path = self
            .attached
            .get(schema)
            .cloned()
            .ok_or_else(|| EngineError::new(ErrorCode::Error, format!("unknown schema {}", schema)))?;
        self.files
            .get_mut(&path)
            .and_then(|file| file.tables.get_mut(table))
            .ok_or_else(|| {
                EngineError::new(ErrorCode::Error, format!("no such table: {}.{}", schema, table))
            })
    }

    fn begin(&mut self) {
        if self.txn_depth == 0 {
            self.snapshot = Some(Snapshot {
                main: self.main.clone(),
                views: self.views.clone(),
                files: self.files.clone(),
                attached: self.attached.clone(),
            });
        }
        self.txn_depth += 1;
    }

    fn rollback(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            self.main = snapshot.main;
            self.views = snapshot.views;
            self.files = snapshot.files;
            self.attached = snapshot.attached;
        }
        self.txn_depth = 0;
    }

    fn run_sql(&mut self, sql: &str, blob: Option<&[u8]>) -> EngineResult<()> {
        self.executed.push(sql.to_string());
        self.check_failure(sql)?;
        let trimmed = sql.trim();

        if trimmed.starts_with("ATTACH DATABASE") {
            return self.run_attach(trimmed, blob);
        }
        if trimmed.starts_with("DETACH DATABASE") {
            if self.txn_depth > 0 {
                return Err(self.error(ErrorCode::Error, "cannot DETACH within a transaction"));
            }
            let schema = first_ident(trimmed)?;
            return match self.attached.remove(&schema) {
                Some(_) => Ok(()),
                None => Err(self.error(ErrorCode::Error, format!("no such schema {}", schema))),
            };
        }
        if trimmed.starts_with("CREATE TEMP VIEW IF NOT EXISTS") {
            let name = first_ident(trimmed)?;
            if !self.views.contains_key(&name) {
                let body = trimmed
                    .split_once(" AS SELECT ")
                    .map(|(_, body)| body)
                    .unwrap_or("");
                let columns = body
                    .split_once(" FROM ")
                    .map(|(projection, _)| quoted_idents(projection))
                    .unwrap_or_default();
                self.views.insert(name, columns);
            }
            return Ok(());
        }
        if trimmed.starts_with("DROP VIEW IF EXISTS") {
            let name = first_ident(trimmed)?;
            self.views.remove(&name);
            return Ok(());
        }
        if trimmed.starts_with("DROP TABLE IF EXISTS") {
            let idents = quoted_idents(trimmed);
            let (schema, table) = two_part(&idents)?;
            if schema == "main" {
                self.main.remove(&table);
            } else if let Some(path) = self.attached.get(&schema).cloned() {
                if let Some(file) = self.files.get_mut(&path) {
                    file.tables.remove(&table);
                }
            }
            return Ok(());
        }
        if trimmed.starts_with("ALTER TABLE") {
            let ddl = trimmed
                .split_once(" ADD COLUMN ")
                .ok_or_else(|| EngineError::new(ErrorCode::Error, "unsupported ALTER"))?;
            let idents = quoted_idents(ddl.0);
            let (schema, table) = two_part(&idents)?;
            let column = column_name(ddl.1);
            self.table_mut(&schema, &table)?.columns.push(column);
            return Ok(());
        }
        if trimmed.starts_with("INSERT INTO") {
            return self.run_migrate_one_row(trimmed);
        }
        if trimmed.starts_with("DELETE FROM") {
            let idents = quoted_idents(trimmed);
            let (schema, table) = two_part(&idents)?;
            let removed = {
                let table = self.table_mut(&schema, &table)?;
                match table.rows.iter().enumerate().max_by_key(|(_, r)| **r) {
                    Some((index, _)) => {
                        table.rows.remove(index);
                        true
                    }
                    None => false,
                }
            };
            self.changes = u64::from(removed);
            return Ok(());
        }
        if trimmed == "BEGIN IMMEDIATE" {
            if self.txn_depth > 0 {
                return Err(self.error(
                    ErrorCode::Error,
                    "cannot start a transaction within a transaction",
                ));
            }
            self.begin();
            return Ok(());
        }
        if trimmed.starts_with("SELECT") || trimmed.starts_with("PRAGMA") {
            // Plain queries carry no side effects here.
            return Ok(());
        }
        Err(self.error(ErrorCode::Error, format!("unsupported statement: {}", sql)))
    }

    fn run_attach(&mut self, sql: &str, blob: Option<&[u8]>) -> EngineResult<()> {
        let path = PathBuf::from(
            single_quoted(sql)
                .ok_or_else(|| EngineError::new(ErrorCode::Error, "ATTACH without path"))?,
        );
        let schema = first_ident(sql)?;
        let file = self
            .files
            .get(&path)
            .ok_or_else(|| self.error(ErrorCode::Error, format!("unable to open {:?}", path)))?;
        if let Some(cipher) = &file.cipher {
            if blob != Some(cipher.as_slice()) {
                return Err(self.error(ErrorCode::Error, "file is not a database"));
            }
        }
        self.attached.insert(schema, path);
        Ok(())
    }

    fn run_migrate_one_row(&mut self, sql: &str) -> EngineResult<()> {
        let (insert, select) = sql
            .split_once(" SELECT ")
            .ok_or_else(|| EngineError::new(ErrorCode::Error, "unsupported INSERT"))?;
        let dest = quoted_idents(insert);
        let (dest_schema, dest_table) = two_part(&dest)?;
        let source = quoted_idents(select);
        if source.len() < 2 {
            return Err(EngineError::new(ErrorCode::Error, "unsupported INSERT source"));
        }
        let source_schema = source[source.len() - 2].clone();
        let source_table = source[source.len() - 1].clone();

        let moved = {
            let table = self.table_mut(&source_schema, &source_table)?;
            table.rows.iter().max().copied()
        };
        match moved {
            Some(rowid) => {
                self.table_mut(&dest_schema, &dest_table)?.rows.push(rowid);
                self.changes = 1;
            }
            None => self.changes = 0,
        }
        Ok(())
    }
}

/// Shared in-memory engine connection.
#[derive(Clone)]
pub(crate) struct MockEngine {
    state: Rc<RefCell<State>>,
}

impl MockEngine {
    pub(crate) fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(State::default())),
        }
    }

    pub(crate) fn add_main_table(&self, name: &str, columns: &[&str], rows: u32) {
        self.state.borrow_mut().main.insert(
            name.to_string(),
            Table {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows: (1..=i64::from(rows)).collect(),
            },
        );
    }

    pub(crate) fn register_file(&self, path: &str, cipher: Option<&[u8]>) {
        let raw_key = cipher
            .map(|c| [c, b"+kdf"].concat())
            .unwrap_or_default();
        self.state.borrow_mut().files.insert(
            PathBuf::from(path),
            SourceFile {
                tables: BTreeMap::new(),
                cipher: cipher.map(|c| c.to_vec()),
                raw_key,
            },
        );
    }

    pub(crate) fn add_file_table(&self, path: &str, name: &str, columns: &[&str], rows: u32) {
        let mut state = self.state.borrow_mut();
        let file = state
            .files
            .get_mut(&PathBuf::from(path))
            .expect("file not registered");
        file.tables.insert(
            name.to_string(),
            Table {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows: (1..=i64::from(rows)).collect(),
            },
        );
    }

    pub(crate) fn rows_in(&self, schema: &str, table: &str) -> usize {
        let mut state = self.state.borrow_mut();
        state
            .table_mut(schema, table)
            .map(|t| t.rows.len())
            .expect("unknown table")
    }

    pub(crate) fn table_exists_in(&self, schema: &str, table: &str) -> bool {
        self.state.borrow_mut().table_mut(schema, table).is_ok()
    }

    pub(crate) fn attached_schemas(&self) -> Vec<String> {
        self.state.borrow().attached.keys().cloned().collect()
    }

    pub(crate) fn has_view(&self, name: &str) -> bool {
        self.state.borrow().views.contains_key(name)
    }

    pub(crate) fn view_columns(&self, name: &str) -> Option<Vec<String>> {
        self.state.borrow().views.get(name).cloned()
    }

    pub(crate) fn executed_sql(&self) -> Vec<String> {
        self.state.borrow().executed.clone()
    }

    pub(crate) fn in_transaction(&self) -> bool {
        self.state.borrow().txn_depth > 0
    }

    pub(crate) fn fail_matching(&self, pattern: &str) {
        self.state
            .borrow_mut()
            .fail_matching
            .push(pattern.to_string());
    }

    pub(crate) fn clear_failures(&self) {
        self.state.borrow_mut().fail_matching.clear();
    }
}

impl EngineHandle for MockEngine {
    type Stmt = MockStatement;

    fn new_statement(&self) -> MockStatement {
        MockStatement {
            state: Rc::clone(&self.state),
            sql: None,
            blob: None,
        }
    }

    fn execute(&self, sql: &str) -> EngineResult<()> {
        self.state.borrow_mut().run_sql(sql, None)
    }

    fn changes(&self) -> u64 {
        self.state.borrow().changes
    }

    fn table_exists(&self, schema: &Schema, table: &str) -> EngineResult<bool> {
        let mut state = self.state.borrow_mut();
        match schema {
            Schema::Temp => Ok(table == "sqlite_master" || state.views.contains_key(table)),
            _ => Ok(state.table_mut(schema.name(), table).is_ok()),
        }
    }

    fn columns_of(&self, schema: &Schema, table: &str) -> EngineResult<BTreeSet<String>> {
        let mut state = self.state.borrow_mut();
        let columns = state.table_mut(schema.name(), table)?.columns.clone();
        Ok(columns.into_iter().collect())
    }

    fn string_values(&self, sql: &str, column: usize) -> EngineResult<BTreeSet<String>> {
        let state = self.state.borrow();
        state.check_failure(sql)?;
        if sql == "PRAGMA database_list" {
            debug_assert_eq!(column, 1);
            let mut names: BTreeSet<String> = state.attached.keys().cloned().collect();
            names.insert("main".to_string());
            return Ok(names);
        }
        if sql.contains("temp.sqlite_master") {
            let prefix = like_prefix(sql);
            return Ok(state
                .views
                .keys()
                .filter(|name| name.starts_with(&prefix))
                .cloned()
                .collect());
        }
        if sql.contains("main.sqlite_master") {
            let prefix = like_prefix(sql);
            return Ok(state
                .main
                .keys()
                .filter(|name| !name.starts_with(&prefix))
                .cloned()
                .collect());
        }
        Err(state.error(ErrorCode::Error, format!("unsupported query: {}", sql)))
    }

    fn is_in_transaction(&self) -> bool {
        self.in_transaction()
    }

    fn begin_transaction(&self) -> EngineResult<()> {
        self.state.borrow_mut().begin();
        Ok(())
    }

    fn commit_transaction(&self) -> EngineResult<()> {
        let mut state = self.state.borrow_mut();
        if state.txn_depth == 0 {
            return Err(state.error(ErrorCode::Error, "no transaction is active"));
        }
        if state.fail_matching.iter().any(|p| p == "COMMIT") {
            state.rollback();
            return Err(state.error(ErrorCode::Error, "injected commit failure"));
        }
        state.txn_depth -= 1;
        if state.txn_depth == 0 {
            state.snapshot = None;
        }
        Ok(())
    }

    fn rollback_transaction(&self) {
        self.state.borrow_mut().rollback();
    }

    fn mark_error_as_ignorable(&self, code: ErrorCode) {
        self.state.borrow_mut().ignorable.push(code);
    }

    fn mark_error_as_unignorable(&self) {
        self.state.borrow_mut().ignorable.clear();
    }

    fn raw_cipher_key(&self, schema: &Schema) -> EngineResult<Bytes> {
        let state = self.state.borrow();
        let path = state
            .attached
            .get(schema.name())
            .ok_or_else(|| state.error(ErrorCode::Error, format!("unknown schema {}", schema)))?;
        let file = state
            .files
            .get(path)
            .ok_or_else(|| state.error(ErrorCode::Error, "file vanished"))?;
        Ok(Bytes::from(file.raw_key.clone()))
    }
}

/// Statement over the shared connection state.
pub(crate) struct MockStatement {
    state: Rc<RefCell<State>>,
    sql: Option<String>,
    blob: Option<Vec<u8>>,
}

impl StatementHandle for MockStatement {
    fn prepare(&mut self, sql: &str) -> EngineResult<()> {
        let state = self.state.borrow();
        state.check_failure(sql)?;
        // Preparing a query against a view fails with the distinguished
        // missing-column code when the view does not carry a referenced
        // column yet.
        if sql.trim_start().starts_with("SELECT") {
            let idents = quoted_idents(sql);
            if let Some(view) = idents.iter().find(|i| state.views.contains_key(*i)) {
                let columns = &state.views[view.as_str()];
                for ident in &idents {
                    if ident == view || state.attached.contains_key(ident.as_str()) {
                        continue;
                    }
                    if !columns.contains(ident) {
                        return Err(state.error(
                            ErrorCode::NoSuchColumn,
                            format!("no such column: {}", ident),
                        ));
                    }
                }
            }
        }
        drop(state);
        self.sql = Some(sql.to_string());
        self.blob = None;
        Ok(())
    }

    fn is_prepared(&self) -> bool {
        self.sql.is_some()
    }

    fn bind_blob(&mut self, blob: &[u8], index: usize) -> EngineResult<()> {
        debug_assert_eq!(index, 1);
        if self.sql.is_none() {
            return Err(EngineError::new(ErrorCode::Error, "statement not prepared"));
        }
        self.blob = Some(blob.to_vec());
        Ok(())
    }

    fn step(&mut self) -> EngineResult<bool> {
        let sql = self
            .sql
            .clone()
            .ok_or_else(|| EngineError::new(ErrorCode::Error, "statement not prepared"))?;
        self.state
            .borrow_mut()
            .run_sql(&sql, self.blob.as_deref())?;
        Ok(false)
    }

    fn reset(&mut self) {}

    fn finalize(&mut self) {
        self.sql = None;
        self.blob = None;
    }
}

fn quoted_idents(sql: &str) -> Vec<String> {
    let mut idents = Vec::new();
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '"' {
            continue;
        }
        let mut ident = String::new();
        while let Some(c) = chars.next() {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    ident.push('"');
                    chars.next();
                } else {
                    break;
                }
            } else {
                ident.push(c);
            }
        }
        idents.push(ident);
    }
    idents
}

fn first_ident(sql: &str) -> EngineResult<String> {
    quoted_idents(sql)
        .into_iter()
        .next()
        .ok_or_else(|| EngineError::new(ErrorCode::Error, "missing identifier"))
}

fn single_quoted(sql: &str) -> Option<String> {
    let start = sql.find('\'')?;
    let rest = &sql[start + 1..];
    let end = rest.find('\'')?;
    Some(rest[..end].to_string())
}

fn like_prefix(sql: &str) -> String {
    sql.split_once("LIKE '")
        .and_then(|(_, rest)| rest.split_once("%'"))
        .map(|(prefix, _)| prefix.to_string())
        .unwrap_or_default()
}

fn two_part(idents: &[String]) -> EngineResult<(String, String)> {
    if idents.len() < 2 {
        return Err(EngineError::new(ErrorCode::Error, "expected schema.table"));
    }
    Ok((idents[0].clone(), idents[1].clone()))
}

fn column_name(definition: &str) -> String {
    let token = definition.split_whitespace().next().unwrap_or_default();
    token.trim_matches('"').to_string()
}
