use std::fmt;

use rusqlite::{Connection, OptionalExtension, params};
use schemashift_common::{Error, Result};
use tracing::debug;

/// Side table holding column comments; SQLite has no `COMMENT ON`.
pub const COMMENTS_TABLE: &str = "_schema_comments";

const REBUILD_PREFIX: &str = "_schemashift_rebuild_";

/// Declared column type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Blob,
    Boolean,
    DateTime,
    Json,
    Varchar(u32),
    Custom(String),
}

impl ColumnType {
    pub fn sql(&self) -> String {
        match self {
            ColumnType::Integer => "INTEGER".into(),
            ColumnType::Real => "REAL".into(),
            ColumnType::Text => "TEXT".into(),
            ColumnType::Blob => "BLOB".into(),
            ColumnType::Boolean => "BOOLEAN".into(),
            ColumnType::DateTime => "DATETIME".into(),
            ColumnType::Json => "JSON".into(),
            ColumnType::Varchar(len) => format!("VARCHAR({len})"),
            ColumnType::Custom(decl) => decl.clone(),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql())
    }
}

/// Definition of a column to create or add.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
    /// Raw SQL default expression, e.g. `'pending'` or `(datetime('now'))`.
    pub default: Option<String>,
    pub comment: Option<String>,
    pub primary_key: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: true,
            default: None,
            comment: None,
            primary_key: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn default_sql(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    pub fn comment(mut self, text: impl Into<String>) -> Self {
        self.comment = Some(text.into());
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    fn to_sql(&self) -> String {
        let mut sql = format!("{} {}", quote_ident(&self.name), self.ty.sql());
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
        } else if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        sql
    }
}

/// A column as reported by `pragma_table_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
    pub not_null: bool,
    pub default: Option<String>,
    /// 1-based position within the primary key, 0 if not part of it.
    pub pk: i64,
}

/// DDL capability handed to a migration unit's apply and revert steps.
///
/// Every call runs on the transaction the runner opened for the unit; the
/// handle keeps nothing between calls.
pub struct SchemaHandle<'a> {
    conn: &'a Connection,
}

impl<'a> SchemaHandle<'a> {
    pub(crate) fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Run one or more raw statements.
    pub fn execute(&self, sql: &str) -> Result<()> {
        self.conn
            .execute_batch(sql)
            .map_err(|e| Error::Database(format!("statement failed: {e}")))
    }

    pub fn create_table(&self, table: &str, columns: &[ColumnDef]) -> Result<()> {
        if columns.is_empty() {
            return Err(Error::Database(format!(
                "cannot create table {table} without columns"
            )));
        }
        let defs: Vec<String> = columns.iter().map(ColumnDef::to_sql).collect();
        let sql = format!("CREATE TABLE {} ({})", quote_ident(table), defs.join(", "));
        self.conn
            .execute(&sql, [])
            .map_err(|e| Error::Database(format!("failed to create table {table}: {e}")))?;

        for column in columns {
            if let Some(comment) = &column.comment {
                self.write_comment(table, &column.name, Some(comment))?;
            }
        }
        Ok(())
    }

    pub fn drop_table(&self, table: &str) -> Result<()> {
        self.conn
            .execute(&format!("DROP TABLE {}", quote_ident(table)), [])
            .map_err(|e| Error::Database(format!("failed to drop table {table}: {e}")))?;

        if table_exists(self.conn, COMMENTS_TABLE)? {
            self.conn
                .execute(
                    &format!("DELETE FROM {COMMENTS_TABLE} WHERE table_name = ?1"),
                    params![table],
                )
                .map_err(|e| Error::Database(format!("failed to clear comments: {e}")))?;
        }
        Ok(())
    }

    pub fn add_column(&self, table: &str, column: ColumnDef) -> Result<()> {
        if column.primary_key {
            return Err(Error::Database(format!(
                "cannot add primary key column {table}.{}",
                column.name
            )));
        }
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {}",
            quote_ident(table),
            column.to_sql()
        );
        self.conn.execute(&sql, []).map_err(|e| {
            Error::Database(format!("failed to add column {table}.{}: {e}", column.name))
        })?;

        if let Some(comment) = &column.comment {
            self.write_comment(table, &column.name, Some(comment))?;
        }
        Ok(())
    }

    pub fn remove_column(&self, table: &str, column: &str) -> Result<()> {
        let sql = format!(
            "ALTER TABLE {} DROP COLUMN {}",
            quote_ident(table),
            quote_ident(column)
        );
        self.conn.execute(&sql, []).map_err(|e| {
            Error::Database(format!("failed to remove column {table}.{column}: {e}"))
        })?;

        if table_exists(self.conn, COMMENTS_TABLE)? {
            self.write_comment(table, column, None)?;
        }
        Ok(())
    }

    /// Change the declared type of `column`.
    ///
    /// SQLite cannot alter a column in place, so the table is rebuilt. The
    /// shadow table is created from the stored `CREATE TABLE` text with only
    /// the target column's type rewritten, so UNIQUE, CHECK, COLLATE, foreign
    /// key clauses and AUTOINCREMENT carry over. Rows are copied, the original
    /// is dropped, the shadow renamed into place and the table's own indexes
    /// and triggers recreated. Views and triggers elsewhere that name the
    /// table keep working.
    ///
    /// The drop fails on a table with referencing rows while foreign key
    /// enforcement is on; the runner suspends it around each transaction and
    /// runs `foreign_key_check` before committing.
    pub fn change_column_type(&self, table: &str, column: &str, ty: ColumnType) -> Result<()> {
        let columns = table_columns(self.conn, table)?;
        if columns.is_empty() {
            return Err(Error::NotFound(format!("table {table}")));
        }
        let target = columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(column))
            .ok_or_else(|| Error::NotFound(format!("column {table}.{column}")))?;

        let new_type = ty.sql();
        if target.declared_type.eq_ignore_ascii_case(&new_type) {
            debug!("{table}.{column} already declared as {new_type}");
            return Ok(());
        }

        let original = table_sql(self.conn, table)?;
        let shadow = format!("{REBUILD_PREFIX}{table}");
        let definition = retype_column(&original, column, &new_type).ok_or_else(|| {
            Error::Database(format!(
                "could not locate {table}.{column} in the table definition"
            ))
        })?;
        let dependents = dependent_objects(self.conn, table)?;

        let names: Vec<String> = columns.iter().map(|c| quote_ident(&c.name)).collect();
        let names = names.join(", ");
        let sql = format!(
            "CREATE TABLE {shadow_q} {definition};
             INSERT INTO {shadow_q} ({names}) SELECT {names} FROM {table_q};
             DROP TABLE {table_q};
             ALTER TABLE {shadow_q} RENAME TO {table_q};",
            shadow_q = quote_ident(&shadow),
            table_q = quote_ident(table),
        );
        self.with_legacy_alter_table(|| self.conn.execute_batch(&sql))
            .map_err(|e| {
                Error::Database(format!(
                    "failed to change type of {table}.{column} to {new_type}: {e}"
                ))
            })?;

        for ddl in dependents {
            self.conn
                .execute_batch(&ddl)
                .map_err(|e| Error::Database(format!("failed to restore {ddl:?}: {e}")))?;
        }
        Ok(())
    }

    /// Set (or clear, with `None`) the descriptive comment of a column.
    pub fn set_comment(&self, table: &str, column: &str, comment: Option<&str>) -> Result<()> {
        if !table_columns(self.conn, table)?.iter().any(|c| c.name == column) {
            return Err(Error::NotFound(format!("column {table}.{column}")));
        }
        self.write_comment(table, column, comment)
    }

    pub fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        table_columns(self.conn, table)
    }

    /// Run `work` with `legacy_alter_table` on. A rename then leaves views and
    /// other tables' triggers alone instead of re-parsing them against a
    /// schema where the rebuilt table is briefly missing.
    fn with_legacy_alter_table<T>(
        &self,
        work: impl FnOnce() -> rusqlite::Result<T>,
    ) -> rusqlite::Result<T> {
        let previous: i64 = self
            .conn
            .query_row("PRAGMA legacy_alter_table", [], |row| row.get(0))?;
        self.conn.execute_batch("PRAGMA legacy_alter_table = ON")?;
        let result = work();
        let restored = self
            .conn
            .execute_batch(&format!("PRAGMA legacy_alter_table = {previous}"));
        let value = result?;
        restored?;
        Ok(value)
    }

    fn write_comment(&self, table: &str, column: &str, comment: Option<&str>) -> Result<()> {
        let result = match comment {
            Some(text) => self
                .conn
                .execute_batch(&format!(
                    "CREATE TABLE IF NOT EXISTS {COMMENTS_TABLE} (
                        table_name TEXT NOT NULL,
                        column_name TEXT NOT NULL,
                        comment TEXT NOT NULL,
                        PRIMARY KEY (table_name, column_name)
                    )"
                ))
                .and_then(|_| {
                    self.conn.execute(
                        &format!(
                            "INSERT INTO {COMMENTS_TABLE} (table_name, column_name, comment)
                             VALUES (?1, ?2, ?3)
                             ON CONFLICT (table_name, column_name)
                             DO UPDATE SET comment = excluded.comment"
                        ),
                        params![table, column, text],
                    )
                }),
            None if table_exists(self.conn, COMMENTS_TABLE)? => self.conn.execute(
                &format!(
                    "DELETE FROM {COMMENTS_TABLE} WHERE table_name = ?1 AND column_name = ?2"
                ),
                params![table, column],
            ),
            None => Ok(0),
        };
        result
            .map(|_| ())
            .map_err(|e| Error::Database(format!("failed to write comment on {table}.{column}: {e}")))
    }
}

/// Quote an SQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub(crate) fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )
        .map_err(|e| Error::Database(format!("failed to inspect schema: {e}")))?;
    Ok(count > 0)
}

pub(crate) fn table_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>> {
    let mut stmt = conn
        .prepare("SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid")
        .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

    let rows = stmt
        .query_map(params![table], |row| {
            Ok(ColumnInfo {
                name: row.get(0)?,
                declared_type: row.get(1)?,
                not_null: row.get::<_, i64>(2)? != 0,
                default: row.get(3)?,
                pk: row.get(4)?,
            })
        })
        .map_err(|e| Error::Database(format!("failed to read columns of {table}: {e}")))?;

    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::Database(format!("failed to read columns of {table}: {e}")))
}

pub(crate) fn column_comment(conn: &Connection, table: &str, column: &str) -> Result<Option<String>> {
    if !table_exists(conn, COMMENTS_TABLE)? {
        return Ok(None);
    }
    conn.query_row(
        &format!("SELECT comment FROM {COMMENTS_TABLE} WHERE table_name = ?1 AND column_name = ?2"),
        params![table, column],
        |row| row.get(0),
    )
    .optional()
    .map_err(|e| Error::Database(format!("failed to read comment: {e}")))
}

/// Fail if any row references a missing parent.
pub(crate) fn check_foreign_keys(conn: &Connection) -> Result<()> {
    let mut stmt = conn
        .prepare("PRAGMA foreign_key_check")
        .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;
    let violations = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<i64>>(1)?,
                row.get::<_, String>(2)?,
            ))
        })
        .map_err(|e| Error::Database(format!("failed to check foreign keys: {e}")))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::Database(format!("failed to check foreign keys: {e}")))?;

    match violations.first() {
        None => Ok(()),
        Some((child, rowid, parent)) => Err(Error::Database(format!(
            "foreign key check failed: {} row(s) without a parent, \
             first {child} rowid {} -> {parent}",
            violations.len(),
            rowid.map_or_else(|| "?".to_string(), |r| r.to_string()),
        ))),
    }
}

fn table_sql(conn: &Connection, table: &str) -> Result<String> {
    conn.query_row(
        "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table],
        |row| row.get(0),
    )
    .optional()
    .map_err(|e| Error::Database(format!("failed to read definition of {table}: {e}")))?
    .ok_or_else(|| Error::NotFound(format!("table {table}")))
}

/// Explicit indexes and triggers attached to `table`.
fn dependent_objects(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(
            "SELECT sql FROM sqlite_master
             WHERE type IN ('index', 'trigger') AND tbl_name = ?1 AND sql IS NOT NULL
             ORDER BY type, name",
        )
        .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

    let rows = stmt
        .query_map(params![table], |row| row.get::<_, String>(0))
        .map_err(|e| Error::Database(format!("failed to read indexes of {table}: {e}")))?;

    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::Database(format!("failed to read indexes of {table}: {e}")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Word,
    Quoted,
    Open,
    Close,
    Comma,
    Other,
}

#[derive(Debug, Clone, Copy)]
struct Token {
    kind: TokenKind,
    start: usize,
    end: usize,
}

/// Split SQL into the tokens needed to walk a `CREATE TABLE` body. Comments
/// and whitespace are dropped; string and identifier quotes are kept whole.
fn tokenize(sql: &str) -> Vec<Token> {
    let bytes = sql.as_bytes();
    let len = bytes.len();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < len {
        let start = i;
        let kind = match bytes[i] {
            b if b.is_ascii_whitespace() => {
                i += 1;
                continue;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < len && bytes[i] != b'\n' {
                    i += 1;
                }
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i < len && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    i += 1;
                }
                i = (i + 2).min(len);
                continue;
            }
            quote @ (b'\'' | b'"' | b'`') => {
                i += 1;
                while i < len {
                    if bytes[i] == quote {
                        if bytes.get(i + 1) == Some(&quote) {
                            i += 2;
                            continue;
                        }
                        i += 1;
                        break;
                    }
                    i += 1;
                }
                TokenKind::Quoted
            }
            b'[' => {
                while i < len && bytes[i] != b']' {
                    i += 1;
                }
                i = (i + 1).min(len);
                TokenKind::Quoted
            }
            b'(' => {
                i += 1;
                TokenKind::Open
            }
            b')' => {
                i += 1;
                TokenKind::Close
            }
            b',' => {
                i += 1;
                TokenKind::Comma
            }
            b if is_word_byte(b) => {
                while i < len && is_word_byte(bytes[i]) {
                    i += 1;
                }
                TokenKind::Word
            }
            _ => {
                i += 1;
                TokenKind::Other
            }
        };
        tokens.push(Token { kind, start, end: i });
    }
    tokens
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

/// Identifier text with any quoting removed.
fn unquote(raw: &str) -> String {
    let bytes = raw.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(&b'['), Some(&b']')) if raw.len() >= 2 => raw[1..raw.len() - 1].to_string(),
        (Some(&q), Some(&last))
            if matches!(q, b'"' | b'`' | b'\'') && q == last && raw.len() >= 2 =>
        {
            let quote = char::from(q).to_string();
            raw[1..raw.len() - 1].replace(&quote.repeat(2), &quote)
        }
        _ => raw.to_string(),
    }
}

const TABLE_CONSTRAINT_KEYWORDS: [&str; 5] = ["CONSTRAINT", "PRIMARY", "UNIQUE", "CHECK", "FOREIGN"];

const COLUMN_CONSTRAINT_KEYWORDS: [&str; 11] = [
    "CONSTRAINT",
    "PRIMARY",
    "NOT",
    "NULL",
    "UNIQUE",
    "CHECK",
    "DEFAULT",
    "COLLATE",
    "REFERENCES",
    "GENERATED",
    "AS",
];

fn is_keyword(sql: &str, token: &Token, keywords: &[&str]) -> bool {
    token.kind == TokenKind::Word
        && keywords
            .iter()
            .any(|k| k.eq_ignore_ascii_case(&sql[token.start..token.end]))
}

/// Rewrite the type of `column` inside a stored `CREATE TABLE` statement.
///
/// Returns everything from the opening parenthesis on, ready to follow a new
/// table name; `None` if the column definition cannot be found.
fn retype_column(create_sql: &str, column: &str, new_type: &str) -> Option<String> {
    let tokens = tokenize(create_sql);
    let open = tokens.iter().position(|t| t.kind == TokenKind::Open)?;

    // Token index ranges of the top-level definitions.
    let mut definitions = Vec::new();
    let mut depth = 0usize;
    let mut def_start = open + 1;
    for (idx, token) in tokens.iter().enumerate().skip(open) {
        match token.kind {
            TokenKind::Open => depth += 1,
            TokenKind::Close => {
                depth -= 1;
                if depth == 0 {
                    definitions.push(def_start..idx);
                    break;
                }
            }
            TokenKind::Comma if depth == 1 => {
                definitions.push(def_start..idx);
                def_start = idx + 1;
            }
            _ => {}
        }
    }

    let definition = definitions.into_iter().find(|range| {
        tokens.get(range.start).is_some_and(|first| {
            range.start < range.end
                && !is_keyword(create_sql, first, &TABLE_CONSTRAINT_KEYWORDS)
                && matches!(first.kind, TokenKind::Word | TokenKind::Quoted)
                && unquote(&create_sql[first.start..first.end]).eq_ignore_ascii_case(column)
        })
    })?;

    let name = tokens[definition.start];
    let mut type_end = definition.start + 1;
    while type_end < definition.end
        && tokens[type_end].kind == TokenKind::Word
        && !is_keyword(create_sql, &tokens[type_end], &COLUMN_CONSTRAINT_KEYWORDS)
    {
        type_end += 1;
    }
    let has_type_words = type_end > definition.start + 1;
    if has_type_words && type_end < definition.end && tokens[type_end].kind == TokenKind::Open {
        // Length arguments, e.g. VARCHAR(20) or DECIMAL(10, 2)
        let mut depth = 0usize;
        while type_end < definition.end {
            match tokens[type_end].kind {
                TokenKind::Open => depth += 1,
                TokenKind::Close => depth -= 1,
                _ => {}
            }
            type_end += 1;
            if depth == 0 {
                break;
            }
        }
    }

    let (replace_from, replace_to, replacement) = if has_type_words {
        (
            tokens[definition.start + 1].start,
            tokens[type_end - 1].end,
            new_type.to_string(),
        )
    } else {
        (name.end, name.end, format!(" {new_type}"))
    };

    let body_start = tokens[open].start;
    Some(format!(
        "{}{replacement}{}",
        &create_sql[body_start..replace_from],
        &create_sql[replace_to..]
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accounts(conn: &Connection) {
        conn.execute_batch(
            "CREATE TABLE accounts (
                id INTEGER PRIMARY KEY,
                email TEXT NOT NULL DEFAULT '',
                external_ref INTEGER
            );
            CREATE INDEX idx_accounts_email ON accounts(email);
            INSERT INTO accounts (id, email, external_ref) VALUES (1, 'a@example.com', 42);",
        )
        .unwrap();
    }

    #[test]
    fn add_column_records_comment() {
        let conn = Connection::open_in_memory().unwrap();
        accounts(&conn);
        let schema = SchemaHandle::new(&conn);

        schema
            .add_column(
                "accounts",
                ColumnDef::new("display_name", ColumnType::Text).comment("shown in the UI"),
            )
            .unwrap();

        let columns = table_columns(&conn, "accounts").unwrap();
        let added = columns.iter().find(|c| c.name == "display_name").unwrap();
        assert_eq!(added.declared_type, "TEXT");
        assert!(!added.not_null);
        assert_eq!(
            column_comment(&conn, "accounts", "display_name").unwrap().as_deref(),
            Some("shown in the UI")
        );
    }

    #[test]
    fn add_column_twice_is_rejected_by_the_store() {
        let conn = Connection::open_in_memory().unwrap();
        accounts(&conn);
        let schema = SchemaHandle::new(&conn);

        let def = ColumnDef::new("nickname", ColumnType::Text);
        schema.add_column("accounts", def.clone()).unwrap();
        let err = schema.add_column("accounts", def).unwrap_err();
        assert!(err.to_string().contains("failed to add column accounts.nickname"));
    }

    #[test]
    fn remove_column_clears_comment() {
        let conn = Connection::open_in_memory().unwrap();
        accounts(&conn);
        let schema = SchemaHandle::new(&conn);
        schema
            .add_column(
                "accounts",
                ColumnDef::new("nickname", ColumnType::Text).comment("optional"),
            )
            .unwrap();

        schema.remove_column("accounts", "nickname").unwrap();

        assert!(!table_columns(&conn, "accounts").unwrap().iter().any(|c| c.name == "nickname"));
        assert_eq!(column_comment(&conn, "accounts", "nickname").unwrap(), None);
    }

    #[test]
    fn change_column_type_keeps_rows_keys_and_indexes() {
        let conn = Connection::open_in_memory().unwrap();
        accounts(&conn);
        let schema = SchemaHandle::new(&conn);

        schema
            .change_column_type("accounts", "external_ref", ColumnType::Text)
            .unwrap();

        let columns = table_columns(&conn, "accounts").unwrap();
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["id", "email", "external_ref"]);
        assert_eq!(columns[2].declared_type, "TEXT");
        assert_eq!(columns[0].pk, 1);
        assert!(columns[1].not_null);
        assert_eq!(columns[1].default.as_deref(), Some("''"));

        let (email, external): (String, String) = conn
            .query_row(
                "SELECT email, typeof(external_ref) FROM accounts WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(email, "a@example.com");
        assert_eq!(external, "text");

        let index_count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = 'idx_accounts_email'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(index_count, 1);
        assert!(!table_exists(&conn, "_schemashift_rebuild_accounts").unwrap());
    }

    #[test]
    fn change_column_type_on_missing_column_fails() {
        let conn = Connection::open_in_memory().unwrap();
        accounts(&conn);
        let schema = SchemaHandle::new(&conn);

        let err = schema
            .change_column_type("accounts", "missing", ColumnType::Text)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let err = schema
            .change_column_type("nope", "id", ColumnType::Text)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn set_comment_updates_and_clears() {
        let conn = Connection::open_in_memory().unwrap();
        accounts(&conn);
        let schema = SchemaHandle::new(&conn);

        schema.set_comment("accounts", "email", Some("login address")).unwrap();
        schema.set_comment("accounts", "email", Some("primary login")).unwrap();
        assert_eq!(
            column_comment(&conn, "accounts", "email").unwrap().as_deref(),
            Some("primary login")
        );

        schema.set_comment("accounts", "email", None).unwrap();
        assert_eq!(column_comment(&conn, "accounts", "email").unwrap(), None);

        assert!(schema.set_comment("accounts", "missing", Some("x")).is_err());
    }

    #[test]
    fn create_and_drop_table() {
        let conn = Connection::open_in_memory().unwrap();
        let schema = SchemaHandle::new(&conn);

        schema
            .create_table(
                "notes",
                &[
                    ColumnDef::new("id", ColumnType::Integer).primary_key(),
                    ColumnDef::new("body", ColumnType::Text).not_null().comment("markdown"),
                ],
            )
            .unwrap();
        assert!(table_exists(&conn, "notes").unwrap());
        assert_eq!(
            column_comment(&conn, "notes", "body").unwrap().as_deref(),
            Some("markdown")
        );

        schema.drop_table("notes").unwrap();
        assert!(!table_exists(&conn, "notes").unwrap());
        assert_eq!(column_comment(&conn, "notes", "body").unwrap(), None);
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("accounts"), "\"accounts\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(ColumnType::Varchar(120).to_string(), "VARCHAR(120)");
    }

    fn declared_sql(conn: &Connection, table: &str) -> String {
        table_sql(conn, table).unwrap()
    }

    #[test]
    fn change_column_type_keeps_child_rows_and_their_references() {
        let conn = Connection::open_in_memory().unwrap();
        accounts(&conn);
        conn.execute_batch(
            "CREATE TABLE sessions (
                id INTEGER PRIMARY KEY,
                account_id INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE
            );
            INSERT INTO sessions (id, account_id) VALUES (10, 1);",
        )
        .unwrap();
        let schema = SchemaHandle::new(&conn);

        schema
            .change_column_type("accounts", "external_ref", ColumnType::Text)
            .unwrap();

        check_foreign_keys(&conn).unwrap();
        let sessions: i64 = conn
            .query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))
            .unwrap();
        assert_eq!(sessions, 1);

        conn.execute("DELETE FROM accounts", []).unwrap();
        let err = check_foreign_keys(&conn).unwrap_err();
        assert!(err.to_string().contains("sessions rowid 10 -> accounts"), "{err}");
    }

    #[test]
    fn change_column_type_keeps_views_and_foreign_triggers_working() {
        let conn = Connection::open_in_memory().unwrap();
        accounts(&conn);
        conn.execute_batch(
            "CREATE VIEW account_refs AS SELECT id, external_ref FROM accounts;
             CREATE TABLE audit (account_id INTEGER);
             CREATE TRIGGER audit_touch AFTER INSERT ON audit BEGIN
                 UPDATE accounts SET email = email WHERE id = NEW.account_id;
             END;",
        )
        .unwrap();
        let schema = SchemaHandle::new(&conn);

        schema
            .change_column_type("accounts", "external_ref", ColumnType::Text)
            .unwrap();

        let kind: String = conn
            .query_row("SELECT typeof(external_ref) FROM account_refs WHERE id = 1", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(kind, "text");
        conn.execute("INSERT INTO audit (account_id) VALUES (1)", []).unwrap();

        let legacy: i64 = conn
            .query_row("PRAGMA legacy_alter_table", [], |row| row.get(0))
            .unwrap();
        assert_eq!(legacy, 0);
    }

    #[test]
    fn change_column_type_keeps_column_constraints() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email VARCHAR(120) NOT NULL UNIQUE COLLATE NOCASE CHECK (email <> ''),
                age INTEGER
            );
            INSERT INTO users (email, age) VALUES ('a@example.com', 30);",
        )
        .unwrap();
        let schema = SchemaHandle::new(&conn);

        schema
            .change_column_type("users", "email", ColumnType::Text)
            .unwrap();

        let sql = declared_sql(&conn, "users");
        assert!(sql.contains("email TEXT NOT NULL UNIQUE COLLATE NOCASE CHECK (email <> '')"), "{sql}");
        assert!(sql.contains("AUTOINCREMENT"), "{sql}");
        assert!(conn
            .execute("INSERT INTO users (email) VALUES ('A@EXAMPLE.COM')", [])
            .is_err());
        assert!(conn.execute("INSERT INTO users (email) VALUES ('')", []).is_err());
        conn.execute("INSERT INTO users (email) VALUES ('b@example.com')", [])
            .unwrap();
    }

    #[test]
    fn untyped_column_gains_a_type() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE \"odd table\" (\"key\" PRIMARY KEY, payload)")
            .unwrap();
        let schema = SchemaHandle::new(&conn);

        schema
            .change_column_type("odd table", "payload", ColumnType::Json)
            .unwrap();

        let columns = table_columns(&conn, "odd table").unwrap();
        assert_eq!(columns[0].declared_type, "");
        assert_eq!(columns[1].declared_type, "JSON");
    }

    #[test]
    fn retype_touches_only_the_target_definition() {
        let sql = "CREATE TABLE t (
            a DECIMAL(10, 2) DEFAULT 0, -- money, (really)
            [b c] INTEGER REFERENCES other(id),
            CONSTRAINT t_a CHECK (a >= 0)
        ) WITHOUT ROWID";

        let rewritten = retype_column(sql, "a", "REAL").unwrap();
        assert!(rewritten.starts_with('('));
        assert!(rewritten.contains("a REAL DEFAULT 0"), "{rewritten}");
        assert!(rewritten.contains("CONSTRAINT t_a CHECK (a >= 0)"));
        assert!(rewritten.ends_with(") WITHOUT ROWID"));

        let rewritten = retype_column(sql, "b c", "TEXT").unwrap();
        assert!(rewritten.contains("[b c] TEXT REFERENCES other(id)"), "{rewritten}");

        assert_eq!(retype_column(sql, "t_a", "TEXT"), None);
    }
}
