//! Table layout of an ordered entity and the SQL built from it.
//!
//! Identifiers are validated once and always emitted double-quoted, so a
//! column literally named `order` works. Placeholders are numbered so that
//! the container key, when the table has one, is always `$1`.

use super::StoreError;
use regex::Regex;

/// Offset between the scoped placeholders and the statement's own ones.
const CONTAINER_PARAMS: usize = 1;

#[must_use]
pub fn valid_identifier(name: &str) -> bool {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").is_ok_and(|re| re.is_match(name))
}

#[must_use]
pub fn valid_table_name(name: &str) -> bool {
    match name.split_once('.') {
        Some((schema, table)) => valid_identifier(schema) && valid_identifier(table),
        None => valid_identifier(name),
    }
}

fn quote(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{part}\""))
        .collect::<Vec<_>>()
        .join(".")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedTable {
    table: String,
    key_column: String,
    container_column: Option<String>,
    order_column: String,
    deleted_column: Option<String>,
}

impl OrderedTable {
    /// A global (container-less) table keyed by `id` and ordered by `order`.
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            key_column: "id".to_string(),
            container_column: None,
            order_column: "order".to_string(),
            deleted_column: None,
        }
    }

    #[must_use]
    pub fn with_key_column(mut self, column: impl Into<String>) -> Self {
        self.key_column = column.into();
        self
    }

    #[must_use]
    pub fn with_container_column(mut self, column: impl Into<String>) -> Self {
        self.container_column = Some(column.into());
        self
    }

    #[must_use]
    pub fn with_order_column(mut self, column: impl Into<String>) -> Self {
        self.order_column = column.into();
        self
    }

    #[must_use]
    pub fn with_deleted_column(mut self, column: impl Into<String>) -> Self {
        self.deleted_column = Some(column.into());
        self
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    #[must_use]
    pub fn is_scoped(&self) -> bool {
        self.container_column.is_some()
    }

    #[must_use]
    pub fn has_deleted_column(&self) -> bool {
        self.deleted_column.is_some()
    }

    /// # Errors
    /// Returns `StoreError::InvalidIdentifier` naming the first bad identifier.
    pub fn validate(&self) -> Result<(), StoreError> {
        if !valid_table_name(&self.table) {
            return Err(StoreError::InvalidIdentifier(self.table.clone()));
        }
        let columns = [
            Some(&self.key_column),
            self.container_column.as_ref(),
            Some(&self.order_column),
            self.deleted_column.as_ref(),
        ];
        for column in columns.into_iter().flatten() {
            if !valid_identifier(column) {
                return Err(StoreError::InvalidIdentifier(column.clone()));
            }
        }
        Ok(())
    }

    /// Placeholder number for the `n`-th (1-based) statement parameter.
    fn param(&self, n: usize) -> String {
        if self.is_scoped() {
            format!("${}", n + CONTAINER_PARAMS)
        } else {
            format!("${n}")
        }
    }

    /// Predicate selecting the container's rows, active or not.
    fn scope(&self) -> String {
        match &self.container_column {
            Some(column) => format!("{} = $1", quote(column)),
            None => "TRUE".to_string(),
        }
    }

    /// Predicate selecting the container's active rows.
    fn active_scope(&self) -> String {
        match &self.deleted_column {
            Some(column) => format!("{} AND NOT {}", self.scope(), quote(column)),
            None => self.scope(),
        }
    }

    pub(crate) fn lock_sql(&self) -> String {
        format!(
            "SELECT {key}, {order} FROM {table} WHERE {scope} ORDER BY {order} DESC FOR UPDATE",
            key = quote(&self.key_column),
            order = quote(&self.order_column),
            table = quote(&self.table),
            scope = self.active_scope(),
        )
    }

    pub(crate) fn rows_sql(&self) -> String {
        format!(
            "SELECT {key}, {order} FROM {table} WHERE {scope} ORDER BY {order} ASC",
            key = quote(&self.key_column),
            order = quote(&self.order_column),
            table = quote(&self.table),
            scope = self.active_scope(),
        )
    }

    pub(crate) fn count_sql(&self) -> String {
        format!(
            "SELECT COUNT(*) FROM {table} WHERE {scope}",
            table = quote(&self.table),
            scope = self.active_scope(),
        )
    }

    /// Params: key, order.
    pub(crate) fn update_order_sql(&self) -> String {
        let revive = self
            .deleted_column
            .as_ref()
            .map(|column| format!(", {} = FALSE", quote(column)))
            .unwrap_or_default();
        format!(
            "UPDATE {table} SET {order} = {p_order}{revive} WHERE {scope} AND {key} = {p_key}",
            table = quote(&self.table),
            order = quote(&self.order_column),
            key = quote(&self.key_column),
            scope = self.scope(),
            p_key = self.param(1),
            p_order = self.param(2),
        )
    }

    /// Params: key, order.
    pub(crate) fn insert_sql(&self) -> String {
        let mut columns = Vec::new();
        let mut values = Vec::new();
        if let Some(column) = &self.container_column {
            columns.push(quote(column));
            values.push("$1".to_string());
        }
        columns.push(quote(&self.key_column));
        values.push(self.param(1));
        columns.push(quote(&self.order_column));
        values.push(self.param(2));
        format!(
            "INSERT INTO {table} ({columns}) VALUES ({values})",
            table = quote(&self.table),
            columns = columns.join(", "),
            values = values.join(", "),
        )
    }

    /// Params: key.
    pub(crate) fn delete_sql(&self) -> String {
        format!(
            "DELETE FROM {table} WHERE {scope} AND {key} = {p_key}",
            table = quote(&self.table),
            key = quote(&self.key_column),
            scope = self.scope(),
            p_key = self.param(1),
        )
    }

    /// Params: key. `None` when the table has no soft-delete column.
    pub(crate) fn mark_deleted_sql(&self) -> Option<String> {
        let deleted = self.deleted_column.as_ref()?;
        Some(format!(
            "UPDATE {table} SET {deleted} = TRUE WHERE {scope} AND {key} = {p_key} RETURNING {order}",
            table = quote(&self.table),
            deleted = quote(deleted),
            key = quote(&self.key_column),
            order = quote(&self.order_column),
            scope = self.scope(),
            p_key = self.param(1),
        ))
    }

    /// Params: delta, low, high and, when `except` is set, the excluded key.
    pub(crate) fn offset_sql(&self, except: bool) -> String {
        let exclude = if except {
            format!(" AND {} <> {}", quote(&self.key_column), self.param(4))
        } else {
            String::new()
        };
        format!(
            "UPDATE {table} SET {order} = {order} + {p_delta} WHERE {scope} AND {order} BETWEEN {p_low} AND {p_high}{exclude}",
            table = quote(&self.table),
            order = quote(&self.order_column),
            scope = self.active_scope(),
            p_delta = self.param(1),
            p_low = self.param(2),
            p_high = self.param(3),
        )
    }

    /// `CREATE` statements for a standalone index table with both unique
    /// constraints. The order constraint is partial when soft deletes are
    /// tracked, so stale orders of deleted rows never collide.
    #[must_use]
    pub fn schema_statements(&self) -> Vec<String> {
        let table = quote(&self.table);
        let key = quote(&self.key_column);
        let order = quote(&self.order_column);
        let base = self.table.replace('.', "_");

        let mut columns = vec![format!("{key} UUID NOT NULL")];
        let mut member = Vec::new();
        let mut position = Vec::new();
        if let Some(column) = &self.container_column {
            columns.push(format!("{} UUID NOT NULL", quote(column)));
            member.push(quote(column));
            position.push(quote(column));
        }
        member.push(key.clone());
        position.push(order.clone());
        columns.push(format!("{order} INTEGER NOT NULL CHECK ({order} >= 0)"));
        if let Some(column) = &self.deleted_column {
            columns.push(format!("{} BOOLEAN NOT NULL DEFAULT FALSE", quote(column)));
        }

        let partial = self
            .deleted_column
            .as_ref()
            .map(|column| format!(" WHERE NOT {}", quote(column)))
            .unwrap_or_default();

        vec![
            format!(
                "CREATE TABLE IF NOT EXISTS {table} (\n    {}\n)",
                columns.join(",\n    ")
            ),
            format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS \"{base}_member_key\" ON {table} ({})",
                member.join(", ")
            ),
            format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS \"{base}_position_key\" ON {table} ({}){partial}",
                position.join(", ")
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps() -> OrderedTable {
        OrderedTable::new("steps")
            .with_container_column("lesson_id")
            .with_deleted_column("is_deleted")
    }

    #[test]
    fn identifiers_are_validated() {
        assert!(valid_identifier("order"));
        assert!(valid_identifier("_lesson_id2"));
        assert!(!valid_identifier("2fast"));
        assert!(!valid_identifier("drop table"));
        assert!(!valid_identifier("x\"y"));
        assert!(!valid_identifier(""));
        assert!(valid_table_name("edu.steps"));
        assert!(!valid_table_name("edu.steps.x"));
    }

    #[test]
    fn validate_rejects_bad_columns() {
        assert!(steps().validate().is_ok());
        let err = steps().with_order_column("order;--").validate();
        assert!(matches!(err, Err(StoreError::InvalidIdentifier(name)) if name == "order;--"));
        assert!(OrderedTable::new("bad name").validate().is_err());
    }

    #[test]
    fn scoped_statements_bind_container_first() {
        let table = steps();
        assert_eq!(
            table.lock_sql(),
            r#"SELECT "id", "order" FROM "steps" WHERE "lesson_id" = $1 AND NOT "is_deleted" ORDER BY "order" DESC FOR UPDATE"#
        );
        assert_eq!(
            table.update_order_sql(),
            r#"UPDATE "steps" SET "order" = $3, "is_deleted" = FALSE WHERE "lesson_id" = $1 AND "id" = $2"#
        );
        assert_eq!(
            table.insert_sql(),
            r#"INSERT INTO "steps" ("lesson_id", "id", "order") VALUES ($1, $2, $3)"#
        );
        assert_eq!(
            table.offset_sql(true),
            r#"UPDATE "steps" SET "order" = "order" + $2 WHERE "lesson_id" = $1 AND NOT "is_deleted" AND "order" BETWEEN $3 AND $4 AND "id" <> $5"#
        );
    }

    #[test]
    fn global_statements_start_at_first_param() {
        let table = OrderedTable::new("edu.classroom_projects")
            .with_key_column("project_id")
            .with_order_column("position");
        assert_eq!(
            table.delete_sql(),
            r#"DELETE FROM "edu"."classroom_projects" WHERE TRUE AND "project_id" = $1"#
        );
        assert_eq!(
            table.offset_sql(false),
            r#"UPDATE "edu"."classroom_projects" SET "position" = "position" + $1 WHERE TRUE AND "position" BETWEEN $2 AND $3"#
        );
        assert!(table.mark_deleted_sql().is_none());
    }

    #[test]
    fn schema_uses_partial_order_index_with_soft_deletes() {
        let statements = steps().schema_statements();
        assert_eq!(statements.len(), 3);
        assert!(statements[0].starts_with(r#"CREATE TABLE IF NOT EXISTS "steps""#));
        assert!(statements[0].contains(r#""is_deleted" BOOLEAN NOT NULL DEFAULT FALSE"#));
        assert_eq!(
            statements[1],
            r#"CREATE UNIQUE INDEX IF NOT EXISTS "steps_member_key" ON "steps" ("lesson_id", "id")"#
        );
        assert_eq!(
            statements[2],
            r#"CREATE UNIQUE INDEX IF NOT EXISTS "steps_position_key" ON "steps" ("lesson_id", "order") WHERE NOT "is_deleted""#
        );
    }

    #[test]
    fn schema_without_container_indexes_key_and_order_alone() {
        let statements = OrderedTable::new("projects").schema_statements();
        assert!(statements[1].ends_with(r#"ON "projects" ("id")"#));
        assert!(statements[2].ends_with(r#"ON "projects" ("order")"#));
    }
}
