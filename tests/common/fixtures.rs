use indoc::indoc;
use pgdelta::schema::{
    CheckConstraintDefinition, ColumnDefinition, ForeignKeyDefinition, Identity, IndexDefinition,
    TableDefinition, TriggerDefinition, TriggerEvent, TriggerLevel, TriggerTiming,
    UniqueConstraintDefinition,
};
use pgdelta::SchemaSnapshot;

/// Snapshots built through the library API
pub mod snapshots {
    use super::*;

    pub fn books(name: &str) -> TableDefinition {
        TableDefinition::new(name)
            .with_column(ColumnDefinition::new("id", "integer"))
            .with_column(ColumnDefinition::new("title", "text"))
            .with_primary_key(&["id"])
    }

    pub fn users() -> TableDefinition {
        TableDefinition::new("users")
            .with_column(ColumnDefinition::new("id", "integer").with_identity(Identity::ByDefault))
            .with_column(ColumnDefinition::new("book_id", "integer"))
            .with_foreign_key(ForeignKeyDefinition::new(
                "users",
                vec!["book_id".into()],
                "public",
                "books",
                vec!["id".into()],
            ))
    }

    /// A table carrying one of every dependent object kind.
    pub fn fully_loaded_books() -> TableDefinition {
        books("books")
            .with_column(ColumnDefinition::new("isbn", "text"))
            .with_unique(UniqueConstraintDefinition::new("books", vec!["isbn".into()]))
            .with_check(CheckConstraintDefinition::new("books", "length(title) > 0"))
            .with_index(IndexDefinition::new("books", vec!["title".into()]))
            .with_trigger(TriggerDefinition::build(
                "books",
                None,
                TriggerTiming::Before,
                vec![TriggerEvent::Update],
                TriggerLevel::Row,
                None,
                "touch_updated_at",
            ))
    }

    pub fn library() -> SchemaSnapshot {
        SchemaSnapshot::new("public")
            .with_table(fully_loaded_books())
            .with_table(users())
    }
}

/// Declarative schema files
pub mod schema_files {
    use super::*;

    pub const BOOKS_AND_USERS: &str = indoc! {r#"
        [[schemas]]
        name = "public"

        [[schemas.tables]]
        name = "books"
        primaryKey = ["id"]
        columns = [
          { name = "id", type = "integer" },
          { name = "title", type = "text" },
        ]

        [[schemas.tables]]
        name = "users"
        columns = [
          { name = "id", type = "serial" },
          { name = "bookId", type = "integer" },
        ]
        foreignKeys = [
          { columns = ["bookId"], references = { table = "books", columns = ["id"] } },
        ]
    "#};

    pub const BOOKS_WITH_INDEX: &str = indoc! {r#"
        [[schemas]]
        name = "public"

        [[schemas.tables]]
        name = "books"
        primaryKey = ["id"]
        columns = [
          { name = "id", type = "integer" },
          { name = "title", type = "text" },
        ]
        indexes = [{ columns = ["title"] }]
    "#};

    pub const NEW_BOOKS_WITH_INDEX: &str = indoc! {r#"
        [[schemas]]
        name = "public"

        [[schemas.tables]]
        name = "newBooks"
        renameFrom = "books"
        primaryKey = ["id"]
        columns = [
          { name = "id", type = "integer" },
          { name = "title", type = "text" },
        ]
        indexes = [{ columns = ["title"] }]
    "#};

    pub const BOOKS_TITLE_REQUIRED: &str = indoc! {r#"
        [[schemas]]
        name = "public"

        [[schemas.tables]]
        name = "books"
        primaryKey = ["id"]
        columns = [
          { name = "id", type = "integer" },
          { name = "title", type = "text", nullable = false },
        ]
        indexes = [{ columns = ["title"] }]
    "#};

    pub const USERS_WITH_MAIL: &str = indoc! {r#"
        [[schemas]]
        name = "public"

        [[schemas.tables]]
        name = "users"
        primaryKey = ["id"]
        columns = [
          { name = "id", type = "integer" },
          { name = "mail", type = "text" },
        ]
        checks = [{ expression = "mail <> ''" }]
        indexes = [{ columns = ["lower(mail)"], predicate = "mail IS NOT NULL" }]
    "#};

    pub const USERS_WITH_EMAIL: &str = indoc! {r#"
        [[schemas]]
        name = "public"

        [[schemas.tables]]
        name = "users"
        primaryKey = ["id"]
        columns = [
          { name = "id", type = "integer" },
          { name = "email", type = "text", renameFrom = "mail" },
        ]
        checks = [{ expression = "email <> ''" }]
        indexes = [{ columns = ["lower(email)"], predicate = "email IS NOT NULL" }]
    "#};
}
