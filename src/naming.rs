//! Deterministic naming and content fingerprints.
//!
//! Every generated constraint, index and trigger name has the shape
//! `<table prefix>_<8 hex>_<suffix>`. The hash covers the owning table and the
//! object's defining columns (sorted, so declaration order never changes a
//! name), which makes the name a pure function of the object's shape.
//!
//! The same 8-hex-char hash is used as a content fingerprint for defaults,
//! check expressions, indexes and triggers. The fingerprint is written into a
//! `COMMENT ON` when the object is created and read back by the catalog
//! reader, so convergence is decided by comparing hashes and never by parsing
//! the SQL text Postgres hands back.

use sha2::{Digest, Sha256};

/// Postgres truncates identifiers longer than this many bytes.
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Number of hex characters kept from the digest.
pub const HASH_LENGTH: usize = 8;

/// Hash canonical bytes down to an 8-hex-char string.
pub fn short_hash(canonical: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical);
    let mut hex = format!("{:x}", hasher.finalize());
    hex.truncate(HASH_LENGTH);
    hex
}

/// Collapse whitespace runs so formatting differences do not change a hash.
pub fn normalize_sql(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Fingerprint an object definition from its canonical parts.
///
/// `kind` keeps fingerprints of different object kinds apart even when their
/// parts happen to serialize identically.
pub fn content_hash(kind: &str, parts: &[&str]) -> String {
    let mut canonical = String::from(kind);
    for part in parts {
        canonical.push('|');
        canonical.push_str(&normalize_sql(part));
    }
    short_hash(canonical.as_bytes())
}

/// The object a generated name is for, with the inputs its hash covers.
#[derive(Debug, Clone, Copy)]
pub enum NameKind<'a> {
    PrimaryKey {
        columns: &'a [String],
    },
    Unique {
        columns: &'a [String],
    },
    ForeignKey {
        columns: &'a [String],
        target_schema: &'a str,
        target_table: &'a str,
        target_columns: &'a [String],
    },
    Check {
        content_hash: &'a str,
    },
    Index {
        content_hash: &'a str,
    },
    Trigger {
        content_hash: &'a str,
    },
    /// Temporary `CHECK (col IS NOT NULL)` used while adding NOT NULL.
    NotNullCheck {
        column: &'a str,
    },
}

impl NameKind<'_> {
    pub fn suffix(&self) -> &'static str {
        match self {
            NameKind::PrimaryKey { .. } => "pkey",
            NameKind::Unique { .. } => "key",
            NameKind::ForeignKey { .. } => "fkey",
            NameKind::Check { .. } => "check",
            NameKind::Index { .. } => "idx",
            NameKind::Trigger { .. } => "trigger",
            NameKind::NotNullCheck { .. } => "not_null",
        }
    }

    fn canonical(&self, table: &str) -> String {
        let head = format!("{}|{}", self.suffix(), table);
        match self {
            NameKind::PrimaryKey { columns } | NameKind::Unique { columns } => {
                format!("{}|{}", head, sorted_join(columns))
            }
            NameKind::ForeignKey {
                columns,
                target_schema,
                target_table,
                target_columns,
            } => format!(
                "{}|{}|{}.{}|{}",
                head,
                sorted_join(columns),
                target_schema,
                target_table,
                sorted_join(target_columns)
            ),
            NameKind::Check { content_hash }
            | NameKind::Index { content_hash }
            | NameKind::Trigger { content_hash } => format!("{}|{}", head, content_hash),
            NameKind::NotNullCheck { column } => format!("{}|{}", head, column),
        }
    }
}

fn sorted_join(columns: &[String]) -> String {
    let mut sorted: Vec<&str> = columns.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.join(",")
}

/// Build the deterministic name of a generated object on `table`.
pub fn generated_name(table: &str, kind: NameKind<'_>) -> String {
    let hash = short_hash(kind.canonical(table).as_bytes());
    let suffix = kind.suffix();
    let budget = MAX_IDENTIFIER_LENGTH - hash.len() - suffix.len() - 2;
    format!("{}_{}_{}", truncate_to_boundary(table, budget), hash, suffix)
}

fn truncate_to_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

const RESERVED_KEYWORDS: &[&str] = &[
    "all", "analyse", "analyze", "and", "any", "array", "as", "asc", "asymmetric",
    "authorization", "binary", "both", "case", "cast", "check", "collate", "collation",
    "column", "concurrently", "constraint", "create", "cross", "current_catalog",
    "current_date", "current_role", "current_schema", "current_time", "current_timestamp",
    "current_user", "default", "deferrable", "desc", "distinct", "do", "else", "end",
    "except", "false", "fetch", "for", "foreign", "freeze", "from", "full", "grant",
    "group", "having", "ilike", "in", "initially", "inner", "intersect", "into", "is",
    "isnull", "join", "lateral", "leading", "left", "like", "limit", "localtime",
    "localtimestamp", "natural", "not", "notnull", "null", "offset", "on", "only", "or",
    "order", "outer", "overlaps", "placing", "primary", "references", "returning", "right",
    "select", "session_user", "similar", "some", "symmetric", "system_user", "table",
    "tablesample", "then", "to", "trailing", "true", "union", "unique", "user", "using",
    "variadic", "verbose", "when", "where", "window", "with",
];

fn is_plain_identifier(ident: &str) -> bool {
    let mut chars = ident.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_lowercase() || first == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '$')
        && !RESERVED_KEYWORDS.contains(&ident)
}

/// Quote an identifier only when Postgres would otherwise fold or reject it.
pub fn quote_ident(ident: &str) -> String {
    if is_plain_identifier(ident) {
        ident.to_string()
    } else {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }
}

/// `schema.name` with both parts quoted as needed.
pub fn qualified(schema: &str, name: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(name))
}

/// Single-quoted SQL string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Translate a camelCase / PascalCase identifier to snake_case.
///
/// Acronyms stay together: `userID` becomes `user_id`, `HTTPServer` becomes
/// `http_server`. Identifiers that are already snake_case pass through.
pub fn to_snake_case(ident: &str) -> String {
    let chars: Vec<char> = ident.chars().collect();
    let mut out = String::with_capacity(ident.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1).copied();
            let boundary = match prev {
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.is_some_and(|n| n.is_lowercase()),
                _ => false,
            };
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }

    out
}
