//! スキーマ検証済みのSQL生成
//!
//! テーブル名・列名を文字列補間する前に必ず検証します。テーブル名は `Identifier`、
//! タグ列は `TagSchema` に登録済みの名前だけを受け付けます。

use crate::error::SchemaError;
use crate::schema::{is_valid_identifier, TagSchema, PRIMARY_KEY};

/// 検証済みのSQL識別子
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier(String);

impl Identifier {
    pub fn new(name: &str) -> Result<Self, SchemaError> {
        if !is_valid_identifier(name) {
            return Err(SchemaError::InvalidIdentifier(name.to_string()));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// ダブルクォートで囲んだ形
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 1テーブル分のクエリビルダー
#[derive(Debug, Clone)]
pub struct TableQuery<'a> {
    table: Identifier,
    schema: &'a TagSchema,
}

impl<'a> TableQuery<'a> {
    pub fn new(table: &Identifier, schema: &'a TagSchema) -> Self {
        Self {
            table: table.clone(),
            schema,
        }
    }

    fn tag_columns(&self) -> Vec<String> {
        self.schema
            .tags()
            .iter()
            .map(|t| format!("\"{}\"", t.name))
            .collect()
    }

    /// 主キー + 登録順のタグ列
    fn all_columns(&self) -> String {
        let mut columns = vec![format!("\"{}\"", PRIMARY_KEY)];
        columns.extend(self.tag_columns());
        columns.join(", ")
    }

    /// 登録済みタグ名を引用符付き列名にする（未登録なら拒否）
    fn tag_column(&self, tag: &str) -> Result<String, SchemaError> {
        let index = self.schema.index_of(tag)?;
        Ok(format!("\"{}\"", self.schema.tags()[index].name))
    }

    pub fn create_table(&self) -> String {
        let tag_defs: Vec<String> = self
            .tag_columns()
            .into_iter()
            .map(|c| format!("{} BOOLEAN NOT NULL", c))
            .collect();
        format!(
            "CREATE TABLE {} (\"{}\" INTEGER PRIMARY KEY, {})",
            self.table.quoted(),
            PRIMARY_KEY,
            tag_defs.join(", ")
        )
    }

    pub fn drop_table(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", self.table.quoted())
    }

    pub fn count(&self) -> String {
        format!("SELECT COUNT(*) FROM {}", self.table.quoted())
    }

    /// 主キー順で OFFSET 位置の1行を取得
    pub fn select_at_offset(&self) -> String {
        format!(
            "SELECT {} FROM {} ORDER BY \"{}\" LIMIT 1 OFFSET ?1",
            self.all_columns(),
            self.table.quoted(),
            PRIMARY_KEY
        )
    }

    pub fn select_ids(&self) -> String {
        format!(
            "SELECT \"{}\" FROM {} ORDER BY \"{}\"",
            PRIMARY_KEY,
            self.table.quoted(),
            PRIMARY_KEY
        )
    }

    pub fn insert(&self) -> String {
        let placeholders: Vec<String> = (1..=self.schema.len() + 1).map(|i| format!("?{}", i)).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table.quoted(),
            self.all_columns(),
            placeholders.join(", ")
        )
    }

    /// `source` から app_id 指定で1行コピー
    pub fn copy_row_from(&self, source: &Identifier) -> String {
        format!(
            "INSERT INTO {} ({cols}) SELECT {cols} FROM {} WHERE \"{}\" = ?1",
            self.table.quoted(),
            source.quoted(),
            PRIMARY_KEY,
            cols = self.all_columns(),
        )
    }

    /// タグの正例数
    pub fn count_positive(&self, tag: &str) -> Result<String, SchemaError> {
        Ok(format!(
            "SELECT COUNT(*) FROM {} WHERE {} != 0",
            self.table.quoted(),
            self.tag_column(tag)?
        ))
    }

    pub fn table_info(&self) -> String {
        format!("PRAGMA table_info({})", self.table.quoted())
    }

    pub fn table_exists() -> &'static str {
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TagDef;

    fn schema() -> TagSchema {
        TagSchema::new(
            1,
            vec![
                TagDef { name: "Action".to_string(), steam_id: 19 },
                TagDef { name: "RPG".to_string(), steam_id: 122 },
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_identifier_validation() {
        assert!(Identifier::new("games").is_ok());
        assert!(Identifier::new("train_2").is_ok());
        assert!(Identifier::new("2games").is_err());
        assert!(Identifier::new("games; DROP TABLE x").is_err());
        assert!(Identifier::new("").is_err());
    }

    #[test]
    fn test_create_table_sql() {
        let schema = schema();
        let table = Identifier::new("games").unwrap();
        let sql = TableQuery::new(&table, &schema).create_table();
        assert_eq!(
            sql,
            "CREATE TABLE \"games\" (\"app_id\" INTEGER PRIMARY KEY, \"Action\" BOOLEAN NOT NULL, \"RPG\" BOOLEAN NOT NULL)"
        );
    }

    #[test]
    fn test_insert_placeholders() {
        let schema = schema();
        let table = Identifier::new("games").unwrap();
        let sql = TableQuery::new(&table, &schema).insert();
        assert!(sql.ends_with("VALUES (?1, ?2, ?3)"));
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let schema = schema();
        let table = Identifier::new("games").unwrap();
        let query = TableQuery::new(&table, &schema);
        assert!(query.count_positive("Action").is_ok());
        assert_eq!(
            query.count_positive("Action\" OR 1=1 --"),
            Err(SchemaError::UnknownTag("Action\" OR 1=1 --".to_string()))
        );
    }
}
