//! タグスキーマ（ラベルベクトルの列順序）
//!
//! タグ名と Steam のタグIDの対応表です。ラベルベクトルの列順序はこの登録順で決まり、
//! 学習時と推論時で同じ `TagSchema` を使う必要があります。そのためスキーマは
//! モデルアーカイブに一緒に保存され、各コンポーネントには参照で渡されます。

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::SchemaError;

/// 主キー列名（タグ名としては使用不可）
pub const PRIMARY_KEY: &str = "app_id";

/// 既定レジストリのバージョン
pub const STEAM_SCHEMA_VERSION: u32 = 1;

/// 既定のタグ定義（Steamストアのジャンルタグ）
const STEAM_TAGS: [(&str, u32); 12] = [
    ("Platformer", 1625),
    ("Action", 19),
    ("Casual", 597),
    ("Adventure", 21),
    ("TwoD", 3871),
    ("ThreeD", 4191),
    ("Simulation", 599),
    ("Strategy", 9),
    ("RPG", 122),
    ("Puzzle", 1664),
    ("Horror", 1667),
    ("Sports", 701),
];

/// タグ1件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagDef {
    pub name: String,
    pub steam_id: u32,
}

/// バージョン付きのタグスキーマ
///
/// 構築時に検証済み（重複なし・識別子として安全）であることが保証されます。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTagSchema")]
pub struct TagSchema {
    version: u32,
    tags: Vec<TagDef>,
}

#[derive(Deserialize)]
struct RawTagSchema {
    version: u32,
    tags: Vec<TagDef>,
}

impl TryFrom<RawTagSchema> for TagSchema {
    type Error = SchemaError;

    fn try_from(raw: RawTagSchema) -> Result<Self, Self::Error> {
        TagSchema::new(raw.version, raw.tags)
    }
}

impl Default for TagSchema {
    fn default() -> Self {
        Self::steam_default()
    }
}

/// SQL識別子として安全な名前か
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl TagSchema {
    /// スキーマを構築して検証
    pub fn new(version: u32, tags: Vec<TagDef>) -> Result<Self, SchemaError> {
        if tags.is_empty() {
            return Err(SchemaError::Empty);
        }

        let mut names = HashSet::new();
        let mut ids = HashSet::new();
        for tag in &tags {
            if !is_valid_identifier(&tag.name) || tag.name.eq_ignore_ascii_case(PRIMARY_KEY) {
                return Err(SchemaError::InvalidIdentifier(tag.name.clone()));
            }
            // SQLiteの列名は大文字小文字を区別しない
            if !names.insert(tag.name.to_ascii_lowercase()) {
                return Err(SchemaError::DuplicateTag(tag.name.clone()));
            }
            if !ids.insert(tag.steam_id) {
                return Err(SchemaError::DuplicateTagId(tag.steam_id));
            }
        }

        Ok(Self { version, tags })
    }

    /// Steamジャンルの既定レジストリ
    pub fn steam_default() -> Self {
        let tags = STEAM_TAGS
            .iter()
            .map(|(name, steam_id)| TagDef {
                name: (*name).to_string(),
                steam_id: *steam_id,
            })
            .collect();

        Self {
            version: STEAM_SCHEMA_VERSION,
            tags,
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// タグ数（＝モデル出力次元）
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn tags(&self) -> &[TagDef] {
        &self.tags
    }

    /// 登録順のタグ名
    pub fn names(&self) -> Vec<String> {
        self.tags.iter().map(|t| t.name.clone()).collect()
    }

    /// タグ名の列インデックス（登録外なら `UnknownTag`）
    pub fn index_of(&self, name: &str) -> Result<usize, SchemaError> {
        self.tags
            .iter()
            .position(|t| t.name == name)
            .ok_or_else(|| SchemaError::UnknownTag(name.to_string()))
    }

    /// Steam タグID一覧からラベルフラグを生成
    ///
    /// 未登録のIDは無視します。
    pub fn flags_from_steam_ids(&self, steam_ids: &[u32]) -> Vec<bool> {
        self.tags
            .iter()
            .map(|t| steam_ids.contains(&t.steam_id))
            .collect()
    }

    /// 正例フラグのインデックスをタグ名に戻す
    pub fn decode(&self, flags: &[bool]) -> Result<Vec<String>, SchemaError> {
        self.check_width(flags.len())?;
        Ok(self
            .tags
            .iter()
            .zip(flags)
            .filter(|(_, &on)| on)
            .map(|(t, _)| t.name.clone())
            .collect())
    }

    /// ラベルベクトル長がスキーマと一致するか
    pub fn check_width(&self, found: usize) -> Result<(), SchemaError> {
        if found != self.tags.len() {
            return Err(SchemaError::LabelWidth {
                expected: self.tags.len(),
                found,
            });
        }
        Ok(())
    }

    /// テーブルから取得した列名が登録順と完全一致するか検証
    pub fn ensure_columns(&self, table: &str, found: &[String]) -> Result<(), SchemaError> {
        let expected = self.names();
        if expected.as_slice() != found {
            return Err(SchemaError::ColumnMismatch {
                table: table.to_string(),
                expected,
                found: found.to_vec(),
            });
        }
        Ok(())
    }

    /// 別のスキーマ（例: モデルアーカイブ内）と互換か
    pub fn ensure_compatible(&self, other: &TagSchema) -> Result<(), SchemaError> {
        if self.version != other.version {
            return Err(SchemaError::VersionMismatch {
                expected: self.version,
                found: other.version,
            });
        }
        let found = other.names();
        self.ensure_columns("model", &found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(name: &str, id: u32) -> TagDef {
        TagDef {
            name: name.to_string(),
            steam_id: id,
        }
    }

    #[test]
    fn test_steam_default_order() {
        let schema = TagSchema::steam_default();
        assert_eq!(schema.len(), 12);
        assert_eq!(schema.names()[0], "Platformer");
        assert_eq!(schema.names()[11], "Sports");
        assert_eq!(schema.index_of("RPG").unwrap(), 8);
        // 既定レジストリ自体も検証を通ること
        assert!(TagSchema::new(schema.version(), schema.tags().to_vec()).is_ok());
    }

    #[test]
    fn test_rejects_duplicates_and_unsafe_names() {
        assert_eq!(
            TagSchema::new(1, vec![tag("Action", 1), tag("action", 2)]),
            Err(SchemaError::DuplicateTag("action".to_string()))
        );
        assert_eq!(
            TagSchema::new(1, vec![tag("Action", 1), tag("RPG", 1)]),
            Err(SchemaError::DuplicateTagId(1))
        );
        assert!(matches!(
            TagSchema::new(1, vec![tag("x; DROP TABLE games", 1)]),
            Err(SchemaError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            TagSchema::new(1, vec![tag("app_id", 1)]),
            Err(SchemaError::InvalidIdentifier(_))
        ));
        assert_eq!(TagSchema::new(1, vec![]), Err(SchemaError::Empty));
    }

    #[test]
    fn test_flags_and_decode() {
        let schema = TagSchema::new(1, vec![tag("Action", 19), tag("Casual", 597), tag("RPG", 122)]).unwrap();
        let flags = schema.flags_from_steam_ids(&[122, 19, 19, 99999]);
        assert_eq!(flags, vec![true, false, true]);
        assert_eq!(schema.decode(&flags).unwrap(), vec!["Action", "RPG"]);
        assert!(matches!(
            schema.decode(&[true]),
            Err(SchemaError::LabelWidth { expected: 3, found: 1 })
        ));
    }

    #[test]
    fn test_deserialize_validates() {
        let json = r#"{"version":1,"tags":[{"name":"A","steam_id":1},{"name":"A","steam_id":2}]}"#;
        assert!(serde_json::from_str::<TagSchema>(json).is_err());

        let schema = TagSchema::steam_default();
        let json = serde_json::to_string(&schema).unwrap();
        let restored: TagSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(schema, restored);
    }

    #[test]
    fn test_compatibility() {
        let a = TagSchema::new(1, vec![tag("Action", 19), tag("RPG", 122)]).unwrap();
        let swapped = TagSchema::new(1, vec![tag("RPG", 122), tag("Action", 19)]).unwrap();
        let bumped = TagSchema::new(2, vec![tag("Action", 19), tag("RPG", 122)]).unwrap();
        assert!(a.ensure_compatible(&a.clone()).is_ok());
        assert!(matches!(a.ensure_compatible(&swapped), Err(SchemaError::ColumnMismatch { .. })));
        assert!(matches!(a.ensure_compatible(&bumped), Err(SchemaError::VersionMismatch { .. })));
    }
}
