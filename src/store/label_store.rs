//! ラベルストア（SQLite）
//!
//! 1サンプル1行（`app_id` 主キー + タグごとの BOOLEAN 列）のテーブルを扱います。
//! 接続は保持せず、操作ごとに開いて閉じます。データ読み込みワーカーから並行に
//! 呼ばれても接続を共有しないためです。

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rusqlite::{params_from_iter, Connection, ErrorCode, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Result, SchemaError, TaggerError};
use crate::schema::{TagSchema, PRIMARY_KEY};
use crate::store::query::{Identifier, TableQuery};
use crate::types::{SampleRow, Split};

/// 学習用パーティションのテーブル名
pub const TRAIN_TABLE: &str = "train";
/// 評価用パーティションのテーブル名
pub const TEST_TABLE: &str = "test";

/// PRAGMA table_info の1行
#[derive(Debug, Clone)]
struct ColumnInfo {
    name: String,
    decl_type: String,
    pk: bool,
}

/// ラベルストア上の1テーブルへのビュー
#[derive(Debug, Clone)]
pub struct LabelStore {
    db_path: PathBuf,
    table: Identifier,
    schema: Arc<TagSchema>,
}

impl LabelStore {
    /// 既存テーブルを開き、列構成をレジストリと照合する
    pub fn open(db_path: impl AsRef<Path>, table: &str, schema: Arc<TagSchema>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if !db_path.is_file() {
            return Err(TaggerError::StoreNotFound(db_path));
        }

        let store = Self {
            db_path,
            table: Identifier::new(table)?,
            schema,
        };
        store.validate_layout()?;
        Ok(store)
    }

    /// テーブルを新規作成（既に存在する場合は検証して開く）
    pub fn create(db_path: impl AsRef<Path>, table: &str, schema: Arc<TagSchema>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self {
            db_path,
            table: Identifier::new(table)?,
            schema,
        };

        let conn = Connection::open(&store.db_path)?;
        if store.table_exists(&conn)? {
            drop(conn);
            store.validate_layout()?;
        } else {
            conn.execute(&store.query().create_table(), [])?;
            tracing::info!(table = %store.table, path = %store.db_path.display(), "created label table");
        }
        Ok(store)
    }

    /// 同じデータベース内の別テーブル（train / test など）を開く
    pub fn partition(&self, table: &str) -> Result<Self> {
        Self::open(&self.db_path, table, Arc::clone(&self.schema))
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn table(&self) -> &str {
        self.table.as_str()
    }

    /// 学習時に使用しているレジストリ
    pub fn registry(&self) -> &Arc<TagSchema> {
        &self.schema
    }

    fn query(&self) -> TableQuery<'_> {
        TableQuery::new(&self.table, &self.schema)
    }

    fn connect_read(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(conn)
    }

    fn connect_write(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(conn)
    }

    fn table_exists(&self, conn: &Connection) -> Result<bool> {
        let count: i64 = conn.query_row(TableQuery::table_exists(), [self.table.as_str()], |row| row.get(0))?;
        Ok(count > 0)
    }

    fn columns(&self, conn: &Connection) -> Result<Vec<ColumnInfo>> {
        let mut stmt = conn.prepare(&self.query().table_info())?;
        let columns = stmt
            .query_map([], |row| {
                Ok(ColumnInfo {
                    name: row.get(1)?,
                    decl_type: row.get(2)?,
                    pk: row.get::<_, i64>(5)? > 0,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(columns)
    }

    /// 主キーと列順をレジストリと照合
    fn validate_layout(&self) -> Result<()> {
        let conn = self.connect_read()?;
        if !self.table_exists(&conn)? {
            return Err(TaggerError::TableNotFound {
                table: self.table.to_string(),
                path: self.db_path.clone(),
            });
        }

        let columns = self.columns(&conn)?;
        let has_pk = columns.iter().any(|c| {
            c.pk && c.name == PRIMARY_KEY && c.decl_type.eq_ignore_ascii_case("INTEGER")
        });
        if !has_pk {
            return Err(SchemaError::MissingPrimaryKey {
                table: self.table.to_string(),
            }
            .into());
        }

        let tags: Vec<String> = columns
            .into_iter()
            .filter(|c| c.name != PRIMARY_KEY)
            .map(|c| c.name)
            .collect();
        self.schema.ensure_columns(self.table.as_str(), &tags)?;
        Ok(())
    }

    /// 列情報から取得したタグ名（主キーを除く、テーブル定義順）
    pub fn schema(&self) -> Result<Vec<String>> {
        let conn = self.connect_read()?;
        let names = self
            .columns(&conn)?
            .into_iter()
            .filter(|c| c.name != PRIMARY_KEY)
            .map(|c| c.name)
            .collect();
        Ok(names)
    }

    pub fn row_count(&self) -> Result<usize> {
        let conn = self.connect_read()?;
        let count: i64 = conn.query_row(&self.query().count(), [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// 主キー順で `ordinal` 番目の行
    pub fn row_at(&self, ordinal: usize) -> Result<SampleRow> {
        let conn = self.connect_read()?;
        let len: i64 = conn.query_row(&self.query().count(), [], |row| row.get(0))?;
        let len = len as usize;
        if ordinal >= len {
            return Err(TaggerError::OutOfBounds { index: ordinal, len });
        }

        let num_tags = self.schema.len();
        let row = conn
            .query_row(&self.query().select_at_offset(), [ordinal as i64], |row| {
                let app_id: i64 = row.get(0)?;
                let mut tag_flags = Vec::with_capacity(num_tags);
                for i in 0..num_tags {
                    tag_flags.push(row.get::<_, i64>(i + 1)? != 0);
                }
                Ok(SampleRow { app_id, tag_flags })
            })
            .optional()?;

        // COUNT と SELECT の間で行が消えた場合
        row.ok_or(TaggerError::OutOfBounds { index: ordinal, len })
    }

    /// 主キー順の全 app_id
    pub fn app_ids(&self) -> Result<Vec<i64>> {
        let conn = self.connect_read()?;
        let mut stmt = conn.prepare(&self.query().select_ids())?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// 1行追加（app_id 重複は主キー制約で拒否）
    pub fn insert_row(&self, row: &SampleRow) -> Result<()> {
        self.insert_rows(std::slice::from_ref(row)).map(|_| ())
    }

    /// 複数行を1トランザクションで追加
    pub fn insert_rows(&self, rows: &[SampleRow]) -> Result<usize> {
        for row in rows {
            self.schema.check_width(row.tag_flags.len())?;
        }

        let mut conn = self.connect_write()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&self.query().insert())?;
            for row in rows {
                let mut values = Vec::with_capacity(row.tag_flags.len() + 1);
                values.push(row.app_id);
                values.extend(row.tag_flags.iter().map(|&on| on as i64));

                if let Err(e) = stmt.execute(params_from_iter(values.iter())) {
                    return Err(match e {
                        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
                            TaggerError::DuplicateAppId(row.app_id)
                        }
                        other => other.into(),
                    });
                }
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// タグの (正例数, 負例数)
    pub fn positive_negative_counts(&self, tag: &str) -> Result<(usize, usize)> {
        let query = self.query();
        let positive_sql = query.count_positive(tag)?;

        let conn = self.connect_read()?;
        let total: i64 = conn.query_row(&query.count(), [], |row| row.get(0))?;
        let positive: i64 = conn.query_row(&positive_sql, [], |row| row.get(0))?;
        Ok((positive as usize, (total - positive) as usize))
    }

    /// `train` / `test` テーブルへ分割
    ///
    /// 既存の `train` / `test` は削除して作り直します。
    pub fn create_split(&self, ratio: f64, seed: u64) -> Result<Split> {
        self.create_split_into(ratio, seed, TRAIN_TABLE, TEST_TABLE)
    }

    /// 任意のテーブル名へ分割
    pub fn create_split_into(&self, ratio: f64, seed: u64, train_table: &str, test_table: &str) -> Result<Split> {
        if !(0.0..=1.0).contains(&ratio) {
            return Err(TaggerError::Config(format!("split ratio must be within [0, 1], got {}", ratio)));
        }
        let train_id = Identifier::new(train_table)?;
        let test_id = Identifier::new(test_table)?;
        if train_id == test_id || train_id == self.table || test_id == self.table {
            return Err(TaggerError::Config(format!(
                "split tables must differ from each other and from `{}`",
                self.table
            )));
        }

        // 主キー順に並べてからシャッフルするので、同じシードなら同じ分割になる
        let mut ids = self.app_ids()?;
        let mut rng = StdRng::seed_from_u64(seed);
        ids.shuffle(&mut rng);

        let total = ids.len();
        let train_len = ((total as f64) * ratio).round() as usize;
        let train_len = train_len.min(total);
        let test_ids = ids.split_off(train_len);
        let train_ids = ids;

        let train_query = TableQuery::new(&train_id, &self.schema);
        let test_query = TableQuery::new(&test_id, &self.schema);

        let mut conn = self.connect_write()?;
        let tx = conn.transaction()?;
        tx.execute(&train_query.drop_table(), [])?;
        tx.execute(&test_query.drop_table(), [])?;
        tx.execute(&train_query.create_table(), [])?;
        tx.execute(&test_query.create_table(), [])?;
        {
            let mut copy_train = tx.prepare(&train_query.copy_row_from(&self.table))?;
            for id in &train_ids {
                copy_train.execute([id])?;
            }
            let mut copy_test = tx.prepare(&test_query.copy_row_from(&self.table))?;
            for id in &test_ids {
                copy_test.execute([id])?;
            }
        }
        tx.commit()?;

        tracing::info!(
            source = %self.table,
            train = train_ids.len(),
            test = test_ids.len(),
            seed,
            "dataset split created"
        );

        Ok(Split {
            train: train_ids,
            test: test_ids,
        })
    }
}
