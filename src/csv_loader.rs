use crate::error::{Result, TaggerError};
use crate::schema::TagSchema;
use crate::types::SampleRow;
use csv::ReaderBuilder;
use std::path::Path;

/// スクレイパー出力CSV（`app_id,tag_ids`）を読み込む
///
/// `tag_ids` は Steam の一覧表記 `[19,597,21]` です。レジストリに無いIDは無視します。
pub fn load_csv(path: &Path, schema: &TagSchema) -> Result<Vec<SampleRow>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)?;

    let mut rows = Vec::new();

    for (line, result) in reader.records().enumerate() {
        let record = result?;

        let app_id: i64 = record.get(0)
            .ok_or_else(|| TaggerError::Config(format!("line {}: missing app_id", line + 2)))?
            .trim()
            .parse()
            .map_err(|e| TaggerError::Config(format!("line {}: invalid app_id: {}", line + 2, e)))?;

        let tag_ids = parse_tag_ids(record.get(1).unwrap_or(""))
            .map_err(|e| TaggerError::Config(format!("line {}: {}", line + 2, e)))?;

        rows.push(SampleRow::new(app_id, schema.flags_from_steam_ids(&tag_ids)));
    }

    tracing::debug!(path = %path.display(), rows = rows.len(), "loaded scraper csv");
    Ok(rows)
}

/// `[123,456,78]` 形式のタグID一覧を分解
pub fn parse_tag_ids(raw: &str) -> std::result::Result<Vec<u32>, String> {
    let inner = raw.trim().trim_start_matches('[').trim_end_matches(']');
    inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u32>().map_err(|e| format!("invalid tag id `{}`: {}", s, e)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_tag_ids() {
        assert_eq!(parse_tag_ids("[19,597,21]").unwrap(), vec![19, 597, 21]);
        assert_eq!(parse_tag_ids(" [ 19 , 19 ] ").unwrap(), vec![19, 19]);
        assert_eq!(parse_tag_ids("[]").unwrap(), Vec::<u32>::new());
        assert!(parse_tag_ids("[19,abc]").is_err());
    }

    #[test]
    fn test_load_csv() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("scraped.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "app_id,tag_ids").unwrap();
        writeln!(file, "42,\"[1625,19,4191]\"").unwrap();
        writeln!(file, "43,\"[597]\"").unwrap();
        drop(file);

        let schema = TagSchema::steam_default();
        let rows = load_csv(&path, &schema).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].app_id, 42);
        assert_eq!(
            schema.decode(&rows[0].tag_flags).unwrap(),
            vec!["Platformer", "Action", "ThreeD"]
        );
        assert_eq!(schema.decode(&rows[1].tag_flags).unwrap(), vec!["Casual"]);
    }
}
