//! File-backed metadata catalog.
//!
//! One CSV record per column, in schema order:
//! ```text
//! table,column,type,is_clustering_key,index_name,index_type
//! students,id,INT,true,null,null
//! students,name,TEXT,false,nameIndex,BPlusTree
//! ```
//! There is no header row. Fields are quoted only when they contain a
//! comma, quote or line break. The file is rewritten in full whenever a
//! table or index is added.

use ordo_common::{OrdoError, Result, TypeId};
use ordo_storage::catalog::RESERVED_NAME;
use ordo_storage::{Catalog, ColumnDef, TableSchema};
use parking_lot::Mutex;
use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Index type tag written for every index.
pub const INDEX_TYPE: &str = "BPlusTree";

/// Number of fields per catalog record.
const FIELDS: usize = 6;

/// Catalog stored as a CSV file.
pub struct FileCatalog {
    path: PathBuf,
    fsync_enabled: bool,
    tables: Mutex<Vec<TableSchema>>,
}

impl FileCatalog {
    /// Opens the catalog at `path`, starting empty if the file does not exist.
    pub fn open(path: impl Into<PathBuf>, fsync_enabled: bool) -> Result<Self> {
        let path = path.into();
        let tables = match fs::read(&path) {
            Ok(data) => parse(&path, &data)?,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), tables = tables.len(), "opened catalog");
        Ok(Self {
            path,
            fsync_enabled,
            tables: Mutex::new(tables),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, tables: &[TableSchema]) -> Result<()> {
        let data = render(tables)?;
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp_path = self.path.with_extension("tmp");
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(&data)?;
            if self.fsync_enabled {
                file.sync_all()?;
            }
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

fn render(tables: &[TableSchema]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    for schema in tables {
        for column in schema.columns() {
            let (index_name, index_type) = match schema.index_on(&column.name) {
                Some(binding) => (binding.index_name.as_str(), INDEX_TYPE),
                None => (RESERVED_NAME, RESERVED_NAME),
            };
            let is_key = if column.name == schema.clustering_key() {
                "true"
            } else {
                "false"
            };
            writer
                .write_record([
                    schema.name(),
                    column.name.as_str(),
                    column.type_id.as_str(),
                    is_key,
                    index_name,
                    index_type,
                ])
                .map_err(io::Error::from)?;
        }
    }
    writer
        .into_inner()
        .map_err(|e| OrdoError::Io(e.into_error()))
}

/// Columns, clustering key and index bindings of one table while parsing.
#[derive(Default)]
struct TableDraft {
    name: String,
    clustering_key: Option<String>,
    columns: Vec<ColumnDef>,
    bindings: Vec<(String, String)>,
}

fn parse(path: &Path, data: &[u8]) -> Result<Vec<TableSchema>> {
    let object = path.display().to_string();
    let bad_line = |line_no: u64, reason: String| {
        OrdoError::corrupted(&object, format!("line {}: {}", line_no, reason))
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(data);
    let mut drafts: Vec<TableDraft> = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| OrdoError::corrupted(&object, e.to_string()))?;
        let line_no = record.position().map_or(0, |p| p.line());
        let cells: Vec<&str> = record.iter().collect();
        let [table, column, type_tag, key_flag, index_name, _index_type] = cells[..] else {
            return Err(bad_line(
                line_no,
                format!("expected {} fields, found {}", FIELDS, cells.len()),
            ));
        };
        let type_id: TypeId = type_tag
            .parse()
            .map_err(|e: OrdoError| bad_line(line_no, e.to_string()))?;
        let is_key: bool = key_flag
            .parse()
            .map_err(|_| bad_line(line_no, format!("invalid flag: {}", key_flag)))?;

        let pos = match drafts.iter().position(|d| d.name == table) {
            Some(pos) => pos,
            None => {
                drafts.push(TableDraft {
                    name: table.to_string(),
                    ..Default::default()
                });
                drafts.len() - 1
            }
        };
        let draft = &mut drafts[pos];
        draft.columns.push(ColumnDef::new(column, type_id));
        if is_key {
            if let Some(existing) = &draft.clustering_key {
                return Err(bad_line(
                    line_no,
                    format!("second clustering key for {} (already {})", table, existing),
                ));
            }
            draft.clustering_key = Some(column.to_string());
        }
        if index_name != RESERVED_NAME {
            draft
                .bindings
                .push((column.to_string(), index_name.to_string()));
        }
    }

    let mut tables = Vec::with_capacity(drafts.len());
    for draft in drafts {
        let key = draft.clustering_key.ok_or_else(|| {
            OrdoError::corrupted(&object, format!("table {} has no clustering key", draft.name))
        })?;
        let mut schema = TableSchema::new(draft.name, key, draft.columns)?;
        for (column, index_name) in draft.bindings {
            schema.add_index(&column, &index_name)?;
        }
        tables.push(schema);
    }
    Ok(tables)
}

impl Catalog for FileCatalog {
    fn load_column_types(&self, table: &str) -> Result<Vec<ColumnDef>> {
        self.tables
            .lock()
            .iter()
            .find(|s| s.name() == table)
            .map(|s| s.columns().to_vec())
            .ok_or_else(|| OrdoError::TableNotFound(table.to_string()))
    }

    fn load_schema(&self, table: &str) -> Result<Option<TableSchema>> {
        Ok(self.tables.lock().iter().find(|s| s.name() == table).cloned())
    }

    fn table_names(&self) -> Result<Vec<String>> {
        Ok(self
            .tables
            .lock()
            .iter()
            .map(|s| s.name().to_string())
            .collect())
    }

    fn save_table_schema(
        &self,
        table: &str,
        clustering_key: &str,
        columns: &[ColumnDef],
    ) -> Result<()> {
        let schema = TableSchema::new(table, clustering_key, columns.to_vec())?;

        let mut tables = self.tables.lock();
        if tables.iter().any(|s| s.name() == table) {
            return Err(OrdoError::TableAlreadyExists(table.to_string()));
        }
        let mut updated = tables.clone();
        updated.push(schema);
        self.persist(&updated)?;
        *tables = updated;
        Ok(())
    }

    fn record_index_binding(&self, table: &str, column: &str, index_name: &str) -> Result<()> {
        let mut tables = self.tables.lock();
        let mut updated = tables.clone();
        updated
            .iter_mut()
            .find(|s| s.name() == table)
            .ok_or_else(|| OrdoError::TableNotFound(table.to_string()))?
            .add_index(column, index_name)?;
        self.persist(&updated)?;
        *tables = updated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn student_columns() -> Vec<ColumnDef> {
        vec![
            ColumnDef::new("id", TypeId::Int),
            ColumnDef::new("name", TypeId::Text),
            ColumnDef::new("gpa", TypeId::Double),
        ]
    }

    #[test]
    fn test_file_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metadata.csv");
        let catalog = FileCatalog::open(&path, false).unwrap();
        catalog
            .save_table_schema("students", "id", &student_columns())
            .unwrap();
        catalog
            .record_index_binding("students", "name", "nameIndex")
            .unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "students,id,INT,true,null,null\n\
             students,name,TEXT,false,nameIndex,BPlusTree\n\
             students,gpa,DOUBLE,false,null,null\n"
        );
    }

    #[test]
    fn test_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metadata.csv");
        {
            let catalog = FileCatalog::open(&path, false).unwrap();
            catalog
                .save_table_schema("students", "id", &student_columns())
                .unwrap();
            catalog
                .save_table_schema("courses", "code", &[ColumnDef::new("code", TypeId::Text)])
                .unwrap();
            catalog
                .record_index_binding("students", "gpa", "gpaIndex")
                .unwrap();
        }

        let catalog = FileCatalog::open(&path, false).unwrap();
        assert_eq!(
            catalog.table_names().unwrap(),
            vec!["students".to_string(), "courses".to_string()]
        );
        let schema = catalog.load_schema("students").unwrap().unwrap();
        assert_eq!(schema.clustering_key(), "id");
        assert_eq!(schema.columns(), &student_columns()[..]);
        assert_eq!(schema.index_on("gpa").unwrap().index_name, "gpaIndex");
        assert_eq!(
            catalog.load_column_types("courses").unwrap(),
            vec![ColumnDef::new("code", TypeId::Text)]
        );
    }

    #[test]
    fn test_rejects_duplicates_and_bad_names() {
        let dir = tempdir().unwrap();
        let catalog = FileCatalog::open(dir.path().join("m.csv"), false).unwrap();
        catalog
            .save_table_schema("students", "id", &student_columns())
            .unwrap();
        assert!(matches!(
            catalog.save_table_schema("students", "id", &student_columns()),
            Err(OrdoError::TableAlreadyExists(_))
        ));
        assert!(matches!(
            catalog.save_table_schema("../b", "id", &student_columns()),
            Err(OrdoError::InvalidParameter { .. })
        ));
        assert!(matches!(
            catalog.record_index_binding("nope", "id", "idIndex"),
            Err(OrdoError::TableNotFound(_))
        ));
        assert!(matches!(
            catalog.record_index_binding("students", "age", "ageIndex"),
            Err(OrdoError::ColumnNotFound(_))
        ));
    }

    #[test]
    fn test_names_round_trip_verbatim() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metadata.csv");
        let columns = vec![
            ColumnDef::new(" id", TypeId::Int),
            ColumnDef::new("last, first", TypeId::Text),
            ColumnDef::new("say \"hi\" ", TypeId::Double),
        ];
        {
            let catalog = FileCatalog::open(&path, false).unwrap();
            catalog.save_table_schema("odd table ", " id", &columns).unwrap();
            catalog
                .record_index_binding("odd table ", "last, first", " nameIndex")
                .unwrap();
        }

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"last, first\""));
        assert_eq!(text.lines().count(), 3);

        let catalog = FileCatalog::open(&path, false).unwrap();
        let schema = catalog.load_schema("odd table ").unwrap().unwrap();
        assert_eq!(schema.clustering_key(), " id");
        assert_eq!(schema.columns(), &columns[..]);
        assert_eq!(schema.index_on("last, first").unwrap().index_name, " nameIndex");
    }

    #[test]
    fn test_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metadata.csv");
        fs::write(&path, "students,id,INT,true,null\n").unwrap();
        assert!(matches!(
            FileCatalog::open(&path, false),
            Err(OrdoError::ObjectCorrupted { .. })
        ));

        fs::write(&path, "students,id,BLOB,true,null,null\n").unwrap();
        assert!(FileCatalog::open(&path, false).is_err());

        fs::write(&path, "students,id,INT,false,null,null\n").unwrap();
        assert!(FileCatalog::open(&path, false).is_err());
    }
}
