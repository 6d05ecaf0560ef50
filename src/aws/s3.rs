/// CSV datasets stored under an S3 path
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};
use url::Url;

use super::client::ObjectStoreApi;
use super::models::ObjectSummary;
use crate::error::{Error, Result};
use crate::resource::{Lifecycle, Resource};

const RESOURCE_TYPE: &str = "S3CsvDataset";

/// How writes treat data already under the dataset path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    #[default]
    Append,
    Overwrite,
    OverwritePartitions,
}

/// Bucketing columns and the number of buckets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketingInfo {
    pub columns: Vec<String>,
    pub buckets: u32,
}

/// Thread usage for writers: on/off or an explicit count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UseThreads {
    Enabled(bool),
    Count(u32),
}

fn default_sep() -> String {
    ",".to_string()
}

fn default_top_level_dir() -> Option<String> {
    Some("datasets".to_string())
}

fn default_true() -> bool {
    true
}

/// Declared CSV dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct S3CsvDataset {
    pub name: String,

    /// Field separator
    #[serde(default = "default_sep")]
    pub sep: String,

    /// Header columns, in order
    #[serde(default)]
    pub columns: Vec<String>,

    /// Glue/Athena table name (defaults to `name`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,

    /// Glue/Athena database name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    /// Glue table type, EXTERNAL_TABLE when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_description: Option<String>,

    #[serde(default)]
    pub write_mode: WriteMode,

    /// Explicit S3 path; derived from the fields below when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Top level directory for all datasets
    #[serde(default = "default_top_level_dir")]
    pub top_level_dir: Option<String>,

    /// Prefix for the derived path: path_prefix/top_level_dir/database/table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,

    /// Bucket for the derived path: s3://bucket/top_level_dir/database/table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,

    /// Prefix added to written file names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename_prefix: Option<String>,

    /// Column name to Athena/Glue type casts
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dtype: BTreeMap<String, String>,

    /// Key/value pairs tagging the catalog table
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub columns_comments: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partition_cols: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucketing_info: Option<BucketingInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrent_partitioning: Option<bool>,

    /// Archive the catalog table version before an overwrite
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_versioning: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_evolution: Option<bool>,

    /// Data Catalog ID, defaults to the account ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_threads: Option<UseThreads>,

    /// Create regular (non projected) partitions on the catalog
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regular_partitions: Option<bool>,

    /// Enable Athena partition projection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection_enabled: Option<bool>,

    /// Partition name to projection type: enum, integer, date, injected
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub projection_types: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub projection_ranges: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub projection_values: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub projection_intervals: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub projection_digits: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub projection_formats: BTreeMap<String, String>,

    /// e.g. s3://bucket/table_root/a=${a}/${b}/some_static_subdirectory/${c}/
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection_storage_location_template: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl S3CsvDataset {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sep: default_sep(),
            columns: Vec::new(),
            table: None,
            database: None,
            table_type: None,
            table_description: None,
            write_mode: WriteMode::default(),
            path: None,
            top_level_dir: default_top_level_dir(),
            path_prefix: None,
            bucket: None,
            filename_prefix: None,
            dtype: BTreeMap::new(),
            parameters: BTreeMap::new(),
            columns_comments: BTreeMap::new(),
            partition_cols: Vec::new(),
            bucketing_info: None,
            concurrent_partitioning: None,
            catalog_versioning: None,
            schema_evolution: None,
            catalog_id: None,
            use_threads: None,
            regular_partitions: None,
            projection_enabled: None,
            projection_types: BTreeMap::new(),
            projection_ranges: BTreeMap::new(),
            projection_values: BTreeMap::new(),
            projection_intervals: BTreeMap::new(),
            projection_digits: BTreeMap::new(),
            projection_formats: BTreeMap::new(),
            projection_storage_location_template: None,
            version: None,
            enabled: true,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = Some(prefix.into());
        self
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_sep(mut self, sep: impl Into<String>) -> Self {
        self.sep = sep.into();
        self
    }

    pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.write_mode = mode;
        self
    }

    /// Catalog table name
    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.name)
    }

    /// Dataset path: explicit `path`, else path_prefix/top_level_dir/database/table,
    /// else s3://bucket/top_level_dir/database/table
    pub fn resolve_path(&self) -> Result<String> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }

        let root = match (&self.path_prefix, &self.bucket) {
            (Some(prefix), _) => prefix.trim_end_matches('/').to_string(),
            (None, Some(bucket)) => format!("s3://{}", bucket),
            (None, None) => {
                return Err(Error::missing(
                    "path",
                    format!(
                        "{} needs a path, a path_prefix or a bucket to derive one",
                        self.name
                    ),
                ))
            }
        };
        let database = self.database.as_deref().ok_or_else(|| {
            Error::missing(
                "database",
                format!("{} needs a database to derive its path", self.name),
            )
        })?;

        let mut parts = vec![root];
        if let Some(dir) = self.top_level_dir.as_deref().filter(|d| !d.is_empty()) {
            parts.push(dir.trim_matches('/').to_string());
        }
        parts.push(database.to_string());
        parts.push(self.table_name().to_string());
        Ok(parts.join("/"))
    }

    /// Parsed dataset location; the bucket root is never a dataset
    fn location(&self) -> Result<(String, S3Location)> {
        let path = self.resolve_path()?;
        let location = S3Location::parse(&path)?;
        if location.prefix.is_empty() {
            return Err(Error::validation(
                RESOURCE_TYPE,
                format!("path {} is a bucket root, datasets need a key prefix", path),
            ));
        }
        Ok((path, location))
    }

    /// Glue table parameters, including Athena partition projection settings
    pub fn catalog_parameters(&self) -> BTreeMap<String, String> {
        let mut params = self.parameters.clone();
        if self.projection_enabled != Some(true) {
            return params;
        }

        params.insert("projection.enabled".to_string(), "true".to_string());
        let settings = [
            ("type", &self.projection_types),
            ("range", &self.projection_ranges),
            ("values", &self.projection_values),
            ("interval", &self.projection_intervals),
            ("digits", &self.projection_digits),
            ("format", &self.projection_formats),
        ];
        for (setting, values) in settings {
            for (column, value) in values {
                params.insert(format!("projection.{}.{}", column, setting), value.clone());
            }
        }
        if let Some(template) = &self.projection_storage_location_template {
            params.insert("storage.location.template".to_string(), template.clone());
        }
        params
    }

    /// Serialize the header and rows using the dataset separator
    pub fn to_csv(&self, rows: &[Vec<String>]) -> Result<String> {
        let mut out = String::new();
        if !self.columns.is_empty() {
            out.push_str(&csv_line(&self.columns, &self.sep));
        }
        for (i, row) in rows.iter().enumerate() {
            if !self.columns.is_empty() && row.len() != self.columns.len() {
                return Err(Error::validation(
                    RESOURCE_TYPE,
                    format!(
                        "row {} has {} fields, expected {}",
                        i,
                        row.len(),
                        self.columns.len()
                    ),
                ));
            }
            out.push_str(&csv_line(row, &self.sep));
        }
        Ok(out)
    }

    /// Write rows as a new CSV part under the dataset path
    ///
    /// With `WriteMode::Overwrite` every existing object under the path is
    /// removed first.
    pub async fn write_records<C>(&self, client: &C, rows: &[Vec<String>]) -> Result<DatasetState>
    where
        C: ObjectStoreApi + ?Sized,
    {
        let (path, location) = self.location()?;
        let body = self.to_csv(rows)?;

        if self.write_mode == WriteMode::Overwrite {
            let existing = client.list_objects(&location.bucket, &location.prefix).await?;
            if !existing.is_empty() {
                info!("Overwriting {} objects under {}", existing.len(), path);
                let keys: Vec<String> = existing.into_iter().map(|o| o.key).collect();
                client.delete_objects(&location.bucket, &keys).await?;
            }
        }

        let key = format!(
            "{}{}{}-{}.csv",
            location.prefix,
            self.filename_prefix.as_deref().unwrap_or_default(),
            self.table_name(),
            Utc::now().format("%Y%m%dT%H%M%S%3f")
        );
        debug!("Writing {} rows to s3://{}/{}", rows.len(), location.bucket, key);
        client
            .put_object(&location.bucket, &key, body.into_bytes(), "text/csv")
            .await?;

        let objects = client.list_objects(&location.bucket, &location.prefix).await?;
        Ok(DatasetState { path, objects })
    }
}

fn csv_line(fields: &[String], sep: &str) -> String {
    let mut line = fields
        .iter()
        .map(|f| {
            if f.contains(sep) || f.contains('"') || f.contains('\n') || f.contains('\r') {
                format!("\"{}\"", f.replace('"', "\"\""))
            } else {
                f.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(sep);
    line.push('\n');
    line
}

/// Bucket and key prefix of an `s3://` path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Location {
    pub bucket: String,
    /// Key prefix, ending in `/` unless empty
    pub prefix: String,
}

impl S3Location {
    pub fn parse(path: &str) -> Result<Self> {
        let url = Url::parse(path)
            .map_err(|e| Error::validation(RESOURCE_TYPE, format!("invalid path {}: {}", path, e)))?;
        if url.scheme() != "s3" {
            return Err(Error::validation(
                RESOURCE_TYPE,
                format!("path {} is not an s3:// path", path),
            ));
        }
        let bucket = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::missing("bucket", format!("path {} has no bucket", path)))?
            .to_string();

        let key = url.path().trim_matches('/');
        let prefix = if key.is_empty() {
            String::new()
        } else {
            format!("{}/", key)
        };
        Ok(Self { bucket, prefix })
    }
}

/// Objects currently stored under a dataset path
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetState {
    pub path: String,
    pub objects: Vec<ObjectSummary>,
}

impl DatasetState {
    pub fn total_size(&self) -> i64 {
        self.objects.iter().map(|o| o.size).sum()
    }
}

impl Resource for S3CsvDataset {
    type State = DatasetState;

    /// Validate the declaration
    fn validate(self) -> Result<Self> {
        if self.name.is_empty() {
            return Err(Error::validation(RESOURCE_TYPE, "name cannot be empty"));
        }
        if self.sep.chars().count() != 1 {
            return Err(Error::validation(
                RESOURCE_TYPE,
                format!("sep must be a single character, got {:?}", self.sep),
            ));
        }
        if let Some(info) = &self.bucketing_info {
            if info.buckets == 0 || info.columns.is_empty() {
                return Err(Error::validation(
                    RESOURCE_TYPE,
                    "bucketing_info needs at least one column and one bucket",
                ));
            }
        }
        if self.projection_enabled == Some(true) && self.projection_types.is_empty() {
            return Err(Error::validation(
                RESOURCE_TYPE,
                "projection_enabled requires projection_types",
            ));
        }
        if !self.columns.is_empty() {
            if let Some(col) = self
                .partition_cols
                .iter()
                .find(|c| !self.columns.contains(c))
            {
                return Err(Error::validation(
                    RESOURCE_TYPE,
                    format!("partition column {} is not a declared column", col),
                ));
            }
        }
        if let Some(path) = &self.path {
            if S3Location::parse(path)?.prefix.is_empty() {
                return Err(Error::validation(
                    RESOURCE_TYPE,
                    format!("path {} is a bucket root, datasets need a key prefix", path),
                ));
            }
        }
        Ok(self)
    }

    fn resource_type(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl<C> Lifecycle<C> for S3CsvDataset
where
    C: ObjectStoreApi + ?Sized,
{
    /// Writes a header-only part so the dataset location exists
    async fn create(&self, client: &C) -> Result<DatasetState> {
        if self.columns.is_empty() {
            return Err(Error::missing(
                "columns",
                format!("{} needs columns to write a header", self.name),
            ));
        }
        self.write_records(client, &[]).await
    }

    async fn read(&self, client: &C) -> Result<Option<DatasetState>> {
        let (path, location) = self.location()?;
        let objects = client.list_objects(&location.bucket, &location.prefix).await?;
        if objects.is_empty() {
            return Ok(None);
        }
        let state = DatasetState { path, objects };
        debug!(
            "{} objects ({} bytes) under {}",
            state.objects.len(),
            state.total_size(),
            state.path
        );
        Ok(Some(state))
    }

    async fn delete(&self, client: &C) -> Result<()> {
        let (path, location) = self.location()?;
        let objects = client.list_objects(&location.bucket, &location.prefix).await?;
        if objects.is_empty() {
            return Err(Error::not_found(RESOURCE_TYPE, path));
        }
        let keys: Vec<String> = objects.into_iter().map(|o| o.key).collect();
        client.delete_objects(&location.bucket, &keys).await
    }
}
