//! Job parameters and CLI settings.
//!
//! Settings are layered: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at `~/.config/massindex/config.toml`.
//! Job parameters come from its `[job]` table; keys may be written in
//! snake_case or in their camelCase job-parameter form.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::MassIndexError;

/// Interaction of record loading with the second-level cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheMode {
    /// Neither read nor write the cache
    #[default]
    Ignore,
    /// Read only
    Get,
    /// Write only
    Put,
    /// Read and write
    Normal,
    /// Write only, overwriting entries
    Refresh,
}

impl CacheMode {
    pub fn reads_cache(&self) -> bool {
        matches!(self, CacheMode::Get | CacheMode::Normal)
    }

    pub fn writes_cache(&self) -> bool {
        matches!(self, CacheMode::Put | CacheMode::Normal | CacheMode::Refresh)
    }
}

impl FromStr for CacheMode {
    type Err = MassIndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "IGNORE" => Ok(CacheMode::Ignore),
            "GET" => Ok(CacheMode::Get),
            "PUT" => Ok(CacheMode::Put),
            "NORMAL" => Ok(CacheMode::Normal),
            "REFRESH" => Ok(CacheMode::Refresh),
            other => Err(MassIndexError::Config(format!(
                "unknown cache mode: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CacheMode::Ignore => "IGNORE",
            CacheMode::Get => "GET",
            CacheMode::Put => "PUT",
            CacheMode::Normal => "NORMAL",
            CacheMode::Refresh => "REFRESH",
        };
        f.write_str(s)
    }
}

/// Page size used when enumerating primary keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSize {
    Rows(usize),
    /// Load the whole remaining sequence in one fetch
    All,
}

impl FetchSize {
    /// Interpret an `idFetchSize` hint; zero or negative selects [`FetchSize::All`].
    pub fn from_hint(hint: i64) -> Self {
        if hint <= 0 {
            FetchSize::All
        } else {
            FetchSize::Rows(hint as usize)
        }
    }

    /// Maximum keys for one fetch.
    pub fn limit(&self) -> Option<usize> {
        match self {
            FetchSize::Rows(n) => Some(*n),
            FetchSize::All => None,
        }
    }
}

/// Namespace in which a record-store reference is looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HandleNamespace {
    #[default]
    PersistenceUnitName,
    SessionFactoryName,
}

impl FromStr for HandleNamespace {
    type Err = MassIndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "persistence-unit-name" => Ok(HandleNamespace::PersistenceUnitName),
            "session-factory-name" => Ok(HandleNamespace::SessionFactoryName),
            other => Err(MassIndexError::Config(format!(
                "unknown handle namespace: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for HandleNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleNamespace::PersistenceUnitName => f.write_str("persistence-unit-name"),
            HandleNamespace::SessionFactoryName => f.write_str("session-factory-name"),
        }
    }
}

const DEFAULT_CHECKPOINT_INTERVAL: usize = 2_000;
const DEFAULT_SESSION_CLEAR_INTERVAL: usize = 200;

/// Parameters of one mass-indexing job.
///
/// Derived values (`checkpoint_interval`, `session_clear_interval`,
/// `entity_fetch_size`, `max_threads`) stay `None` until set explicitly and
/// are read through accessors that apply the default rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    /// Entity types to reindex; a comma-separated string is accepted
    #[serde(
        default,
        alias = "entityTypes",
        deserialize_with = "deserialize_entity_types"
    )]
    pub entity_types: Vec<String>,

    #[serde(default = "default_true", alias = "purgeAllOnStart")]
    pub purge_all_on_start: bool,

    #[serde(default = "default_true", alias = "optimizeAfterPurge")]
    pub optimize_after_purge: bool,

    #[serde(default = "default_true", alias = "optimizeOnFinish")]
    pub optimize_on_finish: bool,

    #[serde(default, alias = "cacheMode")]
    pub cache_mode: CacheMode,

    /// Key page size; zero or negative loads all keys at once
    #[serde(default = "default_id_fetch_size", alias = "idFetchSize")]
    pub id_fetch_size: i64,

    #[serde(default, alias = "entityFetchSize")]
    pub entity_fetch_size: Option<usize>,

    /// Opaque query applied to every type
    #[serde(default, alias = "customQueryHQL", alias = "customQueryHql")]
    pub custom_query_hql: Option<String>,

    /// JSON-encoded predicate applied to every type
    #[serde(default, alias = "customQueryCriteria")]
    pub custom_query_criteria: Option<String>,

    #[serde(default, alias = "maxResultsPerEntity")]
    pub max_results_per_entity: Option<u64>,

    #[serde(default = "default_rows_per_partition", alias = "rowsPerPartition")]
    pub rows_per_partition: usize,

    #[serde(default, alias = "maxThreads")]
    pub max_threads: Option<usize>,

    #[serde(default, alias = "checkpointInterval")]
    pub checkpoint_interval: Option<usize>,

    #[serde(default, alias = "sessionClearInterval")]
    pub session_clear_interval: Option<usize>,

    #[serde(default, alias = "entityManagerFactoryReference")]
    pub entity_manager_factory_reference: Option<String>,

    #[serde(default, alias = "entityManagerFactoryNamespace")]
    pub entity_manager_factory_namespace: Option<HandleNamespace>,

    #[serde(default, alias = "tenantId")]
    pub tenant_id: Option<String>,

    #[serde(default = "default_one", alias = "typesToIndexInParallel")]
    pub types_to_index_in_parallel: usize,

    #[serde(default = "default_threads_to_load", alias = "threadsToLoadObjects")]
    pub threads_to_load_objects: usize,

    /// Restart detection key
    #[serde(default = "default_job_name", alias = "jobName")]
    pub job_name: String,

    /// Flush attempts after the first failure
    #[serde(default = "default_flush_retries", alias = "flushRetries")]
    pub flush_retries: u32,
}

fn default_true() -> bool {
    true
}

fn default_one() -> usize {
    1
}

fn default_id_fetch_size() -> i64 {
    1_000
}

fn default_rows_per_partition() -> usize {
    20_000
}

fn default_threads_to_load() -> usize {
    6
}

fn default_job_name() -> String {
    "mass-indexing".to_string()
}

fn default_flush_retries() -> u32 {
    3
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EntityTypeList {
    Joined(String),
    List(Vec<String>),
}

fn split_entity_types(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn deserialize_entity_types<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match EntityTypeList::deserialize(deserializer)? {
        EntityTypeList::Joined(s) => split_entity_types(&s),
        EntityTypeList::List(v) => v,
    })
}

impl Default for JobParameters {
    fn default() -> Self {
        Self {
            entity_types: Vec::new(),
            purge_all_on_start: true,
            optimize_after_purge: true,
            optimize_on_finish: true,
            cache_mode: CacheMode::default(),
            id_fetch_size: default_id_fetch_size(),
            entity_fetch_size: None,
            custom_query_hql: None,
            custom_query_criteria: None,
            max_results_per_entity: None,
            rows_per_partition: default_rows_per_partition(),
            max_threads: None,
            checkpoint_interval: None,
            session_clear_interval: None,
            entity_manager_factory_reference: None,
            entity_manager_factory_namespace: None,
            tenant_id: None,
            types_to_index_in_parallel: default_one(),
            threads_to_load_objects: default_threads_to_load(),
            job_name: default_job_name(),
            flush_retries: default_flush_retries(),
        }
    }
}

impl JobParameters {
    /// Parameters for the given types with every other value defaulted.
    pub fn for_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entity_types: types.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Replace the type list from a comma-separated string.
    pub fn with_entity_types_csv(mut self, joined: &str) -> Self {
        self.entity_types = split_entity_types(joined);
        self
    }

    pub fn with_rows_per_partition(mut self, rows: usize) -> Self {
        self.rows_per_partition = rows;
        self
    }

    pub fn with_checkpoint_interval(mut self, interval: usize) -> Self {
        self.checkpoint_interval = Some(interval);
        self
    }

    pub fn with_session_clear_interval(mut self, interval: usize) -> Self {
        self.session_clear_interval = Some(interval);
        self
    }

    pub fn with_custom_query(mut self, query: impl Into<String>) -> Self {
        self.custom_query_hql = Some(query.into());
        self
    }

    pub fn with_criteria(mut self, criteria_json: impl Into<String>) -> Self {
        self.custom_query_criteria = Some(criteria_json.into());
        self
    }

    pub fn with_purge(mut self, purge_all_on_start: bool) -> Self {
        self.purge_all_on_start = purge_all_on_start;
        self
    }

    pub fn with_optimize(mut self, after_purge: bool, on_finish: bool) -> Self {
        self.optimize_after_purge = after_purge;
        self.optimize_on_finish = on_finish;
        self
    }

    pub fn with_threads(
        mut self,
        types_in_parallel: usize,
        loaders_per_type: usize,
        max_threads: Option<usize>,
    ) -> Self {
        self.types_to_index_in_parallel = types_in_parallel;
        self.threads_to_load_objects = loaders_per_type;
        self.max_threads = max_threads;
        self
    }

    pub fn with_job_name(mut self, name: impl Into<String>) -> Self {
        self.job_name = name.into();
        self
    }

    /// Keys per chunk: explicit value, else `min(2000, rows_per_partition)`.
    pub fn checkpoint_interval(&self) -> usize {
        self.checkpoint_interval
            .unwrap_or_else(|| DEFAULT_CHECKPOINT_INTERVAL.min(self.rows_per_partition))
    }

    /// Records between session clears: explicit value, else `min(200, checkpoint_interval)`.
    pub fn session_clear_interval(&self) -> usize {
        self.session_clear_interval
            .unwrap_or_else(|| DEFAULT_SESSION_CLEAR_INTERVAL.min(self.checkpoint_interval()))
    }

    /// Records per load batch, defaulting to the session clear interval.
    pub fn entity_fetch_size(&self) -> usize {
        self.entity_fetch_size
            .unwrap_or_else(|| self.session_clear_interval())
    }

    pub fn fetch_size(&self) -> FetchSize {
        FetchSize::from_hint(self.id_fetch_size)
    }

    /// Check value ranges and the relations between intervals.
    pub fn validate(&self) -> Result<(), MassIndexError> {
        fn positive(name: &str, value: usize) -> Result<(), MassIndexError> {
            if value == 0 {
                return Err(MassIndexError::Config(format!("{} must be > 0", name)));
            }
            Ok(())
        }

        if self.entity_types.is_empty() {
            return Err(MassIndexError::ScopeConfiguration(
                "entityTypes must name at least one type".to_string(),
            ));
        }
        if self.custom_query_hql.is_some() && self.custom_query_criteria.is_some() {
            return Err(MassIndexError::ScopeConfiguration(
                "customQueryHQL and customQueryCriteria are mutually exclusive".to_string(),
            ));
        }

        positive("rowsPerPartition", self.rows_per_partition)?;
        positive("checkpointInterval", self.checkpoint_interval())?;
        positive("sessionClearInterval", self.session_clear_interval())?;
        positive("entityFetchSize", self.entity_fetch_size())?;
        positive("typesToIndexInParallel", self.types_to_index_in_parallel)?;
        positive("threadsToLoadObjects", self.threads_to_load_objects)?;
        if let Some(max_threads) = self.max_threads {
            positive("maxThreads", max_threads)?;
        }
        if self.max_results_per_entity == Some(0) {
            return Err(MassIndexError::Config(
                "maxResultsPerEntity must be > 0".to_string(),
            ));
        }
        if self.checkpoint_interval() > self.rows_per_partition {
            return Err(MassIndexError::Config(format!(
                "checkpointInterval ({}) must not exceed rowsPerPartition ({})",
                self.checkpoint_interval(),
                self.rows_per_partition
            )));
        }
        if self.session_clear_interval() > self.checkpoint_interval() {
            return Err(MassIndexError::Config(format!(
                "sessionClearInterval ({}) must not exceed checkpointInterval ({})",
                self.session_clear_interval(),
                self.checkpoint_interval()
            )));
        }
        if self.job_name.trim().is_empty() || self.job_name.contains(':') {
            return Err(MassIndexError::Config(format!(
                "invalid jobName: {:?}",
                self.job_name
            )));
        }
        Ok(())
    }

    /// Validate and materialize every derived default.
    pub fn resolve(mut self) -> Result<Self, MassIndexError> {
        self.validate()?;
        self.checkpoint_interval = Some(self.checkpoint_interval());
        self.session_clear_interval = Some(self.session_clear_interval());
        self.entity_fetch_size = Some(self.entity_fetch_size());
        Ok(self)
    }
}

/// CLI settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to the RocksDB directory holding records and job state
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Path to the Tantivy index directory
    #[serde(default = "default_index_path")]
    pub index_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Index writer heap budget in megabytes
    #[serde(default = "default_writer_memory_mb")]
    pub writer_memory_mb: usize,

    #[serde(default)]
    pub job: JobParameters,
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "massindex")
}

fn default_db_path() -> String {
    project_dirs()
        .map(|p| p.data_local_dir().join("db"))
        .unwrap_or_else(|| PathBuf::from("./data"))
        .to_string_lossy()
        .to_string()
}

fn default_index_path() -> String {
    project_dirs()
        .map(|p| p.data_local_dir().join("index"))
        .unwrap_or_else(|| PathBuf::from("./index"))
        .to_string_lossy()
        .to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_writer_memory_mb() -> usize {
    50
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            index_path: default_index_path(),
            log_level: default_log_level(),
            writer_memory_mb: default_writer_memory_mb(),
            job: JobParameters::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/massindex/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (MASSINDEX__*)
    ///
    /// CLI flags are applied by the caller.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, MassIndexError> {
        let config_dir = project_dirs()
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("db_path", default_db_path())
            .map_err(|e| MassIndexError::Config(e.to_string()))?
            .set_default("index_path", default_index_path())
            .map_err(|e| MassIndexError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| MassIndexError::Config(e.to_string()))?
            .set_default("writer_memory_mb", default_writer_memory_mb() as i64)
            .map_err(|e| MassIndexError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // MASSINDEX__DB_PATH, MASSINDEX__LOG_LEVEL, ...
        builder = builder.add_source(
            Environment::with_prefix("MASSINDEX")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| MassIndexError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| MassIndexError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_job_defaults() {
        let params = JobParameters::for_types(["Book"]);
        assert!(params.purge_all_on_start);
        assert!(params.optimize_after_purge);
        assert!(params.optimize_on_finish);
        assert_eq!(params.cache_mode, CacheMode::Ignore);
        assert_eq!(params.rows_per_partition, 20_000);
        assert_eq!(params.checkpoint_interval(), 2_000);
        assert_eq!(params.session_clear_interval(), 200);
        assert_eq!(params.entity_fetch_size(), 200);
        assert_eq!(params.fetch_size(), FetchSize::Rows(1_000));
        assert_eq!(params.types_to_index_in_parallel, 1);
        assert_eq!(params.threads_to_load_objects, 6);
        assert_eq!(params.job_name, "mass-indexing");
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_derived_defaults_follow_smaller_values() {
        let params = JobParameters::for_types(["Book"]).with_rows_per_partition(150);
        assert_eq!(params.checkpoint_interval(), 150);
        assert_eq!(params.session_clear_interval(), 150);

        let params = JobParameters::for_types(["Book"]).with_checkpoint_interval(50);
        assert_eq!(params.session_clear_interval(), 50);
        assert_eq!(params.entity_fetch_size(), 50);
    }

    #[test]
    fn test_fetch_size_sentinel() {
        assert_eq!(FetchSize::from_hint(0), FetchSize::All);
        assert_eq!(FetchSize::from_hint(i64::MIN), FetchSize::All);
        assert_eq!(FetchSize::from_hint(50).limit(), Some(50));
        assert_eq!(FetchSize::All.limit(), None);
    }

    #[test]
    fn test_validate_interval_relations() {
        let params = JobParameters::for_types(["Book"])
            .with_rows_per_partition(1_000)
            .with_checkpoint_interval(2_000);
        assert!(matches!(params.validate(), Err(MassIndexError::Config(_))));

        let params = JobParameters::for_types(["Book"])
            .with_checkpoint_interval(100)
            .with_session_clear_interval(200);
        assert!(matches!(params.validate(), Err(MassIndexError::Config(_))));

        let params = JobParameters::for_types(["Book"]).with_rows_per_partition(0);
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_validate_scope_errors() {
        let params = JobParameters::for_types(Vec::<String>::new());
        assert!(matches!(
            params.validate(),
            Err(MassIndexError::ScopeConfiguration(_))
        ));

        let params = JobParameters::for_types(["Book"])
            .with_custom_query("genre = 'scifi'")
            .with_criteria(r#"{"kind":"field_exists","field":"genre"}"#);
        assert!(matches!(
            params.validate(),
            Err(MassIndexError::ScopeConfiguration(_))
        ));
    }

    #[test]
    fn test_resolve_materializes_defaults() {
        let params = JobParameters::for_types(["Book"]).resolve().unwrap();
        assert_eq!(params.checkpoint_interval, Some(2_000));
        assert_eq!(params.session_clear_interval, Some(200));
        assert_eq!(params.entity_fetch_size, Some(200));
    }

    #[test]
    fn test_job_parameters_accept_camel_case_and_csv() {
        let json = r#"{
            "entityTypes": "Book, Author ,",
            "rowsPerPartition": 500,
            "cacheMode": "NORMAL",
            "customQueryHQL": "genre = 'scifi'",
            "entityManagerFactoryNamespace": "session-factory-name",
            "idFetchSize": -1
        }"#;
        let params: JobParameters = serde_json::from_str(json).unwrap();
        assert_eq!(params.entity_types, vec!["Book", "Author"]);
        assert_eq!(params.rows_per_partition, 500);
        assert_eq!(params.cache_mode, CacheMode::Normal);
        assert!(params.cache_mode.reads_cache());
        assert_eq!(params.custom_query_hql.as_deref(), Some("genre = 'scifi'"));
        assert_eq!(
            params.entity_manager_factory_namespace,
            Some(HandleNamespace::SessionFactoryName)
        );
        assert_eq!(params.fetch_size(), FetchSize::All);
        assert!(params.purge_all_on_start);

        let list: JobParameters =
            serde_json::from_str(r#"{"entity_types":["Book"]}"#).unwrap();
        assert_eq!(list.entity_types, vec!["Book"]);
    }

    #[test]
    fn test_cache_mode_parse() {
        assert_eq!("refresh".parse::<CacheMode>().unwrap(), CacheMode::Refresh);
        assert!(CacheMode::Refresh.writes_cache());
        assert!(!CacheMode::Refresh.reads_cache());
        assert!(!CacheMode::Ignore.writes_cache());
        assert!("sometimes".parse::<CacheMode>().is_err());
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.writer_memory_mb, 50);
        assert!(settings.job.entity_types.is_empty());
    }

    #[test]
    fn test_load_with_defaults() {
        let settings = Settings::load(None).unwrap();
        assert!(!settings.db_path.is_empty());
        assert_eq!(settings.job.rows_per_partition, 20_000);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "db_path = \"/tmp/massindex-db\"\n\n[job]\nentity_types = \"Book,Author\"\nrows_per_partition = 5000\npurge_all_on_start = false"
        )
        .unwrap();

        let settings = Settings::load(Some(&file.path().to_string_lossy())).unwrap();
        assert_eq!(settings.db_path, "/tmp/massindex-db");
        assert_eq!(settings.job.entity_types, vec!["Book", "Author"]);
        assert_eq!(settings.job.rows_per_partition, 5_000);
        assert!(!settings.job.purge_all_on_start);
        assert_eq!(settings.job.checkpoint_interval(), 2_000);
    }
}
