//! Storage configuration.
//!
//! The element-mapper backend is chosen once here, at construction of the
//! registry, instead of being inferred from process-global state.

use std::path::PathBuf;

use crate::envelope::Crs;

/// Which element-mapper backend a registry uses for every location it
/// manages.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum BackendKind {
    /// Flat binary file pair inside the storage location.
    File,
    /// SQLite database inside the storage location.
    EmbeddedSql,
    /// SQLite database per location under a shared datasource path.
    RemoteSql { datasource: PathBuf },
}

/// Registry-wide storage policy: backend selection and the CRS assigned to
/// newly created locations.
#[derive(Clone, Debug)]
pub struct StorageConfig {
    backend: BackendKind,
    crs: Crs,
}

impl StorageConfig {
    /// File backend, WGS 84.
    pub fn new() -> Self {
        Self {
            backend: BackendKind::File,
            crs: Crs::wgs84(),
        }
    }

    pub fn backend(&self) -> &BackendKind {
        &self.backend
    }

    /// Builder-style method for chaining.
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    /// Builder-style method for chaining.
    pub fn with_crs(mut self, crs: Crs) -> Self {
        self.crs = crs;
        self
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StorageConfig::new();
        assert_eq!(config.backend(), &BackendKind::File);
        assert_eq!(config.crs().code(), "EPSG:4326");
    }

    #[test]
    fn test_builder() {
        let config = StorageConfig::new()
            .with_backend(BackendKind::EmbeddedSql)
            .with_crs(Crs("EPSG:3857".to_string()));
        assert_eq!(config.backend(), &BackendKind::EmbeddedSql);
        assert_eq!(config.crs().code(), "EPSG:3857");
    }

    #[test]
    fn test_remote_backend_carries_datasource() {
        let config = StorageConfig::new().with_backend(BackendKind::RemoteSql {
            datasource: PathBuf::from("/var/lib/geodex"),
        });
        match config.backend() {
            BackendKind::RemoteSql { datasource } => {
                assert_eq!(datasource, &PathBuf::from("/var/lib/geodex"))
            }
            other => panic!("unexpected backend {:?}", other),
        }
    }
}
