//! Loading the name-mapping record from the workspace.

use serde_json::json;

use jobsync_core::ResourceNameMappings;

use crate::error::SyncError;
use crate::store::{StoreError, WorkspaceStore};

/// Where the mappings of a run came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingsSource {
    /// Parsed from the record at the configured path.
    Loaded,
    /// No record existed; an empty one was uploaded (`created`) or the
    /// upload failed and the run continues without one.
    Missing { created: bool },
}

#[derive(Debug, Clone)]
pub struct LoadedMappings {
    pub mappings: ResourceNameMappings,
    pub source: MappingsSource,
}

/// Read the mapping record at `path`. The record is JSON5, so comments,
/// trailing commas and unquoted keys are accepted.
///
/// A missing record is replaced by an empty default (never overwriting an
/// existing file). A record that exists but does not parse is an error and
/// is left untouched.
pub async fn load_mappings(store: &dyn WorkspaceStore, path: &str) -> Result<LoadedMappings, SyncError> {
    match store.download(path).await {
        Ok(bytes) => {
            let text = String::from_utf8_lossy(&bytes);
            let mappings = json5::from_str(&text).map_err(|source| SyncError::InvalidMappings {
                path: path.to_string(),
                source,
            })?;
            Ok(LoadedMappings {
                mappings,
                source: MappingsSource::Loaded,
            })
        }
        Err(StoreError::NotFound(_)) => {
            tracing::warn!(path, "name mappings not found, creating an empty record");
            let created = match store.upload(path, default_record(), false).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!(path, error = %e, "failed to create default name mappings");
                    false
                }
            };
            Ok(LoadedMappings {
                mappings: ResourceNameMappings::default(),
                source: MappingsSource::Missing { created },
            })
        }
        Err(e) => Err(e.into()),
    }
}

fn default_record() -> Vec<u8> {
    let record = json!({ "compute_name_mappings": {}, "run_as_mappings": {} });
    serde_json::to_vec_pretty(&record).unwrap_or_default()
}
