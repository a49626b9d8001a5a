// SPDX-License-Identifier: MIT OR Apache-2.0

//! Process-wide name → pipeline-factory table.
//!
//! Factories assemble a pipeline's modules; [`get_pipeline`] then runs the
//! prepare phase (default → auto-assert → init) so the returned pipeline is
//! ready to start.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::error::{Result, XmError};
use crate::pipeline::pipeline::Pipeline;
use crate::runtime::ClusterRuntime;

/// Builds an unprepared pipeline for a runtime.
pub type PipelineFactory = fn(&Arc<ClusterRuntime>) -> Result<Pipeline>;

fn table() -> &'static RwLock<HashMap<String, PipelineFactory>> {
    static TABLE: OnceLock<RwLock<HashMap<String, PipelineFactory>>> = OnceLock::new();
    TABLE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register a factory under a name. Later registrations replace earlier
/// ones.
pub fn register(name: &str, factory: PipelineFactory) {
    table()
        .write()
        .expect("registry lock poisoned")
        .insert(name.to_string(), factory);
}

/// Look up a factory, build the pipeline and prepare it.
///
/// # Errors
///
/// Returns [`XmError::UnknownPipeline`] for an unregistered name, or the
/// factory/prepare error.
pub async fn get_pipeline(name: &str, runtime: &Arc<ClusterRuntime>) -> Result<Pipeline> {
    let factory = {
        let registry = table().read().expect("registry lock poisoned");
        registry
            .get(name)
            .copied()
            .ok_or_else(|| XmError::UnknownPipeline(name.to_string()))?
    };
    let mut pipeline = factory(runtime)?;
    pipeline.prepare(runtime).await?;
    Ok(pipeline)
}

/// Registered pipeline names, sorted.
#[must_use]
pub fn registered() -> Vec<String> {
    let mut names: Vec<String> = table()
        .read()
        .expect("registry lock poisoned")
        .keys()
        .cloned()
        .collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_factory(_runtime: &Arc<ClusterRuntime>) -> Result<Pipeline> {
        Ok(Pipeline::new("registry-test"))
    }

    #[test]
    fn test_register_and_list() {
        register("registry-test", empty_factory);
        assert!(registered().contains(&"registry-test".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_pipeline() {
        let cluster = crate::config::ClusterFile::from_yaml(
            "apiVersion: v1\nkind: Cluster\nmetadata:\n  name: x\nspec: {}\n",
        )
        .unwrap();
        let args = crate::runtime::Args {
            work_dir: tempfile::tempdir().unwrap().into_path(),
            ..Default::default()
        };
        let runtime = ClusterRuntime::new(cluster, args).unwrap();
        let err = get_pipeline("does-not-exist", &runtime).await.unwrap_err();
        assert!(matches!(err, XmError::UnknownPipeline(_)));
    }
}
