//! Filter registry: type name → constructor.
//!
//! Each `Graph` owns its own registry, pre-populated with the builtin filters.
//! Applications register their own filters under new names before adding
//! nodes by name.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::node::AnyFilter;
use crate::pipeline::node_type::NodeType;
use crate::pipeline::nodes::{FrameSource, Monitor, PipeOutput, RegionOfInterest};
use crate::pipeline::properties::Properties;
use std::collections::HashMap;

/// Builds a filter from its properties.
pub type FilterFactory = Box<dyn Fn(&Properties) -> PipelineResult<AnyFilter> + Send + Sync>;

pub struct FilterRegistry {
    factories: HashMap<String, FilterFactory>,
}

impl FilterRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry knowing every `NodeType`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for ty in NodeType::all() {
            let ty = *ty;
            registry.register(ty.type_name(), move |props| builtin(ty, props));
        }
        registry
    }

    /// Register (or replace) a constructor under `name`.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&Properties) -> PipelineResult<AnyFilter> + Send + Sync + 'static,
    {
        if self.factories.insert(name.to_string(), Box::new(factory)).is_some() {
            tracing::debug!("Replaced filter factory '{}'", name);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn create(&self, name: &str, props: &Properties) -> PipelineResult<AnyFilter> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| PipelineError::UnknownNodeType(name.to_string()))?;
        factory(props)
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn builtin(ty: NodeType, props: &Properties) -> PipelineResult<AnyFilter> {
    Ok(match ty {
        NodeType::FrameSource => FrameSource::from_properties(props)?.into(),
        NodeType::RegionOfInterest => RegionOfInterest::from_properties(props)?.into(),
        NodeType::Monitor => Monitor::from_properties(props)?.into(),
        NodeType::PipeOutput => PipeOutput::from_properties(props)?.into(),
    })
}
