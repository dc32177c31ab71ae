//! Command implementations for tensorctl

pub mod config;
pub mod detect;
pub mod models;
pub mod plan;
pub mod run;

use crate::ModelArgs;
use tensor_core::ModelDescriptor;

/// Build a model descriptor from the command line, starting from what the
/// name implies and applying explicit overrides
pub fn model_descriptor(args: &ModelArgs) -> ModelDescriptor {
    let mut model = ModelDescriptor::from_name(&args.model);
    if let Some(category) = args.category {
        model.size_category = category;
    }
    if let Some(layers) = args.layers {
        model = model.with_layer_count(layers);
    }
    if let Some(params) = args.params {
        model = model.with_parameters(params);
    }
    model
}
