//! Per-layer memory footprint estimation
//!
//! Without the model file at hand, a layer's size is estimated from the
//! parameter count spread over a fixed reference depth, scaled by the weight
//! precision and by a size-category overhead for activations and KV cache:
//!
//! ```text
//! per_layer_mb = params * bytes_per_param / REFERENCE_DEPTH * overhead(category)
//! ```
//!
//! The reference depth does not depend on the model's actual layer count, so
//! asking for more layers never shrinks each layer.

use tensor_core::{GpuTuning, ModelDescriptor};

/// Depth over which the parameter count is spread
pub const REFERENCE_DEPTH: f64 = 32.0;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Estimated memory needed by one layer, in MB
pub fn per_layer_mb(model: &ModelDescriptor, gpu: &GpuTuning) -> f64 {
    let weight_bytes = model.effective_parameters_billions() * 1e9 * gpu.bytes_per_parameter();
    weight_bytes / BYTES_PER_MB / REFERENCE_DEPTH * model.size_category.overhead_factor()
}
