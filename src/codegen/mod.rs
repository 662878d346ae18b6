//! Device code generation (spec.md §5.2): one generator per shading
//! dialect, sharing the ABI/binding contract in `common`.

pub mod common;
pub mod native;
pub mod wgsl;

pub use common::ExprEmitter;
pub use native::NativeGenerator;
pub use wgsl::WgslGenerator;
