//! # Bench helpers
//!
//! Caller-side pieces the production step runners build on top of the
//! bridge client: the per-sequence device context, and the checks applied
//! to what the client returns.
//!
//! ```text
//! bench/
//! ├── catalog.rs  - vendor / product ids as the bridge names them
//! ├── session.rs  - TestSession and the TargetDevice it owns
//! └── verify.rs   - mesh-config echo check, ADC averages and ranges, neighbor pick
//! ```

pub mod catalog;
pub mod session;
pub mod verify;

pub use catalog::{Product, Vendor};
pub use session::{TargetDevice, TestSession};
pub use verify::{
    check_ranges, field_average, select_strongest_neighbor, verify_mesh_config, FieldRange,
    MeshFieldError, RangeFailure, RangeReport,
};
