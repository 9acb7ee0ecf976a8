//! # farm-id
//!
//! Validated names and identifiers for the failover harness.
//!
//! ## Design Principles
//!
//! - Roles are operator-controlled labels (`primary`, `secondary`); template and
//!   container ids come from the management controller
//! - Every name has one canonical string form and is validated on parse and deserialize
//! - Names are typed so a role can never be passed where a container is expected
//!
//! ## Name Format
//!
//! Node roles use the DNS-label-like alphabet `[a-z0-9][a-z0-9._-]*`, at most 63 bytes.
//! Template and container ids are assigned by the management controller and
//! only need to be non-empty, free of whitespace and `/`, and at most 255 bytes.
//!
//! Scenario identifiers are generated rather than chosen and use the
//! prefixed ULID form `scn_{ulid}`, e.g. `scn_01HV4Z2WQXKJNM8GPQY6VBKC3D`.

mod error;
mod macros;
mod scenario;
mod types;

pub use error::{IdError, NameError};
pub use macros::{validate_name, validate_remote_id, MAX_NAME_LEN, MAX_REMOTE_ID_LEN};
pub use scenario::ScenarioId;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
