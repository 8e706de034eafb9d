//! Command line front end for running simulation files.
//!
//! The models themselves live in `agsim-core` (the framework) and `agsim-components`
//! (weather, reporting and livestock). This crate locates simulation files, runs them
//! locally through the job runner or ships them to a remote run server.

pub mod files;
pub mod network;
pub mod run;

use tracing_subscriber::{fmt, EnvFilter};

/// Model types that can appear in a simulation file.
///
/// Naming the component crate's registry keeps its models linked into the binary so
/// that typetag can deserialize them.
pub fn model_types() -> &'static [&'static str] {
    agsim_components::MODEL_TYPES
}

/// Initialise logging, honouring `RUST_LOG` when set.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,agsim=info,agsim_core=info,agsim_components=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
