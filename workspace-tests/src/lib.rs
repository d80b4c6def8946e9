//! Test support for end-to-end supervisor tests: a stand-in Hoverfly control
//! plane usable in-process or as the `hoverfly-stub` binary.

pub mod stub;

pub use stub::{admin_router, proxy_router, spawn_admin, StubArgs, StubOptions, StubState};
