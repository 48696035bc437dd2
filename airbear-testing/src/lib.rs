mod rig;

pub use rig::{TEST_WEBHOOK_SECRET, TestRig};

pub mod prelude {
    pub use anyhow::{Context, anyhow, bail};
    pub type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;
}

pub use prelude::*;
