pub mod build_cmd;
pub mod inspect_cmd;

pub use build_cmd::{cmd_build, BuildArgs};
pub use inspect_cmd::cmd_inspect;
