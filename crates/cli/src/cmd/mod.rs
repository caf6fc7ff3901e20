mod apply;
mod plan;

pub use apply::{Outcome, cmd_apply};
pub use plan::cmd_plan;
