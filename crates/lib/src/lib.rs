//! koti-lib: declarative host configuration engine
//!
//! The operator describes the desired end-state of a machine as typed
//! configuration items grouped into sections. This crate:
//! - merges items declared more than once (`section`)
//! - schedules them into manager-homogeneous install steps (`schedule`)
//! - diffs current against target state through pluggable managers (`manager`, `managers`)
//! - turns the differences into an ordered plan of actions (`planner`)
//! - applies the plan under a confirmation policy (`execute`, `confirm`)
//! - remembers what was installed so undeclared items can be cleaned up (`store`)

pub mod action;
pub mod confirm;
pub mod consts;
pub mod execute;
pub mod item;
pub mod log;
pub mod manager;
pub mod managers;
pub mod model;
pub mod planner;
pub mod platform;
pub mod schedule;
pub mod section;
pub mod shell;
pub mod state;
pub mod store;
pub mod store_lock;
pub mod util;

/// Error type returned by user-supplied closures (content producers, hooks, predicates).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
