//! Domain model module declarations.

pub mod action;
pub mod pane;
pub mod plan;
pub mod result;
