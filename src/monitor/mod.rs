//! Container monitoring: data model, volume resolution, threshold evaluation,
//! cooldown gating and the logon-time pipeline that ties them together.

pub mod container;
pub mod cooldown;
pub mod pipeline;
pub mod resolver;
pub mod threshold;
