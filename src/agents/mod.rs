//! Client-side agents: the publisher running on each vehicle and the
//! subscriber running on each viewer, plus the boundaries they talk to.

pub mod client;
pub mod position;
pub mod publisher;
pub mod reconciler;
pub mod renderer;
pub mod subscriber;
