mod lifecycle;

pub use lifecycle::{classify, LifecycleState, Schedule};
