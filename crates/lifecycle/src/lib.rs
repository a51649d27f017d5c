//! Lifecycle coordination for injected capabilities.
//!
//! Page-side state is wiped by every real navigation. The coordinator tracks
//! navigation generations per document and re-issues INSTALL when content
//! loads, while the page-side flag guard keeps repeated arming harmless.

pub mod coordinator;
pub mod machine;
pub mod model;

pub use coordinator::{ArmHook, CoordinatorHandle, LifecycleCoordinator};
pub use machine::LifecycleMachine;
pub use model::{ArmState, InstallationRegistry, LifecycleSnapshot, SignalOutcome};
