//! Pure state machine behind the coordinator.

use fragment_codec::Capability;
use pagebridge_core_types::Generation;

use crate::model::{ArmState, InstallationRegistry};

#[derive(Clone, Debug, Default)]
pub struct LifecycleMachine {
    state: ArmState,
    generation: Generation,
    registry: InstallationRegistry,
    url: Option<String>,
}

impl LifecycleMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ArmState {
        self.state
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn registry(&self) -> &InstallationRegistry {
        &self.registry
    }

    /// A real navigation: page-side state is gone, so every flag is dropped
    /// and a new generation starts.
    pub fn navigation_committed(&mut self, url: &str) -> Generation {
        self.generation = self.generation.next();
        self.state = ArmState::Uninstalled;
        self.registry.clear();
        self.url = Some(url.to_string());
        self.generation
    }

    pub fn in_page_navigation(&mut self, url: &str) {
        self.url = Some(url.to_string());
    }

    /// Starts an arming pass and returns the generation it targets. An armed
    /// machine stays armed while it re-issues installs.
    pub fn begin_install(&mut self) -> Generation {
        if self.state == ArmState::Uninstalled {
            self.state = ArmState::Installing;
        }
        self.generation
    }

    /// Records a confirmed install. Ignored when `generation` is stale.
    pub fn record_install(&mut self, cap: Capability, generation: Generation) -> bool {
        if generation != self.generation {
            return false;
        }
        self.registry.record(cap, generation)
    }

    pub fn is_installed(&self, cap: Capability) -> bool {
        self.registry.is_installed(cap, self.generation)
    }

    /// Completes an arming pass; `false` when a navigation committed since
    /// [`LifecycleMachine::begin_install`].
    pub fn finish_install(&mut self, generation: Generation) -> bool {
        if generation != self.generation {
            return false;
        }
        self.state = ArmState::Armed;
        true
    }

    pub fn abort_install(&mut self, generation: Generation) {
        if generation == self.generation && self.state == ArmState::Installing {
            self.state = ArmState::Uninstalled;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arming_walks_uninstalled_installing_armed() {
        let mut machine = LifecycleMachine::new();
        assert_eq!(machine.state(), ArmState::Uninstalled);
        assert_eq!(machine.generation(), Generation(0));

        let gen = machine.begin_install();
        assert_eq!(machine.state(), ArmState::Installing);
        assert!(machine.record_install(Capability::ThrottleGate, gen));
        assert!(machine.finish_install(gen));
        assert_eq!(machine.state(), ArmState::Armed);
        assert!(machine.is_installed(Capability::ThrottleGate));

        machine.begin_install();
        assert_eq!(machine.state(), ArmState::Armed);
    }

    #[test]
    fn navigation_resets_state_and_flags() {
        let mut machine = LifecycleMachine::new();
        let gen = machine.begin_install();
        machine.record_install(Capability::NetworkObserver, gen);
        machine.finish_install(gen);

        let next = machine.navigation_committed("https://b.test/");
        assert_eq!(next, Generation(1));
        assert_eq!(machine.state(), ArmState::Uninstalled);
        assert!(!machine.is_installed(Capability::NetworkObserver));
        assert_eq!(machine.url(), Some("https://b.test/"));
    }

    #[test]
    fn in_page_navigation_keeps_generation() {
        let mut machine = LifecycleMachine::new();
        machine.navigation_committed("https://a.test/");
        machine.in_page_navigation("https://a.test/#x");
        assert_eq!(machine.generation(), Generation(1));
        assert_eq!(machine.url(), Some("https://a.test/#x"));
    }

    #[test]
    fn stale_installs_are_discarded() {
        let mut machine = LifecycleMachine::new();
        let gen = machine.begin_install();
        machine.navigation_committed("https://b.test/");
        assert!(!machine.record_install(Capability::ConsoleObserver, gen));
        assert!(!machine.finish_install(gen));
        assert_eq!(machine.state(), ArmState::Uninstalled);

        let gen = machine.begin_install();
        machine.abort_install(gen);
        assert_eq!(machine.state(), ArmState::Uninstalled);
    }
}
