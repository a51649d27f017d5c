use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use cdp_adapter::{InjectionChannel, SharedChannel};
use fragment_codec::{Capability, Command, InstallOptions};
use lifecycle::ArmHook;
use pagebridge_core_types::{BridgeResult, DocumentHandle, Generation};

use crate::catalog::{ProfileBundle, ProfileCatalog};
use crate::profile::ThrottleProfile;

/// Page-side answer to APPLY_THROTTLE.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleReport {
    pub active: String,
    pub wrapped: bool,
}

/// Applies throttle profiles to documents.
///
/// The page-side gate is installed once per generation and reads the active
/// profile on every call, so switching profiles is a single APPLY_THROTTLE
/// that replaces the previous one. Each document has at most one active
/// profile.
pub struct ThrottleSimulator {
    channel: SharedChannel,
    catalog: RwLock<ProfileCatalog>,
    active: DashMap<DocumentHandle, ThrottleProfile>,
    generations: DashMap<DocumentHandle, Generation>,
}

impl ThrottleSimulator {
    pub fn new(channel: SharedChannel) -> Self {
        Self::with_catalog(channel, ProfileCatalog::builtin())
    }

    pub fn with_catalog(channel: SharedChannel, catalog: ProfileCatalog) -> Self {
        Self {
            channel,
            catalog: RwLock::new(catalog),
            active: DashMap::new(),
            generations: DashMap::new(),
        }
    }

    pub fn catalog(&self) -> ProfileCatalog {
        self.catalog.read().clone()
    }

    pub fn merge_bundle(&self, bundle: ProfileBundle) -> BridgeResult<()> {
        Ok(self.catalog.write().merge_bundle(bundle)?)
    }

    pub fn active(&self, handle: DocumentHandle) -> Option<ThrottleProfile> {
        self.active.get(&handle).map(|entry| entry.clone())
    }

    /// Looks `id` up in the catalog and applies it.
    pub async fn apply(&self, handle: DocumentHandle, id: &str) -> BridgeResult<ThrottleReport> {
        let profile = self.catalog.read().get(id)?.clone();
        self.apply_profile(handle, profile).await
    }

    /// Installs the gate if needed, then makes `profile` the only active one.
    pub async fn apply_profile(
        &self,
        handle: DocumentHandle,
        profile: ThrottleProfile,
    ) -> BridgeResult<ThrottleReport> {
        profile.validate()?;
        let report = self.push(handle, &profile).await?;
        info!(
            target: "throttle",
            %handle,
            profile = %profile.id,
            latency_ms = profile.latency_ms,
            offline = profile.is_offline(),
            "throttle profile applied"
        );
        self.active.insert(handle, profile);
        Ok(report)
    }

    /// Makes `id` the active profile without touching the document; it is
    /// pushed the next time the document is armed.
    pub fn preselect(&self, handle: DocumentHandle, id: &str) -> BridgeResult<()> {
        let profile = self.catalog.read().get(id)?.clone();
        debug!(target: "throttle", %handle, profile = %profile.id, "throttle profile preselected");
        self.active.insert(handle, profile);
        Ok(())
    }

    pub fn forget(&self, handle: DocumentHandle) {
        self.active.remove(&handle);
        self.generations.remove(&handle);
    }

    async fn push(
        &self,
        handle: DocumentHandle,
        profile: &ThrottleProfile,
    ) -> BridgeResult<ThrottleReport> {
        let generation = self
            .generations
            .get(&handle)
            .map(|entry| *entry)
            .unwrap_or(Generation::INITIAL);
        let install = Command::install(Capability::ThrottleGate, generation, &InstallOptions::default());
        self.channel.run(handle, install).await?;
        let reply = self
            .channel
            .run(handle, Command::apply_throttle(&profile.id, profile.to_value()))
            .await?;
        Ok(serde_json::from_value(reply)?)
    }
}

/// Navigation wipes the page-side profile; put the active one back.
#[async_trait]
impl ArmHook for ThrottleSimulator {
    fn name(&self) -> &str {
        "throttle"
    }

    async fn on_armed(&self, handle: DocumentHandle, generation: Generation) -> BridgeResult<()> {
        self.generations.insert(handle, generation);
        let Some(profile) = self.active(handle) else {
            return Ok(());
        };
        if profile.is_unlimited() {
            return Ok(());
        }
        self.push(handle, &profile).await?;
        debug!(target: "throttle", %handle, %generation, profile = %profile.id, "throttle re-applied");
        Ok(())
    }
}
