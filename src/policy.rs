//! Swap protection: whether a chain's swaps go through its private relay

use crate::config::{ProtectionConfig, SwapProtectionSetting};
use crate::ports::PrivateChannelPolicy;

use std::collections::HashSet;
use std::sync::RwLock;
use tracing::info;

/// Private submission applies only when the user setting is on, the
/// rollout gate is open and the chain has a relay
pub fn is_private_channel_eligible(
    setting: SwapProtectionSetting,
    chain_has_relay: bool,
    feature_gate: bool,
) -> bool {
    setting == SwapProtectionSetting::On && chain_has_relay && feature_gate
}

pub struct SwapProtectionPolicy {
    setting: RwLock<SwapProtectionSetting>,
    feature_gate: bool,
    relay_chains: HashSet<u64>,
}

impl SwapProtectionPolicy {
    pub fn new(
        setting: SwapProtectionSetting,
        feature_gate: bool,
        relay_chains: impl IntoIterator<Item = u64>,
    ) -> Self {
        Self {
            setting: RwLock::new(setting),
            feature_gate,
            relay_chains: relay_chains.into_iter().collect(),
        }
    }

    pub fn from_config(config: &ProtectionConfig, relay_chains: impl IntoIterator<Item = u64>) -> Self {
        Self::new(
            config.swap_protection,
            config.private_relay_enabled,
            relay_chains,
        )
    }

    pub fn setting(&self) -> SwapProtectionSetting {
        *self.setting.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_setting(&self, setting: SwapProtectionSetting) {
        let mut current = self.setting.write().unwrap_or_else(|e| e.into_inner());
        if *current != setting {
            info!("Swap protection changed from {:?} to {:?}", *current, setting);
            *current = setting;
        }
    }

    pub fn feature_gate(&self) -> bool {
        self.feature_gate
    }
}

impl PrivateChannelPolicy for SwapProtectionPolicy {
    fn is_private_channel_eligible(&self, chain_id: u64) -> bool {
        is_private_channel_eligible(
            self.setting(),
            self.relay_chains.contains(&chain_id),
            self.feature_gate,
        )
    }
}
