//! Capability provider: the single seam hiding host-version differences.
//!
//! One implementation per supported host release is injected at startup;
//! the registry filters object kinds and attribute schemas through it so the
//! pipelines never branch on a host version themselves.

pub trait CapabilityProvider: Send + Sync {
    fn host_version(&self) -> &str;

    /// Can the host spawn objects of this kind?
    fn supports_kind(&self, kind: &str) -> bool;

    /// Can the host read/write this attribute on this kind?
    fn supports_attribute(&self, kind: &str, attr: &str) -> bool;
}

/// Current host line: everything in the registry is available.
#[derive(Debug, Default, Clone, Copy)]
pub struct ModernCapabilities;

impl CapabilityProvider for ModernCapabilities {
    fn host_version(&self) -> &str {
        "modern"
    }

    fn supports_kind(&self, _kind: &str) -> bool {
        true
    }

    fn supports_attribute(&self, _kind: &str, _attr: &str) -> bool {
        true
    }
}

/// Older host line without display entities, glow frames and glowing flags.
#[derive(Debug, Default, Clone, Copy)]
pub struct LegacyCapabilities;

const LEGACY_MISSING_KINDS: [&str; 2] = ["glow_item_frame", "block_display"];
const LEGACY_MISSING_ATTRS: [&str; 3] = ["glowing", "display_transform", "anger_target"];

impl CapabilityProvider for LegacyCapabilities {
    fn host_version(&self) -> &str {
        "legacy"
    }

    fn supports_kind(&self, kind: &str) -> bool {
        !LEGACY_MISSING_KINDS.contains(&kind)
    }

    fn supports_attribute(&self, kind: &str, attr: &str) -> bool {
        self.supports_kind(kind) && !LEGACY_MISSING_ATTRS.contains(&attr)
    }
}
