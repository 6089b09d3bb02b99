/// How a registry reports callbacks arriving for a token whose listener is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DanglingCallbackLog {
    /// Never log.
    Silent,
    /// Log the first dangling dispatch per registry, then stay quiet.
    #[default]
    Once,
    /// Log every dangling dispatch.
    Every,
}

impl DanglingCallbackLog {
    #[inline(always)]
    pub(crate) fn to_raw(self) -> u8 {
        match self {
            DanglingCallbackLog::Silent => 0,
            DanglingCallbackLog::Once => 1,
            DanglingCallbackLog::Every => 2,
        }
    }

    #[inline(always)]
    pub(crate) fn from_raw(raw: u8) -> Self {
        match raw {
            0 => DanglingCallbackLog::Silent,
            2 => DanglingCallbackLog::Every,
            _ => DanglingCallbackLog::Once,
        }
    }
}

/// The common set of tunables for a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Number of listener slots to reserve up front in newly created registries.
    pub registry_capacity: usize,
    /// Number of entries to reserve up front in newly created identity caches.
    pub identity_cache_capacity: usize,
    /// Reporting policy for callbacks that reach a retired token.
    pub dangling_callbacks: DanglingCallbackLog,
    /// Rejects symbols whose source carries no signature metadata.
    ///
    /// Shared libraries opened through `libloading` never carry metadata, so this is only
    /// useful with sources that describe their exports.
    pub require_signatures: bool,
}

impl BridgeConfig {
    /// Constructs a bridge configuration.
    pub fn new(
        registry_capacity: usize,
        identity_cache_capacity: usize,
        dangling_callbacks: DanglingCallbackLog,
        require_signatures: bool,
    ) -> Self {
        Self {
            registry_capacity,
            identity_cache_capacity,
            dangling_callbacks,
            require_signatures,
        }
    }

    pub fn with_registry_capacity(mut self, capacity: usize) -> Self {
        self.registry_capacity = capacity;
        self
    }

    pub fn with_identity_cache_capacity(mut self, capacity: usize) -> Self {
        self.identity_cache_capacity = capacity;
        self
    }

    pub fn with_dangling_callbacks(mut self, policy: DanglingCallbackLog) -> Self {
        self.dangling_callbacks = policy;
        self
    }

    pub fn with_required_signatures(mut self, require: bool) -> Self {
        self.require_signatures = require;
        self
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            registry_capacity: 16,
            identity_cache_capacity: 64,
            dangling_callbacks: DanglingCallbackLog::Once,
            require_signatures: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dangling_policy_raw_round_trip() {
        for policy in [
            DanglingCallbackLog::Silent,
            DanglingCallbackLog::Once,
            DanglingCallbackLog::Every,
        ] {
            assert_eq!(DanglingCallbackLog::from_raw(policy.to_raw()), policy);
        }
    }

    #[test]
    fn builders_override_defaults() {
        let config = BridgeConfig::default()
            .with_registry_capacity(4)
            .with_dangling_callbacks(DanglingCallbackLog::Every)
            .with_required_signatures(true);
        assert_eq!(config.registry_capacity, 4);
        assert_eq!(config.identity_cache_capacity, 64);
        assert_eq!(config.dangling_callbacks, DanglingCallbackLog::Every);
        assert!(config.require_signatures);
    }
}
