use std::{ops::Deref, sync::Arc};

use crate::warning::WarningSystem;

/// Shared state handed to commands and event handlers
#[derive(Clone)]
pub struct Data(pub Arc<DataInner>);

pub struct DataInner {
    pub warnings: WarningSystem,
}

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("restricted_users", &self.warnings.cache().restricted_user_count())
            .field("snapshot_path", &self.warnings.config().snapshot_path)
            .finish()
    }
}

impl Deref for Data {
    type Target = DataInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Data {
    #[must_use]
    pub fn new(warnings: WarningSystem) -> Self {
        Self(Arc::new(DataInner { warnings }))
    }

    /// The warning system
    #[must_use]
    pub fn warnings(&self) -> &WarningSystem {
        &self.0.warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WarningConfig;
    use crate::warning::{MockModerationPlatform, MockViolationBackend};

    fn data() -> Data {
        Data::new(WarningSystem::new(
            WarningConfig::default(),
            Arc::new(MockViolationBackend::new()),
            Arc::new(MockModerationPlatform::new()),
        ))
    }

    #[test]
    fn test_clones_share_state() {
        let data = data();
        let clone = data.clone();
        assert!(Arc::ptr_eq(&data.0, &clone.0));
    }

    #[test]
    fn test_data_debug_impl() {
        let debug = format!("{:?}", data());
        assert!(debug.contains("restricted_users: 0"));
        assert!(debug.contains("data/restrictions.json"));
    }
}
