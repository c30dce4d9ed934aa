use crate::types::is_local_id;

/// Represents the identity context for the current operation.
///
/// Authentication mechanics live outside this crate; callers hand us the
/// resolved identity. A guest session carries a local-only user identifier
/// until it is promoted to (or merged into) an authenticated account.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// The ID of the user owning new records
    pub user_id: String,

    /// The ID of the current device
    pub device_id: String,

    /// Whether or not the app is currently in offline mode
    pub offline_mode: bool,
}

impl AuthContext {
    pub fn new(user_id: impl Into<String>, device_id: impl Into<String>, offline_mode: bool) -> Self {
        Self {
            user_id: user_id.into(),
            device_id: device_id.into(),
            offline_mode,
        }
    }

    /// Whether this session runs under a local-only (guest) identity.
    pub fn is_guest(&self) -> bool {
        is_local_id(&self.user_id)
    }
}
