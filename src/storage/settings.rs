use super::policy::{SETTING_USER_ID, SETTING_WORKSPACE_ID};
use crate::error::StorageError;
use uuid::Uuid;

/// Connection-local trusted settings. Only the binder writes them, through
/// [`super::Connection::set_config`]; statements can only read them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSettings {
    user_id: Option<Uuid>,
    workspace_id: Option<Uuid>,
}

impl SessionSettings {
    pub fn get(&self, name: &str) -> Option<Uuid> {
        match name {
            SETTING_USER_ID => self.user_id,
            SETTING_WORKSPACE_ID => self.workspace_id,
            _ => None,
        }
    }

    pub(crate) fn set(&mut self, name: &str, value: &str) -> Result<(), StorageError> {
        let invalid = || StorageError::InvalidSetting {
            name: name.to_string(),
        };
        let parsed = Uuid::parse_str(value.trim()).map_err(|_| invalid())?;
        match name {
            SETTING_USER_ID => self.user_id = Some(parsed),
            SETTING_WORKSPACE_ID => self.workspace_id = Some(parsed),
            _ => return Err(invalid()),
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.user_id.is_none() && self.workspace_id.is_none()
    }

    pub(crate) fn clear(&mut self) {
        self.user_id = None;
        self.workspace_id = None;
    }
}
