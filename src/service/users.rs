//! service::users

use super::{Result, Sdlc};
use crate::core::model::User;

impl Sdlc {
    pub async fn get_current_user(&self) -> Result<User> {
        Ok(self.store.current_user().await?)
    }

    /// Users known to the backend, optionally matching `search`.
    pub async fn get_users(&self, search: Option<&str>) -> Result<Vec<User>> {
        let search = search.map(str::trim).filter(|s| !s.is_empty());
        Ok(self.store.list_users(search).await?)
    }
}
