use serde::{Deserialize, Serialize};

use crate::app::{PostdeckError, Result};
use crate::domain::Post;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Admin,
    #[default]
    User,
}

impl Role {
    pub fn is_elevated(self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl std::str::FromStr for Role {
    type Err = PostdeckError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            other => Err(PostdeckError::validation(
                "role",
                format!("unknown role '{}'", other),
            )),
        }
    }
}

/// The signed-in user as supplied by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUser {
    pub id: String,
    pub role: Role,
    pub display_name: String,
}

impl CurrentUser {
    pub fn new(id: impl Into<String>, role: Role, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            display_name: display_name.into(),
        }
    }

    pub fn is_elevated(&self) -> bool {
        self.role.is_elevated()
    }

    /// Whether this user may select, edit or delete `post`.
    ///
    /// External posts belong to a shared dataset and are writable only by
    /// elevated users. Internal posts are writable by their owner or an
    /// elevated user.
    pub fn can_mutate(&self, post: &Post) -> bool {
        if post.is_external {
            return self.is_elevated();
        }
        self.is_elevated() || post.is_owned_by(&self.id)
    }
}

pub fn require_user(user: Option<&CurrentUser>) -> Result<&CurrentUser> {
    user.ok_or_else(|| PostdeckError::Unauthorized("sign in required".into()))
}

pub fn require_elevated(user: Option<&CurrentUser>) -> Result<&CurrentUser> {
    let user = require_user(user)?;
    if !user.is_elevated() {
        return Err(PostdeckError::Unauthorized(
            "elevated role required to modify external posts".into(),
        ));
    }
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn internal_post(owner: &str) -> Post {
        let mut post = Post::new_internal("Title", "Body", owner, "Owner");
        post.id = "p1".into();
        post
    }

    #[test]
    fn test_owner_can_mutate_internal_post() {
        let user = CurrentUser::new("u1", Role::User, "Ann");
        assert!(user.can_mutate(&internal_post("u1")));
        assert!(!user.can_mutate(&internal_post("u2")));
    }

    #[test]
    fn test_admin_can_mutate_everything() {
        let admin = CurrentUser::new("root", Role::Admin, "Root");
        let mut external = internal_post("u2");
        external.is_external = true;
        external.user_id = None;
        assert!(admin.can_mutate(&internal_post("u2")));
        assert!(admin.can_mutate(&external));
    }

    #[test]
    fn test_standard_user_cannot_mutate_external() {
        let user = CurrentUser::new("u1", Role::User, "Ann");
        let mut external = internal_post("u1");
        external.is_external = true;
        assert!(!user.can_mutate(&external));
    }

    #[test]
    fn test_require_elevated() {
        let user = CurrentUser::new("u1", Role::User, "Ann");
        let admin = CurrentUser::new("root", Role::Admin, "Root");
        assert!(require_elevated(None).is_err());
        assert!(matches!(
            require_elevated(Some(&user)),
            Err(PostdeckError::Unauthorized(_))
        ));
        assert!(require_elevated(Some(&admin)).is_ok());
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("Admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert!("root".parse::<Role>().is_err());
    }
}
