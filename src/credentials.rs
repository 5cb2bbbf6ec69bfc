use crate::database::UserDb;
use crate::error::AppError;
use crate::model::{Role, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Created,
    AlreadyExists,
}

/// How new accounts are created.
#[derive(Debug, Clone)]
pub struct Policy {
    pub bcrypt_cost: u32,
    /// Accounts registered under this name get `Role::Admin`.
    pub admin_username: String,
}

impl Policy {
    pub fn role_for(&self, username: &str) -> Role {
        if username == self.admin_username {
            Role::Admin
        } else {
            Role::Member
        }
    }
}

pub fn register<D: UserDb>(
    db: &D,
    policy: &Policy,
    username: &str,
    password: &str,
    years: u32,
) -> Result<Registration, AppError> {
    let user = User {
        username: username.to_owned(),
        password_hash: bcrypt::hash(password, policy.bcrypt_cost)?,
        years_of_experience: Some(years),
        role: policy.role_for(username),
    };
    if db.add_user(&user)? {
        log::info!("Registered user {} ({:?})", username, user.role);
        Ok(Registration::Created)
    } else {
        log::debug!("Username {} already taken", username);
        Ok(Registration::AlreadyExists)
    }
}

/// Checks `password` against the stored hash. Unknown users simply fail.
pub fn verify<D: UserDb>(db: &D, username: &str, password: &str) -> Result<bool, AppError> {
    match db.get_user(username)? {
        Some(user) => Ok(bcrypt::verify(password, &user.password_hash)?),
        None => Ok(false),
    }
}

/// Reasons a registration form is refused before touching the database.
pub fn validate(username: &str, password: &str) -> Result<(), &'static str> {
    if username.trim().is_empty() {
        return Err("Username must not be empty.");
    }
    if username.trim() != username {
        return Err("Username must not start or end with spaces.");
    }
    if username.chars().any(char::is_control) {
        return Err("Username contains invalid characters.");
    }
    if password.is_empty() {
        return Err("Password must not be empty.");
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn test_policy() -> Policy {
    Policy {
        bcrypt_cost: 4,
        admin_username: "admin".to_owned(),
    }
}
