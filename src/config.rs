use crate::credentials::Policy;
use crate::error::ConfigError;
use actix_web::cookie::Key;
use std::{env, fmt::Display, path::PathBuf, str::FromStr};

pub struct Config {
    pub bind: String,
    pub db_path: PathBuf,
    pub session_key: Key,
    pub secure_cookie: bool,
    pub policy: Policy,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let bcrypt_cost: u32 = try_load("VIDRATE_BCRYPT_COST", &bcrypt::DEFAULT_COST.to_string())?;
        if !(4..=31).contains(&bcrypt_cost) {
            return Err(ConfigError::Invalid {
                key: "VIDRATE_BCRYPT_COST",
                message: format!("{} is outside 4..=31", bcrypt_cost),
            });
        }
        Ok(Self {
            bind: try_load("VIDRATE_BIND", "127.0.0.1:8080")?,
            db_path: try_load("VIDRATE_DB", "vidrate.db")?,
            session_key: session_key()?,
            secure_cookie: try_load("VIDRATE_SECURE_COOKIE", "false")?,
            policy: Policy {
                bcrypt_cost,
                admin_username: try_load("VIDRATE_ADMIN", "admin")?,
            },
        })
    }
}

fn try_load<T: FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    let value = env::var(key).unwrap_or_else(|_| {
        log::info!("{} not set, using default: {}", key, default);
        default.to_owned()
    });
    value.parse().map_err(|err: T::Err| ConfigError::Invalid {
        key,
        message: err.to_string(),
    })
}

fn session_key() -> Result<Key, ConfigError> {
    match env::var("VIDRATE_SESSION_KEY") {
        Ok(secret) if secret.len() >= 32 => Ok(Key::derive_from(secret.as_bytes())),
        Ok(_) => Err(ConfigError::Invalid {
            key: "VIDRATE_SESSION_KEY",
            message: "must be at least 32 bytes".to_owned(),
        }),
        Err(_) => {
            log::warn!("VIDRATE_SESSION_KEY not set, sessions will not survive a restart");
            Ok(Key::generate())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_overrides() {
        assert_eq!(try_load::<u16>("VIDRATE_TEST_UNSET_PORT", "8080").unwrap(), 8080);

        env::set_var("VIDRATE_TEST_FLAG", "true");
        assert!(try_load::<bool>("VIDRATE_TEST_FLAG", "false").unwrap());

        env::set_var("VIDRATE_TEST_COST", "many");
        assert!(matches!(
            try_load::<u32>("VIDRATE_TEST_COST", "12"),
            Err(ConfigError::Invalid {
                key: "VIDRATE_TEST_COST",
                ..
            })
        ));
    }
}
