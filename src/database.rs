use crate::error::StoreError;
use crate::model::*;
use std::collections::HashSet;
use std::path::Path;

pub type Result<T> = std::result::Result<T, StoreError>;

const USERS: &[u8] = b"users";
const RATINGS: &[u8] = b"ratings";

/// Opens the database at `path` and makes sure both trees exist.
pub fn open<P: AsRef<Path>>(path: P) -> sled::Result<sled::Db> {
    let db = sled::open(path)?;
    init(&db)?;
    Ok(db)
}

pub fn init(db: &sled::Db) -> sled::Result<()> {
    db.open_tree(USERS)?;
    db.open_tree(RATINGS)?;
    Ok(())
}

// Ratings are keyed by length-prefixed username followed by the video url, so
// a prefix scan never picks up a user whose name extends another one.
fn rating_prefix(username: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + username.len());
    key.extend_from_slice(&(username.len() as u32).to_be_bytes());
    key.extend_from_slice(username.as_bytes());
    key
}

fn rating_key(username: &str, video_url: &str) -> Vec<u8> {
    let mut key = rating_prefix(username);
    key.extend_from_slice(video_url.as_bytes());
    key
}

pub trait UserDb {
    /// Inserts `user` unless its username is taken. Returns `false` and leaves
    /// the existing record alone on a duplicate.
    fn add_user(&self, user: &User) -> Result<bool>;
    fn get_user(&self, username: &str) -> Result<Option<User>>;
    fn set_profile_years(&self, username: &str, years: u32) -> Result<()>;
    fn all_users(&self) -> Result<Vec<User>>;

    fn get_profile_years(&self, username: &str) -> Result<Option<u32>> {
        Ok(self
            .get_user(username)?
            .and_then(|user| user.years_of_experience))
    }
}

pub trait RatingDb {
    /// Last write for a `(username, video_url)` pair wins.
    fn upsert_rating(&self, username: &str, video_url: &str, rating: u8) -> Result<()>;
    fn rated_videos(&self, username: &str) -> Result<HashSet<String>>;
    fn all_ratings(&self) -> Result<Vec<Rating>>;
}

impl UserDb for sled::Db {
    fn add_user(&self, user: &User) -> Result<bool> {
        let users = self.open_tree(USERS)?;
        let record = bincode::serialize(user)?;
        let swapped = users.compare_and_swap(
            user.username.as_bytes(),
            None as Option<&[u8]>,
            Some(record),
        )?;
        Ok(swapped.is_ok())
    }

    fn get_user(&self, username: &str) -> Result<Option<User>> {
        let users = self.open_tree(USERS)?;
        match users.get(username.as_bytes())? {
            Some(data) => Ok(Some(bincode::deserialize(&data)?)),
            None => Ok(None),
        }
    }

    fn set_profile_years(&self, username: &str, years: u32) -> Result<()> {
        let users = self.open_tree(USERS)?;
        let mut user = match self.get_user(username)? {
            Some(user) => user,
            None => {
                log::warn!("Profile update for unknown user {}", username);
                return Ok(());
            }
        };
        user.years_of_experience = Some(years);
        users.insert(username.as_bytes(), bincode::serialize(&user)?)?;
        Ok(())
    }

    fn all_users(&self) -> Result<Vec<User>> {
        let users = self.open_tree(USERS)?;
        users
            .iter()
            .values()
            .map(|data| -> Result<_> { Ok(bincode::deserialize(&data?)?) })
            .collect()
    }
}

impl RatingDb for sled::Db {
    fn upsert_rating(&self, username: &str, video_url: &str, rating: u8) -> Result<()> {
        let ratings = self.open_tree(RATINGS)?;
        let record = Rating {
            username: username.to_owned(),
            video_url: video_url.to_owned(),
            rating,
        };
        ratings.insert(rating_key(username, video_url), bincode::serialize(&record)?)?;
        Ok(())
    }

    fn rated_videos(&self, username: &str) -> Result<HashSet<String>> {
        let ratings = self.open_tree(RATINGS)?;
        ratings
            .scan_prefix(rating_prefix(username))
            .values()
            .map(|data| -> Result<String> {
                let rating: Rating = bincode::deserialize(&data?)?;
                Ok(rating.video_url)
            })
            .collect()
    }

    fn all_ratings(&self) -> Result<Vec<Rating>> {
        let ratings = self.open_tree(RATINGS)?;
        ratings
            .iter()
            .values()
            .map(|data| -> Result<_> { Ok(bincode::deserialize(&data?)?) })
            .collect()
    }
}

#[cfg(test)]
pub(crate) fn temporary() -> sled::Db {
    let db = sled::Config::new().temporary(true).open().unwrap();
    init(&db).unwrap();
    db
}
