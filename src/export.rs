//! Admin downloads: the whole store and CSV tables of ratings and users.

use crate::database::{RatingDb, UserDb};
use crate::error::AppError;
use crate::model::{Rating, User};
use serde::Serialize;

pub const RATINGS_HEADER: [&str; 3] = ["username", "video_url", "rating"];
pub const USERS_HEADER: [&str; 2] = ["username", "years_of_experience"];

/// A user as it may leave the system. There is deliberately no hash field.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct UserRow {
    pub username: String,
    pub years_of_experience: Option<u32>,
}

impl From<User> for UserRow {
    fn from(user: User) -> Self {
        UserRow {
            username: user.username,
            years_of_experience: user.years_of_experience,
        }
    }
}

pub fn user_rows<D: UserDb>(db: &D) -> Result<Vec<UserRow>, AppError> {
    Ok(db.all_users()?.into_iter().map(UserRow::from).collect())
}

// The header is written by hand so that an empty table still has one.
fn to_csv<T: Serialize>(header: &[&str], rows: &[T]) -> Result<Vec<u8>, AppError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(header)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer
        .into_inner()
        .map_err(|err| AppError::Csv(err.into_error().into()))
}

pub fn ratings_csv(ratings: &[Rating]) -> Result<Vec<u8>, AppError> {
    to_csv(&RATINGS_HEADER, ratings)
}

pub fn users_csv(users: &[UserRow]) -> Result<Vec<u8>, AppError> {
    to_csv(&USERS_HEADER, users)
}

pub fn all_ratings_csv<D: RatingDb>(db: &D) -> Result<Vec<u8>, AppError> {
    ratings_csv(&db.all_ratings()?)
}

pub fn all_users_csv<D: UserDb>(db: &D) -> Result<Vec<u8>, AppError> {
    users_csv(&user_rows(db)?)
}

type Collection = (Vec<u8>, Vec<u8>, Vec<Vec<Vec<u8>>>);

/// Every tree of the database, bincode encoded. The counterpart of
/// [`restore`].
pub fn dump(db: &sled::Db) -> Result<Vec<u8>, AppError> {
    let collections: Vec<Collection> = db
        .export()
        .into_iter()
        .map(|(kind, name, entries)| (kind, name, entries.collect()))
        .collect();
    let data = bincode::serialize(&collections).map_err(crate::error::StoreError::from)?;
    Ok(data)
}

/// Loads a [`dump`] into a database. Every tree in the dump must be empty in
/// `db`, existing records are never overwritten.
pub fn restore(db: &sled::Db, data: &[u8]) -> Result<(), AppError> {
    let collections: Vec<Collection> =
        bincode::deserialize(data).map_err(crate::error::StoreError::from)?;
    for (_, name, _) in &collections {
        if !db.open_tree(name)?.is_empty() {
            return Err(AppError::NotEmpty(String::from_utf8_lossy(name).into_owned()));
        }
    }
    db.import(
        collections
            .into_iter()
            .map(|(kind, name, entries)| (kind, name, entries.into_iter()))
            .collect(),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{register, test_policy};
    use crate::database::temporary;

    #[test]
    fn user_csv_never_contains_hashes() {
        let db = temporary();
        register(&db, &test_policy(), "admin", "pw", 10).unwrap();
        register(&db, &test_policy(), "alice", "pw", 2).unwrap();
        let hash = db.get_user("alice").unwrap().unwrap().password_hash;

        let csv = String::from_utf8(all_users_csv(&db).unwrap()).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("username,years_of_experience"));
        assert!(csv.contains("alice,2"));
        assert!(csv.contains("admin,10"));
        assert!(!csv.contains("password_hash"));
        assert!(!csv.contains(&hash));
    }

    #[test]
    fn ratings_csv_lists_every_rating() {
        let db = temporary();
        db.upsert_rating("alice", "https://example.com/a?x=1,2", 4).unwrap();
        db.upsert_rating("bobby", "b", 1).unwrap();

        let csv = String::from_utf8(all_ratings_csv(&db).unwrap()).unwrap();
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(
            lines,
            vec![
                "username,video_url,rating",
                "alice,\"https://example.com/a?x=1,2\",4",
                "bobby,b,1",
            ]
        );
    }

    #[test]
    fn empty_tables_keep_their_header() {
        let db = temporary();
        assert_eq!(all_ratings_csv(&db).unwrap(), b"username,video_url,rating\n");
        assert_eq!(all_users_csv(&db).unwrap(), b"username,years_of_experience\n");
    }

    #[test]
    fn missing_years_export_as_empty_field() {
        let rows = vec![UserRow {
            username: "old".to_owned(),
            years_of_experience: None,
        }];
        let csv = String::from_utf8(users_csv(&rows).unwrap()).unwrap();
        assert_eq!(csv, "username,years_of_experience\nold,\n");
    }

    #[test]
    fn dump_restores_into_a_fresh_database() {
        let db = temporary();
        register(&db, &test_policy(), "alice", "pw", 2).unwrap();
        db.upsert_rating("alice", "v", 5).unwrap();

        let copy = sled::Config::new().temporary(true).open().unwrap();
        restore(&copy, &dump(&db).unwrap()).unwrap();
        assert_eq!(copy.get_user("alice").unwrap(), db.get_user("alice").unwrap());
        assert_eq!(copy.all_ratings().unwrap(), db.all_ratings().unwrap());

        assert!(matches!(
            restore(&copy, &dump(&db).unwrap()),
            Err(AppError::NotEmpty(_))
        ));
    }
}
