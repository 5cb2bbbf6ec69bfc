//! Per-browser screen state.
//!
//! A [`SessionState`] lives in the session cookie between requests. Every user
//! action consumes the current state and hands back the next one, so handlers
//! never poke at individual session keys. Messages meant for the user travel
//! along as a [`Flash`] and are shown once by the next render.

use crate::catalog::Catalog;
use crate::credentials::{self, Policy, Registration};
use crate::database::{RatingDb, UserDb};
use crate::error::AppError;
use crate::model::User;
use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

pub const YEARS_RANGE: RangeInclusive<u32> = 0..=100;
pub const SCORE_RANGE: RangeInclusive<u8> = 1..=5;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "level", content = "message", rename_all = "snake_case")]
pub enum Flash {
    Success(String),
    Info(String),
    Warning(String),
    Error(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RatingSession {
    pub username: String,
    pub admin: bool,
    /// Unrated videos in the order they will be shown, next one last.
    pub queue: Vec<String>,
    pub current: Option<String>,
}

impl RatingSession {
    pub fn is_complete(&self) -> bool {
        self.queue.is_empty() && self.current.is_none()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Screen {
    /// Nothing chosen yet, only the login and register buttons.
    #[default]
    Anonymous,
    LoggingIn,
    Registering,
    /// Password checked, but the account still lacks its profile years.
    CollectingProfile { username: String },
    Rating(RatingSession),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionState {
    pub screen: Screen,
    pub flash: Option<Flash>,
}

pub fn parse_years(input: &str) -> Result<u32, &'static str> {
    match input.trim().parse::<u32>() {
        Ok(years) if YEARS_RANGE.contains(&years) => Ok(years),
        _ => Err("Years of research experience must be a whole number between 0 and 100."),
    }
}

pub fn parse_score(input: &str) -> Result<u8, &'static str> {
    match input.trim().parse::<u8>() {
        Ok(score) if SCORE_RANGE.contains(&score) => Ok(score),
        _ => Err("Ratings go from 1 to 5."),
    }
}

fn start_rating<D, R>(db: &D, catalog: &Catalog, rng: &mut R, user: &User) -> Result<Screen, AppError>
where
    D: RatingDb,
    R: Rng + ?Sized,
{
    let mut queue = catalog.unrated_videos_for(db, &user.username)?;
    queue.shuffle(rng);
    log::debug!("{} has {} videos left to rate", user.username, queue.len());
    Ok(Screen::Rating(RatingSession {
        username: user.username.clone(),
        admin: user.is_admin(),
        queue,
        current: None,
    }))
}

impl SessionState {
    fn new(screen: Screen, flash: Option<Flash>) -> Self {
        SessionState { screen, flash }
    }

    fn with_flash(mut self, flash: Flash) -> Self {
        self.flash = Some(flash);
        self
    }

    /// The logged in user, if any. Someone on the profile screen is not
    /// logged in yet.
    pub fn username(&self) -> Option<&str> {
        match &self.screen {
            Screen::Rating(rating) => Some(&rating.username),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.username().is_some()
    }

    pub fn take_flash(&mut self) -> Option<Flash> {
        self.flash.take()
    }

    pub fn show_login(self) -> Self {
        match self.screen {
            Screen::Anonymous
            | Screen::LoggingIn
            | Screen::Registering
            | Screen::CollectingProfile { .. } => SessionState::new(Screen::LoggingIn, None),
            _ => self,
        }
    }

    pub fn show_register(self) -> Self {
        match self.screen {
            Screen::Anonymous
            | Screen::LoggingIn
            | Screen::Registering
            | Screen::CollectingProfile { .. } => SessionState::new(Screen::Registering, None),
            _ => self,
        }
    }

    pub fn login<D, R>(
        self,
        db: &D,
        catalog: &Catalog,
        rng: &mut R,
        username: &str,
        password: &str,
    ) -> Result<Self, AppError>
    where
        D: UserDb + RatingDb,
        R: Rng + ?Sized,
    {
        if self.is_authenticated() {
            return Ok(self);
        }
        let invalid = || {
            SessionState::new(
                Screen::LoggingIn,
                Some(Flash::Error("Invalid username or password".to_owned())),
            )
        };
        if !credentials::verify(db, username, password)? {
            log::info!("Failed login for {}", username);
            return Ok(invalid());
        }
        if db.get_profile_years(username)?.is_none() {
            log::info!("{} needs to fill in profile years", username);
            return Ok(SessionState::new(
                Screen::CollectingProfile {
                    username: username.to_owned(),
                },
                Some(Flash::Info(
                    "Please provide additional info before continuing.".to_owned(),
                )),
            ));
        }
        let user = match db.get_user(username)? {
            Some(user) => user,
            None => return Ok(invalid()),
        };
        log::info!("{} logged in", username);
        let screen = start_rating(db, catalog, rng, &user)?;
        Ok(SessionState::new(
            screen,
            Some(Flash::Success(format!("Welcome {}!", username))),
        ))
    }

    /// Creates an account. The session stays on the register screen either
    /// way; logging in is a separate step.
    pub fn register<D: UserDb>(
        self,
        db: &D,
        policy: &Policy,
        username: &str,
        password: &str,
        years: &str,
    ) -> Result<Self, AppError> {
        if self.is_authenticated() {
            return Ok(self);
        }
        let registering = |flash| SessionState::new(Screen::Registering, Some(flash));
        if let Err(message) = credentials::validate(username, password) {
            return Ok(registering(Flash::Error(message.to_owned())));
        }
        let years = match parse_years(years) {
            Ok(years) => years,
            Err(message) => return Ok(registering(Flash::Error(message.to_owned()))),
        };
        let flash = match credentials::register(db, policy, username, password, years)? {
            Registration::Created => Flash::Success("Account created. Go to Login.".to_owned()),
            Registration::AlreadyExists => Flash::Warning("Username already taken.".to_owned()),
        };
        Ok(registering(flash))
    }

    pub fn submit_profile<D, R>(
        self,
        db: &D,
        catalog: &Catalog,
        rng: &mut R,
        years: &str,
    ) -> Result<Self, AppError>
    where
        D: UserDb + RatingDb,
        R: Rng + ?Sized,
    {
        let username = match &self.screen {
            Screen::CollectingProfile { username } => Some(username.clone()),
            _ => None,
        };
        let username = match username {
            Some(username) => username,
            None => return Ok(self),
        };
        let years = match parse_years(years) {
            Ok(years) => years,
            Err(message) => return Ok(self.with_flash(Flash::Error(message.to_owned()))),
        };
        db.set_profile_years(&username, years)?;
        let user = match db.get_user(&username)? {
            Some(user) => user,
            None => {
                return Ok(SessionState::new(
                    Screen::Anonymous,
                    Some(Flash::Error("This account no longer exists.".to_owned())),
                ))
            }
        };
        log::info!("{} filled in profile years", username);
        let screen = start_rating(db, catalog, rng, &user)?;
        Ok(SessionState::new(
            screen,
            Some(Flash::Success(format!("Welcome {}!", username))),
        ))
    }

    /// Puts the next queued video on screen if none is showing.
    pub fn present(mut self) -> Self {
        if let Screen::Rating(rating) = &mut self.screen {
            if rating.current.is_none() {
                rating.current = rating.queue.pop();
            }
        }
        self
    }

    pub fn rate<D: RatingDb>(
        self,
        db: &D,
        catalog: &Catalog,
        video_url: &str,
        score: &str,
    ) -> Result<Self, AppError> {
        let mut rating = match self.screen {
            Screen::Rating(rating) => rating,
            screen => return Ok(SessionState::new(screen, self.flash)),
        };
        if rating.current.as_deref() != Some(video_url) {
            // Usually a resubmitted form for a video that was already saved.
            return Ok(SessionState::new(
                Screen::Rating(rating),
                Some(Flash::Info("That video has already been rated.".to_owned())),
            ));
        }
        let score = match parse_score(score) {
            Ok(score) => score,
            Err(message) => {
                return Ok(SessionState::new(
                    Screen::Rating(rating),
                    Some(Flash::Error(message.to_owned())),
                ))
            }
        };
        if !catalog.contains(video_url) {
            log::warn!("Dropping {} from queue, no longer in catalog", video_url);
            rating.current = None;
            return Ok(SessionState::new(
                Screen::Rating(rating),
                Some(Flash::Warning("That video is no longer available.".to_owned())),
            ));
        }
        db.upsert_rating(&rating.username, video_url, score)?;
        log::debug!("{} rated {} with {}", rating.username, video_url, score);
        rating.current = None;
        Ok(SessionState::new(Screen::Rating(rating), None))
    }

    pub fn logout(self) -> Self {
        if let Some(username) = self.username() {
            log::info!("{} logged out", username);
        }
        SessionState::default()
    }
}
