use crate::database::{self, RatingDb};

/// The videos on offer. Changing them means redeploying.
pub const VIDEOS: &[&str] = &[
    "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
    "https://www.youtube.com/watch?v=3JZ_D3ELwOQ",
    "https://www.youtube.com/watch?v=l482T0yNkeo",
];

#[derive(Debug, Clone)]
pub struct Catalog {
    videos: Vec<String>,
}

impl Default for Catalog {
    fn default() -> Self {
        Catalog::new(VIDEOS.iter().copied())
    }
}

impl Catalog {
    pub fn new<I, S>(videos: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Catalog {
            videos: videos.into_iter().map(Into::into).collect(),
        }
    }

    pub fn videos(&self) -> &[String] {
        &self.videos
    }

    pub fn contains(&self, video_url: &str) -> bool {
        self.videos.iter().any(|v| v == video_url)
    }

    /// Catalog minus what `username` already rated, in catalog order.
    pub fn unrated_videos_for<D: RatingDb>(
        &self,
        db: &D,
        username: &str,
    ) -> database::Result<Vec<String>> {
        let rated = db.rated_videos(username)?;
        Ok(self
            .videos
            .iter()
            .filter(|video| !rated.contains(video.as_str()))
            .cloned()
            .collect())
    }
}

/// Turns a watch url into something an `<iframe>` can show. Urls that are not
/// recognised are returned unchanged.
pub fn embed_url(video_url: &str) -> String {
    let id = video_url
        .strip_prefix("https://www.youtube.com/watch?v=")
        .or_else(|| video_url.strip_prefix("https://youtu.be/"));
    match id {
        Some(id) => {
            let id = id.split(|c: char| c == '&' || c == '?').next().unwrap_or(id);
            format!("https://www.youtube.com/embed/{}", id)
        }
        None => video_url.to_owned(),
    }
}
