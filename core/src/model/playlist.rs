use std::str::FromStr;

use strum::EnumString;

use super::Video;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum SortBy {
    #[default]
    #[strum(serialize = "timestamp", serialize = "")]
    Timestamp,
    #[strum(serialize = "views")]
    Views,
}

impl SortBy {
    pub fn from_query(value: &str) -> SortBy {
        SortBy::from_str(value.trim()).unwrap_or_else(|_| {
            tracing::warn!(sort = %value, "invalid sort criteria");
            SortBy::default()
        })
    }
}

/// Sorts newest first or most viewed first. The sort is stable, so videos
/// that compare equal keep the order they came in.
pub fn sort_playlist(videos: &mut [Video], by: SortBy) {
    match by {
        SortBy::Timestamp => videos.sort_by(|a, b| b.timestamp.cmp(&a.timestamp)),
        SortBy::Views => videos.sort_by(|a, b| b.views.cmp(&a.views)),
    }
}

#[cfg(test)]
mod test {
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::{Thumbnail, VideoId};

    fn video(id: &str, ts: i64, views: i64) -> Video {
        Video {
            id: VideoId::from(id),
            title: id.to_owned(),
            description: String::new(),
            path: format!("/videos/{id}.mp4").into(),
            timestamp: Utc.timestamp_opt(ts, 0).unwrap(),
            thumbnail: Thumbnail::builtin_default(),
            views,
            qualities: Default::default(),
        }
    }

    fn ids(videos: &[Video]) -> Vec<&str> {
        videos.iter().map(|v| v.id.as_str()).collect()
    }

    #[test]
    fn newest_first() {
        let mut videos = vec![video("a", 1, 0), video("b", 3, 0), video("c", 2, 0)];
        sort_playlist(&mut videos, SortBy::Timestamp);
        assert_eq!(ids(&videos), vec!["b", "c", "a"]);
    }

    #[test]
    fn views_sort_is_stable() {
        let mut videos = vec![
            video("a", 1, 5),
            video("b", 2, 9),
            video("c", 3, 5),
            video("d", 4, 5),
        ];
        sort_playlist(&mut videos, SortBy::Views);
        assert_eq!(ids(&videos), vec!["b", "a", "c", "d"]);
    }

    #[test]
    fn sort_query() {
        assert_eq!(SortBy::from_query("Views"), SortBy::Views);
        assert_eq!(SortBy::from_query(""), SortBy::Timestamp);
        assert_eq!(SortBy::from_query("bogus"), SortBy::Timestamp);
    }
}
