use crate::extractors::ExtractedVideo;

/// Which videos a caller wants first. Both fields match case-insensitively as substrings of the label.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QualityPreference {
    pub quality: Option<String>,
    pub server: Option<String>,
}

impl QualityPreference {
    pub fn new(quality: Option<String>, server: Option<String>) -> Self {
        QualityPreference { quality, server }
    }

    fn rank(&self, label: &str) -> u8 {
        let label = label.to_ascii_lowercase();
        let matches = |needle: &Option<String>| {
            needle
                .as_deref()
                .filter(|needle| !needle.is_empty())
                .is_some_and(|needle| label.contains(&needle.to_ascii_lowercase()))
        };

        match (matches(&self.quality), matches(&self.server)) {
            (true, true) => 0,
            (true, false) => 1,
            (false, true) => 2,
            (false, false) => 3,
        }
    }
}

/// Stable sort: videos keep their extractor order within the same rank.
pub fn sort_videos(videos: &mut [ExtractedVideo], preference: &QualityPreference) {
    videos.sort_by_cached_key(|video| preference.rank(&video.label));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(videos: &[ExtractedVideo]) -> Vec<&str> {
        videos.iter().map(|video| video.label.as_str()).collect()
    }

    fn videos() -> Vec<ExtractedVideo> {
        ["Doodstream mirror", "GDrive - 480p", "CDA 1080p", "GDrive - 1080p", "CDA 720p"]
            .into_iter()
            .enumerate()
            .map(|(i, label)| ExtractedVideo::new(format!("https://cdn.example.com/{i}.mp4"), label))
            .collect()
    }

    #[test]
    fn test_quality_first() {
        let mut videos = videos();
        sort_videos(&mut videos, &QualityPreference::new(Some("1080".into()), None));

        assert_eq!(
            labels(&videos),
            ["CDA 1080p", "GDrive - 1080p", "Doodstream mirror", "GDrive - 480p", "CDA 720p"]
        );
    }

    #[test]
    fn test_quality_and_server() {
        let mut videos = videos();
        sort_videos(
            &mut videos,
            &QualityPreference::new(Some("1080p".into()), Some("gdrive".into())),
        );

        assert_eq!(
            labels(&videos),
            ["GDrive - 1080p", "CDA 1080p", "GDrive - 480p", "Doodstream mirror", "CDA 720p"]
        );
    }

    #[test]
    fn test_no_preference_keeps_order() {
        let mut videos = videos();
        sort_videos(&mut videos, &QualityPreference::default());

        assert_eq!(
            labels(&videos),
            ["Doodstream mirror", "GDrive - 480p", "CDA 1080p", "GDrive - 1080p", "CDA 720p"]
        );
    }
}
