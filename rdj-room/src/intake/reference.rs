//! Media reference parsing
//!
//! Turns a user-supplied link into a canonical, playable reference.
//! Recognised sources:
//! - YouTube: `youtube.com/watch?v=ID`, `youtu.be/ID`, `youtube.com/shorts/ID`
//! - SoundCloud: `soundcloud.com/<artist>/<track>`
//! - Direct audio files over http(s) with a known audio extension

use crate::error::{Error, Result};
use rdj_common::SourceType;
use reqwest::Url;

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "ogg", "wav", "m4a", "flac", "aac", "opus"];

const YOUTUBE_HOSTS: &[&str] = &["youtube.com", "www.youtube.com", "m.youtube.com", "music.youtube.com"];
const SOUNDCLOUD_HOSTS: &[&str] = &["soundcloud.com", "www.soundcloud.com", "m.soundcloud.com"];

/// A resolved, canonical media reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaReference {
    pub source_type: SourceType,
    /// Normalized link stored on the track
    pub media_ref: String,
    /// Title to use when metadata lookup fails
    pub fallback_title: String,
}

/// Parse a raw link
pub fn parse_reference(raw: &str) -> Result<MediaReference> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidReference("empty reference".to_string()));
    }

    let url = Url::parse(trimmed)
        .map_err(|e| Error::InvalidReference(format!("'{}' is not a link: {}", trimmed, e)))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(Error::InvalidReference(format!(
            "unsupported scheme '{}'",
            url.scheme()
        )));
    }
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();

    if YOUTUBE_HOSTS.contains(&host.as_str()) || host == "youtu.be" {
        return youtube(&url, &host);
    }
    if SOUNDCLOUD_HOSTS.contains(&host.as_str()) {
        return soundcloud(&url);
    }
    if let Some(reference) = direct_audio(&url) {
        return Ok(reference);
    }

    Err(Error::InvalidReference(format!(
        "'{}' is not a YouTube, SoundCloud or audio file link",
        trimmed
    )))
}

fn is_video_id(id: &str) -> bool {
    id.len() == 11
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn path_segments(url: &Url) -> Vec<&str> {
    url.path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default()
}

fn youtube(url: &Url, host: &str) -> Result<MediaReference> {
    let segments = path_segments(url);
    let id = if host == "youtu.be" {
        segments.first().map(|s| s.to_string())
    } else {
        match segments.as_slice() {
            ["watch"] => url
                .query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, value)| value.into_owned()),
            ["shorts", id] | ["embed", id] => Some(id.to_string()),
            _ => None,
        }
    };

    match id {
        Some(id) if is_video_id(&id) => Ok(MediaReference {
            source_type: SourceType::YouTube,
            media_ref: format!("https://www.youtube.com/watch?v={}", id),
            fallback_title: SourceType::YouTube.generic_title().to_string(),
        }),
        Some(id) => Err(Error::InvalidReference(format!("malformed YouTube video id '{}'", id))),
        None => Err(Error::InvalidReference(format!("no YouTube video in '{}'", url))),
    }
}

fn soundcloud(url: &Url) -> Result<MediaReference> {
    match path_segments(url).as_slice() {
        [artist, track] if *track != "sets" && *artist != "discover" => Ok(MediaReference {
            source_type: SourceType::SoundCloud,
            media_ref: format!("https://soundcloud.com/{}/{}", artist, track),
            fallback_title: SourceType::SoundCloud.generic_title().to_string(),
        }),
        _ => Err(Error::InvalidReference(format!("not a SoundCloud track: '{}'", url))),
    }
}

fn direct_audio(url: &Url) -> Option<MediaReference> {
    let file_name = path_segments(url).last()?.to_string();
    let (stem, extension) = file_name.rsplit_once('.')?;
    if stem.is_empty() || !AUDIO_EXTENSIONS.contains(&extension.to_ascii_lowercase().as_str()) {
        return None;
    }

    let mut canonical = url.clone();
    canonical.set_fragment(None);
    let fallback_title = match urlencoding::decode(&file_name) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => file_name.clone(),
    };
    Some(MediaReference {
        source_type: SourceType::DirectAudio,
        media_ref: canonical.to_string(),
        fallback_title,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_youtube_variants_normalize_to_watch_link() {
        for raw in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtube.com/watch?feature=share&v=dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ?t=42",
            "https://m.youtube.com/shorts/dQw4w9WgXcQ",
        ] {
            let reference = parse_reference(raw).unwrap();
            assert_eq!(reference.source_type, SourceType::YouTube, "{}", raw);
            assert_eq!(reference.media_ref, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
        }
    }

    #[test]
    fn test_youtube_without_video_rejected() {
        assert!(matches!(
            parse_reference("https://www.youtube.com/feed/trending"),
            Err(Error::InvalidReference(_))
        ));
        assert!(matches!(
            parse_reference("https://youtu.be/short"),
            Err(Error::InvalidReference(_))
        ));
    }

    #[test]
    fn test_soundcloud_track() {
        let reference = parse_reference("https://soundcloud.com/artist/some-track?si=abc").unwrap();
        assert_eq!(reference.source_type, SourceType::SoundCloud);
        assert_eq!(reference.media_ref, "https://soundcloud.com/artist/some-track");
        assert!(parse_reference("https://soundcloud.com/artist").is_err());
    }

    #[test]
    fn test_direct_audio_uses_file_name_as_fallback_title() {
        let reference = parse_reference("https://cdn.example.com/music/Night%20Drive.MP3#t=3").unwrap();
        assert_eq!(reference.source_type, SourceType::DirectAudio);
        assert_eq!(reference.fallback_title, "Night Drive.MP3");
        assert_eq!(reference.media_ref, "https://cdn.example.com/music/Night%20Drive.MP3");
    }

    #[test]
    fn test_direct_audio_title_keeps_undecodable_name() {
        let reference = parse_reference("https://cdn.example.com/music/caf%C3%A9%20%FF.ogg").unwrap();
        assert_eq!(reference.fallback_title, "caf%C3%A9%20%FF.ogg");

        let reference = parse_reference("https://cdn.example.com/music/caf%C3%A9.ogg").unwrap();
        assert_eq!(reference.fallback_title, "café.ogg");
    }

    #[test]
    fn test_unsupported_links_rejected() {
        for raw in ["", "not a link", "ftp://example.com/a.mp3", "https://example.com/page.html"] {
            assert!(
                matches!(parse_reference(raw), Err(Error::InvalidReference(_))),
                "{}",
                raw
            );
        }
    }
}
