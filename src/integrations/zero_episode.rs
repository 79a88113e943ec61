// src/integrations/zero_episode.rs
//
// Zero-episode detection from streaming episode titles.
//
// Catalog entries list their streaming episodes as "Episode N - Title". An
// entry whose list starts at "Episode 0" and covers no more than the declared
// episode count treats its prologue as episode zero.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use crate::domain::media::Media;
use crate::integrations::catalog::ZeroEpisodeHeuristic;

fn episode_title_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Episode (\d+(?:\.\d+)?) - ").expect("valid episode title regex")
    })
}

#[derive(Debug, Clone, Default)]
pub struct StreamingEpisodeHeuristic;

impl StreamingEpisodeHeuristic {
    pub fn new() -> Self {
        Self
    }

    pub fn detect(media: &Media) -> bool {
        let has_zero = media.streaming_episodes.iter().any(|title| {
            episode_title_regex()
                .captures(title)
                .and_then(|caps| caps[1].parse::<f64>().ok())
                .map(|n| n == 0.0)
                .unwrap_or(false)
        });
        if !has_zero {
            return false;
        }
        match media.episodes {
            Some(count) => count as usize >= media.streaming_episodes.len(),
            None => false,
        }
    }
}

#[async_trait]
impl ZeroEpisodeHeuristic for StreamingEpisodeHeuristic {
    async fn has_leading_zero_episode(&self, media: &Media) -> bool {
        Self::detect(media)
    }
}

/// Heuristic that never fires.
#[derive(Debug, Clone, Default)]
pub struct NoZeroEpisodes;

#[async_trait]
impl ZeroEpisodeHeuristic for NoZeroEpisodes {
    async fn has_leading_zero_episode(&self, _media: &Media) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_streaming(episodes: Option<u32>, titles: &[&str]) -> Media {
        Media {
            episodes,
            streaming_episodes: titles.iter().map(|t| t.to_string()).collect(),
            ..Media::new(1, "Show")
        }
    }

    #[tokio::test]
    async fn test_detects_episode_zero() {
        let media = with_streaming(
            Some(12),
            &["Episode 0 - Prologue", "Episode 1 - Start", "Episode 2 - Next"],
        );
        assert!(StreamingEpisodeHeuristic::new().has_leading_zero_episode(&media).await);
    }

    #[tokio::test]
    async fn test_ignores_recap_point_five() {
        let media = with_streaming(Some(12), &["Episode 0.5 - Recap", "Episode 1 - Start"]);
        assert!(!StreamingEpisodeHeuristic::new().has_leading_zero_episode(&media).await);
    }

    #[test]
    fn test_more_streaming_entries_than_episodes() {
        let media = with_streaming(Some(1), &["Episode 0 - Prologue", "Episode 1 - Start"]);
        assert!(!StreamingEpisodeHeuristic::detect(&media));
        assert!(!StreamingEpisodeHeuristic::detect(&Media::new(2, "Empty")));
    }
}
