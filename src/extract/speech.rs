//! Transcript-derived counters
//!
//! Folds speech-to-text updates into word, filler, repetition and pause
//! counters. This stream is event-driven and independent of the tick loop;
//! its counters join the per-tick aggregates when the session closes.

use crate::config::SpeechConfig;
use crate::types::{Feature, FeatureMap, TranscriptEvent};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Raw counters accumulated over a session
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SpeechCounters {
    pub events: u32,
    pub words: u32,
    pub fillers: u32,
    pub repetitions: u32,
    pub pauses: u32,
    pub pause_total_sec: f64,
}

#[derive(Debug, Clone)]
pub struct SpeechTracker {
    /// Filler phrases, pre-tokenized
    fillers: Vec<Vec<String>>,
    pause_threshold: Duration,
    counters: SpeechCounters,
    last_event_at: Option<DateTime<Utc>>,
    last_word: Option<String>,
}

impl SpeechTracker {
    pub fn new(config: &SpeechConfig) -> Self {
        let fillers = config
            .filler_words
            .iter()
            .map(|phrase| tokenize(phrase))
            .filter(|tokens| !tokens.is_empty())
            .collect();

        Self {
            fillers,
            pause_threshold: Duration::milliseconds(config.pause_threshold_ms as i64),
            counters: SpeechCounters::default(),
            last_event_at: None,
            last_word: None,
        }
    }

    pub fn reset(&mut self) {
        self.counters = SpeechCounters::default();
        self.last_event_at = None;
        self.last_word = None;
    }

    pub fn counters(&self) -> SpeechCounters {
        self.counters
    }

    /// Fold one transcript update into the counters
    pub fn ingest(&mut self, event: &TranscriptEvent) {
        self.counters.events += 1;

        // Pauses come from the timing of every update, interim or final
        if let Some(last) = self.last_event_at {
            let gap = event.at - last;
            if gap > self.pause_threshold {
                self.counters.pauses += 1;
                self.counters.pause_total_sec += gap.num_milliseconds() as f64 / 1000.0;
            }
        }
        if self.last_event_at.map_or(true, |last| event.at > last) {
            self.last_event_at = Some(event.at);
        }

        if !event.is_final {
            return;
        }

        let tokens = tokenize(&event.text);
        self.counters.words += tokens.len() as u32;
        self.counters.fillers += self.count_fillers(&tokens);

        for token in tokens {
            if self.last_word.as_deref() == Some(token.as_str()) {
                self.counters.repetitions += 1;
            }
            self.last_word = Some(token);
        }
    }

    /// Session-level speech features.
    ///
    /// Rates are per word (filler, repetition) or per minute of session
    /// (words); pause duration is the mean length of a detected pause.
    pub fn features(&self, session_duration_sec: f64) -> FeatureMap {
        let c = &self.counters;
        let per_word = |n: u32| {
            if c.words == 0 {
                0.0
            } else {
                n as f64 / c.words as f64
            }
        };
        let word_rate = if session_duration_sec > 0.0 {
            c.words as f64 / (session_duration_sec / 60.0)
        } else {
            0.0
        };
        let mean_pause = if c.pauses == 0 {
            0.0
        } else {
            c.pause_total_sec / c.pauses as f64
        };

        FeatureMap::from([
            (Feature::WordRate, word_rate),
            (Feature::FillerRate, per_word(c.fillers)),
            (Feature::RepetitionRate, per_word(c.repetitions)),
            (Feature::PauseCount, c.pauses as f64),
            (Feature::PauseDuration, mean_pause),
        ])
    }

    fn count_fillers(&self, tokens: &[String]) -> u32 {
        let mut count = 0;
        let mut i = 0;
        while i < tokens.len() {
            let matched = self
                .fillers
                .iter()
                .filter(|phrase| tokens[i..].starts_with(phrase.as_slice()))
                .map(|phrase| phrase.len())
                .max();
            match matched {
                Some(len) => {
                    count += 1;
                    i += len;
                }
                None => i += 1,
            }
        }
        count
    }
}

/// Lowercased words, split on anything that is not alphanumeric or an apostrophe
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}
