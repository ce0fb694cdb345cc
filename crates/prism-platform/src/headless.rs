// SPDX-License-Identifier: CEPL-1.0
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("failed to read events file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: bad timestamp {value:?}")]
    BadTimestamp { line: usize, value: String },
    #[error("line {line}: unknown event type {value:?}")]
    UnknownEvent { line: usize, value: String },
    #[error("line {line}: {event} expects {expected}")]
    MissingParam {
        line: usize,
        event: &'static str,
        expected: &'static str,
    },
    #[error("line {line}: bad number {value:?}")]
    BadNumber { line: usize, value: String },
}

/// Scripted stand-ins for window events.
#[derive(Clone, Debug, PartialEq)]
pub enum HeadlessEvent {
    /// Next synthetic swapchain image may be rendered into.
    Available,
    /// Jump playback to `time` seconds and advance at `rate`.
    Play { time: f32, rate: f32 },
    /// Write the current frame to `path` as binary PPM.
    Save { path: PathBuf },
    /// Debug marker; logged verbatim.
    Mark { text: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct TimedEvent {
    pub ts_us: u64,
    pub event: HeadlessEvent,
}

/// Events ordered by timestamp; ties keep file order.
#[derive(Debug, Default)]
pub struct Timeline {
    events: VecDeque<TimedEvent>,
}

impl Timeline {
    pub fn load(path: &Path) -> Result<Self, TimelineError> {
        let text = fs::read_to_string(path).map_err(|source| TimelineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let timeline = Self::parse(&text)?;
        debug!("loaded {} headless events from {}", timeline.len(), path.display());
        Ok(timeline)
    }

    /// One event per line: `<microseconds> <TYPE> [params...]`. Blank lines are skipped.
    pub fn parse(text: &str) -> Result<Self, TimelineError> {
        let mut events = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let mut words = raw.split_whitespace();
            let Some(ts) = words.next() else {
                continue;
            };
            let ts_us = ts.parse::<u64>().map_err(|_| TimelineError::BadTimestamp {
                line,
                value: ts.to_string(),
            })?;
            let kind = words.next().unwrap_or_default();
            let params: Vec<&str> = words.collect();
            let event = parse_event(line, kind, &params)?;
            events.push(TimedEvent { ts_us, event });
        }
        events.sort_by_key(|e| e.ts_us);
        Ok(Self {
            events: events.into(),
        })
    }

    /// Pops the next event whose timestamp is at or before `elapsed_us`.
    pub fn next_due(&mut self, elapsed_us: u64) -> Option<HeadlessEvent> {
        if self.events.front()?.ts_us > elapsed_us {
            return None;
        }
        self.events.pop_front().map(|e| e.event)
    }

    pub fn is_finished(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

fn parse_event(line: usize, kind: &str, params: &[&str]) -> Result<HeadlessEvent, TimelineError> {
    let number = |s: &str| {
        s.parse::<f32>().map_err(|_| TimelineError::BadNumber {
            line,
            value: s.to_string(),
        })
    };
    match kind {
        "AVAILABLE" => Ok(HeadlessEvent::Available),
        "PLAY" => match params {
            [time, rate, ..] => Ok(HeadlessEvent::Play {
                time: number(*time)?,
                rate: number(*rate)?,
            }),
            _ => Err(TimelineError::MissingParam {
                line,
                event: "PLAY",
                expected: "<time> <rate>",
            }),
        },
        "SAVE" => match params.first() {
            Some(path) => Ok(HeadlessEvent::Save {
                path: PathBuf::from(path),
            }),
            None => Err(TimelineError::MissingParam {
                line,
                event: "SAVE",
                expected: "<path>",
            }),
        },
        "MARK" => Ok(HeadlessEvent::Mark {
            text: params.join(" "),
        }),
        other => Err(TimelineError::UnknownEvent {
            line,
            value: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_and_sorts_stably() {
        let text = "\
2000 SAVE out.ppm
0 AVAILABLE
1000 PLAY 0.5 1
1000 MARK hello world

2000 MARK after
";
        let mut t = Timeline::parse(text).unwrap();
        assert_eq!(t.len(), 5);

        assert_eq!(t.next_due(0), Some(HeadlessEvent::Available));
        assert_eq!(t.next_due(999), None);
        assert_eq!(
            t.next_due(1000),
            Some(HeadlessEvent::Play {
                time: 0.5,
                rate: 1.0
            })
        );
        assert_eq!(
            t.next_due(1000),
            Some(HeadlessEvent::Mark {
                text: "hello world".into()
            })
        );
        assert_eq!(
            t.next_due(5000),
            Some(HeadlessEvent::Save {
                path: PathBuf::from("out.ppm")
            })
        );
        assert!(!t.is_finished());
        assert_eq!(
            t.next_due(5000),
            Some(HeadlessEvent::Mark {
                text: "after".into()
            })
        );
        assert!(t.is_finished());
        assert_eq!(t.next_due(u64::MAX), None);
    }

    #[test]
    fn rejects_bad_lines() {
        assert!(matches!(
            Timeline::parse("10 JUMP"),
            Err(TimelineError::UnknownEvent { line: 1, .. })
        ));
        assert!(matches!(
            Timeline::parse("0 AVAILABLE\nabc MARK"),
            Err(TimelineError::BadTimestamp { line: 2, .. })
        ));
        assert!(matches!(
            Timeline::parse("5 PLAY 1.0"),
            Err(TimelineError::MissingParam { event: "PLAY", .. })
        ));
        assert!(matches!(
            Timeline::parse("5 PLAY x 1"),
            Err(TimelineError::BadNumber { .. })
        ));
        assert!(matches!(
            Timeline::parse("5 SAVE"),
            Err(TimelineError::MissingParam { event: "SAVE", .. })
        ));
    }

    #[test]
    fn loads_from_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "0 AVAILABLE").unwrap();
        writeln!(f, "100 SAVE frame.ppm").unwrap();
        let t = Timeline::load(f.path()).unwrap();
        assert_eq!(t.len(), 2);

        let missing = Timeline::load(Path::new("/definitely/not/here.events"));
        assert!(matches!(missing, Err(TimelineError::Io { .. })));
    }
}
