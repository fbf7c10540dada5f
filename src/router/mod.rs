//! Keyword command router.
//!
//! A transcript is lower-cased and checked against the trigger keywords in
//! order.  The first keyword contained in the transcript drives the output
//! line and ends routing; otherwise the original text is forwarded to the AI
//! service.
//!
//! | Transcript            | Result                          |
//! |-----------------------|---------------------------------|
//! | `"Light ON please"`   | line high, no AI request        |
//! | `"what's the time"`   | forwarded unchanged             |
//! | `""`                  | nothing to do                   |

pub mod output;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use output::{DigitalOutput, FileLine, LogLine};

// ---------------------------------------------------------------------------
// RouterError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("trigger rule {0} has an empty keyword")]
    EmptyKeyword(usize),

    /// One keyword contains the other, so the later rule could never fire
    /// on its own.
    #[error("trigger keywords {first:?} and {second:?} overlap")]
    OverlappingKeywords { first: String, second: String },

    #[error("cannot drive output line {line}: {source}")]
    Output {
        line: String,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Binary level of a digital output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    High,
    Low,
}

impl Level {
    /// Value written to a line file.
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            Level::High => b"1\n",
            Level::Low => b"0\n",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::High => "HIGH",
            Level::Low => "LOW",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRule {
    pub keyword: String,
    pub level: Level,
}

impl TriggerRule {
    pub fn new(keyword: impl Into<String>, level: Level) -> Self {
        Self {
            keyword: keyword.into(),
            level,
        }
    }
}

/// Outcome of routing one transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// A trigger matched and the line was driven.
    Switched { keyword: String, level: Level },
    /// No trigger matched; send this text on.
    Forward(String),
    /// The transcript was blank.
    Empty,
}

// ---------------------------------------------------------------------------
// CommandRouter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CommandRouter {
    rules: Vec<TriggerRule>,
}

impl CommandRouter {
    /// Validate and lower-case `rules`, keeping their order.
    pub fn new(rules: Vec<TriggerRule>) -> Result<Self, RouterError> {
        let rules: Vec<TriggerRule> = rules
            .into_iter()
            .map(|r| TriggerRule::new(r.keyword.trim().to_lowercase(), r.level))
            .collect();

        for (i, rule) in rules.iter().enumerate() {
            if rule.keyword.is_empty() {
                return Err(RouterError::EmptyKeyword(i));
            }
        }
        for (i, a) in rules.iter().enumerate() {
            for b in &rules[i + 1..] {
                if a.keyword.contains(&b.keyword) || b.keyword.contains(&a.keyword) {
                    return Err(RouterError::OverlappingKeywords {
                        first: a.keyword.clone(),
                        second: b.keyword.clone(),
                    });
                }
            }
        }
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[TriggerRule] {
        &self.rules
    }

    /// The first rule whose keyword occurs in `transcript`.
    pub fn match_rule(&self, transcript: &str) -> Option<&TriggerRule> {
        let lowered = transcript.to_lowercase();
        self.rules.iter().find(|r| lowered.contains(&r.keyword))
    }

    /// Route `transcript`, driving `line` on a keyword match.
    pub fn dispatch(
        &self,
        transcript: &str,
        line: &mut dyn DigitalOutput,
    ) -> Result<Routed, RouterError> {
        if transcript.trim().is_empty() {
            return Ok(Routed::Empty);
        }
        match self.match_rule(transcript) {
            Some(rule) => {
                line.set(rule.level)?;
                log::info!("\"{}\" matched; {} set {}", rule.keyword, line.name(), rule.level);
                Ok(Routed::Switched {
                    keyword: rule.keyword.clone(),
                    level: rule.level,
                })
            }
            None => Ok(Routed::Forward(transcript.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_router() -> CommandRouter {
        CommandRouter::new(vec![
            TriggerRule::new("light on", Level::High),
            TriggerRule::new("light off", Level::Low),
        ])
        .unwrap()
    }

    #[test]
    fn keyword_match_is_case_insensitive_and_drives_line() {
        let router = default_router();
        let mut line = LogLine::new("light");

        let routed = router.dispatch("Please turn the LIGHT ON.", &mut line).unwrap();
        assert_eq!(
            routed,
            Routed::Switched {
                keyword: "light on".into(),
                level: Level::High
            }
        );
        assert_eq!(line.level(), Some(Level::High));

        router.dispatch("light off", &mut line).unwrap();
        assert_eq!(line.level(), Some(Level::Low));
    }

    #[test]
    fn unmatched_text_is_forwarded_in_original_case() {
        let router = default_router();
        let mut line = LogLine::new("light");
        let routed = router.dispatch("What's the Weather?", &mut line).unwrap();
        assert_eq!(routed, Routed::Forward("What's the Weather?".into()));
        assert_eq!(line.level(), None);
    }

    #[test]
    fn blank_transcript_is_empty() {
        let router = default_router();
        let mut line = LogLine::new("light");
        assert_eq!(router.dispatch("   ", &mut line).unwrap(), Routed::Empty);
    }

    #[test]
    fn first_rule_in_order_wins() {
        let router = CommandRouter::new(vec![
            TriggerRule::new("fan", Level::High),
            TriggerRule::new("light", Level::Low),
        ])
        .unwrap();
        let rule = router.match_rule("light and fan").unwrap();
        assert_eq!(rule.keyword, "fan");
    }

    #[test]
    fn overlapping_keywords_are_rejected() {
        let err = CommandRouter::new(vec![
            TriggerRule::new("light", Level::High),
            TriggerRule::new("Light Off", Level::Low),
        ])
        .unwrap_err();
        match err {
            RouterError::OverlappingKeywords { first, second } => {
                assert_eq!(first, "light");
                assert_eq!(second, "light off");
            }
            other => panic!("expected OverlappingKeywords, got {other}"),
        }
    }

    #[test]
    fn empty_keyword_is_rejected() {
        assert!(matches!(
            CommandRouter::new(vec![TriggerRule::new("  ", Level::High)]),
            Err(RouterError::EmptyKeyword(0))
        ));
    }

    #[test]
    fn level_serialises_lowercase() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            level: Level,
        }
        let text = toml::to_string(&Wrapper { level: Level::High }).unwrap();
        assert_eq!(text.trim(), r#"level = "high""#);
    }
}
