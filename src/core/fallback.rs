//! Ordered first-success chains shared by the policy, volume and notification
//! layers.
//!
//! Each provider is asked in priority order. A provider can answer
//! (`Ok(Some(value))`), decline (`Ok(None)`: nothing to say, try the next one)
//! or fail (`Err`). The first answer wins and stops the walk; declines and
//! failures are recorded so callers can log why a later provider was used.

#![allow(missing_docs)]

use serde::Serialize;

use crate::core::errors::Result;

/// Anything that participates in a fallback chain.
pub trait Provider {
    /// Stable short name used in logs and reports.
    fn name(&self) -> &str;
}

/// A provider that failed while being asked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainFailure {
    /// Provider name.
    pub provider: String,
    /// Error code of the failure.
    pub code: &'static str,
    /// Rendered error message.
    pub message: String,
}

/// Result of walking a chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainOutcome<T> {
    /// Answer from the winning provider, if any answered.
    pub value: Option<T>,
    /// Name of the provider that answered.
    pub source: Option<String>,
    /// Providers that had nothing to say, in the order asked.
    pub declined: Vec<String>,
    /// Providers that failed, in the order asked.
    pub failures: Vec<ChainFailure>,
}

impl<T> ChainOutcome<T> {
    /// Whether some provider answered.
    #[must_use]
    pub const fn is_answered(&self) -> bool {
        self.value.is_some()
    }
}

/// Ask `providers` in order with `attempt` until one answers.
pub fn first_success<P, T, F>(providers: &[Box<P>], mut attempt: F) -> ChainOutcome<T>
where
    P: Provider + ?Sized,
    F: FnMut(&P) -> Result<Option<T>>,
{
    let mut outcome = ChainOutcome {
        value: None,
        source: None,
        declined: Vec::new(),
        failures: Vec::new(),
    };

    for provider in providers {
        match attempt(provider.as_ref()) {
            Ok(Some(value)) => {
                outcome.value = Some(value);
                outcome.source = Some(provider.name().to_string());
                break;
            }
            Ok(None) => outcome.declined.push(provider.name().to_string()),
            Err(error) => outcome.failures.push(ChainFailure {
                provider: provider.name().to_string(),
                code: error.code(),
                message: error.to_string(),
            }),
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::CqsError;

    trait Answer: Provider {
        fn answer(&self) -> Result<Option<u32>>;
    }

    struct Fixed {
        name: &'static str,
        reply: Option<u32>,
        fails: bool,
    }

    impl Provider for Fixed {
        fn name(&self) -> &str {
            self.name
        }
    }

    impl Answer for Fixed {
        fn answer(&self) -> Result<Option<u32>> {
            if self.fails {
                return Err(CqsError::Runtime {
                    details: format!("{} broke", self.name),
                });
            }
            Ok(self.reply)
        }
    }

    fn fixed(name: &'static str, reply: Option<u32>, fails: bool) -> Box<dyn Answer> {
        Box::new(Fixed { name, reply, fails })
    }

    #[test]
    fn first_answer_wins_and_stops_the_walk() {
        let chain = vec![
            fixed("a", Some(1), false),
            fixed("b", Some(2), false),
        ];
        let mut asked = Vec::new();
        let outcome = first_success(&chain, |p| {
            asked.push(p.name().to_string());
            p.answer()
        });
        assert_eq!(outcome.value, Some(1));
        assert_eq!(outcome.source.as_deref(), Some("a"));
        assert_eq!(asked, vec!["a"]);
    }

    #[test]
    fn declines_and_failures_are_recorded_before_the_winner() {
        let chain = vec![
            fixed("quiet", None, false),
            fixed("broken", None, true),
            fixed("last", Some(7), false),
        ];
        let outcome = first_success(&chain, |p| p.answer());
        assert_eq!(outcome.value, Some(7));
        assert_eq!(outcome.declined, vec!["quiet"]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].provider, "broken");
        assert_eq!(outcome.failures[0].code, "CQS-3900");
        assert!(outcome.failures[0].message.contains("broken broke"));
    }

    #[test]
    fn exhausted_chain_has_no_answer() {
        let chain = vec![fixed("a", None, false), fixed("b", None, true)];
        let outcome = first_success(&chain, |p| p.answer());
        assert!(!outcome.is_answered());
        assert!(outcome.source.is_none());
        assert!(outcome.value.is_none());
    }

    #[test]
    fn empty_chain_has_no_answer() {
        let chain: Vec<Box<dyn Answer>> = Vec::new();
        let outcome = first_success(&chain, |p| p.answer());
        assert!(!outcome.is_answered());
        assert!(outcome.declined.is_empty());
        assert!(outcome.failures.is_empty());
    }
}
