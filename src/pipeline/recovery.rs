use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use anyhow::anyhow;

/// One way of producing a translation for a whole request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// Split into runs and translate only the source-language ones.
    Segmented,
    /// Hand the whole text to the engine in one call.
    Direct,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Segmented => "segmented",
            Self::Direct => "direct",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const DEFAULT_CHAIN: [Strategy; 2] = [Strategy::Segmented, Strategy::Direct];

#[derive(Debug)]
pub struct StrategyError {
    pub strategy: Strategy,
    pub error: anyhow::Error,
}

/// Every strategy of the chain failed; attempts are kept in the order they ran.
#[derive(Debug)]
pub struct RecoveryFailure {
    pub attempts: Vec<StrategyError>,
}

impl RecoveryFailure {
    pub fn error_for(&self, strategy: Strategy) -> Option<&anyhow::Error> {
        self.attempts
            .iter()
            .find(|a| a.strategy == strategy)
            .map(|a| &a.error)
    }
}

impl fmt::Display for RecoveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("翻译出错: ")?;
        if self.attempts.is_empty() {
            return f.write_str("no strategy attempted");
        }
        for (i, a) in self.attempts.iter().enumerate() {
            if i > 0 {
                f.write_str(" 或 ")?;
            }
            write!(f, "{:#}", a.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for RecoveryFailure {}

/// Runs `attempt` for each strategy in order and returns the first success.
///
/// A panic inside an attempt is recorded as that strategy's error so the next one still runs.
pub fn run_chain<T>(
    chain: &[Strategy],
    mut attempt: impl FnMut(Strategy) -> anyhow::Result<T>,
) -> Result<(Strategy, T), RecoveryFailure> {
    let mut attempts = Vec::new();
    for &strategy in chain {
        let res = catch_unwind(AssertUnwindSafe(|| attempt(strategy)))
            .unwrap_or_else(|payload| Err(anyhow!("panicked: {}", panic_message(&*payload))));
        match res {
            Ok(v) => return Ok((strategy, v)),
            Err(error) => attempts.push(StrategyError { strategy, error }),
        }
    }
    Err(RecoveryFailure { attempts })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_success_wins() {
        let mut seen = Vec::new();
        let (s, v) = run_chain(&DEFAULT_CHAIN, |s| {
            seen.push(s);
            Ok::<_, anyhow::Error>(s.as_str().len())
        })
        .unwrap();
        assert_eq!(s, Strategy::Segmented);
        assert_eq!(v, 9);
        assert_eq!(seen, vec![Strategy::Segmented]);
    }

    #[test]
    fn falls_through_to_next_strategy() {
        let (s, v) = run_chain(&DEFAULT_CHAIN, |s| match s {
            Strategy::Segmented => Err(anyhow!("split broke")),
            Strategy::Direct => Ok("whole"),
        })
        .unwrap();
        assert_eq!(s, Strategy::Direct);
        assert_eq!(v, "whole");
    }

    #[test]
    fn aggregates_errors_in_order() {
        let failure = run_chain::<()>(&DEFAULT_CHAIN, |s| Err(anyhow!("{s} failed"))).unwrap_err();
        assert_eq!(failure.attempts.len(), 2);
        assert_eq!(failure.attempts[0].strategy, Strategy::Segmented);
        assert_eq!(
            failure.error_for(Strategy::Direct).unwrap().to_string(),
            "direct failed"
        );
        assert_eq!(
            failure.to_string(),
            "翻译出错: segmented failed 或 direct failed"
        );
    }

    #[test]
    fn panics_become_strategy_errors() {
        let (s, _) = run_chain(&DEFAULT_CHAIN, |s| {
            if s == Strategy::Segmented {
                panic!("boom");
            }
            Ok(())
        })
        .unwrap();
        assert_eq!(s, Strategy::Direct);

        let failure =
            run_chain::<()>(&[Strategy::Segmented], |_| panic!("boom {}", 1)).unwrap_err();
        assert!(failure.to_string().contains("panicked: boom 1"));
    }

    #[test]
    fn empty_chain_reports_nothing_attempted() {
        let failure = run_chain::<()>(&[], |_| Ok(())).unwrap_err();
        assert!(failure.attempts.is_empty());
        assert_eq!(failure.to_string(), "翻译出错: no strategy attempted");
    }
}
