//! Bounded-retry helper shared by the ETAP ready-wait and the post-erase
//! busy-wait, so both loops carry identical budget semantics.

use crate::error::Result;

/// Calls `check` up to `attempts` times.  Returns `Ok(Some(n))` with the
/// 1-based attempt number on the first `Ok(true)`, `Ok(None)` when the
/// budget is exhausted.  Any per-attempt pacing delay belongs inside
/// `check`, where the call site places it exactly as the protocol
/// prescribes (leading for the erase poll, trailing for the ready-wait).
pub fn poll<F>(attempts: usize, mut check: F) -> Result<Option<usize>>
where
    F: FnMut(usize) -> Result<bool>,
{
    for attempt in 1..=attempts {
        if check(attempt)? {
            return Ok(Some(attempt));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_first_successful_attempt() {
        let mut calls = 0;
        let result = poll(10, |_| {
            calls += 1;
            Ok(calls == 4)
        })
        .unwrap();
        assert_eq!(result, Some(4));
        assert_eq!(calls, 4);
    }

    #[test]
    fn exhausts_exactly_the_budget() {
        let mut calls = 0;
        let result = poll(100, |_| {
            calls += 1;
            Ok(false)
        })
        .unwrap();
        assert_eq!(result, None);
        assert_eq!(calls, 100);
    }

    #[test]
    fn errors_pass_through() {
        let result: Result<Option<usize>> =
            poll(3, |_| Err(crate::Error::Timeout));
        assert!(matches!(result, Err(crate::Error::Timeout)));
    }
}
