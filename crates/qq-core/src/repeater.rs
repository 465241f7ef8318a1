//! Running a fallible operation over a collection of items, tracking
//! per-item failures instead of aborting on the first one.

use std::collections::BTreeMap;

/// What to do after an item's operation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnError {
    /// Record the failure and continue with the next item.
    Continue,
    /// Record the failure and stop processing further items.
    Abort,
}

/// Runs `func` once per item, collecting failures by index instead of
/// short-circuiting on the first error.
///
/// `on_error` is consulted after each failure and decides whether
/// processing continues; returning [`OnError::Abort`] for every error
/// recovers fail-fast behavior.
pub fn run_all<T, E>(
    items: &[T],
    mut func: impl FnMut(&T) -> Result<(), E>,
    mut on_error: impl FnMut(usize, &T, &E) -> OnError,
) -> BTreeMap<usize, E> {
    let mut errors = BTreeMap::new();
    for (index, item) in items.iter().enumerate() {
        if let Err(e) = func(item) {
            let action = on_error(index, item, &e);
            errors.insert(index, e);
            if action == OnError::Abort {
                break;
            }
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continues_past_failures_by_default() {
        let items = vec![1, 2, 3, 4];
        let errors = run_all(
            &items,
            |item| if item % 2 == 0 { Err(format!("{item} is even")) } else { Ok(()) },
            |_, _, _| OnError::Continue,
        );
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[&1], "2 is even");
        assert_eq!(errors[&3], "4 is even");
    }

    #[test]
    fn abort_stops_remaining_items() {
        let items = vec![1, 2, 3, 4];
        let errors = run_all(
            &items,
            |item| if *item == 2 { Err("boom".to_string()) } else { Ok(()) },
            |_, _, _| OnError::Abort,
        );
        assert_eq!(errors.len(), 1);
        assert!(errors.contains_key(&1));
    }

    #[test]
    fn all_succeed_yields_no_errors() {
        let items = vec![1, 2, 3];
        let errors: BTreeMap<usize, String> =
            run_all(&items, |_| Ok(()), |_, _, _| OnError::Continue);
        assert!(errors.is_empty());
    }
}
