/// Runs `send`, and runs it exactly once more when the first failure is one
/// `should_retry` accepts. The second result is returned as-is.
pub fn retry_once_if<T, E, S, P>(mut send: S, should_retry: P) -> Result<T, E>
where
    S: FnMut() -> Result<T, E>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    match send() {
        Err(err) if should_retry(&err) => {
            tracing::debug!("request failed ({err}), retrying once");
            send()
        }
        result => result,
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use assert_matches::assert_matches;

    use super::*;
    use crate::error::{DownloadError, FetchError};

    /// Replays scripted results and counts how often it was called.
    fn scripted<T, E>(results: Vec<Result<T, E>>) -> (RefCell<Vec<Result<T, E>>>, RefCell<usize>) {
        (RefCell::new(results), RefCell::new(0))
    }

    #[test]
    fn timeout_then_success() {
        let (results, calls) = scripted(vec![Err(FetchError::Timeout), Ok("page")]);
        let result = retry_once_if(
            || {
                *calls.borrow_mut() += 1;
                results.borrow_mut().remove(0)
            },
            |err| matches!(err, FetchError::Timeout),
        );
        assert_eq!(result.unwrap(), "page");
        assert_eq!(*calls.borrow(), 2);
    }

    #[test]
    fn two_timeouts_give_up_after_two_calls() {
        let (results, calls) = scripted::<&str, _>(vec![
            Err(FetchError::Timeout),
            Err(FetchError::Timeout),
            Ok("never reached"),
        ]);
        let result = retry_once_if(
            || {
                *calls.borrow_mut() += 1;
                results.borrow_mut().remove(0)
            },
            |err| matches!(err, FetchError::Timeout),
        );
        assert_matches!(result, Err(FetchError::Timeout));
        assert_eq!(*calls.borrow(), 2);
    }

    #[test]
    fn other_errors_are_not_retried() {
        let (results, calls) = scripted::<&str, _>(vec![
            Err(FetchError::Http("connection refused".to_string())),
            Ok("never reached"),
        ]);
        let result = retry_once_if(
            || {
                *calls.borrow_mut() += 1;
                results.borrow_mut().remove(0)
            },
            |err| matches!(err, FetchError::Timeout),
        );
        assert_matches!(result, Err(FetchError::Http(_)));
        assert_eq!(*calls.borrow(), 1);
    }

    #[test]
    fn media_connect_timeout_is_retried_once() {
        let (results, calls) = scripted::<u64, _>(vec![
            Err(DownloadError::Timeout),
            Err(DownloadError::Timeout),
        ]);
        let result = retry_once_if(
            || {
                *calls.borrow_mut() += 1;
                results.borrow_mut().remove(0)
            },
            |err| matches!(err, DownloadError::Timeout),
        );
        assert_matches!(result, Err(DownloadError::Timeout));
        assert_eq!(*calls.borrow(), 2);
    }

    #[test]
    fn success_is_not_repeated() {
        let (results, calls) = scripted::<u64, DownloadError>(vec![Ok(7), Ok(8)]);
        let result = retry_once_if(
            || {
                *calls.borrow_mut() += 1;
                results.borrow_mut().remove(0)
            },
            |err| matches!(err, DownloadError::Timeout),
        );
        assert_eq!(result.unwrap(), 7);
        assert_eq!(*calls.borrow(), 1);
    }
}
