//! Incremental text extraction from cumulative engine output.
//!
//! Only the byte length of what has already been emitted is tracked per
//! choice; the previous text itself is never copied.

use thiserror::Error;

/// The newly appended suffix and the length to remember for the next call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delta<'a> {
    pub text: &'a str,
    pub new_length: usize,
}

impl Delta<'_> {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Ways a cumulative text can break the prefix-extension contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeltaViolation {
    #[error("cumulative text shrank from {previous} to {current} bytes")]
    Shrunk { previous: usize, current: usize },

    #[error("previous length {previous} is not a character boundary of the new text")]
    NotCharBoundary { previous: usize },
}

/// Slice `cumulative_text[previous_length..]`.
///
/// Fails when the new text is shorter than what was already emitted, or when
/// the old length would split a UTF-8 sequence (the old text cannot have been
/// a prefix of the new one).
pub fn compute_delta(
    cumulative_text: &str,
    previous_length: usize,
) -> Result<Delta<'_>, DeltaViolation> {
    if cumulative_text.len() < previous_length {
        return Err(DeltaViolation::Shrunk {
            previous: previous_length,
            current: cumulative_text.len(),
        });
    }
    let text = cumulative_text
        .get(previous_length..)
        .ok_or(DeltaViolation::NotCharBoundary {
            previous: previous_length,
        })?;
    Ok(Delta {
        text,
        new_length: cumulative_text.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concatenated_deltas_rebuild_final_text() {
        let snapshots = ["", "He", "Hell", "Hell", "Hello, wö", "Hello, wörld"];
        let mut prev = 0;
        let mut rebuilt = String::new();
        for s in snapshots {
            let d = compute_delta(s, prev).unwrap();
            rebuilt.push_str(d.text);
            prev = d.new_length;
        }
        assert_eq!(rebuilt, "Hello, wörld");
    }

    #[test]
    fn unchanged_text_yields_empty_delta() {
        let d = compute_delta("abc", 3).unwrap();
        assert!(d.is_empty());
        assert_eq!(d.new_length, 3);
    }

    #[test]
    fn shrinking_text_is_rejected() {
        let err = compute_delta("ab", 3).unwrap_err();
        assert_eq!(err, DeltaViolation::Shrunk { previous: 3, current: 2 });
    }

    #[test]
    fn split_codepoint_is_rejected() {
        // "é" is two bytes; a previous length of 1 cannot be a prefix boundary.
        let err = compute_delta("é", 1).unwrap_err();
        assert_eq!(err, DeltaViolation::NotCharBoundary { previous: 1 });
    }
}
