//! Incremental separator matching.
//!
//! The matcher is a Knuth-Morris-Pratt automaton over the separator bytes. The failure
//! table is built once per scanner, so repeated motifs such as `"xxz"`, `"aab"` or
//! `"xyxyz"` resynchronize correctly when a partial match breaks.

/// Outcome of feeding one byte to a [`SeparatorMatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    /// Leading separator bytes that dropped out of the partial match. They were data
    /// after all, and are `separator[..released]`.
    pub released: usize,
    /// Whether the byte extended the partial match. If not, the byte is data.
    pub consumed: bool,
    /// Whether the whole separator has now matched.
    pub complete: bool,
}

/// KMP failure function: `table[i]` is the length of the longest proper prefix of
/// `pattern[..=i]` that is also a suffix of it.
pub fn failure_table(pattern: &[u8]) -> Vec<usize> {
    let mut table = vec![0; pattern.len()];
    let mut k = 0;
    for i in 1..pattern.len() {
        while k > 0 && pattern[i] != pattern[k] {
            k = table[k - 1];
        }
        if pattern[i] == pattern[k] {
            k += 1;
        }
        table[i] = k;
    }
    table
}

/// Byte-at-a-time separator matcher.
#[derive(Debug, Clone)]
pub struct SeparatorMatcher {
    pattern: Vec<u8>,
    failure: Vec<usize>,
    matched: usize,
}

impl SeparatorMatcher {
    /// Matcher for `pattern`, which must not be empty.
    pub fn new(pattern: Vec<u8>) -> Self {
        let failure = failure_table(&pattern);
        Self {
            pattern,
            failure,
            matched: 0,
        }
    }

    /// The separator bytes.
    pub fn pattern(&self) -> &[u8] {
        &self.pattern
    }

    /// Separator length.
    pub fn len(&self) -> usize {
        self.pattern.len()
    }

    /// Whether the separator is empty.
    pub fn is_empty(&self) -> bool {
        self.pattern.is_empty()
    }

    /// Bytes of the separator matched so far.
    pub fn matched(&self) -> usize {
        self.matched
    }

    /// Forget any partial match.
    pub fn reset(&mut self) {
        self.matched = 0;
    }

    /// Feed one byte. After a complete match the next byte starts a new search.
    pub fn step(&mut self, c: u8) -> Step {
        if self.pattern.is_empty() {
            return Step {
                released: 0,
                consumed: false,
                complete: false,
            };
        }
        if self.matched == self.pattern.len() {
            self.matched = 0;
        }
        let before = self.matched;
        let mut k = before;
        while k > 0 && self.pattern[k] != c {
            k = self.failure[k - 1];
        }
        let released = before - k;
        let consumed = self.pattern[k] == c;
        if consumed {
            k += 1;
        }
        self.matched = k;
        Step {
            released,
            consumed,
            complete: k == self.pattern.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_tables_for_repeated_motifs() {
        assert_eq!(failure_table(b"xxz"), vec![0, 1, 0]);
        assert_eq!(failure_table(b"xyxyz"), vec![0, 0, 1, 2, 0]);
        assert_eq!(failure_table(b"aaab"), vec![0, 1, 2, 0]);
        assert_eq!(failure_table(b"abab c"), vec![0, 0, 1, 2, 0, 0]);
    }

    fn match_ends(pattern: &[u8], input: &[u8]) -> Vec<usize> {
        let mut m = SeparatorMatcher::new(pattern.to_vec());
        let mut ends = Vec::new();
        for (i, &c) in input.iter().enumerate() {
            if m.step(c).complete {
                ends.push(i);
                m.reset();
            }
        }
        ends
    }

    #[test]
    fn finds_separator_after_repeated_prefix() {
        assert_eq!(match_ends(b"xxz", b"xxxz"), vec![3]);
        assert_eq!(match_ends(b"xyxyz", b"abxyxyxyzq"), vec![8]);
        assert_eq!(match_ends(b"aab", b"aaab"), vec![3]);
        assert_eq!(match_ends(b"aaab", b"aaaaab"), vec![5]);
        assert_eq!(match_ends(b"abab c", b"ababab c"), vec![7]);
    }

    #[test]
    fn released_bytes_account_for_every_input_byte() {
        let pattern = b"xyxyz";
        let mut m = SeparatorMatcher::new(pattern.to_vec());
        let mut data = Vec::new();
        for &c in b"axyxyxyxq" {
            let step = m.step(c);
            assert!(!step.complete);
            data.extend_from_slice(&pattern[..step.released]);
            if !step.consumed {
                data.push(c);
            }
        }
        assert_eq!(m.matched(), 0);
        assert_eq!(data, b"axyxyxyxq");
    }

    #[test]
    fn partial_match_is_pending_until_resolved() {
        let mut m = SeparatorMatcher::new(b"\r\n".to_vec());
        assert!(m.step(b'\r').consumed);
        assert_eq!(m.matched(), 1);
        let step = m.step(b'\r');
        assert_eq!(step.released, 1);
        assert!(step.consumed);
        assert!(m.step(b'\n').complete);
    }
}
