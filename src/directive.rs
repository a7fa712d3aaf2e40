//! Parsing of the configurator's directive stream.
//!
//! The configurator answers with newline-delimited blocks: a directive name,
//! a decimal argument count, then that many argument lines. `ABORT` is the
//! one exception, a bare line that terminates the stream; anything after it
//! is counted and discarded.

use tracing::error;

use crate::Error;

/// One command from the configurator's output stream.
///
/// The name is kept as the raw uppercase token so that unknown directives
/// survive parsing and can be reported by the interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub name: String,
    pub args: Vec<String>,
}

/// Streaming reader over the configurator's output lines.
///
/// Yields directives in stream order and stops at the first `ABORT`, at a
/// trailing directive name with no count line, or at the first framing
/// error. Never reads past the line buffer.
pub struct DirectiveReader<'a> {
    lines: &'a [String],
    index: usize,
    done: bool,
}

impl<'a> DirectiveReader<'a> {
    pub fn new(lines: &'a [String]) -> Self {
        Self {
            lines,
            index: 0,
            done: false,
        }
    }

    /// Number of lines consumed so far.
    pub fn position(&self) -> usize {
        self.index
    }
}

impl<'a> Iterator for DirectiveReader<'a> {
    type Item = Result<Directive, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.index >= self.lines.len() {
            return None;
        }

        let name = self.lines[self.index].as_str();

        // Honor the special ABORT directive immediately (no further parsing).
        if name == "ABORT" {
            let extra = self.lines.len() - self.index - 1;
            if extra > 0 {
                error!("Ignoring {extra} trailing output lines.");
            }
            self.index += 1;
            self.done = true;
            return None;
        }

        // A name on the final line has no room for its count line.
        if self.index == self.lines.len() - 1 {
            error!("Invalid trailing directive: {name}");
            self.index += 1;
            self.done = true;
            return None;
        }

        let count_line = self.lines[self.index + 1].as_str();
        let count: usize = match count_line.parse() {
            Ok(count) => count,
            Err(_) => {
                self.done = true;
                return Some(Err(Error::BadDirectiveSyntax(format!(
                    "invalid argument count {count_line:?} for directive {name}"
                ))));
            }
        };

        let remaining = self.lines.len() - self.index - 2;
        if count > remaining {
            self.done = true;
            return Some(Err(Error::ArgcOutOfBounds {
                what: "directive",
                count,
                min: 0,
                max: remaining,
            }));
        }

        let args = self.lines[self.index + 2..self.index + 2 + count].to_vec();
        self.index += 2 + count;
        Some(Ok(Directive {
            name: name.to_string(),
            args,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_directive_blocks_in_order() {
        let lines = lines(&["SETCWD", "1", "/tmp", "INIT_THREADS", "0"]);
        let parsed: Vec<_> = DirectiveReader::new(&lines)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            parsed,
            vec![
                Directive {
                    name: "SETCWD".into(),
                    args: vec!["/tmp".into()],
                },
                Directive {
                    name: "INIT_THREADS".into(),
                    args: vec![],
                },
            ]
        );
    }

    #[test]
    fn abort_terminates_and_consumes_no_further_lines() {
        let lines = lines(&["SETCWD", "1", "/tmp", "ABORT", "JVM", "0"]);
        let mut reader = DirectiveReader::new(&lines);
        assert_eq!(reader.next().unwrap().unwrap().name, "SETCWD");
        assert!(reader.next().is_none());
        assert!(reader.next().is_none());
        // The prefix up to and including ABORT, nothing beyond.
        assert_eq!(reader.position(), 4);
    }

    #[test]
    fn bare_abort_is_an_empty_stream() {
        let lines = lines(&["ABORT"]);
        assert!(DirectiveReader::new(&lines).next().is_none());
    }

    #[test]
    fn trailing_name_without_count_ends_the_stream() {
        let lines = lines(&["INIT_THREADS", "0", "JVM"]);
        let mut reader = DirectiveReader::new(&lines);
        assert_eq!(reader.next().unwrap().unwrap().name, "INIT_THREADS");
        assert!(reader.next().is_none());
    }

    #[test]
    fn count_beyond_remaining_lines_is_out_of_bounds() {
        let lines = lines(&["JVM", "5", "only", "two"]);
        let mut reader = DirectiveReader::new(&lines);
        let err = reader.next().unwrap().unwrap_err();
        assert!(matches!(
            err,
            Error::ArgcOutOfBounds {
                count: 5,
                max: 2,
                ..
            }
        ));
        // The reader stops rather than walking past the buffer.
        assert!(reader.next().is_none());
    }

    #[test]
    fn malformed_count_is_bad_syntax() {
        let lines = lines(&["SETCWD", "banana", "/tmp"]);
        let err = DirectiveReader::new(&lines).next().unwrap().unwrap_err();
        assert!(matches!(err, Error::BadDirectiveSyntax(_)));
    }

    #[test]
    fn unknown_names_survive_parsing() {
        let lines = lines(&["BADNAME", "0"]);
        let parsed = DirectiveReader::new(&lines).next().unwrap().unwrap();
        assert_eq!(parsed.name, "BADNAME");
        assert!(parsed.args.is_empty());
    }

    #[test]
    fn empty_input_yields_nothing() {
        let lines: Vec<String> = Vec::new();
        assert!(DirectiveReader::new(&lines).next().is_none());
    }
}
