//! Line-oriented script parser
//!
//! Parsing is two-phase: every non-blank line is tokenized into an
//! [`Action`], then block openers are matched against their closers. A
//! script with any error produces no [`Script`] at all.

use super::action::{Action, Comparator, Operand, Script};
use bytes::Bytes;
use thiserror::Error;

/// Script text could not be turned into a runnable script
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Malformed command or operand
    #[error("line {line_no}: {reason}")]
    Syntax {
        /// 1-based line number
        line_no: usize,
        /// What was wrong
        reason: String,
    },

    /// Leading keyword is not a known command
    #[error("line {line_no}: unknown command `{command}`")]
    UnknownCommand {
        /// 1-based line number
        line_no: usize,
        /// The unrecognized keyword
        command: String,
    },

    /// Block opener without closer, or closer without opener
    #[error("line {line_no}: unmatched `{keyword}`")]
    UnmatchedBlock {
        /// 1-based line number of the offending opener or closer
        line_no: usize,
        /// The offending keyword
        keyword: String,
    },
}

impl ParseError {
    /// 1-based line number the error refers to
    pub fn line_no(&self) -> usize {
        match self {
            Self::Syntax { line_no, .. }
            | Self::UnknownCommand { line_no, .. }
            | Self::UnmatchedBlock { line_no, .. } => *line_no,
        }
    }

    fn syntax(line_no: usize, reason: impl Into<String>) -> Self {
        Self::Syntax {
            line_no,
            reason: reason.into(),
        }
    }
}

/// Text-to-model transform for test scripts
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptParser;

impl ScriptParser {
    /// Parse a whole script
    pub fn parse(text: &str) -> Result<Script, ParseError> {
        Self::parse_lines(text.lines())
    }

    /// Parse pre-split lines; line numbers count from 1 in iteration order
    pub fn parse_lines<'a, I>(lines: I) -> Result<Script, ParseError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut parsed = Vec::new();
        for (idx, raw) in lines.into_iter().enumerate() {
            let line_no = idx + 1;
            let tokens: Vec<&str> = raw.split_whitespace().collect();
            if tokens.is_empty() {
                continue;
            }
            parsed.push((line_no, parse_line(line_no, &tokens)?));
        }

        validate_blocks(&parsed)?;
        Ok(Script::from_actions(
            parsed.into_iter().map(|(_, action)| action).collect(),
        ))
    }
}

fn parse_line(line_no: usize, tokens: &[&str]) -> Result<Action, ParseError> {
    let keyword = tokens[0].to_ascii_lowercase();
    let args = &tokens[1..];

    match keyword.as_str() {
        "start" => {
            expect_arity(line_no, "start", args, &[])?;
            Ok(Action::Start)
        }
        "stop" => {
            expect_arity(line_no, "stop", args, &[])?;
            Ok(Action::Stop)
        }
        "wait" => {
            expect_arity(line_no, "wait", args, &["ms"])?;
            Ok(Action::Wait {
                millis: parse_uint(line_no, "wait time", args[0])?,
            })
        }
        "tx" => {
            expect_arity(line_no, "tx", args, &["line", "signal"])?;
            Ok(Action::Tx {
                line: parse_ident(line_no, args[0])?,
                data: parse_hex(line_no, args[1])?,
            })
        }
        "rx" => {
            expect_arity(line_no, "rx", args, &["line", "timeout"])?;
            Ok(Action::Rx {
                line: parse_ident(line_no, args[0])?,
                timeout_ms: parse_uint(line_no, "timeout", args[1])?,
            })
        }
        "disp" => {
            expect_arity(line_no, "disp", args, &["buffer"])?;
            Ok(Action::Disp {
                buffer: parse_ident(line_no, args[0])?,
            })
        }
        "for" => parse_for(line_no, args),
        "endfor" => {
            expect_arity(line_no, "endfor", args, &[])?;
            Ok(Action::ForEnd)
        }
        "while" => {
            expect_arity(line_no, "while", args, &["line_or_var", "comparator", "operand"])?;
            Ok(Action::WhileBegin {
                line_or_var: parse_ident(line_no, args[0])?,
                comparator: args[1]
                    .to_ascii_lowercase()
                    .parse::<Comparator>()
                    .map_err(|reason| ParseError::syntax(line_no, reason))?,
                operand: parse_operand(line_no, args[2])?,
            })
        }
        "endwhile" => {
            expect_arity(line_no, "endwhile", args, &[])?;
            Ok(Action::WhileEnd)
        }
        _ => Err(ParseError::UnknownCommand {
            line_no,
            command: tokens[0].to_string(),
        }),
    }
}

fn expect_arity(
    line_no: usize,
    command: &str,
    args: &[&str],
    operands: &[&str],
) -> Result<(), ParseError> {
    if args.len() == operands.len() {
        return Ok(());
    }
    let usage = std::iter::once(command.to_string())
        .chain(operands.iter().map(|o| format!("<{o}>")))
        .collect::<Vec<_>>()
        .join(" ");
    Err(ParseError::syntax(
        line_no,
        format!(
            "`{command}` takes {} operand(s), found {} (usage: {usage})",
            operands.len(),
            args.len()
        ),
    ))
}

fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_ident(line_no: usize, token: &str) -> Result<String, ParseError> {
    if is_ident(token) {
        Ok(token.to_string())
    } else {
        Err(ParseError::syntax(
            line_no,
            format!("invalid name `{token}`"),
        ))
    }
}

fn parse_uint(line_no: usize, what: &str, token: &str) -> Result<u32, ParseError> {
    token.parse::<u32>().map_err(|_| {
        ParseError::syntax(
            line_no,
            format!("invalid {what} `{token}`: expected an unsigned integer"),
        )
    })
}

fn parse_int(line_no: usize, what: &str, token: &str) -> Result<i64, ParseError> {
    token.trim().parse::<i64>().map_err(|_| {
        ParseError::syntax(
            line_no,
            format!("invalid {what} `{}`: expected an integer", token.trim()),
        )
    })
}

/// `0x1F`, `1f` and `f` all decode; odd digit counts gain a leading zero.
fn parse_hex(line_no: usize, token: &str) -> Result<Bytes, ParseError> {
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ParseError::syntax(
            line_no,
            format!("invalid hex signal `{token}`"),
        ));
    }

    let normalized = if digits.len() % 2 == 1 {
        format!("0{}", digits.to_ascii_lowercase())
    } else {
        digits.to_ascii_lowercase()
    };

    hex::decode(&normalized)
        .map(Bytes::from)
        .map_err(|e| ParseError::syntax(line_no, format!("invalid hex signal `{token}`: {e}")))
}

fn parse_operand(line_no: usize, token: &str) -> Result<Operand, ParseError> {
    if let Ok(value) = token.parse::<i64>() {
        return Ok(Operand::Int(value));
    }
    if is_ident(token) {
        return Ok(Operand::Name(token.to_string()));
    }
    Err(ParseError::syntax(
        line_no,
        format!("invalid operand `{token}`"),
    ))
}

/// `for i = 0:1:10`, spacing around `=` optional
fn parse_for(line_no: usize, args: &[&str]) -> Result<Action, ParseError> {
    let header = args.join(" ");
    let (var, range) = header.split_once('=').ok_or_else(|| {
        ParseError::syntax(line_no, "usage: for <var> = <start>:<step>:<end>")
    })?;

    let var = parse_ident(line_no, var.trim())?;
    let bounds: Vec<&str> = range.split(':').collect();
    let [start, step, end] = bounds.as_slice() else {
        return Err(ParseError::syntax(
            line_no,
            format!("invalid range `{}`: expected <start>:<step>:<end>", range.trim()),
        ));
    };

    Ok(Action::ForBegin {
        var,
        start: parse_int(line_no, "start", start)?,
        step: parse_int(line_no, "step", step)?,
        end: parse_int(line_no, "end", end)?,
    })
}

fn validate_blocks(parsed: &[(usize, Action)]) -> Result<(), ParseError> {
    let mut open: Vec<(usize, &Action)> = Vec::new();

    for (line_no, action) in parsed {
        if action.opens_block() {
            open.push((*line_no, action));
        } else if matches!(action, Action::ForEnd | Action::WhileEnd) {
            match open.pop() {
                Some((_, opener)) if action.closes(opener) => {}
                _ => {
                    return Err(ParseError::UnmatchedBlock {
                        line_no: *line_no,
                        keyword: action.keyword().to_string(),
                    })
                }
            }
        }
    }

    match open.pop() {
        Some((line_no, opener)) => Err(ParseError::UnmatchedBlock {
            line_no,
            keyword: opener.keyword().to_string(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_tx_rx_sequence() {
        let script = ScriptParser::parse("wait 5000\n tx iic 0x1f\n rx iic 50\n").unwrap();
        assert_eq!(
            script.actions(),
            &[
                Action::Wait { millis: 5000 },
                Action::Tx {
                    line: "iic".to_string(),
                    data: Bytes::from_static(&[0x1f]),
                },
                Action::Rx {
                    line: "iic".to_string(),
                    timeout_ms: 50,
                },
            ]
        );
    }

    #[test]
    fn test_blank_lines_and_crlf() {
        let script = ScriptParser::parse("\r\nstart\r\n\r\n   \r\nstop\r\n").unwrap();
        assert_eq!(script.actions(), &[Action::Start, Action::Stop]);
    }

    #[test]
    fn test_hex_forms() {
        let script = ScriptParser::parse("tx a 0XABCD\ntx a f\ntx a 1F2").unwrap();
        let payloads: Vec<&[u8]> = script
            .actions()
            .iter()
            .map(|a| match a {
                Action::Tx { data, .. } => &data[..],
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(payloads, vec![&[0xab, 0xcd][..], &[0x0f][..], &[0x01, 0xf2][..]]);
        assert_eq!(script.actions()[0].to_string(), "tx a 0xabcd");
    }

    #[test]
    fn test_invalid_hex_reports_line() {
        let err = ScriptParser::parse("tx iic zzz").unwrap_err();
        assert_eq!(err.line_no(), 1);
        assert!(matches!(err, ParseError::Syntax { .. }));

        let err = ScriptParser::parse("start\n\nwait 10\ntx iic 0x").unwrap_err();
        assert_eq!(err.line_no(), 4);
    }

    #[test]
    fn test_unknown_command_fails_loudly() {
        let err = ScriptParser::parse("start\nblink led\nstop").unwrap_err();
        assert_eq!(
            err,
            ParseError::UnknownCommand {
                line_no: 2,
                command: "blink".to_string(),
            }
        );
        assert_eq!(err.to_string(), "line 2: unknown command `blink`");
    }

    #[test]
    fn test_operand_errors() {
        assert!(ScriptParser::parse("wait").is_err());
        assert!(ScriptParser::parse("wait -5").is_err());
        assert!(ScriptParser::parse("wait 10 20").is_err());
        assert!(ScriptParser::parse("rx 9iic 50").is_err());
        assert!(ScriptParser::parse("disp").is_err());
        assert!(ScriptParser::parse("start now").is_err());
    }

    #[test]
    fn test_for_header() {
        let script = ScriptParser::parse("for i = 0:2:-10\nendfor\nfor j=1:1:3\nendfor").unwrap();
        assert_eq!(
            script.actions()[0],
            Action::ForBegin {
                var: "i".to_string(),
                start: 0,
                step: 2,
                end: -10,
            }
        );
        assert_eq!(script.actions()[2].to_string(), "for j = 1:1:3");
        assert!(ScriptParser::parse("for i = 0:1\nendfor").is_err());
        assert!(ScriptParser::parse("for i 0:1:2\nendfor").is_err());
    }

    #[test]
    fn test_while_header() {
        let script = ScriptParser::parse("while iic neq 0\nendwhile\nwhile n lte limit\nendwhile").unwrap();
        assert_eq!(
            script.actions()[0],
            Action::WhileBegin {
                line_or_var: "iic".to_string(),
                comparator: Comparator::Neq,
                operand: Operand::Int(0),
            }
        );
        assert!(matches!(
            &script.actions()[2],
            Action::WhileBegin { operand: Operand::Name(n), comparator: Comparator::Lte, .. } if n == "limit"
        ));
        assert!(ScriptParser::parse("while iic approx 0\nendwhile").is_err());
    }

    #[test]
    fn test_unmatched_blocks() {
        let err = ScriptParser::parse("start\nfor i = 0:1:3\ntx iic 01\nstop").unwrap_err();
        assert_eq!(
            err,
            ParseError::UnmatchedBlock {
                line_no: 2,
                keyword: "for".to_string(),
            }
        );

        let err = ScriptParser::parse("endwhile").unwrap_err();
        assert!(matches!(err, ParseError::UnmatchedBlock { line_no: 1, .. }));

        let err = ScriptParser::parse("for i = 0:1:3\nendwhile").unwrap_err();
        assert!(matches!(err, ParseError::UnmatchedBlock { line_no: 2, ref keyword } if keyword == "endwhile"));
    }

    #[test]
    fn test_nested_blocks() {
        let script = ScriptParser::parse(
            "for i = 0:1:3\n  while iic eq 1\n    tx iic 01\n  endwhile\nendfor",
        )
        .unwrap();
        assert_eq!(script.len(), 5);
    }
}
