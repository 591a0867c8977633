//! Parsed script actions

use bytes::Bytes;
use std::fmt;

/// Comparison operator of a `while` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    /// `lt`
    Lt,
    /// `gt`
    Gt,
    /// `eq`
    Eq,
    /// `neq`
    Neq,
    /// `gte`
    Gte,
    /// `lte`
    Lte,
}

impl Comparator {
    /// Script keyword for this operator
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Lt => "lt",
            Self::Gt => "gt",
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Gte => "gte",
            Self::Lte => "lte",
        }
    }
}

impl std::str::FromStr for Comparator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lt" => Ok(Self::Lt),
            "gt" => Ok(Self::Gt),
            "eq" => Ok(Self::Eq),
            "neq" => Ok(Self::Neq),
            "gte" => Ok(Self::Gte),
            "lte" => Ok(Self::Lte),
            other => Err(format!("unknown comparator `{other}`")),
        }
    }
}

/// Right-hand side of a `while` comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// Integer literal
    Int(i64),
    /// Line, buffer or variable name
    Name(String),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Name(n) => write!(f, "{n}"),
        }
    }
}

/// One executable step of a test script
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Open the bench lines
    Start,
    /// Close the bench lines
    Stop,
    /// Suspend for a number of milliseconds
    Wait {
        /// Delay in milliseconds
        millis: u32,
    },
    /// Transmit bytes on a line
    Tx {
        /// Target line
        line: String,
        /// Payload
        data: Bytes,
    },
    /// Receive one line with a timeout
    Rx {
        /// Source line
        line: String,
        /// Timeout in milliseconds
        timeout_ms: u32,
    },
    /// Show a captured buffer
    Disp {
        /// Buffer name
        buffer: String,
    },
    /// `for <var> = <start>:<step>:<end>`
    ForBegin {
        /// Loop variable
        var: String,
        /// First value
        start: i64,
        /// Increment
        step: i64,
        /// Last value
        end: i64,
    },
    /// `endfor`
    ForEnd,
    /// `while <line_or_var> <cmp> <operand>`
    WhileBegin {
        /// Left-hand name
        line_or_var: String,
        /// Operator
        comparator: Comparator,
        /// Right-hand side
        operand: Operand,
    },
    /// `endwhile`
    WhileEnd,
}

impl Action {
    /// Script keyword that produced this action
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Wait { .. } => "wait",
            Self::Tx { .. } => "tx",
            Self::Rx { .. } => "rx",
            Self::Disp { .. } => "disp",
            Self::ForBegin { .. } => "for",
            Self::ForEnd => "endfor",
            Self::WhileBegin { .. } => "while",
            Self::WhileEnd => "endwhile",
        }
    }

    /// Whether this action opens a block
    pub fn opens_block(&self) -> bool {
        matches!(self, Self::ForBegin { .. } | Self::WhileBegin { .. })
    }

    /// Whether `self` is the closer matching the opener `open`
    pub fn closes(&self, open: &Action) -> bool {
        matches!(
            (open, self),
            (Self::ForBegin { .. }, Self::ForEnd) | (Self::WhileBegin { .. }, Self::WhileEnd)
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start | Self::Stop | Self::ForEnd | Self::WhileEnd => {
                write!(f, "{}", self.keyword())
            }
            Self::Wait { millis } => write!(f, "wait {millis}"),
            Self::Tx { line, data } => write!(f, "tx {line} 0x{}", hex::encode(data)),
            Self::Rx { line, timeout_ms } => write!(f, "rx {line} {timeout_ms}"),
            Self::Disp { buffer } => write!(f, "disp {buffer}"),
            Self::ForBegin { var, start, step, end } => {
                write!(f, "for {var} = {start}:{step}:{end}")
            }
            Self::WhileBegin { line_or_var, comparator, operand } => {
                write!(f, "while {line_or_var} {} {operand}", comparator.keyword())
            }
        }
    }
}

/// A validated, runnable action sequence
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    actions: Vec<Action>,
}

impl Script {
    pub(crate) fn from_actions(actions: Vec<Action>) -> Self {
        Self { actions }
    }

    /// Actions in execution order
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Number of actions
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether the script has no actions
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for action in &self.actions {
            writeln!(f, "{action}")?;
        }
        Ok(())
    }
}
