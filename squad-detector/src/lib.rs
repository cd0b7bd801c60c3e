//! Confirmation-prompt detection for `squad-detector`.
//!
//! `detect_prompt(program, pane)` inspects the captured output of an agent
//! session and reports whether the agent is currently blocked on a yes/no
//! question. Markers are specific to each agent program; the program is
//! identified from its command line by [`AgentKind::from_program`].

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Coding-agent programs squad knows how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Claude,
    Aider,
    Gemini,
    Codex,
    /// Any other program. Only the generic markers apply.
    Unknown,
}

/// What kind of question the agent is asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    /// Permission to run a tool or apply an edit.
    Permission,
    /// First-run "do you trust this folder" question.
    Trust,
}

/// A confirmation prompt found in a pane capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectedPrompt {
    pub agent: AgentKind,
    pub kind: PromptKind,
    /// The marker text that matched.
    pub marker: &'static str,
}

// ---------------------------------------------------------------------------
// Markers
// ---------------------------------------------------------------------------

const CLAUDE_PERMISSION: &[&str] = &[
    "No, and tell Claude what to do differently",
    "Do you want to proceed?",
];
const CLAUDE_TRUST: &[&str] = &["Do you trust the files in this folder?"];
const AIDER_PERMISSION: &[&str] = &["(Y)es/(N)o/(D)on't ask again", "(Y)es/(N)o"];
const GEMINI_PERMISSION: &[&str] = &["Yes, allow once", "Allow execution?"];
const CODEX_PERMISSION: &[&str] = &["Allow command?", "Yes (y)"];
const GENERIC_PERMISSION: &[&str] = &["[y/N]", "[Y/n]", "(y/n)"];

impl AgentKind {
    /// Identify the agent from a command line such as `/usr/local/bin/claude --model x`.
    pub fn from_program(program: &str) -> Self {
        let exe = program.split_whitespace().next().unwrap_or_default();
        let base = exe.rsplit(['/', '\\']).next().unwrap_or(exe).to_lowercase();
        if base.contains("claude") {
            AgentKind::Claude
        } else if base.contains("aider") {
            AgentKind::Aider
        } else if base.contains("gemini") {
            AgentKind::Gemini
        } else if base.contains("codex") {
            AgentKind::Codex
        } else {
            AgentKind::Unknown
        }
    }

    fn permission_markers(self) -> &'static [&'static str] {
        match self {
            AgentKind::Claude => CLAUDE_PERMISSION,
            AgentKind::Aider => AIDER_PERMISSION,
            AgentKind::Gemini => GEMINI_PERMISSION,
            AgentKind::Codex => CODEX_PERMISSION,
            AgentKind::Unknown => GENERIC_PERMISSION,
        }
    }

    fn trust_markers(self) -> &'static [&'static str] {
        match self {
            AgentKind::Claude => CLAUDE_TRUST,
            _ => &[],
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Return the confirmation prompt currently shown in `pane`, if any.
///
/// Only the tail of the capture is considered so that a prompt answered
/// earlier and still visible in scrollback does not match.
pub fn detect_prompt(program: &str, pane: &str) -> Option<DetectedPrompt> {
    let agent = AgentKind::from_program(program);
    let plain = strip_ansi(pane);
    let tail = tail_lines(&plain, TAIL_LINES);

    let find = |markers: &'static [&'static str], kind| {
        markers
            .iter()
            .find(|marker| tail.contains(*marker))
            .map(|marker| DetectedPrompt {
                agent,
                kind,
                marker: *marker,
            })
    };

    find(agent.trust_markers(), PromptKind::Trust)
        .or_else(|| find(agent.permission_markers(), PromptKind::Permission))
}

/// Shorthand for `detect_prompt(..).is_some()`.
pub fn awaiting_confirmation(program: &str, pane: &str) -> bool {
    detect_prompt(program, pane).is_some()
}

/// Remove ANSI CSI and OSC escape sequences from captured terminal output.
pub fn strip_ansi(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\u{1b}' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('[') => {
                chars.next();
                // CSI: parameters then one final byte in 0x40..=0x7e.
                for c in chars.by_ref() {
                    if ('\u{40}'..='\u{7e}').contains(&c) {
                        break;
                    }
                }
            }
            Some(']') => {
                chars.next();
                // OSC: terminated by BEL or ESC '\'.
                while let Some(c) = chars.next() {
                    if c == '\u{7}' {
                        break;
                    }
                    if c == '\u{1b}' && chars.peek() == Some(&'\\') {
                        chars.next();
                        break;
                    }
                }
            }
            Some(_) => {
                chars.next();
            }
            None => {}
        }
    }
    out
}

const TAIL_LINES: usize = 40;

fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
