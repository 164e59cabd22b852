//! Interactive terminal tutor (`tutor chat`) and the progress report.
//!
//! Session commands are matched case-insensitively:
//!
//! | Input | Effect |
//! |-------|--------|
//! | `exit` | end the session |
//! | `progress` | print the progress report |
//! | `hi`, `hello`, `hey`, `greetings` | canned greeting, no model call |
//!
//! Anything else is a question. Only the last `history.console_window`
//! messages of the current session are sent along with it; the persisted
//! transcript is not replayed.

use anyhow::Result;
use std::io::{BufRead, Write};

use crate::chain::ConversationalChain;
use crate::models::ChatMessage;
use crate::server::DEFAULT_TOPIC;
use crate::users::{ProgressSnapshot, UserStore};

pub const GREETING_REPLY: &str = "Hello there! I am your SciTutor. How may I help you today?";
pub const NO_PROGRESS: &str = "No progress data found.";

const GREETINGS: [&str; 4] = ["hi", "hello", "hey", "greetings"];

pub fn format_progress(progress: &ProgressSnapshot) -> String {
    let mut out = String::new();
    out.push_str("\n=== Your Learning Progress ===\n");
    out.push_str(&format!("Username: {}\n", progress.username));
    out.push_str(&format!(
        "Total Questions Asked: {}\n",
        progress.total_questions
    ));
    out.push_str(&format!("Correct Answers: {}\n", progress.correct_answers));
    out.push_str(&format!("Accuracy: {:.1}%\n", progress.accuracy));
    out.push_str("\nTopics Covered:\n");
    for topic in &progress.topics_covered {
        out.push_str(&format!("- {}\n", topic));
    }
    out.push_str(&format!(
        "\nLast Session: {}",
        progress.last_session.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out
}

/// Print the progress report for `username`, or [`NO_PROGRESS`].
pub fn display_progress<W: Write>(users: &UserStore, username: &str, out: &mut W) -> Result<()> {
    match users.get_progress(username)? {
        Some(progress) => writeln!(out, "{}", format_progress(&progress))?,
        None => writeln!(out, "{}", NO_PROGRESS)?,
    }
    Ok(())
}

/// Run a chat session for `username`, reading questions line by line from
/// `input` until `exit` or end of input.
pub async fn run_chat<R: BufRead, W: Write>(
    chain: &ConversationalChain,
    users: &UserStore,
    username: &str,
    window: usize,
    input: R,
    out: &mut W,
) -> Result<()> {
    users.create_user(username)?;

    writeln!(out, "Welcome to Science AI Tutor, {}!", username)?;
    writeln!(
        out,
        "\nStart chatting! Type 'exit' to end, 'progress' to see your learning progress."
    )?;

    let mut session: Vec<ChatMessage> = Vec::new();
    let mut lines = input.lines();

    loop {
        write!(out, "\nYou: ")?;
        out.flush()?;

        let Some(line) = lines.next() else { break };
        let query = line?;
        let query = query.trim();
        if query.is_empty() {
            continue;
        }

        let command = query.to_lowercase();
        if GREETINGS.contains(&command.as_str()) {
            writeln!(out, "AI: {}", GREETING_REPLY)?;
            continue;
        }
        match command.as_str() {
            "exit" => break,
            "progress" => {
                display_progress(users, username, out)?;
                continue;
            }
            _ => {}
        }

        let start = session.len().saturating_sub(window);
        let output = chain.invoke(query, &session[start..]).await?;
        writeln!(out, "AI: {}", output.answer)?;

        users.record_turn(username, query, &output.answer, DEFAULT_TOPIC, true)?;

        session.push(ChatMessage::user(query));
        session.push(ChatMessage::ai(output.answer));
    }

    Ok(())
}
