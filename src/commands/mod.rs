//! Slash commands of the line-mode chat.
//!
//! Parsing is separated from execution: [`process_input`] turns a line into a
//! [`ChatCommand`], and the chat driver carries it out against the
//! coordinator.

mod registry;

pub use registry::{all_commands, find_command, Command, CommandInvocation};

use crate::core::message::Message;
use chrono::Utc;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    SendMessage(String),
    Help,
    New(Option<String>),
    List,
    /// Zero-based conversation index.
    Switch(usize),
    /// Zero-based index; `None` means the current conversation.
    Delete(Option<usize>),
    Rename(String),
    Reload,
    Sync,
    Remember { global: bool, note: String },
    Log(Option<String>),
    Dump(Option<String>),
    Quit,
    /// A known command with bad arguments; carries the message to show.
    Invalid(String),
}

/// Classify one line of input. Lines that do not start with a known
/// `/command` are sent as chat messages unchanged.
pub fn process_input(input: &str) -> ChatCommand {
    let trimmed = input.trim();

    let Some(rest) = trimmed.strip_prefix('/') else {
        return ChatCommand::SendMessage(input.to_string());
    };

    let mut parts = rest.splitn(2, char::is_whitespace);
    let command_name = match parts.next() {
        Some(name) if !name.is_empty() => name,
        _ => return ChatCommand::SendMessage(input.to_string()),
    };
    let args = parts.next().unwrap_or("").trim();

    match registry::find_command(command_name) {
        Some(command) => (command.parser)(CommandInvocation {
            input: trimmed,
            args,
        }),
        None => ChatCommand::SendMessage(input.to_string()),
    }
}

/// Help text listing every command.
pub fn help_text() -> String {
    let width = all_commands()
        .iter()
        .map(|command| command.usage.len())
        .max()
        .unwrap_or(0);
    let mut text = String::from("Commands:\n");
    for command in all_commands() {
        text.push_str(&format!("  {:<width$}  {}\n", command.usage, command.help));
    }
    text.push_str("Anything else is sent to the assistant.");
    text
}

fn usage_error(invocation: CommandInvocation<'_>, usage: &str) -> ChatCommand {
    ChatCommand::Invalid(format!("Invalid command '{}'. Usage: {usage}", invocation.input))
}

/// Parse a 1-based conversation number into an index.
fn parse_number(arg: &str) -> Option<usize> {
    arg.parse::<usize>().ok()?.checked_sub(1)
}

fn optional_arg(args: &str) -> Option<String> {
    (!args.is_empty()).then(|| args.to_string())
}

pub(super) fn parse_help(_invocation: CommandInvocation<'_>) -> ChatCommand {
    ChatCommand::Help
}

pub(super) fn parse_new(invocation: CommandInvocation<'_>) -> ChatCommand {
    ChatCommand::New(optional_arg(invocation.args))
}

pub(super) fn parse_list(_invocation: CommandInvocation<'_>) -> ChatCommand {
    ChatCommand::List
}

pub(super) fn parse_switch(invocation: CommandInvocation<'_>) -> ChatCommand {
    match parse_number(invocation.args) {
        Some(index) => ChatCommand::Switch(index),
        None => usage_error(invocation, "/switch <number>"),
    }
}

pub(super) fn parse_delete(invocation: CommandInvocation<'_>) -> ChatCommand {
    if invocation.args.is_empty() {
        return ChatCommand::Delete(None);
    }
    match parse_number(invocation.args) {
        Some(index) => ChatCommand::Delete(Some(index)),
        None => usage_error(invocation, "/delete [number]"),
    }
}

pub(super) fn parse_rename(invocation: CommandInvocation<'_>) -> ChatCommand {
    match optional_arg(invocation.args) {
        Some(title) => ChatCommand::Rename(title),
        None => usage_error(invocation, "/rename <title>"),
    }
}

pub(super) fn parse_reload(_invocation: CommandInvocation<'_>) -> ChatCommand {
    ChatCommand::Reload
}

pub(super) fn parse_sync(_invocation: CommandInvocation<'_>) -> ChatCommand {
    ChatCommand::Sync
}

pub(super) fn parse_remember(invocation: CommandInvocation<'_>) -> ChatCommand {
    let (global, note) = match invocation.args.split_once(char::is_whitespace) {
        Some(("-g" | "--global", note)) => (true, note.trim()),
        _ if matches!(invocation.args, "-g" | "--global") => (true, ""),
        _ => (false, invocation.args),
    };
    if note.is_empty() {
        return usage_error(invocation, "/remember [-g] <note>");
    }
    ChatCommand::Remember {
        global,
        note: note.to_string(),
    }
}

pub(super) fn parse_log(invocation: CommandInvocation<'_>) -> ChatCommand {
    if invocation.args.split_whitespace().count() > 1 {
        return usage_error(invocation, "/log [filename]");
    }
    ChatCommand::Log(optional_arg(invocation.args))
}

pub(super) fn parse_dump(invocation: CommandInvocation<'_>) -> ChatCommand {
    if invocation.args.split_whitespace().count() > 1 {
        return usage_error(invocation, "/dump [filename]");
    }
    ChatCommand::Dump(optional_arg(invocation.args))
}

pub(super) fn parse_quit(_invocation: CommandInvocation<'_>) -> ChatCommand {
    ChatCommand::Quit
}

/// File name used by `/dump` without an argument.
pub fn default_dump_filename() -> String {
    format!("iris-log-{}.txt", Utc::now().format("%Y-%m-%d"))
}

/// Write `messages` to a new file at `filename`. Refuses to overwrite.
pub fn dump_conversation(
    messages: &[Message],
    filename: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if Path::new(filename).exists() {
        return Err(format!("{filename} already exists").into());
    }
    let file = File::create(filename)?;
    let mut writer = BufWriter::new(file);

    for message in messages {
        if message.is_user() {
            writeln!(writer, "You: {}", message.text)?;
        } else if !message.text.is_empty() {
            writeln!(writer, "{}", message.text)?;
        } else {
            continue;
        }
        writeln!(writer)?;
    }

    writer.flush()?;
    Ok(())
}
