use super::ChatCommand;

pub type CommandParser = fn(CommandInvocation<'_>) -> ChatCommand;

pub struct Command {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub usage: &'static str,
    pub help: &'static str,
    pub parser: CommandParser,
}

#[derive(Clone, Copy)]
pub struct CommandInvocation<'a> {
    pub input: &'a str,
    pub args: &'a str,
}

pub fn all_commands() -> &'static [Command] {
    COMMANDS
}

pub fn find_command(name: &str) -> Option<&'static Command> {
    all_commands().iter().find(|command| {
        command.name.eq_ignore_ascii_case(name)
            || command
                .aliases
                .iter()
                .any(|alias| alias.eq_ignore_ascii_case(name))
    })
}

const COMMANDS: &[Command] = &[
    Command {
        name: "help",
        aliases: &["?"],
        usage: "/help",
        help: "Show available commands.",
        parser: super::parse_help,
    },
    Command {
        name: "new",
        aliases: &[],
        usage: "/new [title]",
        help: "Create a conversation and switch to it.",
        parser: super::parse_new,
    },
    Command {
        name: "list",
        aliases: &["ls"],
        usage: "/list",
        help: "List conversations; the selected one is marked with *.",
        parser: super::parse_list,
    },
    Command {
        name: "switch",
        aliases: &["open"],
        usage: "/switch <number>",
        help: "Switch to the numbered conversation. Responses keep streaming in the background.",
        parser: super::parse_switch,
    },
    Command {
        name: "delete",
        aliases: &["rm"],
        usage: "/delete [number]",
        help: "Delete the numbered (or current) conversation.",
        parser: super::parse_delete,
    },
    Command {
        name: "rename",
        aliases: &[],
        usage: "/rename <title>",
        help: "Rename the current conversation.",
        parser: super::parse_rename,
    },
    Command {
        name: "reload",
        aliases: &[],
        usage: "/reload",
        help: "Fetch the current conversation again from the backend.",
        parser: super::parse_reload,
    },
    Command {
        name: "sync",
        aliases: &[],
        usage: "/sync",
        help: "Refresh conversation titles from the backend.",
        parser: super::parse_sync,
    },
    Command {
        name: "remember",
        aliases: &[],
        usage: "/remember [-g] <note>",
        help: "Store a note in this conversation's memory, or in global memory with -g.",
        parser: super::parse_remember,
    },
    Command {
        name: "log",
        aliases: &[],
        usage: "/log [filename]",
        help: "Toggle transcript logging or set the log file path.",
        parser: super::parse_log,
    },
    Command {
        name: "dump",
        aliases: &[],
        usage: "/dump [filename]",
        help: "Export the current conversation to a file.",
        parser: super::parse_dump,
    },
    Command {
        name: "quit",
        aliases: &["exit", "q"],
        usage: "/quit",
        help: "Leave the chat.",
        parser: super::parse_quit,
    },
];
