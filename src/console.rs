//! Local interactive console
//!
//! Thin line-prompt front-end over the command dispatcher. Argument
//! collection is a separate resolution step: missing positional arguments
//! are prompted for (with regex validation and defaults) until a fully
//! populated argument list exists, then the command is dispatched exactly
//! once, non-interactively.

use std::io::Write as _;
use std::sync::Arc;

use regex::Regex;
use tokio::io::{stdin, AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::dispatch::{lookup, Dispatcher, InvocationSource, COMMANDS};
use crate::wire::decode_info;
use crate::{Result, TeleoError};

const COMMAND_PATTERN: &str = r"^[a-zA-Z]+$";
const INDEX_PATTERN: &str = r"^[0-9]+$";
const PATH_PATTERN: &str = r"^[A-Za-z0-9_:./-]+$";
const DRIVER_PATTERN: &str = r"^[-_a-zA-Z0-9]+$";

struct ArgPatterns {
    command: Regex,
    index: Regex,
    path: Regex,
    driver: Regex,
}

impl ArgPatterns {
    fn new() -> Result<Self> {
        Ok(Self {
            command: Regex::new(COMMAND_PATTERN)
                .map_err(|e| TeleoError::Config(e.to_string()))?,
            index: Regex::new(INDEX_PATTERN).map_err(|e| TeleoError::Config(e.to_string()))?,
            path: Regex::new(PATH_PATTERN).map_err(|e| TeleoError::Config(e.to_string()))?,
            driver: Regex::new(DRIVER_PATTERN).map_err(|e| TeleoError::Config(e.to_string()))?,
        })
    }
}

/// Run the console over stdin until `exit` or end of input.
pub async fn run(dispatcher: Arc<Dispatcher>) -> Result<()> {
    run_with_input(dispatcher, BufReader::new(stdin())).await
}

/// Console loop over any line source; split out so tests can script input.
pub async fn run_with_input<R>(dispatcher: Arc<Dispatcher>, reader: R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let patterns = ArgPatterns::new()?;
    let mut lines = reader.lines();

    welcome();

    loop {
        let Some(command) = prompt_line(&mut lines, "").await? else {
            break;
        };
        let command = command.trim().to_string();
        if command.is_empty() {
            continue;
        }
        if !patterns.command.is_match(&command) || lookup(&command).is_none() {
            println!("Command not recognized. Press 'h' for help");
            continue;
        }

        let Some(args) = resolve_args(&mut lines, &patterns, &command).await? else {
            break;
        };

        if command == "clear" {
            // ANSI full reset, same effect as the clear(1) utility
            print!("\x1bc");
        }

        match dispatcher.dispatch(&command, &args, InvocationSource::Local).await {
            Ok(result) => render(&command, &result),
            Err(e) => println!("*\tError: {}", e),
        }

        if command == "exit" {
            break;
        }
    }

    Ok(())
}

/// Interactively collect the positional arguments a command needs.
/// Returns None if input ended mid-prompt.
async fn resolve_args<R>(
    lines: &mut tokio::io::Lines<R>,
    patterns: &ArgPatterns,
    command: &str,
) -> Result<Option<Vec<String>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut args = Vec::new();
    let prompts: Vec<(&str, &Regex, &str)> = match command {
        "info" => vec![("Robot Index:", &patterns.index, "1")],
        "bind" => vec![
            ("Robot Index:", &patterns.index, "1"),
            ("Controller Index:", &patterns.index, "1"),
            ("Controller Driver:", &patterns.driver, "GenericDriver"),
        ],
        "pbind" => vec![
            ("Robot Path:", &patterns.path, "virtual"),
            ("Controller Path:", &patterns.path, "virtual"),
            ("Controller Driver:", &patterns.driver, "GenericDriver"),
        ],
        "ubind" => vec![("Connection Index:", &patterns.index, "1")],
        "pubind" => vec![
            ("Robot Path:", &patterns.path, "virtual"),
            ("Controller Path:", &patterns.path, "virtual"),
        ],
        _ => Vec::new(),
    };

    for (prompt, pattern, default) in prompts {
        loop {
            let Some(line) = prompt_line(lines, prompt).await? else {
                return Ok(None);
            };
            let value = line.trim();
            if value.is_empty() {
                args.push(default.to_string());
                break;
            }
            if pattern.is_match(value) {
                args.push(value.to_string());
                break;
            }
            println!("Invalid input, try again (Enter for default '{}')", default);
        }
    }

    debug!("Resolved args for {}: {:?}", command, args);
    Ok(Some(args))
}

async fn prompt_line<R>(
    lines: &mut tokio::io::Lines<R>,
    prompt: &str,
) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    if prompt.is_empty() {
        print!("--> ");
    } else {
        println!("*\t{}", prompt);
        print!("--> ");
    }
    std::io::stdout().flush()?;
    Ok(lines.next_line().await?)
}

fn render(command: &str, result: &[String]) {
    match command {
        "robs" | "joys" | "conn" => {
            // First element is the display string; the rest are entries
            let entries = &result[1..];
            if entries.is_empty() {
                println!("*\tNone listed");
            } else {
                for (i, entry) in entries.iter().enumerate() {
                    println!("*\t{}\t:\t{}", i + 1, entry);
                }
            }
            println!("*\tA bound device will not appear in this list until unbound.");
        }
        "info" => {
            for line in info_lines(result) {
                println!("*\t{}", line);
            }
        }
        _ => {
            for line in result {
                println!("*\t{}", line);
            }
        }
    }
}

/// Decode an info outcome (`[raw info string, robot index]`) into one
/// readable line per field.
fn info_lines(result: &[String]) -> Vec<String> {
    let Some((raw, rest)) = result.split_first() else {
        return Vec::new();
    };
    let mut lines: Vec<String> = decode_info(raw)
        .into_iter()
        .map(|(field, value)| format!("{}\t:\t{}", field, value))
        .collect();
    if let Some(index) = rest.first() {
        lines.push(format!("Robot Index\t:\t{}", index));
    }
    lines
}

fn welcome() {
    let now = chrono::Local::now();
    println!("*\tWelcome to teleod");
    println!("*\tToday is: {}", now.format("%Y-%m-%d"));
    println!("*\tThe time is: {}", now.format("%H:%M:%S"));
    println!("*\tPress 'h' for help. {} commands available.", COMMANDS.len());
}
