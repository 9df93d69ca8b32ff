//! teleoctl - remote client for the teleod command channel
//!
//! Sends one command frame over the newline-delimited JSON protocol and
//! prints the daemon's response. With `--follow`, stays connected and
//! prints every frame the daemon pushes (release and closing
//! notifications included).

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

#[derive(Parser)]
#[command(name = "teleoctl")]
#[command(about = "Remote client for the teleod command channel")]
#[command(version)]
struct Args {
    /// Daemon host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Daemon remote-channel port
    #[arg(short, long, default_value_t = 6666)]
    port: u16,

    /// Sender id echoed back in the response frame
    #[arg(long, default_value = "teleoctl")]
    sender: String,

    /// Stay connected and print pushed frames after the response
    #[arg(long)]
    follow: bool,

    /// Command name (h, robs, joys, bind, pbind, ubind, pubind, info, conn, exit, ...)
    command: String,

    /// Positional command arguments
    args: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let addr = format!("{}:{}", args.host, args.port);
    let stream = TcpStream::connect(&addr)
        .await
        .with_context(|| format!("Failed to connect to {}", addr))?;
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let mut frame = vec![json!(args.sender), json!(args.command)];
    frame.extend(args.args.iter().map(|a| json!(a)));
    let mut request = serde_json::to_vec(&Value::Array(frame))?;
    request.push(b'\n');
    write_half.write_all(&request).await?;

    let Some(response) = lines.next_line().await? else {
        bail!("Connection closed before a response arrived");
    };
    println!("{}", response);

    if is_error_frame(&response, &args.command)? {
        std::process::exit(1);
    }

    if args.follow {
        while let Some(line) = lines.next_line().await? {
            println!("{}", line);
        }
    }

    Ok(())
}

/// A failed command comes back as `[sender, command, "error"]`.
fn is_error_frame(response: &str, command: &str) -> Result<bool> {
    let value: Value = serde_json::from_str(response)
        .with_context(|| format!("Malformed response frame: {}", response))?;
    let Value::Array(items) = value else {
        bail!("Malformed response frame: {}", response);
    };
    Ok(items.get(1).and_then(Value::as_str) == Some(command)
        && items.get(2).and_then(Value::as_str) == Some("error")
        && items.len() == 3)
}
