//! Log Listener
//!
//! Command-line client of the log listener proxy.

use std::process::Stdio;

use anyhow::Context;
use clap::{Parser, Subcommand};
use client::{AdminClient, ReadEvent, StreamReader, StreamWriter, DEFAULT_PROXY_URL};
use protocol::{SessionInfo, StreamKind};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

/// Log Listener - stream job output through a log listener proxy.
#[derive(Parser, Debug)]
#[command(name = "log-listener")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Proxy base URL
    #[arg(long, global = true, env = "LOG_LISTENER_URL", default_value = DEFAULT_PROXY_URL)]
    pub url: String,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Create a session
    Create { session_id: String },

    /// Delete a session, closing all of its connections
    Delete { session_id: String },

    /// Describe a session as JSON
    Info { session_id: String },

    /// List live sessions
    List,

    /// Check that the proxy is up
    Health,

    /// Follow a session's streams on the local stdout/stderr
    Read {
        session_id: String,

        /// Streams to follow (default: both)
        #[arg(long = "stream", value_name = "KIND")]
        streams: Vec<StreamKind>,

        /// Attach to an existing session instead of creating (and deleting) one
        #[arg(long)]
        no_create_session: bool,
    },

    /// Publish stdin lines to one stream
    Write {
        session_id: String,

        /// Stream to write
        #[arg(long, default_value = "stdout", value_name = "KIND")]
        stream: StreamKind,
    },

    /// Run a command and relay its stdout/stderr while echoing them locally
    Run {
        session_id: String,

        /// Create the session before starting the command
        #[arg(long)]
        create: bool,

        /// Command and arguments
        #[arg(trailing_var_arg = true, required = true, value_name = "COMMAND")]
        command: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let admin = AdminClient::new(&cli.url).with_context(|| format!("Bad proxy URL {}", cli.url))?;

    match cli.command {
        Commands::Create { session_id } => {
            let response = admin.create(&session_id).await?;
            println!("{}: {}", response.session_id, response.message);
        }
        Commands::Delete { session_id } => {
            let response = admin.delete(&session_id).await?;
            println!("{}: {}", response.session_id, response.message);
        }
        Commands::Info { session_id } => {
            let info = admin.info(&session_id).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Commands::List => {
            for info in admin.list().await? {
                println!("{}", summary(&info));
            }
        }
        Commands::Health => {
            let health = admin.health().await?;
            println!("{}: {}", health.name, health.status);
        }
        Commands::Read {
            session_id,
            streams,
            no_create_session,
        } => {
            let kinds = if streams.is_empty() {
                StreamKind::ALL.to_vec()
            } else {
                streams
            };
            read(&admin, &session_id, kinds, !no_create_session).await?;
        }
        Commands::Write { session_id, stream } => {
            write(&admin, &session_id, stream).await?;
        }
        Commands::Run {
            session_id,
            create,
            command,
        } => {
            let code = run(&admin, &session_id, create, &command).await?;
            std::process::exit(code);
        }
    }

    Ok(())
}

/// One-line description of a session for `list`.
fn summary(info: &SessionInfo) -> String {
    let channels: Vec<String> = info
        .channels
        .iter()
        .map(|c| format!("{}={:?}/{}r", c.kind, c.state, c.readers))
        .collect();
    format!(
        "{}\texpires_at={}\t{}",
        info.session_id,
        info.expires_at,
        channels.join(" ")
    )
}

fn local_output(kind: StreamKind) -> Box<dyn AsyncWrite + Send + Unpin> {
    match kind {
        StreamKind::Stdout => Box::new(tokio::io::stdout()),
        StreamKind::Stderr => Box::new(tokio::io::stderr()),
    }
}

/// Follow `kinds` until the proxy closes them, or until Ctrl-C.
async fn read(
    admin: &AdminClient,
    session_id: &str,
    kinds: Vec<StreamKind>,
    create: bool,
) -> anyhow::Result<()> {
    if create {
        admin
            .create(session_id)
            .await
            .with_context(|| format!("Failed to create session {session_id}"))?;
    }

    let mut readers = JoinSet::new();
    for kind in kinds {
        let reader = StreamReader::connect(admin, session_id, kind).await?;
        readers.spawn(follow(reader));
    }

    let followed = async {
        while let Some(joined) = readers.join_next().await {
            joined??;
        }
        anyhow::Ok(())
    };

    let result = tokio::select! {
        result = followed => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted");
            Ok(())
        }
    };

    if create {
        if let Err(e) = admin.delete(session_id).await {
            tracing::warn!("Failed to delete session {}: {}", session_id, e);
        }
    }
    result
}

/// Copy one stream to the matching local output.
async fn follow(mut reader: StreamReader) -> anyhow::Result<()> {
    let kind = reader.kind();
    let mut out = local_output(kind);
    loop {
        match reader.recv().await? {
            ReadEvent::Data(text) => {
                out.write_all(text.as_bytes()).await?;
                out.flush().await?;
            }
            ReadEvent::Closed {
                reason,
                end_of_stream,
            } => {
                match reason {
                    Some(reason) if reason.is_normal() => {
                        tracing::debug!("{} finished (end of stream: {})", kind, end_of_stream)
                    }
                    Some(reason) => tracing::warn!("{} closed: {}", kind, reason),
                    None => tracing::warn!("{} connection lost", kind),
                }
                return Ok(());
            }
        }
    }
}

/// Publish stdin lines to one stream.
async fn write(admin: &AdminClient, session_id: &str, kind: StreamKind) -> anyhow::Result<()> {
    let mut writer = StreamWriter::connect(admin, session_id, kind).await?;
    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut line = Vec::new();
    loop {
        line.clear();
        if stdin.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        writer.send(String::from_utf8_lossy(&line)).await?;
    }
    if let Some(reason) = writer.close().await? {
        anyhow::bail!("{} writer closed by proxy: {}", kind, reason);
    }
    Ok(())
}

/// Run `command`, relaying its output; returns its exit code.
async fn run(
    admin: &AdminClient,
    session_id: &str,
    create: bool,
    command: &[String],
) -> anyhow::Result<i32> {
    let (program, args) = command.split_first().context("No command given")?;

    if create {
        admin
            .create(session_id)
            .await
            .with_context(|| format!("Failed to create session {session_id}"))?;
    }

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to start {program}"))?;

    let stdout = child.stdout.take().context("Child stdout not captured")?;
    let stderr = child.stderr.take().context("Child stderr not captured")?;

    let mut tees = JoinSet::new();
    tees.spawn(tee(admin.clone(), session_id.to_string(), StreamKind::Stdout, stdout));
    tees.spawn(tee(admin.clone(), session_id.to_string(), StreamKind::Stderr, stderr));

    let status = child.wait().await?;
    while let Some(joined) = tees.join_next().await {
        joined??;
    }

    tracing::debug!("{} exited with {}", program, status);
    Ok(status.code().unwrap_or(1))
}

/// Echo `source` to the local stream `kind` and publish it to the proxy.
///
/// The command keeps running if the proxy is unreachable or drops the writer.
async fn tee<R>(
    admin: AdminClient,
    session_id: String,
    kind: StreamKind,
    source: R,
) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut writer = match StreamWriter::connect(&admin, &session_id, kind).await {
        Ok(writer) => Some(writer),
        Err(e) => {
            tracing::warn!("Not relaying {}: {}", kind, e);
            None
        }
    };
    let mut local = local_output(kind);
    let mut source = BufReader::new(source);
    let mut line = Vec::new();

    loop {
        line.clear();
        if source.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        local.write_all(&line).await?;
        local.flush().await?;

        let failed = match writer.as_mut() {
            Some(w) => w.send(String::from_utf8_lossy(&line)).await.err(),
            None => None,
        };
        if let Some(e) = failed {
            tracing::warn!("Stopped relaying {}: {}", kind, e);
            writer = None;
        }
    }

    if let Some(writer) = writer {
        if let Err(e) = writer.close().await {
            tracing::warn!("Failed to close {} writer: {}", kind, e);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{ChannelInfo, ChannelState};

    #[test]
    fn test_cli_read_defaults() {
        let cli = Cli::try_parse_from(["log-listener", "read", "job-1"]).unwrap();
        assert_eq!(cli.url, DEFAULT_PROXY_URL);
        let Commands::Read {
            session_id,
            streams,
            no_create_session,
        } = cli.command
        else {
            panic!("expected read");
        };
        assert_eq!(session_id, "job-1");
        assert!(streams.is_empty());
        assert!(!no_create_session);
    }

    #[test]
    fn test_cli_read_stream_filter() {
        let cli = Cli::try_parse_from([
            "log-listener",
            "--url",
            "http://proxy:9000",
            "read",
            "job-1",
            "--stream",
            "stderr",
            "--no-create-session",
        ])
        .unwrap();
        assert_eq!(cli.url, "http://proxy:9000");
        assert!(matches!(
            cli.command,
            Commands::Read { streams, no_create_session: true, .. }
                if streams == vec![StreamKind::Stderr]
        ));
    }

    #[test]
    fn test_cli_rejects_unknown_stream() {
        assert!(Cli::try_parse_from(["log-listener", "write", "job-1", "--stream", "stdin"]).is_err());
    }

    #[test]
    fn test_cli_run_takes_trailing_command() {
        let cli = Cli::try_parse_from([
            "log-listener",
            "run",
            "job-1",
            "--create",
            "sh",
            "-c",
            "echo hi --not-ours",
        ])
        .unwrap();
        let Commands::Run {
            create, command, ..
        } = cli.command
        else {
            panic!("expected run");
        };
        assert!(create);
        assert_eq!(command, vec!["sh", "-c", "echo hi --not-ours"]);
    }

    #[test]
    fn test_summary_line() {
        let info = SessionInfo {
            session_id: "job-1".to_string(),
            created_at: 100,
            expires_at: 3700,
            channels: vec![ChannelInfo {
                kind: StreamKind::Stdout,
                state: ChannelState::WriterActive,
                writer_attached: true,
                readers: 2,
                cycles_completed: 0,
                messages_published: 5,
            }],
        };
        assert_eq!(summary(&info), "job-1\texpires_at=3700\tstdout=WriterActive/2r");
    }

    #[test]
    fn test_cli_verify() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
