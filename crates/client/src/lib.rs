//! # Log Listener Proxy Client Library
//!
//! Client side of the log listener proxy: session administration over HTTP
//! and the WebSocket ends of a session's stdout/stderr channels.
//!
//! ## Overview
//!
//! - **Admin**: [`AdminClient`] creates, describes, lists and deletes sessions
//! - **Writer**: [`StreamWriter`] publishes a job's output to one channel
//! - **Reader**: [`StreamReader`] follows one channel until the proxy closes it
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use client::{AdminClient, ReadEvent, StreamReader, StreamWriter};
//! use protocol::StreamKind;
//!
//! # async fn example() -> client::Result<()> {
//! let admin = AdminClient::new("http://localhost:8160")?;
//! admin.create("job-42").await?;
//!
//! let mut reader = StreamReader::connect(&admin, "job-42", StreamKind::Stdout).await?;
//! let mut writer = StreamWriter::connect(&admin, "job-42", StreamKind::Stdout).await?;
//! writer.send("hello\n").await?;
//! writer.close().await?;
//!
//! while let ReadEvent::Data(line) = reader.recv().await? {
//!     print!("{line}");
//! }
//! admin.delete("job-42").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`admin`]: HTTP admin client
//! - [`stream`]: Channel reader and writer
//! - [`error`]: Error types

pub mod admin;
pub mod error;
pub mod stream;

pub use admin::{AdminClient, DEFAULT_PROXY_URL};
pub use error::{ClientError, Result};
pub use stream::{ReadEvent, StreamReader, StreamWriter};
