//! Adapter server
//!
//! Listens on a Unix socket and answers engine calls against one
//! [`LanguageSession`].
//!
//! ```text
//! ┌─────────────────┐     IPC      ┌──────────────────────┐
//! │     Engine      │◄────────────►│   LanguageServer     │
//! │   (client)      │   (socket)   │                      │
//! └─────────────────┘              │  ┌────────────────┐  │
//!                                  │  │ LanguageSession│  │
//!                                  │  └───────┬────────┘  │
//!                                  │          │           │
//!                                  │  ┌───────┴────────┐  │
//!                                  │  │ PythonRuntime  │  │
//!                                  │  └────────────────┘  │
//!                                  └──────────────────────┘
//! ```
//!
//! Framing is newline-delimited JSON. A connection handles its calls in
//! order; separate connections run concurrently, which is how a Cancel
//! reaches an in-flight Run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;

use crate::process::ChunkStream;
use crate::protocol::ipc::{Fault, FaultKind, LanguageCommand, LanguageResponse};
use crate::session::LanguageSession;
use crate::{LanghostError, Result};

pub struct LanguageServer {
    session: Arc<LanguageSession>,
    socket_path: PathBuf,
    shutdown: CancellationToken,
}

impl LanguageServer {
    pub fn new(session: Arc<LanguageSession>, socket_path: PathBuf) -> Self {
        Self {
            session,
            socket_path,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn session(&self) -> Arc<LanguageSession> {
        self.session.clone()
    }

    /// Cancelling this token stops the accept loop and terminates the session.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Bind the socket, replacing a stale one.
    pub fn bind(&self) -> Result<UnixListener> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }
        let listener = UnixListener::bind(&self.socket_path)?;
        tracing::info!(
            "{} adapter listening on {}",
            self.session.runtime_name(),
            self.socket_path.display()
        );
        Ok(listener)
    }

    pub async fn run(&self) -> Result<()> {
        let listener = self.bind()?;
        self.serve(listener).await
    }

    /// Accept connections until shutdown.
    pub async fn serve(&self, listener: UnixListener) -> Result<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        let session = self.session.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_client(stream, session).await {
                                tracing::warn!("client handler error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("accept error: {}", e);
                    }
                },
            }
        }

        self.session.terminate();
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            tracing::debug!("socket cleanup: {}", e);
        }
        tracing::info!("server stopped");
        Ok(())
    }
}

async fn write_line<W>(writer: &mut W, response: &LanguageResponse) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(response)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

fn fault(err: &LanghostError) -> LanguageResponse {
    LanguageResponse::Fault(Fault::from(err))
}

/// Forward a stream as chunk lines, closed by `end_of_stream` or a fault.
async fn pump<W, T>(
    writer: &mut W,
    mut stream: ChunkStream<T>,
    wrap: impl Fn(T) -> LanguageResponse,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(item) = stream.next().await {
        match item {
            Ok(chunk) => write_line(writer, &wrap(chunk)).await?,
            Err(e) => return write_line(writer, &fault(&e)).await,
        }
    }
    write_line(writer, &LanguageResponse::EndOfStream).await
}

async fn reply<W>(writer: &mut W, result: Result<LanguageResponse>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    match result {
        Ok(response) => write_line(writer, &response).await,
        Err(e) => write_line(writer, &fault(&e)).await,
    }
}

/// Run one call and write its reply.
async fn dispatch<W>(session: &LanguageSession, command: LanguageCommand, writer: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    use LanguageCommand as C;
    use LanguageResponse as R;

    let result = match command {
        C::Handshake(req) => session.handshake(req).await.map(|_| R::Empty),
        C::GetRequiredPlugins(req) => session.required_plugins(req).await.map(R::RequiredPlugins),
        C::GetRequiredPackages(req) => session.required_packages(req).await.map(R::RequiredPackages),
        C::Run(req) => session.run(req).await.map(R::Run),
        C::GetPluginInfo => session.plugin_info().await.map(R::PluginInfo),
        C::InstallDependencies(req) => {
            return match session.install_dependencies(req).await {
                Ok(stream) => pump(writer, stream, R::InstallOutput).await,
                Err(e) => write_line(writer, &fault(&e)).await,
            };
        }
        C::RuntimeOptionsPrompts(req) => session.runtime_options(req).await.map(R::RuntimeOptions),
        C::About(req) => session.about(req).await.map(R::About),
        C::GetProgramDependencies(req) => session
            .program_dependencies(req)
            .await
            .map(R::ProgramDependencies),
        C::RunPlugin(req) => {
            return match session.run_plugin(req).await {
                Ok(stream) => pump(writer, stream, |output| R::PluginOutput { output }).await,
                Err(e) => write_line(writer, &fault(&e)).await,
            };
        }
        C::GenerateProgram(req) => session.generate_program(req).await.map(R::GenerateProgram),
        C::GenerateProject(req) => session.generate_project(req).await.map(R::GenerateProject),
        C::GeneratePackage(req) => session.generate_package(req).await.map(R::GeneratePackage),
        C::Pack(req) => session.pack(req).await.map(R::Pack),
        C::Link(req) => session.link(req).await.map(|_| R::Empty),
        C::Cancel => session.cancel().await.map(|_| R::Empty),
    };
    reply(writer, result).await
}

/// Serve one connection until the peer closes it.
async fn handle_client(stream: UnixStream, session: Arc<LanguageSession>) -> Result<()> {
    let (reader, writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut writer = BufWriter::new(writer);

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let command: LanguageCommand = match serde_json::from_str(&line) {
            Ok(command) => command,
            Err(e) => {
                let response = LanguageResponse::Fault(Fault {
                    kind: FaultKind::Validation,
                    message: format!("malformed request: {}", e),
                });
                write_line(&mut writer, &response).await?;
                continue;
            }
        };
        let method = command.method();
        tracing::debug!("session {}: {}", session.id, method);
        dispatch(&session, command, &mut writer).await?;
    }
    tracing::debug!("client disconnected");
    Ok(())
}
