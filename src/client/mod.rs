//! Engine-side client for an adapter socket
//!
//! One method per call. Faults come back as the matching
//! [`LanghostError`] variant.

use std::path::Path;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

use crate::process::{chunk_channel, ChunkStream};
use crate::protocol::*;
use crate::{LanghostError, Result};

pub struct EngineClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

fn unexpected(method: &str, response: &LanguageResponse) -> LanghostError {
    LanghostError::Remote(format!("unexpected reply to {}: {:?}", method, response))
}

impl EngineClient {
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket_path).await?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(reader).lines(),
            writer,
        })
    }

    async fn send(&mut self, command: &LanguageCommand) -> Result<()> {
        let mut line = serde_json::to_vec(command)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<LanguageResponse> {
        let line = self
            .lines
            .next_line()
            .await?
            .ok_or_else(|| LanghostError::Remote("adapter closed the connection".to_string()))?;
        match serde_json::from_str(&line)? {
            LanguageResponse::Fault(fault) => Err(fault.into()),
            response => Ok(response),
        }
    }

    async fn call(&mut self, command: LanguageCommand) -> Result<LanguageResponse> {
        self.send(&command).await?;
        self.receive().await
    }

    async fn call_empty(&mut self, command: LanguageCommand) -> Result<()> {
        let method = command.method();
        match self.call(command).await? {
            LanguageResponse::Empty => Ok(()),
            other => Err(unexpected(method, &other)),
        }
    }

    pub async fn handshake(&mut self, req: LanguageHandshakeRequest) -> Result<()> {
        self.call_empty(LanguageCommand::Handshake(req)).await
    }

    pub async fn required_plugins(
        &mut self,
        req: GetRequiredPluginsRequest,
    ) -> Result<Vec<PluginDependency>> {
        match self.call(LanguageCommand::GetRequiredPlugins(req)).await? {
            LanguageResponse::RequiredPlugins(r) => Ok(r.plugins),
            other => Err(unexpected("GetRequiredPlugins", &other)),
        }
    }

    pub async fn required_packages(
        &mut self,
        req: GetRequiredPackagesRequest,
    ) -> Result<Vec<PackageDependency>> {
        match self.call(LanguageCommand::GetRequiredPackages(req)).await? {
            LanguageResponse::RequiredPackages(r) => Ok(r.packages),
            other => Err(unexpected("GetRequiredPackages", &other)),
        }
    }

    pub async fn run(&mut self, req: RunRequest) -> Result<RunResponse> {
        match self.call(LanguageCommand::Run(req)).await? {
            LanguageResponse::Run(r) => Ok(r),
            other => Err(unexpected("Run", &other)),
        }
    }

    pub async fn plugin_info(&mut self) -> Result<PluginInfo> {
        match self.call(LanguageCommand::GetPluginInfo).await? {
            LanguageResponse::PluginInfo(r) => Ok(r),
            other => Err(unexpected("GetPluginInfo", &other)),
        }
    }

    /// Prompts are checked on arrival; a mistyped default fails the call.
    pub async fn runtime_options(
        &mut self,
        req: RuntimeOptionsRequest,
    ) -> Result<Vec<RuntimeOptionPrompt>> {
        match self.call(LanguageCommand::RuntimeOptionsPrompts(req)).await? {
            LanguageResponse::RuntimeOptions(r) => {
                for prompt in &r.prompts {
                    prompt.validate()?;
                }
                Ok(r.prompts)
            }
            other => Err(unexpected("RuntimeOptionsPrompts", &other)),
        }
    }

    pub async fn about(&mut self, req: AboutRequest) -> Result<AboutResponse> {
        match self.call(LanguageCommand::About(req)).await? {
            LanguageResponse::About(r) => Ok(r),
            other => Err(unexpected("About", &other)),
        }
    }

    pub async fn program_dependencies(
        &mut self,
        req: GetProgramDependenciesRequest,
    ) -> Result<Vec<DependencyInfo>> {
        match self.call(LanguageCommand::GetProgramDependencies(req)).await? {
            LanguageResponse::ProgramDependencies(r) => Ok(r.dependencies),
            other => Err(unexpected("GetProgramDependencies", &other)),
        }
    }

    pub async fn generate_program(
        &mut self,
        req: GenerateProgramRequest,
    ) -> Result<GenerateProgramResponse> {
        match self.call(LanguageCommand::GenerateProgram(req)).await? {
            LanguageResponse::GenerateProgram(r) => Ok(r),
            other => Err(unexpected("GenerateProgram", &other)),
        }
    }

    pub async fn generate_project(
        &mut self,
        req: GenerateProjectRequest,
    ) -> Result<GenerateProjectResponse> {
        match self.call(LanguageCommand::GenerateProject(req)).await? {
            LanguageResponse::GenerateProject(r) => Ok(r),
            other => Err(unexpected("GenerateProject", &other)),
        }
    }

    pub async fn generate_package(
        &mut self,
        req: GeneratePackageRequest,
    ) -> Result<GeneratePackageResponse> {
        match self.call(LanguageCommand::GeneratePackage(req)).await? {
            LanguageResponse::GeneratePackage(r) => Ok(r),
            other => Err(unexpected("GeneratePackage", &other)),
        }
    }

    pub async fn pack(&mut self, req: PackRequest) -> Result<PackResponse> {
        match self.call(LanguageCommand::Pack(req)).await? {
            LanguageResponse::Pack(r) => Ok(r),
            other => Err(unexpected("Pack", &other)),
        }
    }

    pub async fn link(&mut self, req: LinkRequest) -> Result<()> {
        self.call_empty(LanguageCommand::Link(req)).await
    }

    pub async fn cancel(&mut self) -> Result<()> {
        self.call_empty(LanguageCommand::Cancel).await
    }

    /// Read chunk lines in the background until the stream closes.
    ///
    /// The connection belongs to the stream from here on.
    fn into_stream<T, F>(mut self, method: &'static str, unwrap: F) -> ChunkStream<T>
    where
        T: Send + 'static,
        F: Fn(LanguageResponse) -> Option<T> + Send + 'static,
    {
        let (tx, stream) = chunk_channel();
        tokio::spawn(async move {
            loop {
                match self.receive().await {
                    Ok(LanguageResponse::EndOfStream) => break,
                    Ok(response) => match unwrap(response) {
                        Some(chunk) => {
                            if !tx.send(chunk) {
                                break;
                            }
                        }
                        None => {
                            tx.fail(LanghostError::Remote(format!(
                                "unexpected chunk in {} stream",
                                method
                            )));
                            break;
                        }
                    },
                    Err(e) => {
                        tx.fail(e);
                        break;
                    }
                }
            }
        });
        stream
    }

    pub async fn install_dependencies(
        mut self,
        req: InstallDependenciesRequest,
    ) -> Result<ChunkStream<InstallDependenciesResponse>> {
        self.send(&LanguageCommand::InstallDependencies(req)).await?;
        Ok(self.into_stream("InstallDependencies", |r| match r {
            LanguageResponse::InstallOutput(chunk) => Some(chunk),
            _ => None,
        }))
    }

    pub async fn run_plugin(mut self, req: RunPluginRequest) -> Result<ChunkStream<RunPluginResponse>> {
        self.send(&LanguageCommand::RunPlugin(req)).await?;
        Ok(self.into_stream("RunPlugin", |r| match r {
            LanguageResponse::PluginOutput { output } => Some(output),
            _ => None,
        }))
    }
}
