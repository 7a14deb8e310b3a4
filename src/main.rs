use anyhow::{Context, Result};
use clap::Parser;
use langhost::cli::{parse_pairs, Cli, Commands};
use langhost::config::AppConfig;
use langhost::protocol::{
    AboutRequest, GeneratePackageRequest, GenerateProjectRequest, GetProgramDependenciesRequest,
    GetRequiredPluginsRequest, LanguageHandshakeRequest, LinkRequest, PackRequest, ProgramInfo,
    RuntimeOptionsRequest,
};
use langhost::runtime::PythonRuntime;
use langhost::server::LanguageServer;
use langhost::session::LanguageSession;
use std::path::Path;
use std::sync::Arc;

/// A session for one local command, already past Handshake
async fn local_session(config: AppConfig, dir: Option<&Path>) -> Result<LanguageSession> {
    let session = LanguageSession::new(Arc::new(PythonRuntime::new(config)));
    let dir = dir.map(|d| d.display().to_string());
    session
        .handshake(LanguageHandshakeRequest {
            engine_address: "local".to_string(),
            root_directory: dir.clone(),
            program_directory: dir,
        })
        .await?;
    Ok(session)
}

fn program(dir: &Path) -> Option<ProgramInfo> {
    Some(ProgramInfo::new(dir.display().to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries command output
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("langhost=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.config();

    match cli.command {
        Commands::Serve { .. } => {
            let socket_path = config.socket_path.clone();
            let session = Arc::new(LanguageSession::new(Arc::new(PythonRuntime::new(config))));
            let server = LanguageServer::new(session, socket_path);
            let listener = server.bind()?;
            println!("{}", server.socket_path().display());

            let shutdown = server.shutdown_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("interrupt received, shutting down");
                }
                shutdown.cancel();
            });
            server.serve(listener).await?;
        }

        Commands::Deps { dir, transitive } => {
            let session = local_session(config, Some(&dir)).await?;
            let resp = session
                .program_dependencies(GetProgramDependenciesRequest {
                    info: program(&dir),
                    transitive_dependencies: transitive,
                    ..Default::default()
                })
                .await?;
            for dep in resp.dependencies {
                if dep.version.is_empty() {
                    println!("{}", dep.name);
                } else {
                    println!("{} {}", dep.name, dep.version);
                }
            }
        }

        Commands::Plugins { dir } => {
            let session = local_session(config, Some(&dir)).await?;
            let resp = session
                .required_plugins(GetRequiredPluginsRequest {
                    info: program(&dir),
                    ..Default::default()
                })
                .await?;
            if resp.plugins.is_empty() {
                println!("No plugins required.");
            }
            for plugin in resp.plugins {
                println!("{} {} {}", plugin.kind, plugin.name, plugin.version);
            }
        }

        Commands::Prompts { dir } => {
            let session = local_session(config, Some(&dir)).await?;
            let resp = session
                .runtime_options(RuntimeOptionsRequest {
                    info: program(&dir),
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&resp.prompts)?);
        }

        Commands::About { dir } => {
            let session = local_session(config, Some(&dir)).await?;
            let about = session
                .about(AboutRequest {
                    info: program(&dir),
                })
                .await?;
            println!("Executable: {}", about.executable);
            println!("Version:    {}", about.version);
            for (key, value) in about.metadata {
                println!("{}: {}", key, value);
            }
        }

        Commands::GenerateProject {
            source,
            target,
            project,
            strict,
        } => {
            let session = local_session(config, None).await?;
            let resp = session
                .generate_project(GenerateProjectRequest {
                    source_directory: source.display().to_string(),
                    target_directory: target.display().to_string(),
                    project,
                    strict,
                    ..Default::default()
                })
                .await?;
            for diagnostic in &resp.diagnostics {
                eprintln!("{}", diagnostic);
            }
            println!("Generated project in {}", target.display());
        }

        Commands::GeneratePackage {
            dir,
            schema,
            local,
            local_dependencies,
        } => {
            let schema = std::fs::read_to_string(&schema)
                .with_context(|| format!("reading schema {}", schema.display()))?;
            let local_dependencies = parse_pairs(&local_dependencies)
                .map_err(anyhow::Error::msg)?
                .into_iter()
                .collect();
            let session = local_session(config, None).await?;
            let resp = session
                .generate_package(GeneratePackageRequest {
                    directory: dir.display().to_string(),
                    schema,
                    local,
                    local_dependencies,
                    ..Default::default()
                })
                .await?;
            for diagnostic in &resp.diagnostics {
                eprintln!("{}", diagnostic);
            }
            println!("Generated package in {}", dir.display());
        }

        Commands::Pack {
            package,
            destination,
        } => {
            let session = local_session(config, None).await?;
            let resp = session
                .pack(PackRequest {
                    package_directory: package.display().to_string(),
                    destination_directory: destination.display().to_string(),
                })
                .await?;
            println!("{}", resp.artifact_path);
        }

        Commands::Link { dir, links } => {
            let local_dependencies = parse_pairs(&links)
                .map_err(anyhow::Error::msg)?
                .into_iter()
                .collect();
            let session = local_session(config, Some(&dir)).await?;
            session
                .link(LinkRequest {
                    info: program(&dir),
                    local_dependencies,
                })
                .await?;
            println!("Linked {} dependencies in {}", links.len(), dir.display());
        }
    }

    Ok(())
}
